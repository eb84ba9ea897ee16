use crate::envelope::ErrorKind;

/// Top-level error type for the Parley bridge.
///
/// Each variant is a failure class a caller can react to. Queue overflow and
/// wait timeouts are deliberately absent: the first travels as an `error`
/// envelope, the second is a normal [`CollectOutcome`](crate::CollectOutcome).
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// A supplied session identifier failed the shape check.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// No session is registered under the identifier.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session is `COMPLETE` or `EXPIRED` and accepts no further traffic.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// No live transport was available to carry a frame.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A composed reply had neither text nor attachments.
    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    /// A frame could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    /// The [`ErrorKind`] reported to a client when this error is surfaced
    /// as an `error` envelope.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParleyError::InvalidSessionId(_) => ErrorKind::InvalidSessionId,
            ParleyError::NotFound(_) => ErrorKind::NotFound,
            ParleyError::SessionClosed(_) => ErrorKind::SessionClosed,
            ParleyError::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            ParleyError::InvalidFeedback(_) => ErrorKind::InvalidFeedback,
            ParleyError::Protocol(_) | ParleyError::Json(_) => ErrorKind::Protocol,
            ParleyError::Config(_) | ParleyError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ParleyError::TransportUnavailable(_))
    }
}

/// A convenience `Result` alias using [`ParleyError`].
pub type ParleyResult<T> = Result<T, ParleyError>;
