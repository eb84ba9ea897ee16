use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-session, per-direction envelope counter. The first envelope is `1`;
/// `0` means "nothing observed yet".
pub type Sequence = u64;

/// A typed, sequenced unit of bridge traffic.
///
/// On the wire an envelope is a single JSON text frame:
/// `{"type": "...", "payload": {...}, "sequence": N}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Assigned by the message channel at enqueue time.
    pub sequence: Sequence,
    /// The typed body.
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Creates an envelope with the given sequence number.
    pub fn new(sequence: Sequence, payload: Payload) -> Self {
        Self { sequence, payload }
    }

    /// The envelope's type tag.
    pub fn kind(&self) -> EnvelopeType {
        self.payload.kind()
    }
}

/// Body of an [`Envelope`], tagged by its wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    /// Work summary from the agent. Only the latest one is meaningful.
    AgentMessage {
        /// Markdown-capable text.
        content: String,
    },
    /// A reply composed by the user.
    UserFeedback(FeedbackPayload),
    /// Acknowledges a `user_feedback`; does not imply completion.
    FeedbackReceived {
        /// Short status text.
        message: String,
    },
    /// No further interaction is accepted on this session.
    SessionComplete,
    /// Non-fatal signalling; never closes the transport by itself.
    Error {
        /// Machine-readable failure class.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl Payload {
    /// Builds an `agent_message` payload.
    pub fn agent_message(content: impl Into<String>) -> Self {
        Payload::AgentMessage {
            content: content.into(),
        }
    }

    /// Builds an `error` payload.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Payload::Error {
            kind,
            message: message.into(),
        }
    }

    /// The payload's type tag.
    pub fn kind(&self) -> EnvelopeType {
        match self {
            Payload::AgentMessage { .. } => EnvelopeType::AgentMessage,
            Payload::UserFeedback(_) => EnvelopeType::UserFeedback,
            Payload::FeedbackReceived { .. } => EnvelopeType::FeedbackReceived,
            Payload::SessionComplete => EnvelopeType::SessionComplete,
            Payload::Error { .. } => EnvelopeType::Error,
        }
    }
}

/// Wire type tags, used for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// `agent_message`
    AgentMessage,
    /// `user_feedback`
    UserFeedback,
    /// `feedback_received`
    FeedbackReceived,
    /// `session_complete`
    SessionComplete,
    /// `error`
    Error,
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeType::AgentMessage => "agent_message",
            EnvelopeType::UserFeedback => "user_feedback",
            EnvelopeType::FeedbackReceived => "feedback_received",
            EnvelopeType::SessionComplete => "session_complete",
            EnvelopeType::Error => "error",
        };
        f.write_str(s)
    }
}

/// Failure class carried by `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The outbound queue overflowed and older envelopes were dropped.
    Backpressure,
    /// The session no longer accepts traffic.
    SessionClosed,
    /// Malformed session identifier.
    InvalidSessionId,
    /// Unknown session.
    NotFound,
    /// No live transport.
    TransportUnavailable,
    /// Empty reply.
    InvalidFeedback,
    /// Unparseable or unexpected frame.
    Protocol,
    /// Anything else.
    Internal,
}

/// Frames a client sends to the bridge. They carry no sequence: the bridge
/// numbers inbound traffic itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A composed reply.
    UserFeedback(FeedbackPayload),
}

/// Metadata for an out-of-band uploaded file. The bytes never travel through
/// the bridge; `content_handle` is opaque to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Original file name.
    pub name: String,
    /// Size in bytes as reported by the uploader.
    pub byte_size: u64,
    /// MIME type hint, e.g. `image/png`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_hint: Option<String>,
    /// Storage collaborator's handle for the bytes.
    pub content_handle: String,
}

impl AttachmentRef {
    /// Creates an attachment reference without a MIME hint.
    pub fn new(name: impl Into<String>, byte_size: u64, content_handle: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            byte_size,
            mime_hint: None,
            content_handle: content_handle.into(),
        }
    }

    /// Sets the MIME hint.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_hint = Some(mime.into());
        self
    }

    /// True when the MIME hint names an image type.
    pub fn is_image(&self) -> bool {
        self.mime_hint
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"))
    }
}

/// The body of a `user_feedback` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    /// Client-generated id; resubmitting the same draft is idempotent.
    pub draft_id: String,
    /// Trimmed reply text, possibly empty when attachments are present.
    #[serde(default)]
    pub text: String,
    /// Attachment metadata.
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl FeedbackPayload {
    /// True when there is neither text nor an attachment.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }

    /// Number of attachments hinted as images.
    pub fn image_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.is_image()).count()
    }

    /// Number of non-image attachments.
    pub fn file_count(&self) -> usize {
        self.attachments.len() - self.image_count()
    }
}

/// WebSocket close codes the bridge uses when it ends a transport.
pub mod close_code {
    /// Normal closure after `session_complete`.
    pub const NORMAL: u16 = 1000;
    /// A newer transport attached to the same session.
    pub const SUPERSEDED: u16 = 4001;
    /// The session is `COMPLETE` or `EXPIRED`.
    pub const SESSION_CLOSED: u16 = 4409;
}
