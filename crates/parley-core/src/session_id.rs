use crate::{ParleyError, ParleyResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

/// Longest identifier accepted from outside.
pub const MAX_SESSION_ID_LEN: usize = 128;

static SESSION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("session id pattern is valid")
});

/// An opaque, URL-shareable session token.
///
/// Ids supplied by callers or clients are validated before they are trusted
/// as lookup keys: non-empty, at most [`MAX_SESSION_ID_LEN`] bytes, and only
/// ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validates an externally supplied identifier.
    pub fn parse(raw: &str) -> ParleyResult<Self> {
        if raw.is_empty() {
            return Err(ParleyError::InvalidSessionId("empty".into()));
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(ParleyError::InvalidSessionId(format!(
                "longer than {MAX_SESSION_ID_LEN} bytes"
            )));
        }
        if !SESSION_ID_RE.is_match(raw) {
            return Err(ParleyError::InvalidSessionId(format!(
                "'{raw}' contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// A fresh bridge-generated identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ParleyError;

    fn try_from(value: String) -> ParleyResult<Self> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
