//! Types for the tool-invocation boundary.
//!
//! These live in `parley-core` so that `parley-builtins` (which exposes the
//! `collect_feedback` tool) and `parley-gateway` (which implements the
//! bridge behind it) can share them without depending on each other.

use crate::{AttachmentRef, FeedbackPayload, ParleyResult, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request from an agent to show a work summary and collect a reply.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    /// Markdown work summary shown to the user.
    pub work_summary: String,
    /// How long to wait for a reply.
    pub timeout: Duration,
    /// Existing session to reuse; a fresh one is opened when `None`.
    pub session_id: Option<String>,
    /// When false, return as soon as the summary is delivered.
    pub require_response: bool,
}

impl CollectRequest {
    /// A request that waits up to `timeout` on a fresh session.
    pub fn new(work_summary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            work_summary: work_summary.into(),
            timeout,
            session_id: None,
            require_response: true,
        }
    }

    /// Reuse (or create) the named session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Return right after delivery instead of waiting for a reply.
    pub fn fire_and_forget(mut self) -> Self {
        self.require_response = false;
        self
    }
}

/// The user's reply as handed back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    /// Session the reply arrived on.
    pub session_id: SessionId,
    /// Reply text.
    pub text: String,
    /// Attachment metadata.
    pub attachments: Vec<AttachmentRef>,
    /// Client draft id of the accepted submission.
    pub draft_id: String,
    /// When the bridge accepted it.
    pub received_at: DateTime<Utc>,
}

impl FeedbackResult {
    /// Builds a result from an accepted payload.
    pub fn from_payload(session_id: SessionId, payload: FeedbackPayload) -> Self {
        Self {
            session_id,
            text: payload.text,
            attachments: payload.attachments,
            draft_id: payload.draft_id,
            received_at: Utc::now(),
        }
    }

    /// Attachments hinted as images.
    pub fn image_count(&self) -> usize {
        self.attachments.iter().filter(|a| a.is_image()).count()
    }

    /// Attachments that are not images.
    pub fn file_count(&self) -> usize {
        self.attachments.len() - self.image_count()
    }
}

/// How a `collect_feedback` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    /// The user replied in time.
    Feedback(FeedbackResult),
    /// The wait elapsed first. An expected outcome, not an error.
    Timeout {
        /// Session that was waited on.
        session_id: SessionId,
        /// How long the caller waited.
        waited: Duration,
    },
    /// `require_response` was false; the summary is queued for the client.
    Delivered {
        /// Session that carries the summary.
        session_id: SessionId,
        /// Whether a live transport received it immediately.
        connected: bool,
    },
}

impl CollectOutcome {
    /// The session the outcome refers to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            CollectOutcome::Feedback(r) => &r.session_id,
            CollectOutcome::Timeout { session_id, .. }
            | CollectOutcome::Delivered { session_id, .. } => session_id,
        }
    }
}

/// Something that can pause an agent until a human replies.
/// The WebSocket bridge is the production implementation; tests use mocks.
#[async_trait]
pub trait FeedbackCollector: Send + Sync {
    /// Presents `request.work_summary` and waits per the request's policy.
    async fn collect_feedback(&self, request: CollectRequest) -> ParleyResult<CollectOutcome>;
}
