use async_trait::async_trait;
use parley_core::{AttachmentRef, ClientFrame, FeedbackPayload, ParleyError, ParleyResult};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Anything that can put a client frame on the wire.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Sends one frame. Fails when no transport is live.
    async fn send_frame(&self, frame: ClientFrame) -> ParleyResult<()>;
}

/// A reply being composed. The draft id is fixed at creation so every
/// resubmission of the same draft is recognised by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackDraft {
    draft_id: String,
    text: String,
    attachments: Vec<AttachmentRef>,
}

impl Default for FeedbackDraft {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackDraft {
    /// An empty draft with a fresh id.
    pub fn new() -> Self {
        Self {
            draft_id: Uuid::new_v4().to_string(),
            text: String::new(),
            attachments: Vec::new(),
        }
    }

    /// The draft id.
    pub fn draft_id(&self) -> &str {
        &self.draft_id
    }

    /// Replaces the text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Current text, untrimmed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Adds an uploaded file's metadata.
    pub fn attach(&mut self, attachment: AttachmentRef) {
        self.attachments.push(attachment);
    }

    /// Removes attachments by name. Returns how many were removed.
    pub fn detach(&mut self, name: &str) -> usize {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.name != name);
        before - self.attachments.len()
    }

    /// Attachments so far.
    pub fn attachments(&self) -> &[AttachmentRef] {
        &self.attachments
    }

    /// True when there is neither text nor an attachment.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }

    /// Builds the `user_feedback` payload, rejecting an empty reply.
    pub fn to_payload(&self) -> ParleyResult<FeedbackPayload> {
        if self.is_empty() {
            return Err(ParleyError::InvalidFeedback(
                "reply needs text or at least one attachment".into(),
            ));
        }
        Ok(FeedbackPayload {
            draft_id: self.draft_id.clone(),
            text: self.text.trim().to_string(),
            attachments: self.attachments.clone(),
        })
    }
}

/// Drives the submit half of a reply: validate, send, keep the payload for
/// an unchanged retry if the send fails.
pub struct FeedbackComposer {
    sink: Arc<dyn FrameSink>,
    draft: FeedbackDraft,
    unsent: Option<FeedbackPayload>,
    sent: Vec<String>,
}

impl FeedbackComposer {
    /// Composer over `sink` with an empty draft.
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            draft: FeedbackDraft::new(),
            unsent: None,
            sent: Vec::new(),
        }
    }

    /// The draft being edited.
    pub fn draft(&self) -> &FeedbackDraft {
        &self.draft
    }

    /// Edits the draft. Edits after a failed send are ignored by
    /// [`retry`](Self::retry), which resends the payload as it was.
    pub fn draft_mut(&mut self) -> &mut FeedbackDraft {
        &mut self.draft
    }

    /// Payload whose send failed and which can be retried.
    pub fn unsent(&self) -> Option<&FeedbackPayload> {
        self.unsent.as_ref()
    }

    /// Draft ids sent so far.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Validates and sends the current draft.
    ///
    /// An empty draft fails with `InvalidFeedback` and nothing is sent. A
    /// send failure surfaces as `TransportUnavailable` and keeps the payload
    /// for [`retry`](Self::retry); `SessionClosed` is passed through and
    /// nothing is kept. On success a fresh draft replaces the sent one.
    pub async fn submit(&mut self) -> ParleyResult<FeedbackPayload> {
        let payload = self.draft.to_payload()?;
        self.send(payload).await
    }

    /// Resends the payload of the last failed submit, unchanged.
    pub async fn retry(&mut self) -> ParleyResult<FeedbackPayload> {
        let payload = self
            .unsent
            .clone()
            .ok_or_else(|| ParleyError::InvalidFeedback("nothing to retry".into()))?;
        self.send(payload).await
    }

    async fn send(&mut self, payload: FeedbackPayload) -> ParleyResult<FeedbackPayload> {
        let draft_id = payload.draft_id.clone();
        match self
            .sink
            .send_frame(ClientFrame::UserFeedback(payload.clone()))
            .await
        {
            Ok(()) => {
                info!(draft_id = %draft_id, "Reply sent");
                self.unsent = None;
                self.sent.push(draft_id);
                self.draft = FeedbackDraft::new();
                Ok(payload)
            }
            Err(ParleyError::SessionClosed(msg)) => {
                warn!(draft_id = %draft_id, "Session closed, reply discarded");
                self.unsent = None;
                Err(ParleyError::SessionClosed(msg))
            }
            Err(e) => {
                warn!(draft_id = %draft_id, error = %e, "Reply not sent, kept for retry");
                self.unsent = Some(payload);
                Err(match e {
                    ParleyError::TransportUnavailable(msg) => ParleyError::TransportUnavailable(msg),
                    other => ParleyError::TransportUnavailable(other.to_string()),
                })
            }
        }
    }
}
