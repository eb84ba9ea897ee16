use crate::channel::{InboundOutcome, MessageChannel};
use crate::transport::TransportHandle;
use chrono::{DateTime, Utc};
use parley_core::{
    close_code, BridgeConfig, Envelope, FeedbackPayload, ParleyError, ParleyResult, Payload,
    Sequence, SessionId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a session. `Complete` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// Created, no transport attached yet.
    Pending,
    /// At least one transport has attached.
    Active,
    /// Finished by a terminal reply or by the caller.
    Complete,
    /// Timed out or idle past its TTL.
    Expired,
}

impl SessionState {
    /// True for `Complete` and `Expired`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Expired)
    }
}

/// Per-session settings derived from [`BridgeConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Idle time before the sweep expires the session.
    pub ttl: Duration,
    /// Complete after the first accepted reply.
    pub single_shot: bool,
    /// Outbound queue bound.
    pub outbound_capacity: usize,
    /// Inbound queue bound.
    pub inbound_capacity: usize,
}

impl From<&BridgeConfig> for SessionOptions {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            ttl: cfg.session_ttl(),
            single_shot: cfg.single_shot,
            outbound_capacity: cfg.outbound_capacity,
            inbound_capacity: cfg.inbound_capacity,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

/// Read-only view of a session, served by the info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: SessionId,
    /// Latest work summary.
    pub question: Option<String>,
    /// Lifecycle state.
    pub status: SessionState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Text of the last accepted reply.
    pub response: Option<String>,
    /// Image attachments on the last accepted reply.
    pub images_count: usize,
    /// Other attachments on the last accepted reply.
    pub files_count: usize,
    /// Whether a transport is attached right now.
    pub connected: bool,
    /// Highest outbound sequence assigned.
    pub last_sequence: Sequence,
}

/// One agent/user exchange.
#[derive(Debug)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Complete after the first accepted reply.
    pub single_shot: bool,
    state: SessionState,
    ttl: chrono::Duration,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    work_summary: Option<String>,
    last_feedback: Option<FeedbackPayload>,
    channel: MessageChannel,
    transport: Option<TransportHandle>,
}

impl Session {
    /// Creates a `Pending` session.
    pub fn new(id: SessionId, options: &SessionOptions) -> Self {
        Self::new_at(id, options, Utc::now())
    }

    /// Creates a `Pending` session as of `now`.
    pub fn new_at(id: SessionId, options: &SessionOptions, now: DateTime<Utc>) -> Self {
        let ttl = to_chrono(options.ttl);
        Self {
            id,
            created_at: now,
            single_shot: options.single_shot,
            state: SessionState::Pending,
            ttl,
            last_activity: now,
            expires_at: add(now, ttl),
            closed_at: None,
            work_summary: None,
            last_feedback: None,
            channel: MessageChannel::new(options.outbound_capacity, options.inbound_capacity),
            transport: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True for `Complete` and `Expired`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves `Pending` to `Active`. No-op in any other state.
    pub fn activate(&mut self) {
        if self.state == SessionState::Pending {
            self.state = SessionState::Active;
            self.touch(Utc::now());
        }
    }

    /// Records activity, pushing the idle deadline out by the TTL.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
        self.expires_at = self.expires_at.max(add(now, self.ttl));
    }

    /// Keeps the session alive at least until `deadline`.
    pub fn hold_until(&mut self, deadline: DateTime<Utc>) {
        self.expires_at = self.expires_at.max(deadline);
    }

    /// Overrides the deadline, e.g. to a short grace after an abandoned wait.
    pub fn set_deadline(&mut self, deadline: DateTime<Utc>) {
        self.expires_at = deadline;
    }

    /// When the sweep may expire the session.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Last recorded activity.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// When the session became terminal.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Live session whose deadline has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now >= self.expires_at
    }

    /// Terminal session kept longer than `retention`.
    pub fn is_removable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.closed_at {
            Some(closed) if self.is_terminal() => now >= add(closed, to_chrono(retention)),
            _ => false,
        }
    }

    /// Appends to the outbound queue. Fails with `SessionClosed` once terminal.
    pub fn enqueue_outbound(&mut self, payload: Payload) -> ParleyResult<Envelope> {
        if self.is_terminal() {
            return Err(ParleyError::SessionClosed(self.id.to_string()));
        }
        if let Payload::AgentMessage { content } = &payload {
            self.work_summary = Some(content.clone());
        }
        self.touch(Utc::now());
        Ok(self.channel.enqueue_outbound(payload))
    }

    /// Applies the acceptance rules for a `user_feedback`.
    ///
    /// A draft id that was already accepted is reported as `Duplicate` in
    /// any state. Otherwise the session must be `Active` and the reply must
    /// not be empty.
    pub fn accept_feedback(&mut self, feedback: FeedbackPayload) -> ParleyResult<InboundOutcome> {
        if self.channel.has_draft(&feedback.draft_id) {
            return Ok(InboundOutcome::Duplicate);
        }
        if self.state != SessionState::Active {
            return Err(ParleyError::SessionClosed(format!(
                "{} is {:?}",
                self.id, self.state
            )));
        }
        if feedback.is_empty() {
            return Err(ParleyError::InvalidFeedback(
                "reply needs text or at least one attachment".into(),
            ));
        }
        self.touch(Utc::now());
        self.last_feedback = Some(feedback.clone());
        Ok(self.channel.enqueue_inbound(feedback))
    }

    /// Marks the session `Complete`. Only valid once.
    pub fn complete(&mut self) -> ParleyResult<()> {
        if self.is_terminal() {
            return Err(ParleyError::SessionClosed(self.id.to_string()));
        }
        self.state = SessionState::Complete;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the session `Expired` as of `now`. Returns false if it was
    /// already terminal.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = SessionState::Expired;
        self.closed_at = Some(now);
        true
    }

    /// Frees the queues and closes any attached transport.
    pub fn release(&mut self) {
        self.channel.release();
        if let Some(transport) = self.transport.take() {
            let code = match self.state {
                SessionState::Complete => close_code::NORMAL,
                _ => close_code::SESSION_CLOSED,
            };
            transport.close(code, format!("session {:?}", self.state).to_lowercase());
        }
    }

    /// The message channel.
    pub fn channel(&self) -> &MessageChannel {
        &self.channel
    }

    /// Mutable access to the message channel.
    pub fn channel_mut(&mut self) -> &mut MessageChannel {
        &mut self.channel
    }

    /// The attached transport, if any.
    pub fn transport(&self) -> Option<&TransportHandle> {
        self.transport.as_ref()
    }

    /// Mutable access to the attached transport.
    pub fn transport_mut(&mut self) -> Option<&mut TransportHandle> {
        self.transport.as_mut()
    }

    /// Installs a transport, returning the one it replaces.
    pub fn replace_transport(&mut self, handle: TransportHandle) -> Option<TransportHandle> {
        self.transport.replace(handle)
    }

    /// Detaches the transport.
    pub fn take_transport(&mut self) -> Option<TransportHandle> {
        self.transport.take()
    }

    /// Latest work summary shown to the user.
    pub fn work_summary(&self) -> Option<&str> {
        self.work_summary.as_deref()
    }

    /// Last accepted reply.
    pub fn last_feedback(&self) -> Option<&FeedbackPayload> {
        self.last_feedback.as_ref()
    }

    /// Snapshot for the info endpoint.
    pub fn info(&self) -> SessionInfo {
        let fb = self.last_feedback.as_ref();
        SessionInfo {
            session_id: self.id.clone(),
            question: self.work_summary.clone(),
            status: self.state,
            created_at: self.created_at,
            response: fb.map(|f| f.text.clone()),
            images_count: fb.map_or(0, FeedbackPayload::image_count),
            files_count: fb.map_or(0, FeedbackPayload::file_count),
            connected: self.transport.is_some(),
            last_sequence: self.channel.last_outbound_sequence(),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn add(at: DateTime<Utc>, d: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
