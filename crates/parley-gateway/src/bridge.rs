use crate::connection::ConnectionManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{
    BridgeConfig, ClientFrame, CollectOutcome, CollectRequest, Envelope, FeedbackCollector,
    FeedbackPayload, FeedbackResult, ParleyError, ParleyResult, Payload, SessionId,
};
use parley_session::{InboundOutcome, SessionInfo, SessionStore, SweepReport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Text of the `feedback_received` acknowledgement.
pub const ACK_MESSAGE: &str = "Feedback received, thank you!";

/// What a blocked `collect_feedback` call is woken with.
#[derive(Debug, Clone)]
enum WaitSignal {
    Feedback(FeedbackResult),
    Expired,
}

type Waiters = Arc<RwLock<HashMap<SessionId, Vec<oneshot::Sender<WaitSignal>>>>>;

/// Result of handing a reply to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// First time this draft was seen.
    Accepted {
        /// The reply as handed to waiting callers.
        result: FeedbackResult,
        /// Whether the reply completed the session.
        completed: bool,
    },
    /// The draft had already been accepted; nothing changed.
    Duplicate,
}

/// The session bridge: correlates tool calls with the replies that come back
/// over the transport, and owns the background sweep.
///
/// Callers waiting for a reply never hold a session lock. They park on a
/// oneshot keyed by session id, released by the first accepted reply, by the
/// session expiring, or by their own timeout. A reply that arrives while
/// nobody is parked stays in the session's inbound queue for the next
/// caller. Waiters are only touched with the session lock held (session
/// first, waiters second), so a reply cannot slip between the queue check
/// and the park.
pub struct FeedbackBridge {
    store: Arc<SessionStore>,
    connections: Arc<ConnectionManager>,
    waiters: Waiters,
}

impl FeedbackBridge {
    /// Builds a bridge with a fresh store.
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let store = SessionStore::new(config);
        let connections = ConnectionManager::new(store.clone());
        Arc::new(Self {
            store,
            connections,
            waiters: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// The session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// The connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Bridge settings.
    pub fn config(&self) -> &BridgeConfig {
        self.store.config()
    }

    /// Number of callers currently parked on a reply.
    pub async fn waiting_count(&self) -> usize {
        self.waiters.read().await.values().map(Vec::len).sum()
    }

    /// Accepts one reply, acknowledges it and, for single-shot sessions,
    /// completes the session.
    ///
    /// This is the single path for replies, whether they arrive as a
    /// WebSocket frame or over HTTP.
    pub async fn submit_feedback(
        &self,
        session_id: &SessionId,
        feedback: FeedbackPayload,
    ) -> ParleyResult<Submission> {
        let shared = self.store.get(session_id).await?;
        let submission = {
            let mut session = shared.lock().await;
            let draft_id = feedback.draft_id.clone();
            match session.accept_feedback(feedback.clone())? {
                InboundOutcome::Duplicate => {
                    debug!(session_id = %session_id, draft_id = %draft_id, "Duplicate reply ignored");
                    return Ok(Submission::Duplicate);
                }
                InboundOutcome::Accepted(env) => {
                    info!(
                        session_id = %session_id,
                        draft_id = %draft_id,
                        inbound_sequence = env.sequence,
                        images = feedback.image_count(),
                        files = feedback.file_count(),
                        "Reply accepted"
                    );
                }
            }

            let result = FeedbackResult::from_payload(session_id.clone(), feedback);
            let handed_over = self
                .notify(session_id, WaitSignal::Feedback(result.clone()))
                .await;
            if handed_over > 0 {
                // Waiters only park on an empty inbound queue.
                session.channel_mut().pop_inbound();
            } else {
                debug!(session_id = %session_id, "No caller parked, reply kept for the next one");
            }

            session.enqueue_outbound(Payload::FeedbackReceived {
                message: ACK_MESSAGE.into(),
            })?;
            let completed = session.single_shot;
            if completed {
                session.enqueue_outbound(Payload::SessionComplete)?;
            }
            ConnectionManager::flush(&mut session);
            if completed {
                session.complete()?;
                session.release();
                info!(session_id = %session_id, "Session completed by reply");
            }

            Submission::Accepted { result, completed }
        };
        Ok(submission)
    }

    /// Parses and applies one text frame from a transport.
    pub async fn handle_frame(&self, session_id: &SessionId, text: &str) -> ParleyResult<Submission> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| ParleyError::Protocol(format!("unreadable frame: {e}")))?;
        match frame {
            ClientFrame::UserFeedback(mut payload) => {
                payload.text = payload.text.trim().to_string();
                self.submit_feedback(session_id, payload).await
            }
        }
    }

    /// Reports a rejected frame back to the client as an `error` envelope.
    ///
    /// Terminal sessions take no further envelopes; the error is only logged.
    pub async fn report_error(&self, session_id: &SessionId, err: &ParleyError) {
        warn!(session_id = %session_id, error = %err, "Client frame rejected");
        if let Err(e) = self
            .connections
            .enqueue(session_id, Payload::error(err.kind(), err.to_string()))
            .await
        {
            debug!(session_id = %session_id, error = %e, "Error envelope not queued");
        }
    }

    /// Snapshot for the info endpoint.
    pub async fn session_info(&self, raw_id: &str) -> ParleyResult<SessionInfo> {
        let shared = self.store.lookup(raw_id).await?;
        let info = shared.lock().await.info();
        Ok(info)
    }

    /// One sweep pass; callers parked on expired sessions are released with
    /// a timeout.
    pub async fn sweep(&self) -> SweepReport {
        let report = self.store.sweep(Utc::now()).await;
        for id in &report.expired {
            self.notify(id, WaitSignal::Expired).await;
        }
        if !report.expired.is_empty() || !report.removed.is_empty() {
            info!(
                expired = report.expired.len(),
                removed = report.removed.len(),
                "Sweep finished"
            );
        }
        report
    }

    /// Runs [`sweep`](Self::sweep) on the configured interval until the
    /// returned task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        let period = self.config().sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                bridge.sweep().await;
            }
        })
    }

    /// Wakes every caller parked on the session. Returns how many were
    /// still there to take the signal.
    async fn notify(&self, session_id: &SessionId, signal: WaitSignal) -> usize {
        let Some(senders) = self.waiters.write().await.remove(session_id) else {
            return 0;
        };
        let mut woken = 0;
        for tx in senders {
            if tx.send(signal.clone()).is_ok() {
                woken += 1;
            } else {
                debug!(session_id = %session_id, "Waiter already gone");
            }
        }
        woken
    }

    async fn register_waiter(&self, session_id: &SessionId) -> oneshot::Receiver<WaitSignal> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .write()
            .await
            .entry(session_id.clone())
            .or_default()
            .push(tx);
        rx
    }

    async fn expire_after_timeout(&self, session_id: &SessionId) {
        prune_waiters(&self.waiters, session_id).await;
        let Ok(shared) = self.store.get(session_id).await else {
            return;
        };
        let mut session = shared.lock().await;
        if session.expire(Utc::now()) {
            session.release();
            let released = self.notify(session_id, WaitSignal::Expired).await;
            info!(session_id = %session_id, released, "Session expired after wait timeout");
        }
    }
}

async fn prune_waiters(waiters: &Waiters, id: &SessionId) {
    let mut map = waiters.write().await;
    if let Some(list) = map.get_mut(id) {
        list.retain(|tx| !tx.is_closed());
        if list.is_empty() {
            map.remove(id);
        }
    }
}

fn deadline_after(wait: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(wait)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Armed while a caller is parked. If the caller's future is dropped before
/// an outcome, the session is given a short grace period instead of being
/// torn down, so a late reply can still land.
struct AbandonGuard {
    store: Arc<SessionStore>,
    waiters: Waiters,
    session_id: SessionId,
    grace: Duration,
    armed: bool,
}

impl AbandonGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let waiters = self.waiters.clone();
        let id = self.session_id.clone();
        let grace = self.grace;
        runtime.spawn(async move {
            prune_waiters(&waiters, &id).await;
            if let Ok(shared) = store.get(&id).await {
                let mut session = shared.lock().await;
                if !session.is_terminal() {
                    session.set_deadline(deadline_after(grace));
                    info!(
                        session_id = %id,
                        grace_secs = grace.as_secs(),
                        "Wait abandoned, session kept for grace period"
                    );
                }
            }
        });
    }
}

#[async_trait]
impl FeedbackCollector for FeedbackBridge {
    async fn collect_feedback(&self, request: CollectRequest) -> ParleyResult<CollectOutcome> {
        let shared = self.store.open(request.session_id.as_deref()).await?;

        let (session_id, connected, rx) = {
            let mut session = shared.lock().await;
            let session_id = session.id.clone();
            session.enqueue_outbound(Payload::agent_message(&request.work_summary))?;
            session.hold_until(deadline_after(request.timeout));
            ConnectionManager::flush(&mut session);
            let connected = session.transport().is_some();

            let rx = if request.require_response {
                if let Some(Envelope {
                    sequence,
                    payload: Payload::UserFeedback(feedback),
                }) = session.channel_mut().pop_inbound()
                {
                    info!(
                        session_id = %session_id,
                        inbound_sequence = sequence,
                        "Pending reply handed over without waiting"
                    );
                    return Ok(CollectOutcome::Feedback(FeedbackResult::from_payload(
                        session_id, feedback,
                    )));
                }
                Some(self.register_waiter(&session_id).await)
            } else {
                None
            };
            (session_id, connected, rx)
        };
        info!(
            session_id = %session_id,
            connected,
            timeout_secs = request.timeout.as_secs(),
            require_response = request.require_response,
            "Work summary queued"
        );

        let Some(rx) = rx else {
            return Ok(CollectOutcome::Delivered {
                session_id,
                connected,
            });
        };

        let mut guard = AbandonGuard {
            store: self.store.clone(),
            waiters: self.waiters.clone(),
            session_id: session_id.clone(),
            grace: self.config().abandon_grace(),
            armed: true,
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(request.timeout, rx).await;
        guard.disarm();

        match outcome {
            Ok(Ok(WaitSignal::Feedback(result))) => Ok(CollectOutcome::Feedback(result)),
            Ok(Ok(WaitSignal::Expired)) | Ok(Err(_)) => Ok(CollectOutcome::Timeout {
                session_id,
                waited: started.elapsed(),
            }),
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    timeout_secs = request.timeout.as_secs(),
                    "No reply before timeout"
                );
                self.expire_after_timeout(&session_id).await;
                Ok(CollectOutcome::Timeout {
                    session_id,
                    waited: started.elapsed(),
                })
            }
        }
    }
}
