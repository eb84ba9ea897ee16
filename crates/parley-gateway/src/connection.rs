use chrono::{DateTime, Utc};
use parley_core::{close_code, Envelope, ParleyError, ParleyResult, Payload, Sequence, SessionId};
use parley_session::{Session, SessionStore, SharedSession, TransportCommand, TransportHandle};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A live transport registered with the manager.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Transport instance id.
    pub id: Uuid,
    /// Session it serves.
    pub session_id: SessionId,
    /// When it attached.
    pub attached_at: DateTime<Utc>,
}

/// A successful attach: the socket task drains `rx` until it sees a close.
#[derive(Debug)]
pub struct Attachment {
    /// Transport instance id, needed to detach.
    pub transport_id: Uuid,
    /// Session the transport is bound to.
    pub session: SharedSession,
    /// Commands for the socket task.
    pub rx: mpsc::UnboundedReceiver<TransportCommand>,
}

/// Keeps the single live transport per session and pushes envelopes to it.
///
/// Every operation runs under the session's own lock, so replay, live
/// delivery and transport swaps for one session are strictly ordered. The
/// session's transport slot is the only record of who is connected.
pub struct ConnectionManager {
    store: Arc<SessionStore>,
}

impl ConnectionManager {
    /// Creates a manager over `store`.
    pub fn new(store: Arc<SessionStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// The session store this manager serves.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Binds a new transport to `session_id`.
    ///
    /// Unknown ids are opened. A transport for a terminal session is refused
    /// with `SessionClosed`. Any transport already attached is closed with
    /// the `superseded` code before the new one is installed; the new one is
    /// then replayed everything above `last_seen`. A `last_seen` above the
    /// session's head sequence belongs to an earlier incarnation of the id
    /// and is treated as 0.
    pub async fn attach(
        &self,
        session_id: &SessionId,
        last_seen: Sequence,
    ) -> ParleyResult<Attachment> {
        let shared = self.store.open(Some(session_id.as_str())).await?;
        let transport_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut session = shared.lock().await;
            if session.is_terminal() {
                warn!(session_id = %session_id, state = ?session.state(), "Late transport refused");
                return Err(ParleyError::SessionClosed(session_id.to_string()));
            }

            if let Some(old) = session.take_transport() {
                info!(
                    session_id = %session_id,
                    old_transport = %old.id(),
                    new_transport = %transport_id,
                    "Superseding live transport"
                );
                old.close(close_code::SUPERSEDED, "superseded");
            }

            let head = session.channel().last_outbound_sequence();
            let last_seen = if last_seen > head {
                warn!(
                    session_id = %session_id,
                    last_seen,
                    head,
                    "Transport watermark ahead of session, replaying from start"
                );
                0
            } else {
                last_seen
            };

            session.replace_transport(TransportHandle::new(transport_id, tx, last_seen));
            session.activate();
            let replayed = Self::flush(&mut session);
            info!(
                session_id = %session_id,
                transport_id = %transport_id,
                last_seen,
                replayed,
                "Transport attached"
            );
        }

        Ok(Attachment {
            transport_id,
            session: shared,
            rx,
        })
    }

    /// Drops the transport if it is still the one bound to the session.
    ///
    /// A superseded transport detaching late leaves its successor alone.
    pub async fn detach(&self, session_id: &SessionId, transport_id: Uuid) {
        let Ok(shared) = self.store.get(session_id).await else {
            return;
        };
        let mut session = shared.lock().await;
        if session.transport().map(TransportHandle::id) == Some(transport_id) {
            session.take_transport();
            session.touch(Utc::now());
            info!(session_id = %session_id, transport_id = %transport_id, "Transport detached");
        } else {
            debug!(session_id = %session_id, transport_id = %transport_id, "Stale transport detached");
        }
    }

    /// Queues an outbound payload and pushes it if a transport is attached.
    pub async fn enqueue(&self, session_id: &SessionId, payload: Payload) -> ParleyResult<Envelope> {
        let shared = self.store.get(session_id).await?;
        let mut session = shared.lock().await;
        let env = session.enqueue_outbound(payload)?;
        Self::flush(&mut session);
        Ok(env)
    }

    /// Pushes everything above the transport's watermark, then trims what
    /// the transport now holds. Call with the session lock held. A transport
    /// whose task has gone is dropped.
    pub fn flush(session: &mut Session) -> usize {
        let Some(watermark) = session.transport().map(TransportHandle::delivered) else {
            return 0;
        };
        let pending = session.channel().drain_outbound(watermark);
        let result = match session.transport_mut() {
            Some(transport) => transport.deliver(&pending),
            None => Ok(0),
        };
        match result {
            Ok(sent) => {
                if sent > 0 {
                    debug!(session_id = %session.id, sent, "Envelopes delivered");
                }
                if let Some(delivered) = session.transport().map(TransportHandle::delivered) {
                    session.channel_mut().trim_delivered(delivered);
                }
                sent
            }
            Err(()) => {
                warn!(session_id = %session.id, "Transport gone during delivery, discarding handle");
                session.take_transport();
                0
            }
        }
    }

    /// Whether a live transport is currently attached to the session.
    pub async fn is_connected(&self, session_id: &SessionId) -> bool {
        let Ok(shared) = self.store.get(session_id).await else {
            return false;
        };
        let session = shared.lock().await;
        Self::live_connection(&session).is_some()
    }

    /// Number of live transports across all sessions.
    pub async fn connection_count(&self) -> usize {
        self.connections().await.len()
    }

    /// Live transports, for diagnostics.
    pub async fn connections(&self) -> Vec<Connection> {
        let mut live = Vec::new();
        for shared in self.store.snapshot().await {
            let session = shared.lock().await;
            if let Some(conn) = Self::live_connection(&session) {
                live.push(conn);
            }
        }
        live
    }

    fn live_connection(session: &Session) -> Option<Connection> {
        session
            .transport()
            .filter(|t| !t.is_closed())
            .map(|t| Connection {
                id: t.id(),
                session_id: session.id.clone(),
                attached_at: t.attached_at(),
            })
    }
}
