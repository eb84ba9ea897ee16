use crate::composer::{FeedbackComposer, FrameSink};
use crate::reconnect::{Action, ConnectionState, ReconnectController, ReconnectPolicy, Trigger};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_core::{
    close_code, ClientFrame, Envelope, ParleyError, ParleyResult, Payload, Sequence, SessionId,
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the client surfaces to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The link changed state.
    State(ConnectionState),
    /// A new envelope from the bridge, never repeated.
    Envelope(Envelope),
    /// The bridge will accept nothing more on this session.
    SessionEnded,
}

enum Command {
    Trigger(Trigger),
    Send(ClientFrame, oneshot::Sender<ParleyResult<()>>),
    Shutdown,
}

/// Client end of one session.
///
/// A background driver owns the socket and the [`ReconnectController`]; the
/// handle talks to it over channels. On every (re)connect the driver reports
/// the highest sequence it has seen, so the bridge replays only the gap and
/// the owner never sees an envelope twice.
pub struct BridgeClient {
    session_id: SessionId,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl BridgeClient {
    /// Starts the driver and issues an explicit open.
    ///
    /// `base_url` is the gateway root, e.g. `ws://127.0.0.1:8000`; an
    /// `http` scheme is mapped to `ws`.
    pub fn connect(base_url: &str, session_id: SessionId, policy: ReconnectPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver {
            endpoint: endpoint(base_url, &session_id),
            ctl: ReconnectController::new(policy),
            ws: None,
            last_seen: 0,
            fresh: false,
            retry_at: None,
            event_tx,
            state_tx,
        };
        let task = tokio::spawn(driver.run(cmd_rx));
        let _ = cmd_tx.send(Command::Trigger(Trigger::Open));

        Self {
            session_id,
            cmd_tx,
            events,
            state,
            task,
        }
    }

    /// The session this client serves.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch for link state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Feeds a trigger (open, foreground, network restored).
    pub fn trigger(&self, trigger: Trigger) {
        let _ = self.cmd_tx.send(Command::Trigger(trigger));
    }

    /// Next event, or `None` once the driver has stopped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// A sink that sends frames through this client's transport.
    pub fn sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(ClientSink {
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    /// A composer bound to this client.
    pub fn composer(&self) -> FeedbackComposer {
        FeedbackComposer::new(self.sink())
    }

    /// Stops the driver and closes the socket.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

struct ClientSink {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

#[async_trait]
impl FrameSink for ClientSink {
    async fn send_frame(&self, frame: ClientFrame) -> ParleyResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send(frame, reply_tx))
            .map_err(|_| ParleyError::TransportUnavailable("client stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| ParleyError::TransportUnavailable("client stopped".into()))?
    }
}

fn endpoint(base_url: &str, session_id: &SessionId) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws/{session_id}")
}

struct Driver {
    endpoint: String,
    ctl: ReconnectController,
    ws: Option<Ws>,
    last_seen: Sequence,
    /// Set on connect until the first envelope arrives.
    fresh: bool,
    retry_at: Option<Instant>,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Trigger(trigger)) => {
                        let action = self.ctl.trigger(trigger);
                        self.apply(action).await;
                    }
                    Some(Command::Send(frame, reply)) => {
                        let result = self.send(frame).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = sleep_until(self.retry_at) => {
                    self.retry_at = None;
                    let action = self.ctl.on_retry_due();
                    self.apply(action).await;
                }
                msg = next_message(&mut self.ws) => self.on_message(msg).await,
            }
        }

        if let Some(mut ws) = self.ws.take() {
            let _ = ws.close(None).await;
        }
        debug!(endpoint = %self.endpoint, "Client driver stopped");
    }

    async fn apply(&mut self, mut action: Action) {
        loop {
            self.publish_state();
            match action {
                Action::Connect => {
                    self.retry_at = None;
                    action = self.dial().await;
                }
                Action::Retry { delay, .. } => {
                    self.retry_at = Some(Instant::now() + delay);
                    return;
                }
                Action::GiveUp | Action::Idle => return,
            }
        }
    }

    async fn dial(&mut self) -> Action {
        let url = format!("{}?last_seen={}", self.endpoint, self.last_seen);
        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws, _)) => {
                info!(url = %url, "Connected to bridge");
                self.ws = Some(ws);
                self.fresh = true;
                self.ctl.on_connected();
                Action::Idle
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Connect failed");
                self.ctl.on_connect_failed()
            }
        }
    }

    async fn send(&mut self, frame: ClientFrame) -> ParleyResult<()> {
        if self.ctl.session_ended() {
            return Err(ParleyError::SessionClosed("session has ended".into()));
        }
        let Some(ws) = self.ws.as_mut() else {
            return Err(ParleyError::TransportUnavailable("not connected".into()));
        };
        let text = serde_json::to_string(&frame)?;
        if let Err(e) = ws.send(Message::Text(text)).await {
            warn!(error = %e, "Send failed, dropping transport");
            self.ws = None;
            let action = self.ctl.on_closed(false);
            self.apply(action).await;
            return Err(ParleyError::TransportUnavailable(e.to_string()));
        }
        Ok(())
    }

    async fn on_message(
        &mut self,
        msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match msg {
            Some(Ok(Message::Text(text))) => {
                let env: Envelope = match serde_json::from_str(&text) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!(error = %e, "Unreadable envelope ignored");
                        return;
                    }
                };
                // The bridge only replays above the reported watermark, so a
                // first envelope at or below it means the session id now
                // names a new session that numbers from 1 again.
                if std::mem::take(&mut self.fresh) && env.sequence <= self.last_seen {
                    info!(
                        sequence = env.sequence,
                        last_seen = self.last_seen,
                        "Bridge restarted sequence numbering"
                    );
                    self.last_seen = 0;
                }
                if env.sequence <= self.last_seen {
                    debug!(sequence = env.sequence, "Already seen, skipped");
                    return;
                }
                self.last_seen = env.sequence;
                let ended = matches!(env.payload, Payload::SessionComplete);
                let _ = self.event_tx.send(ClientEvent::Envelope(env));
                if ended {
                    self.end_session();
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.map(|f| u16::from(f.code));
                debug!(?code, "Bridge closed the transport");
                let ended = code == Some(close_code::SESSION_CLOSED)
                    || (code == Some(u16::from(CloseCode::Normal)) && self.ctl.session_ended());
                self.closed(ended).await;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Transport error");
                self.closed(false).await;
            }
            None => self.closed(false).await,
        }
    }

    fn end_session(&mut self) {
        if !self.ctl.session_ended() {
            let _ = self.ctl.on_closed(true);
            let _ = self.event_tx.send(ClientEvent::SessionEnded);
        }
    }

    async fn closed(&mut self, session_ended: bool) {
        self.ws = None;
        if session_ended {
            self.end_session();
            self.publish_state();
            return;
        }
        if self.ctl.session_ended() {
            self.publish_state();
            return;
        }
        let action = self.ctl.on_closed(false);
        self.apply(action).await;
    }

    fn publish_state(&self) {
        let state = self.ctl.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            let _ = self.event_tx.send(ClientEvent::State(state));
        }
    }
}

async fn next_message(
    ws: &mut Option<Ws>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match ws {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
