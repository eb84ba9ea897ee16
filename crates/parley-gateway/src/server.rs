use crate::bridge::{FeedbackBridge, Submission, ACK_MESSAGE};
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use parley_core::{close_code, AttachmentRef, FeedbackPayload, ParleyError, Sequence, SessionId};
use parley_session::TransportCommand;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared application state.
pub struct AppState {
    /// The bridge every handler talks to.
    pub bridge: Arc<FeedbackBridge>,
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Builds the router over an existing bridge.
    pub fn build(bridge: Arc<FeedbackBridge>) -> Router {
        let state = Arc::new(AppState { bridge });
        Router::new()
            .route("/ws/{session_id}", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/api/session/{session_id}", get(session_info_handler))
            .route(
                "/api/session/{session_id}/feedback",
                post(feedback_handler),
            )
            .with_state(state)
    }
}

/// Maps bridge errors to HTTP responses.
pub struct ApiError(pub ParleyError);

impl From<ParleyError> for ApiError {
    fn from(err: ParleyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ParleyError::InvalidSessionId(_)
            | ParleyError::InvalidFeedback(_)
            | ParleyError::Protocol(_)
            | ParleyError::Json(_) => StatusCode::BAD_REQUEST,
            ParleyError::NotFound(_) => StatusCode::NOT_FOUND,
            ParleyError::SessionClosed(_) => StatusCode::CONFLICT,
            ParleyError::TransportUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ParleyError::Config(_) | ParleyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "status": "error",
            "kind": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "parley",
        "sessions": state.bridge.store().len().await,
        "connections": state.bridge.connections().connection_count().await,
    }))
}

async fn session_info_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state.bridge.session_info(&session_id).await?;
    Ok(Json(info))
}

/// Body of an HTTP reply. Unlike the WebSocket frame the draft id is
/// optional; one is generated when missing.
#[derive(Debug, Deserialize)]
struct HttpFeedback {
    #[serde(default)]
    draft_id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<AttachmentRef>,
}

async fn feedback_handler(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<HttpFeedback>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::parse(&session_id)?;
    let payload = FeedbackPayload {
        draft_id: body
            .draft_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        text: body.text.trim().to_string(),
        attachments: body.attachments,
    };
    let draft_id = payload.draft_id.clone();
    let submission = state.bridge.submit_feedback(&id, payload).await?;
    let (duplicate, completed) = match submission {
        Submission::Accepted { completed, .. } => (false, completed),
        Submission::Duplicate => (true, false),
    };
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": ACK_MESSAGE,
        "session_id": id,
        "draft_id": draft_id,
        "duplicate": duplicate,
        "completed": completed,
    })))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default)]
    last_seen: Sequence,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate before upgrading so a bad id never reaches the store.
    let id = SessionId::parse(&session_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id, query.last_seen)))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    session_id: SessionId,
    last_seen: Sequence,
) {
    let attachment = match state
        .bridge
        .connections()
        .attach(&session_id, last_seen)
        .await
    {
        Ok(a) => a,
        Err(e) => {
            let (code, reason) = match &e {
                ParleyError::SessionClosed(_) => {
                    (close_code::SESSION_CLOSED, "session closed".to_string())
                }
                other => (1011, other.to_string()),
            };
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
            return;
        }
    };
    let transport_id = attachment.transport_id;
    let mut rx = attachment.rx;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    info!(
        session_id = %session_id,
        transport_id = %transport_id,
        "WebSocket connected"
    );

    // Task: forward bridge commands to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                TransportCommand::Deliver(env) => {
                    let text = match serde_json::to_string(&env) {
                        Ok(t) => t,
                        Err(e) => {
                            error!(error = %e, "Failed to encode envelope");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                TransportCommand::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Task: apply client frames
    let bridge = state.bridge.clone();
    let sid = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = bridge.handle_frame(&sid, text.as_str()).await {
                        bridge.report_error(&sid, &e).await;
                    }
                }
                Message::Close(_) => break,
                _ => debug!(session_id = %sid, "Ignoring non-text frame"),
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state
        .bridge
        .connections()
        .detach(&session_id, transport_id)
        .await;
    info!(session_id = %session_id, transport_id = %transport_id, "WebSocket disconnected");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use parley_core::BridgeConfig;
    use tower::ServiceExt;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = GatewayServer::build(FeedbackBridge::new(BridgeConfig::default()));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["service"], "parley");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_info_status_codes() {
        let bridge = FeedbackBridge::new(BridgeConfig::default());
        bridge.store().open(Some("known")).await.unwrap();
        let app = GatewayServer::build(bridge);

        let resp = app
            .clone()
            .oneshot(Request::get("/api/session/known").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "PENDING");

        let resp = app
            .clone()
            .oneshot(Request::get("/api/session/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .oneshot(Request::get("/api/session/bad%20id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["kind"], "invalid_session_id");
    }

    #[tokio::test]
    async fn test_http_feedback_conflict_and_empty() {
        let bridge = FeedbackBridge::new(BridgeConfig::default());
        bridge.store().open(Some("pending")).await.unwrap();
        let app = GatewayServer::build(bridge);

        let post = |uri: &str, body: &str| {
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        // Not yet attached, so not ACTIVE.
        let resp = app
            .clone()
            .oneshot(post("/api/session/pending/feedback", r#"{"text":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .oneshot(post("/api/session/ghost/feedback", r#"{"text":"hi"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
