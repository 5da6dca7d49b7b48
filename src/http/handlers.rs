use super::state::AppState;
use crate::attachment::Attachment;
use crate::session::{ConnectionState, SendError, SessionSnapshot};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,

    /// Optional image or PDF, base64-encoded
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: ConnectionState,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

/// POST /session/connect
/// Returns once the connection attempt has started
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    state.session.connect().await;
    let current = state.session.state().await;

    (StatusCode::ACCEPTED, Json(StateResponse { state: current }))
}

/// POST /session/disconnect
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    state.session.disconnect().await;
    let current = state.session.state().await;

    (StatusCode::OK, Json(StateResponse { state: current }))
}

/// POST /session/restart
/// Runs in the background; poll GET /session for progress
pub async fn restart(State(state): State<AppState>) -> impl IntoResponse {
    info!("Restart requested over HTTP");

    let session = state.session.clone();
    let policy = state.reconnect;
    tokio::spawn(async move {
        policy.restart(&session).await;
    });

    StatusCode::ACCEPTED
}

/// PUT /session/mute
pub async fn set_muted(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Json<SessionSnapshot> {
    state.session.set_muted(req.enabled).await;
    Json(state.session.snapshot().await)
}

/// PUT /session/mic
pub async fn set_mic(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Json<SessionSnapshot> {
    state.session.set_mic_enabled(req.enabled).await;
    Json(state.session.snapshot().await)
}

/// POST /messages
/// Send a user turn; connects first if the session is idle
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    if let Some(attachment) = &req.attachment {
        if let Err(e) = attachment.validate() {
            warn!("Rejected attachment: {:#}", e);
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    }

    match state.session.submit(&req.text, req.attachment).await {
        Ok(()) => {
            let current = state.session.state().await;
            (StatusCode::ACCEPTED, Json(StateResponse { state: current })).into_response()
        }
        Err(e @ SendError::Empty) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e @ SendError::NotConnected) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e @ SendError::Transport(_)) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

/// GET /logs
pub async fn get_logs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.logs().await)
}
