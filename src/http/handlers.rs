use super::state::AppState;
use crate::audio::AudioSource;
use crate::session::{VoiceSession, VoiceSessionHandle};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Optional session ID (if not provided, generate one)
    pub session_id: Option<String>,

    /// Audio file used as the capture device instead of a microphone
    pub input: Option<PathBuf>,

    /// Pace file input in real time (default: true)
    pub realtime: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Voice session {} not found", session_id),
    )
}

fn accepted(session_id: String, status: &str, message: String) -> Response {
    (
        StatusCode::OK,
        Json(SessionResponse {
            session_id,
            status: status.to_string(),
            message,
        }),
    )
        .into_response()
}

async fn lookup(state: &AppState, session_id: &str) -> Option<VoiceSessionHandle> {
    state.sessions.read().await.get(session_id).cloned()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/sessions
/// Create a voice session and connect it; voice mode starts once connected
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let session_config = state.config.session_config(req.session_id);
    let session_id = session_config.session_id.clone();

    if session_config.api_key.is_none() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "API key is required for voice chat".to_string(),
        );
    }

    // Held until the new handle is stored
    let mut sessions = state.sessions.write().await;
    let slot = match sessions.entry(session_id.clone()) {
        Entry::Occupied(_) => {
            return error_response(
                StatusCode::CONFLICT,
                format!("Voice session {} already exists", session_id),
            );
        }
        Entry::Vacant(slot) => slot,
    };

    let source = match req.input {
        Some(path) => AudioSource::File {
            path,
            realtime: req.realtime.unwrap_or(true),
        },
        None => AudioSource::Microphone,
    };

    info!("Creating voice session: {}", session_id);

    let handle = match VoiceSession::spawn(session_config, state.config.runtime_options(source)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to create voice session: {:#}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create voice session: {:#}", e),
            );
        }
    };

    if let Err(e) = handle.connect(None) {
        error!("Failed to connect voice session: {:#}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e));
    }

    slot.insert(handle);

    accepted(
        session_id.clone(),
        "connecting",
        format!("Voice session {} connecting", session_id),
    )
}

/// POST /voice/sessions/:session_id/connect
/// Reopen the socket after it was lost or disconnected
pub async fn connect_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match handle.connect(None) {
        Ok(()) => accepted(
            session_id.clone(),
            "connecting",
            format!("Voice session {} connecting", session_id),
        ),
        Err(e) => error_response(StatusCode::GONE, format!("{:#}", e)),
    }
}

/// POST /voice/sessions/:session_id/start
pub async fn start_voice(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match handle.start_voice() {
        Ok(()) => accepted(session_id, "voice_starting", "Voice mode requested".to_string()),
        Err(e) => error_response(StatusCode::GONE, format!("{:#}", e)),
    }
}

/// POST /voice/sessions/:session_id/stop
/// Stop voice mode; the socket stays open
pub async fn stop_voice(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match handle.stop_voice() {
        Ok(()) => accepted(session_id, "voice_stopped", "Voice mode stopped".to_string()),
        Err(e) => error_response(StatusCode::GONE, format!("{:#}", e)),
    }
}

/// DELETE /voice/sessions/:session_id
/// Disconnect and dispose of a session
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let handle = state.sessions.write().await.remove(&session_id);
    let Some(handle) = handle else {
        return not_found(&session_id);
    };

    let stats = handle.snapshot().await.ok().map(|s| s.stats);
    if let Err(e) = handle.shutdown().await {
        error!("Failed to shut down voice session {}: {:#}", session_id, e);
    }
    info!("Voice session {} disposed", session_id);

    match stats {
        Some(stats) => (StatusCode::OK, Json(stats)).into_response(),
        None => accepted(session_id, "disposed", "Voice session disposed".to_string()),
    }
}

/// GET /voice/sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match handle.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.stats)).into_response(),
        Err(e) => {
            error!("Failed to get stats: {:#}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get stats: {:#}", e),
            )
        }
    }
}

/// GET /voice/sessions/:session_id/messages
/// Conversation so far, placeholder included
pub async fn get_session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(handle) = lookup(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match handle.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.messages)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
