use super::state::AppState;
use crate::error::VoiceError;
use crate::session::{
    ProfileContext, SessionSnapshot, SessionStats, SessionStatus, TranscriptSegment, VoiceSession,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// User context sent with `session.init`
    #[serde(default)]
    pub profile: ProfileContext,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendTextResponse {
    pub session_id: String,
    /// False when the session was not connected and nothing was sent
    pub sent: bool,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    pub stats: SessionStats,
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
        format!("Session {} not found", session_id),
    )
}

async fn find_session(state: &AppState, session_id: &str) -> Option<VoiceSession> {
    state.sessions.read().await.get(session_id).cloned()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a session and start connecting it
pub async fn connect_session(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    let session_id = req
        .session_id
        .unwrap_or_else(|| format!("voice-{}", uuid::Uuid::new_v4()));

    info!("Connecting voice session: {}", session_id);

    // Hold the write lock so two requests cannot claim the same id
    let mut sessions = state.sessions.write().await;
    if sessions.contains_key(&session_id) {
        return error_response(
            StatusCode::CONFLICT,
            format!("Session {} already exists", session_id),
        );
    }

    let session = match state.factory.create(session_id.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create session: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create session: {}", e),
            );
        }
    };

    if let Err(e) = session.connect(req.profile).await {
        error!("Failed to connect session {}: {}", session_id, e);
        let status = match e {
            VoiceError::SessionActive { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return error_response(status, format!("Failed to connect: {}", e));
    }

    let status = session.status();
    sessions.insert(session_id.clone(), session.clone());
    state.track(session);

    (
        StatusCode::OK,
        Json(ConnectResponse {
            session_id: session_id.clone(),
            status,
            message: format!("Session {} is {}", session_id, status),
        }),
    )
        .into_response()
}

/// POST /sessions/:session_id/text
/// Send a user text turn
pub async fn send_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> impl IntoResponse {
    let Some(session) = find_session(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match session.send_text(req.text).await {
        Ok(sent) => (StatusCode::OK, Json(SendTextResponse { session_id, sent })).into_response(),
        Err(e) => {
            error!("Failed to send text: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to send text: {}", e),
            )
        }
    }
}

/// POST /sessions/:session_id/disconnect
/// Disconnect a session and forget it
pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    info!("Disconnecting voice session: {}", session_id);

    // Find and remove session
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    let Some(session) = session else {
        error!("Session {} not found", session_id);
        return not_found(&session_id);
    };

    let result = async {
        session.disconnect().await?;
        session.stats().await
    }
    .await;

    match result {
        Ok(stats) => {
            info!("Session {} disconnected", session_id);
            (
                StatusCode::OK,
                Json(DisconnectResponse {
                    session_id,
                    status: stats.status,
                    message: "Session disconnected".to_string(),
                    stats,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to disconnect: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to disconnect: {}", e),
            )
        }
    }
}

/// GET /sessions/:session_id/status
/// Get status of a voice session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(session) = find_session(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match session.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(StatusResponse {
                snapshot: session.snapshot(),
                stats,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get stats: {}", e),
            )
        }
    }
}

/// GET /sessions/:session_id/transcript
/// Final assistant utterances received so far
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(session) = find_session(&state, &session_id).await else {
        return not_found(&session_id);
    };

    match session.transcript().await {
        Ok(transcript) => (StatusCode::OK, Json::<Vec<TranscriptSegment>>(transcript)).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to get transcript: {}", e),
        ),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
