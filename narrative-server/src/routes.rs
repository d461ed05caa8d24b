//! HTTP route handlers for the narrative API.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use narrative_core::{NarrativeState, SessionError, SessionId, TurnOutcome, TurnRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/new_session", post(new_session))
        .route("/chat", post(chat))
        .route("/state/{session_id}", get(get_state))
        .route("/debug/{session_id}", get(get_debug))
}

/// A request failure, rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnknownSession(_) => ApiError::BadRequest("invalid session".to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct NewSessionResponse {
    pub session_id: SessionId,
    pub state: NarrativeState,
}

/// POST /api/new_session - start a session at turn 0.
async fn new_session(State(state): State<AppState>) -> Json<NewSessionResponse> {
    let (session_id, snapshot) = state.registry.create().await;
    Json(NewSessionResponse {
        session_id,
        state: snapshot,
    })
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// POST /api/chat - run one turn.
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<TurnOutcome>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection, "rejected chat body");
        ApiError::BadRequest(rejection.body_text())
    })?;
    let Some(raw_id) = request.session_id else {
        return Err(ApiError::BadRequest("invalid session".to_string()));
    };
    let session_id: SessionId = raw_id.parse().map_err(|_| {
        warn!(session_id = %raw_id, "malformed session id");
        ApiError::BadRequest("invalid session".to_string())
    })?;

    let outcome = state
        .registry
        .submit_turn(&session_id, &request.message)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/state/{session_id} - current state snapshot.
async fn get_state(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<NarrativeState>, ApiError> {
    let session_id: SessionId = session_id.parse().map_err(|_| ApiError::NotFound)?;
    state
        .registry
        .snapshot(&session_id)
        .await
        .map(Json)
        .map_err(|_| ApiError::NotFound)
}

/// GET /api/debug/{session_id} - per-turn stage payloads.
async fn get_debug(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<TurnRecord>>, ApiError> {
    let session_id: SessionId = session_id.parse().map_err(|_| ApiError::NotFound)?;
    state
        .registry
        .debug_history(&session_id)
        .await
        .map(Json)
        .map_err(|_| ApiError::NotFound)
}
