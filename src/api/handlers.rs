//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{ChatRequest, ChatResponse, ErrorResponse, ResponderInfo, RespondersResponse};
use super::AppState;
use crate::orchestrator::{ErrorKind, TurnFailure, TurnRequest};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // One-shot turns
        .route("/api/chat", post(chat))
        // Streamed turns
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/responders", get(list_responders))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Turns
// ============================================================

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let request = turn_request(req)?;
    let reply = state.orchestrator.run_turn(request).await?;
    Ok(Json(ChatResponse {
        response: reply.text,
        session_id: reply.session_id,
        error: None,
    }))
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = turn_request(req)?;
    Ok(sse_stream(state.orchestrator.run_turn_stream(request)))
}

fn turn_request(req: ChatRequest) -> Result<TurnRequest, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("Message must not be empty".to_string()));
    }
    let request = TurnRequest::new(req.message);
    Ok(match req.session_id {
        Some(id) => request.on_session(id),
        None => request,
    })
}

// ============================================================
// Responders
// ============================================================

async fn list_responders(State(state): State<AppState>) -> Json<RespondersResponse> {
    let responders = state
        .orchestrator
        .responders()
        .descriptors()
        .map(|d| ResponderInfo {
            name: d.name.clone(),
            description: d.description.clone(),
        })
        .collect();
    Json(RespondersResponse { responders })
}

async fn get_version() -> &'static str {
    concat!("triage-orchestrator ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    Turn(TurnFailure),
}

impl From<TurnFailure> for AppError {
    fn from(failure: TurnFailure) -> Self {
        AppError::Turn(failure)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::StreamingUnsupported => StatusCode::BAD_REQUEST,
        ErrorKind::RoutingFailure | ErrorKind::ResponderFailure | ErrorKind::MidStreamFailure => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::PersistFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
            }
            AppError::Turn(failure) => {
                let kind = failure.kind();
                let body = ChatResponse {
                    response: kind.user_message().to_string(),
                    session_id: failure.session_id,
                    error: Some(kind),
                };
                (status_for(kind), Json(body)).into_response()
            }
        }
    }
}
