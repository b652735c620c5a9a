//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for revision
//! sessions. It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use revise_core::session::SessionPatch;
use revise_core::store::SessionStore;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    models::{
        ContinueSessionPayload, EndSessionResponse, ErrorResponse, HealthResponse,
        RevisionResponse, SessionInfo, StartSessionPayload, TopicsResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Start a new revision session (or resume an existing one).
#[utoipa::path(
    post,
    path = "/revision/start",
    request_body = StartSessionPayload,
    responses(
        (status = 200, description = "First turn of the session", body = RevisionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".to_string()));
    }
    let session_id = payload
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let lock = state.locks.lock_for(&session_id);
    let _guard = lock.lock().await;

    let turn = state
        .machine
        .start(&payload.topic, &payload.student_id, &session_id)
        .await?;
    info!(%session_id, topic = %payload.topic, "revision session started");

    Ok(Json(RevisionResponse::new(
        turn,
        session_id,
        Some(payload.topic),
    )))
}

/// Continue an existing revision session with user input.
#[utoipa::path(
    post,
    path = "/revision/continue",
    request_body = ContinueSessionPayload,
    responses(
        (status = 200, description = "Next turn of the session", body = RevisionResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn continue_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ContinueSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let lock = state.locks.lock_for(&payload.session_id);
    let _guard = lock.lock().await;

    let turn = state
        .machine
        .handle(&payload.session_id, &payload.query)
        .await?;

    Ok(Json(RevisionResponse::new(turn, payload.session_id, None)))
}

/// Get the metadata view of a stored session.
#[utoipa::path(
    get,
    path = "/revision/session/{id}",
    responses(
        (status = 200, description = "Session metadata", body = SessionInfo),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Session ID")
    )
)]
pub async fn get_session_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .db
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;
    Ok(Json(SessionInfo::from(&session)))
}

/// Manually end a revision session.
#[utoipa::path(
    post,
    path = "/revision/end/{id}",
    responses(
        (status = 200, description = "Session ended", body = EndSessionResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Session ID")
    )
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lock = state.locks.lock_for(&id);
    let _guard = lock.lock().await;

    let mut session = state
        .db
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;

    if session.is_complete {
        return Ok(Json(EndSessionResponse {
            message: "Session already completed".to_string(),
            session_id: id,
        }));
    }

    session.apply(SessionPatch {
        is_complete: Some(true),
        expecting_answer: Some(false),
        expecting_button_action: Some(false),
        current_stage: Some("conclusion".to_string()),
        ..Default::default()
    });
    state.db.save(&session).await?;
    info!(session_id = %id, "session ended manually");

    Ok(Json(EndSessionResponse {
        message: "Session ended successfully".to_string(),
        session_id: id,
    }))
}

/// Get all topics available for revision.
#[utoipa::path(
    get,
    path = "/topics",
    responses(
        (status = 200, description = "Available topics", body = TopicsResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_topics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let topics = state.db.list_topics().await?;
    Ok(Json(TopicsResponse { topics }))
}

/// Health check endpoint to verify the API is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}
