//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ContinueSessionPayload, EndSessionResponse, ErrorResponse, HealthResponse,
        RevisionResponse, SessionInfo, StartSessionPayload, TopicsResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::start_session,
        handlers::continue_session,
        handlers::get_session_info,
        handlers::end_session,
        handlers::get_topics,
        handlers::health_check,
    ),
    components(
        schemas(
            StartSessionPayload,
            ContinueSessionPayload,
            RevisionResponse,
            SessionInfo,
            EndSessionResponse,
            TopicsResponse,
            HealthResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Revise API", description = "Adaptive revision tutoring sessions")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/revision/start", post(handlers::start_session))
        .route("/revision/continue", post(handlers::continue_session))
        .route("/revision/session/{id}", get(handlers::get_session_info))
        .route("/revision/end/{id}", post(handlers::end_session))
        .route("/topics", get(handlers::get_topics))
        .route("/health", get(handlers::health_check))
        .route("/ws/revision/{session_id}", get(ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
