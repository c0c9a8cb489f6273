use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::session::{
    BackendError, CoordinatorConfig, RewardsService, SessionBackend, SessionError,
    SessionRegistry, TokenConfig,
};

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn SessionBackend>,
    pub rewards: Arc<dyn RewardsService>,
    pub registry: SessionRegistry,
    pub tokens: TokenConfig,
    pub coordinator_config: CoordinatorConfig,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        rewards: Arc<dyn RewardsService>,
        tokens: TokenConfig,
        coordinator_config: CoordinatorConfig,
    ) -> Self {
        Self {
            backend,
            rewards,
            registry: SessionRegistry::new(),
            tokens,
            coordinator_config,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    BadGateway(String),

    #[error("Internal server error")]
    Internal,
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::CreatorRequired
            | SessionError::MissingUserId(_)
            | SessionError::InvalidScore(_) => AppError::BadRequest(message),
            SessionError::PlayerNotFound(_)
            | SessionError::SessionNotFound(_)
            | SessionError::GameNotFound(_) => AppError::NotFound(message),
            SessionError::NotCreator(_) => AppError::Forbidden(message),
            SessionError::InvalidState { .. }
            | SessionError::InvitationsUnresolved
            | SessionError::ConfirmationRequired
            | SessionError::AlreadyAnswered(_) => AppError::Conflict(message),
            SessionError::Backend(BackendError::Conflict(_)) => AppError::Conflict(message),
            SessionError::Backend(BackendError::NotFound(_)) => AppError::NotFound(message),
            SessionError::Backend(_) => AppError::BadGateway(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::JwtError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadGateway(msg) => {
                warn!(error = %msg, "Backend failure surfaced to client");
                (StatusCode::BAD_GATEWAY, msg)
            }
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
