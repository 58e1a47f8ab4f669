use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::{AuthError, IdentityVerifier};
use crate::broadcast::RoomBroadcaster;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<RoomBroadcaster>,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(broadcaster: Arc<RoomBroadcaster>, identity: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            broadcaster,
            identity,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error")]
    Internal,
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        AppError::Unauthorized(error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
