// Error handling module
// Defines API error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::consent::ConsentError;

/// Errors surfaced by the HTTP entry points
#[derive(Error, Debug)]
pub enum ApiError {
    /// Token lifecycle failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Consent leg failure (only observed when waiting for completion)
    #[error(transparent)]
    Consent(#[from] ConsentError),

    /// Missing or wrong proxy API key
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Auth(err) => {
                let status = match err {
                    AuthError::TokenExchange(_) | AuthError::Http(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind())
            }
            ApiError::Consent(err) => {
                let status = match err {
                    ConsentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, err.kind())
            }
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "auth_error"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let message = match &self {
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                "Internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::error!(error_type, "{}", other);
                }
                other.to_string()
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}
