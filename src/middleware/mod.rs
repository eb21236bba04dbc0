// Authentication, CORS and request tracing middleware

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::routes::AppState;

/// Authentication middleware
///
/// Verifies the API key in the Authorization header or x-api-key header.
/// Expects format: "Bearer {PROXY_API_KEY}" or just the key in x-api-key.
/// Requests pass through untouched when no key is configured.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected_key) = state.config.proxy_api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    if let Some(auth_header) = request.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if auth_str.strip_prefix("Bearer ") == Some(expected_key) {
                return Ok(next.run(request).await);
            }
        }
    }

    if let Some(api_key_header) = request.headers().get("x-api-key") {
        if let Ok(key_str) = api_key_header.to_str() {
            if key_str == expected_key {
                return Ok(next.run(request).await);
            }
        }
    }

    let path = request.uri().path();
    let method = request.method();
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    tracing::warn!(
        "[{}] Access attempt with invalid or missing API key: {} {}",
        request_id,
        method,
        path
    );
    Err(ApiError::Unauthorized(
        "Invalid or missing API Key".to_string(),
    ))
}

/// Create CORS middleware layer
///
/// Configures CORS to allow all origins, methods, and headers.
/// Handles OPTIONS preflight requests automatically.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Request/response tracing at debug level
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}
