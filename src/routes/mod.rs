use anyhow::Context;
use axum::{
    extract::{OriginalUri, Query, State},
    middleware::{self as axum_middleware},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use url::Url;

use crate::auth::{
    AuthFlowController, AuthOutcome, CallbackExchanger, CallbackOutcome, ConsentTask,
    CredentialStore, Initiation, TokenExchanger, TokenRecord, TokenStore,
};
use crate::config::Config;
use crate::consent::{ConsentDriver, ConsentError};
use crate::error::ApiError;
use crate::middleware;

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Base the callback request target is resolved against
const CALLBACK_URL_BASE: &str = "http://localhost";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth_flow: Arc<AuthFlowController>,
    pub callback: Arc<CallbackExchanger>,
    pub consent: Arc<dyn ConsentDriver>,
}

impl AppState {
    /// Wire both legs to one credential store, one token file and one HTTP client
    pub fn new(config: Config, consent: Arc<dyn ConsentDriver>) -> anyhow::Result<Self> {
        let credentials = Arc::new(CredentialStore::new(config.credentials_file.clone()));
        let tokens = TokenStore::new(config.token_file.clone());
        let exchanger = TokenExchanger::new(config.http_connect_timeout, config.http_request_timeout)?;
        let settings = config.auth_settings();

        let auth_flow = AuthFlowController::new(
            credentials.clone(),
            tokens.clone(),
            exchanger.clone(),
            settings.clone(),
        );
        let callback = CallbackExchanger::new(credentials, tokens, exchanger, settings);

        Ok(Self {
            config: Arc::new(config),
            auth_flow: Arc::new(auth_flow),
            callback: Arc::new(callback),
            consent,
        })
    }
}

/// Health check routes (no authentication required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Initiate (API key protected) and callback (open, hit by the browser) routes
pub fn auth_routes(state: AppState) -> Router {
    let initiate = Router::new()
        .route(
            "/auth/initiate",
            get(initiate_handler).post(initiate_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let callback = Router::new().route(&state.config.callback_path, get(callback_handler));

    initiate.merge(callback).with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "OAuth Gateway is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct InitiateParams {
    /// Block until the callback leg completes (bounded by the consent timeout)
    #[serde(default)]
    pub wait: bool,
}

/// GET|POST /auth/initiate - Refresh the stored token or start a consent
///
/// Returns the refreshed token, or the authorization URL that was handed to the
/// consent driver.
async fn initiate_handler(
    State(state): State<AppState>,
    Query(params): Query<InitiateParams>,
) -> Result<Json<Value>, ApiError> {
    tracing::info!("Request to /auth/initiate: wait={}", params.wait);

    // Subscribe before starting, the callback may be quick
    let completed = params.wait.then(|| state.callback.subscribe());

    let Initiation { outcome, consent } = state.auth_flow.initiate(state.consent.clone()).await?;

    let authorization_url = match outcome {
        AuthOutcome::Authenticated(record) => return Ok(Json(authenticated_body(&record))),
        AuthOutcome::ConsentRequired { authorization_url } => authorization_url,
    };

    if let Some(receiver) = completed {
        let timeout_secs = state.config.consent_timeout;
        return match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            wait_for_consent(receiver, consent),
        )
        .await
        {
            Ok(Ok(record)) => Ok(Json(authenticated_body(&record))),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(timeout_secs, "Gave up waiting for the consent callback");
                Err(ConsentError::Timeout(timeout_secs).into())
            }
        };
    }

    Ok(Json(json!({
        "is_authenticated": false,
        "authorization_url": authorization_url,
    })))
}

/// Resolve with the record persisted by the callback leg, or fail as soon as
/// the consent driver reports an error
async fn wait_for_consent(
    receiver: broadcast::Receiver<TokenRecord>,
    consent: Option<ConsentTask>,
) -> Result<TokenRecord, ApiError> {
    let completion = next_completion(receiver);
    tokio::pin!(completion);

    if let Some(mut driver) = consent {
        tokio::select! {
            record = &mut completion => return record.ok_or_else(notifications_closed),
            joined = &mut driver => match joined {
                // Driver done, the redirect may still be in flight
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(ApiError::Internal(anyhow::anyhow!(
                        "consent driver task failed: {e}"
                    )))
                }
            },
        }
    }

    completion.await.ok_or_else(notifications_closed)
}

fn notifications_closed() -> ApiError {
    ApiError::Internal(anyhow::anyhow!(
        "callback notifications closed while waiting for consent"
    ))
}

async fn next_completion(mut receiver: broadcast::Receiver<TokenRecord>) -> Option<TokenRecord> {
    loop {
        match receiver.recv().await {
            Ok(record) => return Some(record),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

fn authenticated_body(record: &TokenRecord) -> Value {
    json!({
        "is_authenticated": true,
        "access_token": record.access_token,
        "token_type": record.token_type,
        "expires_in": record.expires_in,
        "scopes": record.granted_scopes,
    })
}

/// GET <callback path> - Redirect target of the consent leg
///
/// Answers 200 whether or not a code was present; only a failed exchange or
/// persistence is an error.
async fn callback_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Json<Value>, ApiError> {
    tracing::info!("Request to {}", uri.path());

    // Only the query matters; the host part is never looked at
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = Url::parse(CALLBACK_URL_BASE)
        .and_then(|base| base.join(path_and_query))
        .with_context(|| format!("cannot parse callback request {}", path_and_query))?;

    let body = match state.callback.handle_callback(&url).await? {
        CallbackOutcome::Exchanged(record) => json!({
            "status": "exchanged",
            "scopes": record.granted_scopes,
        }),
        CallbackOutcome::Denied { error, description } => json!({
            "status": "denied",
            "error": error,
            "error_description": description,
        }),
        CallbackOutcome::NoCode => json!({ "status": "ignored" }),
    };

    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let json = root_handler().await;
        let value = json.0;

        assert_eq!(value["status"], "ok");
        assert_eq!(value["message"], "OAuth Gateway is running");
        assert_eq!(value["version"], VERSION);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let json = health_handler().await;
        let value = json.0;

        assert_eq!(value["status"], "healthy");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["version"], VERSION);
    }

    #[test]
    fn test_authenticated_body_omits_refresh_token() {
        let record = TokenRecord {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_in: 3599,
            scope: "a".to_string(),
            token_type: "Bearer".to_string(),
            granted_scopes: vec!["a".to_string()],
            extra: Default::default(),
        };
        let body = authenticated_body(&record);

        assert_eq!(body["is_authenticated"], true);
        assert_eq!(body["access_token"], "at");
        assert!(body.get("refresh_token").is_none());
    }

    fn record(access_token: &str) -> TokenRecord {
        TokenRecord {
            access_token: access_token.to_string(),
            refresh_token: "rt".to_string(),
            expires_in: 3599,
            scope: "a".to_string(),
            token_type: "Bearer".to_string(),
            granted_scopes: vec!["a".to_string()],
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_wait_for_consent_surfaces_driver_failure() {
        let (_tx, rx) = broadcast::channel::<TokenRecord>(1);
        let driver: ConsentTask =
            tokio::spawn(async { Err(ConsentError::Failed("browser crashed".to_string())) });

        let err = wait_for_consent(rx, Some(driver)).await.unwrap_err();
        assert!(matches!(err, ApiError::Consent(ConsentError::Failed(_))));
    }

    #[tokio::test]
    async fn test_wait_for_consent_outlives_finished_driver() {
        let (tx, rx) = broadcast::channel::<TokenRecord>(1);
        let driver: ConsentTask = tokio::spawn(async { Ok(()) });

        let waiting = tokio::spawn(wait_for_consent(rx, Some(driver)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(record("late")).unwrap();

        let received = waiting.await.unwrap().unwrap();
        assert_eq!(received.access_token, "late");
    }

    #[tokio::test]
    async fn test_next_completion_returns_none_when_closed() {
        let (tx, rx) = broadcast::channel::<TokenRecord>(1);
        drop(tx);
        assert!(next_completion(rx).await.is_none());
    }
}
