use std::sync::Arc;

use super::credentials::CredentialStore;
use super::error::AuthError;
use super::exchange::TokenExchanger;
use super::redirect::{build_authorization_url, resolve_redirect_uri};
use super::token_store::TokenStore;
use super::types::{AuthOutcome, AuthSettings, ClientCredentials, FlowState, RefreshOutcome};
use crate::consent::{ConsentDriver, ConsentError};
use tokio::task::JoinHandle;

/// Background consent driver run; dropping the handle detaches it
pub type ConsentTask = JoinHandle<Result<(), ConsentError>>;

/// What `initiate` started
#[derive(Debug)]
pub struct Initiation {
    pub outcome: AuthOutcome,
    /// Present when consent was required
    pub consent: Option<ConsentTask>,
}

/// Authentication flow controller
/// Decides between refreshing the stored token and asking for a fresh consent
pub struct AuthFlowController {
    /// Shared with the callback leg so credentials are read once per process
    credentials: Arc<CredentialStore>,

    /// Token file (never cached in memory)
    tokens: TokenStore,

    /// HTTP client for the token endpoint
    exchanger: TokenExchanger,

    /// Scopes and redirect settings
    settings: AuthSettings,
}

impl AuthFlowController {
    pub fn new(
        credentials: Arc<CredentialStore>,
        tokens: TokenStore,
        exchanger: TokenExchanger,
        settings: AuthSettings,
    ) -> Self {
        Self {
            credentials,
            tokens,
            exchanger,
            settings,
        }
    }

    /// Refresh the stored token, or produce the authorization URL for a new consent.
    ///
    /// Scope changes always force a new consent. A refresh token the server
    /// rejects does the same; every other failure is returned to the caller.
    pub async fn authenticate(&self) -> Result<AuthOutcome, AuthError> {
        let (credentials, token_file_exists) =
            tokio::try_join!(self.credentials.load(), self.tokens.exists())?;

        if !token_file_exists {
            trace_state(FlowState::NoToken);
            return self.consent_required(&credentials);
        }

        let previous = match self.tokens.load().await {
            Ok(record) => record,
            Err(AuthError::CorruptTokenFile { reason, .. }) => {
                tracing::warn!(
                    path = %self.tokens.path().display(),
                    error = %reason,
                    "Token file is unusable, treating it as absent"
                );
                trace_state(FlowState::NoToken);
                return self.consent_required(&credentials);
            }
            Err(e) => return Err(e),
        };

        if !previous.has_scopes(&self.settings.scopes) {
            tracing::info!(
                granted = ?previous.granted_scopes,
                required = ?self.settings.scopes,
                "Stored token was granted for different scopes, re-authenticating"
            );
            trace_state(FlowState::TokenStale);
            return self.consent_required(&credentials);
        }

        trace_state(FlowState::Refreshing);
        match self
            .exchanger
            .refresh(&credentials, &previous, &self.settings.scopes)
            .await
        {
            RefreshOutcome::Refreshed(record) => {
                self.tokens.save(&record).await?;
                trace_state(FlowState::Refreshed);
                Ok(AuthOutcome::Authenticated(record))
            }
            RefreshOutcome::NeedsReauth(err) => {
                tracing::warn!("Token refresh failed, falling back to consent: {}", err);
                trace_state(FlowState::ReauthNeeded);
                self.consent_required(&credentials)
            }
            RefreshOutcome::Failed(err) => {
                tracing::error!("Token refresh failed: {}", err);
                Err(err)
            }
        }
    }

    /// Run `authenticate` and, when consent is needed, hand the URL to the driver.
    ///
    /// The driver runs in the background; completion is observed only through the
    /// callback leg.
    pub async fn initiate(&self, driver: Arc<dyn ConsentDriver>) -> Result<Initiation, AuthError> {
        let outcome = self.authenticate().await?;

        let consent = match &outcome {
            AuthOutcome::ConsentRequired { authorization_url } => {
                let url = authorization_url.clone();
                Some(tokio::spawn(async move {
                    let result = driver.obtain_consent(&url).await;
                    match &result {
                        Ok(()) => tracing::info!("Consent driver finished, waiting for callback"),
                        Err(e) => tracing::error!("Consent driver failed: {}", e),
                    }
                    result
                }))
            }
            AuthOutcome::Authenticated(_) => None,
        };

        Ok(Initiation { outcome, consent })
    }

    fn consent_required(&self, credentials: &ClientCredentials) -> Result<AuthOutcome, AuthError> {
        let redirect_uri = resolve_redirect_uri(
            credentials,
            &self.settings.redirect_base,
            &self.settings.callback_path,
        )?;
        let authorization_url = build_authorization_url(
            credentials,
            &redirect_uri,
            &self.settings.scopes,
            &self.settings.extra_auth_params,
        )?;

        trace_state(FlowState::AwaitingConsent);
        tracing::info!(redirect_uri = %redirect_uri, "Consent required");

        Ok(AuthOutcome::ConsentRequired { authorization_url })
    }
}

fn trace_state(state: FlowState) {
    tracing::debug!(state = ?state, "Auth flow state");
}
