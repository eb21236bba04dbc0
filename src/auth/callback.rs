use std::sync::Arc;

use tokio::sync::broadcast;
use url::Url;

use super::credentials::CredentialStore;
use super::error::{mask_token, AuthError};
use super::exchange::TokenExchanger;
use super::redirect::resolve_redirect_uri;
use super::token_store::TokenStore;
use super::types::{AuthSettings, CallbackOutcome, TokenRecord};

/// Second leg of the flow: turns the redirect carrying the authorization code
/// into a persisted token record.
pub struct CallbackExchanger {
    credentials: Arc<CredentialStore>,
    tokens: TokenStore,
    exchanger: TokenExchanger,
    settings: AuthSettings,
    completed: broadcast::Sender<TokenRecord>,
}

impl CallbackExchanger {
    pub fn new(
        credentials: Arc<CredentialStore>,
        tokens: TokenStore,
        exchanger: TokenExchanger,
        settings: AuthSettings,
    ) -> Self {
        let (completed, _) = broadcast::channel(4);
        Self {
            credentials,
            tokens,
            exchanger,
            settings,
            completed,
        }
    }

    /// Notified with every record this exchanger persists
    pub fn subscribe(&self) -> broadcast::Receiver<TokenRecord> {
        self.completed.subscribe()
    }

    /// Handle the full redirect URL (query string included).
    ///
    /// Without a `code` parameter nothing is written. An `error` parameter from
    /// the identity provider is reported as a denial rather than ignored.
    pub async fn handle_callback(&self, url: &Url) -> Result<CallbackOutcome, AuthError> {
        let mut code = None;
        let mut error = None;
        let mut description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        let Some(code) = code else {
            if let Some(error) = error {
                tracing::warn!(
                    error = %error,
                    description = description.as_deref().unwrap_or_default(),
                    "Identity provider reported an error on callback"
                );
                return Ok(CallbackOutcome::Denied { error, description });
            }
            tracing::debug!(path = url.path(), "Callback without code, ignoring");
            return Ok(CallbackOutcome::NoCode);
        };

        tracing::info!(code = %mask_token(&code), "Received authorization code");

        let credentials = self.credentials.load().await?;
        let redirect_uri = resolve_redirect_uri(
            &credentials,
            &self.settings.redirect_base,
            &self.settings.callback_path,
        )?;

        let record = self
            .exchanger
            .exchange_authorization_code(&credentials, &code, &redirect_uri, &self.settings.scopes)
            .await?;

        self.tokens.save(&record).await?;

        // No subscribers is the normal case
        let _ = self.completed.send(record.clone());

        Ok(CallbackOutcome::Exchanged(record))
    }
}
