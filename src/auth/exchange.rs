// Token endpoint calls: authorization-code grant and refresh grant

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;

use super::error::{mask_token, AuthError, RefreshTokenError};
use super::types::{ClientCredentials, RefreshOutcome, TokenRecord, TokenResponse};

/// Performs the two token-endpoint requests.
///
/// Neither request is retried: authorization codes are single-use, and a
/// rejected refresh token has to go through consent again anyway.
#[derive(Clone)]
pub struct TokenExchanger {
    client: Client,
}

impl TokenExchanger {
    /// Create an exchanger whose requests are bounded by the given timeouts (seconds)
    pub fn new(connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Exchange an authorization code for a fresh token record
    pub async fn exchange_authorization_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<TokenRecord, AuthError> {
        tracing::info!(
            token_uri = %credentials.token_uri,
            redirect_uri = %redirect_uri,
            "Exchanging authorization code"
        );

        let form = [
            ("code", code),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(&credentials.token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %error_text,
                "Authorization code exchange rejected"
            );
            return Err(AuthError::TokenExchange(format!("{status} - {error_text}")));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchange(format!("unparsable token response: {e}")))?;

        let record = record_from_code_response(data, scopes)?;

        tracing::info!(
            access_token = %mask_token(&record.access_token),
            expires_in = record.expires_in,
            "Authorization code exchanged"
        );

        Ok(record)
    }

    /// Use the refresh token of `previous` to obtain a new access token
    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        previous: &TokenRecord,
        scopes: &[String],
    ) -> RefreshOutcome {
        let masked = mask_token(&previous.refresh_token);
        tracing::info!(
            token_uri = %credentials.token_uri,
            refresh_token = %masked,
            "Refreshing access token"
        );

        let form = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", previous.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = match self
            .client
            .post(&credentials.token_uri)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return RefreshOutcome::Failed(AuthError::Http(e)),
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();

            // Google reports e.g. {"error": "invalid_grant", "error_description": "..."}
            if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
                if let Some(error_code) = error_json.get("error").and_then(|v| v.as_str()) {
                    tracing::warn!(
                        error = error_code,
                        description = error_json
                            .get("error_description")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default(),
                        "Refresh token rejected"
                    );
                }
            }

            return RefreshOutcome::NeedsReauth(RefreshTokenError {
                refresh_token: masked,
                status: status.as_u16(),
                body: error_text,
            });
        }

        match response.json::<TokenResponse>().await {
            Ok(data) => {
                let record = overlay_refresh(previous, data, scopes);
                tracing::info!(
                    access_token = %mask_token(&record.access_token),
                    expires_in = record.expires_in,
                    "Access token refreshed"
                );
                RefreshOutcome::Refreshed(record)
            }
            Err(e) => RefreshOutcome::Failed(AuthError::Http(e)),
        }
    }
}

/// Build a record from an authorization-code response.
/// A record without a refresh token would be useless once the access token expires.
pub fn record_from_code_response(
    data: TokenResponse,
    scopes: &[String],
) -> Result<TokenRecord, AuthError> {
    let refresh_token = data
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AuthError::TokenExchange("token response did not include a refresh_token".to_string())
        })?;

    Ok(TokenRecord {
        access_token: data.access_token,
        refresh_token,
        expires_in: data.expires_in.unwrap_or_default(),
        scope: data.scope.unwrap_or_default(),
        token_type: data.token_type.unwrap_or_else(|| "Bearer".to_string()),
        granted_scopes: scopes.to_vec(),
        extra: data.extra,
    })
}

/// Lay a refresh response over the previous record.
/// Whatever the response leaves out, the refresh token in particular, is carried over.
pub fn overlay_refresh(previous: &TokenRecord, data: TokenResponse, scopes: &[String]) -> TokenRecord {
    let mut extra = previous.extra.clone();
    extra.extend(data.extra);

    TokenRecord {
        access_token: data.access_token,
        refresh_token: data
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| previous.refresh_token.clone()),
        expires_in: data.expires_in.unwrap_or(previous.expires_in),
        scope: data.scope.unwrap_or_else(|| previous.scope.clone()),
        token_type: data.token_type.unwrap_or_else(|| previous.token_type.clone()),
        granted_scopes: scopes.to_vec(),
        extra,
    }
}
