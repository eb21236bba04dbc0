// Authentication types

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Client credentials as downloaded from the provider console
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,

    // Informational only
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub auth_provider_x509_cert_url: Option<String>,
}

/// On-disk shape of the credentials file.
/// Desktop clients are stored under `installed`, web clients under `web`.
#[derive(Debug, Deserialize)]
pub struct CredentialsFile {
    pub installed: Option<ClientCredentials>,
    pub web: Option<ClientCredentials>,
}

/// Persisted token record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    pub token_type: String,

    /// Scopes that were configured when this token was granted
    #[serde(rename = "scopes", default)]
    pub granted_scopes: Vec<String>,

    /// Fields the authorization server returned that we do not interpret (id_token, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TokenRecord {
    /// Scope sets are compared without regard to order or duplicates.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        scope_set(&self.granted_scopes) == scope_set(required)
    }
}

pub fn scope_set(scopes: &[String]) -> BTreeSet<&str> {
    scopes.iter().map(String::as_str).collect()
}

/// Token endpoint response.
/// Every field but `access_token` may be missing on a refresh grant.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of a refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// New record, already overlaid onto the previous one
    Refreshed(TokenRecord),
    /// The server rejected the refresh token; a fresh consent is required
    NeedsReauth(super::RefreshTokenError),
    /// Anything else (transport, unparsable response)
    Failed(super::AuthError),
}

/// Result of `AuthFlowController::authenticate`.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated(TokenRecord),
    ConsentRequired { authorization_url: String },
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }
}

/// Result of handling a redirect callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// A code was present and exchanged; the record has been persisted
    Exchanged(TokenRecord),
    /// The identity provider reported an error (usually consent declined)
    Denied {
        error: String,
        description: Option<String>,
    },
    /// Not an actionable callback
    NoCode,
}

/// Controller states, used for tracing only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    NoToken,
    TokenStale,
    Refreshing,
    Refreshed,
    ReauthNeeded,
    AwaitingConsent,
}

/// Flow settings shared by both legs.
/// Both legs must resolve the redirect URI from the same values.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSettings {
    pub scopes: Vec<String>,
    pub redirect_base: String,
    pub callback_path: String,
    pub extra_auth_params: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(scopes: &[&str]) -> TokenRecord {
        TokenRecord {
            access_token: "ya29.a0".to_string(),
            refresh_token: "1//0g".to_string(),
            expires_in: 3599,
            scope: scopes.join(" "),
            token_type: "Bearer".to_string(),
            granted_scopes: scopes.iter().map(|s| s.to_string()).collect(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_has_scopes_ignores_order() {
        let token = record(&["b", "a"]);
        assert!(token.has_scopes(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_has_scopes_detects_subset() {
        let token = record(&["a"]);
        assert!(!token.has_scopes(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_token_record_uses_scopes_key() {
        let value = serde_json::to_value(record(&["a"])).unwrap();
        assert_eq!(value["scopes"], json!(["a"]));
        assert!(value.get("granted_scopes").is_none());
    }

    #[test]
    fn test_token_record_keeps_unknown_fields() {
        let raw = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3599,
            "scope": "a",
            "token_type": "Bearer",
            "scopes": ["a"],
            "id_token": "eyJ"
        });
        let parsed: TokenRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.extra.get("id_token"), Some(&json!("eyJ")));
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn test_token_response_without_refresh_token() {
        let parsed: TokenResponse = serde_json::from_value(json!({
            "access_token": "new",
            "expires_in": 3599,
            "token_type": "Bearer"
        }))
        .unwrap();
        assert!(parsed.refresh_token.is_none());
        assert!(parsed.scope.is_none());
        assert!(parsed.extra.is_empty());
    }
}
