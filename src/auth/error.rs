// Authentication error taxonomy

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the token lifecycle.
///
/// Only `CorruptTokenFile` and `RefreshToken` are absorbed by the flow controller
/// (both turn into a fresh consent). Everything else reaches the entry point.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credentials file not found: {}", path.display())]
    CredentialsNotFound { path: PathBuf },

    #[error("credentials file {} is malformed: {reason}", path.display())]
    MalformedCredentials { path: PathBuf, reason: String },

    #[error("credentials file {} could not be read: {source}", path.display())]
    CredentialsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "redirect URI '{attempted}' is not registered for this client; valid redirect URIs are: {}",
        format_allowed(allowed)
    )]
    InvalidRedirectUri {
        attempted: String,
        allowed: Vec<String>,
    },

    #[error("token file {} is corrupt: {reason}", path.display())]
    CorruptTokenFile { path: PathBuf, reason: String },

    #[error(transparent)]
    RefreshToken(#[from] RefreshTokenError),

    #[error("authorization code exchange failed: {0}")]
    TokenExchange(String),

    #[error("failed to persist token file {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::CredentialsNotFound { .. } => "credentials_not_found",
            AuthError::MalformedCredentials { .. } => "malformed_credentials",
            AuthError::CredentialsUnreadable { .. } => "credentials_unreadable",
            AuthError::InvalidRedirectUri { .. } => "invalid_redirect_uri",
            AuthError::CorruptTokenFile { .. } => "corrupt_token_file",
            AuthError::RefreshToken(_) => "refresh_token",
            AuthError::TokenExchange(_) => "token_exchange",
            AuthError::Persistence { .. } => "persistence",
            AuthError::Http(_) => "http",
        }
    }
}

/// The authorization server rejected a refresh grant.
///
/// Carries the (masked) refresh token that was used, never the client secret.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("refresh token '{refresh_token}' was rejected with status {status}: {body}")]
pub struct RefreshTokenError {
    pub refresh_token: String,
    pub status: u16,
    pub body: String,
}

fn format_allowed(allowed: &[String]) -> String {
    if allowed.is_empty() {
        return "(none registered)".to_string();
    }
    allowed
        .iter()
        .map(|uri| format!("'{uri}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shorten a token for logs and error messages.
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(8).collect();
    if visible.len() < token.len() {
        format!("{visible}...")
    } else {
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_redirect_uri_lists_every_alternative() {
        let err = AuthError::InvalidRedirectUri {
            attempted: "http://localhost:4000".to_string(),
            allowed: vec![
                "http://localhost".to_string(),
                "urn:ietf:wg:oauth:2.0:oob".to_string(),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("'http://localhost:4000'"));
        assert!(message.contains("'http://localhost'"));
        assert!(message.contains("'urn:ietf:wg:oauth:2.0:oob'"));
    }

    #[test]
    fn test_invalid_redirect_uri_with_empty_allow_list() {
        let err = AuthError::InvalidRedirectUri {
            attempted: "http://localhost".to_string(),
            allowed: vec![],
        };
        assert!(err.to_string().contains("(none registered)"));
    }

    #[test]
    fn test_refresh_error_kind_and_message() {
        let err = AuthError::from(RefreshTokenError {
            refresh_token: mask_token("1//0gAbCdEfGhIjKl"),
            status: 400,
            body: "invalid_grant".to_string(),
        });
        assert_eq!(err.kind(), "refresh_token");
        assert_eq!(
            err.to_string(),
            "refresh token '1//0gAbC...' was rejected with status 400: invalid_grant"
        );
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "short");
        assert_eq!(mask_token("12345678"), "12345678");
        assert_eq!(mask_token("123456789"), "12345678...");
        assert_eq!(mask_token(""), "");
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let kinds = [
            AuthError::CredentialsNotFound { path: "a".into() }.kind(),
            AuthError::MalformedCredentials {
                path: "a".into(),
                reason: "x".into(),
            }
            .kind(),
            AuthError::CorruptTokenFile {
                path: "a".into(),
                reason: "x".into(),
            }
            .kind(),
            AuthError::TokenExchange("x".into()).kind(),
            AuthError::Persistence {
                path: "a".into(),
                source: std::io::Error::other("disk full"),
            }
            .kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), kinds.len());
    }
}
