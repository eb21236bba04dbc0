// Redirect URI validation and authorization URL construction

use url::Url;

use super::error::AuthError;
use super::types::ClientCredentials;

/// Validate `redirect_base` against the client's allow-list and append the callback path.
///
/// The result must be used unchanged for both the authorization URL and the code
/// exchange; the provider compares them byte for byte.
pub fn resolve_redirect_uri(
    credentials: &ClientCredentials,
    redirect_base: &str,
    callback_path: &str,
) -> Result<String, AuthError> {
    if credentials.redirect_uris.iter().any(|uri| uri == redirect_base) {
        Ok(format!("{redirect_base}{callback_path}"))
    } else {
        Err(AuthError::InvalidRedirectUri {
            attempted: redirect_base.to_string(),
            allowed: credentials.redirect_uris.clone(),
        })
    }
}

/// Build the URL the user agent has to visit to grant consent
pub fn build_authorization_url(
    credentials: &ClientCredentials,
    redirect_uri: &str,
    scopes: &[String],
    extra_params: &[(String, String)],
) -> Result<String, AuthError> {
    let mut url = Url::parse(&credentials.auth_uri).map_err(|e| {
        AuthError::MalformedCredentials {
            path: Default::default(),
            reason: format!("'auth_uri' is not a valid URL: {e}"),
        }
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &credentials.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "));
        for (key, value) in extra_params {
            query.append_pair(key, value);
        }
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn credentials(redirect_uris: &[&str]) -> ClientCredentials {
        ClientCredentials {
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            auth_uri: "https://accounts.example.com/o/oauth2/auth".to_string(),
            token_uri: "https://oauth2.example.com/token".to_string(),
            redirect_uris: redirect_uris.iter().map(|s| s.to_string()).collect(),
            project_id: None,
            auth_provider_x509_cert_url: None,
        }
    }

    #[test]
    fn test_resolve_registered_base() {
        let creds = credentials(&["urn:ietf:wg:oauth:2.0:oob", "http://localhost:3000"]);
        let uri = resolve_redirect_uri(&creds, "http://localhost:3000", "/api/forms/callback").unwrap();
        assert_eq!(uri, "http://localhost:3000/api/forms/callback");
    }

    #[test]
    fn test_resolve_unregistered_base_lists_alternatives() {
        let creds = credentials(&["http://localhost", "http://127.0.0.1"]);
        let err = resolve_redirect_uri(&creds, "http://localhost:3000", "/callback").unwrap_err();

        match &err {
            AuthError::InvalidRedirectUri { attempted, allowed } => {
                assert_eq!(attempted, "http://localhost:3000");
                assert_eq!(allowed.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("http://localhost'"));
        assert!(message.contains("http://127.0.0.1"));
    }

    #[test]
    fn test_resolve_requires_exact_match() {
        let creds = credentials(&["http://localhost/"]);
        assert!(resolve_redirect_uri(&creds, "http://localhost", "/callback").is_err());
    }

    #[test]
    fn test_authorization_url_parameters() {
        let creds = credentials(&["http://localhost"]);
        let scopes = vec![
            "https://www.googleapis.com/auth/forms.body.readonly".to_string(),
            "https://www.googleapis.com/auth/spreadsheets".to_string(),
        ];
        let url = build_authorization_url(&creds, "http://localhost/callback", &scopes, &[]).unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("accounts.example.com"));
        assert_eq!(parsed.path(), "/o/oauth2/auth");

        let params: HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "http://localhost/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(
            params["scope"],
            "https://www.googleapis.com/auth/forms.body.readonly https://www.googleapis.com/auth/spreadsheets"
        );
    }

    #[test]
    fn test_authorization_url_extra_params() {
        let creds = credentials(&["http://localhost"]);
        let extra = vec![
            ("access_type".to_string(), "offline".to_string()),
            ("prompt".to_string(), "consent".to_string()),
        ];
        let url = build_authorization_url(&creds, "http://localhost/cb", &["a".to_string()], &extra)
            .unwrap();

        let params: HashMap<_, _> = Url::parse(&url).unwrap().query_pairs().into_owned().collect();
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
    }

    #[test]
    fn test_authorization_url_keeps_existing_query() {
        let mut creds = credentials(&["http://localhost"]);
        creds.auth_uri = "https://accounts.example.com/auth?hd=example.com".to_string();
        let url = build_authorization_url(&creds, "http://localhost/cb", &[], &[]).unwrap();

        let params: HashMap<_, _> = Url::parse(&url).unwrap().query_pairs().into_owned().collect();
        assert_eq!(params["hd"], "example.com");
        assert_eq!(params["response_type"], "code");
    }

    proptest! {
        #[test]
        fn prop_resolved_uri_round_trips_through_authorization_url(
            port in 1024u16..65535,
            path in "/[a-z]{1,12}(/[a-z0-9_-]{1,8}){0,2}",
        ) {
            let base = format!("http://localhost:{port}");
            let creds = credentials(&["urn:ietf:wg:oauth:2.0:oob", &base]);
            let redirect = resolve_redirect_uri(&creds, &base, &path).unwrap();
            let url = build_authorization_url(&creds, &redirect, &["s".to_string()], &[]).unwrap();

            let params: HashMap<_, _> = Url::parse(&url).unwrap().query_pairs().into_owned().collect();
            prop_assert_eq!(&params["redirect_uri"], &redirect);
        }

        #[test]
        fn prop_unlisted_base_always_rejected(suffix in "[a-z]{1,8}") {
            let creds = credentials(&["http://localhost"]);
            let base = format!("http://{suffix}.invalid");
            prop_assert!(resolve_redirect_uri(&creds, &base, "/cb").is_err());
        }
    }
}
