use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::auth::AuthSettings;
use crate::consent::ConsentIdentity;

const DEFAULT_SCOPES: &str = "https://www.googleapis.com/auth/forms.body.readonly";

/// Routes served besides the callback
const RESERVED_PATHS: &[&str] = &["/", "/health", "/auth/initiate"];

/// OAuth Gateway - installed-application token keeper
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "3000")]
    pub port: u16,

    /// Path to the OAuth client credentials JSON
    #[arg(short = 'c', long, env = "OAUTH_CREDENTIALS_FILE")]
    pub credentials_file: String,

    /// Path where the token record is persisted
    #[arg(short = 't', long, env = "OAUTH_TOKEN_FILE")]
    pub token_file: String,

    /// Required scopes (comma-separated)
    #[arg(
        short = 's',
        long,
        env = "OAUTH_SCOPES",
        value_delimiter = ',',
        default_value = DEFAULT_SCOPES
    )]
    pub scopes: Vec<String>,

    /// Redirect base; must be one of the client's registered redirect URIs
    #[arg(long, env = "OAUTH_REDIRECT_BASE", default_value = "http://localhost:3000")]
    pub redirect_base: String,

    /// Path appended to the redirect base, served by this process
    #[arg(long, env = "OAUTH_CALLBACK_PATH", default_value = "/api/forms/callback")]
    pub callback_path: String,

    /// Extra authorization URL parameters (comma-separated key=value pairs)
    #[arg(long, env = "OAUTH_EXTRA_AUTH_PARAMS", default_value = "")]
    pub extra_auth_params: String,

    /// Proxy API key protecting /auth/initiate (open when unset)
    #[arg(short = 'k', long, env = "PROXY_API_KEY")]
    pub api_key: Option<String>,

    /// Browser automation command; the authorization URL is appended as last argument
    #[arg(long, env = "CONSENT_COMMAND")]
    pub consent_command: Option<String>,

    /// Seconds to wait for the consent leg to complete
    #[arg(long, env = "CONSENT_TIMEOUT", default_value = "120")]
    pub consent_timeout: u64,

    /// Login e-mail handed to the consent command
    #[arg(long, env = "CONSENT_LOGIN_EMAIL")]
    pub consent_login_email: Option<String>,

    /// Login password handed to the consent command
    #[arg(long, env = "CONSENT_LOGIN_PASSWORD", hide_env_values = true)]
    pub consent_login_password: Option<String>,

    /// Token endpoint connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub http_connect_timeout: u64,

    /// Token endpoint request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Run the refresh-or-consent flow once at startup
    #[arg(long, env = "AUTHENTICATE_ON_START", default_value = "true", action = clap::ArgAction::Set)]
    pub authenticate_on_start: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Files
    pub credentials_file: PathBuf,
    pub token_file: PathBuf,

    // OAuth flow
    pub scopes: Vec<String>,
    pub redirect_base: String,
    pub callback_path: String,
    pub extra_auth_params: Vec<(String, String)>,

    // Authentication of our own API
    pub proxy_api_key: Option<String>,

    // Consent leg
    pub consent_command: Option<String>,
    pub consent_timeout: u64,
    pub consent_identity: ConsentIdentity,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Startup / logging
    pub authenticate_on_start: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            server_host: args.host,
            server_port: args.port,

            credentials_file: expand_tilde(&args.credentials_file),
            token_file: expand_tilde(&args.token_file),

            scopes: normalize_scopes(args.scopes),
            redirect_base: args.redirect_base.trim().to_string(),
            callback_path: args.callback_path.trim().to_string(),
            extra_auth_params: parse_extra_params(&args.extra_auth_params)
                .context("OAUTH_EXTRA_AUTH_PARAMS must be a comma-separated list of key=value")?,

            proxy_api_key: args.api_key.filter(|k| !k.is_empty()),

            consent_command: args.consent_command.filter(|c| !c.trim().is_empty()),
            consent_timeout: args.consent_timeout,
            consent_identity: ConsentIdentity {
                email: args.consent_login_email,
                password: args.consent_login_password,
            },

            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,

            authenticate_on_start: args.authenticate_on_start,
            log_level: args.log_level,
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.credentials_file.exists() {
            anyhow::bail!(
                "OAUTH_CREDENTIALS_FILE does not exist: {}",
                self.credentials_file.display()
            );
        }

        if self.scopes.is_empty() {
            anyhow::bail!("OAUTH_SCOPES must name at least one scope");
        }

        if self.redirect_base.is_empty() {
            anyhow::bail!("OAUTH_REDIRECT_BASE must not be empty");
        }

        if !self.callback_path.starts_with('/') {
            anyhow::bail!(
                "OAUTH_CALLBACK_PATH must start with '/': {}",
                self.callback_path
            );
        }

        if RESERVED_PATHS.contains(&self.callback_path.as_str()) {
            anyhow::bail!(
                "OAUTH_CALLBACK_PATH collides with a built-in route: {}",
                self.callback_path
            );
        }

        if self.consent_timeout == 0 {
            anyhow::bail!("CONSENT_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// Settings shared by the initiate and callback legs
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            scopes: self.scopes.clone(),
            redirect_base: self.redirect_base.clone(),
            callback_path: self.callback_path.clone(),
            extra_auth_params: self.extra_auth_params.clone(),
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Trim scopes and drop empty entries, keeping the configured order
fn normalize_scopes(scopes: Vec<String>) -> Vec<String> {
    scopes
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse "key=value,key=value"
fn parse_extra_params(s: &str) -> Result<Vec<(String, String)>> {
    s.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("missing '=' in '{}'", pair))?;
            let key = key.trim();
            if key.is_empty() {
                anyhow::bail!("empty key in '{}'", pair);
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
