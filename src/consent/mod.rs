//! Consent drivers.
//!
//! A driver gets the authorization URL and is responsible for getting a user
//! agent through sign-in and consent until it lands on the redirect URI. The
//! flow controller never sees the result directly: completion shows up as a
//! callback request.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Errors a consent driver can report.
#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("consent was not completed within {0}s")]
    Timeout(u64),

    #[error("consent driver failed: {0}")]
    Failed(String),

    #[error("failed to start consent driver '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConsentError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConsentError::Timeout(_) => "consent_timeout",
            ConsentError::Failed(_) => "consent_failed",
            ConsentError::Spawn { .. } => "consent_failed",
        }
    }
}

/// Drives the interactive consent for an authorization URL.
#[async_trait]
pub trait ConsentDriver: Send + Sync {
    async fn obtain_consent(&self, authorization_url: &str) -> Result<(), ConsentError>;
}

/// Leaves consent to a human operator: the URL is only logged.
pub struct ManualConsent;

#[async_trait]
impl ConsentDriver for ManualConsent {
    async fn obtain_consent(&self, authorization_url: &str) -> Result<(), ConsentError> {
        tracing::info!("Open this URL in a browser to grant access:");
        tracing::info!("{}", authorization_url);
        Ok(())
    }
}

/// Login identity handed to an automation program.
#[derive(Clone, Default)]
pub struct ConsentIdentity {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ConsentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentIdentity")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Runs an external browser-automation program with the URL as its last argument.
///
/// The identity is passed through `CONSENT_LOGIN_EMAIL` / `CONSENT_LOGIN_PASSWORD`
/// in the child's environment. The program is expected to exit once the browser
/// reached the redirect URI; it is killed when the timeout expires.
#[derive(Debug, Clone)]
pub struct CommandConsent {
    program: String,
    args: Vec<String>,
    identity: ConsentIdentity,
    timeout: Duration,
}

impl CommandConsent {
    pub fn new(command: &str, identity: ConsentIdentity, timeout_secs: u64) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            identity,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn command(&self, authorization_url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(authorization_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(email) = &self.identity.email {
            cmd.env("CONSENT_LOGIN_EMAIL", email);
        }
        if let Some(password) = &self.identity.password {
            cmd.env("CONSENT_LOGIN_PASSWORD", password);
        }
        cmd
    }
}

#[async_trait]
impl ConsentDriver for CommandConsent {
    async fn obtain_consent(&self, authorization_url: &str) -> Result<(), ConsentError> {
        tracing::info!(program = %self.program, "Starting consent driver");

        let child = self
            .command(authorization_url)
            .spawn()
            .map_err(|source| ConsentError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ConsentError::Failed(e.to_string()))?,
            Err(_) => {
                tracing::error!(
                    program = %self.program,
                    timeout_secs = self.timeout.as_secs(),
                    "Consent driver timed out"
                );
                return Err(ConsentError::Timeout(self.timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConsentError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "Consent driver exited"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let driver = CommandConsent::new(
            "node scripts/consent.js --headless",
            ConsentIdentity::default(),
            30,
        )
        .unwrap();
        assert_eq!(driver.program, "node");
        assert_eq!(driver.args, vec!["scripts/consent.js", "--headless"]);
        assert!(CommandConsent::new("   ", ConsentIdentity::default(), 30).is_none());
    }

    #[test]
    fn test_identity_debug_hides_password() {
        let identity = ConsentIdentity {
            email: Some("bot@example.com".to_string()),
            password: Some("hunter2".to_string()),
        };
        let debug = format!("{identity:?}");
        assert!(debug.contains("bot@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_manual_consent_returns_immediately() {
        assert!(ManualConsent
            .obtain_consent("https://accounts.example.com/auth?x=1")
            .await
            .is_ok());
    }

    fn shell(script: String, identity: ConsentIdentity, timeout_secs: u64) -> CommandConsent {
        // The URL ends up as $0 of the script
        CommandConsent {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            identity,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_receives_url_and_identity() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let driver = shell(
            format!("echo \"$CONSENT_LOGIN_EMAIL $0\" > '{}'", out.display()),
            ConsentIdentity {
                email: Some("bot@example.com".to_string()),
                password: None,
            },
            10,
        );

        driver
            .obtain_consent("https://accounts.example.com/auth")
            .await
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "bot@example.com https://accounts.example.com/auth");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_is_reported() {
        let driver = shell("echo nope >&2; exit 3".to_string(), ConsentIdentity::default(), 10);
        let err = driver.obtain_consent("https://x").await.unwrap_err();
        assert!(matches!(err, ConsentError::Failed(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout() {
        let driver = shell("sleep 5".to_string(), ConsentIdentity::default(), 1);

        let err = driver.obtain_consent("https://x").await.unwrap_err();
        assert!(matches!(err, ConsentError::Timeout(1)));
        assert_eq!(err.kind(), "consent_timeout");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let driver =
            CommandConsent::new("definitely-not-a-real-binary-4711", ConsentIdentity::default(), 5)
                .unwrap();
        let err = driver.obtain_consent("https://x").await.unwrap_err();
        assert!(matches!(err, ConsentError::Spawn { .. }));
    }
}
