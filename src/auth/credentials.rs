// Client credential loading

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use url::Url;

use super::error::AuthError;
use super::types::{ClientCredentials, CredentialsFile};

/// Loads the client credentials file once and hands out the cached value afterwards.
///
/// Concurrent first calls share a single in-flight read: the cell is Unloaded until
/// someone calls `load`, Loading while that future runs (other callers wait on it),
/// then Loaded for the rest of the process. A failed load leaves it Unloaded.
pub struct CredentialStore {
    path: PathBuf,
    cell: OnceCell<Arc<ClientCredentials>>,
    reads: AtomicUsize,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the credentials, reading the file on first use
    pub async fn load(&self) -> Result<Arc<ClientCredentials>, AuthError> {
        self.cell
            .get_or_try_init(|| async {
                let reads = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(path = %self.path.display(), reads, "Reading credentials file");
                read_credentials(&self.path).await.map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Number of times the underlying file has been read
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Read and validate a credentials file
pub async fn read_credentials(path: &Path) -> Result<ClientCredentials, AuthError> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::CredentialsNotFound {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(AuthError::CredentialsUnreadable {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let malformed = |reason: String| AuthError::MalformedCredentials {
        path: path.to_path_buf(),
        reason,
    };

    let file: CredentialsFile = serde_json::from_str(&data).map_err(|e| malformed(e.to_string()))?;

    let credentials = file
        .installed
        .or(file.web)
        .ok_or_else(|| malformed("expected an 'installed' or 'web' client section".to_string()))?;

    validate(&credentials).map_err(malformed)?;

    tracing::info!(
        path = %path.display(),
        client_id = %credentials.client_id,
        redirect_uris = credentials.redirect_uris.len(),
        "Loaded client credentials"
    );

    Ok(credentials)
}

fn validate(creds: &ClientCredentials) -> Result<(), String> {
    for (name, value) in [
        ("client_id", &creds.client_id),
        ("client_secret", &creds.client_secret),
        ("auth_uri", &creds.auth_uri),
        ("token_uri", &creds.token_uri),
    ] {
        if value.trim().is_empty() {
            return Err(format!("'{name}' must not be empty"));
        }
    }

    for (name, value) in [("auth_uri", &creds.auth_uri), ("token_uri", &creds.token_uri)] {
        Url::parse(value).map_err(|e| format!("'{name}' is not a valid URL: {e}"))?;
    }

    if creds.redirect_uris.is_empty() {
        return Err("'redirect_uris' must list at least one URI".to_string());
    }

    Ok(())
}
