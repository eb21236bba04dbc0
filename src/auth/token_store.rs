// Persisted token record

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::AuthError;
use super::types::TokenRecord;

const READ_ATTEMPTS: u32 = 3;
const READ_RETRY_BASE_MS: u64 = 50;

/// File-backed token storage.
///
/// Nothing is cached: every call goes to the file system. Writes replace the
/// whole file atomically (temp file + rename) so readers never see half a record.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> Result<bool, AuthError> {
        fs::try_exists(&self.path)
            .await
            .map_err(|source| AuthError::Persistence {
                path: self.path.clone(),
                source,
            })
    }

    /// Read the record. Only meaningful once `exists` returned true.
    pub async fn load(&self) -> Result<TokenRecord, AuthError> {
        let data = self.read_with_retry().await?;
        serde_json::from_str(&data).map_err(|e| AuthError::CorruptTokenFile {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Replace the stored record
    pub async fn save(&self, record: &TokenRecord) -> Result<(), AuthError> {
        self.write_atomic(record)
            .await
            .map_err(|source| AuthError::Persistence {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!(path = %self.path.display(), "Token file saved");
        Ok(())
    }

    async fn write_atomic(&self, record: &TokenRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(record)?;
        let tmp = self.tmp_path();

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Unique per write so overlapping saves never share a temp file
    fn tmp_path(&self) -> PathBuf {
        let mut name = std::ffi::OsString::from(".");
        name.push(
            self.path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("token.json")),
        );
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }

    /// A concurrent writer can make a read fail transiently; retry with backoff
    async fn read_with_retry(&self) -> Result<String, AuthError> {
        let mut attempt = 0;
        loop {
            match fs::read_to_string(&self.path).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    attempt += 1;
                    if attempt >= READ_ATTEMPTS {
                        return Err(AuthError::CorruptTokenFile {
                            path: self.path.clone(),
                            reason: format!("read failed after {attempt} attempts: {e}"),
                        });
                    }
                    let delay = READ_RETRY_BASE_MS * 2u64.pow(attempt - 1);
                    tracing::debug!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "Token file read failed, retrying in {}ms",
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }
}
