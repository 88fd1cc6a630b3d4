use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::TokenError;
use crate::oauth::record::{parse_stored, TokenRecord};

impl std::fmt::Debug for dyn CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("location", &self.location())
            .finish()
    }
}

/// Durable home of the single [`TokenRecord`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the persisted record, `None` if nothing was ever saved.
    ///
    /// Unparsable content is an error, never an empty record.
    async fn load(&self) -> Result<Option<TokenRecord>, TokenError>;

    /// Replace the persisted record. Readers see either the old or the new
    /// record in full, never a mix.
    async fn save(&self, record: &TokenRecord) -> Result<(), TokenError>;

    /// Human-readable location for status output and logs.
    fn location(&self) -> String;
}

/// JSON file store using write-to-temp then rename.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp path, so the final rename never crosses filesystems.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tokens.json".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<TokenRecord>, TokenError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        parse_stored(&data)
            .map(Some)
            .map_err(|detail| TokenError::StorageCorrupt {
                path: self.path.clone(),
                detail,
            })
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), TokenError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(&record.to_persisted()).map_err(|e| {
            TokenError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let tmp = self.temp_path();
        let written = write_synced(&tmp, &data).await;
        let renamed = match written {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = renamed {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        sync_parent_dir(&self.path).await;
        tracing::debug!("Saved credentials to {}", self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Make the rename itself durable. Best effort: not every platform allows
/// opening a directory.
async fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = tokio::fs::File::open(parent).await {
                let _ = dir.sync_all().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenRecord {
        TokenRecord {
            access_token: "test-access".into(),
            refresh_token: Some("test-refresh".into()),
            token_type: "Bearer".into(),
            expires_in: 3600,
            obtained_at_ms: 1_700_000_123_456,
        }
    }

    #[tokio::test]
    async fn load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("tokens.json"));

        store.save(&sample()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn save_writes_operator_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        store.save(&sample()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "test-access");
        assert_eq!(raw["refresh_token"], "test-refresh");
        assert_eq!(raw["token_type"], "Bearer");
        assert_eq!(raw["expires_in"], 3600);
        assert_eq!(raw["obtained_at"], 1_700_000_123_456i64);
        assert!(raw["expires_at"].is_string());
    }

    #[tokio::test]
    async fn save_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        store.save(&sample()).await.unwrap();

        let mut second = sample();
        second.access_token = "rotated".into();
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap().access_token, "rotated");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_surfaced_not_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"access_token": "A1", "refresh_tok"#).unwrap();
        let store = FileCredentialStore::new(&path);

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, TokenError::StorageCorrupt { .. }));
        // left in place for the operator
        assert!(path.exists());
    }

    #[tokio::test]
    async fn empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "").unwrap();
        let err = FileCredentialStore::new(&path).load().await.unwrap_err();
        assert_eq!(err.code(), "storage_corrupt");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        store.save(&sample()).await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
