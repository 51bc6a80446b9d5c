use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::errors::{AuthError, Result};
use crate::session::TokenPair;
use crate::store::{CredentialStore, StoredCredential};

const CREDENTIALS_FILE: &str = "credentials.json";

/// File-based credential store
///
/// Keeps the Microsoft refresh credential as pretty-printed JSON next to an
/// advisory lock file.
///
/// # Directory Structure
/// ```text
/// ~/.config/xchain/
/// ├── credentials.json   # Stored credential
/// └── credentials.lock   # Advisory lock file, named after the credential file
/// ```
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock_file: PathBuf,
    /// Last credential read from or written to disk
    cache: RwLock<Option<StoredCredential>>,
}

impl FileCredentialStore {
    /// Create a store writing to `path`.
    ///
    /// A missing parent directory is created owner-only; an existing one is
    /// left as it is.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = parent_dir(&path);

        if !fs::try_exists(&dir).await? {
            fs::create_dir_all(&dir).await?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
            }
            debug!(dir = %dir.display(), "Created credential directory");
        }

        Ok(Self {
            lock_file: path.with_extension("lock"),
            path,
            cache: RwLock::new(None),
        })
    }

    /// Default credentials path for the current platform
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "xchain").ok_or_else(|| {
            AuthError::Store("Could not determine config directory".to_string())
        })?;

        Ok(project_dirs.config_dir().join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire an exclusive lock, held until the returned file is dropped
    fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| AuthError::LockTimeout)?;

        Ok(lock_file)
    }

    async fn read_from_disk(&self) -> Result<Option<StoredCredential>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path).await?;
        let credential: StoredCredential = serde_json::from_str(&content)
            .map_err(|e| AuthError::Store(format!("Invalid credential file: {e}")))?;
        Ok(Some(credential))
    }

    async fn write_to_disk(&self, credential: &StoredCredential) -> Result<()> {
        let json = serde_json::to_string_pretty(credential)?;

        // Atomic write: temp file, sync, rename
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::File::open(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

/// Directory holding `path`; a bare file name lives in the working directory
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        if let Some(credential) = self.cache.read().await.clone() {
            return Ok(Some(credential));
        }

        let loaded = self.read_from_disk().await.inspect_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to load credential");
        })?;
        if loaded.is_some() {
            *self.cache.write().await = loaded.clone();
        }
        Ok(loaded)
    }

    async fn persist(&self, tokens: &TokenPair) -> Result<()> {
        let _lock = self.acquire_lock()?;

        let previous = match self.cache.read().await.clone() {
            Some(cached) => Some(cached),
            None => self.read_from_disk().await.unwrap_or_else(|e| {
                debug!(error = %e, "Ignoring unreadable previous credential");
                None
            }),
        };
        let credential = StoredCredential::from_exchange(tokens, previous.as_ref());

        self.write_to_disk(&credential).await?;
        *self.cache.write().await = Some(credential);

        debug!(path = %self.path.display(), "Credential persisted");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _lock = self.acquire_lock()?;

        if fs::try_exists(&self.path).await? {
            fs::remove_file(&self.path).await?;
            info!(path = %self.path.display(), "Stored credential removed");
        }
        self.cache.write().await.take();
        Ok(())
    }
}
