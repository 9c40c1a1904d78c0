//! Durable storage for the current token pair
//!
//! One JSON record on disk. Writes go to a temp file in the same directory,
//! get 0600 permissions, then are renamed over the target, so a concurrent
//! reader sees either the old record or the new one. The parent directory is
//! created with 0700.
//!
//! The store holds no in-memory copy: the session manager owns the live
//! tokens and is the only writer.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The persisted credential pair. Both instants are epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
    pub refresh_token_expires_at: u64,
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Platform config location, e.g. `~/.config/thermolink/tokens.json`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("io", "thermolink", "thermolink")
            .map(|dirs| dirs.config_dir().join("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<StoredTokens>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no stored tokens");
                return Ok(None);
            }
            Err(e) => return Err(Error::Storage(format!("reading token file: {e}"))),
        };
        let tokens: StoredTokens = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("parsing token file: {e}")))?;
        info!(path = %self.path.display(), expires_at = tokens.expires_at, "loaded stored tokens");
        Ok(Some(tokens))
    }

    /// Atomically replace the record.
    pub async fn save(&self, tokens: &StoredTokens) -> Result<()> {
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| Error::Storage(format!("serializing tokens: {e}")))?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Storage("token path has no parent directory".into()))?;
        ensure_private_dir(dir).await?;

        let tmp_path = dir.join(format!(
            ".tokens.tmp.{}.{}",
            std::process::id(),
            uuid::Uuid::new_v4().as_simple()
        ));

        if let Err(e) = write_private(&tmp_path, json.as_bytes()).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::Storage(format!("writing temp token file: {e}")));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::Storage(format!("renaming temp token file: {e}")));
        }

        debug!(path = %self.path.display(), "persisted tokens");
        Ok(())
    }

    /// Delete the record. Missing is not an error.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "removed stored tokens");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("removing token file: {e}"))),
        }
    }
}

/// Create the directory (and parents) if missing and restrict it to the owner,
/// whether or not it already existed.
async fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::Storage(format!("creating token directory: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| Error::Storage(format!("setting token directory permissions: {e}")))?;
    }
    Ok(())
}

/// Write a new file that is owner-only from the moment it exists.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
