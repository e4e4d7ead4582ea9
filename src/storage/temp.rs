//! Application temp folder
//!
//! One directory under the OS temp root, namespaced by application name.
//! Downloads, tool output and transfer staging files all live here. Files
//! are not reference counted: callers own what they allocate, and
//! [`TempFolder::cleanup`] must only run once nothing is still writing.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use super::error::StorageError;

#[derive(Debug, Clone)]
pub struct TempFolder {
    root: PathBuf,
}

impl TempFolder {
    /// `<os temp>/<app_name>`
    pub fn new(app_name: &str) -> Self {
        Self {
            root: std::env::temp_dir().join(app_name),
        }
    }

    /// Temp folder at a custom location (for testing)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// A fresh token for naming files that a helper process will create
    pub fn unique_token() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Ensure the folder exists
    pub async fn ensure(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Create an empty file with a unique name and the given extension
    pub async fn allocate(&self, extension: &str) -> Result<PathBuf, StorageError> {
        self.ensure().await?;
        let extension = extension.trim_start_matches('.');
        let name = if extension.is_empty() {
            Self::unique_token()
        } else {
            format!("{}.{}", Self::unique_token(), extension)
        };
        let path = self.root.join(name);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        debug!("Allocated temp file {:?}", path);
        Ok(path)
    }

    /// Files in the folder whose name contains `token`
    pub async fn find_by_token(&self, token: &str) -> Result<Vec<PathBuf>, StorageError> {
        let mut matches = Vec::new();
        let mut read_dir = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(matches),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_name().to_string_lossy().contains(token) {
                matches.push(entry.path());
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Remove every file in the folder, returning how many were removed
    pub async fn cleanup(&self) -> usize {
        let mut read_dir = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read temp folder {:?}: {}", self.root, e);
                }
                return 0;
            }
        };

        let mut removed = 0;
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to iterate temp folder {:?}: {}", self.root, e);
                    break;
                }
            };
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove temp file {:?}: {}", entry.path(), e),
            }
        }

        info!("Temp cleanup removed {} files from {:?}", removed, self.root);
        removed
    }
}
