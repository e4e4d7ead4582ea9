//! Unified file facade
//!
//! [`FileStore`] gives callers one API over local paths and remote device
//! paths. Local paths go straight to `tokio::fs`; remote paths become a
//! single work item on the device thread.
//!
//! Every operation has a `try_*` form that returns the failure reason and a
//! lenient form that logs it and returns an empty/default/`false` result, so
//! orchestration code that fans out many operations never has to handle
//! per-call errors.

use std::io::{Cursor, Read};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::device::driver::{device_parent, device_segments};
use crate::device::{DeviceConnection, DeviceController, DeviceError, DeviceInfo};

use super::error::StorageError;
use super::path_utils::{
    classify, combine_path, is_absolute_local_path, is_remote, join_device_path,
    remote_path_string, resolve_candidate, StoragePath,
};
use super::temp::TempFolder;
use super::types::{wildcard_matches, BatchResult, EntryKind};

/// Create every missing segment of a device directory, one level at a time
pub(crate) fn ensure_device_dir(
    conn: &mut dyn DeviceConnection,
    path: &str,
) -> Result<(), DeviceError> {
    let mut current = String::new();
    for segment in device_segments(path) {
        current = join_device_path(&current, segment);
        if conn.dir_exists(&current)? {
            continue;
        }
        match conn.create_dir(&current) {
            Ok(()) | Err(DeviceError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Write a device file, replacing any existing one (delete, then upload)
pub(crate) fn replace_device_file(
    conn: &mut dyn DeviceConnection,
    path: &str,
    source: &mut dyn Read,
) -> Result<u64, DeviceError> {
    ensure_device_dir(conn, &device_parent(path))?;
    if conn.file_exists(path)? {
        conn.delete_file(path)?;
    }
    conn.upload(source, path)
}

pub(crate) fn log_failure(operation: &str, path: &str, err: &StorageError) {
    if err.is_not_found() {
        debug!("{} {}: {}", operation, path, err);
    } else {
        warn!("{} {} failed: {}", operation, path, err);
    }
}

/// File access over local and remote backends
#[derive(Clone)]
pub struct FileStore {
    pub(crate) devices: DeviceController,
    pub(crate) temp: TempFolder,
}

impl FileStore {
    pub fn new(devices: DeviceController, temp: TempFolder) -> Self {
        Self { devices, temp }
    }

    pub fn devices(&self) -> &DeviceController {
        &self.devices
    }

    pub fn temp(&self) -> &TempFolder {
        &self.temp
    }

    /// Whether the path targets a remote device
    pub fn is_remote(path: &str) -> bool {
        is_remote(path)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Read
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn try_read_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match classify(path) {
            StoragePath::Local(local) => Ok(fs::read(&local).await?),
            StoragePath::Remote { device, path } => {
                let bytes = self
                    .devices
                    .run(move |registry| {
                        let conn = registry.get_or_connect(&device)?;
                        let mut buffer = Vec::new();
                        conn.download(&path, &mut buffer)?;
                        Ok(buffer)
                    })
                    .await?;
                Ok(bytes)
            }
        }
    }

    /// File content, or empty on any failure
    pub async fn read_bytes(&self, path: &str) -> Vec<u8> {
        match self.try_read_bytes(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log_failure("Read", path, &e);
                Vec::new()
            }
        }
    }

    pub async fn try_read_typed<T: DeserializeOwned>(
        &self,
        folder: &str,
        name: &str,
    ) -> Result<T, StorageError> {
        let path = combine_path(folder, &[name]);
        let bytes = self.try_read_bytes(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Deserialized record, or `None` if missing or malformed
    pub async fn read_typed<T: DeserializeOwned>(&self, folder: &str, name: &str) -> Option<T> {
        match self.try_read_typed(folder, name).await {
            Ok(value) => Some(value),
            Err(e) => {
                log_failure("Read record", &combine_path(folder, &[name]), &e);
                None
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Write
    // ═══════════════════════════════════════════════════════════════════════

    /// Write a file, creating the folder first and replacing any existing file
    pub async fn try_write_bytes(
        &self,
        folder: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), StorageError> {
        match classify(folder) {
            StoragePath::Local(dir) => {
                fs::create_dir_all(&dir).await?;
                fs::write(dir.join(name), bytes).await?;
            }
            StoragePath::Remote { device, path } => {
                let target = join_device_path(&path, name);
                let content = bytes.to_vec();
                self.devices
                    .run(move |registry| {
                        let conn = registry.get_or_connect(&device)?;
                        replace_device_file(conn, &target, &mut Cursor::new(content))
                    })
                    .await?;
            }
        }
        debug!("Wrote {} bytes to {}", bytes.len(), combine_path(folder, &[name]));
        Ok(())
    }

    pub async fn write_bytes(&self, folder: &str, name: &str, bytes: &[u8]) -> bool {
        match self.try_write_bytes(folder, name, bytes).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("Write", &combine_path(folder, &[name]), &e);
                false
            }
        }
    }

    pub async fn try_write_typed<T: Serialize + ?Sized>(
        &self,
        folder: &str,
        name: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.try_write_bytes(folder, name, &bytes).await
    }

    /// Best-effort persistence of a record; failures are logged
    pub async fn write_typed<T: Serialize + ?Sized>(
        &self,
        folder: &str,
        name: &str,
        value: &T,
    ) -> bool {
        match self.try_write_typed(folder, name, value).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("Write record", &combine_path(folder, &[name]), &e);
                false
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delete
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete a file; `Ok(false)` if it was already absent
    pub async fn try_delete_path(&self, path: &str) -> Result<bool, StorageError> {
        match classify(path) {
            StoragePath::Local(local) => match fs::remove_file(&local).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
            StoragePath::Remote { device, path } => Ok(self
                .devices
                .run(move |registry| {
                    let conn = registry.get_or_connect(&device)?;
                    if !conn.file_exists(&path)? {
                        return Ok(false);
                    }
                    conn.delete_file(&path)?;
                    Ok(true)
                })
                .await?),
        }
    }

    pub async fn try_delete(&self, folder: &str, name: &str) -> Result<bool, StorageError> {
        self.try_delete_path(&combine_path(folder, &[name])).await
    }

    /// Delete a file if present. Returns `false` only when deletion failed.
    pub async fn delete(&self, folder: &str, name: &str) -> bool {
        match self.try_delete(folder, name).await {
            Ok(_) => true,
            Err(e) => {
                log_failure("Delete", &combine_path(folder, &[name]), &e);
                false
            }
        }
    }

    /// Delete every file in `folder` whose name matches `pattern` (`*`, `?`).
    ///
    /// One entry failing does not stop the others.
    pub async fn delete_matching(&self, folder: &str, pattern: &str) -> BatchResult {
        let result = match classify(folder) {
            StoragePath::Local(dir) => {
                let names = match self.try_list_names(folder, EntryKind::File, Some(pattern)).await
                {
                    Ok(names) => names,
                    Err(e) => {
                        log_failure("Delete matching in", folder, &e);
                        return BatchResult::default();
                    }
                };

                let mut result = BatchResult::default();
                for name in names {
                    let path = dir.join(&name);
                    let shown = path.to_string_lossy().to_string();
                    match fs::remove_file(&path).await {
                        Ok(()) => result.success.push(shown),
                        Err(e) => {
                            warn!("Failed to delete {}: {}", shown, e);
                            result.failed.push((shown, e.to_string()));
                        }
                    }
                }
                Ok(result)
            }
            StoragePath::Remote { device, path } => {
                let pattern = pattern.to_string();
                self.devices
                    .run(move |registry| {
                        let conn = registry.get_or_connect(&device)?;
                        let mut result = BatchResult::default();
                        for entry in conn.list(&path)? {
                            if entry.is_dir || !wildcard_matches(&pattern, &entry.name) {
                                continue;
                            }
                            let target = join_device_path(&path, &entry.name);
                            let shown = remote_path_string(&device, &target);
                            match conn.delete_file(&target) {
                                Ok(()) => result.success.push(shown),
                                Err(e) => {
                                    warn!("Failed to delete {}: {}", shown, e);
                                    result.failed.push((shown, e.to_string()));
                                }
                            }
                        }
                        Ok(result)
                    })
                    .await
                    .map_err(StorageError::from)
            }
        };

        match result {
            Ok(result) => {
                info!(
                    "Deleted {} entries matching {} in {} ({} failed)",
                    result.success.len(),
                    pattern,
                    folder,
                    result.failed.len()
                );
                result
            }
            Err(e) => {
                log_failure("Delete matching in", folder, &e);
                BatchResult::default()
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Listing
    // ═══════════════════════════════════════════════════════════════════════

    /// Entry names of one kind in a folder, sorted
    async fn try_list_names(
        &self,
        folder: &str,
        kind: EntryKind,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        let pattern = pattern.map(str::to_string);
        let mut names = match classify(folder) {
            StoragePath::Local(dir) => {
                let mut names = Vec::new();
                let mut read_dir = fs::read_dir(&dir).await?;
                while let Some(entry) = read_dir.next_entry().await? {
                    let is_dir = entry.file_type().await?.is_dir();
                    if is_dir != (kind == EntryKind::Directory) {
                        continue;
                    }
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
                names
            }
            StoragePath::Remote { device, path } => {
                self.devices
                    .run(move |registry| {
                        let conn = registry.get_or_connect(&device)?;
                        Ok(conn
                            .list(&path)?
                            .into_iter()
                            .filter(|e| e.is_dir == (kind == EntryKind::Directory))
                            .map(|e| e.name)
                            .collect::<Vec<_>>())
                    })
                    .await?
            }
        };

        if let Some(pattern) = pattern {
            names.retain(|name| wildcard_matches(&pattern, name));
        }
        names.sort();
        Ok(names)
    }

    /// Full paths of matching entries; remote results stay in remote form
    pub async fn try_list(
        &self,
        folder: &str,
        kind: EntryKind,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, StorageError> {
        Ok(self
            .try_list_names(folder, kind, pattern)
            .await?
            .into_iter()
            .map(|name| combine_path(folder, &[name.as_str()]))
            .collect())
    }

    pub async fn list_subfolders(&self, folder: &str, pattern: Option<&str>) -> Vec<String> {
        self.try_list(folder, EntryKind::Directory, pattern)
            .await
            .unwrap_or_else(|e| {
                log_failure("List folders in", folder, &e);
                Vec::new()
            })
    }

    pub async fn list_files(&self, folder: &str, pattern: Option<&str>) -> Vec<String> {
        self.try_list(folder, EntryKind::File, pattern)
            .await
            .unwrap_or_else(|e| {
                log_failure("List files in", folder, &e);
                Vec::new()
            })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Directories & queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a directory and its missing parents; existing is fine
    pub async fn try_create_directory(&self, path: &str) -> Result<(), StorageError> {
        match classify(path) {
            StoragePath::Local(dir) => fs::create_dir_all(&dir).await?,
            StoragePath::Remote { device, path } => {
                self.devices
                    .run(move |registry| {
                        let conn = registry.get_or_connect(&device)?;
                        ensure_device_dir(conn, &path)
                    })
                    .await?
            }
        }
        Ok(())
    }

    pub async fn create_directory(&self, path: &str) -> bool {
        match self.try_create_directory(path).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("Create directory", path, &e);
                false
            }
        }
    }

    pub async fn try_file_exists(&self, path: &str) -> Result<bool, StorageError> {
        self.try_exists(path, EntryKind::File).await
    }

    pub async fn file_exists(&self, path: &str) -> bool {
        self.try_file_exists(path).await.unwrap_or_else(|e| {
            log_failure("Stat", path, &e);
            false
        })
    }

    pub async fn directory_exists(&self, path: &str) -> bool {
        self.try_exists(path, EntryKind::Directory)
            .await
            .unwrap_or_else(|e| {
                log_failure("Stat", path, &e);
                false
            })
    }

    async fn try_exists(&self, path: &str, kind: EntryKind) -> Result<bool, StorageError> {
        match classify(path) {
            StoragePath::Local(local) => match fs::metadata(&local).await {
                Ok(meta) => Ok(match kind {
                    EntryKind::File => meta.is_file(),
                    EntryKind::Directory => meta.is_dir(),
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            },
            StoragePath::Remote { device, path } => Ok(self
                .devices
                .run(move |registry| {
                    let conn = registry.get_or_connect(&device)?;
                    match kind {
                        EntryKind::File => conn.file_exists(&path),
                        EntryKind::Directory => conn.dir_exists(&path),
                    }
                })
                .await?),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Devices & temp files
    // ═══════════════════════════════════════════════════════════════════════

    /// Devices currently reachable
    pub async fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices.visible_devices().await.unwrap_or_else(|e| {
            warn!("Failed to enumerate devices: {}", e);
            Vec::new()
        })
    }

    /// Rewrite a user-typed path into remote form when its first segment
    /// names a visible device. Advisory: returns the input on any failure.
    pub async fn resolve_candidate_path(&self, candidate: &str) -> String {
        if is_remote(candidate) || is_absolute_local_path(candidate) {
            return candidate.to_string();
        }
        match self.devices.visible_devices().await {
            Ok(devices) => resolve_candidate(candidate, &devices)
                .unwrap_or_else(|| candidate.to_string()),
            Err(e) => {
                debug!("Device lookup for {} failed: {}", candidate, e);
                candidate.to_string()
            }
        }
    }

    /// Allocate an empty temp file
    pub async fn create_temp_file(&self, extension: &str) -> Option<PathBuf> {
        match self.temp.allocate(extension).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to allocate temp file: {}", e);
                None
            }
        }
    }
}
