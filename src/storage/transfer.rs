//! Cross-backend move and copy
//!
//! Dispatches on the (source, destination) backend pair. Every variant
//! creates the destination folder first and overwrites an existing
//! destination. A failing step aborts the transfer; earlier steps are not
//! rolled back, so a failed Move can leave a copy at the destination.
//!
//! Remote to remote transfers buffer the whole file in memory: the device
//! protocol has no server-side copy.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::device::driver::normalize_device_path;

use super::error::StorageError;
use super::path_utils::{classify, StoragePath};
use super::store::{log_failure, replace_device_file, FileStore};
use super::types::TransferMode;

impl FileStore {
    /// Move or copy a single file between any two backends
    pub async fn try_transfer(
        &self,
        source: &str,
        destination: &str,
        mode: TransferMode,
    ) -> Result<(), StorageError> {
        debug!("{:?} {} -> {}", mode, source, destination);

        match (classify(source), classify(destination)) {
            (StoragePath::Local(src), StoragePath::Local(dst)) => {
                local_to_local(&src, &dst, mode).await?
            }
            (StoragePath::Local(src), StoragePath::Remote { device, path }) => {
                self.local_to_remote(src, device, path, mode).await?
            }
            (StoragePath::Remote { device, path }, StoragePath::Local(dst)) => {
                self.remote_to_local(device, path, &dst, mode).await?
            }
            (
                StoragePath::Remote {
                    device: src_device,
                    path: src_path,
                },
                StoragePath::Remote {
                    device: dst_device,
                    path: dst_path,
                },
            ) => {
                self.remote_to_remote(src_device, src_path, dst_device, dst_path, mode)
                    .await?
            }
        }

        info!("{:?} complete: {} -> {}", mode, source, destination);
        Ok(())
    }

    pub async fn try_move(&self, source: &str, destination: &str) -> Result<(), StorageError> {
        self.try_transfer(source, destination, TransferMode::Move)
            .await
    }

    pub async fn try_copy(&self, source: &str, destination: &str) -> Result<(), StorageError> {
        self.try_transfer(source, destination, TransferMode::Copy)
            .await
    }

    /// Move a file; `false` (and a log entry) on failure
    pub async fn move_file(&self, source: &str, destination: &str) -> bool {
        match self.try_move(source, destination).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("Move", source, &e);
                false
            }
        }
    }

    /// Copy a file; `false` (and a log entry) on failure
    pub async fn copy_file(&self, source: &str, destination: &str) -> bool {
        match self.try_copy(source, destination).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("Copy", source, &e);
                false
            }
        }
    }

    async fn local_to_remote(
        &self,
        source: PathBuf,
        device: String,
        path: String,
        mode: TransferMode,
    ) -> Result<(), StorageError> {
        // Fail before queueing device work if the source is missing
        fs::metadata(&source).await?;

        let upload_source = source.clone();
        let written = self
            .devices
            .run(move |registry| {
                let conn = registry.get_or_connect(&device)?;
                let mut file = std::fs::File::open(&upload_source)?;
                replace_device_file(conn, &path, &mut file)
            })
            .await?;
        debug!("Uploaded {} bytes from {:?}", written, source);

        if mode == TransferMode::Move {
            fs::remove_file(&source).await?;
        }
        Ok(())
    }

    async fn remote_to_local(
        &self,
        device: String,
        path: String,
        destination: &Path,
        mode: TransferMode,
    ) -> Result<(), StorageError> {
        let staging = self.temp.allocate("part").await?;

        let result = self
            .stage_and_place(&device, &path, &staging, destination)
            .await;
        if result.is_err() {
            if let Err(e) = fs::remove_file(&staging).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove staging file {:?}: {}", staging, e);
                }
            }
        }
        result?;

        if mode == TransferMode::Move {
            self.devices
                .run(move |registry| registry.get_or_connect(&device)?.delete_file(&path))
                .await?;
        }
        Ok(())
    }

    /// Download a device file into `staging`, then move it to `destination`
    async fn stage_and_place(
        &self,
        device: &str,
        path: &str,
        staging: &Path,
        destination: &Path,
    ) -> Result<(), StorageError> {
        let (device, path, target) = (device.to_string(), path.to_string(), staging.to_path_buf());
        let read = self
            .devices
            .run(move |registry| {
                let conn = registry.get_or_connect(&device)?;
                let mut file = std::fs::File::create(&target)?;
                let read = conn.download(&path, &mut file)?;
                file.sync_all()?;
                Ok(read)
            })
            .await?;
        debug!("Downloaded {} bytes into {:?}", read, staging);

        ensure_local_parent(destination).await?;
        place_file(staging, destination).await
    }

    async fn remote_to_remote(
        &self,
        src_device: String,
        src_path: String,
        dst_device: String,
        dst_path: String,
        mode: TransferMode,
    ) -> Result<(), StorageError> {
        self.devices
            .run(move |registry| {
                let src_id = registry.resolve(&src_device)?;
                let dst_id = registry.resolve(&dst_device)?;
                // Device filesystems ignore case, like device names
                if src_id == dst_id
                    && normalize_device_path(&src_path)
                        .eq_ignore_ascii_case(&normalize_device_path(&dst_path))
                {
                    debug!("Source and destination are the same file: {}", src_path);
                    return Ok(());
                }

                let mut buffer = Vec::new();
                registry
                    .connection_by_id(&src_id)?
                    .download(&src_path, &mut buffer)?;

                let dst = registry.connection_by_id(&dst_id)?;
                replace_device_file(dst, &dst_path, &mut Cursor::new(buffer))?;

                if mode == TransferMode::Move {
                    registry.connection_by_id(&src_id)?.delete_file(&src_path)?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }
}

async fn ensure_local_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Rename into place, falling back to copy + remove across filesystems
async fn place_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}

async fn local_to_local(
    source: &Path,
    destination: &Path,
    mode: TransferMode,
) -> Result<(), StorageError> {
    fs::metadata(source).await?;
    if source == destination {
        return Ok(());
    }
    ensure_local_parent(destination).await?;

    match mode {
        TransferMode::Copy => {
            fs::copy(source, destination).await?;
        }
        TransferMode::Move => place_file(source, destination).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::store::tests::memory_store;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_to_local_copy_and_move_overwrite() {
        let temp = tempdir().unwrap();
        let (store, _) = memory_store(temp.path());
        let src = temp.path().join("a.png");
        let dst = temp.path().join("out").join("b.png");
        std::fs::write(&src, b"new").unwrap();
        std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
        std::fs::write(&dst, b"old").unwrap();

        assert!(store.copy_file(src.to_str().unwrap(), dst.to_str().unwrap()).await);
        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
        assert!(src.exists());

        let moved = temp.path().join("deep").join("c.png");
        assert!(store.move_file(src.to_str().unwrap(), moved.to_str().unwrap()).await);
        assert!(!src.exists());
        assert_eq!(std::fs::read(&moved).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_local_to_remote_move() {
        let temp = tempdir().unwrap();
        let (store, driver) = memory_store(temp.path());
        let src = temp.path().join("cover.png");
        std::fs::write(&src, b"pixels").unwrap();
        driver.put_file("usb:a", "Media\\cover.png", b"stale");

        assert!(
            store
                .move_file(src.to_str().unwrap(), "remote:\\DeviceA\\Media\\cover.png")
                .await
        );
        assert_eq!(driver.file("usb:a", "Media\\cover.png").unwrap(), b"pixels");
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn test_remote_to_local_move() {
        let temp = tempdir().unwrap();
        let (store, driver) = memory_store(temp.path());
        driver.put_file("usb:b", "Videos\\intro.mp4", b"frames");
        let dst = temp.path().join("library").join("intro.mp4");
        let dst = dst.to_str().unwrap();

        assert!(store.move_file("remote:\\DeviceB\\Videos\\intro.mp4", dst).await);
        assert!(!store.file_exists("remote:\\DeviceB\\Videos\\intro.mp4").await);
        assert!(store.file_exists(dst).await);
        assert_eq!(std::fs::read(dst).unwrap(), b"frames");
        // Staging file was moved, not left behind
        assert!(store.temp().find_by_token(".part").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_to_local_missing_source_fails() {
        let temp = tempdir().unwrap();
        let (store, _) = memory_store(temp.path());
        let dst = temp.path().join("x.bin");

        let err = store
            .try_move("remote:\\DeviceA\\missing.bin", dst.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!dst.exists());
        assert!(store.temp().find_by_token(".part").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_to_remote_same_device_and_noop() {
        let temp = tempdir().unwrap();
        let (store, driver) = memory_store(temp.path());
        driver.put_file("usb:a", "a\\x.bin", b"payload");

        assert!(
            store
                .copy_file("remote:\\DeviceA\\a\\x.bin", "remote:\\devicea\\b\\c\\x.bin")
                .await
        );
        assert_eq!(driver.file("usb:a", "b\\c\\x.bin").unwrap(), b"payload");
        assert_eq!(driver.connect_count("usb:a"), 1);

        assert!(store.move_file("remote:\\DeviceA\\a\\x.bin", "remote:\\DeviceA\\a\\x.bin").await);
        assert!(driver.file("usb:a", "a\\x.bin").is_some());

        assert!(store.move_file("remote:\\DeviceA\\A\\X.bin", "remote:\\handheld a\\a\\x.bin").await);
        assert_eq!(driver.file("usb:a", "a\\x.bin").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_remote_to_remote_move_between_devices() {
        let temp = tempdir().unwrap();
        let (store, driver) = memory_store(temp.path());
        driver.put_file("usb:a", "Roms\\game.sfc", b"rom");

        assert!(store.move_file("remote:\\DeviceA\\Roms\\game.sfc", "remote:\\DeviceB\\Roms\\game.sfc").await);
        assert!(driver.file("usb:a", "Roms\\game.sfc").is_none());
        assert_eq!(driver.file("usb:b", "Roms\\game.sfc").unwrap(), b"rom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remote_copy_does_not_block_local_work() {
        let temp = tempdir().unwrap();
        let (store, driver) = memory_store(temp.path());
        driver.put_file("usb:a", "big.bin", &vec![7u8; 4096]);
        driver.set_latency(Duration::from_millis(300));

        let copy = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .copy_file("remote:\\DeviceA\\big.bin", "remote:\\DeviceB\\big.bin")
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let local = temp.path().join("local");
        let local = local.to_str().unwrap();
        for i in 0..10 {
            let name = format!("{}.txt", i);
            assert!(store.write_bytes(local, &name, name.as_bytes()).await);
        }
        assert_eq!(store.list_files(local, Some("*.txt")).await.len(), 10);
        assert!(!copy.is_finished());

        assert!(copy.await.unwrap());
        assert_eq!(driver.file("usb:b", "big.bin").unwrap(), vec![7u8; 4096]);
        assert_eq!(
            std::fs::read(temp.path().join("local").join("3.txt")).unwrap(),
            b"3.txt"
        );
    }
}
