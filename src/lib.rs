//! MediaScraper storage and transfer layer
//!
//! Unified file access over the local filesystem and portable devices,
//! plus a download coordinator that fetches artwork, video and music into
//! that storage.
//!
//! Build a [`StorageServices`] once at startup and hand its [`FileStore`]
//! and [`DownloadCoordinator`] to whatever needs them.

pub mod config;
pub mod device;
pub mod download;
pub mod storage;

use std::sync::Once;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::AppConfig;
use device::{driver_factory, spawn_device_thread, DeviceError, DriverFactory, MountDriver};
use download::{DownloadCoordinator, DownloadError};
use storage::{FileStore, TempFolder};

static LOGGING: Once = Once::new();

/// Initialize logging (`RUST_LOG` overrides the default `info` filter).
/// Later calls are no-ops.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let result = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        if let Err(e) = result {
            eprintln!("Logging already initialized elsewhere: {}", e);
        }
    });
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Device thread: {0}")]
    Device(#[from] DeviceError),

    #[error("Download coordinator: {0}")]
    Download(#[from] DownloadError),
}

/// The long-lived service objects, constructed once
#[derive(Clone)]
pub struct StorageServices {
    pub store: FileStore,
    pub downloads: DownloadCoordinator,
}

impl StorageServices {
    /// Start the device thread and build the facade and coordinator
    pub fn start(config: &AppConfig, driver: DriverFactory) -> Result<Self, StartupError> {
        let temp = TempFolder::new(&config.app_name);
        Self::start_with_temp(config, driver, temp)
    }

    pub fn start_with_temp(
        config: &AppConfig,
        driver: DriverFactory,
        temp: TempFolder,
    ) -> Result<Self, StartupError> {
        let devices = spawn_device_thread(driver)?;
        let downloads = DownloadCoordinator::new(config, temp.clone())?;
        info!("Storage services started (temp folder {:?})", temp.path());

        Ok(Self {
            store: FileStore::new(devices, temp),
            downloads,
        })
    }

    /// Start with the desktop mount-point driver (gvfs on Linux)
    pub fn start_default(config: &AppConfig) -> Result<Self, StartupError> {
        let root = MountDriver::default_root();
        info!("Using device mount root {:?}", root);
        Self::start(config, driver_factory(move || MountDriver::new(root)))
    }

    /// Disconnect every device, stop the device thread and empty the temp
    /// folder. Call only once nothing is still writing temp files.
    pub async fn shutdown(&self) {
        let devices = self.store.devices();
        if let Err(e) = devices.disconnect_all().await {
            warn!("Failed to disconnect devices: {}", e);
        }
        devices.shutdown();

        let removed = self.store.temp().cleanup().await;
        info!("Storage services stopped ({} temp files removed)", removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device::{MemoryDevice, MemoryDriver};
    use tempfile::tempdir;

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let temp = tempdir().unwrap();
        let driver = MemoryDriver::new(vec![MemoryDevice::new("1", "DeviceA", "Handheld")]);
        let for_thread = driver.clone();
        let services = StorageServices::start_with_temp(
            &AppConfig::default(),
            driver_factory(move || for_thread),
            TempFolder::with_root(temp.path().join("tmp")),
        )
        .unwrap();

        assert!(services.store.write_bytes("remote:\\DeviceA\\x", "a.bin", b"1").await);
        let staged = services.store.create_temp_file("png").await.unwrap();
        assert_eq!(driver.connect_count("1"), 1);

        services.shutdown().await;
        assert!(!staged.exists());
        // Device thread is gone; remote work now fails quietly
        assert!(!services.store.file_exists("remote:\\DeviceA\\x\\a.bin").await);
    }
}
