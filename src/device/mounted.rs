//! Mounted-directory device driver
//!
//! Desktop environments often expose portable devices as a directory per
//! device under a mount root (gvfs on Linux puts MTP devices under
//! `/run/user/<uid>/gvfs`). This driver treats every subdirectory of the
//! root as one device and maps device paths beneath it.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::driver::{device_segments, DeviceConnection, DeviceDriver, DeviceEntry, DeviceInfo};
use super::error::DeviceError;

/// Driver exposing subdirectories of a mount root as devices
pub struct MountDriver {
    root: PathBuf,
}

impl MountDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$XDG_RUNTIME_DIR/gvfs`, or the OS temp dir where there is no runtime dir
    pub fn default_root() -> PathBuf {
        dirs::runtime_dir()
            .map(|dir| dir.join("gvfs"))
            .unwrap_or_else(|| std::env::temp_dir().join("gvfs"))
    }
}

impl DeviceDriver for MountDriver {
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut devices = Vec::new();
        for entry in read_dir.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // gvfs names MTP mounts "mtp:host=<vendor>_<model>_<serial>"
            let description = name
                .strip_prefix("mtp:host=")
                .map(|s| s.replace('_', " "))
                .unwrap_or_else(|| name.clone());
            devices.push(DeviceInfo {
                id: entry.path().to_string_lossy().to_string(),
                friendly_name: name,
                description,
            });
        }
        Ok(devices)
    }

    fn connect(&mut self, device: &DeviceInfo) -> Result<Box<dyn DeviceConnection>, DeviceError> {
        let base = PathBuf::from(&device.id);
        if !base.is_dir() {
            return Err(DeviceError::ConnectionFailed(format!(
                "Mount point {} is gone",
                device.id
            )));
        }
        debug!("Opened mounted device at {:?}", base);
        Ok(Box::new(MountConnection {
            info: device.clone(),
            base,
            open: true,
        }))
    }
}

struct MountConnection {
    info: DeviceInfo,
    base: PathBuf,
    open: bool,
}

impl MountConnection {
    fn local(&self, path: &str) -> Result<PathBuf, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::Disconnected);
        }
        let mut full = self.base.clone();
        for segment in device_segments(path) {
            if segment == ".." {
                return Err(DeviceError::ProtocolError(format!(
                    "Path escapes device root: {}",
                    path
                )));
            }
            full.push(segment);
        }
        Ok(full)
    }
}

fn map_io(err: io::Error, path: &Path) -> DeviceError {
    match err.kind() {
        io::ErrorKind::NotFound => DeviceError::FileNotFound(path.to_string_lossy().to_string()),
        io::ErrorKind::AlreadyExists => {
            DeviceError::AlreadyExists(path.to_string_lossy().to_string())
        }
        _ => DeviceError::IoError(err),
    }
}

impl DeviceConnection for MountConnection {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.open && self.base.is_dir()
    }

    fn disconnect(&mut self) {
        self.open = false;
    }

    fn file_exists(&mut self, path: &str) -> Result<bool, DeviceError> {
        Ok(self.local(path)?.is_file())
    }

    fn dir_exists(&mut self, path: &str) -> Result<bool, DeviceError> {
        Ok(self.local(path)?.is_dir())
    }

    fn create_dir(&mut self, path: &str) -> Result<(), DeviceError> {
        let full = self.local(path)?;
        fs::create_dir(&full).map_err(|e| map_io(e, &full))
    }

    fn list(&mut self, path: &str) -> Result<Vec<DeviceEntry>, DeviceError> {
        let full = self.local(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| map_io(e, &full))? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(DeviceEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        Ok(entries)
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, DeviceError> {
        let full = self.local(path)?;
        let mut file = fs::File::open(&full).map_err(|e| map_io(e, &full))?;
        Ok(io::copy(&mut file, sink)?)
    }

    fn upload(&mut self, source: &mut dyn Read, path: &str) -> Result<u64, DeviceError> {
        let full = self.local(path)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .map_err(|e| map_io(e, &full))?;
        let written = io::copy(source, &mut file)?;
        file.flush()?;
        Ok(written)
    }

    fn delete_file(&mut self, path: &str) -> Result<(), DeviceError> {
        let full = self.local(path)?;
        fs::remove_file(&full).map_err(|e| map_io(e, &full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_enumerate_and_round_trip() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("mtp:host=Retroid_Pocket_5_ABC")).unwrap();
        fs::write(temp.path().join("not-a-device.txt"), b"x").unwrap();

        let mut driver = MountDriver::new(temp.path());
        let devices = driver.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].description, "Retroid Pocket 5 ABC");

        let mut conn = driver.connect(&devices[0]).unwrap();
        conn.create_dir("Games").unwrap();
        conn.upload(&mut &b"data"[..], "Games\\a.bin").unwrap();
        assert!(conn.file_exists("Games\\a.bin").unwrap());
        assert!(matches!(
            conn.upload(&mut &b"again"[..], "Games\\a.bin"),
            Err(DeviceError::AlreadyExists(_))
        ));

        let mut out = Vec::new();
        conn.download("Games\\a.bin", &mut out).unwrap();
        assert_eq!(out, b"data");

        conn.delete_file("Games\\a.bin").unwrap();
        assert!(conn.delete_file("Games\\a.bin").unwrap_err().is_not_found());
    }

    #[test]
    fn test_parent_segments_rejected() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("dev")).unwrap();
        let mut driver = MountDriver::new(temp.path());
        let device = driver.enumerate().unwrap().remove(0);
        let mut conn = driver.connect(&device).unwrap();
        assert!(conn.file_exists("..\\..\\etc\\passwd").is_err());
    }

    #[test]
    fn test_missing_root_has_no_devices() {
        let mut driver = MountDriver::new("/definitely/not/a/mount/root");
        assert!(driver.enumerate().unwrap().is_empty());
    }
}
