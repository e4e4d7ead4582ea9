//! Portable device driver seam
//!
//! The native device API is thread-affine, so neither trait requires `Send`.
//! A driver is built by a [`DriverFactory`] *on* the device thread and never
//! leaves it; every call below happens on that one thread.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::error::DeviceError;

/// Separator used by device-relative paths
pub const DEVICE_SEPARATOR: char = '\\';

/// A device visible to the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Driver-specific stable identifier
    pub id: String,
    /// Name shown to the user, e.g. "Pixel 7"
    pub friendly_name: String,
    /// Model/description string reported by the device
    pub description: String,
}

impl DeviceInfo {
    /// Case-insensitive match against friendly name or description
    pub fn matches_name(&self, name: &str) -> bool {
        self.friendly_name.eq_ignore_ascii_case(name) || self.description.eq_ignore_ascii_case(name)
    }
}

/// Directory entry on a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Enumerates devices and opens connections.
pub trait DeviceDriver {
    /// Currently reachable devices
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Open a connection to a device previously returned by `enumerate`
    fn connect(&mut self, device: &DeviceInfo) -> Result<Box<dyn DeviceConnection>, DeviceError>;
}

/// A live connection to one device.
///
/// Paths are device-relative, `\`-separated, without the remote prefix.
/// An empty path or `\` denotes the device root.
pub trait DeviceConnection {
    fn info(&self) -> &DeviceInfo;

    fn is_connected(&self) -> bool;

    fn disconnect(&mut self);

    fn file_exists(&mut self, path: &str) -> Result<bool, DeviceError>;

    fn dir_exists(&mut self, path: &str) -> Result<bool, DeviceError>;

    /// Create a single directory level; the parent must exist
    fn create_dir(&mut self, path: &str) -> Result<(), DeviceError>;

    fn list(&mut self, path: &str) -> Result<Vec<DeviceEntry>, DeviceError>;

    /// Stream a file's content into `sink`, returning the byte count
    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, DeviceError>;

    /// Upload `source` to a new file; fails with `AlreadyExists` if the file
    /// is present (the protocol has no atomic overwrite)
    fn upload(&mut self, source: &mut dyn Read, path: &str) -> Result<u64, DeviceError>;

    fn delete_file(&mut self, path: &str) -> Result<(), DeviceError>;
}

/// Builds the driver on the device thread
pub type DriverFactory = Box<dyn FnOnce() -> Box<dyn DeviceDriver> + Send>;

/// Box a driver constructor as a [`DriverFactory`]
pub fn driver_factory<D, F>(build: F) -> DriverFactory
where
    D: DeviceDriver + 'static,
    F: FnOnce() -> D + Send + 'static,
{
    Box::new(move || Box::new(build()) as Box<dyn DeviceDriver>)
}

/// Split a device path into its non-empty segments, accepting either separator
pub fn device_segments(path: &str) -> Vec<&str> {
    path.split(['\\', '/'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Canonical form of a device path: segments joined by `\`, no leading separator
pub fn normalize_device_path(path: &str) -> String {
    device_segments(path).join(&DEVICE_SEPARATOR.to_string())
}

/// Parent directory of a device path (root for top-level entries)
pub fn device_parent(path: &str) -> String {
    let segments = device_segments(path);
    match segments.split_last() {
        Some((_, parent)) => parent.join(&DEVICE_SEPARATOR.to_string()),
        None => String::new(),
    }
}
