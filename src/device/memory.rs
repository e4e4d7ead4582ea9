//! In-memory device driver
//!
//! Simulates portable devices without hardware. State is shared between
//! clones, so a test (or a dry run) can hand one clone to the device thread
//! and inspect or seed files through another.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::driver::{
    device_parent, normalize_device_path, DeviceConnection, DeviceDriver, DeviceEntry, DeviceInfo,
    DEVICE_SEPARATOR,
};
use super::error::DeviceError;

/// Seed description of a simulated device
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    info: DeviceInfo,
}

impl MemoryDevice {
    pub fn new(id: &str, friendly_name: &str, description: &str) -> Self {
        Self {
            info: DeviceInfo {
                id: id.to_string(),
                friendly_name: friendly_name.to_string(),
                description: description.to_string(),
            },
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    info: DeviceInfo,
    visible: bool,
    generation: u64,
    connect_count: usize,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    undeletable: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct DriverState {
    devices: Vec<DeviceState>,
    latency: Duration,
}

impl DriverState {
    fn device_mut(&mut self, id: &str) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|d| d.info.id == id)
    }
}

/// Driver over simulated in-memory devices
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<DriverState>>,
}

impl MemoryDriver {
    pub fn new(devices: Vec<MemoryDevice>) -> Self {
        let devices = devices
            .into_iter()
            .map(|d| DeviceState {
                info: d.info,
                visible: true,
                generation: 0,
                connect_count: 0,
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                undeletable: BTreeSet::new(),
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(DriverState {
                devices,
                latency: Duration::ZERO,
            })),
        }
    }

    /// Delay applied to every upload/download, to simulate a slow link
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Show or hide a device from enumeration; hiding also kills its connections
    pub fn set_visible(&self, id: &str, visible: bool) {
        if let Some(device) = self.state.lock().device_mut(id) {
            device.visible = visible;
            if !visible {
                device.generation += 1;
            }
        }
    }

    /// Invalidate every open connection to a device (simulates unplug/replug)
    pub fn drop_connections(&self, id: &str) {
        if let Some(device) = self.state.lock().device_mut(id) {
            device.generation += 1;
        }
    }

    /// How many times `connect` succeeded for a device
    pub fn connect_count(&self, id: &str) -> usize {
        self.state
            .lock()
            .device_mut(id)
            .map(|d| d.connect_count)
            .unwrap_or(0)
    }

    /// Seed a file, creating parent directories
    pub fn put_file(&self, id: &str, path: &str, content: &[u8]) {
        let mut state = self.state.lock();
        if let Some(device) = state.device_mut(id) {
            let path = normalize_device_path(path);
            let mut parent = String::new();
            for segment in device_parent(&path).split(DEVICE_SEPARATOR).filter(|s| !s.is_empty()) {
                if !parent.is_empty() {
                    parent.push(DEVICE_SEPARATOR);
                }
                parent.push_str(segment);
                device.dirs.insert(parent.clone());
            }
            device.files.insert(path, content.to_vec());
        }
    }

    /// Make every later delete of `path` fail with a protocol error
    pub fn fail_delete(&self, id: &str, path: &str) {
        if let Some(device) = self.state.lock().device_mut(id) {
            device.undeletable.insert(normalize_device_path(path));
        }
    }

    /// Content of a file, if present
    pub fn file(&self, id: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .device_mut(id)
            .and_then(|d| d.files.get(&normalize_device_path(path)).cloned())
    }

    /// Whether a directory exists
    pub fn has_dir(&self, id: &str, path: &str) -> bool {
        let path = normalize_device_path(path);
        self.state
            .lock()
            .device_mut(id)
            .map(|d| path.is_empty() || d.dirs.contains(&path))
            .unwrap_or(false)
    }
}

impl DeviceDriver for MemoryDriver {
    fn enumerate(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .filter(|d| d.visible)
            .map(|d| d.info.clone())
            .collect())
    }

    fn connect(&mut self, device: &DeviceInfo) -> Result<Box<dyn DeviceConnection>, DeviceError> {
        let mut state = self.state.lock();
        let entry = state
            .device_mut(&device.id)
            .filter(|d| d.visible)
            .ok_or_else(|| DeviceError::DeviceNotFound(device.friendly_name.clone()))?;
        entry.connect_count += 1;
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            info: entry.info.clone(),
            generation: entry.generation,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<DriverState>>,
    info: DeviceInfo,
    generation: u64,
    closed: bool,
}

impl MemoryConnection {
    fn with_device<R>(
        &self,
        f: impl FnOnce(&mut DeviceState) -> Result<R, DeviceError>,
    ) -> Result<R, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::Disconnected);
        }
        let mut state = self.state.lock();
        let device = state
            .device_mut(&self.info.id)
            .ok_or_else(|| DeviceError::DeviceNotFound(self.info.friendly_name.clone()))?;
        f(device)
    }

    fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
    }
}

fn dir_present(device: &DeviceState, path: &str) -> bool {
    path.is_empty() || device.dirs.contains(path)
}

impl DeviceConnection for MemoryConnection {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        if self.closed {
            return false;
        }
        let mut state = self.state.lock();
        state
            .device_mut(&self.info.id)
            .map(|d| d.visible && d.generation == self.generation)
            .unwrap_or(false)
    }

    fn disconnect(&mut self) {
        self.closed = true;
    }

    fn file_exists(&mut self, path: &str) -> Result<bool, DeviceError> {
        let path = normalize_device_path(path);
        self.with_device(|d| Ok(d.files.contains_key(&path)))
    }

    fn dir_exists(&mut self, path: &str) -> Result<bool, DeviceError> {
        let path = normalize_device_path(path);
        self.with_device(|d| Ok(dir_present(d, &path)))
    }

    fn create_dir(&mut self, path: &str) -> Result<(), DeviceError> {
        let path = normalize_device_path(path);
        self.with_device(|d| {
            if dir_present(d, &path) || d.files.contains_key(&path) {
                return Err(DeviceError::AlreadyExists(path.clone()));
            }
            if !dir_present(d, &device_parent(&path)) {
                return Err(DeviceError::FileNotFound(device_parent(&path)));
            }
            d.dirs.insert(path.clone());
            Ok(())
        })
    }

    fn list(&mut self, path: &str) -> Result<Vec<DeviceEntry>, DeviceError> {
        let path = normalize_device_path(path);
        self.with_device(|d| {
            if !dir_present(d, &path) {
                return Err(DeviceError::FileNotFound(path.clone()));
            }
            let mut entries: Vec<DeviceEntry> = d
                .dirs
                .iter()
                .filter(|dir| !dir.is_empty() && device_parent(dir) == path)
                .map(|dir| DeviceEntry {
                    name: leaf(dir).to_string(),
                    is_dir: true,
                    size: 0,
                })
                .collect();
            entries.extend(
                d.files
                    .iter()
                    .filter(|(file, _)| device_parent(file) == path)
                    .map(|(file, content)| DeviceEntry {
                        name: leaf(file).to_string(),
                        is_dir: false,
                        size: content.len() as u64,
                    }),
            );
            Ok(entries)
        })
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> Result<u64, DeviceError> {
        self.simulate_latency();
        let path = normalize_device_path(path);
        let content = self.with_device(|d| {
            d.files
                .get(&path)
                .cloned()
                .ok_or_else(|| DeviceError::FileNotFound(path.clone()))
        })?;
        sink.write_all(&content)?;
        Ok(content.len() as u64)
    }

    fn upload(&mut self, source: &mut dyn Read, path: &str) -> Result<u64, DeviceError> {
        self.simulate_latency();
        let path = normalize_device_path(path);
        let mut content = Vec::new();
        source.read_to_end(&mut content)?;
        self.with_device(|d| {
            if d.files.contains_key(&path) {
                return Err(DeviceError::AlreadyExists(path.clone()));
            }
            if !dir_present(d, &device_parent(&path)) {
                return Err(DeviceError::FileNotFound(device_parent(&path)));
            }
            let len = content.len() as u64;
            d.files.insert(path.clone(), content);
            Ok(len)
        })
    }

    fn delete_file(&mut self, path: &str) -> Result<(), DeviceError> {
        let path = normalize_device_path(path);
        self.with_device(|d| {
            if d.undeletable.contains(&path) {
                return Err(DeviceError::ProtocolError(format!("delete refused: {}", path)));
            }
            d.files
                .remove(&path)
                .map(|_| ())
                .ok_or_else(|| DeviceError::FileNotFound(path.clone()))
        })
    }
}

fn leaf(path: &str) -> &str {
    path.rsplit(DEVICE_SEPARATOR).next().unwrap_or(path)
}
