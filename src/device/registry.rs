//! Device Connection Registry
//!
//! Caches live device connections keyed by device id, with a lookup table
//! from requested names to ids. Owned by the device thread: every method
//! takes `&mut self` and is only reachable from inside a work item, so no
//! locking is involved.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::driver::{DeviceConnection, DeviceDriver, DeviceInfo};
use super::error::DeviceError;

/// Registry for device connections (device thread only)
pub struct DeviceRegistry {
    driver: Box<dyn DeviceDriver>,
    /// device id -> live connection
    connections: HashMap<String, Box<dyn DeviceConnection>>,
    /// lowercase requested name -> device id
    aliases: HashMap<String, String>,
}

impl DeviceRegistry {
    /// Create a new registry around a driver
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            connections: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Currently visible devices
    pub fn visible_devices(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let devices = self.driver.enumerate()?;
        debug!("Enumerated {} visible devices", devices.len());
        Ok(devices)
    }

    /// Friendly names of currently visible devices
    pub fn visible_device_names(&mut self) -> Result<Vec<String>, DeviceError> {
        Ok(self
            .visible_devices()?
            .into_iter()
            .map(|d| d.friendly_name)
            .collect())
    }

    /// Resolve a device name to the id of a live connection, connecting if needed.
    ///
    /// A cached entry that reports itself disconnected is dropped and replaced.
    pub fn resolve(&mut self, name: &str) -> Result<String, DeviceError> {
        let alias = name.to_lowercase();

        if let Some(id) = self.aliases.get(&alias).cloned() {
            match self.connections.get(&id) {
                Some(conn) if conn.is_connected() => return Ok(id),
                Some(_) => {
                    warn!("Cached connection to {} is dead, reconnecting", name);
                    if let Some(mut dead) = self.connections.remove(&id) {
                        dead.disconnect();
                    }
                }
                None => {}
            }
            self.aliases.remove(&alias);
        }

        let device = self
            .driver
            .enumerate()?
            .into_iter()
            .find(|d| d.matches_name(name))
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))?;

        // Another alias may already hold a live connection to this device
        let live = self
            .connections
            .get(&device.id)
            .map(|c| c.is_connected())
            .unwrap_or(false);

        if !live {
            if let Some(mut stale) = self.connections.remove(&device.id) {
                stale.disconnect();
            }
            let conn = self.driver.connect(&device)?;
            info!(
                "Connected to device {} ({}), total connections: {}",
                device.friendly_name,
                device.id,
                self.connections.len() + 1
            );
            self.connections.insert(device.id.clone(), conn);
        }

        self.aliases.insert(alias, device.id.clone());
        Ok(device.id)
    }

    /// Get a cached live connection, or connect to the named device
    pub fn get_or_connect(&mut self, name: &str) -> Result<&mut dyn DeviceConnection, DeviceError> {
        let id = self.resolve(name)?;
        self.connection_by_id(&id)
    }

    /// Connection for an id returned by [`resolve`](Self::resolve)
    pub fn connection_by_id(&mut self, id: &str) -> Result<&mut dyn DeviceConnection, DeviceError> {
        match self.connections.get_mut(id) {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(DeviceError::DeviceNotFound(id.to_string())),
        }
    }

    /// Number of cached connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Tear down every cached connection
    pub fn disconnect_all(&mut self) {
        for (id, mut conn) in self.connections.drain() {
            info!("Disconnecting device: {}", id);
            conn.disconnect();
        }
        self.aliases.clear();
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.disconnect_all();
        debug!("DeviceRegistry dropped");
    }
}
