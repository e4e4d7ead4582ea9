//! Portable device access
//!
//! Device connections are thread-affine. Everything that touches a driver
//! runs on the single device thread owned by [`owner`]; the rest of the
//! crate talks to it through a cloneable [`DeviceController`].

pub mod driver;
pub mod error;
pub mod memory;
pub mod mounted;
pub mod owner;
pub mod registry;

pub use driver::{
    driver_factory, DeviceConnection, DeviceDriver, DeviceEntry, DeviceInfo, DriverFactory,
    DEVICE_SEPARATOR,
};
pub use error::DeviceError;
pub use memory::{MemoryDevice, MemoryDriver};
pub use mounted::MountDriver;
pub use owner::{spawn_device_thread, DeviceController, DEVICE_THREAD_NAME};
pub use registry::DeviceRegistry;
