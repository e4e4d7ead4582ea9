//! Device error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("File not found on device: {0}")]
    FileNotFound(String),

    #[error("Already exists on device: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Device protocol error: {0}")]
    ProtocolError(String),

    #[error("Device work item panicked: {0}")]
    WorkPanicked(String),

    #[error("Device thread stopped")]
    ThreadStopped,

    #[error("Disconnected")]
    Disconnected,
}

impl DeviceError {
    /// Absent device or absent file, as opposed to a failed operation
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DeviceError::DeviceNotFound(_) | DeviceError::FileNotFound(_)
        )
    }
}
