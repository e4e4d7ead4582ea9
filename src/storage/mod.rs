//! Storage Module
//!
//! Unified file access over the local filesystem and portable devices.
//!
//! # Paths
//!
//! Callers pass plain strings. A string starting with [`REMOTE_PREFIX`]
//! (`remote:\<device>\<path>`) is a device path; anything else is a local
//! OS path. Use [`combine_path`] and the other helpers in [`path_utils`]
//! instead of parsing the convention by hand.

pub mod error;
pub mod path_utils;
pub mod store;
pub mod temp;
pub mod transfer;
pub mod types;

pub use error::StorageError;
pub use path_utils::{
    classify, combine_path, extension, file_name, file_stem, is_remote, parent_path,
    sanitize_file_name, StoragePath, REMOTE_PREFIX,
};
pub use store::FileStore;
pub use temp::TempFolder;
pub use types::{wildcard_matches, BatchResult, EntryKind, TransferMode};
