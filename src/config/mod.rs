//! Configuration Management Module
//!
//! Persistent application settings: download retry policy, per-source HTTP
//! client profiles and external tool options.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigError, ConfigStorage};
pub use types::{
    AppConfig, DownloadSettings, HttpProfile, SourceTag, ToolSettings, CONFIG_VERSION,
    DEFAULT_USER_AGENT,
};
