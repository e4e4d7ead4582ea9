//! Download Module
//!
//! Fetches remote content into the temp folder: direct HTTP downloads with
//! retry and request coalescing, and external-tool extraction for sources
//! that need it.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod progress;
pub mod retry;

pub use client::HttpClients;
pub use coordinator::DownloadCoordinator;
pub use error::{DownloadError, ToolError};
pub use extractor::{parse_progress, ExternalTool, MediaInfo, MediaOptions};
pub use progress::{DownloadProgress, ProgressThrottle};
pub use retry::{calculate_backoff, is_retryable_error, is_transient_status, RetryPolicy};
