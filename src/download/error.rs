//! Download error types

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid HTTP profile: {0}")]
    InvalidProfile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("External tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Download task failed: {0}")]
    TaskFailed(String),

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Wrap a transport error, pulling timeouts out into their own variant
    pub fn from_request(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout(url.to_string())
        } else {
            DownloadError::Request(err)
        }
    }
}

/// External tool failures
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code:?}")]
    ExitStatus { program: String, code: Option<i32> },

    #[error("No output file for token {0}")]
    NoOutput(String),

    #[error("Output file is empty: {0:?}")]
    EmptyOutput(PathBuf),

    #[error("Invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Extraction cancelled")]
    Cancelled,
}
