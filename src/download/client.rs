//! HTTP client profiles
//!
//! One `reqwest::Client` per [`SourceTag`], each with its own timeout,
//! User-Agent and default headers. Clients are built once and shared; they
//! pool connections internally.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::error::DownloadError;
use crate::config::{AppConfig, HttpProfile, SourceTag};

pub struct HttpClients {
    clients: HashMap<SourceTag, reqwest::Client>,
    fallback: reqwest::Client,
}

impl HttpClients {
    pub fn from_config(config: &AppConfig) -> Result<Self, DownloadError> {
        let mut clients = HashMap::new();
        for tag in SourceTag::ALL {
            clients.insert(tag, build_client(&config.http_profile(tag))?);
        }
        Ok(Self {
            clients,
            fallback: build_client(&HttpProfile::default())?,
        })
    }

    /// Client for a source
    pub fn get(&self, tag: SourceTag) -> &reqwest::Client {
        self.clients.get(&tag).unwrap_or(&self.fallback)
    }
}

pub fn build_client(profile: &HttpProfile) -> Result<reqwest::Client, DownloadError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &profile.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::InvalidProfile(format!("header {}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| DownloadError::InvalidProfile(format!("header {}: {}", name, e)))?;
        headers.insert(header_name, header_value);
    }

    debug!(
        "Building HTTP client (timeout {}s, {} extra headers)",
        profile.timeout_secs,
        headers.len()
    );

    Ok(reqwest::Client::builder()
        .user_agent(profile.user_agent.as_str())
        .timeout(Duration::from_secs(profile.timeout_secs.max(1)))
        .default_headers(headers)
        .build()?)
}
