//! Download Coordinator
//!
//! Turns a URL into a local temp file.
//!
//! # Coalescing
//!
//! Concurrent requests for the same URL share one in-flight operation,
//! tracked in a `DashMap` from URL to a [`Shared`] future. The map entry is
//! claimed atomically through the entry API, so two callers can never both
//! start a transfer.
//!
//! - A failed download is removed from the map, so the next request retries
//!   from scratch.
//! - A successful download stays in the map and later requests get the same
//!   path, as long as that file still exists. A cached path whose file is
//!   gone (temp cleanup) is treated as stale and downloaded again.
//!
//! # Cancellation
//!
//! Each caller's token only stops that caller from waiting. The shared
//! operation runs under a token owned by its map entry, which is cancelled
//! once the last waiting caller has gone. An entry cancelled that way is
//! stale, so a later request starts over.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::HttpClients;
use super::error::DownloadError;
use super::extractor::{ExternalTool, MediaOptions};
use super::progress::{DownloadProgress, ProgressReporter, PROGRESS_CHANNEL_CAPACITY};
use super::retry::{with_retry, RetryPolicy};
use crate::config::{AppConfig, SourceTag, ToolSettings};
use crate::storage::path_utils::extension;
use crate::storage::TempFolder;

type SharedDownload = Shared<BoxFuture<'static, Option<PathBuf>>>;

/// One URL's operation plus the callers currently awaiting it
struct InFlight {
    shared: SharedDownload,
    cancel: CancellationToken,
    waiters: usize,
}

impl InFlight {
    /// Finished with a failure, or abandoned by every caller before finishing
    fn failed_or_abandoned(&self) -> bool {
        match self.shared.peek() {
            Some(result) => result.is_none(),
            None => self.cancel.is_cancelled(),
        }
    }
}

/// Registration of one caller on an entry; leaving cancels the operation
/// when nobody else is waiting for it
struct Waiter<'a> {
    inner: &'a Inner,
    url: &'a str,
    shared: SharedDownload,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let Some(mut entry) = self.inner.in_flight.get_mut(self.url) else {
            return;
        };
        if !entry.shared.ptr_eq(&self.shared) {
            return;
        }
        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 && entry.shared.peek().is_none() {
            debug!("No callers left waiting for {}, cancelling", self.url);
            entry.cancel.cancel();
        }
    }
}

struct Inner {
    clients: HttpClients,
    temp: TempFolder,
    policy: RetryPolicy,
    progress_interval: Duration,
    tool: ExternalTool,
    tool_settings: ToolSettings,
    in_flight: DashMap<String, InFlight>,
    progress_tx: broadcast::Sender<DownloadProgress>,
}

/// Fetches URLs into the temp folder (cheap to clone)
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    pub fn new(config: &AppConfig, temp: TempFolder) -> Result<Self, DownloadError> {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                clients: HttpClients::from_config(config)?,
                tool: ExternalTool::new(&config.tool, temp.clone()),
                tool_settings: config.tool.clone(),
                temp,
                policy: RetryPolicy::from_settings(&config.download),
                progress_interval: Duration::from_millis(config.download.progress_interval_ms),
                in_flight: DashMap::new(),
                progress_tx,
            }),
        })
    }

    /// Subscribe to progress events for every download
    pub fn subscribe_progress(&self) -> broadcast::Receiver<DownloadProgress> {
        self.inner.progress_tx.subscribe()
    }

    pub fn tool(&self) -> &ExternalTool {
        &self.inner.tool
    }

    /// Number of URLs in the in-flight / completed map
    pub fn tracked_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Download `url` into a new temp file.
    ///
    /// Returns `None` on any failure or cancellation; the reason is logged.
    pub async fn download_to_file(
        &self,
        url: &str,
        source: SourceTag,
        cancel: &CancellationToken,
    ) -> Option<PathBuf> {
        if cancel.is_cancelled() {
            return None;
        }

        let missing = self.missing_cached_file(url).await;
        let shared = self.claim(url, source, missing.as_ref());
        let _waiter = Waiter {
            inner: &self.inner,
            url,
            shared: shared.clone(),
        };

        tokio::select! {
            result = shared.clone() => {
                if result.is_none() {
                    self.forget(url, &shared);
                }
                result
            }
            _ = cancel.cancelled() => {
                debug!("Stopped waiting for {}", url);
                None
            }
        }
    }

    /// Run the external tool directly with explicit options (not coalesced)
    pub async fn download_media(
        &self,
        url: &str,
        options: &MediaOptions,
        cancel: &CancellationToken,
    ) -> Option<PathBuf> {
        let mut reporter = self.inner.reporter(url);
        match self
            .inner
            .tool
            .download(url, options, cancel, |p| reporter.report(p))
            .await
        {
            Ok(path) => {
                reporter.complete();
                Some(path)
            }
            Err(e) => {
                warn!("Media extraction of {} failed: {}", url, e);
                None
            }
        }
    }

    /// The finished entry for `url` if its cached file no longer exists.
    ///
    /// Checked before [`claim`](Self::claim) so no filesystem call happens
    /// under the map's shard lock.
    async fn missing_cached_file(&self, url: &str) -> Option<SharedDownload> {
        let (shared, path) = {
            let entry = self.inner.in_flight.get(url)?;
            let path = entry.shared.peek()?.clone()?;
            (entry.shared.clone(), path)
        };
        let present = fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false);
        (!present).then_some(shared)
    }

    /// Join the shared operation for `url`, starting one if there is none
    /// or the current one is stale
    fn claim(
        &self,
        url: &str,
        source: SourceTag,
        missing: Option<&SharedDownload>,
    ) -> SharedDownload {
        let mut entry = match self.inner.in_flight.entry(url.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let file_gone = missing.is_some_and(|m| m.ptr_eq(&current.shared));
                if file_gone || current.failed_or_abandoned() {
                    debug!("Cached download of {} is stale, restarting", url);
                    entry.insert(self.start(url, source));
                } else {
                    debug!("Joining existing download of {}", url);
                }
                entry.into_ref()
            }
            Entry::Vacant(entry) => entry.insert(self.start(url, source)),
        };
        entry.waiters += 1;
        entry.shared.clone()
    }

    /// Drop a failed entry, unless it was already replaced
    fn forget(&self, url: &str, shared: &SharedDownload) {
        if self
            .inner
            .in_flight
            .remove_if(url, |_, current| current.shared.ptr_eq(shared))
            .is_some()
        {
            debug!("Removed failed download of {} from cache", url);
        }
    }

    fn start(&self, url: &str, source: SourceTag) -> InFlight {
        let inner = self.inner.clone();
        let url = url.to_string();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let label = url.clone();

        let handle =
            tokio::spawn(async move { run_download(&inner, &url, source, &task_cancel).await });

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Download task for {} failed: {}", label, e);
                    None
                }
            }
        }
        .boxed()
        .shared();

        InFlight {
            shared,
            cancel,
            waiters: 0,
        }
    }
}

impl Inner {
    fn reporter(&self, url: &str) -> ProgressReporter {
        ProgressReporter::new(url, self.progress_tx.clone(), self.progress_interval)
    }
}

async fn run_download(
    inner: &Inner,
    url: &str,
    source: SourceTag,
    cancel: &CancellationToken,
) -> Option<PathBuf> {
    let result = if source.uses_external_tool() {
        let options = MediaOptions::video(&inner.tool_settings);
        let mut reporter = inner.reporter(url);
        let result = inner
            .tool
            .download(url, &options, cancel, |p| reporter.report(p))
            .await;
        if result.is_ok() {
            reporter.complete();
        }
        result.map_err(DownloadError::from)
    } else {
        with_retry(url, &inner.policy, cancel, |attempt| {
            fetch_once(inner, url, source, cancel, attempt)
        })
        .await
    };

    match result {
        Ok(path) => {
            info!("Downloaded {} to {:?}", url, path);
            Some(path)
        }
        Err(DownloadError::Cancelled) => {
            info!("Download of {} cancelled", url);
            None
        }
        Err(e) => {
            warn!("Download of {} failed: {}", url, e);
            None
        }
    }
}

/// One GET attempt, streamed into a fresh temp file
async fn fetch_once(
    inner: &Inner,
    url: &str,
    source: SourceTag,
    cancel: &CancellationToken,
    attempt: u32,
) -> Result<PathBuf, DownloadError> {
    debug!("GET {} (attempt {})", url, attempt);
    let request = inner.clients.get(source).get(url).send();
    let mut response = tokio::select! {
        response = request => response.map_err(|e| DownloadError::from_request(url, e))?,
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let total = response.content_length().filter(|len| *len > 0);
    let path = inner.temp.allocate(&extension_hint(url)).await?;
    let mut reporter = inner.reporter(url);

    let written = async {
        let mut file = fs::File::create(&path).await?;
        let mut received: u64 = 0;
        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk.map_err(|e| DownloadError::from_request(url, e))?,
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            };
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(total) = total {
                reporter.report(received as f64 * 100.0 / total as f64);
            }
        }
        file.flush().await?;
        Ok::<u64, DownloadError>(received)
    }
    .await;

    match written {
        Ok(received) => {
            reporter.complete();
            debug!("Received {} bytes from {}", received, url);
            Ok(path)
        }
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&path).await {
                debug!("Failed to remove partial {:?}: {}", path, remove_err);
            }
            Err(e)
        }
    }
}

/// Short alphanumeric extension from the URL path, or `tmp`
fn extension_hint(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| extension(u.path()))
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| "tmp".to_string())
}
