//! External tool orchestration
//!
//! Some sources (streaming video hosts) cannot be fetched with a plain GET.
//! For those we shell out to a yt-dlp compatible helper: build its
//! arguments, stream stdout for progress, then locate the produced file in
//! the temp folder by a unique token embedded in the output template.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ToolError;
use crate::config::ToolSettings;
use crate::storage::path_utils::extension;
use crate::storage::TempFolder;

/// Percentage token in the helper's progress lines, e.g. `[download]  42.3% of 10MiB`
static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)%").ok());

/// Extensions of in-progress or intermediate files the helper may leave
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp"];

/// Lines of stderr kept for failure diagnostics
const STDERR_TAIL_LINES: usize = 20;

/// What to extract
#[derive(Debug, Clone, PartialEq)]
pub struct MediaOptions {
    /// Format selector (`-f`); ignored for audio extraction
    pub format: Option<String>,
    /// Extract audio only, converted to this codec
    pub audio_format: Option<String>,
    /// Expected extension of the final file
    pub target_extension: String,
    /// Only fetch the first N seconds
    pub max_duration_secs: Option<u32>,
}

impl MediaOptions {
    /// Video extraction with the configured format and container
    pub fn video(settings: &ToolSettings) -> Self {
        Self {
            format: Some(settings.format.clone()).filter(|f| !f.is_empty()),
            audio_format: None,
            target_extension: settings.target_extension.clone(),
            max_duration_secs: settings.max_duration_secs,
        }
    }

    /// Audio-only extraction (music assets)
    pub fn audio(audio_format: &str) -> Self {
        Self {
            format: None,
            audio_format: Some(audio_format.to_string()),
            target_extension: audio_format.to_string(),
            max_duration_secs: None,
        }
    }

    pub fn with_max_duration(mut self, secs: u32) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }
}

/// Structured info the helper emits with `--dump-json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    /// Entry URL (flat playlist records)
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Handle to the external extraction helper
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: String,
    extra_args: Vec<String>,
    temp: TempFolder,
}

impl ExternalTool {
    pub fn new(settings: &ToolSettings, temp: TempFolder) -> Self {
        Self {
            program: settings.program.clone(),
            extra_args: settings.extra_args.clone(),
            temp,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list for a media download
    pub fn build_args(&self, url: &str, options: &MediaOptions, token: &str) -> Vec<String> {
        let mut args = self.extra_args.clone();

        match &options.audio_format {
            Some(audio_format) => {
                args.extend(["-x".into(), "--audio-format".into(), audio_format.clone()]);
            }
            None => {
                if let Some(format) = &options.format {
                    args.extend(["-f".into(), format.clone()]);
                }
                if !options.target_extension.is_empty() {
                    args.extend([
                        "--merge-output-format".into(),
                        options.target_extension.clone(),
                    ]);
                }
            }
        }

        if let Some(secs) = options.max_duration_secs {
            args.extend(["--download-sections".into(), format!("*0-{}", secs)]);
        }

        let template = self.temp.path().join(format!("{}.%(ext)s", token));
        args.extend([
            "--no-playlist".into(),
            "--newline".into(),
            "--no-part".into(),
            "-o".into(),
            template.to_string_lossy().to_string(),
            url.to_string(),
        ]);
        args
    }

    /// Download media into the temp folder.
    ///
    /// `on_progress` receives each percentage parsed from stdout.
    pub async fn download<F>(
        &self,
        url: &str,
        options: &MediaOptions,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PathBuf, ToolError>
    where
        F: FnMut(f64) + Send,
    {
        self.temp.ensure().await?;
        let token = TempFolder::unique_token();
        let args = self.build_args(url, options, &token);
        info!("Extracting {} with {}", url, self.program);
        debug!("{} {:?}", self.program, args);

        let mut child = self.spawn(&args)?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(tail_lines(stderr)));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Io(std::io::Error::other("stdout not captured")))?;

        let mut lines = BufReader::new(stdout).split(b'\n');
        loop {
            tokio::select! {
                line = lines.next_segment() => match line? {
                    Some(raw) => {
                        let line = decode_line(&raw);
                        if let Some(percent) = parse_progress(&line) {
                            on_progress(percent);
                        }
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    return Err(self.abort(&mut child, &token).await);
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                return Err(self.abort(&mut child, &token).await);
            }
        };

        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            warn!(
                "{} failed for {} ({:?}): {}",
                self.program,
                url,
                status.code(),
                stderr_tail
            );
            self.remove_outputs(&token).await;
            return Err(ToolError::ExitStatus {
                program: self.program.clone(),
                code: status.code(),
            });
        }

        let path = self.resolve_output(&token, &options.target_extension).await?;
        info!("Extracted {} to {:?}", url, path);
        Ok(path)
    }

    /// Metadata for a single media URL, without downloading it
    pub async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo, ToolError> {
        let stdout = self
            .run_capture(&["--skip-download", "--dump-json", "--no-playlist", url])
            .await?;
        let line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        Ok(serde_json::from_str(line)?)
    }

    /// One record per entry of a playlist or channel
    pub async fn fetch_playlist(&self, url: &str) -> Result<Vec<MediaInfo>, ToolError> {
        let stdout = self
            .run_capture(&["--flat-playlist", "--dump-json", url])
            .await?;

        let mut entries = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<MediaInfo>(line) {
                Ok(info) => entries.push(info),
                Err(e) => warn!("Skipping malformed playlist entry from {}: {}", url, e),
            }
        }
        debug!("Playlist {} has {} entries", url, entries.len());
        Ok(entries)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn spawn(&self, args: &[String]) -> Result<Child, ToolError> {
        self.command(args).spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String, ToolError> {
        let mut full: Vec<String> = self.extra_args.clone();
        full.extend(args.iter().map(|a| a.to_string()));

        let output = self
            .command(&full)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            warn!(
                "{} metadata query failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(ToolError::ExitStatus {
                program: self.program.clone(),
                code: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn abort(&self, child: &mut Child, token: &str) -> ToolError {
        info!("Cancelling {}", self.program);
        if let Err(e) = child.kill().await {
            debug!("Failed to kill {}: {}", self.program, e);
        }
        self.remove_outputs(token).await;
        ToolError::Cancelled
    }

    /// Pick the produced file among everything carrying `token`
    async fn resolve_output(
        &self,
        token: &str,
        target_extension: &str,
    ) -> Result<PathBuf, ToolError> {
        let candidates = self.temp.find_by_token(token).await?;
        let chosen = choose_output(&candidates, target_extension)
            .ok_or_else(|| ToolError::NoOutput(token.to_string()))?;

        let len = tokio::fs::metadata(&chosen).await?.len();
        if len == 0 {
            self.remove_outputs(token).await;
            return Err(ToolError::EmptyOutput(chosen));
        }

        // Drop leftovers (other formats, fragments)
        for other in candidates.iter().filter(|c| **c != chosen) {
            if let Err(e) = tokio::fs::remove_file(other).await {
                debug!("Failed to remove leftover {:?}: {}", other, e);
            }
        }
        Ok(chosen)
    }

    async fn remove_outputs(&self, token: &str) {
        if let Ok(files) = self.temp.find_by_token(token).await {
            for file in files {
                let _ = tokio::fs::remove_file(&file).await;
            }
        }
    }
}

/// Prefer the target extension, then any finished file
fn choose_output(candidates: &[PathBuf], target_extension: &str) -> Option<PathBuf> {
    let ext_of = |p: &Path| extension(&p.to_string_lossy()).map(|e| e.to_lowercase());
    let target = target_extension.trim_start_matches('.').to_lowercase();

    candidates
        .iter()
        .find(|p| ext_of(p).as_deref() == Some(target.as_str()))
        .or_else(|| {
            candidates.iter().find(|p| match ext_of(p) {
                Some(ext) => !PARTIAL_EXTENSIONS.contains(&ext.as_str()),
                None => true,
            })
        })
        .cloned()
}

/// Percentage from a helper progress line
pub fn parse_progress(line: &str) -> Option<f64> {
    if !line.contains("[download]") {
        return None;
    }
    PROGRESS_RE
        .as_ref()?
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|p| *p <= 100.0)
}

/// Tool output is in the console's encoding, which need not be UTF-8
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Drain `reader` to the end, keeping only the last lines
async fn tail_lines<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).split(b'\n');
    let mut tail = std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(raw)) = lines.next_segment().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(decode_line(&raw));
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}
