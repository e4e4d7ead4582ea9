//! Configuration Types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Current config file format version
pub const CONFIG_VERSION: u32 = 1;

/// Browser-like identity; some media hosts reject unknown clients
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Where a download URL came from. Selects the HTTP client profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Generic,
    SteamGridDb,
    Igdb,
    ScreenScraper,
    /// Streaming video host; fetched through the external tool
    YouTube,
}

impl SourceTag {
    pub const ALL: [SourceTag; 5] = [
        SourceTag::Generic,
        SourceTag::SteamGridDb,
        SourceTag::Igdb,
        SourceTag::ScreenScraper,
        SourceTag::YouTube,
    ];

    /// Whether this source needs protocol-aware extraction
    pub fn uses_external_tool(self) -> bool {
        self == SourceTag::YouTube
    }
}

/// Client identity for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpProfile {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
}

impl Default for HttpProfile {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: HashMap::new(),
        }
    }
}

/// Download retry and progress settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay unit for exponential backoff
    pub base_delay_ms: u64,
    /// Minimum gap between progress reports
    pub progress_interval_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            progress_interval_ms: 1000,
        }
    }
}

/// External extraction tool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Executable name or path
    pub program: String,
    /// Format selector passed with `-f`
    pub format: String,
    /// Codec for audio-only extraction
    pub audio_format: String,
    /// Container the tool should produce
    pub target_extension: String,
    /// Only download the first N seconds (None = whole media)
    pub max_duration_secs: Option<u32>,
    /// Passed before the generated arguments (cookies, proxy, ...)
    pub extra_args: Vec<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            format: "bestvideo[height<=720]+bestaudio/best[height<=720]".to_string(),
            audio_format: "mp3".to_string(),
            target_extension: "mp4".to_string(),
            max_duration_secs: None,
            extra_args: Vec::new(),
        }
    }
}

/// Root configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    /// Namespace of the temp folder
    pub app_name: String,
    pub download: DownloadSettings,
    pub http_profiles: HashMap<SourceTag, HttpProfile>,
    pub tool: ToolSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut http_profiles = HashMap::new();
        for tag in SourceTag::ALL {
            http_profiles.insert(tag, HttpProfile::default());
        }
        // Large media files from this host regularly take minutes
        if let Some(profile) = http_profiles.get_mut(&SourceTag::ScreenScraper) {
            profile.timeout_secs = 120;
        }

        Self {
            version: CONFIG_VERSION,
            app_name: "MediaScraper".to_string(),
            download: DownloadSettings::default(),
            http_profiles,
            tool: ToolSettings::default(),
        }
    }
}

impl AppConfig {
    /// Profile for a source, falling back to the generic one
    pub fn http_profile(&self, tag: SourceTag) -> HttpProfile {
        self.http_profiles
            .get(&tag)
            .or_else(|| self.http_profiles.get(&SourceTag::Generic))
            .cloned()
            .unwrap_or_default()
    }
}
