//! Configuration Storage
//!
//! `config.json` lives in `~/.mediascraper` (macOS/Linux) or
//! `%APPDATA%\MediaScraper` (Windows).
//!
//! Loading never fails on bad content: a missing file gives defaults and an
//! unreadable one is moved aside before defaults are used. The only refusal
//! is a file written by a newer version. Saving is the one write in this
//! crate that reports failure, so the caller can tell the user the settings
//! were not kept.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::types::{AppConfig, SourceTag, CONFIG_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Settings were not saved to {path:?}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("MediaScraper"));
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".mediascraper"))
        .ok_or(ConfigError::NoConfigDir)
}

pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json"))
}

/// Reads and writes [`AppConfig`] at one path
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    /// Storage at the default location
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            path: config_file()?,
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<AppConfig, ConfigError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", self.path);
                return Ok(AppConfig::default());
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Config {:?} is not UTF-8", self.path);
                return Ok(self.set_aside_corrupt().await);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut config = match serde_json::from_str::<AppConfig>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config {:?} is corrupted: {}", self.path, e);
                return Ok(self.set_aside_corrupt().await);
            }
        };

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                found: config.version,
                supported: CONFIG_VERSION,
            });
        }

        let filled = fill_missing_profiles(&mut config);
        if filled > 0 {
            info!("Added default HTTP profiles for {} sources", filled);
        }
        config.version = CONFIG_VERSION;
        Ok(config)
    }

    /// Atomically replace the config file.
    ///
    /// Any failure comes back as [`ConfigError::Save`]; the previous file is
    /// left untouched and no `.tmp` sibling survives.
    pub async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let temp_path = self.path.with_extension("json.tmp");
        match write_atomically(&self.path, &temp_path, config).await {
            Ok(()) => {
                info!("Saved config to {:?}", self.path);
                Ok(())
            }
            Err(reason) => {
                if let Err(e) = fs::remove_file(&temp_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!("Failed to remove {:?}: {}", temp_path, e);
                    }
                }
                error!("Failed to save config to {:?}: {}", self.path, reason);
                Err(ConfigError::Save {
                    path: self.path.clone(),
                    reason,
                })
            }
        }
    }

    /// Move an unreadable file to a timestamped sibling and fall back to
    /// defaults. The file is moved, not copied, so the next load starts clean.
    async fn set_aside_corrupt(&self) -> AppConfig {
        let backup_path = self.path.with_extension(format!(
            "json.corrupt.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));
        match fs::rename(&self.path, &backup_path).await {
            Ok(()) => warn!("Corrupted config moved to {:?}, using defaults", backup_path),
            Err(e) => error!("Failed to move corrupted config aside: {}", e),
        }
        AppConfig::default()
    }
}

async fn write_atomically(
    path: &Path,
    temp_path: &Path,
    config: &AppConfig,
) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create {:?}: {}", parent, e))?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;

    let mut file = fs::File::create(temp_path).await.map_err(|e| e.to_string())?;
    file.write_all(json.as_bytes()).await.map_err(|e| e.to_string())?;
    file.sync_all().await.map_err(|e| e.to_string())?;
    drop(file);

    fs::rename(temp_path, path).await.map_err(|e| e.to_string())
}

/// A file written before a source existed gets that source's default
/// profile rather than the generic fallback
fn fill_missing_profiles(config: &mut AppConfig) -> usize {
    let defaults = AppConfig::default();
    let mut filled = 0;
    for tag in SourceTag::ALL {
        if !config.http_profiles.contains_key(&tag) {
            if let Some(profile) = defaults.http_profiles.get(&tag) {
                config.http_profiles.insert(tag, profile.clone());
                filled += 1;
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("config.json"));

        let config = storage.load().await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let storage = ConfigStorage::with_path(temp.path().join("nested").join("config.json"));

        let mut config = AppConfig::default();
        config.app_name = "Scraper".to_string();
        config
            .http_profiles
            .get_mut(&SourceTag::Igdb)
            .unwrap()
            .headers
            .insert("Client-ID".to_string(), "abc".to_string());

        storage.save(&config).await.unwrap();
        assert_eq!(entries(&temp.path().join("nested")), vec!["config.json"]);

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_corrupted_config_is_moved_aside_once() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, b"{ definitely not json").unwrap();
        let storage = ConfigStorage::with_path(path.clone());

        assert_eq!(storage.load().await.unwrap(), AppConfig::default());
        assert!(!path.exists());
        let names = entries(temp.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("config.json.corrupt."));

        // Nothing left to back up on the next load
        assert_eq!(storage.load().await.unwrap(), AppConfig::default());
        assert_eq!(entries(temp.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_non_utf8_config_is_treated_as_corrupt() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, b"{\"app_name\": \"\xff\xfe\"}").unwrap();

        let config = ConfigStorage::with_path(path.clone()).load().await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, format!(r#"{{"version":{}}}"#, CONFIG_VERSION + 1)).unwrap();
        let storage = ConfigStorage::with_path(path.clone());

        assert!(matches!(
            storage.load().await,
            Err(ConfigError::VersionTooNew { .. })
        ));
        // A newer file is never touched
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_partial_profiles_get_source_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"version":1,"http_profiles":{"igdb":{"timeout_secs":7}}}"#,
        )
        .unwrap();

        let config = ConfigStorage::with_path(path).load().await.unwrap();
        assert_eq!(config.http_profile(SourceTag::Igdb).timeout_secs, 7);
        assert_eq!(config.http_profile(SourceTag::ScreenScraper).timeout_secs, 120);
        assert_eq!(config.http_profiles.len(), SourceTag::ALL.len());
    }

    #[tokio::test]
    async fn test_save_failure_is_reported_with_path() {
        let temp = tempdir().unwrap();
        // Parent "directory" is a file
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let target = blocker.join("config.json");
        let storage = ConfigStorage::with_path(target.clone());

        match storage.save(&AppConfig::default()).await {
            Err(ConfigError::Save { path, .. }) => assert_eq!(path, target),
            other => panic!("Expected Save error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_previous_file() {
        let temp = tempdir().unwrap();
        // The target is a non-empty directory, so the final rename fails
        let target = temp.path().join("config.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();
        let storage = ConfigStorage::with_path(target.clone());

        assert!(matches!(
            storage.save(&AppConfig::default()).await,
            Err(ConfigError::Save { .. })
        ));
        assert!(target.join("keep").exists());
        assert!(!temp.path().join("config.json.tmp").exists());
    }
}
