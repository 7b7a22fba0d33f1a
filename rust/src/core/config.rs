use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::caches::CacheSettings;
use crate::dedup::DEFAULT_DEDUP_CAPACITY;

pub(crate) const CONFIG_FILE_NAME: &str = "bluebubbles_config.json";
pub(crate) const SERVER_URL_ENV: &str = "BLUEBUBBLES_SERVER_URL";
pub(crate) const PASSWORD_ENV: &str = "BLUEBUBBLES_PASSWORD";

const DEFAULT_CONVERSATION_PAGE_SIZE: usize = 25;
const DEFAULT_SCAN_PAGE_SIZE: usize = 100;
const DEFAULT_MEDIA_STALE_DEBOUNCE_MS: u64 = 250;
const DEFAULT_MEDIA_CACHE_CAPACITY: usize = 16;
const DEFAULT_MEDIA_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_SEARCH_CACHE_CAPACITY: usize = 32;
const DEFAULT_SEARCH_CACHE_TTL_SECS: u64 = 120;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub server_password: Option<String>,
    /// Foreground mode. Background replays never notify or play sounds.
    #[serde(default)]
    pub interactive: Option<bool>,
    #[serde(default)]
    pub conversation_page_size: Option<usize>,
    #[serde(default)]
    pub scan_page_size: Option<usize>,
    #[serde(default)]
    pub tapback_dedup_capacity: Option<usize>,
    #[serde(default)]
    pub media_stale_debounce_ms: Option<u64>,
    #[serde(default)]
    pub media_cache_capacity: Option<usize>,
    #[serde(default)]
    pub media_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub search_cache_capacity: Option<usize>,
    #[serde(default)]
    pub search_cache_ttl_secs: Option<u64>,
}

impl AppConfig {
    pub fn interactive(&self) -> bool {
        self.interactive.unwrap_or(true)
    }

    pub fn conversation_page_size(&self) -> usize {
        self.conversation_page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONVERSATION_PAGE_SIZE)
    }

    pub fn scan_page_size(&self) -> usize {
        self.scan_page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_SCAN_PAGE_SIZE)
    }

    pub fn tapback_dedup_capacity(&self) -> usize {
        self.tapback_dedup_capacity
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_DEDUP_CAPACITY)
    }

    pub fn media_stale_debounce(&self) -> Duration {
        Duration::from_millis(
            self.media_stale_debounce_ms
                .unwrap_or(DEFAULT_MEDIA_STALE_DEBOUNCE_MS),
        )
    }

    pub fn media_cache_settings(&self) -> CacheSettings {
        CacheSettings {
            capacity: self
                .media_cache_capacity
                .unwrap_or(DEFAULT_MEDIA_CACHE_CAPACITY),
            ttl: Duration::from_secs(
                self.media_cache_ttl_secs
                    .unwrap_or(DEFAULT_MEDIA_CACHE_TTL_SECS),
            ),
        }
    }

    pub fn search_cache_settings(&self) -> CacheSettings {
        CacheSettings {
            capacity: self
                .search_cache_capacity
                .unwrap_or(DEFAULT_SEARCH_CACHE_CAPACITY),
            ttl: Duration::from_secs(
                self.search_cache_ttl_secs
                    .unwrap_or(DEFAULT_SEARCH_CACHE_TTL_SECS),
            ),
        }
    }

    /// Initial cache scope: one per configured server.
    pub fn session_scope_key(&self) -> String {
        self.server_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("local")
            .to_string()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            if !url.trim().is_empty() {
                self.server_url = Some(url);
            }
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if !password.is_empty() {
                self.server_password = Some(password);
            }
        }
    }
}

pub(crate) fn read_app_config(path: &Path) -> anyhow::Result<AppConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse config {}", path.display()))
}

/// Missing or broken config files fall back to defaults.
pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let mut config = if path.exists() {
        match read_app_config(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(err = %format!("{e:#}"), "invalid config; using defaults");
                AppConfig::default()
            }
        }
    } else {
        AppConfig::default()
    };
    config.apply_env_overrides();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_app_config(&dir.path().to_string_lossy());
        assert!(config.interactive());
        assert_eq!(config.conversation_page_size(), 25);
        assert_eq!(config.scan_page_size(), 100);
        assert_eq!(config.tapback_dedup_capacity(), 500);
        assert_eq!(config.media_stale_debounce(), Duration::from_millis(250));
        assert_eq!(config.media_cache_settings().capacity, 16);
        assert_eq!(config.search_cache_settings().ttl, Duration::from_secs(120));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "interactive": false, "conversation_page_size": 5, "tapback_dedup_capacity": 3 }"#,
        )
        .expect("write config");
        let config = read_app_config(&path).expect("read config");
        assert!(!config.interactive());
        assert_eq!(config.conversation_page_size(), 5);
        assert_eq!(config.tapback_dedup_capacity(), 3);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{ not json").expect("write config");
        let config = load_app_config(&dir.path().to_string_lossy());
        assert_eq!(config.conversation_page_size, None);
        assert!(read_app_config(&dir.path().join(CONFIG_FILE_NAME)).is_err());
    }

    #[test]
    fn zero_sizes_are_ignored() {
        let config = AppConfig {
            conversation_page_size: Some(0),
            tapback_dedup_capacity: Some(0),
            ..Default::default()
        };
        assert_eq!(config.conversation_page_size(), 25);
        assert_eq!(config.tapback_dedup_capacity(), 500);
    }
}
