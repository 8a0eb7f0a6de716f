//! Application configuration management.
//!
//! This module handles loading and saving the session configuration:
//! the API base URL, token lifetimes, renewal interval and HTTP timeout.
//!
//! Configuration is stored at `~/.config/tribe-session/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "tribe-session";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "TRIBE_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

/// Access tokens are issued for 15 minutes.
const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;

/// Refresh tokens and the cached user record live for 7 days.
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: u64 = 7;

/// Renew one minute inside the access token lifetime.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 14 * 60;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest lifetime any stored credential may be given.
const MAX_TTL_DAYS: i64 = 365;

fn within_ttl_bound(ttl: &chrono::Duration) -> bool {
    *ttl <= chrono::Duration::days(MAX_TTL_DAYS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_days: u64,
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Attempt one renewal as soon as the scheduler starts
    pub refresh_on_start: bool,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_on_start: true,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay settings taken from the process environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the fallback credential file
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(self.cookie_domain()))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Host the credentials are scoped to, derived from the API base URL.
    pub fn cookie_domain(&self) -> String {
        Url::parse(&self.api_base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Whether the API is served over TLS (credentials are then marked secure)
    pub fn is_secure(&self) -> bool {
        Url::parse(&self.api_base_url)
            .map(|url| url.scheme() == "https")
            .unwrap_or(false)
    }

    /// Out-of-range values fall back to the default lifetime.
    pub fn access_token_ttl(&self) -> chrono::Duration {
        i64::try_from(self.access_token_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .filter(within_ttl_bound)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS as i64))
    }

    /// Out-of-range values fall back to the default lifetime.
    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        i64::try_from(self.refresh_token_ttl_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .filter(within_ttl_bound)
            .unwrap_or_else(|| chrono::Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS as i64))
    }

    pub fn refresh_interval(&self) -> Duration {
        let max_secs = MAX_TTL_DAYS as u64 * 24 * 60 * 60;
        Duration::from_secs(self.refresh_interval_secs.clamp(1, max_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
