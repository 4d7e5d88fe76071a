//! Client configuration management.
//!
//! This module handles loading and saving the API client configuration:
//! the API base URL, the token refresh endpoint, timeouts, and the values
//! that differ between API deployments (auth error codes, multipart
//! content type).
//!
//! Configuration is stored at `~/.config/memoria/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::credentials::DEFAULT_SERVICE_NAME;

/// Application name used for the config directory path
const APP_NAME: &str = "memoria";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "https://api.memoria.example";

const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// Environment variable overriding `base_url`
pub const ENV_BASE_URL: &str = "MEMORIA_API_BASE_URL";

/// Environment variable overriding `request_timeout_secs`
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "MEMORIA_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    /// Path of the token refresh endpoint, relative to `base_url`
    pub refresh_path: String,
    pub request_timeout_secs: u64,
    /// API-level error codes that mean "access token rejected" even when
    /// the HTTP status is 2xx
    pub auth_error_codes: Vec<i64>,
    /// Media type sent for multipart uploads; the boundary is appended.
    /// Some deployments of the API were called with `multipart/formdata`,
    /// so verify against the target server before changing.
    pub multipart_content_type: String,
    /// Keychain service namespace for stored secrets
    pub keyring_service: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auth_error_codes: Vec::new(),
            multipart_content_type: DEFAULT_MULTIPART_CONTENT_TYPE.to_string(),
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Config pointing at `base_url` with every other setting defaulted
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            debug!(path = %path.display(), "Config loaded");
            Ok(config)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `MEMORIA_API_BASE_URL` and `MEMORIA_REQUEST_TIMEOUT_SECS`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.base_url = base_url;
        }
        if let Some(timeout) = lookup(ENV_REQUEST_TIMEOUT_SECS).filter(|v| !v.is_empty()) {
            self.request_timeout_secs = timeout
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_REQUEST_TIMEOUT_SECS, timeout))?;
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join `path` onto the base URL with exactly one slash between them
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn refresh_url(&self) -> String {
        self.endpoint(&self.refresh_path)
    }

    pub fn is_auth_error_code(&self, code: i64) -> bool {
        self.auth_error_codes.contains(&code)
    }
}
