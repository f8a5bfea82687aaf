use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::renderer::Pacing;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/chat";
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

/// Environment variable that overrides the configured chat endpoint
pub const ENDPOINT_ENV: &str = "TEAMCHAT_ENDPOINT";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub request_timeout_secs: Option<u64>,
    pub max_attachment_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            pacing_min_ms: 10,
            pacing_max_ms: 10,
            request_timeout_secs: None,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }

    /// Load from the default location, falling back to defaults when the file
    /// does not exist. The endpoint env var wins over the file.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let config_content = fs::read_to_string(path)?;
            serde_json::from_str(&config_content)?
        } else {
            Self::new()
        };

        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                config.endpoint = endpoint;
            }
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    /// Pacing between revealed characters. A zero-width range is a fixed delay.
    pub fn pacing(&self) -> Pacing {
        let min = self.pacing_min_ms.min(self.pacing_max_ms);
        let max = self.pacing_min_ms.max(self.pacing_max_ms);
        if min == max {
            Pacing::Fixed(Duration::from_millis(min))
        } else {
            Pacing::Jitter {
                min: Duration::from_millis(min),
                max: Duration::from_millis(max),
            }
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("teamchat").join("config.json"))
    }
}
