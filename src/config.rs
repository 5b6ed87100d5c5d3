use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::DigestTimestamps;
use crate::utils;

pub const DEFAULT_SITE_URL: &str = "https://spokanetech.org";
pub const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not configured")]
    Missing(&'static str),
    #[error("unknown time zone: {0}")]
    InvalidTimeZone(String),
    #[error("unable to read config {path:?}: {message}")]
    Read { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub eventbrite_api_token: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub site_url: String,
    pub time_zone: String,
    pub database_path: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub digest_timestamps: DigestTimestamps,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            eventbrite_api_token: None,
            discord_webhook_url: None,
            site_url: DEFAULT_SITE_URL.to_string(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            database_path: None,
            media_root: None,
            digest_timestamps: DigestTimestamps::default(),
        }
    }
}

impl AppConfig {
    /// Config file first, then `.env`, then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = read_config(&utils::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = non_empty("EVENTBRITE_API_TOKEN") {
            self.eventbrite_api_token = Some(token);
        }
        if let Some(url) = non_empty("DISCORD_WEBHOOK_URL") {
            self.discord_webhook_url = Some(url);
        }
        if let Some(url) = non_empty("SITE_URL") {
            self.site_url = url;
        }
        if let Some(tz) = non_empty("TIME_ZONE") {
            self.time_zone = tz;
        }
        if let Some(path) = non_empty("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty("MEDIA_ROOT") {
            self.media_root = Some(PathBuf::from(path));
        }
        if let Some(style) = non_empty("DIGEST_TIMESTAMPS") {
            match style.trim().to_lowercase().as_str() {
                "local" => self.digest_timestamps = DigestTimestamps::Local,
                "discord" => self.digest_timestamps = DigestTimestamps::Discord,
                other => tracing::warn!(value = other, "ignoring unknown DIGEST_TIMESTAMPS"),
            }
        }
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimeZone(self.time_zone.clone()))
    }

    pub fn eventbrite_token(&self) -> Result<String, ConfigError> {
        self.eventbrite_api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(ConfigError::Missing("EVENTBRITE_API_TOKEN"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }

    pub fn media_root(&self) -> PathBuf {
        self.media_root.clone().unwrap_or_else(utils::media_root)
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"site_url": "https://staging.spokanetech.org", "eventbrite_api_token": "file-token"}"#,
        )
        .expect("write config");

        let mut config = read_config(&path).expect("read config");
        assert_eq!(config.site_url, "https://staging.spokanetech.org");
        assert_eq!(config.time_zone, DEFAULT_TIME_ZONE);

        let env: HashMap<&str, &str> = [
            ("EVENTBRITE_API_TOKEN", "env-token"),
            ("DIGEST_TIMESTAMPS", "local"),
            ("SITE_URL", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.eventbrite_token().expect("token"), "env-token");
        assert_eq!(config.digest_timestamps, DigestTimestamps::Local);
        assert_eq!(config.site_url, "https://staging.spokanetech.org");
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let config = AppConfig::default();
        assert!(matches!(
            config.eventbrite_token(),
            Err(ConfigError::Missing("EVENTBRITE_API_TOKEN"))
        ));
        assert_eq!(config.tz().expect("tz"), chrono_tz::America::Los_Angeles);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write config");
        assert!(matches!(read_config(&path), Err(ConfigError::Read { .. })));
    }
}
