//! Configuration module for the PRTG connector.
//!
//! Two layers: [`ServerConfig`] describes the process (port, where the instance
//! settings come from) and is loaded from environment variables with sensible
//! defaults; [`Settings`] describes one configured connector instance and is
//! loaded the way the visualization host hands it over (JSON + secret map).

use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Timezone assumed for the PRTG server when none is configured.
pub const DEFAULT_TIMEZONE: &str = "Europe/Istanbul";

/// Upstream cache lifetime used when the settings carry none.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(30);

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not decode settings json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("api token is missing")]
    MissingToken,
    #[error("PRTG host is missing")]
    MissingHost,
    #[error("could not read settings file: {0}")]
    Io(#[from] std::io::Error),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// PRTG host, with or without scheme
    pub host: String,
    /// PRTG API token
    pub api_token: String,
    /// Upstream cache time in seconds (default: 30)
    pub cache_time_secs: i64,
    /// Timezone name of the PRTG server
    pub timezone: String,
    /// Optional JSON settings file, used instead of the host variables above
    pub settings_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            host: String::new(),
            api_token: String::new(),
            cache_time_secs: DEFAULT_CACHE_TIME.as_secs() as i64,
            timezone: String::new(),
            settings_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PRTG_CONNECTOR_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PRTG_HOST`: PRTG server host
    /// - `PRTG_API_TOKEN`: PRTG API token
    /// - `PRTG_CACHE_TIME`: upstream cache time in seconds (default: 30)
    /// - `PRTG_TIMEZONE`: timezone of the PRTG server (default: Europe/Istanbul)
    /// - `PRTG_SETTINGS_FILE`: JSON settings file (`path`, `cacheTime`, `timeZone`)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PRTG_CONNECTOR_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(host) = env::var("PRTG_HOST") {
            cfg.host = host;
        }

        if let Ok(token) = env::var("PRTG_API_TOKEN") {
            cfg.api_token = token;
        }

        if let Ok(cache_str) = env::var("PRTG_CACHE_TIME") {
            if let Ok(secs) = cache_str.parse() {
                cfg.cache_time_secs = secs;
            }
        }

        if let Ok(tz) = env::var("PRTG_TIMEZONE") {
            cfg.timezone = tz;
        }

        if let Ok(path) = env::var("PRTG_SETTINGS_FILE") {
            if !path.is_empty() {
                cfg.settings_file = Some(path);
            }
        }

        cfg
    }

    /// Build instance settings from the settings file when one is configured,
    /// otherwise from the environment. The token always comes from the environment.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        if let Some(path) = &self.settings_file {
            let json = std::fs::read(path)?;
            let secure = HashMap::from([("apiKey".to_string(), self.api_token.clone())]);
            return Settings::load(&json, &secure);
        }

        let raw = RawSettings {
            path: self.host.clone(),
            cache_time: self.cache_time_secs,
            timezone: self.timezone.clone(),
        };
        Settings::from_raw(raw, self.api_token.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSettings {
    #[serde(default)]
    path: String,
    #[serde(default)]
    cache_time: i64,
    #[serde(default, rename = "timeZone")]
    timezone: String,
}

/// Settings of one connector instance.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub api_token: String,
    pub cache_time: Duration,
    pub timezone: Tz,
}

impl Settings {
    /// Load instance settings from the host's JSON blob and decrypted secrets.
    ///
    /// The secret map must carry a non-empty `apiKey`.
    pub fn load(json_data: &[u8], secure: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let raw: RawSettings = if json_data.is_empty() {
            RawSettings::default()
        } else {
            serde_json::from_slice(json_data)?
        };
        let token = secure.get("apiKey").cloned().unwrap_or_default();
        Self::from_raw(raw, token)
    }

    fn from_raw(raw: RawSettings, api_token: String) -> Result<Self, ConfigError> {
        if api_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if raw.path.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }

        let cache_time = if raw.cache_time <= 0 {
            DEFAULT_CACHE_TIME
        } else {
            Duration::from_secs(raw.cache_time as u64)
        };

        Ok(Self {
            base_url: base_url_for(raw.path.trim()),
            api_token,
            cache_time,
            timezone: resolve_timezone(&raw.timezone),
        })
    }
}

/// Prefix the host with `https://` unless it already carries a scheme.
fn base_url_for(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("https://{}", path)
    }
}

/// Resolve a timezone name.
///
/// Empty names fall back to [`DEFAULT_TIMEZONE`], unknown names to UTC.
pub fn resolve_timezone(name: &str) -> Tz {
    let name = name.trim();
    if name.is_empty() {
        tracing::warn!("No timezone configured, using default {}", DEFAULT_TIMEZONE);
        return DEFAULT_TIMEZONE.parse().unwrap_or(Tz::UTC);
    }

    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => {
            tracing::warn!(timezone = name, error = %e, "Invalid timezone in settings, using UTC");
            Tz::UTC
        }
    }
}
