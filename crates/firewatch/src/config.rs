//! Runtime configuration, read from a TOML file.
//!
//! Every key is optional; anything missing takes its default. Values that are
//! out of range are clamped by [`Config::normalized`] rather than rejected.

use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "firewatch.toml";
pub const DEFAULT_REGION: &str = "north-central-fire-district";
pub const DEFAULT_QUALIFIERS: [&str; 4] = ["North", "South", "East", "West"];

pub const MIN_CACHE_TTL_SECS: u64 = 300;
pub const MAX_CACHE_TTL_SECS: u64 = 43_200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    Hourly,
    #[default]
    TwiceDaily,
    Daily,
}

impl UpdateFrequency {
    pub fn interval(&self) -> Duration {
        match self {
            UpdateFrequency::Hourly => Duration::from_secs(60 * 60),
            UpdateFrequency::TwiceDaily => Duration::from_secs(12 * 60 * 60),
            UpdateFrequency::Daily => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// How long Fetch Log records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogRetention {
    #[serde(rename = "7days")]
    SevenDays,
    #[default]
    #[serde(rename = "28days")]
    TwentyEightDays,
    #[serde(rename = "1year")]
    OneYear,
    #[serde(rename = "indefinite")]
    Indefinite,
}

impl LogRetention {
    /// `None` means records never expire.
    pub fn max_age(&self) -> Option<ChronoDuration> {
        match self {
            LogRetention::SevenDays => Some(ChronoDuration::days(7)),
            LogRetention::TwentyEightDays => Some(ChronoDuration::days(28)),
            LogRetention::OneYear => Some(ChronoDuration::days(365)),
            LogRetention::Indefinite => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogRetention::SevenDays => "7days",
            LogRetention::TwentyEightDays => "28days",
            LogRetention::OneYear => "1year",
            LogRetention::Indefinite => "indefinite",
        }
    }
}

impl FromStr for LogRetention {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "7days" => Ok(LogRetention::SevenDays),
            "28days" => Ok(LogRetention::TwentyEightDays),
            "1year" => Ok(LogRetention::OneYear),
            "indefinite" => Ok(LogRetention::Indefinite),
            other => Err(ConfigError::Invalid(format!(
                "log retention '{other}', expected one of 7days, 28days, 1year, indefinite"
            ))),
        }
    }
}

impl Display for LogRetention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Bearer token for operator actions. Without one they are refused.
    pub admin_token: Option<String>,
    pub scheduler_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8055".to_string(),
            admin_token: None,
            scheduler_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_region: String,
    pub cache_ttl_secs: u64,
    pub multi_region_cache_ttl_secs: u64,
    pub update_frequency: UpdateFrequency,
    pub logging_enabled: bool,
    pub log_retention: LogRetention,
    pub log_file: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
    pub html_fallback: bool,
    pub directional_qualifiers: Vec<String>,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.to_string(),
            cache_ttl_secs: 3600,
            multi_region_cache_ttl_secs: 3600,
            update_frequency: UpdateFrequency::default(),
            logging_enabled: true,
            log_retention: LogRetention::default(),
            log_file: None,
            fetch_timeout_secs: 30,
            max_concurrent_fetches: 4,
            html_fallback: true,
            directional_qualifiers: DEFAULT_QUALIFIERS.iter().map(|q| q.to_string()).collect(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!(
                    "No config file at {}, using defaults",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded configuration from {}", path.display());

        config.normalized()
    }

    /// Clamps out-of-range values and checks the ones that cannot be clamped.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.cache_ttl_secs = clamp_ttl("cache_ttl_secs", self.cache_ttl_secs);
        self.multi_region_cache_ttl_secs =
            clamp_ttl("multi_region_cache_ttl_secs", self.multi_region_cache_ttl_secs);

        if self.fetch_timeout_secs == 0 {
            log::warn!("fetch_timeout_secs must be positive, using 30");
            self.fetch_timeout_secs = 30;
        }
        if self.max_concurrent_fetches == 0 {
            log::warn!("max_concurrent_fetches must be positive, using 1");
            self.max_concurrent_fetches = 1;
        }

        self.default_region = self.default_region.trim().to_lowercase();
        if self.default_region.is_empty() {
            return Err(ConfigError::Invalid("default_region is empty".to_string()));
        }

        self.directional_qualifiers.retain(|q| !q.trim().is_empty());
        if let Some(token) = &self.server.admin_token
            && token.trim().is_empty()
        {
            log::warn!("Empty admin_token ignored, operator actions are disabled");
            self.server.admin_token = None;
        }

        Ok(self)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.cache_ttl_secs as i64)
    }

    pub fn multi_region_cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.multi_region_cache_ttl_secs as i64)
    }
}

fn clamp_ttl(key: &str, value: u64) -> u64 {
    let clamped = value.clamp(MIN_CACHE_TTL_SECS, MAX_CACHE_TTL_SECS);
    if clamped != value {
        log::warn!("{key} = {value} is out of range, using {clamped}");
    }
    clamped
}
