use crate::error::HarvestError;
use crate::throttle::{RequestThrottle, ThrottleConfig, MAX_DELAY_SECONDS};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "HARVESTER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub assets: AssetSettings,
    /// Independent harvests, each with its own artifact and cover directory
    #[serde(default)]
    pub data_types: Vec<DataTypeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleSettings {
    /// Minimum delay between requests in seconds
    #[serde(default = "default_min_delay")]
    pub min_delay: f64,

    /// Maximum delay between requests in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,

    #[serde(default = "default_true")]
    pub enable_jitter: bool,

    /// Slow down on failures, speed up after success streaks
    #[serde(default = "default_true")]
    pub enable_adaptive: bool,

    #[serde(default = "default_true")]
    pub enable_exponential_backoff: bool,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Callers allowed to wait on the throttle at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default = "default_session_count")]
    pub count: usize,

    #[serde(default = "default_rotate_interval")]
    pub rotate_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FetchSettings {
    /// Attempts per source before falling through
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: f64,

    /// Timeout for every network call
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Rate-limited answers tolerated per source, counted apart from max_retries
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSettings {
    /// Ignore the existing artifact when deciding what to fetch
    #[serde(default)]
    pub full_crawl: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Re-encode downloaded covers as WebP
    #[serde(default = "default_true")]
    pub enable_transcode: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeConfig {
    pub name: String,
    #[serde(default)]
    pub collection_url: Option<String>,
    #[serde(default)]
    pub identifier_file: Option<PathBuf>,
    pub artifact_path: PathBuf,
    pub cover_dir: PathBuf,
}

fn default_true() -> bool { true }
fn default_min_delay() -> f64 { 1.0 }
fn default_max_delay() -> f64 { 3.0 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_max_concurrent() -> usize { 1 }
fn default_session_count() -> usize { 3 }
fn default_rotate_interval() -> u64 { 300 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay() -> f64 { 2.0 }
fn default_timeout() -> u64 { 15 }
fn default_max_rate_limit_retries() -> u32 { 5 }
fn default_max_workers() -> usize { 4 }

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            enable_jitter: true,
            enable_adaptive: true,
            enable_exponential_backoff: true,
            backoff_factor: default_backoff_factor(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            count: default_session_count(),
            rotate_interval_seconds: default_rotate_interval(),
        }
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay(),
            timeout_seconds: default_timeout(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
        }
    }
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: default_max_workers(),
            enable_transcode: true,
        }
    }
}

impl ThrottleSettings {
    pub fn to_throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            enable_jitter: self.enable_jitter,
            enable_adaptive: self.enable_adaptive,
            enable_exponential_backoff: self.enable_exponential_backoff,
            backoff_factor: self.backoff_factor,
            max_concurrent: self.max_concurrent,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_seconds.max(0.0))
    }
}

impl Config {
    /// Load from `$HARVESTER_CONFIG` or `config.toml`; defaults when absent
    pub fn load() -> Result<Self, HarvestError> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, HarvestError> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }
        let content = fs::read_to_string(path).map_err(|e| {
            HarvestError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let cfg = Self::from_toml(&content)
            .map_err(|e| HarvestError::Configuration(format!("{}: {}", path.display(), e)))?;
        log::info!(
            "Loaded config from {} ({} data types)",
            path.display(),
            cfg.data_types.len()
        );
        Ok(cfg)
    }

    pub fn from_toml(content: &str) -> Result<Self, HarvestError> {
        let cfg: Config = toml::from_str(content)
            .map_err(|e| HarvestError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        RequestThrottle::new(self.throttle.to_throttle_config())?;

        if self.session.count < 1 {
            return Err(HarvestError::Configuration("session.count must be >= 1".into()));
        }
        if self.session.rotate_interval_seconds == 0 {
            return Err(HarvestError::Configuration(
                "session.rotateIntervalSeconds must be > 0".into(),
            ));
        }
        if self.fetch.timeout_seconds == 0 {
            return Err(HarvestError::Configuration("fetch.timeoutSeconds must be > 0".into()));
        }
        let retry_delay = self.fetch.retry_delay_seconds;
        if !(retry_delay >= 0.0 && retry_delay <= MAX_DELAY_SECONDS) {
            return Err(HarvestError::Configuration(format!(
                "fetch.retryDelaySeconds must be between 0 and {}, got {}",
                MAX_DELAY_SECONDS, retry_delay
            )));
        }
        if self.assets.max_workers < 1 {
            return Err(HarvestError::Configuration("assets.maxWorkers must be >= 1".into()));
        }

        let mut names = HashSet::new();
        for dt in &self.data_types {
            if dt.name.trim().is_empty() {
                return Err(HarvestError::Configuration("dataTypes entry without a name".into()));
            }
            if !names.insert(dt.name.as_str()) {
                return Err(HarvestError::Configuration(format!(
                    "duplicate data type {}",
                    dt.name
                )));
            }
            if dt.collection_url.is_none() && dt.identifier_file.is_none() {
                log::warn!(
                    "Data type {} has neither collectionUrl nor identifierFile; it will discover nothing",
                    dt.name
                );
            }
        }
        Ok(())
    }
}
