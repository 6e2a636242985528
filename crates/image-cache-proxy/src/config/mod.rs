use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};
use tracing::info;

use crate::errors::{AppError, AppResult};

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Prefix for environment overrides, e.g. `IMAGE_CACHE_PROXY_WEB__PORT=8080`.
pub const ENV_PREFIX: &str = "IMAGE_CACHE_PROXY_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub client_cache: ClientCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a single upstream proxy invocation
    #[serde(default = "default_request_timeout", with = "duration")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
    /// Where pending-conversion lists are persisted
    #[serde(default = "default_state_directory")]
    pub state_directory: PathBuf,
    #[serde(default = "default_cache_identifier")]
    pub identifier: String,
    /// Zero keeps entries forever
    #[serde(default = "default_retention", with = "duration")]
    pub retention: Duration,
    #[serde(default = "default_cache_cleanup_interval", with = "duration")]
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Host fragments treated as the same site for `Sec-Fetch-Site`
    #[serde(default = "default_same_site_hosts")]
    pub same_site_hosts: Vec<String>,
    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
    /// Largest source body the resizing proxy will buffer, in bytes
    #[serde(default = "default_upstream_max_source_size")]
    pub max_source_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// External proxy base URL; empty disables the fallback path
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub api_key_name: String,
    #[serde(default)]
    pub api_key_value: String,
    #[serde(default = "default_fallback_timeout", with = "duration")]
    pub timeout: Duration,
    #[serde(default = "default_fallback_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// One worker drains the queue as jobs arrive
    Continuous,
    /// Cron-triggered batches inside an hour window
    #[default]
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ConversionMode,
    #[serde(default = "default_avif_quality")]
    pub quality: u8,
    #[serde(default = "default_avif_speed")]
    pub speed: u8,
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    #[serde(default = "default_max_convert_source_size")]
    pub max_source_size: usize,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    /// Continuous mode only; zero means unbounded
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_throttle", with = "duration")]
    pub throttle: Duration,
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_schedule_cron")]
    pub cron: String,
    #[serde(default = "default_true")]
    pub use_range: bool,
    #[serde(default = "default_hour_start")]
    pub hour_start: u32,
    #[serde(default = "default_hour_end")]
    pub hour_end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCacheConfig {
    #[serde(default = "default_client_max_age")]
    pub max_age: u64,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIRECTORY)
}

fn default_state_directory() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIRECTORY)
}

fn default_cache_identifier() -> String {
    DEFAULT_CACHE_IDENTIFIER.to_string()
}

fn default_retention() -> Duration {
    Duration::ZERO
}

fn default_cache_cleanup_interval() -> Duration {
    Duration::from_secs(DEFAULT_CACHE_CLEANUP_INTERVAL_SECS)
}

fn default_same_site_hosts() -> Vec<String> {
    DEFAULT_SAME_SITE_HOSTS.iter().map(|h| h.to_string()).collect()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
}

fn default_upstream_max_source_size() -> usize {
    DEFAULT_UPSTREAM_MAX_SOURCE_SIZE
}

fn default_fallback_timeout() -> Duration {
    Duration::from_secs(DEFAULT_FALLBACK_TIMEOUT_SECS)
}

fn default_fallback_max_body_size() -> usize {
    DEFAULT_FALLBACK_MAX_BODY_SIZE
}

fn default_avif_quality() -> u8 {
    DEFAULT_AVIF_QUALITY
}

fn default_avif_speed() -> u8 {
    DEFAULT_AVIF_SPEED
}

fn default_min_size() -> usize {
    DEFAULT_MIN_CONVERT_SIZE
}

fn default_max_convert_source_size() -> usize {
    DEFAULT_MAX_CONVERT_SOURCE_SIZE
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

fn default_max_height() -> u32 {
    DEFAULT_MAX_HEIGHT
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_throttle() -> Duration {
    Duration::from_millis(DEFAULT_THROTTLE_MILLIS)
}

fn default_flush_every() -> usize {
    DEFAULT_FLUSH_EVERY
}

fn default_schedule_cron() -> String {
    DEFAULT_SCHEDULE_CRON.to_string()
}

fn default_hour_start() -> u32 {
    DEFAULT_HOUR_START
}

fn default_hour_end() -> u32 {
    DEFAULT_HOUR_END
}

fn default_client_max_age() -> u64 {
    DEFAULT_CLIENT_MAX_AGE_SECS
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            state_directory: default_state_directory(),
            identifier: default_cache_identifier(),
            retention: default_retention(),
            cleanup_interval: default_cache_cleanup_interval(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            same_site_hosts: default_same_site_hosts(),
            connect_timeout: default_connect_timeout(),
            max_source_size: default_upstream_max_source_size(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            proxy_url: String::new(),
            api_key_name: String::new(),
            api_key_value: String::new(),
            timeout: default_fallback_timeout(),
            max_body_size: default_fallback_max_body_size(),
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ConversionMode::default(),
            quality: default_avif_quality(),
            speed: default_avif_speed(),
            min_size: default_min_size(),
            max_source_size: default_max_convert_source_size(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            max_pixels: default_max_pixels(),
            queue_capacity: default_queue_capacity(),
            throttle: default_throttle(),
            flush_every: default_flush_every(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_schedule_cron(),
            use_range: true,
            hour_start: default_hour_start(),
            hour_end: default_hour_end(),
        }
    }
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            max_age: default_client_max_age(),
        }
    }
}

impl FallbackConfig {
    /// Parsed proxy URL, or `None` when the fallback path is disabled.
    pub fn proxy_url(&self) -> AppResult<Option<url::Url>> {
        let raw = self.proxy_url.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        url::Url::parse(raw)
            .map(Some)
            .map_err(|e| AppError::configuration(format!("Invalid fallback proxy_url '{raw}': {e}")))
    }

    /// The API key query pair, present only when both halves are set.
    pub fn api_key(&self) -> Option<(String, String)> {
        if self.api_key_name.is_empty() || self.api_key_value.is_empty() {
            return None;
        }
        Some((self.api_key_name.clone(), self.api_key_value.clone()))
    }
}

impl ConversionConfig {
    /// Bound on the in-memory queue. Only the continuous worker drops jobs;
    /// the scheduled list is persisted and grows until the next batch.
    pub fn queue_capacity(&self) -> Option<usize> {
        match self.mode {
            ConversionMode::Continuous => (self.queue_capacity > 0).then_some(self.queue_capacity),
            ConversionMode::Scheduled => None,
        }
    }
}

impl Config {
    /// Loads defaults, then the TOML file, then `IMAGE_CACHE_PROXY_*` overrides.
    /// A missing file is created with the default configuration.
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let conversion = &self.conversion;
        if !(1..=100).contains(&conversion.quality) {
            return Err(AppError::configuration(format!(
                "conversion.quality must be within 1..=100, got {}",
                conversion.quality
            )));
        }
        if !(1..=10).contains(&conversion.speed) {
            return Err(AppError::configuration(format!(
                "conversion.speed must be within 1..=10, got {}",
                conversion.speed
            )));
        }

        let schedule = &conversion.schedule;
        for (name, hour) in [
            ("hour_start", schedule.hour_start),
            ("hour_end", schedule.hour_end),
        ] {
            if hour > 23 {
                return Err(AppError::configuration(format!(
                    "conversion.schedule.{name} must be within 0..=23, got {hour}"
                )));
            }
        }
        if schedule.enabled {
            cron::Schedule::from_str(&schedule.cron).map_err(|e| {
                AppError::configuration(format!(
                    "Invalid cron expression '{}': {}",
                    schedule.cron, e
                ))
            })?;
        }

        self.fallback.proxy_url()?;
        Ok(())
    }
}
