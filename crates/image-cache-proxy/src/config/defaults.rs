//! Configuration default values
//!
//! All default values for configuration options live here so they can be
//! changed in one place.

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9998;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

// Cache store defaults
pub const DEFAULT_CACHE_DIRECTORY: &str = "./data/imagecache";
pub const DEFAULT_STATE_DIRECTORY: &str = "./data";
pub const DEFAULT_CACHE_IDENTIFIER: &str = "imageproxy";
pub const DEFAULT_CACHE_CLEANUP_INTERVAL_SECS: u64 = 12 * 60 * 60;

// Upstream fetch defaults
pub const DEFAULT_SAME_SITE_HOSTS: &[&str] = &["vrbangers"];
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_MAX_SOURCE_SIZE: usize = 50 * 1024 * 1024; // 50MB
pub const UPSTREAM_CACHE_CONTROL: &str = "public, max-age=157680000"; // 5 years
pub const BROWSER_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
pub const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

// Fallback proxy defaults
pub const DEFAULT_FALLBACK_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FALLBACK_MAX_BODY_SIZE: usize = 50 * 1024 * 1024; // 50MB
pub const FALLBACK_KEY_PREFIX: &str = "fallback:";
pub const FALLBACK_CACHE_CONTROL: &str = "public, max-age=86400";

// Conversion defaults
pub const DEFAULT_AVIF_QUALITY: u8 = 65;
pub const DEFAULT_AVIF_SPEED: u8 = 6;
pub const DEFAULT_MIN_CONVERT_SIZE: usize = 5000;
pub const DEFAULT_MAX_CONVERT_SOURCE_SIZE: usize = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_MAX_WIDTH: u32 = 8000;
pub const DEFAULT_MAX_HEIGHT: u32 = 8000;
pub const DEFAULT_MAX_PIXELS: u64 = 20_000_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_THROTTLE_MILLIS: u64 = 50;
pub const DEFAULT_FLUSH_EVERY: usize = 100;
pub const DEFAULT_PROGRESS_LOG_INTERVAL: usize = 100;

// Conversion schedule defaults
pub const DEFAULT_SCHEDULE_CRON: &str = "0 0 * * * *";
pub const DEFAULT_HOUR_START: u32 = 22;
pub const DEFAULT_HOUR_END: u32 = 6;

// Client cache defaults
pub const DEFAULT_CLIENT_MAX_AGE_SECS: u64 = 86400;
