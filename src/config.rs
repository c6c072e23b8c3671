//! Configuration types for zvuk-dl

use crate::error::{Error, Result};
use crate::types::QualityTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default path template for release folders
pub const DEFAULT_PATH_TEMPLATE: &str =
    "Artists/{{.albumArtist}}/{{.releaseYear}} - {{.albumTitle}}";

/// Session and transport settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Service origin (default: "https://zvuk.com")
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Netscape-format cookie file exported from a browser (default: "cookies.txt")
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,

    /// Explicit auth token; takes precedence over the cookie file
    #[serde(default)]
    pub token: Option<String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            cookie_file: default_cookie_file(),
            token: None,
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Download behavior (directories, concurrency, quality, naming)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root of all written files (default: "zvuk_downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for in-progress transfers (default: "<output_dir>/.partial")
    ///
    /// Must live on the same filesystem as `output_dir` so the final rename is atomic.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Number of concurrent track downloads (default: 5)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Requested quality tier (default: lossless)
    #[serde(default)]
    pub quality: QualityTier,

    /// Folder template for release-like content, relative to `output_dir`
    #[serde(default = "default_path_template")]
    pub path_template: String,

    /// Validity window assigned to located stream URLs (default: 120 seconds)
    #[serde(default = "default_stream_ttl", with = "duration_serde")]
    pub stream_ttl: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            temp_dir: None,
            concurrency: default_concurrency(),
            quality: QualityTier::default(),
            path_template: default_path_template(),
            stream_ttl: default_stream_ttl(),
        }
    }
}

impl DownloadConfig {
    /// Effective temp directory
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".partial"))
    }
}

/// Response cache settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache database file (default: "api_cache.db")
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Whether catalog responses are cached at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            enabled: true,
        }
    }
}

/// Catalog resolution settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Items requested per page from paginated containers (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Track ids per metadata lookup request (default: 50)
    #[serde(default = "default_track_batch_size")]
    pub track_batch_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            track_batch_size: default_track_batch_size(),
        }
    }
}

/// How the delay grows between retries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `initial_delay * attempt`
    #[default]
    Linear,
    /// `initial_delay * multiplier^(attempt - 1)`
    Exponential,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Delay growth (default: linear)
    #[serde(default)]
    pub backoff: Backoff,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff: Backoff::default(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Main configuration for [`ZvukDownloader`](crate::ZvukDownloader)
///
/// Every field has a default, so an empty TOML file is a valid configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Authentication and transport
    #[serde(default)]
    pub session: SessionConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Catalog resolution
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Retry policy for metadata and media transfers
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(invalid("download.concurrency", "must be at least 1"));
        }
        if self.resolver.page_size == 0 {
            return Err(invalid("resolver.page_size", "must be at least 1"));
        }
        if self.resolver.track_batch_size == 0 {
            return Err(invalid("resolver.track_batch_size", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if url::Url::parse(&self.session.api_base).is_err() {
            return Err(invalid("session.api_base", "must be an absolute URL"));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config {
        message: format!("{} {}", key, reason),
        key: Some(key.to_string()),
    }
}

fn default_api_base() -> String {
    "https://zvuk.com".to_string()
}

fn default_cookie_file() -> PathBuf {
    PathBuf::from("cookies.txt")
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:141.0) Gecko/20100101 Firefox/141.0".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("zvuk_downloads")
}

fn default_concurrency() -> usize {
    5
}

fn default_path_template() -> String {
    DEFAULT_PATH_TEMPLATE.to_string()
}

fn default_stream_ttl() -> Duration {
    Duration::from_secs(120)
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("api_cache.db")
}

fn default_page_size() -> usize {
    100
}

fn default_track_batch_size() -> usize {
    50
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
