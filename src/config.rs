//! Configuration types for feed-mirror

use crate::error::{Error, Result};
use crate::types::PostId;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Content source settings (paging, permalinks, skip list)
    #[serde(default)]
    pub feed: FeedConfig,

    /// Paths for the state store and transient files
    #[serde(default)]
    pub storage: StorageConfig,

    /// Artifact download behaviour
    #[serde(default)]
    pub download: DownloadConfig,

    /// Messaging destination limits
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Stage capacities and loop timing
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Content source call policy
    #[serde(default)]
    pub source: SourceConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "config_path",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.feed.permalink_template.contains("{id}") {
            return Err(Error::config(
                "feed.permalink_template",
                "must contain the {id} placeholder",
            ));
        }
        if self.feed.page_size == 0 {
            return Err(Error::config("feed.page_size", "must be positive"));
        }
        if self.delivery.caption_limit == 0 || self.delivery.message_limit == 0 {
            return Err(Error::config(
                "delivery.caption_limit",
                "text limits must be positive",
            ));
        }
        if self.delivery.media_group_size == 0 || self.delivery.media_group_size > 10 {
            return Err(Error::config(
                "delivery.media_group_size",
                "must be between 1 and 10",
            ));
        }
        if self.delivery.delete_batch_size == 0 {
            return Err(Error::config(
                "delivery.delete_batch_size",
                "must be positive",
            ));
        }
        if self.delivery.transport_limit == 0 {
            return Err(Error::config("delivery.transport_limit", "must be positive"));
        }
        if self.download.transfer_buffer_size == 0 {
            return Err(Error::config(
                "download.transfer_buffer_size",
                "must be positive",
            ));
        }
        if self.pipeline.prebuild_limit == 0 {
            return Err(Error::config("pipeline.prebuild_limit", "must be positive"));
        }
        for pattern in &self.feed.archive_link_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                Error::config(
                    "feed.archive_link_patterns",
                    format!("invalid pattern {pattern:?}: {e}"),
                )
            })?;
        }
        Ok(())
    }
}

/// Content source settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Permalink for a post, `{id}` is replaced by the post id
    #[serde(default = "default_permalink_template")]
    pub permalink_template: String,

    /// Posts requested per feed page (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Comments inspected for author-attached archives (default: 5)
    #[serde(default = "default_comment_fetch_count")]
    pub comment_fetch_count: u32,

    /// Number of most recent posts scanned on the first run after start (None = all)
    #[serde(default = "default_initial_scan_limit")]
    pub initial_scan_limit: Option<u64>,

    /// Posts never mirrored
    #[serde(default)]
    pub skip_post_ids: Vec<PostId>,

    /// Regexes for archive links embedded in post or comment text
    #[serde(default = "default_archive_link_patterns")]
    pub archive_link_patterns: Vec<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            permalink_template: default_permalink_template(),
            page_size: default_page_size(),
            comment_fetch_count: default_comment_fetch_count(),
            initial_scan_limit: default_initial_scan_limit(),
            skip_post_ids: Vec::new(),
            archive_link_patterns: default_archive_link_patterns(),
        }
    }
}

impl FeedConfig {
    /// Permalink for the given post
    pub fn permalink(&self, id: PostId) -> String {
        self.permalink_template.replace("{id}", &id.to_string())
    }
}

/// Paths for persistent and transient data
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State store location (default: "./data/state.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Where downloaded artifacts are written (default: "./files")
    #[serde(default = "default_local_files_dir")]
    pub local_files_dir: PathBuf,

    /// The same directory as mounted on the destination's upload server
    #[serde(default = "default_local_files_dir")]
    pub server_files_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            local_files_dir: default_local_files_dir(),
            server_files_dir: default_local_files_dir(),
        }
    }
}

/// Retry configuration (exponential backoff)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (None = retry indefinitely)
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Initial delay before first retry (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 300 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Artifact download behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Responses announcing fewer bytes are treated as unavailable (default: 1 MiB)
    #[serde(default = "default_min_plausible_size")]
    pub min_plausible_size: u64,

    /// Size of the reusable transfer buffer (default: 16 MiB)
    #[serde(default = "default_transfer_buffer_size")]
    pub transfer_buffer_size: usize,

    /// Reconnect policy for interrupted transfers (default: unbounded, 5s doubling to 300s)
    #[serde(default)]
    pub reconnect: RetryConfig,

    /// Time allowed to establish a connection (default: 30s)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// A body that yields no data for this long counts as dropped (default: 60s)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            min_plausible_size: default_min_plausible_size(),
            transfer_buffer_size: default_transfer_buffer_size(),
            reconnect: RetryConfig::default(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Messaging destination limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum caption length for a photo message (default: 1024)
    #[serde(default = "default_caption_limit")]
    pub caption_limit: usize,

    /// Maximum length of a text message (default: 4096)
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,

    /// Maximum items per media group (default: 10)
    #[serde(default = "default_media_group_size")]
    pub media_group_size: usize,

    /// Maximum ids per delete request (default: 100)
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,

    /// Largest single file the destination accepts, in bytes
    #[serde(default = "default_transport_limit")]
    pub transport_limit: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            caption_limit: default_caption_limit(),
            message_limit: default_message_limit(),
            media_group_size: default_media_group_size(),
            delete_batch_size: default_delete_batch_size(),
            transport_limit: default_transport_limit(),
        }
    }
}

/// Stage capacities and loop timing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Built packages allowed to wait for delivery (default: 10)
    #[serde(default = "default_prebuild_limit")]
    pub prebuild_limit: usize,

    /// Interval between reconciliation scans (default: 3 days)
    #[serde(default = "default_scan_interval", with = "duration_serde")]
    pub scan_interval: Duration,

    /// Pause between posts enqueued by a scan (default: 1 second)
    #[serde(default = "default_publish_pacing", with = "duration_serde")]
    pub publish_pacing: Duration,

    /// Extra comment polls for freshly published posts (default: 4)
    #[serde(default = "default_comment_repoll_attempts")]
    pub comment_repoll_attempts: u32,

    /// Delay between comment polls (default: 15 seconds)
    #[serde(default = "default_comment_repoll_delay", with = "duration_serde")]
    pub comment_repoll_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prebuild_limit: default_prebuild_limit(),
            scan_interval: default_scan_interval(),
            publish_pacing: default_publish_pacing(),
            comment_repoll_attempts: default_comment_repoll_attempts(),
            comment_repoll_delay: default_comment_repoll_delay(),
        }
    }
}

/// Content source call policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Retry policy for rate-limited or flaky source calls (default: 10 attempts, 1s doubling)
    #[serde(default = "default_source_retry")]
    pub retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            retry: default_source_retry(),
        }
    }
}

fn default_permalink_template() -> String {
    "{id}".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_comment_fetch_count() -> u32 {
    5
}

fn default_initial_scan_limit() -> Option<u64> {
    Some(100)
}

fn default_archive_link_patterns() -> Vec<String> {
    vec![r"https://pixeldrain\.com/u/[a-zA-Z0-9]{8}".to_string()]
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/state.db")
}

fn default_local_files_dir() -> PathBuf {
    PathBuf::from("./files")
}

fn default_true() -> bool {
    true
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_plausible_size() -> u64 {
    1024 * 1024
}

fn default_transfer_buffer_size() -> usize {
    16 * 1024 * 1024
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_caption_limit() -> usize {
    1024
}

fn default_message_limit() -> usize {
    4096
}

fn default_media_group_size() -> usize {
    10
}

fn default_delete_batch_size() -> usize {
    100
}

fn default_transport_limit() -> u64 {
    // just under 2 GiB, leaving room for multipart overhead
    i32::MAX as u64 - 100_000_000
}

fn default_prebuild_limit() -> usize {
    10
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(3 * 24 * 60 * 60)
}

fn default_publish_pacing() -> Duration {
    Duration::from_secs(1)
}

fn default_comment_repoll_attempts() -> u32 {
    4
}

fn default_comment_repoll_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_source_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: Some(10),
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
        jitter: true,
    }
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
