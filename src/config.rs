use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Configuration for the cohort harvester.
///
/// Built once at startup and handed to components as cloned sections; nothing
/// mutates it after the binaries finish applying command line overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Remote platform settings
    pub api: ApiConfig,

    /// Batch download settings
    pub download: DownloadConfig,

    /// Portrait selection loop settings
    pub selection: SelectionConfig,

    /// External media tool settings
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the platform API
    pub base_url: String,

    /// User-Agent sent with every request
    pub user_agent: String,

    /// Referer sent with every request
    pub referer: String,

    /// Requested playback quality
    pub quality: u32,

    /// Playback format flags (16 = DASH)
    pub fnval: u32,

    /// Timeout for metadata/playback/subtitle calls (seconds)
    pub request_timeout_secs: u64,

    /// Timeout for a single stream download (seconds)
    pub download_timeout_secs: u64,

    /// Connection establishment timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Retry policy applied by download tasks
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per remote operation, including the first
    pub max_attempts: u32,

    /// Base backoff delay (milliseconds)
    pub base_delay_ms: u64,

    /// Backoff ceiling (milliseconds)
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root of the per-item output tree
    pub output_root: PathBuf,

    /// Number of items downloaded concurrently
    pub max_workers: usize,

    /// Outcome table file name, relative to `output_root`
    pub records_file: String,

    /// Fetch subtitle tracks alongside the streams
    pub fetch_subtitles: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Number of accepted items to collect
    pub target_count: usize,

    /// Candidates dispatched per wave
    pub batch_size: usize,

    /// Accepted-set checkpoint file
    pub checkpoint_file: PathBuf,

    /// Rejected-id ledger file
    pub rejected_file: PathBuf,

    /// Minimum time between checkpoint writes inside a wave (seconds)
    pub save_interval_secs: u64,

    /// Column holding the ids in the candidate file
    pub candidate_column: String,

    /// Seed for the candidate shuffle (random when unset)
    pub shuffle_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// ffmpeg executable
    pub ffmpeg: String,

    /// ffprobe executable
    pub ffprobe: String,

    /// Wall-clock limit for one mux/slice invocation (seconds)
    pub timeout_secs: u64,

    /// Wall-clock limit for one probe invocation (seconds)
    pub probe_timeout_secs: u64,

    /// Concurrent media tool invocations
    pub max_workers: usize,

    /// Merge elementary streams after download
    pub merge_streams: bool,

    /// Keep elementary streams after a successful merge
    pub keep_streams: bool,

    /// Slice durations in seconds
    pub durations: Vec<u32>,

    /// x264 constant rate factor for re-encoded slices
    pub crf: u32,

    /// x264 preset for re-encoded slices
    pub preset: String,

    /// Threads per ffmpeg process
    pub threads: u32,

    /// Files per slicing batch
    pub batch_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bilibili.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
            referer: "https://www.bilibili.com".to_string(),
            quality: 80,
            fnval: 16,
            request_timeout_secs: 30,
            download_timeout_secs: 900,
            connect_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./video_data"),
            max_workers: 16,
            records_file: "download_records.csv".to_string(),
            fetch_subtitles: true,
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            target_count: 2146,
            batch_size: 100,
            checkpoint_file: PathBuf::from("portrait_videos_progress.csv"),
            rejected_file: PathBuf::from("portrait_videos_rejected.txt"),
            save_interval_secs: 300, // 5 minutes
            candidate_column: "bvid".to_string(),
            shuffle_seed: None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            timeout_secs: 180,
            probe_timeout_secs: 10,
            max_workers: num_cpus::get().min(8),
            merge_streams: true,
            keep_streams: false,
            durations: (1..=12).map(|i| i * 2).collect(),
            crf: 28,
            preset: "ultrafast".to_string(),
            threads: 2,
            batch_size: 100,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl DownloadConfig {
    /// Full path of the outcome table
    pub fn records_path(&self) -> PathBuf {
        self.output_root.join(&self.records_file)
    }
}

impl MediaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Upper bound for any worker pool, tied to the machine it runs on
pub fn worker_ceiling() -> usize {
    (num_cpus::get() * 4).clamp(4, 64)
}

/// Clamp a requested worker count into `1..=worker_ceiling()`
pub fn clamp_workers(requested: usize) -> usize {
    let ceiling = worker_ceiling();
    if requested > ceiling {
        tracing::warn!(
            "Requested {} workers exceeds ceiling of {}, clamping",
            requested,
            ceiling
        );
        ceiling
    } else {
        requested.max(1)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let config_paths = [
            "cohort-harvester.toml",
            "config/cohort-harvester.toml",
            "/etc/cohort-harvester/config.toml",
        ];

        for path in &config_paths {
            if Path::new(path).exists() {
                match Self::from_file(Path::new(path)) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(workers) = std::env::var("HARVESTER_WORKERS") {
            config.download.max_workers = workers.parse().unwrap_or(config.download.max_workers);
        }

        if let Ok(output_dir) = std::env::var("HARVESTER_OUTPUT_DIR") {
            config.download.output_root = PathBuf::from(output_dir);
        }

        if let Ok(target) = std::env::var("HARVESTER_TARGET") {
            config.selection.target_count = target.parse().unwrap_or(config.selection.target_count);
        }

        if let Ok(batch) = std::env::var("HARVESTER_BATCH_SIZE") {
            config.selection.batch_size = batch.parse().unwrap_or(config.selection.batch_size);
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration.
    ///
    /// Creates the output root; failing to do so is fatal, before any work
    /// is dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.download.max_workers == 0 {
            return Err(anyhow!("download.max_workers must be greater than 0"));
        }

        if self.media.max_workers == 0 {
            return Err(anyhow!("media.max_workers must be greater than 0"));
        }

        if self.selection.batch_size == 0 {
            return Err(anyhow!("selection.batch_size must be greater than 0"));
        }

        if self.selection.target_count == 0 {
            return Err(anyhow!("selection.target_count must be greater than 0"));
        }

        if self.media.durations.is_empty() || self.media.durations.contains(&0) {
            return Err(anyhow!("media.durations must be a non-empty list of positive seconds"));
        }

        if !self.download.output_root.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.download.output_root) {
                return Err(anyhow!(
                    "Cannot create output directory {}: {}",
                    self.download.output_root.display(),
                    e
                ));
            }
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Cohort Harvester Configuration:\n\
            - Output Root: {}\n\
            - Download Workers: {}\n\
            - Media Workers: {}\n\
            - Target: {} (batch size {})\n\
            - Checkpoint: {}\n\
            - Merge Streams: {}\n\
            - Retry Attempts: {}",
            self.download.output_root.display(),
            self.download.max_workers,
            self.media.max_workers,
            self.selection.target_count,
            self.selection.batch_size,
            self.selection.checkpoint_file.display(),
            self.media.merge_streams,
            self.api.retry.max_attempts,
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_output_root(mut self, dir: PathBuf) -> Self {
        self.config.download.output_root = dir;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.download.max_workers = workers;
        self
    }

    pub fn with_target(mut self, target: usize) -> Self {
        self.config.selection.target_count = target;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.selection.batch_size = batch_size;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: PathBuf) -> Self {
        self.config.selection.rejected_file = checkpoint.with_extension("rejected.txt");
        self.config.selection.checkpoint_file = checkpoint;
        self
    }

    pub fn with_api_base(mut self, base_url: String) -> Self {
        self.config.api.base_url = base_url;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.api.retry.max_attempts = attempts;
        self
    }

    pub fn with_save_interval(mut self, secs: u64) -> Self {
        self.config.selection.save_interval_secs = secs;
        self
    }

    pub fn enable_merge(mut self, enable: bool) -> Self {
        self.config.media.merge_streams = enable;
        self
    }

    pub fn enable_subtitles(mut self, enable: bool) -> Self {
        self.config.download.fetch_subtitles = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
