//! Configuration for the RTSP load tester
//!
//! Configuration is loaded from a YAML file (or TOML, by extension), then
//! overridden from environment variables. Two source shapes are accepted:
//! a single `video` shared by `concurrent_streams` publishers, or an explicit
//! `video_sources` list with one publisher per entry. Both are normalised into
//! an ordered list of [`StreamSpec`] before any publisher is built.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoder::EncoderSettings;
use crate::publisher::SupervisionPolicy;

/// Main configuration for a load-test run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadTestConfig {
    /// Target RTSP server
    #[serde(default)]
    pub rtsp_server: Option<ServerConfig>,

    /// Single video shared by every stream
    #[serde(default)]
    pub video: Option<VideoConfig>,

    /// Explicit per-stream sources
    #[serde(default)]
    pub video_sources: Option<Vec<VideoSourceConfig>>,

    /// Encoder parameters shared by all publishers
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Run shape
    #[serde(default)]
    pub load_test: RunConfig,

    /// Stream-count and resource ceilings
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Reporting and logging
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Supervision timing
    #[serde(default)]
    pub supervision: SupervisionConfig,
}

/// RTSP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL every stream endpoint is derived from, e.g. `rtsp://localhost:8554`
    pub base_url: String,
}

/// Single-video source shared by all streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Path to the video file
    pub path: PathBuf,

    /// Loop the file indefinitely
    #[serde(rename = "loop", default = "default_loop")]
    pub looping: bool,

    /// Output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
}

/// One explicitly named stream source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSourceConfig {
    /// Stream name, also the last path segment of the endpoint
    pub name: String,

    /// Path to the video file
    pub video_path: PathBuf,

    /// Loop the file indefinitely
    #[serde(rename = "loop", default = "default_loop")]
    pub looping: bool,

    /// Output frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_loop() -> bool {
    true
}

fn default_fps() -> u32 {
    30
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Video codec
    #[serde(default = "default_codec")]
    pub codec: String,

    /// Encoder preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Target bitrate, in encoder notation (`2M`, `800k`)
    #[serde(default = "default_bitrate")]
    pub bitrate: String,

    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Encoder executable
    #[serde(default = "default_encoder_binary")]
    pub encoder_binary: String,

    /// Probe executable used to read source video properties
    #[serde(default = "default_probe_binary")]
    pub probe_binary: String,
}

fn default_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_bitrate() -> String {
    "2M".to_string()
}

fn default_pixel_format() -> String {
    "yuv420p".to_string()
}

fn default_encoder_binary() -> String {
    "ffmpeg".to_string()
}

fn default_probe_binary() -> String {
    "ffprobe".to_string()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            preset: default_preset(),
            bitrate: default_bitrate(),
            pixel_format: default_pixel_format(),
            encoder_binary: default_encoder_binary(),
            probe_binary: default_probe_binary(),
        }
    }
}

impl PublisherConfig {
    /// Encoder settings derived from this section
    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            binary: self.encoder_binary.clone(),
            codec: self.codec.clone(),
            preset: self.preset.clone(),
            bitrate: self.bitrate.clone(),
            pixel_format: self.pixel_format.clone(),
        }
    }
}

/// Run shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of streams derived from a shared `video`
    #[serde(default = "default_concurrent_streams")]
    pub concurrent_streams: usize,

    /// Test duration in seconds, 0 for unlimited
    #[serde(default)]
    pub duration: f64,

    /// Seconds between status reports
    #[serde(default = "default_report_interval")]
    pub report_interval: f64,
}

fn default_concurrent_streams() -> usize {
    3
}

fn default_report_interval() -> f64 {
    10.0
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrent_streams: default_concurrent_streams(),
            duration: 0.0,
            report_interval: default_report_interval(),
        }
    }
}

/// Longest accepted `duration` or `report_interval`: one year
pub const MAX_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Highest accepted output frame rate
pub const MAX_FPS: u32 = 1000;

impl RunConfig {
    /// Duration limit, `None` when the run is unlimited
    pub fn duration_limit(&self) -> Option<Duration> {
        if self.duration > 0.0 {
            Duration::try_from_secs_f64(self.duration).ok()
        } else {
            None
        }
    }

    /// Interval between status reports
    pub fn report_every(&self) -> Duration {
        Duration::try_from_secs_f64(self.report_interval.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Reject timings that are negative, not finite, or longer than [`MAX_SECONDS`]
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_seconds("load_test.duration", self.duration)?;
        check_seconds("load_test.report_interval", self.report_interval)
    }
}

fn check_seconds(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=MAX_SECONDS).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{} must be between 0 and {} seconds, got {}",
            field, MAX_SECONDS, value
        )));
    }
    Ok(())
}

/// Stream-count and resource ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upper bound on `concurrent_streams`
    #[serde(default = "default_max_streams")]
    pub max_streams: usize,

    /// System memory utilisation that aborts the run
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f32,

    /// System CPU utilisation that triggers a warning
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f32,
}

fn default_max_streams() -> usize {
    50
}

fn default_max_memory_percent() -> f32 {
    80.0
}

fn default_max_cpu_percent() -> f32 {
    90.0
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_streams: default_max_streams(),
            max_memory_percent: default_max_memory_percent(),
            max_cpu_percent: default_max_cpu_percent(),
        }
    }
}

/// Reporting and logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Persist the final report
    #[serde(default = "default_monitoring_enabled")]
    pub enabled: bool,

    /// Log level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where the final JSON report is written
    #[serde(default = "default_metrics_file")]
    pub metrics_file: PathBuf,

    /// Mirror the log output into a rolling file under `log_dir`
    #[serde(default = "default_log_to_file")]
    pub log_to_file: bool,

    /// Directory holding the rolling log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Log file names are `<prefix>.<date>.log`
    #[serde(default = "default_log_file_prefix")]
    pub log_file_prefix: String,

    /// Number of daily log files kept
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: usize,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

fn default_monitoring_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_metrics_file() -> PathBuf {
    PathBuf::from("logs/metrics.json")
}

fn default_log_to_file() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_file_prefix() -> String {
    "load_test".to_string()
}

fn default_log_retention_days() -> usize {
    7
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitoring_enabled(),
            log_level: default_log_level(),
            metrics_file: default_metrics_file(),
            log_to_file: default_log_to_file(),
            log_dir: default_log_dir(),
            log_file_prefix: default_log_file_prefix(),
            log_retention_days: default_log_retention_days(),
            json_logs: false,
        }
    }
}

/// Supervision timing. Defaults are the production values; tests shrink them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisionConfig {
    /// How often a publisher checks its encoder process
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Cooldown before restarting a crashed encoder
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Bound on waiting for a supervision task to exit
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Error count at which a publisher is unhealthy and quarantined
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,

    /// Delay between consecutive publisher starts
    #[serde(default = "default_start_stagger_ms")]
    pub start_stagger_ms: u64,

    /// Monitoring loop tick
    #[serde(default = "default_monitor_tick_ms")]
    pub monitor_tick_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_restart_delay_ms() -> u64 {
    2000
}

fn default_stop_grace_ms() -> u64 {
    5000
}

fn default_join_timeout_ms() -> u64 {
    5000
}

fn default_max_errors() -> u64 {
    10
}

fn default_start_stagger_ms() -> u64 {
    500
}

fn default_monitor_tick_ms() -> u64 {
    1000
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            max_errors: default_max_errors(),
            start_stagger_ms: default_start_stagger_ms(),
            monitor_tick_ms: default_monitor_tick_ms(),
        }
    }
}

impl SupervisionConfig {
    /// Per-publisher supervision policy
    pub fn policy(&self) -> SupervisionPolicy {
        SupervisionPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            max_errors: self.max_errors,
        }
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::from_millis(self.start_stagger_ms)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms.max(1))
    }
}

/// Where the streams of a run get their video from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceLayout {
    /// One file, `count` streams named `stream1..=count`
    Shared {
        path: PathBuf,
        looping: bool,
        fps: u32,
        count: usize,
    },

    /// One stream per explicitly named source
    PerStream(Vec<VideoSourceConfig>),
}

/// Fully resolved description of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Unique stream name
    pub name: String,
    /// Video file the publisher loops
    pub source_path: PathBuf,
    /// `{base_url}/{name}`
    pub endpoint: String,
    /// Repeat the input indefinitely
    pub looping: bool,
    /// Output frame rate
    pub fps: u32,
}

impl LoadTestConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a file; `.toml` files are parsed as TOML, anything else as YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Load from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override selected values from `RTSP_LOADTEST_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("RTSP_LOADTEST_BASE_URL") {
            self.rtsp_server = Some(ServerConfig { base_url: url });
        }
        if let Ok(count) = std::env::var("RTSP_LOADTEST_CONCURRENT_STREAMS") {
            if let Ok(c) = count.parse() {
                self.load_test.concurrent_streams = c;
            }
        }
        if let Ok(duration) = std::env::var("RTSP_LOADTEST_DURATION") {
            if let Ok(d) = duration.parse() {
                self.load_test.duration = d;
            }
        }
        if let Ok(level) = std::env::var("RTSP_LOADTEST_LOG_LEVEL") {
            self.monitoring.log_level = level;
        }
    }

    /// Check everything that would make the run impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.load_test.validate()?;
        self.stream_specs().map(|_| ())
    }

    /// Base URL of the target server
    pub fn base_url(&self) -> Result<&str, ConfigError> {
        let server = self.rtsp_server.as_ref().ok_or(ConfigError::MissingServer)?;
        let base = server.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::Invalid("rtsp_server.base_url is empty".to_string()));
        }
        Ok(base.trim_end_matches('/'))
    }

    /// Resolve which of the two source shapes is in effect. `video` wins when both are set.
    pub fn source_layout(&self) -> Result<SourceLayout, ConfigError> {
        if let Some(video) = &self.video {
            return Ok(SourceLayout::Shared {
                path: video.path.clone(),
                looping: video.looping,
                fps: video.fps,
                count: self.load_test.concurrent_streams,
            });
        }

        match &self.video_sources {
            Some(sources) if !sources.is_empty() => Ok(SourceLayout::PerStream(sources.clone())),
            _ => Err(ConfigError::MissingVideoSource),
        }
    }

    /// Normalise the configuration into one spec per stream, in creation order
    pub fn stream_specs(&self) -> Result<Vec<StreamSpec>, ConfigError> {
        let layout = self.source_layout()?;
        let base_url = self.base_url()?;

        let requested = match &layout {
            SourceLayout::Shared { count, .. } => *count,
            SourceLayout::PerStream(sources) => sources.len(),
        };
        let max = self.limits.max_streams;
        if requested > max {
            return Err(ConfigError::TooManyStreams { requested, max });
        }

        let specs: Vec<StreamSpec> = match layout {
            SourceLayout::Shared {
                path,
                looping,
                fps,
                count,
            } => {
                if count == 0 {
                    return Err(ConfigError::Invalid(
                        "load_test.concurrent_streams must be at least 1".to_string(),
                    ));
                }
                (1..=count)
                    .map(|index| {
                        let name = format!("stream{}", index);
                        StreamSpec {
                            endpoint: format!("{}/{}", base_url, name),
                            name,
                            source_path: path.clone(),
                            looping,
                            fps,
                        }
                    })
                    .collect()
            }
            SourceLayout::PerStream(sources) => {
                let mut seen = HashSet::new();
                let mut specs = Vec::with_capacity(sources.len());
                for source in sources {
                    if !seen.insert(source.name.clone()) {
                        return Err(ConfigError::DuplicateStreamName(source.name));
                    }
                    specs.push(StreamSpec {
                        endpoint: format!("{}/{}", base_url, source.name),
                        name: source.name,
                        source_path: source.video_path,
                        looping: source.looping,
                        fps: source.fps,
                    });
                }
                specs
            }
        };

        if let Some(spec) = specs.iter().find(|s| s.fps == 0 || s.fps > MAX_FPS) {
            return Err(ConfigError::Invalid(format!(
                "stream {} has fps {}, expected 1..={}",
                spec.name, spec.fps, MAX_FPS
            )));
        }

        Ok(specs)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No video source configured (use 'video' section)")]
    MissingVideoSource,

    #[error("RTSP server configuration missing")]
    MissingServer,

    #[error("Concurrent streams ({requested}) exceeds max limit ({max})")]
    TooManyStreams { requested: usize, max: usize },

    #[error("Duplicate stream name: {0}")]
    DuplicateStreamName(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
