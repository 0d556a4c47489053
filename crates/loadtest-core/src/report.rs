//! Final load-test report
//!
//! Built once when the orchestrator stops, logged, and persisted as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::publisher::PublisherStats;

/// Why the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Configured duration elapsed
    DurationElapsed,
    /// System memory exceeded its ceiling
    MemoryLimit,
    /// SIGINT or SIGTERM
    Signal,
    /// Explicit stop request
    Requested,
    /// The monitoring loop failed
    Error,
}

impl TerminationReason {
    /// Get display string for the termination reason
    pub fn display(&self) -> &'static str {
        match self {
            Self::DurationElapsed => "Test duration reached",
            Self::MemoryLimit => "Memory limit exceeded",
            Self::Signal => "Shutdown signal",
            Self::Requested => "Stop requested",
            Self::Error => "Monitoring error",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display())
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub test_duration_seconds: f64,
    pub total_streams: usize,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub termination_reason: TerminationReason,
    pub streams: Vec<PublisherStats>,
}

impl LoadTestReport {
    pub fn new(
        duration: Duration,
        termination_reason: TerminationReason,
        streams: Vec<PublisherStats>,
    ) -> Self {
        let ended_at = Utc::now();
        let started_at = ended_at - chrono::Duration::from_std(duration).unwrap_or_default();

        Self {
            test_duration_seconds: duration.as_secs_f64(),
            total_streams: streams.len(),
            started_at,
            ended_at,
            termination_reason,
            streams,
        }
    }

    pub fn quarantined_streams(&self) -> impl Iterator<Item = &PublisherStats> {
        self.streams.iter().filter(|s| s.quarantined)
    }

    /// Write the report as pretty-printed JSON, creating parent directories
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Log the report, one line per fact
    pub fn log(&self) {
        let rule = "=".repeat(60);
        tracing::info!("{}", rule);
        tracing::info!("FINAL REPORT");
        tracing::info!("{}", rule);
        tracing::info!(
            "Test Duration: {:.2}s ({:.2} minutes)",
            self.test_duration_seconds,
            self.test_duration_seconds / 60.0
        );
        tracing::info!("Total Streams: {}", self.total_streams);
        tracing::info!("Ended by: {}", self.termination_reason);

        for stream in &self.streams {
            tracing::info!("Stream: {}", stream.stream_name);
            tracing::info!("  URL: {}", stream.endpoint);
            tracing::info!("  Uptime: {:.2}s", stream.uptime_seconds);
            tracing::info!("  Errors: {}", stream.error_count);
            tracing::info!("  Resolution: {}", stream.resolution);
            if stream.quarantined {
                tracing::info!("  Quarantined: yes");
            }
        }
        tracing::info!("{}", rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str, errors: u64, quarantined: bool) -> PublisherStats {
        PublisherStats {
            stream_name: name.to_string(),
            endpoint: format!("rtsp://localhost:8554/{}", name),
            running: false,
            uptime_seconds: 12.5,
            error_count: errors,
            video_path: "videos/test.mp4".to_string(),
            resolution: "1280x720".to_string(),
            fps: 30,
            is_alive: false,
            quarantined,
        }
    }

    #[test]
    fn test_report_counts_streams() {
        let report = LoadTestReport::new(
            Duration::from_secs(90),
            TerminationReason::DurationElapsed,
            vec![stats("stream1", 0, false), stats("stream2", 10, true)],
        );

        assert_eq!(report.total_streams, 2);
        assert_eq!(report.test_duration_seconds, 90.0);
        assert!(report.started_at < report.ended_at);
        let quarantined: Vec<_> = report.quarantined_streams().map(|s| &s.stream_name).collect();
        assert_eq!(quarantined, ["stream2"]);
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/metrics.json");

        let report = LoadTestReport::new(
            Duration::from_millis(1500),
            TerminationReason::MemoryLimit,
            vec![stats("stream1", 3, false)],
        );
        report.write_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"termination_reason\": \"memory_limit\""));
        assert!(raw.contains("\"test_duration_seconds\": 1.5"));

        let restored = LoadTestReport::read_from(&path).unwrap();
        assert_eq!(restored.streams[0].error_count, 3);
    }
}
