#![cfg(unix)]

use super::*;
use crate::config::ConfigError;
use crate::encoder::EncoderCommand;
use crate::error::{Error, ProbeError};
use crate::probe::VideoProperties;
use crate::resources::{ResourceError, ResourceSample};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};

struct StaticProber;

#[async_trait]
impl SourceProber for StaticProber {
    async fn probe(&self, _path: &Path) -> std::result::Result<VideoProperties, ProbeError> {
        Ok(VideoProperties {
            width: 1280,
            height: 720,
            fps: 30.0,
            total_frames: 300,
            duration_secs: 10.0,
        })
    }
}

/// Runs `sh` instead of the encoder; endpoints ending in `/bad` crash immediately
struct ScriptLauncher;

impl EncoderLauncher for ScriptLauncher {
    fn launch(&self, command: &EncoderCommand) -> std::io::Result<Child> {
        let crashes = command.endpoint().is_some_and(|e| e.ends_with("/bad"));
        let script = if crashes {
            "echo 'Connection refused' >&2; exit 1"
        } else {
            "exec sleep 30"
        };
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

enum Step {
    Memory(f32),
    Fail,
}

/// Replays a fixed sequence of samples, repeating the last one
struct ScriptedMonitor {
    steps: VecDeque<Step>,
}

impl ScriptedMonitor {
    fn new(steps: Vec<Step>) -> Box<Self> {
        Box::new(Self {
            steps: steps.into(),
        })
    }
}

impl ResourceMonitor for ScriptedMonitor {
    fn sample(&mut self) -> std::result::Result<ResourceSample, ResourceError> {
        let step = if self.steps.len() > 1 {
            self.steps.pop_front()
        } else {
            self.steps.front().map(|s| match s {
                Step::Memory(m) => Step::Memory(*m),
                Step::Fail => Step::Fail,
            })
        };

        match step {
            Some(Step::Fail) => Err(ResourceError::Unavailable("sampler broke".to_string())),
            Some(Step::Memory(memory_percent)) => Ok(ResourceSample {
                cpu_percent: 12.0,
                memory_percent,
                memory_used_bytes: 1024,
                memory_total_bytes: 2048,
            }),
            None => Err(ResourceError::Unavailable("no samples".to_string())),
        }
    }
}

struct Fixture {
    dir: TempDir,
    video: String,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("test.mp4");
        std::fs::write(&video, b"not really a video").unwrap();
        Self {
            video: video.display().to_string(),
            dir,
        }
    }

    fn shared_config(&self, streams: usize, duration: f64) -> LoadTestConfig {
        let yaml = format!(
            r#"
rtsp_server:
  base_url: "rtsp://localhost:8554"
video:
  path: "{video}"
load_test:
  concurrent_streams: {streams}
  duration: {duration}
monitoring:
  enabled: false
supervision:
  poll_interval_ms: 10
  restart_delay_ms: 20
  stop_grace_ms: 1000
  join_timeout_ms: 2000
  start_stagger_ms: 5
  monitor_tick_ms: 20
"#,
            video = self.video,
        );
        LoadTestConfig::from_yaml_str(&yaml).unwrap()
    }

    fn orchestrator(
        &self,
        config: LoadTestConfig,
        monitor: Box<ScriptedMonitor>,
    ) -> LoadTestOrchestrator {
        LoadTestOrchestrator::new(config)
            .unwrap()
            .with_prober(Arc::new(StaticProber))
            .with_launcher(Arc::new(ScriptLauncher))
            .with_resource_monitor(monitor)
    }
}

#[test]
fn test_new_rejects_invalid_config() {
    let fixture = Fixture::new();

    let mut no_source = fixture.shared_config(1, 0.0);
    no_source.video = None;
    assert!(matches!(
        LoadTestOrchestrator::new(no_source),
        Err(Error::Config(ConfigError::MissingVideoSource))
    ));

    let mut too_many = fixture.shared_config(3, 0.0);
    too_many.limits.max_streams = 2;
    assert!(matches!(
        LoadTestOrchestrator::new(too_many),
        Err(Error::Config(ConfigError::TooManyStreams {
            requested: 3,
            max: 2
        }))
    ));
}

#[tokio::test]
async fn test_create_publishers_names_streams() {
    let fixture = Fixture::new();
    let mut orchestrator =
        fixture.orchestrator(fixture.shared_config(3, 0.0), ScriptedMonitor::new(vec![]));

    orchestrator.create_publishers().await.unwrap();
    orchestrator.create_publishers().await.unwrap();

    assert_eq!(orchestrator.state(), RunState::Idle);
    assert_eq!(
        orchestrator.get_stream_urls(),
        [
            "rtsp://localhost:8554/stream1",
            "rtsp://localhost:8554/stream2",
            "rtsp://localhost:8554/stream3",
        ]
    );
    assert!(orchestrator.publishers().iter().all(|p| !p.is_running()));
}

#[tokio::test]
async fn test_missing_video_fails_creation() {
    let fixture = Fixture::new();
    let mut config = fixture.shared_config(2, 0.0);
    if let Some(video) = config.video.as_mut() {
        video.path = fixture.dir.path().join("missing.mp4");
    }

    let mut orchestrator = fixture.orchestrator(config, ScriptedMonitor::new(vec![]));
    let err = orchestrator.create_publishers().await.unwrap_err();

    assert!(matches!(err, Error::Publisher(_)));
    assert!(orchestrator.publishers().is_empty());
}

#[tokio::test]
async fn test_memory_ceiling_ends_run() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator(
        fixture.shared_config(3, 20.0),
        ScriptedMonitor::new(vec![Step::Memory(40.0), Step::Memory(85.0)]),
    );

    let report = orchestrator.start().await.unwrap().unwrap();

    assert_eq!(report.termination_reason, TerminationReason::MemoryLimit);
    assert_eq!(report.total_streams, 3);
    // Two ticks plus startup and teardown, far short of the 20s limit
    assert!(report.test_duration_seconds < 20.0);
    assert!(report.test_duration_seconds < 2.0);
    assert_eq!(orchestrator.state(), RunState::Terminated);
    assert!(orchestrator
        .publishers()
        .iter()
        .all(|p| !p.is_running() && !p.is_task_alive()));

    assert!(orchestrator.stop().await.is_none());
    assert!(orchestrator.start().await.unwrap().is_none());
}

#[tokio::test]
async fn test_duration_limit_ends_run() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator(
        fixture.shared_config(2, 0.3),
        ScriptedMonitor::new(vec![Step::Memory(10.0)]),
    );

    let report = orchestrator.start().await.unwrap().unwrap();

    assert_eq!(report.termination_reason, TerminationReason::DurationElapsed);
    assert!(report.test_duration_seconds >= 0.3);
    // Limit + one 20ms tick + teardown of two SIGTERM-responsive encoders
    assert!(
        report.test_duration_seconds < 0.3 + 0.02 + 0.5,
        "stopped after {:.3}s",
        report.test_duration_seconds
    );
    assert!(report.streams.iter().all(|s| s.error_count == 0 && !s.quarantined));
}

#[tokio::test]
async fn test_failing_stream_is_quarantined() {
    let fixture = Fixture::new();
    let mut config = fixture.shared_config(1, 1.0);
    config.supervision.max_errors = 2;
    config.video_sources = Some(vec![
        crate::config::VideoSourceConfig {
            name: "good".to_string(),
            video_path: fixture.video.clone().into(),
            looping: true,
            fps: 30,
        },
        crate::config::VideoSourceConfig {
            name: "bad".to_string(),
            video_path: fixture.video.clone().into(),
            looping: true,
            fps: 30,
        },
    ]);
    config.video = None;

    let mut orchestrator =
        fixture.orchestrator(config, ScriptedMonitor::new(vec![Step::Memory(10.0)]));
    let report = orchestrator.start().await.unwrap().unwrap();

    assert_eq!(report.termination_reason, TerminationReason::DurationElapsed);
    assert_eq!(report.total_streams, 2);

    let good = &report.streams[0];
    assert_eq!(good.stream_name, "good");
    assert!(!good.quarantined);
    assert_eq!(good.error_count, 0);

    let bad = &report.streams[1];
    assert_eq!(bad.stream_name, "bad");
    assert!(bad.quarantined);
    assert!(bad.error_count >= 2);
    assert!(!bad.running);
}

#[tokio::test]
async fn test_health_audit_spares_healthy_sibling() {
    let fixture = Fixture::new();
    let mut config = fixture.shared_config(1, 0.0);
    config.supervision.max_errors = 2;
    config.video_sources = Some(
        ["good", "bad"]
            .into_iter()
            .map(|name| crate::config::VideoSourceConfig {
                name: name.to_string(),
                video_path: fixture.video.clone().into(),
                looping: true,
                fps: 30,
            })
            .collect(),
    );
    config.video = None;

    let mut orchestrator = fixture.orchestrator(config, ScriptedMonitor::new(vec![]));
    orchestrator.create_publishers().await.unwrap();
    for publisher in orchestrator.publishers() {
        publisher.start();
    }

    let good = &orchestrator.publishers()[0];
    let bad = &orchestrator.publishers()[1];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while bad.error_count() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bad.error_count() >= 2);

    let audit = orchestrator.check_stream_health().await;
    assert_eq!(audit.unhealthy, ["bad"]);
    assert_eq!(audit.quarantined, ["bad"]);

    assert!(bad.is_quarantined());
    assert!(!bad.is_running());
    assert!(good.is_running() && good.is_healthy());
    assert!(!good.is_quarantined());

    // Still reported as unhealthy, but not stopped a second time
    let audit = orchestrator.check_stream_health().await;
    assert_eq!(audit.unhealthy, ["bad"]);
    assert!(audit.quarantined.is_empty());
    assert!(good.is_running() && good.is_healthy());

    good.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_handle_stops_run() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator(
        fixture.shared_config(2, 0.0),
        ScriptedMonitor::new(vec![Step::Memory(10.0)]),
    );

    let handle = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.trigger(TerminationReason::Signal);
    });

    let report = tokio::time::timeout(Duration::from_secs(10), orchestrator.start())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.termination_reason, TerminationReason::Signal);
    assert!(orchestrator.stop().await.is_none());
}

#[tokio::test]
async fn test_sampling_failure_ends_run() {
    let fixture = Fixture::new();
    let mut orchestrator = fixture.orchestrator(
        fixture.shared_config(1, 0.0),
        ScriptedMonitor::new(vec![Step::Memory(10.0), Step::Fail]),
    );

    let report = orchestrator.start().await.unwrap().unwrap();
    assert_eq!(report.termination_reason, TerminationReason::Error);
}

#[tokio::test]
async fn test_report_is_persisted_when_monitoring_enabled() {
    let fixture = Fixture::new();
    let metrics = fixture.dir.path().join("logs/metrics.json");

    let mut config = fixture.shared_config(1, 0.1);
    config.monitoring.enabled = true;
    config.monitoring.metrics_file = metrics.clone();

    let mut orchestrator =
        fixture.orchestrator(config, ScriptedMonitor::new(vec![Step::Memory(10.0)]));
    let report = orchestrator.start().await.unwrap().unwrap();

    let saved = LoadTestReport::read_from(&metrics).unwrap();
    assert_eq!(saved.total_streams, 1);
    assert_eq!(saved.termination_reason, report.termination_reason);
    assert_eq!(saved.streams[0].endpoint, "rtsp://localhost:8554/stream1");
}
