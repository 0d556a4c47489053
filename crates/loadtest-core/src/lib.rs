//! RTSP Load Tester Engine
//!
//! Drives many concurrent simulated live video feeds against an RTSP server.
//! Each feed is an external encoder process looping a video file to one
//! endpoint; a supervisor keeps it alive and an orchestrator watches the whole
//! fleet against resource ceilings and a duration limit.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          rtsp-loadtest-core                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌────────────────────┐  │
//! │  │  LoadTestConfig  │──▶│   StreamSpec[]   │──▶│  SourceProber      │  │
//! │  │  (yaml / toml)   │   │  (normalised)    │   │  (ffprobe)         │  │
//! │  └──────────────────┘   └────────┬─────────┘   └────────────────────┘  │
//! │                                  │ one per stream                       │
//! │                                  ▼                                      │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │  LoadTestOrchestrator                                            │  │
//! │  │  monitoring loop: duration │ resources (sysinfo) │ health audit  │  │
//! │  └────────┬─────────────────────────────────────────────────────────┘  │
//! │           │ start / stop / quarantine                                   │
//! │           ▼                                                             │
//! │  ┌──────────────────┐   ┌──────────────────┐                           │
//! │  │  StreamPublisher │──▶│  Encoder process │──▶ rtsp://server/<name>   │
//! │  │  (supervisor)    │   │  (ffmpeg)        │                           │
//! │  └──────────────────┘   └──────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod publisher;
pub mod report;
pub mod resources;

pub use config::{ConfigError, LoadTestConfig, StreamSpec};
pub use encoder::{EncoderCommand, EncoderLauncher, EncoderSettings, FfmpegLauncher};
pub use error::{Error, ProbeError, PublisherError, Result};
pub use orchestrator::{LoadTestOrchestrator, RunState, ShutdownHandle};
pub use probe::{FfprobeProber, SourceProber, VideoProperties};
pub use publisher::{PublisherStats, StreamPublisher, SupervisionPolicy};
pub use report::{LoadTestReport, TerminationReason};
pub use resources::{ResourceMonitor, ResourceSample, SystemResourceMonitor};
