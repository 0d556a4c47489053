//! Stream publisher
//!
//! A [`StreamPublisher`] owns one simulated live feed: the encoder process that
//! pushes a looping video file to one RTSP endpoint, and the supervision task
//! that keeps that process alive.
//!
//! Field ownership:
//! - `running` is written by `start()`/`stop()` and read by the supervision task.
//! - `error_count` is only ever incremented, by the supervision task.
//! - the process slot holds at most one child; the supervision task fills and
//!   empties it, `stop()` may take it to terminate the process.

mod diagnostics;
mod supervisor;

pub use diagnostics::{StderrTail, MAX_EXCERPT_CHARS};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::config::StreamSpec;
use crate::encoder::{EncoderLauncher, EncoderSettings};
use crate::error::{ProbeError, PublisherError};
use crate::probe::{SourceProber, VideoProperties};

/// Timing and health thresholds for one publisher
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisionPolicy {
    /// Encoder liveness poll interval; bounds stop-request latency
    pub poll_interval: Duration,
    /// Cooldown before restarting a crashed encoder
    pub restart_delay: Duration,
    /// Wait between graceful and forced termination
    pub stop_grace: Duration,
    /// Bound on waiting for the supervision task to exit
    pub join_timeout: Duration,
    /// Error count at which the publisher is no longer healthy
    pub max_errors: u64,
}

impl Default for SupervisionPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            restart_delay: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
            max_errors: 10,
        }
    }
}

/// Point-in-time view of a publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherStats {
    pub stream_name: String,
    pub endpoint: String,
    pub running: bool,
    /// Seconds since the last `start()`, 0 if never started
    pub uptime_seconds: f64,
    pub error_count: u64,
    pub video_path: String,
    pub resolution: String,
    /// Configured output frame rate
    pub fps: u32,
    /// Supervision task is alive
    pub is_alive: bool,
    /// Stopped by the orchestrator for exceeding the error threshold
    #[serde(default)]
    pub quarantined: bool,
}

/// State shared between a publisher and its supervision task
pub(crate) struct Shared {
    spec: StreamSpec,
    encoder: EncoderSettings,
    policy: SupervisionPolicy,
    launcher: Arc<dyn EncoderLauncher>,
    running: AtomicBool,
    error_count: AtomicU64,
    process: tokio::sync::Mutex<Option<Child>>,
    stderr_tail: StderrTail,
}

impl Shared {
    /// Increment the error counter, returning the new value
    fn record_error(&self) -> u64 {
        self.error_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Publishes one video file to one RTSP endpoint, restarting the encoder on crash
pub struct StreamPublisher {
    shared: Arc<Shared>,
    properties: VideoProperties,
    quarantined: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamPublisher {
    /// Create a publisher for `spec`.
    ///
    /// Fails if the source video does not exist or cannot be probed.
    pub async fn create(
        spec: StreamSpec,
        encoder: EncoderSettings,
        policy: SupervisionPolicy,
        prober: &dyn SourceProber,
        launcher: Arc<dyn EncoderLauncher>,
    ) -> Result<Self, PublisherError> {
        let probe_err = |source: ProbeError| PublisherError::Probe {
            stream: spec.name.clone(),
            source,
        };

        if !spec.source_path.exists() {
            return Err(probe_err(ProbeError::NotFound(
                spec.source_path.display().to_string(),
            )));
        }

        let properties = prober.probe(&spec.source_path).await.map_err(probe_err)?;

        tracing::info!(
            "[{}] Video properties: {} @ {:.2}fps, {} frames, {:.2}s duration",
            spec.name,
            properties.resolution(),
            properties.fps,
            properties.total_frames,
            properties.duration_secs
        );

        Ok(Self {
            shared: Arc::new(Shared {
                spec,
                encoder,
                policy,
                launcher,
                running: AtomicBool::new(false),
                error_count: AtomicU64::new(0),
                process: tokio::sync::Mutex::new(None),
                stderr_tail: StderrTail::new(),
            }),
            properties,
            quarantined: AtomicBool::new(false),
            started_at: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.spec.name
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.spec.endpoint
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.shared.spec
    }

    pub fn properties(&self) -> &VideoProperties {
        &self.properties
    }

    pub fn policy(&self) -> &SupervisionPolicy {
        &self.shared.policy
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.shared.error_count.load(Ordering::SeqCst)
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::SeqCst)
    }

    /// Start publishing. Logs and returns if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("[{}] Stream already running", self.name());
            return;
        }

        *lock(&self.started_at) = Some(Instant::now());

        let handle = tokio::spawn(supervisor::supervise(self.shared.clone()));
        if let Some(previous) = lock(&self.task).replace(handle) {
            if !previous.is_finished() {
                tracing::warn!(
                    "[{}] Previous supervision task still alive at restart, aborting it",
                    self.name()
                );
                previous.abort();
            }
        }

        tracing::info!("[{}] Started publishing to {}", self.name(), self.endpoint());
    }

    /// Stop publishing.
    ///
    /// Terminates the encoder (graceful request, bounded wait, forced kill) and
    /// waits a bounded time for the supervision task. Always returns once those
    /// waits expire; an error means a process or task could not be reclaimed.
    /// Calling it again is a no-op apart from logging.
    pub async fn stop(&self) -> Result<(), PublisherError> {
        let name = self.name().to_string();
        tracing::info!("[{}] Stopping stream...", name);

        self.shared.running.store(false, Ordering::SeqCst);

        let mut result = Ok(());

        let child = self.shared.process.lock().await.take();
        if let Some(child) = child {
            if let Err(e) = supervisor::terminate(&name, child, self.shared.policy.stop_grace).await
            {
                result = Err(e);
            }
        }

        let handle = lock(&self.task).take();
        if let Some(mut handle) = handle {
            let timeout = self.shared.policy.join_timeout;
            let joined = tokio::time::timeout(timeout, &mut handle).await;
            if let Ok(Err(e)) = &joined {
                if e.is_panic() {
                    tracing::error!("[{}] Supervision task panicked: {}", name, e);
                }
            }
            if joined.is_err() {
                tracing::error!(
                    "[{}] Supervision task did not exit within {:?}",
                    name,
                    timeout
                );
                // Keep the handle so liveness stays observable
                *lock(&self.task) = Some(handle);
                if result.is_ok() {
                    result = Err(PublisherError::TaskJoinTimeout {
                        stream: name.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }

        tracing::info!("[{}] Stream stopped", name);
        result
    }

    /// Stop this publisher because its error count reached the threshold
    pub async fn quarantine(&self) -> Result<(), PublisherError> {
        self.quarantined.store(true, Ordering::SeqCst);
        self.stop().await
    }

    /// Whether the supervision task is currently alive
    pub fn is_task_alive(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Healthy iff running, supervised, and under the error threshold
    pub fn is_healthy(&self) -> bool {
        self.is_running()
            && self.is_task_alive()
            && self.error_count() < self.shared.policy.max_errors
    }

    /// Uptime since the last start, zero if never started
    pub fn uptime(&self) -> Duration {
        lock(&self.started_at)
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn get_stats(&self) -> PublisherStats {
        PublisherStats {
            stream_name: self.name().to_string(),
            endpoint: self.endpoint().to_string(),
            running: self.is_running(),
            uptime_seconds: self.uptime().as_secs_f64(),
            error_count: self.error_count(),
            video_path: self.shared.spec.source_path.display().to_string(),
            resolution: self.properties.resolution(),
            fps: self.shared.spec.fps,
            is_alive: self.is_task_alive(),
            quarantined: self.is_quarantined(),
        }
    }
}

/// Dropping a publisher without `stop()` still ends supervision and kills the
/// encoder (forced, no grace period).
impl Drop for StreamPublisher {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }

        // The task may hold the slot lock; its cancellation drops the child instead
        if let Ok(mut slot) = self.shared.process.try_lock() {
            if let Some(mut child) = slot.take() {
                if let Err(e) = child.start_kill() {
                    tracing::warn!("[{}] Kill on drop failed: {}", self.name(), e);
                }
            }
        }
    }
}

impl std::fmt::Debug for StreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPublisher")
            .field("name", &self.name())
            .field("endpoint", &self.endpoint())
            .field("running", &self.is_running())
            .field("error_count", &self.error_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
