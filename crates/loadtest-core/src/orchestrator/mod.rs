//! Load test orchestrator
//!
//! Owns the fleet of [`StreamPublisher`]s for one run: builds them from the
//! configuration, starts them with a small stagger, runs the monitoring loop
//! (status reports, resource ceilings, health audit, duration limit) and tears
//! everything down into a [`LoadTestReport`].
//!
//! The orchestrator itself is driven through `&mut self`, so `start` and `stop`
//! can never race. Other tasks (signal handlers) reach it only through a
//! [`ShutdownHandle`].

mod monitor;
mod shutdown;

pub use shutdown::ShutdownHandle;

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;

use crate::config::LoadTestConfig;
use crate::encoder::{EncoderLauncher, FfmpegLauncher};
use crate::error::Result;
use crate::probe::{FfprobeProber, SourceProber};
use crate::publisher::StreamPublisher;
use crate::report::{LoadTestReport, TerminationReason};
use crate::resources::{ResourceMonitor, SystemResourceMonitor};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Created, not started
    Idle,
    /// Publishers started, monitoring loop active
    Running,
    /// Stopped; the report has been produced
    Terminated,
}

/// Drives one load-test run
pub struct LoadTestOrchestrator {
    config: LoadTestConfig,
    publishers: Vec<StreamPublisher>,
    state: RunState,
    started_at: Option<Instant>,
    shutdown: ShutdownHandle,
    prober: Arc<dyn SourceProber>,
    launcher: Arc<dyn EncoderLauncher>,
    resources: Box<dyn ResourceMonitor>,
}

impl LoadTestOrchestrator {
    /// Create an orchestrator for a validated configuration.
    ///
    /// Configuration errors (no source, no server, too many streams) are fatal here.
    pub fn new(config: LoadTestConfig) -> Result<Self> {
        config.validate()?;

        let prober = Arc::new(FfprobeProber::new(config.publisher.probe_binary.clone()));

        Ok(Self {
            config,
            publishers: Vec::new(),
            state: RunState::Idle,
            started_at: None,
            shutdown: ShutdownHandle::new(),
            prober,
            launcher: Arc::new(FfmpegLauncher),
            resources: Box::new(SystemResourceMonitor::new()),
        })
    }

    /// Use a different source prober
    pub fn with_prober(mut self, prober: Arc<dyn SourceProber>) -> Self {
        self.prober = prober;
        self
    }

    /// Use a different encoder launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn EncoderLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Use a different resource monitor
    pub fn with_resource_monitor(mut self, monitor: Box<dyn ResourceMonitor>) -> Self {
        self.resources = monitor;
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn publishers(&self) -> &[StreamPublisher] {
        &self.publishers
    }

    /// Handle for requesting shutdown from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Build one publisher per configured stream.
    ///
    /// Runs once; later calls are no-ops. If any stream cannot be created the
    /// whole setup fails and no publishers are kept.
    pub async fn create_publishers(&mut self) -> Result<()> {
        if !self.publishers.is_empty() {
            tracing::debug!("Publishers already created");
            return Ok(());
        }

        let specs = self.config.stream_specs()?;
        let encoder = self.config.publisher.encoder_settings();
        let policy = self.config.supervision.policy();

        let mut publishers = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = spec.name.clone();
            let publisher = StreamPublisher::create(
                spec,
                encoder.clone(),
                policy.clone(),
                self.prober.as_ref(),
                self.launcher.clone(),
            )
            .await?;
            tracing::info!("Created publisher for stream: {}", name);
            publishers.push(publisher);
        }

        tracing::info!("Created {} stream publishers", publishers.len());
        self.publishers = publishers;
        Ok(())
    }

    /// Endpoint of every publisher, in creation order
    pub fn get_stream_urls(&self) -> Vec<String> {
        self.publishers
            .iter()
            .map(|p| p.endpoint().to_string())
            .collect()
    }

    /// Run the load test.
    ///
    /// Creates publishers if needed, starts them in order, then blocks in the
    /// monitoring loop until the duration elapses, memory runs out, the monitoring
    /// loop fails, or shutdown is requested. Returns the final report.
    pub async fn start(&mut self) -> Result<Option<LoadTestReport>> {
        match self.state {
            RunState::Running => {
                tracing::warn!("Load test already running");
                return Ok(None);
            }
            RunState::Terminated => {
                tracing::warn!("Load test already finished");
                return Ok(None);
            }
            RunState::Idle => {}
        }

        if self.publishers.is_empty() {
            self.create_publishers().await?;
        }

        self.state = RunState::Running;
        self.started_at = Some(Instant::now());

        let rule = "=".repeat(60);
        tracing::info!("{}", rule);
        tracing::info!("Starting RTSP Load Test");
        tracing::info!("{}", rule);

        self.start_publishers().await;

        let reason = self.monitoring_loop().await;
        Ok(self.finish(reason).await)
    }

    /// Start publishers in creation order, pausing between starts
    async fn start_publishers(&self) {
        let stagger = self.config.supervision.start_stagger();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut started = 0;

        for (index, publisher) in self.publishers.iter().enumerate() {
            if self.shutdown.is_triggered() {
                tracing::warn!("Shutdown requested during startup, skipping remaining streams");
                break;
            }

            publisher.start();
            started += 1;

            if index + 1 < self.publishers.len() {
                tokio::select! {
                    _ = tokio::time::sleep(stagger) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }

        tracing::info!("Started {} streams", started);
    }

    /// Stop the run. Idempotent: returns `None` if the run is not active.
    pub async fn stop(&mut self) -> Option<LoadTestReport> {
        let reason = self.shutdown.reason().unwrap_or(TerminationReason::Requested);
        self.finish(reason).await
    }

    async fn finish(&mut self, reason: TerminationReason) -> Option<LoadTestReport> {
        if self.state != RunState::Running {
            return None;
        }

        tracing::info!("Stopping all streams... ({})", reason);
        self.state = RunState::Terminated;
        self.shutdown.trigger(reason);

        let results = join_all(
            self.publishers
                .iter()
                .map(|publisher| async move { (publisher.name(), publisher.stop().await) }),
        )
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                tracing::error!("Error stopping publisher {}: {}", name, e);
            }
        }

        let report = self.build_report(reason);
        report.log();

        if self.config.monitoring.enabled {
            let path = &self.config.monitoring.metrics_file;
            match report.write_to(path) {
                Ok(()) => tracing::info!("Report saved to: {}", path.display()),
                Err(e) => tracing::error!("Failed to save report to {}: {}", path.display(), e),
            }
        }

        tracing::info!("Load test stopped");
        Some(report)
    }

    fn build_report(&self, reason: TerminationReason) -> LoadTestReport {
        let elapsed = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let streams = self.publishers.iter().map(|p| p.get_stats()).collect();
        LoadTestReport::new(elapsed, reason, streams)
    }
}

#[cfg(test)]
mod tests;
