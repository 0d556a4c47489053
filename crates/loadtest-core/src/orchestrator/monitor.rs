//! The orchestrator's monitoring loop
//!
//! One tick: duration check, periodic status report, resource ceilings, health
//! audit, then sleep until the next tick (or until shutdown is requested).

use std::time::{Duration, Instant};

use super::LoadTestOrchestrator;
use crate::report::TerminationReason;
use crate::resources::{ResourceError, ResourceSample};

impl LoadTestOrchestrator {
    pub(super) async fn monitoring_loop(&mut self) -> TerminationReason {
        let tick = self.config.supervision.monitor_tick();
        let report_every = self.config.load_test.report_every();
        let duration_limit = self.config.load_test.duration_limit();
        let started = self.started_at.unwrap_or_else(Instant::now);

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut last_report = Instant::now();

        loop {
            if let Some(reason) = self.shutdown.reason() {
                tracing::info!("Shutdown requested ({}), stopping...", reason);
                return reason;
            }

            let elapsed = started.elapsed();
            if let Some(limit) = duration_limit {
                if elapsed >= limit {
                    tracing::info!(
                        "Test duration reached ({:.1}s), stopping...",
                        limit.as_secs_f64()
                    );
                    return TerminationReason::DurationElapsed;
                }
            }

            match self.tick(&mut last_report, report_every).await {
                Ok(Some(reason)) => return reason,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Error in monitoring loop: {}", e);
                    return TerminationReason::Error;
                }
            }

            // Never sleep past the duration limit
            let sleep_for = duration_limit
                .map(|limit| limit.saturating_sub(started.elapsed()).min(tick))
                .unwrap_or(tick);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
    }

    /// Body of one monitoring tick. `Some(reason)` ends the run.
    async fn tick(
        &mut self,
        last_report: &mut Instant,
        report_every: Duration,
    ) -> Result<Option<TerminationReason>, ResourceError> {
        let sample = self.resources.sample()?;

        if last_report.elapsed() >= report_every {
            self.print_status_report(&sample);
            *last_report = Instant::now();
        }

        if let Some(reason) = self.check_resource_limits(&sample) {
            return Ok(Some(reason));
        }

        self.check_stream_health().await;
        Ok(None)
    }

    fn print_status_report(&self, sample: &ResourceSample) {
        let rule = "=".repeat(60);
        tracing::info!("{}", rule);
        tracing::info!("STATUS REPORT");
        tracing::info!("{}", rule);

        tracing::info!("System CPU: {:.1}%", sample.cpu_percent);
        tracing::info!(
            "System Memory: {:.1}% ({:.2}GB / {:.2}GB)",
            sample.memory_percent,
            sample.memory_used_gb(),
            sample.memory_total_gb()
        );

        let healthy = self.publishers.iter().filter(|p| p.is_healthy()).count();
        tracing::info!("Streams: {}/{} healthy", healthy, self.publishers.len());

        for publisher in &self.publishers {
            let stats = publisher.get_stats();
            let status = if stats.is_alive { "✓" } else { "✗" };
            tracing::info!(
                "  {} {}: Uptime={:.0}s, Errors={}, Resolution={}",
                status,
                stats.stream_name,
                stats.uptime_seconds,
                stats.error_count,
                stats.resolution
            );
        }

        tracing::info!("{}", rule);
    }

    /// Memory over its ceiling ends the run; CPU over its ceiling only warns.
    fn check_resource_limits(&self, sample: &ResourceSample) -> Option<TerminationReason> {
        let limits = &self.config.limits;

        if sample.memory_percent > limits.max_memory_percent {
            tracing::error!(
                "Memory usage ({:.1}%) exceeds limit ({}%). Stopping test...",
                sample.memory_percent,
                limits.max_memory_percent
            );
            return Some(TerminationReason::MemoryLimit);
        }

        if sample.cpu_percent > limits.max_cpu_percent {
            tracing::warn!(
                "CPU usage ({:.1}%) exceeds limit ({}%)",
                sample.cpu_percent,
                limits.max_cpu_percent
            );
        }

        None
    }

    /// Log every unhealthy publisher and quarantine those over the error threshold.
    ///
    /// Publishers already quarantined are still reported, never quarantined twice.
    pub(super) async fn check_stream_health(&self) -> HealthAudit {
        let mut audit = HealthAudit::default();

        let unhealthy: Vec<_> = self.publishers.iter().filter(|p| !p.is_healthy()).collect();
        if unhealthy.is_empty() {
            return audit;
        }

        tracing::warn!("Found {} unhealthy streams", unhealthy.len());

        for publisher in unhealthy {
            let errors = publisher.error_count();
            tracing::warn!(
                "[{}] Unhealthy: running={}, alive={}, errors={}, quarantined={}",
                publisher.name(),
                publisher.is_running(),
                publisher.is_task_alive(),
                errors,
                publisher.is_quarantined()
            );
            audit.unhealthy.push(publisher.name().to_string());

            if publisher.is_quarantined() || errors < publisher.policy().max_errors {
                continue;
            }

            tracing::error!(
                "Stream {} has too many errors ({}), stopping it",
                publisher.name(),
                errors
            );
            if let Err(e) = publisher.quarantine().await {
                tracing::error!("Error quarantining {}: {}", publisher.name(), e);
            }
            audit.quarantined.push(publisher.name().to_string());
        }

        audit
    }
}

/// Outcome of one health audit
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct HealthAudit {
    /// Every publisher failing the health check, quarantined ones included
    pub unhealthy: Vec<String>,
    /// Publishers quarantined by this audit
    pub quarantined: Vec<String>,
}
