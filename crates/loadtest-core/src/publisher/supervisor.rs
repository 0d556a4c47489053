//! Per-publisher supervision loop
//!
//! While the publisher is running the loop launches the encoder, polls it until
//! it exits or a stop is requested, and restarts it after a fixed cooldown when
//! it exits on its own. Every unexpected exit (and every failed launch) bumps
//! the error counter; there is no retry limit at this level.

use std::process::ExitStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::diagnostics::MAX_EXCERPT_CHARS;
use super::Shared;
use crate::encoder::EncoderCommand;
use crate::error::PublisherError;

/// Result of a launch attempt
enum Launch {
    /// Encoder is running and owned by the process slot
    Started {
        pid: Option<u32>,
        drain: Option<JoinHandle<()>>,
    },
    /// A stop arrived before the process could be registered
    Cancelled,
}

/// Why the poll phase ended
enum PollOutcome {
    /// Stop was requested; the process belongs to `stop()` now
    StopRequested,
    /// The process exited by itself
    Exited(Option<ExitStatus>),
}

pub(super) async fn supervise(shared: Arc<Shared>) {
    let name = shared.spec.name.clone();

    while shared.running.load(Ordering::SeqCst) {
        let command = EncoderCommand::build(&shared.spec, &shared.encoder);
        tracing::debug!("[{}] Encoder command: {}", name, command);

        let drain = match launch(&shared, &command).await {
            Ok(Launch::Started { pid, drain }) => {
                tracing::debug!("[{}] Encoder started (pid {:?})", name, pid);
                drain
            }
            Ok(Launch::Cancelled) => break,
            Err(e) => {
                let errors = shared.record_error();
                tracing::error!(
                    "[{}] Failed to launch {}: {} (errors: {})",
                    name,
                    command.program,
                    e,
                    errors
                );
                pause(&shared, shared.policy.restart_delay).await;
                continue;
            }
        };

        match poll_until_exit(&shared).await {
            PollOutcome::StopRequested => {
                if let Some(drain) = drain {
                    drain.abort();
                }
                break;
            }
            PollOutcome::Exited(status) => {
                if let Some(drain) = drain {
                    finish_drain(drain, shared.policy.poll_interval).await;
                }

                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }

                let errors = shared.record_error();
                tracing::error!(
                    "[{}] Encoder process ended unexpectedly ({}), restarting in {:?} (errors: {}). Error: {}",
                    name,
                    describe_exit(status),
                    shared.policy.restart_delay,
                    errors,
                    shared.stderr_tail.excerpt(MAX_EXCERPT_CHARS)
                );

                pause(&shared, shared.policy.restart_delay).await;
            }
        }
    }

    tracing::debug!("[{}] Supervision loop exited", name);
}

/// Spawn the encoder and register it in the process slot.
///
/// The running flag is checked under the slot lock, and `stop()` clears the flag
/// before taking the lock, so a process is never registered after a stop has
/// emptied the slot.
async fn launch(shared: &Shared, command: &EncoderCommand) -> std::io::Result<Launch> {
    let mut slot = shared.process.lock().await;
    if !shared.running.load(Ordering::SeqCst) {
        return Ok(Launch::Cancelled);
    }

    shared.stderr_tail.clear();
    let mut child = shared.launcher.launch(command)?;
    let pid = child.id();
    let drain = child
        .stderr
        .take()
        .map(|stderr| shared.stderr_tail.spawn_drain(shared.spec.name.clone(), stderr));

    *slot = Some(child);
    Ok(Launch::Started { pid, drain })
}

async fn poll_until_exit(shared: &Shared) -> PollOutcome {
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            return PollOutcome::StopRequested;
        }

        {
            let mut slot = shared.process.lock().await;
            let Some(child) = slot.as_mut() else {
                return PollOutcome::StopRequested;
            };

            match child.try_wait() {
                Ok(Some(status)) => {
                    slot.take();
                    return PollOutcome::Exited(Some(status));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[{}] Cannot query encoder status: {}", shared.spec.name, e);
                    // Dropping the child kills it
                    slot.take();
                    return PollOutcome::Exited(None);
                }
            }
        }

        tokio::time::sleep(shared.policy.poll_interval).await;
    }
}

/// Let the drain reach EOF so the excerpt is complete.
///
/// Descendants of the encoder can hold the pipe open past its exit; the drain is
/// aborted after `wait` so it never writes into the next launch's tail.
async fn finish_drain(mut drain: JoinHandle<()>, wait: Duration) {
    if tokio::time::timeout(wait, &mut drain).await.is_err() {
        drain.abort();
    }
}

/// Sleep for `delay`, waking early if the publisher is stopped
async fn pause(shared: &Shared, delay: Duration) {
    let deadline = Instant::now() + delay;
    while shared.running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(shared.policy.poll_interval.min(deadline - now)).await;
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    let Some(status) = status else {
        return "status unknown".to_string();
    };

    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }

    status.to_string()
}

/// Terminate an encoder process: graceful request, bounded wait, then force kill.
pub(super) async fn terminate(
    stream: &str,
    mut child: Child,
    grace: Duration,
) -> Result<(), PublisherError> {
    let pid = child.id();

    if let Ok(Some(_)) = child.try_wait() {
        return Ok(());
    }

    request_graceful_exit(stream, &mut child, pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!("[{}] Encoder exited after stop request ({})", stream, status);
            return Ok(());
        }
        Ok(Err(e)) => {
            tracing::warn!("[{}] Error waiting for encoder exit: {}", stream, e);
        }
        Err(_) => {
            tracing::warn!("[{}] Force killing encoder process", stream);
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::warn!("[{}] Kill request failed: {}", stream, e);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_)) => Ok(()),
        _ => {
            tracing::error!(
                "[{}] Encoder process (pid {:?}) survived forced termination; the process is leaked",
                stream,
                pid
            );
            Err(PublisherError::ProcessLeak {
                stream: stream.to_string(),
                pid,
            })
        }
    }
}

#[cfg(unix)]
fn request_graceful_exit(stream: &str, child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match pid {
        Some(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!("[{}] SIGTERM to {} failed: {}", stream, pid, e);
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(_stream: &str, child: &mut Child, _pid: Option<u32>) {
    // No SIGTERM equivalent
    let _ = child.start_kill();
}
