//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rtsp_loadtest_core::config::StreamSpec;
use rtsp_loadtest_core::{
    EncoderCommand, EncoderLauncher, ProbeError, SourceProber, SupervisionPolicy, VideoProperties,
};
use tokio::process::{Child, Command};

/// Prober that reports a 720p clip without reading the file
pub struct StaticProber;

#[async_trait]
impl SourceProber for StaticProber {
    async fn probe(&self, _path: &Path) -> Result<VideoProperties, ProbeError> {
        Ok(VideoProperties {
            width: 1280,
            height: 720,
            fps: 30.0,
            total_frames: 300,
            duration_secs: 10.0,
        })
    }
}

/// Runs a shell script in place of the encoder and records every pid it starts
pub struct ScriptLauncher {
    script: String,
    pids: Mutex<Vec<u32>>,
}

impl ScriptLauncher {
    pub fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
            pids: Mutex::new(Vec::new()),
        })
    }

    /// Encoder that runs until it is signalled
    pub fn long_running() -> Arc<Self> {
        Self::new("exec sleep 30")
    }

    /// Encoder that fails immediately with a diagnostic
    pub fn crashing() -> Arc<Self> {
        Self::new("echo 'rtsp://localhost:8554/stream1: Connection refused' >&2; exit 1")
    }

    pub fn launches(&self) -> Vec<u32> {
        self.pids.lock().unwrap().clone()
    }
}

impl EncoderLauncher for ScriptLauncher {
    fn launch(&self, _command: &EncoderCommand) -> std::io::Result<Child> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        if let Some(pid) = child.id() {
            self.pids.lock().unwrap().push(pid);
        }
        Ok(child)
    }
}

/// Launcher whose every launch fails
pub struct BrokenLauncher;

impl EncoderLauncher for BrokenLauncher {
    fn launch(&self, _command: &EncoderCommand) -> std::io::Result<Child> {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "encoder binary not found",
        ))
    }
}

/// Short timings so crash/restart cycles complete within a test
pub fn fast_policy() -> SupervisionPolicy {
    SupervisionPolicy {
        poll_interval: Duration::from_millis(10),
        restart_delay: Duration::from_millis(50),
        stop_grace: Duration::from_millis(500),
        join_timeout: Duration::from_secs(2),
        max_errors: 10,
    }
}

/// Write a placeholder video file into `dir`
pub fn video_file(dir: &Path) -> PathBuf {
    let path = dir.join("test.mp4");
    std::fs::write(&path, b"placeholder").unwrap();
    path
}

pub fn stream_spec(name: &str, source_path: PathBuf) -> StreamSpec {
    StreamSpec {
        name: name.to_string(),
        source_path,
        endpoint: format!("rtsp://localhost:8554/{}", name),
        looping: true,
        fps: 30,
    }
}

/// Poll `condition` until it holds or `timeout` expires
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Whether a process with `pid` still exists
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
