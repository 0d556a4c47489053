//! Encoder process invocation
//!
//! Builds the argument list for the external streaming encoder and spawns it.
//! The engine treats the encoder as an opaque unit: it is started, watched for
//! exit and stopped, nothing more.

use std::fmt;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::StreamSpec;

/// Encoder parameters shared by every publisher of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Encoder executable
    pub binary: String,
    /// Video codec
    pub codec: String,
    /// Encoder preset
    pub preset: String,
    /// Target bitrate
    pub bitrate: String,
    /// Output pixel format
    pub pixel_format: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        crate::config::PublisherConfig::default().encoder_settings()
    }
}

/// A fully built encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    /// Executable to run
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
}

impl EncoderCommand {
    /// Build the invocation that publishes `spec` over RTSP.
    ///
    /// Input is read at native rate and either repeated indefinitely or played once;
    /// output uses a keyframe interval of twice the frame rate, no scene-change
    /// keyframes, and TCP transport.
    pub fn build(spec: &StreamSpec, settings: &EncoderSettings) -> Self {
        let fps = spec.fps.to_string();
        let stream_loop = if spec.looping { "-1" } else { "0" };

        let mut args: Vec<String> = Vec::with_capacity(34);

        // Input
        args.extend(
            ["-hide_banner", "-loglevel", "error", "-re", "-stream_loop", stream_loop, "-i"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(spec.source_path.to_string_lossy().into_owned());

        // Output
        args.extend([
            "-c:v".to_string(),
            settings.codec.clone(),
            "-preset".to_string(),
            settings.preset.clone(),
            "-b:v".to_string(),
            settings.bitrate.clone(),
            "-pix_fmt".to_string(),
            settings.pixel_format.clone(),
            "-r".to_string(),
            fps.clone(),
            "-f".to_string(),
            "rtsp".to_string(),
            "-g".to_string(),
            (spec.fps * 2).to_string(),
            "-keyint_min".to_string(),
            fps,
            "-sc_threshold".to_string(),
            "0".to_string(),
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
        ]);
        args.push(spec.endpoint.clone());

        Self {
            program: settings.binary.clone(),
            args,
        }
    }

    /// Destination endpoint (always the last argument)
    pub fn endpoint(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Starts encoder processes.
///
/// The returned child must have its stderr piped; the publisher drains it.
pub trait EncoderLauncher: Send + Sync {
    /// Spawn the process described by `command`
    fn launch(&self, command: &EncoderCommand) -> std::io::Result<Child>;
}

/// Launches the real encoder binary
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegLauncher;

impl EncoderLauncher for FfmpegLauncher {
    fn launch(&self, command: &EncoderCommand) -> std::io::Result<Child> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a terminal Ctrl+C reaches us, not the encoder directly
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn()
    }
}
