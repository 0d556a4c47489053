//! Source video inspection
//!
//! Every publisher reads the dimensions, frame count and native frame rate of
//! its source before it exists. The default prober shells out to `ffprobe`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::ProbeError;

/// Properties of a source video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProperties {
    pub width: u32,
    pub height: u32,
    /// Native frame rate
    pub fps: f64,
    pub total_frames: u64,
    pub duration_secs: f64,
}

impl VideoProperties {
    /// `WIDTHxHEIGHT`
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Reads video properties from a file
#[async_trait]
pub trait SourceProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<VideoProperties, ProbeError>;
}

/// Prober backed by the `ffprobe` binary
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: String,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl SourceProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<VideoProperties, ProbeError> {
        let display = path.display().to_string();

        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProbeError::Spawn {
                binary: self.binary.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: display,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_ffprobe_json(&display, &output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Interpret `ffprobe -of json` output for the first video stream
pub(crate) fn parse_ffprobe_json(path: &str, raw: &[u8]) -> Result<VideoProperties, ProbeError> {
    let malformed = |reason: String| ProbeError::Malformed {
        path: path.to_string(),
        reason,
    };

    let parsed: FfprobeOutput =
        serde_json::from_slice(raw).map_err(|e| malformed(e.to_string()))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| malformed("no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(malformed("missing frame dimensions".to_string())),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    let duration = stream
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or_else(|| (duration * fps).round() as u64);

    let duration_secs = if duration > 0.0 {
        duration
    } else if fps > 0.0 {
        total_frames as f64 / fps
    } else {
        0.0
    };

    Ok(VideoProperties {
        width,
        height,
        fps,
        total_frames,
        duration_secs,
    })
}

/// `30000/1001` or `25` to frames per second; `0/0` yields `None`
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value > 0.0).then_some(value)
}
