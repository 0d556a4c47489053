//! Pre-flight checks and console output around a run

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use rtsp_loadtest_core::LoadTestConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Check that the encoder binary runs; returns its version line
pub async fn validate_encoder(binary: &str) -> Result<String> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        _ => {
            tracing::error!("✗ {} is not installed or not in PATH", binary);
            tracing::error!("Please install FFmpeg: https://ffmpeg.org/download.html");
            bail!("encoder binary {} is not available", binary);
        }
    };

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    tracing::info!("✓ FFmpeg is installed: {}", version);
    Ok(version)
}

/// Source files referenced by the configuration that do not exist
pub fn missing_sources(config: &LoadTestConfig) -> Result<Vec<PathBuf>> {
    let sources: BTreeSet<PathBuf> = config
        .stream_specs()?
        .into_iter()
        .map(|spec| spec.source_path)
        .collect();

    Ok(sources.into_iter().filter(|path| !path.exists()).collect())
}

/// Fail unless every configured video file exists
pub fn check_sources(config: &LoadTestConfig) -> Result<()> {
    let missing = missing_sources(config)?;
    if missing.is_empty() {
        tracing::info!("✓ All video files exist");
        return Ok(());
    }

    tracing::error!("✗ Found {} missing video files", missing.len());
    for path in &missing {
        tracing::error!("  - {}", path.display());
    }
    bail!("{} video file(s) not found", missing.len())
}

/// Whether a prompt answer means yes
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}

/// Ask the operator to confirm the RTSP server is up
pub async fn confirm_server_running() -> Result<bool> {
    println!("\n⚠️  IMPORTANT: Make sure MediaMTX is running!");
    println!("Download from: https://github.com/bluenviron/mediamtx");
    println!("Run with: ./mediamtx (or mediamtx.exe on Windows)\n");
    print!("Is MediaMTX running? (yes/no): ");
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .context("Failed to read answer")?;

    Ok(is_affirmative(&answer))
}

pub fn print_banner() {
    println!(
        r#"
    ╔═══════════════════════════════════════════════════════╗
    ║         RTSP Load Tester for AI Pipelines             ║
    ║              Multiple Stream Publisher                ║
    ╚═══════════════════════════════════════════════════════╝
"#
    );
}

pub fn print_stream_info(urls: &[String]) {
    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("RTSP STREAM URLS");
    println!("{}", rule);
    println!("\nYour pipeline can connect to these streams:\n");

    for (index, url) in urls.iter().enumerate() {
        println!("  {}. {}", index + 1, url);
    }

    if let Some(first) = urls.first() {
        println!("\nExample command to view a stream:");
        println!("  ffplay -rtsp_transport tcp {}", first);
    }
    println!("{}\n", rule);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_prompt_answers() {
        assert!(is_affirmative("yes\n"));
        assert!(is_affirmative(" Y "));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_missing_sources_are_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.mp4");
        std::fs::write(&present, b"x").unwrap();

        let yaml = format!(
            r#"
rtsp_server:
  base_url: rtsp://localhost:8554
video_sources:
  - {{ name: one, video_path: "{a}" }}
  - {{ name: two, video_path: "{b}" }}
  - {{ name: three, video_path: "{b}" }}
"#,
            a = present.display(),
            b = dir.path().join("b.mp4").display()
        );
        let config = LoadTestConfig::from_yaml_str(&yaml).unwrap();

        let missing = missing_sources(&config).unwrap();
        assert_eq!(missing, vec![dir.path().join("b.mp4")]);
        assert_err!(check_sources(&config));

        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        assert_ok!(check_sources(&config));
    }

    #[tokio::test]
    async fn test_unknown_encoder_fails_validation() {
        assert_err!(validate_encoder("definitely-not-a-real-encoder").await);
    }
}
