//! Tracing setup
//!
//! `RUST_LOG` wins over everything. Otherwise the configured level is used,
//! raised by `-v` flags. Unless disabled, output is mirrored into a daily
//! rolling file under `log_dir`, keeping `log_retention_days` files.

use anyhow::{Context, Result};
use rtsp_loadtest_core::config::MonitoringConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter directive when `RUST_LOG` is unset
pub fn default_directive(log_level: &str, verbose: u8) -> String {
    match verbose {
        0 => log_level.trim().to_ascii_lowercase(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Daily rolling appender for `<log_dir>/<prefix>.<date>.log`
pub fn rolling_appender(monitoring: &MonitoringConfig) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(monitoring.log_file_prefix.clone())
        .filename_suffix("log")
        .max_log_files(monitoring.log_retention_days.max(1))
        .build(&monitoring.log_dir)
        .with_context(|| format!("Cannot create log file in {}", monitoring.log_dir.display()))
}

/// Install the global subscriber: stderr (plain or JSON) plus the rolling log file.
///
/// The returned guard flushes the file writer; hold it until exit.
pub fn init(
    monitoring: &MonitoringConfig,
    verbose: u8,
    json: bool,
) -> Result<Option<WorkerGuard>> {
    let directive = default_directive(&monitoring.log_level, verbose);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .with_context(|| format!("Invalid log level: {}", monitoring.log_level))?;

    let json = json || monitoring.json_logs;
    let (plain_layer, json_layer) = if json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    let (file_layer, guard) = if monitoring.log_to_file {
        let (writer, guard) = tracing_appender::non_blocking(rolling_appender(monitoring)?);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_level_is_normalised() {
        assert_eq!(default_directive("INFO", 0), "info");
        assert_eq!(default_directive(" Warn ", 0), "warn");
    }

    #[test]
    fn test_verbose_flags_raise_level() {
        assert_eq!(default_directive("INFO", 1), "debug");
        assert_eq!(default_directive("ERROR", 3), "trace");
    }

    #[test]
    fn test_rolling_file_lands_in_log_dir() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let monitoring = MonitoringConfig {
            log_dir: dir.path().join("logs"),
            ..MonitoringConfig::default()
        };

        let mut appender = rolling_appender(&monitoring).unwrap();
        appender.write_all(b"Starting load test\n").unwrap();
        appender.flush().unwrap();

        let files: Vec<_> = std::fs::read_dir(&monitoring.log_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1, "files: {:?}", files);
        assert!(files[0].starts_with("load_test."));
        assert!(files[0].ends_with(".log"));

        let contents = std::fs::read_to_string(monitoring.log_dir.join(&files[0])).unwrap();
        assert!(contents.contains("Starting load test"));
    }
}
