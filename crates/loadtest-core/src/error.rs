//! Error types for the load-test engine

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for load-test engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while probing a source video
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Source file does not exist
    #[error("Video file not found: {0}")]
    NotFound(String),

    /// The probe binary could not be started
    #[error("Failed to run {binary}: {reason}")]
    Spawn {
        /// Probe binary that failed to start
        binary: String,
        /// Underlying error
        reason: String,
    },

    /// The probe ran but rejected the file
    #[error("Cannot open video file {path}: {reason}")]
    Failed {
        /// Path that was probed
        path: String,
        /// Diagnostic output from the probe
        reason: String,
    },

    /// The probe output could not be interpreted
    #[error("Malformed probe output for {path}: {reason}")]
    Malformed {
        /// Path that was probed
        path: String,
        /// What was wrong with the output
        reason: String,
    },
}

/// Errors raised by a single stream publisher
#[derive(Debug, Error)]
pub enum PublisherError {
    /// Source video could not be inspected, so the stream cannot exist
    #[error("[{stream}] {source}")]
    Probe {
        /// Stream name
        stream: String,
        /// Probe failure
        #[source]
        source: ProbeError,
    },

    /// The encoder process survived both graceful and forced termination
    #[error("[{stream}] encoder process (pid {pid:?}) could not be terminated")]
    ProcessLeak {
        /// Stream name
        stream: String,
        /// Last known pid of the process
        pid: Option<u32>,
    },

    /// The supervision task did not exit within its join timeout
    #[error("[{stream}] supervision task did not exit within {timeout_ms}ms")]
    TaskJoinTimeout {
        /// Stream name
        stream: String,
        /// Timeout that expired
        timeout_ms: u64,
    },
}

/// Top-level error type for the load-test engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A publisher could not be created or stopped cleanly
    #[error("Publisher error: {0}")]
    Publisher(#[from] PublisherError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
