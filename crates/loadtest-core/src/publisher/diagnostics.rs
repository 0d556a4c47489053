//! Encoder stderr capture
//!
//! The encoder's stderr is drained continuously so the pipe never fills, and the
//! most recent lines are retained for the unexpected-exit log entry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;

/// Longest diagnostic excerpt attached to a log entry, in characters
pub const MAX_EXCERPT_CHARS: usize = 500;

const MAX_TAIL_LINES: usize = 32;

/// Bounded buffer holding the last lines an encoder wrote to stderr
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == MAX_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// The most recent output, at most `max_chars` characters
    pub fn excerpt(&self, max_chars: usize) -> String {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let joined = lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n");

        let total = joined.chars().count();
        if total <= max_chars {
            joined
        } else {
            joined.chars().skip(total - max_chars).collect()
        }
    }

    /// Drain `stderr` into this tail until EOF
    pub fn spawn_drain(&self, stream_name: String, stderr: ChildStderr) -> JoinHandle<()> {
        let tail = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::debug!("[{}] encoder: {}", stream_name, line);
                        tail.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("[{}] stderr read failed: {}", stream_name, e);
                        break;
                    }
                }
            }
        })
    }
}
