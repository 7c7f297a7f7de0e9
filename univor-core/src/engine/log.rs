//! Command log: one metadata-only line per finished target.
//!
//! Entries live in a bounded ring buffer and are mirrored through `tracing`.
//! When a path is configured they are also appended to a JSON-lines file by a
//! background writer thread. Definitions never appear here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

use crate::error::ErrorKind;
use crate::operation::Operation;
use crate::path::NodePath;

/// Maximum number of entries kept in memory
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Withdrawn,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Withdrawn => write!(f, "withdrawn"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub command_id: u64,
    pub operation: Operation,
    pub target: NodePath,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl CommandLogEntry {
    pub fn new(command_id: u64, operation: Operation, target: NodePath, outcome: Outcome) -> Self {
        Self {
            command_id,
            operation,
            target,
            outcome,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, kind: ErrorKind) -> Self {
        self.error = Some(kind);
        self
    }
}

/// Append-only JSON-lines file fed through a non-blocking writer.
///
/// Pending lines are flushed when the guard drops.
struct FileMirror {
    path: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl FileMirror {
    fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (writer, guard) = NonBlockingBuilder::default().lossy(false).finish(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            _guard: guard,
        })
    }

    fn append(&self, entry: &CommandLogEntry) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        // One write per line so lines never interleave.
        self.writer.clone().write_all(line.as_bytes())
    }
}

impl std::fmt::Debug for FileMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMirror").field("path", &self.path).finish()
    }
}

/// Thread-safe command log with ring buffer.
#[derive(Debug)]
pub struct CommandLog {
    entries: RwLock<VecDeque<CommandLogEntry>>,
    capacity: usize,
    file: Option<FileMirror>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            file: None,
        }
    }

    /// Also append every entry to `path` as one JSON object per line.
    ///
    /// If the file cannot be opened the log stays memory-only.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match FileMirror::open(path) {
            Ok(mirror) => self.file = Some(mirror),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to open command log file"),
        }
        self
    }

    pub fn record(&self, entry: CommandLogEntry) {
        match entry.outcome {
            Outcome::Succeeded => info!(
                command_id = entry.command_id,
                operation = %entry.operation,
                path = %entry.target,
                outcome = %entry.outcome,
                "Command finished"
            ),
            Outcome::Failed => warn!(
                command_id = entry.command_id,
                operation = %entry.operation,
                path = %entry.target,
                outcome = %entry.outcome,
                error = ?entry.error,
                "Command finished"
            ),
            Outcome::Withdrawn => debug!(
                command_id = entry.command_id,
                operation = %entry.operation,
                path = %entry.target,
                "Command withdrawn"
            ),
        }

        if let Some(mirror) = &self.file {
            if let Err(e) = mirror.append(&entry) {
                warn!(path = %mirror.path.display(), error = %e, "Failed to append to command log file");
            }
        }

        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Vec<CommandLogEntry> {
        self.query(None, None)
    }

    /// Entries for one target (or all), newest first.
    pub fn query(&self, target: Option<&NodePath>, limit: Option<usize>) -> Vec<CommandLogEntry> {
        self.entries
            .read()
            .map(|entries| {
                let mut result: Vec<CommandLogEntry> = entries
                    .iter()
                    .filter(|e| target.map_or(true, |t| &e.target == t))
                    .rev()
                    .cloned()
                    .collect();
                if let Some(limit) = limit {
                    result.truncate(limit);
                }
                result
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandLog {
    fn default() -> Self {
        Self::new()
    }
}
