//! Structured protocol event log
//!
//! A JSONL sink for terminal protocol events (queries the child sends,
//! responses the scrubber drops, stream lifecycle). Components receive an
//! `Option<Arc<ProtocolLogger>>`; `None` disables logging entirely.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{Result, SessiondError};

/// File name used inside the protocol log directory
pub const PROTOCOL_LOG_FILE: &str = "sessiond-protocol.jsonl";

/// Bytes of escape-sequence detail kept per entry
const MAX_DETAIL_BYTES: usize = 256;

/// Rotate once the file grows past this size
const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Which way the bytes were flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Child process output
    Out,
    /// Client input written to the PTY
    In,
    /// Daemon-internal event
    Internal,
}

/// A single protocol log record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub ts: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub direction: Direction,
    pub action: String,
    pub detail: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(category: &str, direction: Direction, action: &str) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            category: category.to_string(),
            session_id: None,
            stream_id: None,
            direction,
            action: action.to_string(),
            detail: String::new(),
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_stream(mut self, stream_id: &str) -> Self {
        self.stream_id = Some(stream_id.to_string());
        self
    }

    /// Attach a detail label and, when present, an escaped copy of the bytes
    pub fn with_detail(mut self, label: &str, seq: &[u8]) -> Self {
        if seq.is_empty() {
            self.detail = label.to_string();
        } else {
            let cut = &seq[..seq.len().min(MAX_DETAIL_BYTES)];
            self.detail = format!("{} {}", label, cut.escape_ascii());
        }
        self
    }
}

/// Append-only JSONL protocol logger
pub struct ProtocolLogger {
    path: PathBuf,
    writer: Mutex<LogWriter>,
}

struct LogWriter {
    out: BufWriter<File>,
    size: u64,
}

impl std::fmt::Debug for ProtocolLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolLogger")
            .field("path", &self.path)
            .finish()
    }
}

impl ProtocolLogger {
    /// Open (or create) the protocol log inside `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| SessiondError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = dir.join(PROTOCOL_LOG_FILE);
        let (out, size) = open_append(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(LogWriter { out, size }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one entry. Failures are reported through tracing only.
    pub fn log(&self, entry: LogEntry) {
        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "protocol log serialize failed");
                return;
            }
        };
        line.push(b'\n');

        let mut writer = self.writer.lock();
        if writer.size + line.len() as u64 > MAX_FILE_SIZE {
            if let Err(e) = self.rotate(&mut writer) {
                tracing::warn!(error = %e, path = %self.path.display(), "protocol log rotate failed");
            }
        }
        if let Err(e) = writer.out.write_all(&line).and_then(|_| writer.out.flush()) {
            tracing::warn!(error = %e, "protocol log write failed");
            return;
        }
        writer.size += line.len() as u64;
    }

    fn rotate(&self, writer: &mut LogWriter) -> Result<()> {
        writer.out.flush()?;
        let rotated = self.path.with_extension("jsonl.1");
        fs::rename(&self.path, &rotated)?;
        let (out, size) = open_append(&self.path)?;
        writer.out = out;
        writer.size = size;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SessiondError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((BufWriter::new(file), size))
}

/// Log through an optional logger; `None` is a no-op
pub fn log_event(logger: Option<&ProtocolLogger>, entry: impl FnOnce() -> LogEntry) {
    if let Some(logger) = logger {
        logger.log(entry());
    }
}
