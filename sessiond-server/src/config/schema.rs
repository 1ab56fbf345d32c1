//! Configuration schema structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub buffer: BufferConfig,
    pub transcript: TranscriptConfig,
    pub record: RecordConfig,
    pub terminal: TerminalConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket path (default: `$XDG_RUNTIME_DIR/sessiond/sessiond.sock`)
    pub socket_path: Option<PathBuf>,
    /// Idle timeout before an unused session is closed
    /// (`30m`, `90s`, `500ms`; `0`/`off` disables)
    pub idle_timeout: String,
    /// Reject requests whose protocol version differs from the daemon's
    pub check_protocol_version: bool,
    /// Minimum time between persisted state snapshots; 0 disables persistence
    pub snapshot_interval_ms: u64,
    /// Where persisted state goes (default: XDG state dir)
    pub state_dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            idle_timeout: "30m".into(),
            check_protocol_version: true,
            snapshot_interval_ms: 2_000,
            state_dir: None,
        }
    }
}

/// Replay buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_bytes: 512 * 1024,
        }
    }
}

/// Output transcript settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    /// Size a transcript is cut back to when trimmed
    pub max_bytes: u64,
    /// Size that triggers a trim
    pub trim_threshold: u64,
    /// Bytes served by a transcript backlog read
    pub tail_bytes: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_bytes: 2 * 1024 * 1024,
            trim_threshold: 4 * 1024 * 1024,
            tail_bytes: 256 * 1024,
        }
    }
}

/// Raw PTY capture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

/// Emulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Scrollback kept by the emulator; 0 disables history
    pub history_lines: usize,
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            history_lines: 5000,
            cols: 80,
            rows: 24,
        }
    }
}

/// Attach stream flow control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Credit granted to a stream before its first ack
    pub initial_credit: i64,
    /// How long live data waits for credit before the stream is closed
    pub credit_timeout_ms: u64,
    pub bootstrap_chunk_size: usize,
    /// Events queued per stream before it is dropped
    pub queue_depth: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_credit: 256 * 1024,
            credit_timeout_ms: 30_000,
            bootstrap_chunk_size: sessiond_protocol::BOOTSTRAP_CHUNK_SIZE,
            queue_depth: crate::session::DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Protocol event log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub protocol_log: bool,
    pub protocol_log_dir: Option<PathBuf>,
}
