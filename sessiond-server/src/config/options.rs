//! Resolved runtime options
//!
//! [`AppConfig`] is what the file says; [`SessionOptions`] is what the daemon
//! runs with after CLI overrides and path defaults are applied.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sessiond_utils::{
    record_dir, socket_path, state_dir, transcript_dir, ProtocolLogger, Result, SessiondError,
};

use super::AppConfig;

/// Settings shared by the server and every session it creates
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub socket_path: PathBuf,
    pub check_protocol_version: bool,
    /// `None` disables idle closing
    pub idle_timeout: Option<Duration>,

    pub buffer_bytes: usize,

    /// `None` disables transcripts
    pub transcript_dir: Option<PathBuf>,
    pub transcript_max_bytes: u64,
    pub transcript_trim_threshold: u64,
    pub transcript_tail_bytes: u64,

    /// `None` disables raw capture
    pub record_dir: Option<PathBuf>,

    /// `None` disables state persistence
    pub state_dir: Option<PathBuf>,
    pub snapshot_interval: Duration,

    pub history_lines: usize,
    pub cols: u16,
    pub rows: u16,

    pub initial_credit: i64,
    /// Zero waits forever
    pub credit_timeout: Duration,
    pub bootstrap_chunk_size: usize,
    pub queue_depth: usize,

    pub protocol_log: Option<Arc<ProtocolLogger>>,
}

impl SessionOptions {
    /// Resolve a validated config; the protocol logger is attached separately
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let state_dir = if config.daemon.snapshot_interval_ms > 0 {
            Some(config.daemon.state_dir.clone().unwrap_or_else(state_dir))
        } else {
            None
        };
        let transcript_dir = config
            .transcript
            .enabled
            .then(|| config.transcript.dir.clone().unwrap_or_else(transcript_dir));
        let record_dir = config
            .record
            .enabled
            .then(|| config.record.dir.clone().unwrap_or_else(record_dir));

        Ok(Self {
            socket_path: config
                .daemon
                .socket_path
                .clone()
                .unwrap_or_else(socket_path),
            check_protocol_version: config.daemon.check_protocol_version,
            idle_timeout: parse_idle_timeout(&config.daemon.idle_timeout)?,
            buffer_bytes: config.buffer.max_bytes,
            transcript_dir,
            transcript_max_bytes: config.transcript.max_bytes,
            transcript_trim_threshold: config.transcript.trim_threshold,
            transcript_tail_bytes: config.transcript.tail_bytes,
            record_dir,
            state_dir,
            snapshot_interval: Duration::from_millis(config.daemon.snapshot_interval_ms),
            history_lines: config.terminal.history_lines,
            cols: config.terminal.cols,
            rows: config.terminal.rows,
            initial_credit: config.stream.initial_credit,
            credit_timeout: Duration::from_millis(config.stream.credit_timeout_ms),
            bootstrap_chunk_size: config.stream.bootstrap_chunk_size,
            queue_depth: config.stream.queue_depth,
            protocol_log: None,
        })
    }

    /// Options for tests: everything on disk lives under `dir`
    pub fn for_dir(dir: &std::path::Path) -> Self {
        Self {
            socket_path: dir.join("sessiond.sock"),
            transcript_dir: Some(dir.join("terminal_logs")),
            state_dir: Some(dir.join("state")),
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        let config = AppConfig::default();
        Self {
            socket_path: socket_path(),
            check_protocol_version: config.daemon.check_protocol_version,
            idle_timeout: None,
            buffer_bytes: config.buffer.max_bytes,
            transcript_dir: None,
            transcript_max_bytes: config.transcript.max_bytes,
            transcript_trim_threshold: config.transcript.trim_threshold,
            transcript_tail_bytes: config.transcript.tail_bytes,
            record_dir: None,
            state_dir: None,
            snapshot_interval: Duration::from_millis(config.daemon.snapshot_interval_ms),
            history_lines: config.terminal.history_lines,
            cols: config.terminal.cols,
            rows: config.terminal.rows,
            initial_credit: config.stream.initial_credit,
            credit_timeout: Duration::from_millis(config.stream.credit_timeout_ms),
            bootstrap_chunk_size: config.stream.bootstrap_chunk_size,
            queue_depth: config.stream.queue_depth,
            protocol_log: None,
        }
    }
}

/// Parse an idle timeout.
///
/// `0`, `off`, `disabled`, `false` (and the empty string) disable it.
/// Otherwise a number with an optional `ms`, `s`, `m` or `h` suffix; a bare
/// number is seconds.
pub fn parse_idle_timeout(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    if matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "0" | "off" | "disabled" | "false"
    ) {
        return Ok(None);
    }

    let invalid = || SessiondError::config(format!("invalid idle timeout: {:?}", value));

    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let amount: u64 = number.parse().map_err(|_| invalid())?;
    let duration = match unit {
        "" | "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        _ => return Err(invalid()),
    };

    Ok((!duration.is_zero()).then_some(duration))
}

/// `1`, `true`, `yes`, `on` (any case)
pub fn env_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
