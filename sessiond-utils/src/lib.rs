//! sessiond-utils: Common utilities shared across sessiond crates
//!
//! This crate provides:
//! - Unified error types ([`SessiondError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - The injectable protocol event log ([`ProtocolLogger`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;
pub mod protocol_log;

pub use error::{Result, SessiondError};
pub use logging::{init_logging_with_config, LogConfig, LogOutput};
pub use protocol_log::{log_event, Direction, LogEntry, ProtocolLogger};

pub use paths::{
    config_dir, config_file, data_dir, log_dir, record_dir, runtime_dir, sanitize_id,
    socket_path, state_dir, transcript_dir,
};
