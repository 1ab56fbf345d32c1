//! Error types for sessiond
//!
//! Provides a unified error type used across all sessiond crates. Session
//! level variants render as the short lowercase messages that travel over
//! the control socket, so clients can match on them.

use std::path::PathBuf;

/// Main error type for sessiond operations
#[derive(Debug, thiserror::Error)]
pub enum SessiondError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Server not running at {path}")]
    ServerNotRunning { path: PathBuf },

    #[error("Connection timeout after {seconds}s")]
    ConnectionTimeout { seconds: u64 },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("protocol mismatch: server={server} client={client}")]
    ProtocolMismatch { client: u32, server: u32 },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    /// Error text returned by the daemon in a control response
    #[error("{0}")]
    Remote(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // === Session Errors ===

    #[error("session id required")]
    SessionIdRequired,

    #[error("session not found")]
    SessionNotFound { id: String },

    #[error("session not running")]
    SessionNotRunning { id: String },

    /// A concurrent `create` for the same id failed
    #[error("{0}")]
    CreateFailed(String),

    #[error("terminal not started")]
    TerminalNotStarted,

    #[error("session lease held by {owner}")]
    LeaseHeld { owner: String },

    #[error("stream not found")]
    StreamNotFound { stream_id: String },

    // === PTY Errors ===

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Persistence Errors ===

    #[error("Persistence error: {0}")]
    Persistence(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessiondError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        Self::Pty(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a session-not-found error
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    /// Create a session-not-running error
    pub fn session_not_running(id: impl Into<String>) -> Self {
        Self::SessionNotRunning { id: id.into() }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
            | Self::Connection(_)
        )
    }
}

/// Result type alias using SessiondError
pub type Result<T> = std::result::Result<T, SessiondError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Display Tests ====================

    #[test]
    fn test_error_display_session_not_found() {
        let err = SessiondError::session_not_found("ws-1");
        assert_eq!(err.to_string(), "session not found");
    }

    #[test]
    fn test_error_display_session_not_running() {
        let err = SessiondError::session_not_running("ws-1");
        assert_eq!(err.to_string(), "session not running");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SessiondError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_file_write() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = SessiondError::FileWrite {
            path: PathBuf::from("/root/terminal_logs/ws.log"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to write file"));
        assert!(msg.contains("ws.log"));
    }

    #[test]
    fn test_error_display_protocol_mismatch() {
        let err = SessiondError::ProtocolMismatch {
            client: 1,
            server: 2,
        };
        assert_eq!(err.to_string(), "protocol mismatch: server=2 client=1");
    }

    #[test]
    fn test_error_display_unknown_method() {
        let err = SessiondError::UnknownMethod("frobnicate".into());
        assert_eq!(err.to_string(), "unknown method \"frobnicate\"");
    }

    #[test]
    fn test_error_display_remote_is_verbatim() {
        let err = SessiondError::Remote("session not found".into());
        assert_eq!(err.to_string(), "session not found");
    }

    #[test]
    fn test_error_display_lease_held() {
        let err = SessiondError::LeaseHeld {
            owner: "popout".into(),
        };
        assert_eq!(err.to_string(), "session lease held by popout");
    }

    #[test]
    fn test_error_display_stream_not_found() {
        let err = SessiondError::StreamNotFound {
            stream_id: "stream-1".into(),
        };
        assert_eq!(err.to_string(), "stream not found");
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = SessiondError::ConfigInvalid {
            path: PathBuf::from("/home/user/.config/sessiond/config.toml"),
            message: "syntax error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Invalid configuration"));
        assert!(msg.contains("config.toml"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_error_display_server_not_running() {
        let err = SessiondError::ServerNotRunning {
            path: PathBuf::from("/tmp/sessiond.sock"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Server not running"));
        assert!(msg.contains("/tmp/sessiond.sock"));
    }

    #[test]
    fn test_error_display_pty() {
        let err = SessiondError::Pty("failed to allocate PTY".into());
        assert_eq!(err.to_string(), "PTY error: failed to allocate PTY");
    }

    // ==================== Retryable Tests ====================

    #[test]
    fn test_retryable() {
        assert!(SessiondError::ConnectionTimeout { seconds: 5 }.is_retryable());
        assert!(SessiondError::connection("refused").is_retryable());
    }

    #[test]
    fn test_not_retryable_errors() {
        let non_retryable = [
            SessiondError::session_not_found("test"),
            SessiondError::session_not_running("test"),
            SessiondError::SessionIdRequired,
            SessiondError::LeaseHeld { owner: "a".into() },
            SessiondError::Protocol("error".into()),
            SessiondError::ProtocolMismatch { client: 1, server: 2 },
            SessiondError::UnknownMethod("x".into()),
            SessiondError::Config("bad".into()),
            SessiondError::Pty("error".into()),
            SessiondError::Persistence("error".into()),
            SessiondError::Internal("error".into()),
            SessiondError::ConnectionClosed,
        ];

        for err in non_retryable {
            assert!(
                !err.is_retryable(),
                "Expected {:?} to NOT be retryable",
                err
            );
        }
    }

    // ==================== From Trait Tests ====================

    #[test]
    fn test_from_io_error_preserves_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SessiondError = io_err.into();
        if let SessiondError::Io(inner) = err {
            assert_eq!(inner.kind(), std::io::ErrorKind::PermissionDenied);
        } else {
            panic!("Expected Io variant");
        }
    }

    // ==================== Helper Function Tests ====================

    #[test]
    fn test_helpers() {
        assert!(matches!(SessiondError::protocol("x"), SessiondError::Protocol(_)));
        assert!(matches!(SessiondError::config("x"), SessiondError::Config(_)));
        assert!(matches!(SessiondError::pty("x"), SessiondError::Pty(_)));
        assert!(matches!(
            SessiondError::persistence("x"),
            SessiondError::Persistence(_)
        ));
        assert!(matches!(SessiondError::internal("x"), SessiondError::Internal(_)));
    }

    #[test]
    fn test_error_debug_keeps_session_id() {
        let err = SessiondError::session_not_found("my-session");
        let debug = format!("{:?}", err);
        assert!(debug.contains("SessionNotFound"));
        assert!(debug.contains("my-session"));
    }
}
