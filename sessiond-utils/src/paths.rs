//! Path utilities for sessiond
//!
//! Handles XDG Base Directory specification compliance for config,
//! state, data, and runtime directories.

use std::path::{Path, PathBuf};
use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "sessiond";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the Unix socket path for client-daemon communication
///
/// Location: `$XDG_RUNTIME_DIR/sessiond/sessiond.sock` or `/tmp/sessiond-$UID/sessiond.sock`
pub fn socket_path() -> PathBuf {
    runtime_dir().join("sessiond.sock")
}

/// Get the runtime directory
///
/// Location: `$XDG_RUNTIME_DIR/sessiond` or `/tmp/sessiond-$UID`
pub fn runtime_dir() -> PathBuf {
    if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(xdg_runtime).join(APP_NAME)
    } else {
        // SAFETY: getuid() is always safe to call
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/{}-{}", APP_NAME, uid))
    }
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/sessiond` or `~/.config/sessiond`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(fallback_config_dir)
}

/// Get the main configuration file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the state directory (emulator snapshots)
///
/// Location: `$XDG_STATE_HOME/sessiond` or `~/.local/state/sessiond`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the data directory
///
/// Location: `$XDG_DATA_HOME/sessiond` or `~/.local/share/sessiond`
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(fallback_data_dir)
}

/// Directory holding per-session output transcripts
pub fn transcript_dir() -> PathBuf {
    data_dir().join("terminal_logs")
}

/// Directory holding raw PTY captures
pub fn record_dir() -> PathBuf {
    data_dir().join("terminal_records")
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/sessiond/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Reduce a session id to a file-name-safe stem
///
/// Keeps `[A-Za-z0-9._-]`, replaces everything else with `_`, and falls back
/// to `session` when nothing is left.
pub fn sanitize_id(id: &str) -> String {
    let safe: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "session".to_string()
    } else {
        safe
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}

fn fallback_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // ==================== Socket Path Tests ====================

    #[test]
    fn test_socket_path_has_correct_filename() {
        let path = socket_path();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "sessiond.sock");
        assert!(path.starts_with(runtime_dir()));
    }

    #[test]
    fn test_runtime_dir_with_xdg_set() {
        let original = env::var("XDG_RUNTIME_DIR").ok();

        env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let path = runtime_dir();
        assert_eq!(path, PathBuf::from("/run/user/1000/sessiond"));

        env::remove_var("XDG_RUNTIME_DIR");
        let fallback = runtime_dir();
        let uid = unsafe { libc::getuid() };
        assert_eq!(fallback, PathBuf::from(format!("/tmp/sessiond-{}", uid)));

        match original {
            Some(val) => env::set_var("XDG_RUNTIME_DIR", val),
            None => env::remove_var("XDG_RUNTIME_DIR"),
        }
    }

    // ==================== Directory Layout Tests ====================

    #[test]
    fn test_config_file_is_toml() {
        let path = config_file();
        assert_eq!(path.extension().unwrap(), "toml");
        assert!(path.starts_with(config_dir()));
    }

    #[test]
    fn test_data_subdirectories() {
        assert!(transcript_dir().ends_with("terminal_logs"));
        assert!(record_dir().ends_with("terminal_records"));
        assert!(transcript_dir().starts_with(data_dir()));
    }

    #[test]
    fn test_log_dir_in_state_dir() {
        assert!(log_dir().starts_with(state_dir()));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }

    // ==================== Sanitize Tests ====================

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("ws-1.main_x"), "ws-1.main_x");
        assert_eq!(sanitize_id("a/b c"), "a_b_c");
        assert_eq!(sanitize_id("../etc"), ".._etc");
        assert_eq!(sanitize_id(""), "session");
        assert_eq!(sanitize_id("   "), "session");
    }
}
