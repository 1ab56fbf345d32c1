//! PTY creation for sessions
//!
//! Pseudo-terminals come from portable-pty; output is read on the blocking
//! pool and handed to the session over a channel.

mod config;
mod handle;
mod output;

pub use config::{resolve_shell, PtyConfig};
pub use handle::PtyHandle;
pub use output::{spawn_reader, ReadResult, READ_BUFFER_SIZE};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use sessiond_utils::{Result, SessiondError};

/// Spawn the configured command on a fresh PTY
pub fn spawn(config: &PtyConfig) -> Result<PtyHandle> {
    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(PtySize {
            rows: config.size.1,
            cols: config.size.0,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SessiondError::pty(format!("Failed to open PTY: {}", e)))?;

    let mut cmd = CommandBuilder::new(&config.command);
    cmd.args(&config.args);

    if let Some(cwd) = &config.cwd {
        cmd.cwd(cwd);
    }

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    for key in &config.env_remove {
        cmd.env_remove(key);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| SessiondError::ProcessSpawn(format!("Failed to spawn: {}", e)))?;
    // The child holds its own copy of the slave
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| SessiondError::pty(format!("Failed to clone reader: {}", e)))?;

    let writer = pair
        .master
        .take_writer()
        .map_err(|e| SessiondError::pty(format!("Failed to get writer: {}", e)))?;

    Ok(PtyHandle::new(pair.master, child, reader, writer))
}
