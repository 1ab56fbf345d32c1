//! Emulator, graphics and mode state saved between daemon runs

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use sessiond_protocol::{GraphicsSnapshot, ModeSnapshot};
use sessiond_utils::{sanitize_id, Result, SessiondError};
use tracing::debug;

/// Files holding one session's persisted state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    /// bincode terminal snapshot
    pub terminal: PathBuf,
    pub graphics: PathBuf,
    pub modes: PathBuf,
}

impl StatePaths {
    pub fn new(dir: &Path, session_id: &str) -> Self {
        let terminal = dir.join(format!("{}.state", sanitize_id(session_id)));
        let graphics = PathBuf::from(format!("{}.graphics.json", terminal.display()));
        let modes = PathBuf::from(format!("{}.modes.json", terminal.display()));
        Self {
            terminal,
            graphics,
            modes,
        }
    }
}

/// Everything persisted for a session, already encoded
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub terminal: Vec<u8>,
    pub graphics: GraphicsSnapshot,
    pub modes: ModeSnapshot,
}

/// State read back on start; each part is optional
#[derive(Debug, Default)]
pub struct RestoredState {
    pub terminal: Option<Vec<u8>>,
    pub graphics: Option<GraphicsSnapshot>,
    pub modes: Option<ModeSnapshot>,
}

pub fn save(paths: &StatePaths, state: &PersistedState) -> Result<()> {
    if let Some(dir) = paths.terminal.parent() {
        fs::create_dir_all(dir).map_err(|e| SessiondError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }
    write_file(&paths.terminal, &state.terminal)?;
    let graphics = serde_json::to_vec(&state.graphics)
        .map_err(|e| SessiondError::persistence(format!("encode graphics state: {}", e)))?;
    write_file(&paths.graphics, &graphics)?;
    let modes = serde_json::to_vec(&state.modes)
        .map_err(|e| SessiondError::persistence(format!("encode mode state: {}", e)))?;
    write_file(&paths.modes, &modes)
}

/// Read whatever is present and decodable; missing or corrupt parts are `None`
pub fn load(paths: &StatePaths) -> RestoredState {
    RestoredState {
        terminal: fs::read(&paths.terminal).ok(),
        graphics: read_json(&paths.graphics),
        modes: read_json(&paths.modes),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unreadable state file");
            None
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(|e| SessiondError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })
}
