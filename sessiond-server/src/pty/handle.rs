//! Running shell on a PTY

use std::io::{Read, Write};

use parking_lot::Mutex;
use portable_pty::{Child, MasterPty, PtySize};
use sessiond_utils::{Result, SessiondError};

/// A spawned child on the master side of a PTY.
///
/// The output reader is handed out once with [`PtyHandle::take_reader`];
/// input, resize and process control stay here.
pub struct PtyHandle {
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    writer: Mutex<Box<dyn Write + Send>>,
    /// Exit code once observed
    exit_code: Mutex<Option<u32>>,
}

impl PtyHandle {
    pub(crate) fn new(
        master: Box<dyn MasterPty + Send>,
        child: Box<dyn Child + Send + Sync>,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            master: Mutex::new(master),
            child: Mutex::new(child),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(writer),
            exit_code: Mutex::new(None),
        }
    }

    /// Send input to the child and flush it
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .write_all(data)
            .and_then(|()| writer.flush())
            .map_err(|e| SessiondError::pty(format!("PTY write: {}", e)))
    }

    /// The output side; `None` after the first call
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().take()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self.master
            .lock()
            .resize(size)
            .map_err(|e| SessiondError::pty(format!("PTY resize to {}x{}: {}", cols, rows, e)))
    }

    pub fn process_id(&self) -> Option<u32> {
        self.child.lock().process_id()
    }

    /// Exit code if the child has exited; remembered after the first sighting
    pub fn try_wait(&self) -> Result<Option<u32>> {
        let mut exit_code = self.exit_code.lock();
        if exit_code.is_some() {
            return Ok(*exit_code);
        }
        let status = self
            .child
            .lock()
            .try_wait()
            .map_err(|e| SessiondError::pty(format!("PTY wait: {}", e)))?;
        *exit_code = status.map(|s| s.exit_code());
        Ok(*exit_code)
    }

    /// Kill the child. Killing an exited child is a no-op.
    pub fn kill(&self) -> Result<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }
        let killed = self.child.lock().kill();
        match killed {
            Ok(()) => Ok(()),
            // Raced with a natural exit
            Err(_) if matches!(self.try_wait(), Ok(Some(_))) => Ok(()),
            Err(e) => Err(SessiondError::pty(format!("PTY kill: {}", e))),
        }
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.process_id())
            .field("exit_code", &*self.exit_code.lock())
            .finish_non_exhaustive()
    }
}
