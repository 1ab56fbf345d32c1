//! On-disk output transcript and raw PTY capture

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sessiond_utils::{sanitize_id, Result, SessiondError};
use tracing::{debug, warn};

/// Appends scrubbed output to `<dir>/<id>.log`, keeping the file bounded.
///
/// Once the file grows past `trim_threshold` it is rewritten to its last
/// `max_bytes`.
#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    trim_threshold: u64,
}

impl Transcript {
    pub fn open(dir: &Path, session_id: &str, max_bytes: u64, trim_threshold: u64) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| SessiondError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = transcript_path(dir, session_id);
        let (file, size) = open_append(&path)?;
        Ok(Self {
            path,
            file,
            size,
            max_bytes,
            trim_threshold,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.file
            .write_all(data)
            .map_err(|e| SessiondError::FileWrite {
                path: self.path.clone(),
                source: e,
            })?;
        self.size += data.len() as u64;
        if self.size > self.trim_threshold {
            self.trim()?;
        }
        Ok(())
    }

    fn trim(&mut self) -> Result<()> {
        let (tail, truncated) = read_tail(&self.path, self.max_bytes)?;
        if truncated {
            let tmp = self.path.with_extension("log.tmp");
            fs::write(&tmp, &tail).map_err(|e| SessiondError::FileWrite {
                path: tmp.clone(),
                source: e,
            })?;
            fs::rename(&tmp, &self.path)?;
            debug!(path = %self.path.display(), kept = tail.len(), "transcript trimmed");
        }
        let (file, size) = open_append(&self.path)?;
        self.file = file;
        self.size = size;
        Ok(())
    }
}

pub fn transcript_path(dir: &Path, session_id: &str) -> PathBuf {
    dir.join(format!("{}.log", sanitize_id(session_id)))
}

/// The last `max_bytes` of `path` (all of it when `max_bytes` is 0) and
/// whether anything was cut. A missing file reads as empty.
pub fn read_tail(path: &Path, max_bytes: u64) -> Result<(Vec<u8>, bool)> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => {
            return Err(SessiondError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    let size = file.metadata()?.len();
    let (start, truncated) = if max_bytes > 0 && size > max_bytes {
        (size - max_bytes, true)
    } else {
        (0, false)
    };
    file.seek(SeekFrom::Start(start))?;
    let mut data = Vec::with_capacity((size - start) as usize);
    file.read_to_end(&mut data)
        .map_err(|e| SessiondError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok((data, truncated))
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SessiondError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

/// Raw PTY bytes, exactly as read, to `<dir>/<id>-<YYYYMMDD-HHMMSS>.ptylog`
#[derive(Debug)]
pub struct RawRecorder {
    path: PathBuf,
    file: File,
}

impl RawRecorder {
    pub fn open(dir: &Path, session_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| SessiondError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{}-{}.ptylog", sanitize_id(session_id), stamp));
        let (file, _) = open_append(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, data: &[u8]) {
        if let Err(e) = self.file.write_all(data) {
            warn!(path = %self.path.display(), error = %e, "raw record write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_transcript_appends() {
        let dir = TempDir::new().unwrap();
        let mut transcript = Transcript::open(dir.path(), "ws/1", 1024, 4096).unwrap();
        assert!(transcript.path().ends_with("ws_1.log"));
        transcript.append(b"hello ").unwrap();
        transcript.append(b"world").unwrap();
        assert_eq!(transcript.size(), 11);
        assert_eq!(fs::read(transcript.path()).unwrap(), b"hello world");
    }

    #[test]
    fn test_transcript_reopen_keeps_size() {
        let dir = TempDir::new().unwrap();
        {
            let mut transcript = Transcript::open(dir.path(), "ws", 1024, 4096).unwrap();
            transcript.append(b"abc").unwrap();
        }
        let transcript = Transcript::open(dir.path(), "ws", 1024, 4096).unwrap();
        assert_eq!(transcript.size(), 3);
    }

    #[test]
    fn test_transcript_trims_past_threshold() {
        let dir = TempDir::new().unwrap();
        let mut transcript = Transcript::open(dir.path(), "ws", 4, 8).unwrap();
        transcript.append(b"01234567").unwrap();
        assert_eq!(transcript.size(), 8);
        transcript.append(b"89").unwrap();
        assert_eq!(transcript.size(), 4);
        assert_eq!(fs::read(transcript.path()).unwrap(), b"6789");

        transcript.append(b"ab").unwrap();
        assert_eq!(fs::read(transcript.path()).unwrap(), b"6789ab");
        assert!(!dir.path().join("ws.log.tmp").exists());
    }

    #[test]
    fn test_read_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.log");
        assert_eq!(read_tail(&path, 4).unwrap(), (Vec::new(), false));

        fs::write(&path, b"abcdefgh").unwrap();
        assert_eq!(read_tail(&path, 3).unwrap(), (b"fgh".to_vec(), true));
        assert_eq!(read_tail(&path, 100).unwrap(), (b"abcdefgh".to_vec(), false));
        assert_eq!(read_tail(&path, 0).unwrap(), (b"abcdefgh".to_vec(), false));
    }

    #[test]
    fn test_raw_recorder_file_name() {
        let dir = TempDir::new().unwrap();
        let mut recorder = RawRecorder::open(dir.path(), "my ws").unwrap();
        recorder.write(b"\x1b[31mraw");
        let name = recorder.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("my_ws-"));
        assert!(name.ends_with(".ptylog"));
        assert_eq!(name.len(), "my_ws-".len() + "YYYYMMDD-HHMMSS".len() + ".ptylog".len());
        assert_eq!(fs::read(recorder.path()).unwrap(), b"\x1b[31mraw");
    }
}
