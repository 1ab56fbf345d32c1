//! PTY output reader
//!
//! Reads block, so each session gets a dedicated OS thread that owns the
//! reader and forwards chunks over a bounded channel. A full channel blocks
//! the thread, which in turn stops draining the PTY.

use std::io::{ErrorKind, Read};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use sessiond_utils::{Result, SessiondError};

/// Size of each PTY read
pub const READ_BUFFER_SIZE: usize = 4096;

const CHANNEL_DEPTH: usize = 16;

/// One step of the output stream
#[derive(Debug, PartialEq, Eq)]
pub enum ReadResult {
    Data(Vec<u8>),
    Eof,
    Error(String),
}

/// Start the reader thread for `session_id`.
///
/// The channel yields data until a final `Eof` or `Error` and then closes.
/// Cancelling stops the thread before its next read.
pub fn spawn_reader(
    reader: Box<dyn Read + Send>,
    cancel: CancellationToken,
    session_id: &str,
) -> Result<mpsc::Receiver<ReadResult>> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let id = session_id.to_string();
    std::thread::Builder::new()
        .name(format!("pty-read-{}", session_id))
        .spawn(move || read_loop(reader, tx, cancel, id))
        .map_err(|e| SessiondError::pty(format!("reader thread: {}", e)))?;
    Ok(rx)
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    tx: mpsc::Sender<ReadResult>,
    cancel: CancellationToken,
    session_id: String,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    while !cancel.is_cancelled() {
        let result = match reader.read(&mut buf) {
            Ok(0) => ReadResult::Eof,
            Ok(n) => ReadResult::Data(buf[..n].to_vec()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // Linux reports a hung-up PTY as EIO
            Err(e) if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof)
                || e.raw_os_error() == Some(libc::EIO) =>
            {
                ReadResult::Eof
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "pty read failed");
                ReadResult::Error(e.to_string())
            }
        };

        let last = !matches!(result, ReadResult::Data(_));
        if tx.blocking_send(result).is_err() {
            trace!(session_id = %session_id, "output receiver gone");
            return;
        }
        if last {
            break;
        }
    }
    debug!(session_id = %session_id, "pty reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cursor(data: &[u8]) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(data.to_vec()))
    }

    struct Broken(ErrorKind);

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(self.0, "broken"))
        }
    }

    #[tokio::test]
    async fn test_reader_delivers_data_then_eof() {
        let mut rx = spawn_reader(cursor(b"hello"), CancellationToken::new(), "t").unwrap();
        assert_eq!(rx.recv().await, Some(ReadResult::Data(b"hello".to_vec())));
        assert_eq!(rx.recv().await, Some(ReadResult::Eof));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_reader_splits_large_input() {
        let data = vec![b'x'; READ_BUFFER_SIZE * 2 + 10];
        let mut rx = spawn_reader(cursor(&data), CancellationToken::new(), "t").unwrap();
        let mut total = 0;
        while let Some(ReadResult::Data(chunk)) = rx.recv().await {
            assert!(chunk.len() <= READ_BUFFER_SIZE);
            total += chunk.len();
        }
        assert_eq!(total, data.len());
    }

    #[tokio::test]
    async fn test_reader_error_and_hangup() {
        let mut rx =
            spawn_reader(Box::new(Broken(ErrorKind::Other)), CancellationToken::new(), "t").unwrap();
        assert!(matches!(rx.recv().await, Some(ReadResult::Error(_))));
        assert_eq!(rx.recv().await, None);

        let mut rx =
            spawn_reader(Box::new(Broken(ErrorKind::BrokenPipe)), CancellationToken::new(), "t")
                .unwrap();
        assert_eq!(rx.recv().await, Some(ReadResult::Eof));
    }

    #[tokio::test]
    async fn test_reader_cancelled_before_read() {
        let token = CancellationToken::new();
        token.cancel();
        let mut rx = spawn_reader(cursor(b"never"), token, "t").unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
