//! Bounded, offset-addressable output log

use std::collections::VecDeque;

/// Default retained bytes per session
pub const DEFAULT_BUFFER_BYTES: usize = 512 * 1024;

#[derive(Debug)]
struct Chunk {
    /// Absolute offset of the first byte
    start: u64,
    data: Vec<u8>,
}

/// Append-only byte log that keeps the newest `max_bytes`.
///
/// Every byte ever appended has an absolute offset; `total` is one past the
/// newest byte and never decreases.
#[derive(Debug)]
pub struct RingBuffer {
    chunks: VecDeque<Chunk>,
    max_bytes: usize,
    size: usize,
    total: u64,
}

/// Result of [`RingBuffer::read_since`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRead {
    pub data: Vec<u8>,
    /// Offset to pass on the next read
    pub next: u64,
    /// Some requested bytes were already evicted
    pub truncated: bool,
}

impl RingBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            max_bytes: max_bytes.max(1),
            size: 0,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes currently retained
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Offset of the oldest retained byte
    pub fn oldest(&self) -> u64 {
        self.chunks.front().map_or(self.total, |c| c.start)
    }

    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let start = self.total;
        self.total += data.len() as u64;

        // A single oversized write keeps only its tail.
        let (start, data) = if data.len() > self.max_bytes {
            let skip = data.len() - self.max_bytes;
            (start + skip as u64, &data[skip..])
        } else {
            (start, data)
        };
        self.chunks.push_back(Chunk {
            start,
            data: data.to_vec(),
        });
        self.size += data.len();
        self.evict();
    }

    fn evict(&mut self) {
        while self.size > self.max_bytes {
            let excess = self.size - self.max_bytes;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.data.len() <= excess {
                self.size -= front.data.len();
                self.chunks.pop_front();
            } else {
                front.data.drain(..excess);
                front.start += excess as u64;
                self.size -= excess;
            }
        }
    }

    /// Everything from `since` to the newest byte. Offsets older than the
    /// oldest retained byte are clamped and reported as truncated; offsets
    /// past the end return nothing.
    pub fn read_since(&self, since: u64) -> BufferRead {
        let oldest = self.oldest();
        let truncated = since < oldest;
        let from = since.clamp(oldest, self.total);

        let mut data = Vec::with_capacity((self.total - from) as usize);
        for chunk in &self.chunks {
            let end = chunk.start + chunk.data.len() as u64;
            if end <= from {
                continue;
            }
            let skip = from.saturating_sub(chunk.start) as usize;
            data.extend_from_slice(&chunk.data[skip..]);
        }
        BufferRead {
            data,
            next: self.total,
            truncated,
        }
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        let buf = RingBuffer::new(16);
        let read = buf.read_since(0);
        assert!(read.data.is_empty());
        assert_eq!(read.next, 0);
        assert!(!read.truncated);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_since_offsets() {
        let mut buf = RingBuffer::new(64);
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.total(), 11);

        let read = buf.read_since(0);
        assert_eq!(read.data, b"hello world");
        assert_eq!(read.next, 11);

        let read = buf.read_since(8);
        assert_eq!(read.data, b"rld");
        assert!(!read.truncated);

        let read = buf.read_since(11);
        assert!(read.data.is_empty());
        assert_eq!(read.next, 11);
    }

    #[test]
    fn test_eviction_truncates_old_reads() {
        let mut buf = RingBuffer::new(8);
        buf.append(b"abcd");
        buf.append(b"efgh");
        buf.append(b"ijkl");
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.oldest(), 4);
        assert_eq!(buf.total(), 12);

        let read = buf.read_since(0);
        assert!(read.truncated);
        assert_eq!(read.data, b"efghijkl");
        assert_eq!(read.next, 12);
    }

    #[test]
    fn test_partial_chunk_eviction() {
        let mut buf = RingBuffer::new(6);
        buf.append(b"abcd");
        buf.append(b"efg");
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.oldest(), 1);
        assert_eq!(buf.read_since(1).data, b"bcdefg");
    }

    #[test]
    fn test_oversized_append_keeps_tail() {
        let mut buf = RingBuffer::new(4);
        buf.append(b"0123456789");
        assert_eq!(buf.total(), 10);
        assert_eq!(buf.oldest(), 6);
        let read = buf.read_since(0);
        assert_eq!(read.data, b"6789");
        assert!(read.truncated);
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = RingBuffer::new(16);
        buf.append(b"abc");
        let read = buf.read_since(100);
        assert!(read.data.is_empty());
        assert_eq!(read.next, 3);
        assert!(!read.truncated);
    }

    #[test]
    fn test_total_is_monotonic() {
        let mut buf = RingBuffer::new(3);
        let mut last = 0;
        for chunk in [&b"a"[..], b"bcdef", b"", b"gh"] {
            buf.append(chunk);
            assert!(buf.total() >= last);
            last = buf.total();
        }
        assert_eq!(last, 8);
    }
}
