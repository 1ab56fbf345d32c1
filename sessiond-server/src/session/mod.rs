//! Terminal sessions
//!
//! A [`Session`] owns one PTY and feeds its output through normalization,
//! graphics extraction, the emulator and the response scrubber before it
//! lands in the replay buffer, the transcript and every attached stream.

mod buffer;
mod modes;
mod normalize;
mod persist;
mod scrub;
#[allow(clippy::module_inception)]
mod session;
mod subscriber;
mod transcript;

pub use buffer::{BufferRead, RingBuffer, DEFAULT_BUFFER_BYTES};
pub use modes::{ModeChange, ModeTracker};
pub use normalize::C1Normalizer;
pub use persist::{PersistedState, RestoredState, StatePaths};
pub use scrub::{Dropped, ResponseScrubber, Scrubbed, MAX_PENDING_OSC, POLICY};
pub use session::{Attachment, Session, CLOSE_WAIT};
pub use subscriber::{Enqueue, StreamEvent, Subscriber, DEFAULT_QUEUE_DEPTH};
pub use transcript::{read_tail, transcript_path, RawRecorder, Transcript};
