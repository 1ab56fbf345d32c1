//! sessiond-protocol: Shared IPC definitions for the session daemon
//!
//! Every frame on the daemon socket is one JSON object terminated by `\n`.
//! A connection either carries control requests (`{protocolVersion, method,
//! params}` answered by `{ok, result?, error?}`) or, after an attach request,
//! a one-way stream of [`StreamMessage`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{ClientCodec, CodecError, InboundFrame, ServerCodec};
pub use messages::{
    AckRequest, AttachRequest, BacklogRequest, BacklogResponse, BootstrapResponse,
    ControlRequest, ControlResponse, CreateRequest, CreateResponse, InfoResponse, ListResponse,
    Method, OwnerRequest, OwnerResponse, ResizeRequest, SendRequest, SessionInfo,
    SessionRequest, ShutdownRequest, SnapshotResponse, StreamMessage, StreamMessageType,
};
pub use types::{
    GraphicsDelete, GraphicsEvent, GraphicsEventKind, GraphicsSnapshot, Image, ModeSnapshot,
    MouseEncoding, Placement,
};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 2;

/// Size of the `data{source:"bootstrap"}` chunks sent after attach
pub const BOOTSTRAP_CHUNK_SIZE: usize = 32 * 1024;

static STREAM_SEQ: AtomicU64 = AtomicU64::new(0);

/// Fresh stream id of the form `stream-<unix nanos>-<seq>`
pub fn new_stream_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = STREAM_SEQ.fetch_add(1, Ordering::Relaxed) + 1;
    format!("stream-{}-{}", nanos, seq)
}
