//! Kitty graphics protocol support
//!
//! [`GraphicsDecoder`] pulls `ESC _ G ... ST` commands out of the output
//! stream and applies them to a [`GraphicsState`], producing the
//! [`GraphicsEvent`](sessiond_protocol::GraphicsEvent)s broadcast to clients.

mod command;
mod decoder;
mod state;

pub use command::{Action, Command, DeleteMode, PayloadError, MAX_PAYLOAD_BYTES};
pub use decoder::{GraphicsDecoder, Processed, MAX_APC_BYTES};
pub use state::{CursorMove, GraphicsState};
