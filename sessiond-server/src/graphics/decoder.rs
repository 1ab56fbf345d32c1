//! Streaming APC extractor for kitty graphics commands

use std::io::Write as _;

use sessiond_protocol::GraphicsEvent;
use tracing::{debug, trace};

use super::command::{Command, Params, RawCommand, MAX_PAYLOAD_BYTES};
use super::state::GraphicsState;
use crate::term::Cursor;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Largest single APC body buffered before it is abandoned
pub const MAX_APC_BYTES: usize = 8 * 1024 * 1024;

/// Chunks of an `m=1` transmission collected so far
#[derive(Debug, Default)]
struct Transfer {
    params: Params,
    payload: String,
}

/// Separates `ESC _ ... ST` sequences from the rest of the output.
///
/// Kitty graphics APCs are consumed and applied to a [`GraphicsState`]; any
/// other APC is re-emitted untouched. State carries across calls so a
/// sequence may be split anywhere.
#[derive(Debug, Default)]
pub struct GraphicsDecoder {
    /// Input ended on ESC; the next byte decides whether an APC starts
    pending_esc: bool,
    in_apc: bool,
    /// Inside an APC, the previous byte was ESC (possible ST)
    apc_esc_pending: bool,
    /// APC exceeded [`MAX_APC_BYTES`]; discard until its terminator
    apc_overflow: bool,
    apc_buf: Vec<u8>,
    transfer: Option<Transfer>,
}

/// Output of one [`GraphicsDecoder::process`] call
#[derive(Debug, Default)]
pub struct Processed {
    /// Bytes for the emulator and clients, graphics APCs removed and
    /// placement cursor advances inserted
    pub passthrough: Vec<u8>,
    pub events: Vec<GraphicsEvent>,
}

impl GraphicsDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while an APC or multi-chunk transfer is incomplete
    pub fn is_pending(&self) -> bool {
        self.pending_esc || self.in_apc || self.transfer.is_some()
    }

    pub fn process(&mut self, data: &[u8], cursor: Cursor, state: &mut GraphicsState) -> Processed {
        let mut run = Run {
            out: Processed {
                passthrough: Vec::with_capacity(data.len()),
                events: Vec::new(),
            },
            cursor,
        };

        let mut i = 0;
        if self.pending_esc && !data.is_empty() {
            self.pending_esc = false;
            if data[0] == b'_' {
                self.start_apc();
                i = 1;
            } else {
                run.out.passthrough.push(ESC);
            }
        }

        while i < data.len() {
            let b = data[i];
            i += 1;
            if self.in_apc {
                if self.apc_esc_pending {
                    self.apc_esc_pending = false;
                    if b == b'\\' {
                        self.finish_apc(&[ESC, b'\\'], &mut run, state);
                        continue;
                    }
                    self.push_apc(ESC);
                }
                match b {
                    BEL => self.finish_apc(&[BEL], &mut run, state),
                    ESC => self.apc_esc_pending = true,
                    _ => self.push_apc(b),
                }
                continue;
            }
            if b == ESC {
                match data.get(i) {
                    None => self.pending_esc = true,
                    Some(b'_') => {
                        self.start_apc();
                        i += 1;
                    }
                    Some(_) => run.out.passthrough.push(b),
                }
                continue;
            }
            run.out.passthrough.push(b);
        }
        run.out
    }

    fn start_apc(&mut self) {
        self.in_apc = true;
        self.apc_esc_pending = false;
        self.apc_overflow = false;
        self.apc_buf.clear();
    }

    fn push_apc(&mut self, b: u8) {
        if self.apc_overflow {
            return;
        }
        if self.apc_buf.len() >= MAX_APC_BYTES {
            debug!(limit = MAX_APC_BYTES, "discarding oversized APC");
            self.apc_overflow = true;
            self.apc_buf = Vec::new();
            return;
        }
        self.apc_buf.push(b);
    }

    fn finish_apc(&mut self, terminator: &[u8], run: &mut Run, state: &mut GraphicsState) {
        self.in_apc = false;
        self.apc_esc_pending = false;
        let apc = std::mem::take(&mut self.apc_buf);
        if std::mem::take(&mut self.apc_overflow) {
            self.transfer = None;
            return;
        }
        let Some(raw) = RawCommand::parse(&apc) else {
            run.out.passthrough.push(ESC);
            run.out.passthrough.push(b'_');
            run.out.passthrough.extend_from_slice(&apc);
            run.out.passthrough.extend_from_slice(terminator);
            return;
        };
        let Some(command) = self.reassemble(raw) else {
            return;
        };
        trace!(action = ?command.action, image = %command.resolved_image_id(), "graphics command");
        let (events, movement) = state.apply(&command, run.cursor);
        run.out.events.extend(events);
        if movement.cols > 0 {
            let _ = write!(run.out.passthrough, "\x1b[{}C", movement.cols);
            run.cursor.col = run.cursor.col.saturating_add(movement.cols);
        }
        if movement.rows > 0 {
            let _ = write!(run.out.passthrough, "\x1b[{}B", movement.rows);
            run.cursor.row = run.cursor.row.saturating_add(movement.rows);
        }
    }

    /// Merge `m=1` chunks; returns the finished command on the last chunk.
    /// Later chunks override earlier parameters, payloads concatenate.
    fn reassemble(&mut self, raw: RawCommand) -> Option<Command> {
        let more = raw.more();
        let transfer = self.transfer.get_or_insert_with(Transfer::default);
        transfer.params.extend(raw.params);
        transfer.payload.push_str(&raw.payload);
        if transfer.payload.len() > MAX_PAYLOAD_BYTES * 2 {
            debug!("discarding oversized graphics transfer");
            self.transfer = None;
            return None;
        }
        if more {
            return None;
        }
        let transfer = self.transfer.take()?;
        Command::resolve(&transfer.params, &transfer.payload)
    }
}

/// Cursor as advanced by placements earlier in the same call
struct Run {
    out: Processed,
    cursor: Cursor,
}
