//! Byte-level escape sequence state machine

use tracing::trace;

use super::cell::{dec_special, Charset};
use super::Terminal;

/// Longest CSI parameter string kept; extra bytes are dropped until the final byte
const MAX_CSI_LEN: usize = 256;

/// Where the parser is between bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) enum ParseState {
    #[default]
    Ground,
    /// After ESC
    Escape,
    /// After `ESC (` or `ESC )`; holds the intermediate
    Charset(u8),
    /// After `ESC #`
    Sharp,
    /// Collecting a CSI (parameters, intermediates, final)
    Csi(Vec<u8>),
    /// Inside an OSC string
    Osc { pending_esc: bool },
    /// Inside DCS / SOS / PM / APC; content is discarded
    EscapeString { pending_esc: bool },
}

enum Utf8Step {
    Char(char, usize),
    Invalid,
    Incomplete,
}

fn next_char(buf: &[u8]) -> Utf8Step {
    let valid = match std::str::from_utf8(buf) {
        Ok(s) => s,
        Err(e) if e.valid_up_to() > 0 => {
            std::str::from_utf8(&buf[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(e) => {
            return match e.error_len() {
                Some(_) => Utf8Step::Invalid,
                None => Utf8Step::Incomplete,
            }
        }
    };
    match valid.chars().next() {
        Some(ch) => Utf8Step::Char(ch, ch.len_utf8()),
        None => Utf8Step::Incomplete,
    }
}

impl Terminal {
    pub(super) fn parse_byte(&mut self, b: u8, responses: &mut Vec<Vec<u8>>) {
        let state = std::mem::take(&mut self.state);
        self.state = match state {
            ParseState::Ground => self.ground(b),
            ParseState::Escape => self.escape(b),
            ParseState::Charset(target) => {
                self.designate_charset(target, b);
                ParseState::Ground
            }
            ParseState::Sharp => {
                if b == b'8' {
                    self.align_screen();
                }
                ParseState::Ground
            }
            ParseState::Csi(mut buf) => {
                if buf.len() < MAX_CSI_LEN {
                    buf.push(b);
                }
                if (0x40..=0x7e).contains(&b) {
                    if buf.last() != Some(&b) {
                        // Overlong sequence: make sure the final byte is still seen.
                        buf.push(b);
                    }
                    self.handle_csi(&buf, responses);
                    ParseState::Ground
                } else {
                    ParseState::Csi(buf)
                }
            }
            ParseState::Osc { pending_esc } => match b {
                0x07 | 0x9c => ParseState::Ground,
                b'\\' if pending_esc => ParseState::Ground,
                0x1b => ParseState::Osc { pending_esc: true },
                _ => ParseState::Osc { pending_esc: false },
            },
            ParseState::EscapeString { pending_esc } => match b {
                b'\\' if pending_esc => ParseState::Ground,
                0x07 | 0x9c => ParseState::Ground,
                0x1b => ParseState::EscapeString { pending_esc: true },
                _ => ParseState::EscapeString { pending_esc: false },
            },
        };
    }

    fn ground(&mut self, b: u8) -> ParseState {
        if b == 0x1b {
            return ParseState::Escape;
        }
        if b < 0x20 {
            self.handle_control(b);
            return ParseState::Ground;
        }
        if self.utf8_buf.is_empty() {
            match b {
                0x9b => return ParseState::Csi(Vec::new()),
                0x9d => return ParseState::Osc { pending_esc: false },
                0x90 | 0x98 | 0x9e | 0x9f => {
                    return ParseState::EscapeString { pending_esc: false }
                }
                _ => {}
            }
        }
        self.utf8_buf.push(b);
        while !self.utf8_buf.is_empty() {
            match next_char(&self.utf8_buf) {
                Utf8Step::Char(ch, size) => {
                    self.utf8_buf.drain(..size);
                    self.put_char(ch);
                }
                Utf8Step::Invalid => {
                    self.utf8_buf.remove(0);
                }
                Utf8Step::Incomplete => break,
            }
        }
        ParseState::Ground
    }

    fn escape(&mut self, b: u8) -> ParseState {
        match b {
            b'[' => return ParseState::Csi(Vec::new()),
            b']' => return ParseState::Osc { pending_esc: false },
            b'P' | b'X' | b'^' | b'_' => return ParseState::EscapeString { pending_esc: false },
            b'(' | b')' => return ParseState::Charset(b),
            b'#' => return ParseState::Sharp,
            b'7' => self.save_cursor(),
            b'8' => self.restore_cursor(),
            b'D' => self.index(),
            b'M' => self.reverse_index(),
            b'E' => {
                self.cursor.col = 0;
                self.index();
            }
            b'H' => self.set_tab_stop(self.cursor.col),
            b'c' => self.reset(),
            // Keypad modes have no effect on the grid.
            b'=' | b'>' => {}
            other => trace!(byte = other, "unhandled ESC sequence"),
        }
        ParseState::Ground
    }

    fn designate_charset(&mut self, target: u8, final_byte: u8) {
        let charset = match final_byte {
            b'0' => Charset::DecSpecial,
            b'B' => Charset::Ascii,
            _ => return,
        };
        match target {
            b'(' => self.g0 = charset,
            b')' => self.g1 = charset,
            _ => {}
        }
    }

    pub(super) fn map_char(&self, ch: char) -> char {
        if !(' '..='~').contains(&ch) {
            return ch;
        }
        let active = if self.shifted { self.g1 } else { self.g0 };
        match active {
            Charset::DecSpecial => dec_special(ch),
            Charset::Ascii => ch,
        }
    }
}
