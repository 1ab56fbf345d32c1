//! Control characters, CSI dispatch, SGR and device reports

use tracing::trace;

use super::cell::{Attr, Color};
use super::Terminal;

/// Parsed CSI parameters
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct CsiParams {
    /// `?` or `>` marker, if present
    pub private: Option<u8>,
    pub values: Vec<usize>,
}

impl CsiParams {
    /// Split `[?|>]Ps;Ps;...` (final byte excluded). Empty fields read as 0 and
    /// non-digit bytes inside a field are ignored.
    pub fn parse(buf: &[u8]) -> Self {
        let (private, rest) = match buf.first() {
            Some(&m @ (b'?' | b'>')) => (Some(m), &buf[1..]),
            _ => (None, buf),
        };
        if rest.is_empty() {
            return Self {
                private,
                values: Vec::new(),
            };
        }
        let values = rest
            .split(|b| *b == b';')
            .map(|field| {
                field
                    .iter()
                    .filter(|b| b.is_ascii_digit())
                    .fold(0usize, |acc, b| {
                        acc.saturating_mul(10).saturating_add(usize::from(b - b'0'))
                    })
            })
            .collect();
        Self { private, values }
    }

    /// Parameter `idx`, with `fallback` used when it is absent or zero
    pub fn get(&self, idx: usize, fallback: usize) -> usize {
        match self.values.get(idx) {
            Some(0) | None => fallback,
            Some(v) => *v,
        }
    }
}

impl Terminal {
    pub(super) fn handle_control(&mut self, b: u8) {
        if b != 0x07 {
            self.wrap_next = false;
        }
        match b {
            0x07 => {}
            0x08 => self.cursor.col = self.cursor.col.saturating_sub(1),
            0x09 => self.advance_tab(1),
            0x0a..=0x0c => self.index(),
            0x0d => self.cursor.col = 0,
            0x0e => self.shifted = true,
            0x0f => self.shifted = false,
            other => trace!(byte = other, "unhandled control byte"),
        }
    }

    pub(super) fn handle_csi(&mut self, seq: &[u8], responses: &mut Vec<Vec<u8>>) {
        let Some((&final_byte, body)) = seq.split_last() else {
            return;
        };
        if !matches!(final_byte, b'm' | b'b' | b'n' | b'c' | b'p' | b't') {
            self.wrap_next = false;
        }
        let params = CsiParams::parse(body);
        let n = params.get(0, 1);
        match final_byte {
            b'A' => {
                self.cursor.row = self.cursor.row.saturating_sub(n);
                self.clamp_cursor();
            }
            b'B' => {
                self.cursor.row = self.cursor.row.saturating_add(n);
                self.clamp_cursor();
            }
            b'C' => {
                self.cursor.col = self.cursor.col.saturating_add(n);
                self.clamp_cursor();
            }
            b'D' => {
                self.cursor.col = self.cursor.col.saturating_sub(n);
                self.clamp_cursor();
            }
            b'E' => {
                self.cursor.row = self.cursor.row.saturating_add(n);
                self.cursor.col = 0;
                self.clamp_cursor();
            }
            b'F' => {
                self.cursor.row = self.cursor.row.saturating_sub(n);
                self.cursor.col = 0;
                self.clamp_cursor();
            }
            b'G' => {
                self.cursor.col = (n - 1).min(self.cols - 1);
                self.clamp_cursor();
            }
            b'd' => {
                self.cursor.row = self.origin_row(n - 1);
                self.clamp_cursor();
            }
            b'H' | b'f' => {
                self.cursor.row = self.origin_row(n - 1);
                self.cursor.col = params.get(1, 1) - 1;
                self.clamp_cursor();
            }
            b'J' => self.erase_in_display(params.get(0, 0)),
            b'K' => self.erase_in_line(params.get(0, 0)),
            b'L' => self.insert_lines(n),
            b'M' => self.delete_lines(n),
            b'P' => self.delete_chars(n),
            b'@' => self.insert_chars(n),
            b'X' => self.erase_chars(n),
            b'b' => self.repeat_last(n),
            b'I' => self.advance_tab(n),
            b'Z' => self.back_tab(n),
            b'g' => self.clear_tab_stop(params.get(0, 0)),
            b'S' => self.scroll_up(n),
            b'T' => self.scroll_down(n),
            b'r' => self.set_scroll_region(params.get(0, 1) - 1, params.get(1, self.rows) - 1),
            b'm' => self.apply_sgr(&params.values),
            b's' => self.save_cursor(),
            b'u' => self.restore_cursor(),
            b'h' => self.set_mode(&params, true),
            b'l' => self.set_mode(&params, false),
            b'n' => self.device_status(&params, responses),
            b'c' => self.device_attributes(&params, responses),
            b't' => self.window_report(&params, responses),
            b'p' => self.request_mode(&params, body, responses),
            _ => trace!(
                private = ?params.private.map(char::from),
                params = ?params.values,
                final_byte = %char::from(final_byte),
                "unhandled CSI sequence"
            ),
        }
    }

    fn origin_row(&self, row: usize) -> usize {
        if self.modes.origin {
            self.scroll_top.saturating_add(row)
        } else {
            row
        }
    }

    /// DECSTBM
    fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let mut bottom = bottom.min(self.rows - 1);
        let mut top = top;
        if bottom <= top {
            top = 0;
            bottom = self.rows - 1;
        }
        self.scroll_top = top;
        self.scroll_bottom = bottom;
        self.cursor.row = if self.modes.origin { self.scroll_top } else { 0 };
        self.cursor.col = 0;
        self.clamp_cursor();
    }

    /// DEC private modes; ANSI modes are accepted and ignored
    fn set_mode(&mut self, params: &CsiParams, on: bool) {
        if params.private != Some(b'?') {
            return;
        }
        for &mode in &params.values {
            match mode {
                25 => self.modes.cursor_visible = on,
                7 => self.modes.wrap = on,
                6 => {
                    self.modes.origin = on;
                    self.wrap_next = false;
                    self.cursor.row = if on { self.scroll_top } else { 0 };
                    self.cursor.col = 0;
                    self.clamp_cursor();
                }
                47 | 1047 => {
                    if on {
                        self.enter_alt(false);
                    } else {
                        self.exit_alt(false);
                    }
                }
                1049 => {
                    if on {
                        self.enter_alt(true);
                    } else {
                        self.exit_alt(true);
                    }
                }
                _ => {}
            }
        }
    }

    /// DSR
    fn device_status(&self, params: &CsiParams, responses: &mut Vec<Vec<u8>>) {
        if params.private.is_some() {
            return;
        }
        match params.get(0, 0) {
            5 => responses.push(b"\x1b[0n".to_vec()),
            6 => {
                let row = if self.modes.origin {
                    self.cursor.row.saturating_sub(self.scroll_top) + 1
                } else {
                    self.cursor.row + 1
                };
                let col = self.cursor.col + 1;
                responses.push(format!("\x1b[{};{}R", row, col).into_bytes());
            }
            _ => {}
        }
    }

    /// DA / DA2
    fn device_attributes(&self, params: &CsiParams, responses: &mut Vec<Vec<u8>>) {
        if params.private == Some(b'>') {
            responses.push(b"\x1b[>0;0;0c".to_vec());
        } else {
            responses.push(b"\x1b[?1;2c".to_vec());
        }
    }

    /// XTWINOPS size reports
    fn window_report(&self, params: &CsiParams, responses: &mut Vec<Vec<u8>>) {
        let code = match params.get(0, 0) {
            14 => 4,
            18 => 8,
            _ => return,
        };
        responses.push(format!("\x1b[{};{};{}t", code, self.rows, self.cols).into_bytes());
    }

    /// DECRQM: `CSI ? Ps $ p` answered with `CSI ? Ps ; state $ y`
    fn request_mode(&self, params: &CsiParams, body: &[u8], responses: &mut Vec<Vec<u8>>) {
        if params.private != Some(b'?') || !body.contains(&b'$') {
            return;
        }
        for &mode in &params.values {
            let state = self.mode_state(mode);
            responses.push(format!("\x1b[?{};{}$y", mode, state).into_bytes());
        }
    }

    /// 1 = set, 2 = reset, 0 = not recognized
    fn mode_state(&self, mode: usize) -> u8 {
        let flag = match mode {
            6 => self.modes.origin,
            7 => self.modes.wrap,
            25 => self.modes.cursor_visible,
            47 | 1047 | 1049 => self.modes.alt_screen,
            _ => return 0,
        };
        if flag {
            1
        } else {
            2
        }
    }

    fn apply_sgr(&mut self, params: &[usize]) {
        if params.is_empty() {
            self.attr = Attr::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.attr = Attr::default(),
                1 => self.attr.bold = true,
                2 => self.attr.dim = true,
                3 => self.attr.italic = true,
                4 => self.attr.underline = true,
                7 => self.attr.inverse = true,
                22 => {
                    self.attr.bold = false;
                    self.attr.dim = false;
                }
                23 => self.attr.italic = false,
                24 => self.attr.underline = false,
                27 => self.attr.inverse = false,
                39 => self.attr.fg = Color::Default,
                49 => self.attr.bg = Color::Default,
                p @ 30..=37 => self.attr.fg = Color::Indexed((p - 30) as u8),
                p @ 40..=47 => self.attr.bg = Color::Indexed((p - 40) as u8),
                p @ 90..=97 => self.attr.fg = Color::Indexed((p - 90 + 8) as u8),
                p @ 100..=107 => self.attr.bg = Color::Indexed((p - 100 + 8) as u8),
                p @ (38 | 48) => {
                    let (color, consumed) = match params.get(i + 1) {
                        Some(5) if i + 2 < params.len() => {
                            (Some(Color::Indexed(params[i + 2] as u8)), 2)
                        }
                        Some(2) if i + 4 < params.len() => (
                            Some(Color::Rgb(
                                params[i + 2] as u8,
                                params[i + 3] as u8,
                                params[i + 4] as u8,
                            )),
                            4,
                        ),
                        _ => (None, 0),
                    };
                    if let Some(color) = color {
                        if p == 38 {
                            self.attr.fg = color;
                        } else {
                            self.attr.bg = color;
                        }
                    }
                    i += consumed;
                }
                _ => {}
            }
            i += 1;
        }
    }
}
