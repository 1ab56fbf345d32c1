//! VT100/xterm-class terminal emulator
//!
//! [`Terminal`] is a pure state machine: bytes go in through
//! [`Terminal::write`], device-status replies come back out, and the grid can
//! be inspected, serialized or rendered as an ANSI replay at any point. Parser
//! state survives across calls so sequences may be split arbitrarily.

mod cell;
mod csi;
mod parser;
mod screen;
mod snapshot;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::trace;

pub use cell::{Attr, Cell, Charset, Color, Row};
pub use snapshot::TerminalSnapshot;

use cell::{blank_rows, resize_rows};
use parser::ParseState;

/// Smallest accepted grid width
pub const MIN_COLS: usize = 2;
/// Smallest accepted grid height
pub const MIN_ROWS: usize = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modes {
    /// DECAWM
    pub wrap: bool,
    /// DECOM
    pub origin: bool,
    /// DECTCEM
    pub cursor_visible: bool,
    pub alt_screen: bool,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            wrap: true,
            origin: false,
            cursor_visible: true,
            alt_screen: false,
        }
    }
}

/// Cursor state captured by DECSC / SCOSC and `?1049h`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SavedCursor {
    pub cursor: Cursor,
    pub attr: Attr,
    pub g0: Charset,
    pub g1: Charset,
    pub shifted: bool,
}

impl Default for SavedCursor {
    fn default() -> Self {
        Self {
            cursor: Cursor::default(),
            attr: Attr::default(),
            g0: Charset::Ascii,
            g1: Charset::DecSpecial,
            shifted: false,
        }
    }
}

/// Terminal emulator state
#[derive(Debug)]
pub struct Terminal {
    cols: usize,
    rows: usize,

    primary: Vec<Row>,
    alt: Vec<Row>,
    history: VecDeque<Row>,
    /// Rows of primary-screen scrollback retained; 0 disables capture
    history_max: usize,

    cursor: Cursor,
    saved: SavedCursor,
    attr: Attr,
    modes: Modes,
    g0: Charset,
    g1: Charset,
    shifted: bool,
    tab_stops: Vec<bool>,
    last_char: Option<char>,
    wrap_next: bool,

    scroll_top: usize,
    scroll_bottom: usize,

    state: ParseState,
    utf8_buf: Vec<u8>,
}

impl Terminal {
    pub fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(MIN_COLS);
        let rows = rows.max(MIN_ROWS);
        Self {
            cols,
            rows,
            primary: blank_rows(rows, cols),
            alt: blank_rows(rows, cols),
            history: VecDeque::new(),
            history_max: 0,
            cursor: Cursor::default(),
            saved: SavedCursor::default(),
            attr: Attr::default(),
            modes: Modes::default(),
            g0: Charset::Ascii,
            g1: Charset::DecSpecial,
            shifted: false,
            tab_stops: default_tab_stops(cols),
            last_char: None,
            wrap_next: false,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            state: ParseState::Ground,
            utf8_buf: Vec::new(),
        }
    }

    /// Feed output bytes; returns replies the terminal would send back to the
    /// program (cursor reports, device attributes, mode reports).
    pub fn write(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut responses = Vec::new();
        for &b in data {
            self.parse_byte(b, &mut responses);
        }
        if !responses.is_empty() {
            trace!(count = responses.len(), "terminal queued responses");
        }
        responses
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn modes(&self) -> Modes {
        self.modes
    }

    pub fn is_alt_screen(&self) -> bool {
        self.modes.alt_screen
    }

    /// Configure how many primary-screen rows of scrollback to keep.
    /// Zero disables capture and drops existing history.
    pub fn set_history_limit(&mut self, lines: usize) {
        self.history_max = lines;
        if lines == 0 {
            self.history.clear();
            return;
        }
        while self.history.len() > lines {
            self.history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_rows(&self) -> Vec<Row> {
        self.history.iter().cloned().collect()
    }

    /// Rows of the screen currently shown (alternate when active)
    pub fn screen_rows(&self) -> &[Row] {
        if self.modes.alt_screen {
            &self.alt
        } else {
            &self.primary
        }
    }

    /// Resize both grids. Dimensions are clamped to at least 2x1; scrollback
    /// is discarded because its row widths no longer match.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(MIN_COLS);
        let rows = rows.max(MIN_ROWS);
        if cols == self.cols && rows == self.rows {
            return;
        }
        self.cols = cols;
        self.rows = rows;
        resize_rows(&mut self.primary, rows, cols);
        resize_rows(&mut self.alt, rows, cols);
        self.cursor.row = self.cursor.row.min(rows - 1);
        self.cursor.col = self.cursor.col.min(cols - 1);
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.tab_stops = resize_tab_stops(&self.tab_stops, cols);
        self.wrap_next = false;
        self.history.clear();
    }

    fn active_mut(&mut self) -> &mut Vec<Row> {
        if self.modes.alt_screen {
            &mut self.alt
        } else {
            &mut self.primary
        }
    }

    /// Full reset (RIS)
    fn reset(&mut self) {
        self.modes = Modes::default();
        self.attr = Attr::default();
        self.cursor = Cursor::default();
        self.saved = SavedCursor::default();
        self.g0 = Charset::Ascii;
        self.g1 = Charset::DecSpecial;
        self.shifted = false;
        self.scroll_top = 0;
        self.scroll_bottom = self.rows - 1;
        self.tab_stops = default_tab_stops(self.cols);
        for row in self.primary.iter_mut().chain(self.alt.iter_mut()) {
            cell::clear_row(row, Attr::default());
        }
        self.last_char = None;
        self.wrap_next = false;
        self.state = ParseState::Ground;
        self.utf8_buf.clear();
    }
}

pub(crate) fn default_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|i| i > 0 && i % 8 == 0).collect()
}

/// Keep existing stops and extend with the default 8-column spacing
pub(crate) fn resize_tab_stops(existing: &[bool], cols: usize) -> Vec<bool> {
    (0..cols)
        .map(|i| match existing.get(i) {
            Some(stop) => *stop,
            None => i > 0 && i % 8 == 0,
        })
        .collect()
}
