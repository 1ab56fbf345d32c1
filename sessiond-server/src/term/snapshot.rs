//! Binary state snapshots and ANSI replay rendering

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use sessiond_utils::{Result, SessiondError};

use super::cell::{resize_rows, sgr_for_attr, write_row_ansi, Attr, Charset, Row};
use super::parser::ParseState;
use super::{default_tab_stops, resize_tab_stops, Cursor, Modes, SavedCursor, Terminal, MIN_COLS, MIN_ROWS};

/// Complete emulator state, excluding in-flight parser state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalSnapshot {
    pub cols: usize,
    pub rows: usize,
    pub modes: Modes,
    pub cursor: Cursor,
    pub saved_cursor: Cursor,
    pub attr: Attr,
    pub saved_attr: Attr,
    pub saved_g0: Charset,
    pub saved_g1: Charset,
    pub saved_shifted: bool,
    pub scroll_top: usize,
    pub scroll_bottom: usize,
    pub primary: Vec<Row>,
    pub alt: Vec<Row>,
    pub alt_active: bool,
    pub g0: Charset,
    pub g1: Charset,
    pub shifted: bool,
    pub tab_stops: Vec<bool>,
    pub history: Vec<Row>,
}

impl Terminal {
    pub fn snapshot(&self) -> TerminalSnapshot {
        TerminalSnapshot {
            cols: self.cols,
            rows: self.rows,
            modes: self.modes,
            cursor: self.cursor,
            saved_cursor: self.saved.cursor,
            attr: self.attr,
            saved_attr: self.saved.attr,
            saved_g0: self.saved.g0,
            saved_g1: self.saved.g1,
            saved_shifted: self.saved.shifted,
            scroll_top: self.scroll_top,
            scroll_bottom: self.scroll_bottom,
            primary: self.primary.clone(),
            alt: self.alt.clone(),
            alt_active: self.modes.alt_screen,
            g0: self.g0,
            g1: self.g1,
            shifted: self.shifted,
            tab_stops: self.tab_stops.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Replace the emulator state. Shapes are normalized so every grid row
    /// holds `cols` cells and the cursor and scroll region stay in bounds.
    pub fn restore(&mut self, snapshot: TerminalSnapshot) {
        let cols = snapshot.cols.max(MIN_COLS);
        let rows = snapshot.rows.max(MIN_ROWS);
        self.cols = cols;
        self.rows = rows;
        self.modes = snapshot.modes;
        self.modes.alt_screen = snapshot.alt_active;
        self.saved = SavedCursor {
            cursor: snapshot.saved_cursor,
            attr: snapshot.saved_attr,
            g0: snapshot.saved_g0,
            g1: snapshot.saved_g1,
            shifted: snapshot.saved_shifted,
        };
        self.attr = snapshot.attr;
        self.primary = snapshot.primary;
        self.alt = snapshot.alt;
        resize_rows(&mut self.primary, rows, cols);
        resize_rows(&mut self.alt, rows, cols);
        self.g0 = snapshot.g0;
        self.g1 = snapshot.g1;
        self.shifted = snapshot.shifted;
        self.tab_stops = if snapshot.tab_stops.is_empty() {
            default_tab_stops(cols)
        } else {
            resize_tab_stops(&snapshot.tab_stops, cols)
        };
        self.scroll_top = snapshot.scroll_top.min(rows - 1);
        self.scroll_bottom = snapshot.scroll_bottom.min(rows - 1);
        if self.scroll_bottom <= self.scroll_top {
            self.scroll_top = 0;
            self.scroll_bottom = rows - 1;
        }
        self.history = snapshot
            .history
            .into_iter()
            .filter(|row| row.len() == cols)
            .collect();
        if self.history_max == 0 {
            self.history.clear();
        }
        while self.history.len() > self.history_max {
            self.history.pop_front();
        }
        self.cursor = snapshot.cursor;
        self.clamp_cursor();
        self.wrap_next = false;
        self.last_char = None;
        self.state = ParseState::Ground;
        self.utf8_buf.clear();
    }

    /// Serialize the full state with bincode
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.snapshot())
            .map_err(|e| SessiondError::persistence(format!("encode terminal state: {}", e)))
    }

    /// Restore from bytes written by [`Terminal::to_bytes`]
    pub fn restore_bytes(&mut self, data: &[u8]) -> Result<()> {
        let snapshot: TerminalSnapshot = bincode::deserialize(data)
            .map_err(|e| SessiondError::persistence(format!("decode terminal state: {}", e)))?;
        self.restore(snapshot);
        Ok(())
    }

    /// Byte stream that redraws the current screen on a blank terminal:
    /// screen select, clear, every row positioned explicitly, cursor state.
    pub fn snapshot_ansi(&self) -> String {
        let mut out = String::new();
        out.push_str(if self.modes.alt_screen {
            "\x1b[?1049h"
        } else {
            "\x1b[?1049l"
        });
        out.push_str("\x1b[2J\x1b[H");
        let mut current = Attr::default();
        for (r, row) in self.screen_rows().iter().enumerate() {
            let _ = write!(out, "\x1b[{};1H", r + 1);
            for cell in row.iter().take(self.cols) {
                if cell.attr != current {
                    out.push_str(&sgr_for_attr(&cell.attr));
                    current = cell.attr;
                }
                out.push(cell.display_char());
            }
        }
        out.push_str("\x1b[0m");
        out.push_str(if self.modes.cursor_visible {
            "\x1b[?25h"
        } else {
            "\x1b[?25l"
        });
        let _ = write!(out, "\x1b[{};{}H", self.cursor.row + 1, self.cursor.col + 1);
        out
    }

    /// Like [`Terminal::snapshot_ansi`], preceded by the primary scrollback
    /// as plain lines. Falls back to the plain snapshot on the alternate
    /// screen or when there is no history.
    pub fn snapshot_ansi_with_history(&self) -> String {
        if self.modes.alt_screen || self.history.is_empty() {
            return self.snapshot_ansi();
        }
        let mut out = String::new();
        for row in &self.history {
            write_row_ansi(&mut out, row, self.cols);
            out.push_str("\x1b[0m\r\n");
        }
        out.push_str(&self.snapshot_ansi());
        out
    }
}
