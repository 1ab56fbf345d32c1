//! Grid mutation: printing, cursor movement, erasure, scrolling, history

use super::cell::{blank_row, clear_row, row_has_content, Attr, Cell, Row};
use super::{Cursor, SavedCursor, Terminal};

impl Terminal {
    pub(super) fn put_char(&mut self, ch: char) {
        if ch == '\0' {
            return;
        }
        if self.wrap_next && self.modes.wrap {
            self.cursor.col = 0;
            self.index();
            self.wrap_next = false;
        }
        let ch = self.map_char(ch);
        let Cursor { row, col } = self.cursor;
        if row >= self.rows || col >= self.cols {
            return;
        }
        let attr = self.attr;
        self.active_mut()[row][col] = Cell { ch, attr };
        self.last_char = Some(ch);
        if col == self.cols - 1 {
            if self.modes.wrap {
                self.wrap_next = true;
            }
            return;
        }
        self.cursor.col += 1;
    }

    pub(super) fn save_cursor(&mut self) {
        self.saved = SavedCursor {
            cursor: self.cursor,
            attr: self.attr,
            g0: self.g0,
            g1: self.g1,
            shifted: self.shifted,
        };
    }

    pub(super) fn restore_cursor(&mut self) {
        let saved = self.saved;
        self.cursor = saved.cursor;
        self.attr = saved.attr;
        self.g0 = saved.g0;
        self.g1 = saved.g1;
        self.shifted = saved.shifted;
        self.wrap_next = false;
        self.clamp_cursor();
    }

    pub(super) fn enter_alt(&mut self, save: bool) {
        if save {
            self.save_cursor();
        }
        self.modes.alt_screen = true;
        for row in self.alt.iter_mut() {
            clear_row(row, Attr::default());
        }
        self.cursor = Cursor::default();
        self.wrap_next = false;
        self.clamp_cursor();
    }

    pub(super) fn exit_alt(&mut self, restore: bool) {
        self.modes.alt_screen = false;
        if restore {
            self.restore_cursor();
            return;
        }
        self.cursor = Cursor::default();
        self.wrap_next = false;
        self.clamp_cursor();
    }

    /// DECALN: fill the screen with `E`
    pub(super) fn align_screen(&mut self) {
        let fill = Cell {
            ch: 'E',
            attr: self.attr,
        };
        for row in self.active_mut().iter_mut() {
            row.fill(fill);
        }
        self.cursor = Cursor::default();
        self.clamp_cursor();
    }

    pub(super) fn clamp_cursor(&mut self) {
        self.cursor.col = self.cursor.col.min(self.cols - 1);
        let (min_row, max_row) = if self.modes.origin {
            (self.scroll_top, self.scroll_bottom)
        } else {
            (0, self.rows - 1)
        };
        self.cursor.row = self.cursor.row.clamp(min_row, max_row);
    }

    pub(super) fn set_tab_stop(&mut self, col: usize) {
        if col >= self.cols {
            return;
        }
        if self.tab_stops.len() != self.cols {
            self.tab_stops = super::resize_tab_stops(&self.tab_stops, self.cols);
        }
        self.tab_stops[col] = true;
    }

    /// TBC: 0 clears the stop under the cursor, 3 clears all
    pub(super) fn clear_tab_stop(&mut self, mode: usize) {
        match mode {
            0 => {
                if let Some(stop) = self.tab_stops.get_mut(self.cursor.col) {
                    *stop = false;
                }
            }
            3 => self.tab_stops.fill(false),
            _ => {}
        }
    }

    pub(super) fn advance_tab(&mut self, n: usize) {
        for _ in 0..n.min(self.cols) {
            self.cursor.col = self.next_tab_stop(self.cursor.col);
        }
    }

    pub(super) fn back_tab(&mut self, n: usize) {
        for _ in 0..n.min(self.cols) {
            self.cursor.col = self.prev_tab_stop(self.cursor.col);
        }
    }

    fn next_tab_stop(&self, col: usize) -> usize {
        (col + 1..self.cols)
            .find(|i| self.tab_stops.get(*i).copied().unwrap_or(false))
            .unwrap_or(self.cols - 1)
    }

    fn prev_tab_stop(&self, col: usize) -> usize {
        (0..col)
            .rev()
            .find(|i| self.tab_stops.get(*i).copied().unwrap_or(false))
            .unwrap_or(0)
    }

    /// ECH
    pub(super) fn erase_chars(&mut self, n: usize) {
        let Cursor { row, col } = self.cursor;
        if row >= self.rows || col >= self.cols {
            return;
        }
        let end = col.saturating_add(n).min(self.cols);
        let blank = Cell::blank(self.attr);
        self.active_mut()[row][col..end].fill(blank);
    }

    /// REP
    pub(super) fn repeat_last(&mut self, n: usize) {
        let Some(ch) = self.last_char else {
            return;
        };
        // Beyond one full screen the result is the same as one screen's worth.
        let limit = self.rows.saturating_mul(self.cols).saturating_add(self.cols);
        for _ in 0..n.min(limit) {
            self.put_char(ch);
        }
    }

    /// IND / LF
    pub(super) fn index(&mut self) {
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1);
            return;
        }
        if self.cursor.row < self.rows - 1 {
            self.cursor.row += 1;
        }
    }

    /// RI
    pub(super) fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
            return;
        }
        self.cursor.row = self.cursor.row.saturating_sub(1);
    }

    /// ED. Mode 2 pushes the visible primary screen into history first;
    /// mode 3 also drops the primary history.
    pub(super) fn erase_in_display(&mut self, mode: usize) {
        let attr = self.attr;
        let row = self.cursor.row;
        match mode {
            0 => {
                self.erase_in_line(0);
                for r in self.active_mut().iter_mut().skip(row + 1) {
                    clear_row(r, attr);
                }
            }
            1 => {
                for r in self.active_mut().iter_mut().take(row) {
                    clear_row(r, attr);
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                if mode == 2 {
                    self.append_history_screen();
                }
                for r in self.active_mut().iter_mut() {
                    clear_row(r, attr);
                }
                if mode == 3 && !self.modes.alt_screen {
                    self.history.clear();
                }
            }
            _ => {}
        }
    }

    /// EL
    pub(super) fn erase_in_line(&mut self, mode: usize) {
        let Cursor { row, col } = self.cursor;
        let cols = self.cols;
        let blank = Cell::blank(self.attr);
        let line = &mut self.active_mut()[row];
        match mode {
            0 => line[col..].fill(blank),
            1 => line[..=col.min(cols - 1)].fill(blank),
            2 => line.fill(blank),
            _ => {}
        }
    }

    /// IL
    pub(super) fn insert_lines(&mut self, n: usize) {
        let (top, bottom, row) = (self.scroll_top, self.scroll_bottom, self.cursor.row);
        if row < top || row > bottom {
            return;
        }
        let cols = self.cols;
        let region = &mut self.active_mut()[row..=bottom];
        let n = n.min(region.len());
        region.rotate_right(n);
        for line in region.iter_mut().take(n) {
            *line = blank_row(cols);
        }
    }

    /// DL
    pub(super) fn delete_lines(&mut self, n: usize) {
        let (top, bottom, row) = (self.scroll_top, self.scroll_bottom, self.cursor.row);
        if row < top || row > bottom {
            return;
        }
        let cols = self.cols;
        let region = &mut self.active_mut()[row..=bottom];
        let n = n.min(region.len());
        region.rotate_left(n);
        let len = region.len();
        for line in region.iter_mut().skip(len - n) {
            *line = blank_row(cols);
        }
    }

    /// DCH
    pub(super) fn delete_chars(&mut self, n: usize) {
        let Cursor { row, col } = self.cursor;
        if col >= self.cols {
            return;
        }
        let blank = Cell::blank(self.attr);
        let line = &mut self.active_mut()[row][col..];
        let n = n.min(line.len());
        line.rotate_left(n);
        let len = line.len();
        line[len - n..].fill(blank);
    }

    /// ICH
    pub(super) fn insert_chars(&mut self, n: usize) {
        let Cursor { row, col } = self.cursor;
        if col >= self.cols {
            return;
        }
        let blank = Cell::blank(self.attr);
        let line = &mut self.active_mut()[row][col..];
        let n = n.min(line.len());
        line.rotate_right(n);
        line[..n].fill(blank);
    }

    /// SU. Rows leaving the top of a full-height primary region enter history.
    pub(super) fn scroll_up(&mut self, n: usize) {
        let (top, bottom, cols) = (self.scroll_top, self.scroll_bottom, self.cols);
        let capture = !self.modes.alt_screen && self.history_max > 0 && top == 0;
        let height = bottom - top + 1;
        let limit = if capture {
            height.saturating_add(self.history_max)
        } else {
            height
        };
        for _ in 0..n.min(limit) {
            if capture {
                let row = self.primary[top].clone();
                self.append_history_row(row);
            }
            let region = &mut self.active_mut()[top..=bottom];
            region.rotate_left(1);
            if let Some(last) = region.last_mut() {
                *last = blank_row(cols);
            }
        }
    }

    /// SD
    pub(super) fn scroll_down(&mut self, n: usize) {
        let (top, bottom, cols) = (self.scroll_top, self.scroll_bottom, self.cols);
        let region = &mut self.active_mut()[top..=bottom];
        let n = n.min(region.len());
        region.rotate_right(n);
        for line in region.iter_mut().take(n) {
            *line = blank_row(cols);
        }
    }

    fn append_history_row(&mut self, row: Row) {
        if self.history_max == 0 {
            return;
        }
        self.history.push_back(row);
        while self.history.len() > self.history_max {
            self.history.pop_front();
        }
    }

    /// Push the primary screen, up to its last non-blank row, into history
    fn append_history_screen(&mut self) {
        if self.history_max == 0 || self.modes.alt_screen {
            return;
        }
        let Some(last) = self.primary.iter().rposition(|r| row_has_content(r)) else {
            return;
        };
        let rows: Vec<Row> = self.primary[..=last].to_vec();
        for row in rows {
            self.append_history_row(row);
        }
    }
}
