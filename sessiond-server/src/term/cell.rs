//! Cell grid primitives and SGR rendering

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Cell color
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    #[default]
    Default,
    /// Palette index (0-15 are the classic ANSI colors, 16-255 the extended palette)
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Rendition attributes applied to a cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
    pub hidden: bool,
    pub strike: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub ch: char,
    pub attr: Attr,
}

impl Cell {
    pub const fn blank(attr: Attr) -> Self {
        Self { ch: ' ', attr }
    }

    /// Glyph as displayed; NUL renders as a space
    pub fn display_char(&self) -> char {
        if self.ch == '\0' {
            ' '
        } else {
            self.ch
        }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank(Attr::default())
    }
}

/// One grid row. Every row of a screen holds exactly `cols` cells.
pub type Row = Vec<Cell>;

pub(crate) fn blank_row(cols: usize) -> Row {
    vec![Cell::default(); cols]
}

pub(crate) fn blank_rows(rows: usize, cols: usize) -> Vec<Row> {
    (0..rows).map(|_| blank_row(cols)).collect()
}

pub(crate) fn clear_row(row: &mut Row, attr: Attr) {
    row.fill(Cell::blank(attr));
}

pub(crate) fn row_has_content(row: &[Cell]) -> bool {
    row.iter().any(|cell| cell.display_char() != ' ')
}

/// Grow or shrink `rows` to `new_rows` x `cols`, keeping the top-left content.
pub(crate) fn resize_rows(rows: &mut Vec<Row>, new_rows: usize, cols: usize) {
    rows.truncate(new_rows);
    for row in rows.iter_mut() {
        row.resize(cols, Cell::default());
    }
    while rows.len() < new_rows {
        rows.push(blank_row(cols));
    }
}

/// Character sets selectable into G0/G1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charset {
    #[default]
    Ascii,
    /// DEC special graphics (line drawing)
    DecSpecial,
}

/// Map a printable ASCII character through the DEC special graphics set
pub(crate) fn dec_special(ch: char) -> char {
    match ch {
        'a' => '▒',
        'b' => '␉',
        'c' => '␌',
        'd' => '␍',
        'e' => '␊',
        'f' => '°',
        'g' => '±',
        'h' => '␤',
        'i' => '␋',
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺',
        'p' => '⎻',
        'q' => '─',
        'r' => '⎼',
        's' => '⎽',
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        other => other,
    }
}

/// Full SGR sequence that resets and then applies `attr`
pub(crate) fn sgr_for_attr(attr: &Attr) -> String {
    let mut out = String::from("\x1b[0");
    let flags = [
        (attr.bold, "1"),
        (attr.dim, "2"),
        (attr.italic, "3"),
        (attr.underline, "4"),
        (attr.inverse, "7"),
        (attr.hidden, "8"),
        (attr.strike, "9"),
    ];
    for (set, code) in flags {
        if set {
            out.push(';');
            out.push_str(code);
        }
    }
    out.push(';');
    push_color(&mut out, attr.fg, true);
    out.push(';');
    push_color(&mut out, attr.bg, false);
    out.push('m');
    out
}

fn push_color(out: &mut String, color: Color, fg: bool) {
    let (base, bright, extended, default) = if fg {
        (30u32, 90u32, 38u32, 39u32)
    } else {
        (40, 100, 48, 49)
    };
    // Writing into a String cannot fail.
    let _ = match color {
        Color::Default => write!(out, "{}", default),
        Color::Indexed(index) if index < 8 => write!(out, "{}", base + u32::from(index)),
        Color::Indexed(index) if index < 16 => write!(out, "{}", bright + u32::from(index - 8)),
        Color::Indexed(index) => write!(out, "{};5;{}", extended, index),
        Color::Rgb(r, g, b) => write!(out, "{};2;{};{};{}", extended, r, g, b),
    };
}

/// Render a row as text with SGR changes, trimming trailing blanks.
/// Nothing is written for an all-blank row.
pub(crate) fn write_row_ansi(out: &mut String, row: &[Cell], cols: usize) {
    let cols = cols.min(row.len());
    let Some(last) = row[..cols].iter().rposition(|c| c.display_char() != ' ') else {
        return;
    };
    let mut current = Attr::default();
    for cell in &row[..=last] {
        if cell.attr != current {
            out.push_str(&sgr_for_attr(&cell.attr));
            current = cell.attr;
        }
        out.push(cell.display_char());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgr_for_default_attr() {
        assert_eq!(sgr_for_attr(&Attr::default()), "\x1b[0;39;49m");
    }

    #[test]
    fn test_sgr_for_colors() {
        let attr = Attr {
            bold: true,
            fg: Color::Indexed(9),
            bg: Color::Indexed(200),
            ..Default::default()
        };
        assert_eq!(sgr_for_attr(&attr), "\x1b[0;1;91;48;5;200m");

        let attr = Attr {
            fg: Color::Rgb(1, 2, 3),
            bg: Color::Indexed(4),
            ..Default::default()
        };
        assert_eq!(sgr_for_attr(&attr), "\x1b[0;38;2;1;2;3;44m");
    }

    #[test]
    fn test_write_row_ansi_trims_trailing_blanks() {
        let bold = Attr {
            bold: true,
            ..Default::default()
        };
        let row = vec![
            Cell {
                ch: 'A',
                attr: Attr::default(),
            },
            Cell { ch: 'B', attr: bold },
            Cell::default(),
            Cell {
                ch: '\0',
                attr: Attr::default(),
            },
        ];
        let mut out = String::new();
        write_row_ansi(&mut out, &row, 4);
        assert_eq!(out, "A\x1b[0;1;39;49mB");
    }

    #[test]
    fn test_write_row_ansi_blank_row() {
        let mut out = String::new();
        write_row_ansi(&mut out, &blank_row(5), 5);
        assert!(out.is_empty());
    }

    #[test]
    fn test_resize_rows_keeps_content() {
        let mut rows = blank_rows(2, 2);
        rows[0][0].ch = 'x';
        resize_rows(&mut rows, 3, 4);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 4));
        assert_eq!(rows[0][0].ch, 'x');

        resize_rows(&mut rows, 1, 1);
        assert_eq!(rows, vec![vec![Cell {
            ch: 'x',
            attr: Attr::default()
        }]]);
    }

    #[test]
    fn test_dec_special_mapping() {
        assert_eq!(dec_special('q'), '─');
        assert_eq!(dec_special('x'), '│');
        assert_eq!(dec_special('A'), 'A');
    }
}
