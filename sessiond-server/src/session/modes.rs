//! Alternate-screen and mouse-reporting mode tracking

use std::fmt::Write as _;

use sessiond_protocol::ModeSnapshot;

const MOUSE_X10: u8 = 1 << 0;
const MOUSE_BUTTON: u8 = 1 << 1;
const MOUSE_ANY: u8 = 1 << 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    #[default]
    Ground,
    Escape,
    Csi,
}

/// Which tracked modes a chunk changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub alt_screen: bool,
    pub mouse: bool,
    /// `ESC[2J` or `ESC[3J` was seen
    pub clear_screen: bool,
}

impl ModeChange {
    /// True when a tracked mode changed
    pub fn any(&self) -> bool {
        self.alt_screen || self.mouse
    }
}

/// Follows `CSI ? Pm h/l` and screen clears in the output stream.
///
/// Parser state survives between chunks, so a sequence split across two
/// PTY reads is still seen.
#[derive(Debug, Default)]
pub struct ModeTracker {
    state: ParseState,
    private: bool,
    params: Vec<u32>,
    current: Option<u32>,
    cleared: bool,
    modes: ModeSnapshot,
}

impl ModeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        self.modes
    }

    pub fn alt_screen(&self) -> bool {
        self.modes.alt_screen
    }

    pub fn tui_mode(&self) -> bool {
        self.modes.tui_mode
    }

    /// Replace the tracked modes (restored state)
    pub fn restore(&mut self, modes: ModeSnapshot) {
        self.modes = modes;
        self.modes.tui_mode = modes.tui_mode && modes.alt_screen;
    }

    /// Force the screen mode, e.g. from the emulator's view after restore
    pub fn set_alt_screen(&mut self, active: bool) {
        self.modes.alt_screen = active;
        self.modes.tui_mode = active;
    }

    /// Drop all mouse reporting state (no client left to receive reports)
    pub fn clear_mouse(&mut self) {
        self.modes.mouse_mask = 0;
        self.modes.mouse_sgr = false;
        self.modes.mouse_utf8 = false;
        self.modes.mouse_urxvt = false;
    }

    pub fn observe(&mut self, data: &[u8]) -> ModeChange {
        let before = self.modes;
        self.cleared = false;
        for &b in data {
            self.consume(b);
        }
        let after = self.modes;
        ModeChange {
            alt_screen: before.alt_screen != after.alt_screen,
            mouse: before.mouse_mask != after.mouse_mask
                || before.mouse_sgr != after.mouse_sgr
                || before.mouse_utf8 != after.mouse_utf8
                || before.mouse_urxvt != after.mouse_urxvt,
            clear_screen: self.cleared,
        }
    }

    fn consume(&mut self, b: u8) {
        match self.state {
            ParseState::Ground => {
                if b == 0x1b {
                    self.state = ParseState::Escape;
                }
            }
            ParseState::Escape => match b {
                b'[' => {
                    self.state = ParseState::Csi;
                    self.private = false;
                    self.params.clear();
                    self.current = None;
                }
                0x1b => {}
                _ => self.reset(),
            },
            ParseState::Csi => match b {
                b'?' if !self.private && self.params.is_empty() && self.current.is_none() => {
                    self.private = true;
                }
                b'0'..=b'9' => {
                    let digit = u32::from(b - b'0');
                    let value = self.current.unwrap_or(0);
                    self.current = Some(value.saturating_mul(10).saturating_add(digit));
                }
                b';' => {
                    if let Some(value) = self.current.take() {
                        self.params.push(value);
                    }
                }
                b'h' | b'l' if self.private => {
                    if let Some(value) = self.current.take() {
                        self.params.push(value);
                    }
                    let enabled = b == b'h';
                    for param in std::mem::take(&mut self.params) {
                        self.apply(param, enabled);
                    }
                    self.reset();
                }
                b'J' if !self.private => {
                    if let Some(value) = self.current.take() {
                        self.params.push(value);
                    }
                    if matches!(self.params.as_slice(), [2] | [3]) {
                        self.cleared = true;
                    }
                    self.reset();
                }
                0x1b => self.state = ParseState::Escape,
                _ => self.reset(),
            },
        }
    }

    fn reset(&mut self) {
        self.state = ParseState::Ground;
        self.private = false;
        self.params.clear();
        self.current = None;
    }

    fn apply(&mut self, param: u32, enabled: bool) {
        let modes = &mut self.modes;
        match param {
            47 | 1047 | 1049 => {
                modes.alt_screen = enabled;
                modes.tui_mode = enabled;
            }
            1000 => set_bit(&mut modes.mouse_mask, MOUSE_X10, enabled),
            1002 => set_bit(&mut modes.mouse_mask, MOUSE_BUTTON, enabled),
            1003 => set_bit(&mut modes.mouse_mask, MOUSE_ANY, enabled),
            1005 => modes.mouse_utf8 = enabled,
            1006 => modes.mouse_sgr = enabled,
            1015 => modes.mouse_urxvt = enabled,
            _ => {}
        }
    }

    /// Sequences that put a fresh terminal into the tracked modes
    pub fn replay_prefix(&self) -> Vec<u8> {
        let modes = &self.modes;
        let mut out = String::new();
        let enabled = [
            (modes.alt_screen, 1049),
            (modes.mouse_mask & MOUSE_X10 != 0, 1000),
            (modes.mouse_mask & MOUSE_BUTTON != 0, 1002),
            (modes.mouse_mask & MOUSE_ANY != 0, 1003),
            (modes.mouse_utf8, 1005),
            (modes.mouse_sgr, 1006),
            (modes.mouse_urxvt, 1015),
        ];
        for (on, mode) in enabled {
            if on {
                let _ = write!(out, "\x1b[?{}h", mode);
            }
        }
        out.into_bytes()
    }
}

fn set_bit(mask: &mut u8, bit: u8, on: bool) {
    if on {
        *mask |= bit;
    } else {
        *mask &= !bit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessiond_protocol::MouseEncoding;

    #[test]
    fn test_alt_screen_enter_exit() {
        let mut tracker = ModeTracker::new();
        let change = tracker.observe(b"\x1b[?1049h");
        assert!(change.alt_screen);
        assert!(tracker.alt_screen());
        assert!(tracker.tui_mode());

        let change = tracker.observe(b"text");
        assert!(!change.any());

        let change = tracker.observe(b"\x1b[?47l");
        assert!(change.alt_screen);
        assert!(!tracker.alt_screen());
        assert!(!tracker.tui_mode());
    }

    #[test]
    fn test_mouse_modes_and_encoding() {
        let mut tracker = ModeTracker::new();
        let change = tracker.observe(b"\x1b[?1000;1006h");
        assert!(change.mouse);
        assert!(!change.alt_screen);
        let modes = tracker.snapshot();
        assert_eq!(modes.mouse_mask, 1);
        assert!(modes.mouse());
        assert_eq!(modes.mouse_encoding(), MouseEncoding::Sgr);

        tracker.observe(b"\x1b[?1003h\x1b[?1000l");
        assert_eq!(tracker.snapshot().mouse_mask, 4);
    }

    #[test]
    fn test_sequence_split_across_chunks() {
        let mut tracker = ModeTracker::new();
        assert!(!tracker.observe(b"abc\x1b[?10").any());
        let change = tracker.observe(b"06h");
        assert!(change.mouse);
        assert!(tracker.snapshot().mouse_sgr);

        tracker.observe(b"\x1b");
        tracker.observe(b"[?1049h");
        assert!(tracker.alt_screen());
    }

    #[test]
    fn test_non_private_and_broken_sequences_ignored() {
        let mut tracker = ModeTracker::new();
        assert!(!tracker.observe(b"\x1b[1049h").any());
        assert!(!tracker.observe(b"\x1b[?10x49h").any());
        assert!(!tracker.observe(b"\x1b]?1049h").any());
        // A fresh ESC restarts the sequence.
        assert!(tracker.observe(b"\x1b[?10\x1b[?1002h").mouse);
        assert_eq!(tracker.snapshot().mouse_mask, 2);
    }

    #[test]
    fn test_replay_prefix_order() {
        let mut tracker = ModeTracker::new();
        assert!(tracker.replay_prefix().is_empty());
        tracker.observe(b"\x1b[?1015;1006;1005;1003;1002;1000;1049h");
        assert_eq!(
            tracker.replay_prefix(),
            b"\x1b[?1049h\x1b[?1000h\x1b[?1002h\x1b[?1003h\x1b[?1005h\x1b[?1006h\x1b[?1015h"
        );
    }

    #[test]
    fn test_clear_mouse_keeps_screen_mode() {
        let mut tracker = ModeTracker::new();
        tracker.observe(b"\x1b[?1049h\x1b[?1002;1006h");
        tracker.clear_mouse();
        let modes = tracker.snapshot();
        assert!(modes.alt_screen);
        assert!(!modes.mouse());
        assert!(!modes.mouse_sgr);
    }

    #[test]
    fn test_restore_tui_requires_alt() {
        let mut tracker = ModeTracker::new();
        tracker.restore(ModeSnapshot {
            tui_mode: true,
            mouse_mask: 1,
            ..Default::default()
        });
        assert!(!tracker.tui_mode());
        assert_eq!(tracker.snapshot().mouse_mask, 1);
    }

    #[test]
    fn test_clear_screen_detected() {
        let mut tracker = ModeTracker::new();
        let change = tracker.observe(b"a\x1b[2Jb");
        assert!(change.clear_screen);
        assert!(!change.any());
        assert!(tracker.observe(b"\x1b[3J").clear_screen);
        assert!(!tracker.observe(b"\x1b[J\x1b[2K").clear_screen);
        assert!(!tracker.observe(b"\x1b[?2J").clear_screen);
        assert!(!tracker.observe(b"plain").clear_screen);
    }

    #[test]
    fn test_clear_screen_split_across_chunks() {
        let mut tracker = ModeTracker::new();
        assert!(!tracker.observe(b"out\x1b[2").clear_screen);
        assert!(tracker.observe(b"J").clear_screen);
        assert!(!tracker.observe(b"next").clear_screen);

        assert!(!tracker.observe(b"\x1b").clear_screen);
        assert!(tracker.observe(b"[3J").clear_screen);
    }
}
