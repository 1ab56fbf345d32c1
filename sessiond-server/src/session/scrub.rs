//! Removal of terminal query replies from child output
//!
//! When a client terminal answers a query, the reply sometimes reaches the
//! child while its tty is echoing, and comes straight back as output. Those
//! echoed replies are stripped before output is stored or fanned out. What
//! counts as a reply is decided by [`POLICY`]; everything else, including
//! the queries themselves, passes through.

/// Longest unterminated OSC held back waiting for its terminator
pub const MAX_PENDING_OSC: usize = 4096;

/// Longest unterminated CSI held back waiting for its final byte
const MAX_PENDING_CSI: usize = 64;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// A complete escape sequence, as seen by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence<'a> {
    /// `ESC ] payload ST`, or its caret-echoed form `^[] payload ^G`
    Osc { payload: &'a [u8] },
    /// `ESC [ params intermediates final`
    Csi {
        params: &'a [u8],
        intermediates: &'a [u8],
        final_byte: u8,
    },
}

/// One scrubber rule: sequences matching `drops` are removed
pub struct Rule {
    pub name: &'static str,
    pub drops: fn(&Sequence<'_>) -> bool,
}

/// Reply shapes removed from output
pub const POLICY: &[Rule] = &[
    Rule {
        name: "osc_color_report",
        drops: osc_color_report,
    },
    Rule {
        name: "cursor_position_report",
        drops: cursor_position_report,
    },
    Rule {
        name: "device_attributes_report",
        drops: device_attributes_report,
    },
    Rule {
        name: "mode_report",
        drops: mode_report,
    },
];

/// Name of the first rule that drops `seq`
pub fn dropped_by(seq: &Sequence<'_>) -> Option<&'static str> {
    POLICY.iter().find(|rule| (rule.drops)(seq)).map(|rule| rule.name)
}

/// OSC 10/11/12 (`cmd;rgb:…` or `cmd;?;rgb:…`) and OSC 4 (`4;idx;rgb:…`)
fn osc_color_report(seq: &Sequence<'_>) -> bool {
    let Sequence::Osc { payload } = seq else {
        return false;
    };
    let Some(split) = payload.iter().position(|&b| b == b';') else {
        return false;
    };
    let (command, rest) = (&payload[..split], &payload[split + 1..]);
    if rest.is_empty() || !contains_ignore_case(rest, b"rgb:") {
        return false;
    }
    let is_color_value = |value: &[u8]| {
        starts_with_ignore_case(value, b"rgb:") || starts_with_ignore_case(value, b"?;rgb:")
    };
    match command {
        b"10" | b"11" | b"12" => is_color_value(rest),
        b"4" => match rest.iter().position(|&b| b == b';') {
            Some(idx) => is_color_value(&rest[idx + 1..]),
            None => false,
        },
        _ => false,
    }
}

fn cursor_position_report(seq: &Sequence<'_>) -> bool {
    matches!(seq, Sequence::Csi { final_byte: b'R', .. })
}

fn device_attributes_report(seq: &Sequence<'_>) -> bool {
    match seq {
        Sequence::Csi {
            params,
            final_byte: b'c',
            ..
        } => params.iter().any(|&b| b == b'?' || b == b'>'),
        _ => false,
    }
}

/// DECRQM reply `CSI ? Ps ; Pm $ y`
fn mode_report(seq: &Sequence<'_>) -> bool {
    match seq {
        Sequence::Csi {
            params,
            intermediates,
            final_byte: b'y',
        } => params.first() == Some(&b'?') && intermediates.contains(&b'$'),
        _ => false,
    }
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle))
}

fn starts_with_ignore_case(value: &[u8], prefix: &[u8]) -> bool {
    value.len() >= prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// A sequence removed by the scrubber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dropped {
    pub rule: &'static str,
    pub seq: Vec<u8>,
}

/// Output of one [`ResponseScrubber::scrub`] call
#[derive(Debug, Default)]
pub struct Scrubbed {
    pub data: Vec<u8>,
    pub dropped: Vec<Dropped>,
}

/// Streaming scrubber; incomplete sequences are carried to the next chunk.
#[derive(Debug, Default)]
pub struct ResponseScrubber {
    pending: Vec<u8>,
}

enum Scan {
    /// Sequence ends at this offset
    Complete(usize),
    Incomplete,
}

impl ResponseScrubber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a sequence
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn scrub(&mut self, chunk: &[u8]) -> Scrubbed {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut out = Scrubbed {
            data: Vec::with_capacity(data.len()),
            dropped: Vec::new(),
        };
        let mut i = 0;
        while i < data.len() {
            let rest = &data[i..];
            let scanned = match rest {
                [ESC] => {
                    self.pending.push(ESC);
                    break;
                }
                [ESC, b']', ..] => Some((scan_osc(rest), MAX_PENDING_OSC)),
                [ESC, b'[', ..] => Some((scan_csi(rest), MAX_PENDING_CSI)),
                [b'^', b'[', b']', ..] => Some((scan_caret_osc(rest), MAX_PENDING_OSC)),
                _ => None,
            };
            match scanned {
                None => {
                    out.data.push(data[i]);
                    i += 1;
                }
                Some((Scan::Incomplete, limit)) => {
                    if rest.len() <= limit {
                        self.pending.extend_from_slice(rest);
                    } else {
                        out.data.extend_from_slice(rest);
                    }
                    break;
                }
                Some((Scan::Complete(end), _)) => {
                    let seq = &rest[..end];
                    match parse_sequence(seq).as_ref().and_then(dropped_by) {
                        Some(rule) => out.dropped.push(Dropped {
                            rule,
                            seq: seq.to_vec(),
                        }),
                        None => out.data.extend_from_slice(seq),
                    }
                    i += end;
                }
            }
        }
        out
    }
}

fn scan_osc(seq: &[u8]) -> Scan {
    let mut i = 2;
    while i < seq.len() {
        match seq[i] {
            BEL => return Scan::Complete(i + 1),
            ESC if seq.get(i + 1) == Some(&b'\\') => return Scan::Complete(i + 2),
            _ => i += 1,
        }
    }
    Scan::Incomplete
}

fn scan_caret_osc(seq: &[u8]) -> Scan {
    let mut i = 3;
    while i < seq.len() {
        if seq[i] == b'^' {
            match &seq[i + 1..] {
                [b'G', ..] => return Scan::Complete(i + 2),
                [b'[', b'\\', ..] => return Scan::Complete(i + 3),
                _ => {}
            }
        }
        i += 1;
    }
    Scan::Incomplete
}

fn scan_csi(seq: &[u8]) -> Scan {
    match seq[2..].iter().position(|b| (0x40..=0x7e).contains(b)) {
        Some(idx) => Scan::Complete(idx + 3),
        None => Scan::Incomplete,
    }
}

/// Split a complete sequence into the parts the policy looks at
fn parse_sequence(seq: &[u8]) -> Option<Sequence<'_>> {
    match seq {
        [ESC, b']', body @ ..] => {
            let payload = body
                .strip_suffix(&[BEL])
                .or_else(|| body.strip_suffix(b"\x1b\\"))?;
            Some(Sequence::Osc { payload })
        }
        [b'^', b'[', b']', body @ ..] => {
            let payload = body
                .strip_suffix(b"^G")
                .or_else(|| body.strip_suffix(b"^[\\"))?;
            Some(Sequence::Osc { payload })
        }
        [ESC, b'[', body @ .., final_byte] => {
            let split = body
                .iter()
                .position(|b| (0x20..=0x2f).contains(b))
                .unwrap_or(body.len());
            Some(Sequence::Csi {
                params: &body[..split],
                intermediates: &body[split..],
                final_byte: *final_byte,
            })
        }
        _ => None,
    }
}
