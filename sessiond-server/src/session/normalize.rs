//! 8-bit C1 control normalization

/// Rewrites stray 8-bit C1 controls into their 7-bit `ESC x` form.
///
/// Bytes that belong to well-formed UTF-8 are left alone; an incomplete
/// sequence at the end of a chunk is held back and rejoined with the next.
#[derive(Debug, Default)]
pub struct C1Normalizer {
    tail: Vec<u8>,
}

impl C1Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.tail);
        data.extend_from_slice(chunk);

        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;
        while i < data.len() {
            let b = data[i];
            if b < 0x80 {
                out.push(b);
                i += 1;
                continue;
            }
            match utf8_at(&data[i..]) {
                Utf8::Complete(len) => {
                    out.extend_from_slice(&data[i..i + len]);
                    i += len;
                }
                Utf8::Incomplete => {
                    self.tail.extend_from_slice(&data[i..]);
                    break;
                }
                Utf8::Invalid => {
                    match c1_replacement(b) {
                        Some(final_byte) => out.extend_from_slice(&[0x1b, final_byte]),
                        None => out.push(b),
                    }
                    i += 1;
                }
            }
        }
        out
    }
}

enum Utf8 {
    Complete(usize),
    Incomplete,
    Invalid,
}

fn utf8_at(data: &[u8]) -> Utf8 {
    let width = match data[0] {
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return Utf8::Invalid,
    };
    if data.len() < width {
        let continues = data[1..].iter().all(|b| (0x80..=0xbf).contains(b));
        return if continues {
            Utf8::Incomplete
        } else {
            Utf8::Invalid
        };
    }
    match std::str::from_utf8(&data[..width]) {
        Ok(_) => Utf8::Complete(width),
        Err(_) => Utf8::Invalid,
    }
}

/// Final byte of the 7-bit equivalent of a C1 control
fn c1_replacement(b: u8) -> Option<u8> {
    Some(match b {
        0x84 => b'D',  // IND
        0x85 => b'E',  // NEL
        0x88 => b'H',  // HTS
        0x8d => b'M',  // RI
        0x8e => b'N',  // SS2
        0x8f => b'O',  // SS3
        0x90 => b'P',  // DCS
        0x98 => b'X',  // SOS
        0x9b => b'[',  // CSI
        0x9c => b'\\', // ST
        0x9d => b']',  // OSC
        0x9e => b'^',  // PM
        0x9f => b'_',  // APC
        _ => return None,
    })
}
