//! Kitty graphics control-string parsing and payload decoding

use std::collections::HashMap;
use std::io::Read;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::ZlibDecoder;
use tracing::debug;

/// Upper bound on a decoded (and inflated) image payload
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

pub(crate) type Params = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `a=t`
    Transmit,
    /// `a=T`
    TransmitAndDisplay,
    /// `a=p`
    Place,
    /// `a=d`
    Delete,
}

impl Action {
    fn parse(value: Option<&str>) -> Option<Self> {
        match value.unwrap_or("t") {
            "" | "t" => Some(Self::Transmit),
            "T" => Some(Self::TransmitAndDisplay),
            "p" => Some(Self::Place),
            "d" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// `d=` selector of a delete command (case ignored; the uppercase forms
/// also free image data in kitty, which is the same thing here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    All,
    ByImage,
    ByPlacement,
    AtCursor,
}

impl DeleteMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "" | "a" | "A" => Some(Self::All),
            "i" | "I" => Some(Self::ByImage),
            "p" | "P" => Some(Self::ByPlacement),
            "c" | "C" => Some(Self::AtCursor),
            _ => None,
        }
    }
}

/// One APC `G` control string, before chunk reassembly
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawCommand {
    pub params: Params,
    pub payload: String,
}

impl RawCommand {
    /// Parse the body of `ESC _ <body> ST`. Returns `None` for APCs that are
    /// not kitty graphics (`G` prefix).
    pub fn parse(apc: &[u8]) -> Option<Self> {
        let body = apc.strip_prefix(b"G")?;
        let body = String::from_utf8_lossy(body);
        let (control, payload) = match body.split_once(';') {
            Some((control, payload)) => (control, payload),
            None => (body.as_ref(), ""),
        };
        Some(Self {
            params: parse_params(control),
            payload: payload.to_string(),
        })
    }

    /// `m=1`: more chunks follow
    pub fn more(&self) -> bool {
        self.params.get("m").map(String::as_str) == Some("1")
    }
}

fn parse_params(control: &str) -> Params {
    control
        .split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A fully reassembled, decoded graphics command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub action: Action,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub cols: usize,
    pub rows: usize,
    pub x: u32,
    pub y: u32,
    pub z: i32,
    /// `C=1`: leave the cursor where it is after placing
    pub no_cursor_move: bool,
    pub image_id: String,
    pub number: u32,
    pub placement_id: u32,
    pub delete_mode: Option<DeleteMode>,
    pub payload: Vec<u8>,
}

impl Command {
    /// Interpret merged parameters and raw payload. Transmissions whose
    /// payload is missing or fails to decode are rejected.
    pub(crate) fn resolve(params: &Params, raw_payload: &str) -> Option<Self> {
        let get = |key: &str| params.get(key).map(String::as_str).unwrap_or("");
        let action = match Action::parse(params.get("a").map(String::as_str)) {
            Some(action) => action,
            None => {
                debug!(action = get("a"), "ignoring unsupported graphics action");
                return None;
            }
        };
        let mut command = Self {
            action,
            format: parse_format(get("f")),
            width: get("s").parse().unwrap_or(0),
            height: get("v").parse().unwrap_or(0),
            cols: get("c").parse().unwrap_or(0),
            rows: get("r").parse().unwrap_or(0),
            x: get("x").parse().unwrap_or(0),
            y: get("y").parse().unwrap_or(0),
            z: get("z").parse().unwrap_or(0),
            no_cursor_move: get("C") == "1",
            image_id: get("i").to_string(),
            number: get("I").parse().unwrap_or(0),
            placement_id: get("p").parse().unwrap_or(0),
            delete_mode: DeleteMode::parse(get("d")),
            payload: Vec::new(),
        };
        if matches!(action, Action::Place | Action::Delete) {
            return Some(command);
        }
        // Only direct (in-band) transmission is supported.
        let medium = get("t");
        if !medium.is_empty() && medium != "d" {
            debug!(medium, "ignoring graphics transmission medium");
            return None;
        }
        match decode_payload(raw_payload, get("o") == "z") {
            Ok(payload) => command.payload = payload,
            Err(e) => {
                debug!(error = %e, "dropping graphics payload");
                return None;
            }
        }
        Some(command)
    }

    /// Image key: `i=` when given, else `I:<number>`, else empty
    pub fn resolved_image_id(&self) -> String {
        if !self.image_id.is_empty() {
            self.image_id.clone()
        } else if self.number != 0 {
            format!("I:{}", self.number)
        } else {
            String::new()
        }
    }
}

fn parse_format(value: &str) -> String {
    match value {
        "24" => "rgb".to_string(),
        "32" => "rgba".to_string(),
        "100" | "" => "png".to_string(),
        other => other.to_string(),
    }
}

/// Why a graphics payload was dropped
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("empty payload")]
    Empty,

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid zlib data: {0}")]
    Zlib(#[from] std::io::Error),

    #[error("payload exceeds {max} bytes")]
    TooLarge { max: usize },
}

/// Base64 (whitespace ignored), then zlib when `compressed`
pub(crate) fn decode_payload(raw: &str, compressed: bool) -> Result<Vec<u8>, PayloadError> {
    let clean: String = raw
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | '\t' | ' '))
        .collect();
    if clean.is_empty() {
        return Err(PayloadError::Empty);
    }
    let decoded = STANDARD.decode(clean.as_bytes())?;
    if decoded.len() > MAX_PAYLOAD_BYTES {
        return Err(PayloadError::TooLarge { max: MAX_PAYLOAD_BYTES });
    }
    if !compressed {
        return Ok(decoded);
    }
    let mut inflated = Vec::new();
    let limit = MAX_PAYLOAD_BYTES as u64 + 1;
    ZlibDecoder::new(decoded.as_slice())
        .take(limit)
        .read_to_end(&mut inflated)?;
    if inflated.len() > MAX_PAYLOAD_BYTES {
        return Err(PayloadError::TooLarge { max: MAX_PAYLOAD_BYTES });
    }
    Ok(inflated)
}
