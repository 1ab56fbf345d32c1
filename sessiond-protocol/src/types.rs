//! Shared data types carried inside control responses and stream messages

use serde::{Deserialize, Serialize};

/// A transmitted graphics image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub number: u32,
    pub format: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
}

/// An image placed on the cell grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: u32,
    pub image_id: String,
    pub row: usize,
    pub col: usize,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub cols: usize,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    #[serde(default)]
    pub z: i32,
}

/// What a delete event removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicsDelete {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub placement_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsEventKind {
    Image,
    Placement,
    Delete,
}

/// A graphics state change broadcast to attached clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicsEvent {
    pub kind: GraphicsEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<GraphicsDelete>,
}

impl GraphicsEvent {
    pub fn image(image: Image) -> Self {
        Self {
            kind: GraphicsEventKind::Image,
            image: Some(image),
            placement: None,
            delete: None,
        }
    }

    pub fn placement(placement: Placement) -> Self {
        Self {
            kind: GraphicsEventKind::Placement,
            image: None,
            placement: Some(placement),
            delete: None,
        }
    }

    pub fn delete(delete: GraphicsDelete) -> Self {
        Self {
            kind: GraphicsEventKind::Delete,
            image: None,
            placement: None,
            delete: Some(delete),
        }
    }
}

/// Full graphics state, used for persistence and attach bootstraps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicsSnapshot {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub placements: Vec<Placement>,
}

impl GraphicsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.placements.is_empty()
    }
}

/// Mouse report encoding requested by the child process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseEncoding {
    #[default]
    X10,
    Utf8,
    Sgr,
    Urxvt,
}

impl std::fmt::Display for MouseEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X10 => write!(f, "x10"),
            Self::Utf8 => write!(f, "utf8"),
            Self::Sgr => write!(f, "sgr"),
            Self::Urxvt => write!(f, "urxvt"),
        }
    }
}

/// Terminal modes tracked from the child's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeSnapshot {
    #[serde(default)]
    pub alt_screen: bool,
    #[serde(default)]
    pub mouse_mask: u8,
    #[serde(default, rename = "mouseSGR")]
    pub mouse_sgr: bool,
    #[serde(default, rename = "mouseUTF8")]
    pub mouse_utf8: bool,
    #[serde(default, rename = "mouseURXVT")]
    pub mouse_urxvt: bool,
    #[serde(default)]
    pub tui_mode: bool,
}

impl ModeSnapshot {
    pub fn mouse(&self) -> bool {
        self.mouse_mask != 0
    }

    /// Encoding priority: sgr, then urxvt, then utf8, else x10
    pub fn mouse_encoding(&self) -> MouseEncoding {
        if self.mouse_sgr {
            MouseEncoding::Sgr
        } else if self.mouse_urxvt {
            MouseEncoding::Urxvt
        } else if self.mouse_utf8 {
            MouseEncoding::Utf8
        } else {
            MouseEncoding::X10
        }
    }
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
