//! Control and stream message definitions

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{GraphicsEvent, GraphicsSnapshot, ModeSnapshot, MouseEncoding};
use crate::PROTOCOL_VERSION;

/// Control methods understood by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Ping,
    Create,
    Send,
    Resize,
    Stop,
    Backlog,
    Snapshot,
    Bootstrap,
    Ack,
    List,
    Info,
    Shutdown,
    SetOwner,
    GetOwner,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Create => "create",
            Self::Send => "send",
            Self::Resize => "resize",
            Self::Stop => "stop",
            Self::Backlog => "backlog",
            Self::Snapshot => "snapshot",
            Self::Bootstrap => "bootstrap",
            Self::Ack => "ack",
            Self::List => "list",
            Self::Info => "info",
            Self::Shutdown => "shutdown",
            Self::SetOwner => "set_owner",
            Self::GetOwner => "get_owner",
        }
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ping" => Self::Ping,
            "create" => Self::Create,
            "send" => Self::Send,
            "resize" => Self::Resize,
            "stop" => Self::Stop,
            "backlog" => Self::Backlog,
            "snapshot" => Self::Snapshot,
            "bootstrap" => Self::Bootstrap,
            "ack" => Self::Ack,
            "list" => Self::List,
            "info" => Self::Info,
            "shutdown" => Self::Shutdown,
            "set_owner" => Self::SetOwner,
            "get_owner" => Self::GetOwner,
            other => return Err(other.to_string()),
        })
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Control Envelope ====================

/// A control request line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    #[serde(default)]
    pub protocol_version: u32,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl ControlRequest {
    /// Build a request at the current protocol version
    pub fn new(method: Method, params: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            protocol_version: PROTOCOL_VERSION,
            method: method.as_str().to_string(),
            params: serde_json::to_value(params)?,
        })
    }

    /// Build a request without params
    pub fn bare(method: Method) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method: method.as_str().to_string(),
            params: Value::Null,
        }
    }

    /// Decode params into a typed request; absent params decode as `{}`
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.params {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            other => T::deserialize(other),
        }
    }
}

/// A control response line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            result: None,
            error: None,
        }
    }

    /// Successful response carrying a serialized result
    pub fn with_result(result: &impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::error(e.to_string()),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(msg.into()),
        }
    }

    /// Error text, defaulting when the daemon sent none
    pub fn error_message(&self) -> String {
        match self.error.as_deref() {
            Some(msg) if !msg.is_empty() => msg.to_string(),
            _ => "sessiond request failed".to_string(),
        }
    }

    /// Decode the result payload; a missing result decodes as `{}`
    pub fn result<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.result {
            None | Some(Value::Null) => serde_json::from_value(Value::Object(Default::default())),
            Some(value) => T::deserialize(value),
        }
    }
}

// ==================== Request Params ====================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub cwd: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub session_id: String,
    pub existing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub cols: u16,
    #[serde(default)]
    pub rows: u16,
}

/// Params for methods that only name a session (stop, snapshot, bootstrap)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub since: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub executable: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerResponse {
    pub session_id: String,
    pub owner: String,
}

// ==================== Results ====================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub cwd: String,
    pub started_at: String,
    pub last_active: String,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub executable: String,
    pub binary_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogResponse {
    pub session_id: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub next_offset: u64,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub session_id: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitty: Option<GraphicsSnapshot>,
    #[serde(default)]
    pub alt_screen: bool,
    #[serde(default)]
    pub mouse_mask: u8,
    #[serde(default)]
    pub mouse: bool,
    #[serde(default, rename = "mouseSGR")]
    pub mouse_sgr: bool,
    #[serde(default)]
    pub mouse_encoding: MouseEncoding,
    #[serde(default)]
    pub safe_to_replay: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub session_id: String,
    #[serde(default)]
    pub snapshot: String,
    #[serde(default)]
    pub snapshot_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitty: Option<GraphicsSnapshot>,
    #[serde(default)]
    pub alt_screen: bool,
    #[serde(default)]
    pub mouse_mask: u8,
    #[serde(default)]
    pub mouse: bool,
    #[serde(default, rename = "mouseSGR")]
    pub mouse_sgr: bool,
    #[serde(default)]
    pub mouse_encoding: MouseEncoding,
    #[serde(default)]
    pub safe_to_replay: bool,
    #[serde(default)]
    pub initial_credit: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backlog: String,
    #[serde(default)]
    pub next_offset: u64,
    #[serde(default)]
    pub backlog_truncated: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backlog_source: String,
}

impl BootstrapResponse {
    /// Bytes a client should replay: the snapshot, else the backlog
    pub fn replay_text(&self) -> &str {
        if self.snapshot.is_empty() {
            &self.backlog
        } else {
            &self.snapshot
        }
    }
}

// ==================== Attach / Stream ====================

/// First (and only) line a client sends on a stream connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequest {
    #[serde(default)]
    pub protocol_version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream_id: String,
    #[serde(default)]
    pub since: i64,
    #[serde(default)]
    pub with_buffer: bool,
}

impl AttachRequest {
    pub const KIND: &'static str = "attach";

    pub fn new(session_id: &str, stream_id: &str, since: i64, with_buffer: bool) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            kind: Self::KIND.to_string(),
            session_id: session_id.to_string(),
            stream_id: stream_id.to_string(),
            since,
            with_buffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMessageType {
    Bootstrap,
    Data,
    BootstrapDone,
    Kitty,
    Modes,
    Closed,
    Error,
}

/// One line of an attach stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: StreamMessageType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stream_id: String,
    #[serde(default, rename = "dataB64", skip_serializing_if = "String::is_empty")]
    pub data_b64: String,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub len: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kitty: Option<GraphicsEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<ModeSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<Box<BootstrapResponse>>,
}

impl StreamMessage {
    fn base(kind: StreamMessageType, session_id: &str, stream_id: &str) -> Self {
        Self {
            kind,
            session_id: session_id.to_string(),
            stream_id: stream_id.to_string(),
            data_b64: String::new(),
            len: 0,
            source: String::new(),
            error: String::new(),
            kitty: None,
            modes: None,
            bootstrap: None,
        }
    }

    pub fn bootstrap(session_id: &str, stream_id: &str, bootstrap: BootstrapResponse) -> Self {
        let mut msg = Self::base(StreamMessageType::Bootstrap, session_id, stream_id);
        msg.bootstrap = Some(Box::new(bootstrap));
        msg
    }

    /// A data chunk; `source` is `bootstrap` for replay chunks and empty for live output
    pub fn data(session_id: &str, stream_id: &str, data: &[u8], source: &str) -> Self {
        let mut msg = Self::base(StreamMessageType::Data, session_id, stream_id);
        msg.data_b64 = STANDARD.encode(data);
        msg.len = data.len();
        msg.source = source.to_string();
        msg
    }

    pub fn bootstrap_done(session_id: &str, stream_id: &str) -> Self {
        Self::base(StreamMessageType::BootstrapDone, session_id, stream_id)
    }

    pub fn kitty(session_id: &str, stream_id: &str, event: GraphicsEvent) -> Self {
        let mut msg = Self::base(StreamMessageType::Kitty, session_id, stream_id);
        msg.kitty = Some(event);
        msg
    }

    pub fn modes(session_id: &str, stream_id: &str, modes: ModeSnapshot) -> Self {
        let mut msg = Self::base(StreamMessageType::Modes, session_id, stream_id);
        msg.modes = Some(modes);
        msg
    }

    pub fn closed(session_id: &str, stream_id: &str) -> Self {
        Self::base(StreamMessageType::Closed, session_id, stream_id)
    }

    pub fn error(session_id: &str, stream_id: &str, error: impl Into<String>) -> Self {
        let mut msg = Self::base(StreamMessageType::Error, session_id, stream_id);
        msg.error = error.into();
        msg
    }

    /// Decode the base64 payload of a data message
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        if self.data_b64.is_empty() {
            return Ok(Vec::new());
        }
        STANDARD.decode(self.data_b64.as_bytes())
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}
