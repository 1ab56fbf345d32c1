//! Newline-delimited JSON framing

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{AttachRequest, ControlRequest, ControlResponse, StreamMessage};

/// Maximum line size (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// A decoded line on the daemon side
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `{"type":"attach",...}` turns the connection into a stream
    Attach(AttachRequest),
    /// `{"protocolVersion":..,"method":..}`
    Control(ControlRequest),
    /// A line that was not valid JSON for either shape; carries the parse error
    Malformed(String),
}

/// Codec used by the daemon: decodes [`InboundFrame`]s, encodes responses
/// and stream messages.
///
/// Malformed lines are surfaced as [`InboundFrame::Malformed`] rather than
/// errors so the connection survives a bad request.
#[derive(Debug, Default)]
pub struct ServerCodec {
    next_index: usize,
}

impl ServerCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ServerCodec {
    type Item = InboundFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = next_line(src, &mut self.next_index)? {
            if let Some(frame) = parse_inbound(&line) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        Ok(parse_inbound(&rest))
    }
}

impl Encoder<ControlResponse> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ControlResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_line(&item, dst)
    }
}

impl Encoder<StreamMessage> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: StreamMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_line(&item, dst)
    }
}

/// Codec used by clients: encodes requests and decodes `D`
/// ([`ControlResponse`] on control connections, [`StreamMessage`] on attach).
#[derive(Debug)]
pub struct ClientCodec<D> {
    next_index: usize,
    _marker: PhantomData<fn() -> D>,
}

impl<D> ClientCodec<D> {
    pub fn new() -> Self {
        Self {
            next_index: 0,
            _marker: PhantomData,
        }
    }
}

impl<D> Default for ClientCodec<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned> Decoder for ClientCodec<D> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(line) = next_line(src, &mut self.next_index)? {
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_slice(trimmed)?));
        }
        Ok(None)
    }
}

impl<D> Encoder<ControlRequest> for ClientCodec<D> {
    type Error = CodecError;

    fn encode(&mut self, item: ControlRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_line(&item, dst)
    }
}

impl<D> Encoder<AttachRequest> for ClientCodec<D> {
    type Error = CodecError;

    fn encode(&mut self, item: AttachRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_line(&item, dst)
    }
}

/// Split off the next `\n`-terminated line (without the newline).
///
/// `next_index` remembers how far the buffer was already scanned so a long
/// partial line is not rescanned on every read.
fn next_line(src: &mut BytesMut, next_index: &mut usize) -> Result<Option<BytesMut>, CodecError> {
    let start = (*next_index).min(src.len());
    match src[start..].iter().position(|b| *b == b'\n') {
        Some(offset) => {
            let end = start + offset;
            *next_index = 0;
            if end > MAX_MESSAGE_SIZE {
                return Err(CodecError::MessageTooLarge {
                    size: end,
                    max: MAX_MESSAGE_SIZE,
                });
            }
            let mut line = src.split_to(end + 1);
            line.truncate(end);
            Ok(Some(line))
        }
        None => {
            if src.len() > MAX_MESSAGE_SIZE {
                return Err(CodecError::MessageTooLarge {
                    size: src.len(),
                    max: MAX_MESSAGE_SIZE,
                });
            }
            *next_index = src.len();
            Ok(None)
        }
    }
}

fn parse_inbound(line: &[u8]) -> Option<InboundFrame> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    let value: serde_json::Value = match serde_json::from_slice(trimmed) {
        Ok(value) => value,
        Err(e) => return Some(InboundFrame::Malformed(e.to_string())),
    };
    let is_attach = value.get("type").and_then(|t| t.as_str()) == Some(AttachRequest::KIND);
    let frame = if is_attach {
        serde_json::from_value(value).map(InboundFrame::Attach)
    } else {
        serde_json::from_value(value).map(InboundFrame::Control)
    };
    Some(frame.unwrap_or_else(|e| InboundFrame::Malformed(e.to_string())))
}

fn encode_line<T: Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = serde_json::to_vec(item)?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    dst.reserve(data.len() + 1);
    dst.put_slice(&data);
    dst.put_u8(b'\n');
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CreateRequest, Method, StreamMessageType};

    #[test]
    fn test_control_request_roundtrip() {
        let mut client = ClientCodec::<ControlResponse>::new();
        let mut server = ServerCodec::new();

        let req = ControlRequest::new(
            Method::Create,
            &CreateRequest {
                session_id: "ws".into(),
                cwd: "/tmp".into(),
            },
        )
        .unwrap();

        let mut buf = BytesMut::new();
        client.encode(req.clone(), &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, InboundFrame::Control(req));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_attach_is_detected_by_type() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(
            &br#"{"protocolVersion":2,"type":"attach","sessionId":"s","withBuffer":true}
"#[..],
        );
        match server.decode(&mut buf).unwrap() {
            Some(InboundFrame::Attach(req)) => {
                assert_eq!(req.session_id, "s");
                assert!(req.with_buffer);
                assert_eq!(req.since, 0);
            }
            other => panic!("expected attach, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(&br#"{"protocolVersion":2,"me"#[..]);
        assert!(server.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"thod\":\"ping\"}\n");
        match server.decode(&mut buf).unwrap() {
            Some(InboundFrame::Control(req)) => assert_eq!(req.method, "ping"),
            other => panic!("expected control, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_line_does_not_error() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(&b"{not json\n{\"method\":\"ping\",\"protocolVersion\":2}\n"[..]);
        assert!(matches!(
            server.decode(&mut buf).unwrap(),
            Some(InboundFrame::Malformed(_))
        ));
        assert!(matches!(
            server.decode(&mut buf).unwrap(),
            Some(InboundFrame::Control(_))
        ));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(&b"\r\n  \n{\"method\":\"list\"}\n"[..]);
        match server.decode(&mut buf).unwrap() {
            Some(InboundFrame::Control(req)) => {
                assert_eq!(req.method, "list");
                assert_eq!(req.protocol_version, 0);
            }
            other => panic!("expected control, got {:?}", other),
        }
    }

    #[test]
    fn test_final_line_without_newline_at_eof() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(&br#"{"protocolVersion":2,"method":"ping"}"#[..]);
        assert!(server.decode(&mut buf).unwrap().is_none());
        assert!(matches!(
            server.decode_eof(&mut buf).unwrap(),
            Some(InboundFrame::Control(_))
        ));
    }

    #[test]
    fn test_stream_message_roundtrip() {
        let mut server = ServerCodec::new();
        let mut client = ClientCodec::<StreamMessage>::new();
        let mut buf = BytesMut::new();
        server
            .encode(StreamMessage::data("s", "st", b"abc", ""), &mut buf)
            .unwrap();
        server
            .encode(StreamMessage::closed("s", "st"), &mut buf)
            .unwrap();

        let first = client.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind, StreamMessageType::Data);
        assert_eq!(first.decode_data().unwrap(), b"abc");
        let second = client.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, StreamMessageType::Closed);
    }

    #[test]
    fn test_message_too_large() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::with_capacity(MAX_MESSAGE_SIZE + 2);
        buf.resize(MAX_MESSAGE_SIZE + 1, b'a');
        let result = server.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::MessageTooLarge { .. })));
    }
}
