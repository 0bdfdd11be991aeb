//! Wire framings for overlay envelopes
//!
//! Two interchangeable framings are supported:
//!
//! JSON (text frames), OCPP-J style with a trailing routing header:
//! - Request:  `[2, requestId, action, payload, header]`
//! - Response: `[3, requestId, payload, header]`
//! - Error:    `[4, requestId, errorCode, errorDescription, errorDetails, header]`
//!
//! where `header = {"destination": "CSMS" | "<node>" | ["<hop>", ...],
//! "networkPath": [...], "signatures": [...], "binaryPayload": true}`.
//! Frames without a header (plain OCPP-J) are accepted with destination
//! `CSMS` and an empty path. Binary payloads are base64 encoded.
//!
//! Binary (binary frames):
//!
//! ```text
//! magic "OO" | version u8 | type u8 | requestId str16 | destination | path
//! | signatures cbor32 | (action str16 | code str16, description str32, details cbor32)
//! | payload kind u8 + len u32 + bytes
//! ```
//!
//! JSON payloads inside binary frames are CBOR encoded, so either framing can
//! carry either payload kind and re-framing never changes the payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{
    Action, ErrorCode, OverlayMessage, Payload, PayloadKind, Request, RequestError, RequestId,
    Response, Signature,
};
use crate::path::{NetworkPath, NodeId};
use crate::routing::Destination;

const MAGIC: [u8; 2] = [0x4F, 0x4F];
const VERSION: u8 = 1;

const DEST_CSMS: u8 = 0;
const DEST_NODE: u8 = 1;
const DEST_ROUTE: u8 = 2;

const PAYLOAD_JSON: u8 = 0;
const PAYLOAD_BINARY: u8 = 1;

/// Message type identifiers, shared by both framings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    fn from_id(id: i64) -> Result<Self, CodecError> {
        match id {
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::CallResult),
            4 => Ok(MessageType::CallError),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Framing negotiated with a neighbour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Binary,
}

impl std::str::FromStr for WireFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "binary" => Ok(WireFormat::Binary),
            other => Err(CodecError::InvalidFormat(format!("unknown wire format {}", other))),
        }
    }
}

/// One transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Framing implied by the frame type
    pub fn format(&self) -> WireFormat {
        match self {
            Frame::Text(_) => WireFormat::Json,
            Frame::Binary(_) => WireFormat::Binary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors while encoding or decoding frames
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR error: {0}")]
    Cbor(String),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("Frame truncated")]
    Truncated,

    #[error("Bad magic bytes")]
    BadMagic,

    #[error("Unsupported binary framing version {0}")]
    UnsupportedVersion(u8),
}

impl From<serde_cbor::Error> for CodecError {
    fn from(e: serde_cbor::Error) -> Self {
        CodecError::Cbor(e.to_string())
    }
}

/// Encode a message with the given framing
pub fn encode(message: &OverlayMessage, format: WireFormat) -> Result<Frame, CodecError> {
    match format {
        WireFormat::Json => encode_json(message).map(Frame::Text),
        WireFormat::Binary => encode_binary(message).map(Frame::Binary),
    }
}

/// Decode a frame; the framing is detected from the frame type
pub fn decode(frame: &Frame) -> Result<OverlayMessage, CodecError> {
    match frame {
        Frame::Text(text) => decode_json(text.as_bytes()),
        Frame::Binary(bytes) => decode_binary(bytes),
    }
}

/// Best-effort extraction of a request id from a frame that failed to decode.
///
/// Only request frames yield an id, since only requests are answered.
pub fn peek_request_id(frame: &Frame) -> Option<RequestId> {
    match frame {
        Frame::Text(text) => {
            let array: Vec<Value> = serde_json::from_str(text).ok()?;
            if array.first()?.as_i64()? != MessageType::Call as i64 {
                return None;
            }
            array.get(1)?.as_str().map(RequestId::from)
        }
        Frame::Binary(bytes) => {
            let mut reader = Reader::new(bytes);
            if reader.take(2).ok()? != MAGIC || reader.u8().ok()? != VERSION {
                return None;
            }
            if reader.u8().ok()? != MessageType::Call as u8 {
                return None;
            }
            reader.str16().ok().map(RequestId::new)
        }
    }
}

// ============================================================================
// JSON framing
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireDestination {
    Node(NodeId),
    Route(NetworkPath),
}

impl From<&Destination> for WireDestination {
    fn from(destination: &Destination) -> Self {
        match destination {
            Destination::Node(node) => WireDestination::Node(node.clone()),
            Destination::Csms => WireDestination::Node(NodeId::csms()),
            Destination::SourceRoute(route) => WireDestination::Route(route.clone()),
        }
    }
}

impl From<WireDestination> for Destination {
    fn from(destination: WireDestination) -> Self {
        match destination {
            WireDestination::Node(node) => Destination::to(node),
            WireDestination::Route(route) => Destination::SourceRoute(route),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutingHeader {
    destination: WireDestination,
    #[serde(default, skip_serializing_if = "NetworkPath::is_empty")]
    network_path: NetworkPath,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    signatures: Vec<Signature>,
    #[serde(default, skip_serializing_if = "is_false")]
    binary_payload: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl RoutingHeader {
    fn new(
        destination: &Destination,
        network_path: &NetworkPath,
        signatures: &[Signature],
        payload: Option<&Payload>,
    ) -> Self {
        Self {
            destination: destination.into(),
            network_path: network_path.clone(),
            signatures: signatures.to_vec(),
            binary_payload: matches!(payload, Some(Payload::Binary(_))),
        }
    }

    fn plain() -> Self {
        Self {
            destination: WireDestination::Node(NodeId::csms()),
            network_path: NetworkPath::empty(),
            signatures: Vec::new(),
            binary_payload: false,
        }
    }
}

fn payload_to_json(payload: &Payload) -> Value {
    match payload {
        Payload::Json(value) => value.clone(),
        Payload::Binary(bytes) => Value::String(BASE64.encode(bytes)),
    }
}

fn payload_from_json(value: &Value, binary: bool) -> Result<Payload, CodecError> {
    if !binary {
        return Ok(Payload::Json(value.clone()));
    }
    let encoded = value
        .as_str()
        .ok_or_else(|| CodecError::InvalidFormat("binary payload is not a string".into()))?;
    Ok(Payload::Binary(Bytes::from(BASE64.decode(encoded)?)))
}

fn encode_json(message: &OverlayMessage) -> Result<String, CodecError> {
    let array = match message {
        OverlayMessage::Request(r) => serde_json::json!([
            MessageType::Call as i32,
            r.request_id,
            r.action,
            payload_to_json(&r.payload),
            RoutingHeader::new(&r.destination, &r.network_path, &r.signatures, Some(&r.payload)),
        ]),
        OverlayMessage::Response(r) => serde_json::json!([
            MessageType::CallResult as i32,
            r.request_id,
            payload_to_json(&r.payload),
            RoutingHeader::new(&r.destination, &r.network_path, &r.signatures, Some(&r.payload)),
        ]),
        OverlayMessage::Error(e) => serde_json::json!([
            MessageType::CallError as i32,
            e.request_id,
            e.error_code.to_string(),
            e.error_description,
            e.error_details,
            RoutingHeader::new(&e.destination, &e.network_path, &[], None),
        ]),
    };
    Ok(serde_json::to_string(&array)?)
}

fn str_at<'a>(array: &'a [Value], index: usize, field: &str) -> Result<&'a str, CodecError> {
    array
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::InvalidFormat(format!("{} is not a string", field)))
}

fn header_at(array: &[Value], index: usize) -> Result<RoutingHeader, CodecError> {
    match array.get(index) {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(RoutingHeader::plain()),
    }
}

fn decode_json(bytes: &[u8]) -> Result<OverlayMessage, CodecError> {
    let array: Vec<Value> = serde_json::from_slice(bytes)?;

    let msg_type = array
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| CodecError::InvalidFormat("missing message type".into()))?;

    match MessageType::from_id(msg_type)? {
        MessageType::Call => {
            if array.len() != 4 && array.len() != 5 {
                return Err(CodecError::InvalidFormat(format!(
                    "request frame has {} elements",
                    array.len()
                )));
            }
            let request_id = RequestId::from(str_at(&array, 1, "requestId")?);
            let action = Action::from(str_at(&array, 2, "action")?);
            let header = header_at(&array, 4)?;
            let payload = payload_from_json(&array[3], header.binary_payload)?;

            Ok(OverlayMessage::Request(Request {
                request_id,
                action,
                destination: header.destination.into(),
                network_path: header.network_path,
                payload,
                signatures: header.signatures,
            }))
        }
        MessageType::CallResult => {
            if array.len() != 3 && array.len() != 4 {
                return Err(CodecError::InvalidFormat(format!(
                    "response frame has {} elements",
                    array.len()
                )));
            }
            let request_id = RequestId::from(str_at(&array, 1, "requestId")?);
            let header = header_at(&array, 3)?;
            let payload = payload_from_json(&array[2], header.binary_payload)?;

            Ok(OverlayMessage::Response(Response {
                request_id,
                destination: header.destination.into(),
                network_path: header.network_path,
                payload,
                signatures: header.signatures,
            }))
        }
        MessageType::CallError => {
            if array.len() != 5 && array.len() != 6 {
                return Err(CodecError::InvalidFormat(format!(
                    "error frame has {} elements",
                    array.len()
                )));
            }
            let request_id = RequestId::from(str_at(&array, 1, "requestId")?);
            let error_code = str_at(&array, 2, "errorCode")?
                .parse()
                .unwrap_or(ErrorCode::GenericError);
            let error_description = array[3].as_str().unwrap_or("").to_string();
            let header = header_at(&array, 5)?;

            Ok(OverlayMessage::Error(RequestError {
                request_id,
                destination: header.destination.into(),
                network_path: header.network_path,
                error_code,
                error_description,
                error_details: array[4].clone(),
            }))
        }
    }
}

// ============================================================================
// Binary framing
// ============================================================================

fn put_str16(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len())
        .map_err(|_| CodecError::InvalidFormat(format!("field too long ({} bytes)", s.len())))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn put_blob32(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| CodecError::InvalidFormat(format!("blob too long ({} bytes)", bytes.len())))?;
    buf.put_u32(len);
    buf.put_slice(bytes);
    Ok(())
}

fn put_path(buf: &mut BytesMut, path: &NetworkPath) -> Result<(), CodecError> {
    let count = u16::try_from(path.len())
        .map_err(|_| CodecError::InvalidFormat("path too long".into()))?;
    buf.put_u16(count);
    for hop in path.iter() {
        put_str16(buf, hop.as_str())?;
    }
    Ok(())
}

fn put_destination(buf: &mut BytesMut, destination: &Destination) -> Result<(), CodecError> {
    match destination {
        Destination::Csms => buf.put_u8(DEST_CSMS),
        Destination::Node(node) => {
            buf.put_u8(DEST_NODE);
            put_str16(buf, node.as_str())?;
        }
        Destination::SourceRoute(route) => {
            buf.put_u8(DEST_ROUTE);
            put_path(buf, route)?;
        }
    }
    Ok(())
}

fn put_signatures(buf: &mut BytesMut, signatures: &[Signature]) -> Result<(), CodecError> {
    if signatures.is_empty() {
        buf.put_u32(0);
        return Ok(());
    }
    put_blob32(buf, &serde_cbor::to_vec(&signatures)?)
}

fn put_payload(buf: &mut BytesMut, payload: &Payload) -> Result<(), CodecError> {
    let (kind, bytes) = match payload {
        Payload::Json(_) => {
            let transcoded = payload
                .transcode(PayloadKind::Binary)
                .map_err(|e| CodecError::Cbor(e.to_string()))?;
            let bytes = transcoded
                .as_bytes()
                .cloned()
                .ok_or_else(|| CodecError::Cbor("JSON payload did not transcode".into()))?;
            (PAYLOAD_JSON, bytes)
        }
        Payload::Binary(bytes) => (PAYLOAD_BINARY, bytes.clone()),
    };
    buf.put_u8(kind);
    put_blob32(buf, &bytes)
}

fn encode_binary(message: &OverlayMessage) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);

    match message {
        OverlayMessage::Request(r) => {
            buf.put_u8(MessageType::Call as u8);
            put_str16(&mut buf, r.request_id.as_str())?;
            put_destination(&mut buf, &r.destination)?;
            put_path(&mut buf, &r.network_path)?;
            put_signatures(&mut buf, &r.signatures)?;
            put_str16(&mut buf, r.action.as_str())?;
            put_payload(&mut buf, &r.payload)?;
        }
        OverlayMessage::Response(r) => {
            buf.put_u8(MessageType::CallResult as u8);
            put_str16(&mut buf, r.request_id.as_str())?;
            put_destination(&mut buf, &r.destination)?;
            put_path(&mut buf, &r.network_path)?;
            put_signatures(&mut buf, &r.signatures)?;
            put_payload(&mut buf, &r.payload)?;
        }
        OverlayMessage::Error(e) => {
            buf.put_u8(MessageType::CallError as u8);
            put_str16(&mut buf, e.request_id.as_str())?;
            put_destination(&mut buf, &e.destination)?;
            put_path(&mut buf, &e.network_path)?;
            put_signatures(&mut buf, &[])?;
            put_str16(&mut buf, &e.error_code.to_string())?;
            put_blob32(&mut buf, e.error_description.as_bytes())?;
            put_blob32(&mut buf, &serde_cbor::to_vec(&e.error_details)?)?;
        }
    }

    Ok(buf.freeze())
}

/// Bounds-checked cursor over a binary frame
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            Err(CodecError::Truncated)
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn str16(&mut self) -> Result<String, CodecError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::InvalidFormat("string is not UTF-8".into()))
    }

    fn blob32(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn path(&mut self) -> Result<NetworkPath, CodecError> {
        let count = self.u16()?;
        (0..count)
            .map(|_| self.str16().map(NodeId::new))
            .collect::<Result<Vec<_>, _>>()
            .map(NetworkPath::from)
    }

    fn destination(&mut self) -> Result<Destination, CodecError> {
        match self.u8()? {
            DEST_CSMS => Ok(Destination::Csms),
            DEST_NODE => Ok(Destination::to(self.str16()?)),
            DEST_ROUTE => Ok(Destination::SourceRoute(self.path()?)),
            other => Err(CodecError::InvalidFormat(format!("destination tag {}", other))),
        }
    }

    fn signatures(&mut self) -> Result<Vec<Signature>, CodecError> {
        let blob = self.blob32()?;
        if blob.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_cbor::from_slice(blob)?)
    }

    fn payload(&mut self) -> Result<Payload, CodecError> {
        let kind = self.u8()?;
        let bytes = Bytes::copy_from_slice(self.blob32()?);
        match kind {
            PAYLOAD_JSON => Payload::Binary(bytes)
                .transcode(PayloadKind::Json)
                .map_err(|e| CodecError::Cbor(e.to_string())),
            PAYLOAD_BINARY => Ok(Payload::Binary(bytes)),
            other => Err(CodecError::InvalidFormat(format!("payload kind {}", other))),
        }
    }

    fn finish(&self) -> Result<(), CodecError> {
        if self.buf.has_remaining() {
            Err(CodecError::InvalidFormat(format!(
                "{} trailing bytes",
                self.buf.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

fn decode_binary(bytes: &[u8]) -> Result<OverlayMessage, CodecError> {
    let mut reader = Reader::new(bytes);

    if reader.take(2)? != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = reader.u8()?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let msg_type = MessageType::from_id(reader.u8()? as i64)?;
    let request_id = RequestId::new(reader.str16()?);
    let destination = reader.destination()?;
    let network_path = reader.path()?;
    let signatures = reader.signatures()?;

    let message = match msg_type {
        MessageType::Call => {
            let action = Action::from(reader.str16()?.as_str());
            let payload = reader.payload()?;
            OverlayMessage::Request(Request {
                request_id,
                action,
                destination,
                network_path,
                payload,
                signatures,
            })
        }
        MessageType::CallResult => {
            let payload = reader.payload()?;
            OverlayMessage::Response(Response {
                request_id,
                destination,
                network_path,
                payload,
                signatures,
            })
        }
        MessageType::CallError => {
            let error_code = reader.str16()?.parse().unwrap_or(ErrorCode::GenericError);
            let error_description = String::from_utf8_lossy(reader.blob32()?).into_owned();
            let error_details: Value = serde_cbor::from_slice(reader.blob32()?)?;
            OverlayMessage::Error(RequestError {
                request_id,
                destination,
                network_path,
                error_code,
                error_description,
                error_details,
            })
        }
    };

    reader.finish()?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn boot_request() -> Request {
        let mut request = Request::new(
            Action::BootNotification,
            Payload::Json(json!({
                "chargingStation": {"model": "EK3", "vendorName": "Elektrokombinacija"},
                "reason": "PowerUp"
            })),
            Destination::Csms,
        );
        request.network_path = NetworkPath::from(["cs1", "lc"]);
        request
    }

    #[test]
    fn test_json_request_layout() {
        let request = boot_request();
        let frame = encode(&OverlayMessage::Request(request.clone()), WireFormat::Json).unwrap();

        let text = match &frame {
            Frame::Text(text) => text,
            Frame::Binary(_) => panic!("Expected text frame"),
        };
        assert!(text.starts_with("[2,"));
        assert!(text.contains("\"BootNotification\""));
        assert!(text.contains(r#""destination":"CSMS""#));
        assert!(text.contains(r#""networkPath":["cs1","lc"]"#));
    }

    #[test]
    fn test_plain_ocpp_frames_parse() {
        let msg = decode(&Frame::Text(r#"[2, "msg-123", "Heartbeat", {}]"#.into())).unwrap();
        match msg {
            OverlayMessage::Request(r) => {
                assert_eq!(r.request_id.as_str(), "msg-123");
                assert_eq!(r.action, Action::Heartbeat);
                assert_eq!(r.destination, Destination::Csms);
                assert!(r.network_path.is_empty());
            }
            _ => panic!("Expected Request"),
        }

        let msg = decode(&Frame::Text(
            r#"[4, "msg-123", "NotImplemented", "Action not supported", {}]"#.into(),
        ))
        .unwrap();
        match msg {
            OverlayMessage::Error(e) => assert_eq!(e.error_code, ErrorCode::NotImplemented),
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_binary_frame_preserves_request() {
        let mut request = boot_request();
        request.signatures.push(Signature::new("key-1", "c2lnbmF0dXJl"));
        let message = OverlayMessage::Request(request);

        let frame = encode(&message, WireFormat::Binary).unwrap();
        assert_eq!(frame.format(), WireFormat::Binary);
        assert_eq!(decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_binary_payload_in_json_frame() {
        let mut request = Request::new(
            Action::BinaryDataTransfer,
            Payload::binary(vec![0u8, 1, 2, 254, 255]),
            Destination::to("csms1"),
        );
        request.network_path = NetworkPath::from(["cs1"]);
        let message = OverlayMessage::Request(request);

        let frame = encode(&message, WireFormat::Json).unwrap();
        assert_eq!(decode(&frame).unwrap(), message);
    }

    #[test]
    fn test_error_and_source_route_reframed() {
        let mut request = boot_request();
        request.destination = Destination::source_route(["gw", "lc", "cs1"]);
        let error = RequestError::for_request(&request, ErrorCode::SecurityError, "Not allowed")
            .with_details(json!({"reason": "energy meter"}));

        for message in [OverlayMessage::Request(request), OverlayMessage::Error(error)] {
            let via_binary = decode(&encode(&message, WireFormat::Binary).unwrap()).unwrap();
            let via_json = decode(&encode(&via_binary, WireFormat::Json).unwrap()).unwrap();
            assert_eq!(via_json, message);
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert!(decode(&Frame::Text("not json".into())).is_err());
        assert!(matches!(
            decode(&Frame::Text(r#"[9, "x", {}]"#.into())),
            Err(CodecError::UnknownMessageType(9))
        ));
        assert!(matches!(
            decode(&Frame::Binary(Bytes::from_static(b"XX\x01"))),
            Err(CodecError::BadMagic)
        ));

        let frame = encode(&OverlayMessage::Request(boot_request()), WireFormat::Binary).unwrap();
        if let Frame::Binary(bytes) = frame {
            let cut = Frame::Binary(bytes.slice(..bytes.len() - 3));
            assert!(matches!(decode(&cut), Err(CodecError::Truncated)));
        }
    }

    #[test]
    fn test_peek_request_id() {
        let bad = Frame::Text(r#"[2, "req-7", "Authorize"]"#.into());
        assert!(decode(&bad).is_err());
        assert_eq!(peek_request_id(&bad), Some(RequestId::from("req-7")));

        let response = Frame::Text(r#"[3, "req-7"]"#.into());
        assert_eq!(peek_request_id(&response), None);
    }
}
