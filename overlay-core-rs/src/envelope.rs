//! Overlay message envelopes
//!
//! Every message crossing the overlay is one of three envelopes:
//! - `Request`: an OCPP action travelling towards its destination
//! - `Response`: the answer, travelling back along the request's path
//! - `RequestError`: an error answer produced by the addressee or by any
//!   node that refused to forward the request
//!
//! Envelopes carry the path travelled so far. The sender appends its own id
//! before transmission, so a received path never includes the receiver.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::OverlayError;
use crate::path::{NetworkPath, NodeId};
use crate::routing::Destination;

/// Correlation key linking a request to its answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// OCPP action names.
///
/// Intermediaries forward actions they do not know, so unknown names are
/// kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    // CS -> CSMS
    BootNotification,
    Heartbeat,
    StatusNotification,
    MeterValues,
    Authorize,
    TransactionEvent,

    // CSMS -> CS
    Reset,
    GetVariables,
    SetVariables,
    SetChargingProfile,
    RequestStartTransaction,
    RequestStopTransaction,

    // Bidirectional
    DataTransfer,
    BinaryDataTransfer,

    Other(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::BootNotification => "BootNotification",
            Action::Heartbeat => "Heartbeat",
            Action::StatusNotification => "StatusNotification",
            Action::MeterValues => "MeterValues",
            Action::Authorize => "Authorize",
            Action::TransactionEvent => "TransactionEvent",
            Action::Reset => "Reset",
            Action::GetVariables => "GetVariables",
            Action::SetVariables => "SetVariables",
            Action::SetChargingProfile => "SetChargingProfile",
            Action::RequestStartTransaction => "RequestStartTransaction",
            Action::RequestStopTransaction => "RequestStopTransaction",
            Action::DataTransfer => "DataTransfer",
            Action::BinaryDataTransfer => "BinaryDataTransfer",
            Action::Other(name) => name,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s {
            "BootNotification" => Action::BootNotification,
            "Heartbeat" => Action::Heartbeat,
            "StatusNotification" => Action::StatusNotification,
            "MeterValues" => Action::MeterValues,
            "Authorize" => Action::Authorize,
            "TransactionEvent" => Action::TransactionEvent,
            "Reset" => Action::Reset,
            "GetVariables" => Action::GetVariables,
            "SetVariables" => Action::SetVariables,
            "SetChargingProfile" => Action::SetChargingProfile,
            "RequestStartTransaction" => Action::RequestStartTransaction,
            "RequestStopTransaction" => Action::RequestStopTransaction,
            "DataTransfer" => Action::DataTransfer,
            "BinaryDataTransfer" => Action::BinaryDataTransfer,
            other => Action::Other(other.to_string()),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Action::from(name.as_str()))
    }
}

/// Machine-readable error codes carried by error envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
    /// The request could not be routed towards its destination
    NetworkError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    /// Unknown codes fall back to `GenericError`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_value(Value::String(s.to_string())).unwrap_or(ErrorCode::GenericError))
    }
}

/// Which surface representation a payload uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json,
    Binary,
}

/// Message payload: a JSON document or a raw binary blob
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Bytes),
}

impl Payload {
    /// Serialize a typed message into a JSON payload
    pub fn json(value: impl Serialize) -> Result<Self, OverlayError> {
        Ok(Payload::Json(serde_json::to_value(value)?))
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Payload::Binary(bytes.into())
    }

    pub fn empty() -> Self {
        Payload::Json(Value::Object(serde_json::Map::new()))
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Json(_) => PayloadKind::Json,
            Payload::Binary(_) => PayloadKind::Binary,
        }
    }

    /// Translate into the other representation.
    ///
    /// JSON documents become CBOR bytes and CBOR bytes become JSON
    /// documents, so a JSON -> binary -> JSON round trip is the identity.
    pub fn transcode(&self, kind: PayloadKind) -> Result<Payload, OverlayError> {
        match (self, kind) {
            (Payload::Json(_), PayloadKind::Json) | (Payload::Binary(_), PayloadKind::Binary) => {
                Ok(self.clone())
            }
            (Payload::Json(value), PayloadKind::Binary) => serde_cbor::to_vec(value)
                .map(|bytes| Payload::Binary(Bytes::from(bytes)))
                .map_err(|e| OverlayError::Payload(e.to_string())),
            (Payload::Binary(bytes), PayloadKind::Json) => serde_cbor::from_slice::<Value>(bytes)
                .map(Payload::Json)
                .map_err(|e| OverlayError::Payload(e.to_string())),
        }
    }

    /// Deserialize the payload into a typed message
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, OverlayError> {
        match self {
            Payload::Json(value) => Ok(serde_json::from_value(value.clone())?),
            Payload::Binary(bytes) => {
                serde_cbor::from_slice(bytes).map_err(|e| OverlayError::Payload(e.to_string()))
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }
}

/// Opaque signature attached by the signing collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub key_id: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_method: Option<String>,
}

impl Signature {
    pub fn new(key_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            value: value.into(),
            signing_method: None,
            encoding_method: None,
        }
    }
}

/// Request envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: RequestId,
    pub action: Action,
    pub destination: Destination,
    pub network_path: NetworkPath,
    pub payload: Payload,
    pub signatures: Vec<Signature>,
}

impl Request {
    /// Create a request with a fresh id and an empty path
    pub fn new(action: Action, payload: Payload, destination: Destination) -> Self {
        Self {
            request_id: RequestId::new_random(),
            action,
            destination,
            network_path: NetworkPath::empty(),
            payload,
            signatures: Vec::new(),
        }
    }

    /// The node that originated this request
    pub fn source(&self) -> Option<&NodeId> {
        self.network_path.source()
    }

    /// The neighbour that handed this request over
    pub fn sender(&self) -> Option<&NodeId> {
        self.network_path.last()
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: RequestId,
    pub destination: Destination,
    pub network_path: NetworkPath,
    pub payload: Payload,
    pub signatures: Vec<Signature>,
}

impl Response {
    /// Answer `request`, addressed to its originator
    pub fn for_request(request: &Request, payload: Payload) -> Self {
        Self {
            request_id: request.request_id.clone(),
            destination: reply_destination(request),
            network_path: NetworkPath::empty(),
            payload,
            signatures: Vec::new(),
        }
    }

    /// Deserialize the response payload
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, OverlayError> {
        self.payload.parse()
    }
}

/// Error envelope
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    pub request_id: RequestId,
    pub destination: Destination,
    pub network_path: NetworkPath,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl RequestError {
    /// Refuse `request`, addressed to its originator
    pub fn for_request(
        request: &Request,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            destination: reply_destination(request),
            network_path: NetworkPath::empty(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error_details = details;
        self
    }

    /// Convert into the local failure handed to the original caller
    pub fn into_error(self) -> OverlayError {
        OverlayError::Rejected {
            code: self.error_code,
            description: self.error_description,
            details: self.error_details,
        }
    }
}

fn reply_destination(request: &Request) -> Destination {
    match request.source() {
        Some(source) => Destination::Node(source.clone()),
        None => Destination::Csms,
    }
}

/// Any overlay envelope
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayMessage {
    Request(Request),
    Response(Response),
    Error(RequestError),
}

impl OverlayMessage {
    pub fn request_id(&self) -> &RequestId {
        match self {
            OverlayMessage::Request(r) => &r.request_id,
            OverlayMessage::Response(r) => &r.request_id,
            OverlayMessage::Error(e) => &e.request_id,
        }
    }

    pub fn destination(&self) -> &Destination {
        match self {
            OverlayMessage::Request(r) => &r.destination,
            OverlayMessage::Response(r) => &r.destination,
            OverlayMessage::Error(e) => &e.destination,
        }
    }

    pub fn network_path(&self) -> &NetworkPath {
        match self {
            OverlayMessage::Request(r) => &r.network_path,
            OverlayMessage::Response(r) => &r.network_path,
            OverlayMessage::Error(e) => &e.network_path,
        }
    }

    /// Short name of the envelope kind, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            OverlayMessage::Request(_) => "request",
            OverlayMessage::Response(_) => "response",
            OverlayMessage::Error(_) => "error",
        }
    }

    /// Copy of this message with `hop` appended to its path
    pub fn with_hop(&self, hop: &NodeId) -> Self {
        let mut message = self.clone();
        match &mut message {
            OverlayMessage::Request(r) => r.network_path = r.network_path.append(hop),
            OverlayMessage::Response(r) => r.network_path = r.network_path.append(hop),
            OverlayMessage::Error(e) => e.network_path = e.network_path.append(hop),
        }
        message
    }
}
