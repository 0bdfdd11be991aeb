//! Error taxonomy for the overlay core

use serde_json::Value;
use thiserror::Error;

use crate::codec::CodecError;
use crate::envelope::{ErrorCode, RequestId};
use crate::path::NodeId;

/// Failures surfaced by overlay operations
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("No route to {0}")]
    NoRoute(String),

    #[error("No default CSMS configured at {0}")]
    NoDefaultCsms(NodeId),

    /// The request was answered with an error envelope somewhere along the path
    #[error("Request rejected: {code} - {description}")]
    Rejected {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("Timeout waiting for response to {0}")]
    RequestTimeout(RequestId),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("No pending request {request_id} for {destination}")]
    UnknownCorrelation {
        destination: NodeId,
        request_id: RequestId,
    },

    #[error("Failed to send to {to}: {reason}")]
    SendFailed { to: NodeId, reason: String },

    /// A RequestId this node already has in flight or answered recently
    #[error("Request id {0} is already in use")]
    DuplicateRequest(RequestId),

    #[error("Node {0} may not originate requests")]
    NotOriginator(NodeId),

    #[error("Payload error: {0}")]
    Payload(String),
}

impl OverlayError {
    /// Wire error code used when this failure is answered with an error envelope
    pub fn error_code(&self) -> ErrorCode {
        match self {
            OverlayError::NoRoute(_) | OverlayError::NoDefaultCsms(_) => ErrorCode::NetworkError,
            OverlayError::SendFailed { .. } => ErrorCode::NetworkError,
            OverlayError::Rejected { code, .. } => *code,
            OverlayError::MalformedEnvelope(_) => ErrorCode::FormatViolation,
            OverlayError::Payload(_) => ErrorCode::FormatViolation,
            OverlayError::RequestTimeout(_)
            | OverlayError::UnknownCorrelation { .. }
            | OverlayError::DuplicateRequest(_)
            | OverlayError::NotOriginator(_) => ErrorCode::InternalError,
        }
    }
}

impl From<CodecError> for OverlayError {
    fn from(e: CodecError) -> Self {
        OverlayError::MalformedEnvelope(e.to_string())
    }
}

impl From<serde_json::Error> for OverlayError {
    fn from(e: serde_json::Error) -> Self {
        OverlayError::Payload(e.to_string())
    }
}
