//! Signing collaborator seam
//!
//! The core never interprets signatures. It asks the node's policy to sign
//! requests it originates and to verify messages it receives, and reports
//! the verdicts alongside the received request.

use crate::envelope::{OverlayMessage, Request, Signature};

/// Verdict for one signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    ValidSignature,
    InvalidSignature,
    UnknownKey,
}

pub trait SignaturePolicy: Send + Sync {
    /// Signatures attached to a request originated here
    fn sign(&self, request: &Request) -> Vec<Signature>;

    /// One verdict per signature carried by `message`
    fn verify(&self, message: &OverlayMessage) -> Vec<VerificationStatus>;
}

/// Policy that signs nothing and verifies nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsigned;

impl SignaturePolicy for Unsigned {
    fn sign(&self, _request: &Request) -> Vec<Signature> {
        Vec::new()
    }

    fn verify(&self, _message: &OverlayMessage) -> Vec<VerificationStatus> {
        Vec::new()
    }
}
