//! OCPP 2.0.1 over the overlay
//!
//! - `types`: OCPP payload schemas
//! - `requests`: typed send operations on `OverlayNode`
//! - `responders`: default CSMS and station handlers
//! - `session`: station boot and heartbeat lifecycle

pub mod types;
pub mod requests;
pub mod responders;
pub mod session;

pub use types::*;
pub use requests::OcppRequests;
pub use responders::{CsmsResponder, StationRecord, StationResponder};
pub use session::{SessionState, StationSession};
