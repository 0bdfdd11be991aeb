//! Overlay Core Library
//!
//! Store-and-forward routing for OCPP messages across chains of
//! intermediary nodes (station -> local controller -> gateway -> CSMS).
//! Every hop records itself in the message's network path, applies its
//! forwarding filters and correlates the answer back to where the request
//! came from, independent of whether each link speaks JSON or binary.
//!
//! ```text
//! cs1 ──► lc ──► gw ──► csms        request path  [cs1, lc, gw]
//! cs1 ◄── lc ◄── gw ◄── csms        response path [csms, gw, lc]
//! ```

pub mod path;
pub mod error;
pub mod envelope;
pub mod routing;
pub mod codec;
pub mod filter;
pub mod role;
pub mod correlation;
pub mod event;
pub mod signing;
pub mod handler;
pub mod transport;
pub mod config;
pub mod node;
mod dispatcher;

pub use path::{NetworkPath, NodeId};
pub use error::OverlayError;
pub use envelope::{
    Action, ErrorCode, OverlayMessage, Payload, PayloadKind, Request, RequestError, RequestId,
    Response, Signature,
};
pub use routing::{Destination, Resolution, RoutingTable};
pub use codec::{Frame, WireFormat};
pub use filter::{FilterChain, FilterContext, ForwardingDecision};
pub use role::{Capabilities, NodeRole};
pub use event::{EventLog, OverlayEvent};
pub use signing::{SignaturePolicy, VerificationStatus};
pub use handler::{ActionHandler, FnHandler, HandlerError};
pub use transport::{Inbound, Link};
pub use config::NodeConfig;
pub use node::OverlayNode;
