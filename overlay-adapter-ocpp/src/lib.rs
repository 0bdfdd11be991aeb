//! # Overlay OCPP Adapter
//!
//! OCPP 2.0.1 on top of the overlay routing core.
//!
//! This crate gives `overlay-core` nodes their OCPP vocabulary and their
//! network links:
//!
//! - typed send operations for the OCPP actions (`OcppRequests`)
//! - default responders for CSMS and charging-station nodes
//! - a station session that boots and keeps heartbeating
//! - WebSocket links between neighbours, JSON or binary framed
//!
//! ## Architecture
//!
//! ```text
//!  station ──ws──► local controller ──ws──► gateway ──ws──► CSMS
//!    │                   │                     │              │
//!  StationResponder   filters/routes     filters/routes   CsmsResponder
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use overlay_adapter_ocpp::{Adapter, AdapterConfig, UpstreamConfig};
//! use overlay_core::NodeRole;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdapterConfig::new("lc-1", NodeRole::LocalController)
//!         .with_listen_addr("0.0.0.0:9100".parse()?)
//!         .with_upstream(UpstreamConfig::new("ws://gateway.local:9000/overlay"))
//!         .with_default_csms("csms");
//!
//!     let adapter = Adapter::new(config).await?;
//!     adapter.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ocpp;
pub mod config;
pub mod websocket;
pub mod adapter;

pub use config::{AdapterConfig, StationConfig, UpstreamConfig, WsConfig};
pub use adapter::Adapter;
pub use websocket::{WsClient, WsError, WsLink, WsListener};

// Re-export key types
pub use ocpp::{
    CsmsResponder, OcppRequests, SessionState, StationResponder, StationSession,
    BinaryDataTransferRequest, BinaryDataTransferResponse,
};
