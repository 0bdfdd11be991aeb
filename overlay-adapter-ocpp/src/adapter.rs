//! One overlay node wired to WebSocket links
//!
//! ```text
//!            upstream (WsClient)
//!                  ▲
//! ┌────────────────┴────────────────┐
//! │  OverlayNode                    │
//! │  routes │ filters │ responders  │
//! └────────────────┬────────────────┘
//!                  ▼
//!          downstream (WsListener)
//! ```
//!
//! The role decides which default responders are installed: a CSMS answers
//! station actions, a charging station answers CSMS actions and boots once
//! its upstream is connected.

use std::net::SocketAddr;

use overlay_core::{NodeRole, OverlayNode};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AdapterConfig;
use crate::ocpp::{ChargingStationInfo, CsmsResponder, StationResponder, StationSession};
use crate::websocket::{WsClient, WsError, WsListener};

/// Overlay node plus its links and default behaviour
pub struct Adapter {
    config: AdapterConfig,
    node: OverlayNode,
    listener: Option<WsListener>,
    csms: Option<CsmsResponder>,
    station: Option<StationResponder>,
}

impl Adapter {
    /// Build the node, install routes and responders, bind the listener
    pub async fn new(config: AdapterConfig) -> Result<Self, WsError> {
        let node = OverlayNode::new(config.node.clone());

        if let Some(csms) = &config.default_csms {
            node.set_default_csms(csms.clone());
        }
        for (destination, next_hop) in &config.routes {
            node.add_static_route(destination.clone(), next_hop.clone());
        }

        let (csms, station) = match node.role() {
            NodeRole::Csms => {
                let responder = CsmsResponder::new(config.station.heartbeat_interval)
                    .with_vendor_id(config.station.vendor.clone());
                responder.install(&node);
                (Some(responder), None)
            }
            NodeRole::ChargingStation => {
                let responder = StationResponder::new().with_vendor_id(config.station.vendor.clone());
                responder.install(&node);
                (None, Some(responder))
            }
            _ => (None, None),
        };

        let listener = match config.ws.listen_addr {
            Some(addr) => Some(WsListener::bind(node.clone(), addr, config.ws.clone()).await?),
            None => None,
        };

        Ok(Self {
            config,
            node,
            listener,
            csms,
            station,
        })
    }

    pub fn node(&self) -> &OverlayNode {
        &self.node
    }

    /// Address downstream neighbours connect to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn csms_responder(&self) -> Option<&CsmsResponder> {
        self.csms.as_ref()
    }

    pub fn station_responder(&self) -> Option<&StationResponder> {
        self.station.as_ref()
    }

    fn station_info(&self) -> ChargingStationInfo {
        ChargingStationInfo {
            model: self.config.station.model.clone(),
            vendor_name: self.config.station.vendor.clone(),
            serial_number: self.config.station.serial_number.clone(),
            firmware_version: self.config.station.firmware_version.clone(),
        }
    }

    /// Start the node and its links; returns the spawned tasks
    pub fn spawn(mut self) -> Vec<JoinHandle<()>> {
        info!(
            "Starting overlay node {} ({})",
            self.node.id(),
            self.node.role()
        );

        let mut tasks = Vec::new();
        tasks.extend(self.node.start());

        if let Some(listener) = self.listener.take() {
            tasks.push(tokio::spawn(async move {
                if let Err(e) = listener.run().await {
                    warn!("Listener stopped: {}", e);
                }
            }));
        }

        if let Some(upstream) = self.config.ws.upstream.clone() {
            let retry_delay = upstream.reconnect_delay;
            let client = WsClient::new(self.node.clone(), upstream, self.config.ws.clone());
            tasks.push(tokio::spawn(client.run()));

            if self.node.role() == NodeRole::ChargingStation && self.config.station.auto_boot {
                let session = StationSession::new(self.node.clone(), self.station_info())
                    .with_retry_delay(retry_delay);
                tasks.push(tokio::spawn(async move { session.run().await }));
            }
        }

        tasks
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<(), WsError> {
        let node = self.node.clone();
        let tasks = self.spawn();

        tokio::signal::ctrl_c().await?;
        info!("Shutting down {}", node.id());

        node.shutdown();
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}
