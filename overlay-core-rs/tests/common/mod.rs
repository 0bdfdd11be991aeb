//! Shared topology for scenario tests
//!
//! ```text
//! cs1 ── lc ── gw ── csms
//! ```

#![allow(dead_code)]

use std::time::Duration;

use overlay_core::transport::memory::{self, MemoryConnection};
use overlay_core::{
    Action, EventLog, HandlerError, NodeConfig, NodeRole, OverlayEvent, OverlayNode, Payload,
    Request, WireFormat,
};
use serde_json::json;

pub struct Chain {
    pub cs1: OverlayNode,
    pub lc: OverlayNode,
    pub gw: OverlayNode,
    pub csms: OverlayNode,
    pub log: EventLog,
    pub lc_gw: MemoryConnection,
    pub gw_csms: MemoryConnection,
}

impl Chain {
    pub fn new() -> Self {
        Self::build(WireFormat::Json, |config| config)
    }

    /// Chain whose lc-gw link uses `format`; `tune` adjusts every node's config
    pub fn build(lc_gw: WireFormat, tune: impl Fn(NodeConfig) -> NodeConfig) -> Self {
        let log = EventLog::new();

        let csms = node(&log, tune(NodeConfig::new("csms", NodeRole::Csms)));
        let gw = node(&log, tune(NodeConfig::new("gw", NodeRole::Gateway)));
        let lc = node(&log, tune(NodeConfig::new("lc", NodeRole::LocalController)));
        let cs1 = node(&log, tune(NodeConfig::new("cs1", NodeRole::ChargingStation)));

        let gw_csms = memory::connect(&gw, &csms, WireFormat::Json);
        let lc_gw = memory::connect_upstream(&lc, &gw, lc_gw);
        memory::connect_upstream(&cs1, &lc, WireFormat::Json);

        gw.set_default_csms("csms");
        gw.add_static_route("cs1", "lc");
        lc.set_default_csms("csms");
        csms.add_static_route("cs1", "gw");
        csms.add_static_route("lc", "gw");

        install_csms_handlers(&csms);
        install_station_handlers(&cs1);

        for node in [&csms, &gw, &lc, &cs1] {
            node.start();
        }

        Self {
            cs1,
            lc,
            gw,
            csms,
            log,
            lc_gw,
            gw_csms,
        }
    }

    /// Add a node hanging off the local controller
    pub fn attach_to_lc(&self, id: &str, role: NodeRole) -> OverlayNode {
        let leaf = node(&self.log, NodeConfig::new(id, role));
        memory::connect_upstream(&leaf, &self.lc, WireFormat::Json);
        self.gw.add_static_route(id, "lc");
        leaf.start();
        leaf
    }

    /// Add a second CSMS next to the gateway
    pub fn attach_csms(&self, id: &str) -> OverlayNode {
        let csms = node(&self.log, NodeConfig::new(id, NodeRole::Csms));
        memory::connect(&self.gw, &csms, WireFormat::Json);
        csms.set_default_route("gw");
        install_csms_handlers(&csms);
        csms.start();
        csms
    }
}

pub fn node(log: &EventLog, config: NodeConfig) -> OverlayNode {
    let node = OverlayNode::new(config);
    node.on_event(log.observer());
    node
}

pub fn install_csms_handlers(csms: &OverlayNode) {
    let id = csms.id().to_string();
    csms.handle_fn(Action::BootNotification, move |_request: Request| {
        let id = id.clone();
        async move {
            Payload::json(json!({
                "currentTime": "2026-10-19T12:00:00Z",
                "interval": 300,
                "status": "Accepted",
                "answeredBy": id
            }))
            .map_err(HandlerError::from)
        }
    });
    csms.handle_fn(Action::Heartbeat, |_request: Request| async move {
        Payload::json(json!({"currentTime": "2026-10-19T12:00:00Z"})).map_err(HandlerError::from)
    });
    csms.handle_fn(Action::Authorize, |_request: Request| async move {
        Payload::json(json!({"idTokenInfo": {"status": "Accepted"}})).map_err(HandlerError::from)
    });
    csms.handle_fn(Action::BinaryDataTransfer, |request: Request| async move {
        Ok(request.payload)
    });
}

pub fn install_station_handlers(station: &OverlayNode) {
    station.handle_fn(Action::Reset, |_request: Request| async move {
        Payload::json(json!({"status": "Accepted"})).map_err(HandlerError::from)
    });
}

/// Poll `log` until an event matches
pub async fn wait_for(log: &EventLog, predicate: impl Fn(&OverlayEvent) -> bool) -> bool {
    for _ in 0..200 {
        if log.count(&predicate) > 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
