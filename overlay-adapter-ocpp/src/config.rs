//! Configuration for an OCPP overlay node
//!
//! Combines the core node settings with WebSocket links and the station
//! identity reported in BootNotification.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use overlay_core::{NodeConfig, NodeId, NodeRole, WireFormat};

/// Complete adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    // Overlay settings
    pub node: NodeConfig,

    // Static routing
    pub default_csms: Option<NodeId>,
    pub routes: Vec<(NodeId, NodeId)>,

    // Link settings
    pub ws: WsConfig,

    // OCPP settings
    pub station: StationConfig,
}

/// WebSocket link configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Address to accept downstream neighbours on
    pub listen_addr: Option<SocketAddr>,

    /// Upstream neighbour, if any
    pub upstream: Option<UpstreamConfig>,

    /// Largest accepted message
    pub max_message_size: usize,

    /// Largest accepted frame
    pub max_frame_size: usize,

    /// Roles of known neighbours. These win over the role a peer declares
    /// in its handshake, and apply to peers that declare none.
    pub neighbor_roles: HashMap<NodeId, NodeRole>,
}

/// Connection to the upstream neighbour
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// WebSocket URL (without this node's id)
    pub url: String,

    /// Upstream id; taken from the handshake when not set
    pub node_id: Option<NodeId>,

    /// Upstream role; taken from the handshake when not set
    pub role: Option<NodeRole>,

    /// Framing requested on the link
    pub format: WireFormat,

    /// Route everything unknown through the upstream
    pub default_route: bool,

    /// Initial reconnect delay
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,
}

/// Station identity and CSMS behaviour
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Vendor name for BootNotification
    pub vendor: String,

    /// Model name for BootNotification
    pub model: String,

    /// Serial number (optional)
    pub serial_number: Option<String>,

    /// Firmware version (optional)
    pub firmware_version: Option<String>,

    /// Heartbeat interval handed out by a CSMS, in seconds
    pub heartbeat_interval: i32,

    /// Boot and heartbeat automatically once the upstream is connected
    pub auto_boot: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            default_csms: None,
            routes: Vec::new(),
            ws: WsConfig::default(),
            station: StationConfig::default(),
        }
    }
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            listen_addr: None,
            upstream: None,
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
            neighbor_roles: HashMap::new(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/overlay".to_string(),
            node_id: None,
            role: None,
            format: WireFormat::Json,
            default_route: true,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(300),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            vendor: "Elektrokombinacija".to_string(),
            model: "EK3-OCPP".to_string(),
            serial_number: None,
            firmware_version: Some("0.1.0".to_string()),
            heartbeat_interval: 300,
            auto_boot: true,
        }
    }
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl AdapterConfig {
    /// Create config with identity and role
    pub fn new(node_id: impl Into<NodeId>, role: NodeRole) -> Self {
        Self {
            node: NodeConfig::new(node_id, role),
            ..Default::default()
        }
    }

    /// Accept downstream neighbours on `addr`
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.ws.listen_addr = Some(addr);
        self
    }

    /// Connect to an upstream neighbour
    pub fn with_upstream(mut self, upstream: UpstreamConfig) -> Self {
        self.ws.upstream = Some(upstream);
        self
    }

    /// Set the default CSMS
    pub fn with_default_csms(mut self, csms: impl Into<NodeId>) -> Self {
        self.default_csms = Some(csms.into());
        self
    }

    /// Add a static route
    pub fn with_route(mut self, destination: impl Into<NodeId>, next_hop: impl Into<NodeId>) -> Self {
        self.routes.push((destination.into(), next_hop.into()));
        self
    }

    /// Pin the role of a neighbour instead of trusting its handshake
    pub fn with_neighbor_role(mut self, neighbor: impl Into<NodeId>, role: NodeRole) -> Self {
        self.ws.neighbor_roles.insert(neighbor.into(), role);
        self
    }

    /// Set vendor and model
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.station.vendor = vendor.into();
        self.station.model = model.into();
        self
    }

    /// Set the heartbeat interval a CSMS hands out
    pub fn with_heartbeat_interval(mut self, seconds: i32) -> Self {
        self.station.heartbeat_interval = seconds;
        self
    }

    /// Do not boot automatically
    pub fn without_auto_boot(mut self) -> Self {
        self.station.auto_boot = false;
        self
    }

    /// Set the local request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.node = self.node.with_request_timeout(timeout);
        self
    }

    /// Set the forwarded entry lifetime
    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.node = self.node.with_forward_timeout(timeout);
        self
    }
}
