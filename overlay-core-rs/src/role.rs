//! Node roles and the capabilities they grant
//!
//! Roles are configuration of one dispatcher type, not separate node types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::envelope::{Action, ErrorCode};
use crate::filter::{FilterChain, ForwardingDecision};

/// Role of a node in the overlay topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeRole {
    ChargingStation,
    EnergyMeter,
    LocalController,
    Gateway,
    Csms,
}

/// What a node may do with traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Relay third-party requests
    pub can_forward: bool,
    /// Send requests of its own
    pub can_originate: bool,
    /// Answer the logical CSMS destination
    pub is_terminal: bool,
}

impl NodeRole {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            NodeRole::ChargingStation | NodeRole::EnergyMeter => Capabilities {
                can_forward: false,
                can_originate: true,
                is_terminal: false,
            },
            NodeRole::LocalController | NodeRole::Gateway => Capabilities {
                can_forward: true,
                can_originate: true,
                is_terminal: false,
            },
            NodeRole::Csms => Capabilities {
                can_forward: false,
                can_originate: true,
                is_terminal: true,
            },
        }
    }

    /// Built-in filters installed when a node of this role is created
    pub fn default_filters(&self) -> FilterChain {
        let mut filters = FilterChain::new();

        if *self == NodeRole::LocalController {
            filters.on_action(Action::Authorize, |ctx, request| {
                let from_meter = ctx.sender_role == Some(NodeRole::EnergyMeter)
                    && request.source() == Some(&ctx.sender);
                if from_meter {
                    ForwardingDecision::reject(
                        ErrorCode::SecurityError,
                        format!("Energy meter {} is not allowed to send Authorize requests", ctx.sender),
                    )
                } else {
                    ForwardingDecision::Next
                }
            });
        }

        filters
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::ChargingStation => "chargingStation",
            NodeRole::EnergyMeter => "energyMeter",
            NodeRole::LocalController => "localController",
            NodeRole::Gateway => "gateway",
            NodeRole::Csms => "csms",
        };
        f.write_str(name)
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "chargingstation" | "cs" => Ok(NodeRole::ChargingStation),
            "energymeter" | "em" => Ok(NodeRole::EnergyMeter),
            "localcontroller" | "lc" => Ok(NodeRole::LocalController),
            "gateway" | "gw" => Ok(NodeRole::Gateway),
            "csms" => Ok(NodeRole::Csms),
            other => Err(format!("unknown node role: {}", other)),
        }
    }
}
