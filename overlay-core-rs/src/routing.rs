//! Destinations and the per-node routing table

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::error::OverlayError;
use crate::path::{NetworkPath, NodeId};

/// Where a request is headed.
///
/// Exactly one form is active per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// A specific node
    Node(NodeId),
    /// The logical CSMS role, resolved by the first hop that knows a CSMS
    Csms,
    /// Explicit hop list; the last hop is the addressee
    SourceRoute(NetworkPath),
}

impl Destination {
    /// Address a node; the reserved CSMS id becomes `Destination::Csms`
    pub fn to(node: impl Into<NodeId>) -> Self {
        let node = node.into();
        if node.is_csms() {
            Destination::Csms
        } else {
            Destination::Node(node)
        }
    }

    pub fn source_route<I, N>(hops: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        Destination::SourceRoute(NetworkPath::from(hops))
    }

    /// The addressee, if the destination names a concrete node
    pub fn addressee(&self) -> Option<&NodeId> {
        match self {
            Destination::Node(node) => Some(node),
            Destination::Csms => None,
            Destination::SourceRoute(route) => route.last(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Node(node) => write!(f, "{}", node),
            Destination::Csms => f.write_str(NodeId::CSMS),
            Destination::SourceRoute(route) => write!(f, "route{}", route),
        }
    }
}

/// Outcome of resolving a destination at one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This node is the addressee
    Local,
    /// Send to `next_hop`; `destination` is what the forwarded request carries
    Forward {
        next_hop: NodeId,
        destination: Destination,
    },
}

/// Static routes of one node.
///
/// Responses never consult the table: they follow correlation entries back
/// to whichever neighbour delivered the request.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local_id: NodeId,
    is_csms: bool,
    routes: HashMap<NodeId, NodeId>,
    neighbors: HashSet<NodeId>,
    default_csms: Option<NodeId>,
    default_route: Option<NodeId>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId, is_csms: bool) -> Self {
        Self {
            local_id,
            is_csms,
            routes: HashMap::new(),
            neighbors: HashSet::new(),
            default_csms: None,
            default_route: None,
        }
    }

    /// Insert or replace the next hop towards `destination`
    pub fn add_static_route(&mut self, destination: impl Into<NodeId>, next_hop: impl Into<NodeId>) {
        let destination = destination.into();
        let next_hop = next_hop.into();
        debug!("{}: route {} via {}", self.local_id, destination, next_hop);
        self.routes.insert(destination, next_hop);
    }

    pub fn remove_static_route(&mut self, destination: &NodeId) -> Option<NodeId> {
        self.routes.remove(destination)
    }

    /// Concrete CSMS identity the logical CSMS destination resolves to
    pub fn set_default_csms(&mut self, csms: impl Into<NodeId>) {
        self.default_csms = Some(csms.into());
    }

    /// Next hop for destinations without a static route (a leaf's upstream)
    pub fn set_default_route(&mut self, next_hop: impl Into<NodeId>) {
        self.default_route = Some(next_hop.into());
    }

    pub fn add_neighbor(&mut self, neighbor: NodeId) {
        self.neighbors.insert(neighbor);
    }

    pub fn remove_neighbor(&mut self, neighbor: &NodeId) {
        self.neighbors.remove(neighbor);
    }

    pub fn is_neighbor(&self, node: &NodeId) -> bool {
        self.neighbors.contains(node)
    }

    /// Next hop towards a concrete node
    pub fn resolve(&self, destination: &NodeId) -> Result<NodeId, OverlayError> {
        if let Some(next_hop) = self.routes.get(destination) {
            return Ok(next_hop.clone());
        }
        if self.neighbors.contains(destination) {
            return Ok(destination.clone());
        }
        self.default_route
            .clone()
            .ok_or_else(|| OverlayError::NoRoute(destination.to_string()))
    }

    /// Configured default CSMS of this node
    pub fn resolve_csms(&self) -> Result<NodeId, OverlayError> {
        if self.is_csms {
            return Ok(self.local_id.clone());
        }
        self.default_csms
            .clone()
            .ok_or_else(|| OverlayError::NoDefaultCsms(self.local_id.clone()))
    }

    /// Decide where a request for `destination` goes from here
    pub fn resolve_destination(&self, destination: &Destination) -> Result<Resolution, OverlayError> {
        match destination {
            Destination::Node(node) if *node == self.local_id => Ok(Resolution::Local),
            Destination::Node(node) => Ok(Resolution::Forward {
                next_hop: self.resolve(node)?,
                destination: destination.clone(),
            }),
            Destination::Csms if self.is_csms => Ok(Resolution::Local),
            Destination::Csms => match self.resolve_csms() {
                Ok(csms) => Ok(Resolution::Forward {
                    next_hop: self.resolve(&csms)?,
                    destination: Destination::Node(csms),
                }),
                // Leaves hand CSMS traffic upstream without knowing its identity
                Err(e) => match &self.default_route {
                    Some(upstream) => Ok(Resolution::Forward {
                        next_hop: upstream.clone(),
                        destination: Destination::Csms,
                    }),
                    None => Err(e),
                },
            },
            Destination::SourceRoute(route) => self.resolve_source_route(route, destination),
        }
    }

    fn resolve_source_route(
        &self,
        route: &NetworkPath,
        destination: &Destination,
    ) -> Result<Resolution, OverlayError> {
        let next_index = match route.position(&self.local_id) {
            Some(index) if index + 1 == route.len() => return Ok(Resolution::Local),
            Some(index) => index + 1,
            None => 0,
        };
        let next_hop = route
            .get(next_index)
            .ok_or_else(|| OverlayError::NoRoute(destination.to_string()))?;

        if !self.neighbors.contains(next_hop) {
            return Err(OverlayError::NoRoute(format!(
                "{} (hop {} is not a neighbour of {})",
                destination, next_hop, self.local_id
            )));
        }

        Ok(Resolution::Forward {
            next_hop: next_hop.clone(),
            destination: destination.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: &str) -> RoutingTable {
        RoutingTable::new(NodeId::from(id), false)
    }

    #[test]
    fn test_static_route_upsert() {
        let mut routes = table("gw");
        routes.add_static_route("cs1", "lc1");
        assert_eq!(routes.resolve(&"cs1".into()).unwrap(), NodeId::from("lc1"));

        routes.add_static_route("cs1", "lc2");
        assert_eq!(routes.resolve(&"cs1".into()).unwrap(), NodeId::from("lc2"));
    }

    #[test]
    fn test_unknown_destination_has_no_route() {
        let routes = table("gw");
        assert!(matches!(
            routes.resolve(&"cs9".into()),
            Err(OverlayError::NoRoute(_))
        ));
    }

    #[test]
    fn test_neighbors_need_no_route() {
        let mut routes = table("lc");
        routes.add_neighbor("cs1".into());
        assert_eq!(routes.resolve(&"cs1".into()).unwrap(), NodeId::from("cs1"));
    }

    #[test]
    fn test_csms_resolution() {
        let mut routes = table("lc");
        assert!(matches!(routes.resolve_csms(), Err(OverlayError::NoDefaultCsms(_))));
        assert!(routes.resolve_destination(&Destination::Csms).is_err());

        routes.set_default_csms("csms");
        routes.add_static_route("csms", "gw");
        assert_eq!(
            routes.resolve_destination(&Destination::Csms).unwrap(),
            Resolution::Forward {
                next_hop: "gw".into(),
                destination: Destination::Node("csms".into()),
            }
        );

        let csms = RoutingTable::new("csms".into(), true);
        assert_eq!(csms.resolve_destination(&Destination::Csms).unwrap(), Resolution::Local);
    }

    #[test]
    fn test_leaf_sends_csms_traffic_upstream() {
        let mut routes = table("cs1");
        routes.set_default_route("lc");
        assert_eq!(
            routes.resolve_destination(&Destination::Csms).unwrap(),
            Resolution::Forward {
                next_hop: "lc".into(),
                destination: Destination::Csms,
            }
        );
    }

    #[test]
    fn test_source_route() {
        let route = Destination::source_route(["lc", "cs1"]);

        let mut gw = table("gw");
        gw.add_neighbor("lc".into());
        assert!(matches!(
            gw.resolve_destination(&route).unwrap(),
            Resolution::Forward { next_hop, .. } if next_hop == NodeId::from("lc")
        ));

        let mut lc = table("lc");
        assert!(lc.resolve_destination(&route).is_err());
        lc.add_neighbor("cs1".into());
        assert!(matches!(
            lc.resolve_destination(&route).unwrap(),
            Resolution::Forward { next_hop, .. } if next_hop == NodeId::from("cs1")
        ));

        let cs1 = table("cs1");
        assert_eq!(cs1.resolve_destination(&route).unwrap(), Resolution::Local);
    }

    #[test]
    fn test_reserved_id_normalises() {
        assert_eq!(Destination::to(NodeId::csms()), Destination::Csms);
        assert_eq!(Destination::to("csms1"), Destination::Node("csms1".into()));
    }
}
