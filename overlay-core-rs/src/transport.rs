//! Links between neighbouring nodes
//!
//! A `Link` carries encoded frames to one neighbour. Inbound frames from all
//! links of a node are funnelled into that node's inbox as `Inbound` values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::Frame;
use crate::error::OverlayError;
use crate::path::NodeId;

/// A frame received from a neighbour
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: NodeId,
    pub frame: Frame,
}

/// Sending half of a node's inbox
pub type InboxSender = mpsc::Sender<Inbound>;

/// Outbound connection to one neighbour
#[async_trait]
pub trait Link: Send + Sync {
    /// Neighbour at the other end
    fn peer(&self) -> &NodeId;

    async fn send(&self, frame: Frame) -> Result<(), OverlayError>;
}

/// In-process links backed by channels
pub mod memory {
    use super::*;
    use crate::codec::WireFormat;
    use crate::node::OverlayNode;

    /// Link delivering straight into a peer's inbox
    pub struct MemoryLink {
        local: NodeId,
        peer: NodeId,
        inbox: InboxSender,
        connected: AtomicBool,
    }

    impl MemoryLink {
        pub fn new(local: NodeId, peer: NodeId, inbox: InboxSender) -> Self {
            Self {
                local,
                peer,
                inbox,
                connected: AtomicBool::new(true),
            }
        }

        /// Simulate losing (or regaining) the connection
        pub fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Link for MemoryLink {
        fn peer(&self) -> &NodeId {
            &self.peer
        }

        async fn send(&self, frame: Frame) -> Result<(), OverlayError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(OverlayError::SendFailed {
                    to: self.peer.clone(),
                    reason: "link down".to_string(),
                });
            }

            debug!("{} -> {}: {} byte frame", self.local, self.peer, frame.len());
            self.inbox
                .send(Inbound {
                    from: self.local.clone(),
                    frame,
                })
                .await
                .map_err(|_| OverlayError::SendFailed {
                    to: self.peer.clone(),
                    reason: "inbox closed".to_string(),
                })
        }
    }

    /// Both directions of an in-memory connection
    pub struct MemoryConnection {
        pub a_to_b: Arc<MemoryLink>,
        pub b_to_a: Arc<MemoryLink>,
    }

    impl MemoryConnection {
        /// Cut or restore both directions
        pub fn set_connected(&self, connected: bool) {
            self.a_to_b.set_connected(connected);
            self.b_to_a.set_connected(connected);
        }
    }

    /// Connect two nodes as neighbours speaking `format`
    pub fn connect(a: &OverlayNode, b: &OverlayNode, format: WireFormat) -> MemoryConnection {
        let a_to_b = Arc::new(MemoryLink::new(a.id().clone(), b.id().clone(), b.inbox()));
        let b_to_a = Arc::new(MemoryLink::new(b.id().clone(), a.id().clone(), a.inbox()));

        a.add_neighbor(a_to_b.clone(), Some(b.role()), format);
        b.add_neighbor(b_to_a.clone(), Some(a.role()), format);

        MemoryConnection { a_to_b, b_to_a }
    }

    /// Connect `leaf` to its single upstream node, which becomes its default route
    pub fn connect_upstream(leaf: &OverlayNode, upstream: &OverlayNode, format: WireFormat) -> MemoryConnection {
        let connection = connect(leaf, upstream, format);
        leaf.set_default_route(upstream.id().clone());
        connection
    }
}
