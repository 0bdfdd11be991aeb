//! Overlay node
//!
//! One `OverlayNode` type serves every role; the role only decides the
//! node's capabilities and built-in filters. The node owns its routing
//! table, neighbour links, filters, handlers and correlation table, and runs
//! a receive loop over its inbox.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::codec::{self, WireFormat};
use crate::config::NodeConfig;
use crate::correlation::{CorrelationKey, CorrelationTable};
use crate::envelope::{Action, OverlayMessage, Payload, Request, Response};
use crate::error::OverlayError;
use crate::event::{EventBus, OverlayEvent};
use crate::filter::{FilterChain, FilterContext, ForwardingDecision};
use crate::handler::{ActionHandler, FnHandler, HandlerError};
use crate::path::NodeId;
use crate::role::{Capabilities, NodeRole};
use crate::routing::{Destination, Resolution, RoutingTable};
use crate::signing::{SignaturePolicy, Unsigned};
use crate::transport::{Inbound, InboxSender, Link};

/// A registered neighbour
pub(crate) struct Neighbor {
    pub link: Arc<dyn Link>,
    pub role: Option<NodeRole>,
    pub format: WireFormat,
}

pub(crate) struct NodeInner {
    pub config: NodeConfig,
    pub capabilities: Capabilities,
    pub routes: RwLock<RoutingTable>,
    pub neighbors: RwLock<HashMap<NodeId, Neighbor>>,
    pub filters: RwLock<FilterChain>,
    pub handlers: RwLock<HashMap<Action, Arc<dyn ActionHandler>>>,
    pub correlation: CorrelationTable,
    pub events: EventBus,
    pub signing: RwLock<Arc<dyn SignaturePolicy>>,
    inbox_tx: InboxSender,
    inbox_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    shutdown: Notify,
}

/// Handle to an overlay node; clones share the same node
#[derive(Clone)]
pub struct OverlayNode {
    pub(crate) inner: Arc<NodeInner>,
}

impl OverlayNode {
    pub fn new(config: NodeConfig) -> Self {
        let capabilities = config.role.capabilities();
        let routes = RoutingTable::new(config.node_id.clone(), capabilities.is_terminal);
        let filters = if config.role_filters {
            config.role.default_filters()
        } else {
            FilterChain::new()
        };
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));

        info!("Created {} node {}", config.role, config.node_id);

        Self {
            inner: Arc::new(NodeInner {
                correlation: CorrelationTable::new(config.dedup_capacity),
                config,
                capabilities,
                routes: RwLock::new(routes),
                neighbors: RwLock::new(HashMap::new()),
                filters: RwLock::new(filters),
                handlers: RwLock::new(HashMap::new()),
                events: EventBus::new(),
                signing: RwLock::new(Arc::new(Unsigned)),
                inbox_tx,
                inbox_rx: Mutex::new(Some(inbox_rx)),
                shutdown: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.config.node_id
    }

    pub fn role(&self) -> NodeRole {
        self.inner.config.role
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Channel on which links deliver inbound frames
    pub fn inbox(&self) -> InboxSender {
        self.inner.inbox_tx.clone()
    }

    /// Start the receive loop.
    ///
    /// Each inbound frame is processed in its own task; the same loop
    /// periodically drops expired forwarded entries. Returns `None` if the
    /// loop was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let mut rx = self.inner.inbox_rx.lock().take()?;
        let inner = self.inner.clone();

        Some(tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_period(inner.config.forward_timeout));
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("{}: receive loop started", inner.config.node_id);
            loop {
                tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    _ = sweep.tick() => inner.expire_forwarded(),
                    inbound = rx.recv() => match inbound {
                        Some(inbound) => {
                            let inner = inner.clone();
                            tokio::spawn(async move { inner.dispatch(inbound).await });
                        }
                        None => break,
                    },
                }
            }
            info!("{}: receive loop stopped", inner.config.node_id);
        }))
    }

    /// Stop the receive loop
    pub fn shutdown(&self) {
        self.inner.shutdown.notify_one();
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Register a neighbour reachable over `link`
    pub fn add_neighbor(&self, link: Arc<dyn Link>, role: Option<NodeRole>, format: WireFormat) {
        let peer = link.peer().clone();
        debug!("{}: neighbour {} ({:?}, {:?})", self.id(), peer, role, format);
        self.inner.routes.write().add_neighbor(peer.clone());
        self.inner
            .neighbors
            .write()
            .insert(peer, Neighbor { link, role, format });
    }

    pub fn remove_neighbor(&self, peer: &NodeId) {
        self.inner.routes.write().remove_neighbor(peer);
        if self.inner.neighbors.write().remove(peer).is_some() {
            info!("{}: neighbour {} removed", self.id(), peer);
        }
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.inner.neighbors.read().keys().cloned().collect()
    }

    /// Role a neighbour was registered with
    pub fn neighbor_role(&self, peer: &NodeId) -> Option<NodeRole> {
        self.inner.neighbors.read().get(peer).and_then(|n| n.role)
    }

    pub fn add_static_route(&self, destination: impl Into<NodeId>, next_hop: impl Into<NodeId>) {
        self.inner.routes.write().add_static_route(destination, next_hop);
    }

    pub fn remove_static_route(&self, destination: &NodeId) -> Option<NodeId> {
        self.inner.routes.write().remove_static_route(destination)
    }

    pub fn set_default_csms(&self, csms: impl Into<NodeId>) {
        self.inner.routes.write().set_default_csms(csms);
    }

    pub fn set_default_route(&self, next_hop: impl Into<NodeId>) {
        self.inner.routes.write().set_default_route(next_hop);
    }

    /// Where a request for `destination` would go from here
    pub fn resolve(&self, destination: &Destination) -> Result<Resolution, OverlayError> {
        self.inner.routes.read().resolve_destination(destination)
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Add a forwarding filter for one action
    pub fn on_action<F>(&self, action: Action, filter: F)
    where
        F: Fn(&FilterContext, &Request) -> ForwardingDecision + Send + Sync + 'static,
    {
        self.inner.filters.write().on_action(action, filter);
    }

    /// Add a forwarding filter for every action
    pub fn on_any<F>(&self, filter: F)
    where
        F: Fn(&FilterContext, &Request) -> ForwardingDecision + Send + Sync + 'static,
    {
        self.inner.filters.write().on_any(filter);
    }

    /// Observe lifecycle events
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&OverlayEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(observer);
    }

    /// Register the handler answering `action` when a request ends here
    pub fn handle(&self, action: Action, handler: impl ActionHandler + 'static) {
        self.inner.handlers.write().insert(action, Arc::new(handler));
    }

    /// Register an async closure as the handler for `action`
    pub fn handle_fn<F, Fut>(&self, action: Action, f: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
    {
        self.handle(action, FnHandler::new(f));
    }

    pub fn has_handler(&self, action: &Action) -> bool {
        self.inner.handlers.read().contains_key(action)
    }

    pub fn set_signature_policy(&self, policy: Arc<dyn SignaturePolicy>) {
        *self.inner.signing.write() = policy;
    }

    // ------------------------------------------------------------------
    // Origination
    // ------------------------------------------------------------------

    /// Send a request and wait for its answer.
    ///
    /// An error envelope from anywhere along the path is returned as
    /// `OverlayError::Rejected`.
    pub async fn request(
        &self,
        destination: Destination,
        action: Action,
        payload: Payload,
    ) -> Result<Response, OverlayError> {
        self.send_request(Request::new(action, payload, destination)).await
    }

    /// Send a prepared request and wait for its answer.
    ///
    /// Fails with `OverlayError::DuplicateRequest` before anything is sent
    /// when the request's id is still pending here or was answered recently.
    pub async fn send_request(&self, mut request: Request) -> Result<Response, OverlayError> {
        let inner = &self.inner;
        if !inner.capabilities.can_originate {
            return Err(OverlayError::NotOriginator(self.id().clone()));
        }

        let resolution = inner.routes.read().resolve_destination(&request.destination)?;
        let (next_hop, destination) = match resolution {
            Resolution::Forward { next_hop, destination } => (next_hop, destination),
            Resolution::Local => {
                return Err(OverlayError::NoRoute(format!(
                    "{} (resolves to {} itself)",
                    request.destination,
                    self.id()
                )))
            }
        };
        request.destination = destination;
        let signatures = inner.signing.read().sign(&request);
        request.signatures = signatures;

        let request_id = request.request_id.clone();
        let key = CorrelationKey::new(self.id(), request_id.clone());
        let Some((generation, answer)) = inner.correlation.register_local(key.clone()) else {
            warn!("{}: request id {} is already in use", self.id(), request_id);
            return Err(OverlayError::DuplicateRequest(request_id));
        };

        info!("{}: sending {} {} to {}", self.id(), request.action, request_id, next_hop);
        let message = OverlayMessage::Request(request);
        match inner.send_message(&next_hop, &message).await {
            Ok(OverlayMessage::Request(sent)) => inner.emit(OverlayEvent::RequestSent {
                node: self.id().clone(),
                to: next_hop.clone(),
                request: sent,
            }),
            Ok(_) => {}
            Err(e) => {
                inner.correlation.cancel(&key, generation);
                warn!("{}: failed to send {} to {}: {}", self.id(), request_id, next_hop, e);
                inner.emit(OverlayEvent::SendFailed {
                    node: self.id().clone(),
                    to: next_hop,
                    request_id,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }

        match tokio::time::timeout(inner.config.request_timeout, answer).await {
            Ok(Ok(OverlayMessage::Response(response))) => {
                debug!("{}: response to {} via {}", self.id(), request_id, response.network_path);
                Ok(response)
            }
            Ok(Ok(OverlayMessage::Error(error))) => {
                warn!(
                    "{}: {} rejected: {} - {}",
                    self.id(),
                    request_id,
                    error.error_code,
                    error.error_description
                );
                Err(error.into_error())
            }
            Ok(Ok(OverlayMessage::Request(_))) => Err(OverlayError::MalformedEnvelope(
                "request delivered as an answer".to_string(),
            )),
            Ok(Err(_)) => {
                warn!("{}: request {} was dropped without an answer", self.id(), request_id);
                Err(OverlayError::UnknownCorrelation {
                    destination: self.id().clone(),
                    request_id,
                })
            }
            Err(_) => {
                inner.correlation.cancel(&key, generation);
                warn!("{}: request {} timed out", self.id(), request_id);
                inner.emit(OverlayEvent::RequestTimedOut {
                    node: self.id().clone(),
                    request_id: request_id.clone(),
                });
                Err(OverlayError::RequestTimeout(request_id))
            }
        }
    }

    /// Requests this node is waiting on, local and forwarded
    pub fn pending_requests(&self) -> usize {
        self.inner.correlation.len()
    }

    /// Encode and deliver a raw message to a neighbour, appending this node
    /// to its path. Mostly useful to inject traffic in tests.
    pub async fn send_raw(&self, to: &NodeId, message: &OverlayMessage) -> Result<(), OverlayError> {
        self.inner.send_message(to, message).await.map(|_| ())
    }
}

/// How often expired forwarded entries are swept
fn sweep_period(forward_timeout: Duration) -> Duration {
    (forward_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
}

impl NodeInner {
    pub(crate) fn id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub(crate) fn emit(&self, event: OverlayEvent) {
        self.events.emit(event);
    }

    /// Encode `message` for `to` with this node appended to its path and
    /// hand it to the neighbour's link. Returns the message as sent.
    pub(crate) async fn send_message(
        &self,
        to: &NodeId,
        message: &OverlayMessage,
    ) -> Result<OverlayMessage, OverlayError> {
        let (link, format) = {
            let neighbors = self.neighbors.read();
            let neighbor = neighbors
                .get(to)
                .ok_or_else(|| OverlayError::NoRoute(format!("{} (not a neighbour of {})", to, self.id())))?;
            (neighbor.link.clone(), neighbor.format)
        };

        let message = message.with_hop(self.id());
        let frame = codec::encode(&message, format)?;
        link.send(frame).await?;
        Ok(message)
    }
}

impl std::fmt::Debug for OverlayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayNode")
            .field("id", self.id())
            .field("role", &self.role())
            .field("neighbors", &self.neighbors())
            .field("pending", &self.pending_requests())
            .finish()
    }
}
