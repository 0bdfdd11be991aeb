//! Observability hooks
//!
//! Nodes report every lifecycle point of a message as an `OverlayEvent`.
//! Observers are plain callbacks invoked in registration order; `EventLog`
//! is a ready-made observer that records events for later inspection.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::envelope::{Action, OverlayMessage, Request, RequestError, RequestId, Response};
use crate::filter::ForwardingDecision;
use crate::path::{NetworkPath, NodeId};
use crate::signing::VerificationStatus;

/// Lifecycle notifications emitted by a node
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    RequestReceived {
        node: NodeId,
        from: NodeId,
        request: Request,
        verification: Vec<VerificationStatus>,
    },
    RequestFiltered {
        node: NodeId,
        request: Request,
        decision: ForwardingDecision,
    },
    RequestSent {
        node: NodeId,
        to: NodeId,
        request: Request,
    },
    ResponseReceived {
        node: NodeId,
        from: NodeId,
        response: Response,
    },
    ResponseSent {
        node: NodeId,
        to: NodeId,
        response: Response,
    },
    RequestErrorReceived {
        node: NodeId,
        from: NodeId,
        error: RequestError,
    },
    RequestErrorSent {
        node: NodeId,
        to: NodeId,
        error: RequestError,
    },
    /// An answer with no matching pending request was discarded
    UnknownCorrelation {
        node: NodeId,
        from: NodeId,
        message: OverlayMessage,
    },
    /// A request already pending or recently answered here was discarded
    DuplicateRequest {
        node: NodeId,
        from: NodeId,
        request_id: RequestId,
    },
    MalformedFrame {
        node: NodeId,
        from: NodeId,
        reason: String,
    },
    SendFailed {
        node: NodeId,
        to: NodeId,
        request_id: RequestId,
        reason: String,
    },
    RequestTimedOut {
        node: NodeId,
        request_id: RequestId,
    },
    /// A forwarded request was never answered
    CorrelationExpired {
        node: NodeId,
        request_id: RequestId,
        origin: NodeId,
    },
}

impl OverlayEvent {
    /// Node that emitted the event
    pub fn node(&self) -> &NodeId {
        match self {
            OverlayEvent::RequestReceived { node, .. }
            | OverlayEvent::RequestFiltered { node, .. }
            | OverlayEvent::RequestSent { node, .. }
            | OverlayEvent::ResponseReceived { node, .. }
            | OverlayEvent::ResponseSent { node, .. }
            | OverlayEvent::RequestErrorReceived { node, .. }
            | OverlayEvent::RequestErrorSent { node, .. }
            | OverlayEvent::UnknownCorrelation { node, .. }
            | OverlayEvent::DuplicateRequest { node, .. }
            | OverlayEvent::MalformedFrame { node, .. }
            | OverlayEvent::SendFailed { node, .. }
            | OverlayEvent::RequestTimedOut { node, .. }
            | OverlayEvent::CorrelationExpired { node, .. } => node,
        }
    }
}

/// Observer callback
pub type EventObserver = Arc<dyn Fn(&OverlayEvent) + Send + Sync>;

/// Ordered list of observers of one node
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<EventObserver>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&OverlayEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    pub fn emit(&self, event: OverlayEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer(&event);
        }
    }
}

/// Recorder of events, shareable across nodes
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<OverlayEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &OverlayEvent) {
        self.events.lock().push(event.clone());
    }

    /// Observer closure that appends to this log
    pub fn observer(&self) -> impl Fn(&OverlayEvent) + Send + Sync + 'static {
        let log = self.clone();
        move |event| log.record(event)
    }

    pub fn events(&self) -> Vec<OverlayEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Requests received by `node`
    pub fn requests_received(&self, node: &str) -> Vec<Request> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                OverlayEvent::RequestReceived { node: n, request, .. } if n.as_str() == node => {
                    Some(request.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Requests of `action` received by `node`
    pub fn requests_received_for(&self, node: &str, action: &Action) -> Vec<Request> {
        self.requests_received(node)
            .into_iter()
            .filter(|request| &request.action == action)
            .collect()
    }

    /// Paths of the responses received by `node`, in arrival order
    pub fn response_paths_at(&self, node: &str) -> Vec<NetworkPath> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                OverlayEvent::ResponseReceived { node: n, response, .. } if n.as_str() == node => {
                    Some(response.network_path.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&OverlayEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
