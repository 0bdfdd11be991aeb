//! Inbound message processing
//!
//! Every frame a node receives goes through `NodeInner::dispatch`:
//!
//! 1. decode (framing detected from the frame type)
//! 2. requests: observers, filter chain, then local handling, forwarding,
//!    rejection or drop
//! 3. responses and errors: correlation lookup, then delivery to the local
//!    caller or to the neighbour the request came from
//!
//! Forwarded requests register their correlation entry before they are
//! transmitted and remove it again when the send fails. Entries nobody
//! answered are dropped by the receive loop's periodic sweep.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{self, Frame};
use crate::correlation::{CorrelationKey, Pending};
use crate::envelope::{ErrorCode, OverlayMessage, Request, RequestError, RequestId, Response};
use crate::event::OverlayEvent;
use crate::filter::{FilterContext, ForwardingDecision};
use crate::handler::HandlerError;
use crate::node::NodeInner;
use crate::path::{NetworkPath, NodeId};
use crate::routing::{Destination, Resolution};
use crate::transport::Inbound;

impl NodeInner {
    pub(crate) async fn dispatch(self: Arc<Self>, inbound: Inbound) {
        let Inbound { from, frame } = inbound;

        let message = match codec::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("{}: malformed frame from {}: {}", self.id(), from, e);
                self.emit(OverlayEvent::MalformedFrame {
                    node: self.id().clone(),
                    from: from.clone(),
                    reason: e.to_string(),
                });
                self.reject_malformed(&from, &frame, e.to_string()).await;
                return;
            }
        };

        // Plain OCPP-J peers send no path; the neighbour is the originator
        let message = if message.network_path().is_empty() {
            message.with_hop(&from)
        } else {
            message
        };

        match message {
            OverlayMessage::Request(request) => self.handle_request(from, request).await,
            answer => self.handle_answer(from, answer).await,
        }
    }

    async fn handle_request(self: &Arc<Self>, from: NodeId, request: Request) {
        let verification = self
            .signing
            .read()
            .verify(&OverlayMessage::Request(request.clone()));

        info!(
            "{}: received {} {} from {} path {}",
            self.id(),
            request.action,
            request.request_id,
            from,
            request.network_path
        );
        self.emit(OverlayEvent::RequestReceived {
            node: self.id().clone(),
            from: from.clone(),
            request: request.clone(),
            verification,
        });

        if request.network_path.contains(self.id()) {
            warn!("{}: routing loop for {} via {}", self.id(), request.request_id, request.network_path);
            let error = RequestError::for_request(
                &request,
                ErrorCode::NetworkError,
                format!("Routing loop: {} already visited {}", request.network_path, self.id()),
            );
            self.send_error(&from, error).await;
            return;
        }

        let ctx = FilterContext {
            node_id: self.id().clone(),
            sender: from.clone(),
            sender_role: self.neighbors.read().get(&from).and_then(|n| n.role),
        };
        let decision = self.filters.read().decide(&ctx, &request);
        debug!("{}: {} {} -> {}", self.id(), request.action, request.request_id, decision);
        self.emit(OverlayEvent::RequestFiltered {
            node: self.id().clone(),
            request: request.clone(),
            decision: decision.clone(),
        });

        match decision {
            ForwardingDecision::Drop => {
                info!("{}: dropped {} {}", self.id(), request.action, request.request_id);
            }
            ForwardingDecision::Reject { code, description } => {
                let error = RequestError::for_request(&request, code, description);
                self.send_error(&from, error).await;
            }
            ForwardingDecision::ForwardTo(target) => {
                info!("{}: redirecting {} to {}", self.id(), request.request_id, target);
                let mut request = request;
                request.destination = Destination::to(target);
                self.route_request(from, request).await;
            }
            ForwardingDecision::Forward | ForwardingDecision::Next => {
                self.route_request(from, request).await;
            }
        }
    }

    async fn route_request(self: &Arc<Self>, from: NodeId, mut request: Request) {
        let resolution = self.routes.read().resolve_destination(&request.destination);

        match resolution {
            Ok(Resolution::Local) => self.answer_locally(from, request).await,
            Ok(Resolution::Forward { next_hop, destination }) => {
                if !self.capabilities.can_forward {
                    let error = RequestError::for_request(
                        &request,
                        ErrorCode::NetworkError,
                        format!("{} does not forward requests for {}", self.id(), request.destination),
                    );
                    self.send_error(&from, error).await;
                    return;
                }
                if next_hop == from {
                    let error = RequestError::for_request(
                        &request,
                        ErrorCode::NetworkError,
                        format!("No route to {} beyond {}", request.destination, from),
                    );
                    self.send_error(&from, error).await;
                    return;
                }
                request.destination = destination;
                self.forward_request(from, next_hop, request).await;
            }
            Err(e) => {
                warn!("{}: cannot route {}: {}", self.id(), request.request_id, e);
                let error = RequestError::for_request(&request, e.error_code(), e.to_string());
                self.send_error(&from, error).await;
            }
        }
    }

    async fn forward_request(self: &Arc<Self>, from: NodeId, next_hop: NodeId, request: Request) {
        let key = request_key(&request, &from);
        let Some(generation) =
            self.correlation
                .register_forwarded(key.clone(), from.clone(), self.config.forward_timeout)
        else {
            self.report_duplicate(&from, &request.request_id);
            return;
        };

        let message = OverlayMessage::Request(request);
        match self.send_message(&next_hop, &message).await {
            Ok(OverlayMessage::Request(sent)) => {
                debug!("{}: forwarded {} to {}", self.id(), sent.request_id, next_hop);
                self.emit(OverlayEvent::RequestSent {
                    node: self.id().clone(),
                    to: next_hop,
                    request: sent,
                });
            }
            Ok(_) => {}
            Err(e) => {
                self.correlation.cancel(&key, generation);
                warn!("{}: failed to forward {} to {}: {}", self.id(), key, next_hop, e);
                self.emit(OverlayEvent::SendFailed {
                    node: self.id().clone(),
                    to: next_hop.clone(),
                    request_id: key.request_id.clone(),
                    reason: e.to_string(),
                });
                if let OverlayMessage::Request(request) = &message {
                    let error = RequestError::for_request(
                        request,
                        ErrorCode::NetworkError,
                        format!("{} could not reach {}: {}", self.id(), next_hop, e),
                    );
                    self.send_error(&from, error).await;
                }
            }
        }
    }

    /// Drop forwarded entries whose answer did not arrive in time
    pub(crate) fn expire_forwarded(&self) {
        for (key, origin) in self.correlation.expire_due(Instant::now()) {
            warn!("{}: forwarded request {} expired unanswered", self.id(), key);
            self.emit(OverlayEvent::CorrelationExpired {
                node: self.id().clone(),
                request_id: key.request_id,
                origin,
            });
        }
    }

    async fn answer_locally(self: &Arc<Self>, from: NodeId, request: Request) {
        let key = request_key(&request, &from);
        if !self.correlation.claim_local_answer(&key) {
            self.report_duplicate(&from, &request.request_id);
            return;
        }

        let handler = self.handlers.read().get(&request.action).cloned();
        let result = match handler {
            Some(handler) => handler.handle(&request).await,
            None => Err(HandlerError::new(
                ErrorCode::NotImplemented,
                format!("{} has no handler for {}", self.id(), request.action),
            )),
        };

        match result {
            Ok(payload) => {
                let response = Response::for_request(&request, payload);
                self.send_answer(&from, OverlayMessage::Response(response)).await;
            }
            Err(e) => {
                debug!("{}: {} answered with {}", self.id(), request.request_id, e.code);
                let error = RequestError::for_request(&request, e.code, e.description)
                    .with_details(e.details);
                self.send_error(&from, error).await;
            }
        }
    }

    async fn handle_answer(self: &Arc<Self>, from: NodeId, answer: OverlayMessage) {
        match &answer {
            OverlayMessage::Response(response) => self.emit(OverlayEvent::ResponseReceived {
                node: self.id().clone(),
                from: from.clone(),
                response: response.clone(),
            }),
            OverlayMessage::Error(error) => self.emit(OverlayEvent::RequestErrorReceived {
                node: self.id().clone(),
                from: from.clone(),
                error: error.clone(),
            }),
            OverlayMessage::Request(_) => {}
        }

        let key = self.answer_key(&answer);
        match self.correlation.complete(&key) {
            Some(Pending::Local { caller, .. }) => {
                debug!("{}: {} answered via {}", self.id(), key, answer.network_path());
                if caller.send(answer).is_err() {
                    debug!("{}: caller for {} is gone", self.id(), key);
                }
            }
            Some(Pending::Forwarded { origin, .. }) => {
                debug!("{}: relaying {} for {} to {}", self.id(), answer.kind(), key, origin);
                self.send_answer(&origin, answer).await;
            }
            None => {
                warn!("{}: no pending request for {} {} from {}", self.id(), answer.kind(), key, from);
                self.emit(OverlayEvent::UnknownCorrelation {
                    node: self.id().clone(),
                    from,
                    message: answer,
                });
            }
        }
    }

    /// Answers addressed to the logical CSMS belong to this node's CSMS
    fn answer_key(&self, answer: &OverlayMessage) -> CorrelationKey {
        let mut key = CorrelationKey::for_answer(answer);
        if key.originator.is_csms() {
            if let Ok(csms) = self.routes.read().resolve_csms() {
                key.originator = csms;
            }
        }
        key
    }

    async fn send_error(self: &Arc<Self>, to: &NodeId, error: RequestError) {
        self.send_answer(to, OverlayMessage::Error(error)).await;
    }

    async fn send_answer(self: &Arc<Self>, to: &NodeId, answer: OverlayMessage) {
        match self.send_message(to, &answer).await {
            Ok(OverlayMessage::Response(response)) => self.emit(OverlayEvent::ResponseSent {
                node: self.id().clone(),
                to: to.clone(),
                response,
            }),
            Ok(OverlayMessage::Error(error)) => {
                info!(
                    "{}: sent {} for {} to {}",
                    self.id(),
                    error.error_code,
                    error.request_id,
                    to
                );
                self.emit(OverlayEvent::RequestErrorSent {
                    node: self.id().clone(),
                    to: to.clone(),
                    error,
                })
            }
            Ok(OverlayMessage::Request(_)) => {}
            Err(e) => {
                warn!("{}: failed to send {} to {}: {}", self.id(), answer.kind(), to, e);
                self.emit(OverlayEvent::SendFailed {
                    node: self.id().clone(),
                    to: to.clone(),
                    request_id: answer.request_id().clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Answer an undecodable request frame with `FormatViolation`
    async fn reject_malformed(self: &Arc<Self>, from: &NodeId, frame: &Frame, reason: String) {
        let Some(request_id) = codec::peek_request_id(frame) else {
            return;
        };
        let error = RequestError {
            request_id,
            destination: Destination::Node(from.clone()),
            network_path: NetworkPath::empty(),
            error_code: ErrorCode::FormatViolation,
            error_description: reason,
            error_details: serde_json::Value::Object(serde_json::Map::new()),
        };
        self.send_error(from, error).await;
    }

    fn report_duplicate(&self, from: &NodeId, request_id: &RequestId) {
        info!("{}: duplicate request {} from {}", self.id(), request_id, from);
        self.emit(OverlayEvent::DuplicateRequest {
            node: self.id().clone(),
            from: from.clone(),
            request_id: request_id.clone(),
        });
    }
}

fn request_key(request: &Request, from: &NodeId) -> CorrelationKey {
    CorrelationKey::for_request(request)
        .unwrap_or_else(|| CorrelationKey::new(from.clone(), request.request_id.clone()))
}
