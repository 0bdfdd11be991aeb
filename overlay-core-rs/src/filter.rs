//! Forwarding decision engine
//!
//! Each node keeps ordered filter chains: one per action plus one for any
//! action. For every inbound request the action chain runs first, then the
//! any-action chain, each filter in registration order. The first verdict
//! that is not `Next` wins; when every filter says `Next` the request is
//! forwarded along the routing table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::envelope::{Action, ErrorCode, Request};
use crate::path::NodeId;
use crate::role::NodeRole;

/// Verdict for one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardingDecision {
    /// Continue towards the request's destination
    Forward,
    /// Continue towards another node instead
    ForwardTo(NodeId),
    /// No opinion; ask the next filter
    Next,
    /// Answer the sender with an error envelope
    Reject {
        code: ErrorCode,
        description: String,
    },
    /// Discard without reply
    Drop,
}

impl ForwardingDecision {
    pub fn reject(code: ErrorCode, description: impl Into<String>) -> Self {
        ForwardingDecision::Reject {
            code,
            description: description.into(),
        }
    }

    pub fn forward_to(node: impl Into<NodeId>) -> Self {
        ForwardingDecision::ForwardTo(node.into())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ForwardingDecision::Next)
    }
}

impl fmt::Display for ForwardingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingDecision::Forward => f.write_str("FORWARD"),
            ForwardingDecision::ForwardTo(node) => write!(f, "FORWARD_TO({})", node),
            ForwardingDecision::Next => f.write_str("NEXT"),
            ForwardingDecision::Reject { code, description } => {
                write!(f, "REJECT({}, {})", code, description)
            }
            ForwardingDecision::Drop => f.write_str("DROP"),
        }
    }
}

/// What a filter knows about where a request came from
#[derive(Debug, Clone)]
pub struct FilterContext {
    /// Node evaluating the request
    pub node_id: NodeId,
    /// Neighbour that delivered the request
    pub sender: NodeId,
    /// Role the sender was registered with, if known
    pub sender_role: Option<NodeRole>,
}

/// A forwarding filter
pub type RequestFilter = Arc<dyn Fn(&FilterContext, &Request) -> ForwardingDecision + Send + Sync>;

/// Ordered filter chains of one node
#[derive(Clone, Default)]
pub struct FilterChain {
    by_action: HashMap<Action, Vec<RequestFilter>>,
    any_action: Vec<RequestFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the chain of `action`
    pub fn on_action<F>(&mut self, action: Action, filter: F)
    where
        F: Fn(&FilterContext, &Request) -> ForwardingDecision + Send + Sync + 'static,
    {
        self.by_action.entry(action).or_default().push(Arc::new(filter));
    }

    /// Append a filter consulted for every action
    pub fn on_any<F>(&mut self, filter: F)
    where
        F: Fn(&FilterContext, &Request) -> ForwardingDecision + Send + Sync + 'static,
    {
        self.any_action.push(Arc::new(filter));
    }

    pub fn len(&self) -> usize {
        self.by_action.values().map(Vec::len).sum::<usize>() + self.any_action.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the chains; never returns `Next`
    pub fn decide(&self, ctx: &FilterContext, request: &Request) -> ForwardingDecision {
        let action_filters = self
            .by_action
            .get(&request.action)
            .into_iter()
            .flatten();

        for filter in action_filters.chain(self.any_action.iter()) {
            let decision = filter(ctx, request);
            if decision.is_terminal() {
                return decision;
            }
        }

        ForwardingDecision::Forward
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actions: Vec<_> = self
            .by_action
            .iter()
            .map(|(action, filters)| (action.as_str(), filters.len()))
            .collect();
        f.debug_struct("FilterChain")
            .field("by_action", &actions)
            .field("any_action", &self.any_action.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Payload;
    use crate::routing::Destination;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(sender: &str) -> FilterContext {
        FilterContext {
            node_id: "gw".into(),
            sender: sender.into(),
            sender_role: None,
        }
    }

    fn request(action: Action) -> Request {
        Request::new(action, Payload::empty(), Destination::Csms)
    }

    #[test]
    fn test_default_is_forward() {
        let chain = FilterChain::new();
        assert_eq!(chain.decide(&ctx("lc"), &request(Action::Heartbeat)), ForwardingDecision::Forward);
    }

    #[test]
    fn test_action_filter_short_circuits_any_filter() {
        let any_calls = Arc::new(AtomicUsize::new(0));
        let counter = any_calls.clone();

        let mut chain = FilterChain::new();
        chain.on_action(Action::BootNotification, |_, _| ForwardingDecision::forward_to("csms2"));
        chain.on_any(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            ForwardingDecision::Drop
        });

        assert_eq!(
            chain.decide(&ctx("lc"), &request(Action::BootNotification)),
            ForwardingDecision::ForwardTo("csms2".into())
        );
        assert_eq!(any_calls.load(Ordering::SeqCst), 0);

        assert_eq!(chain.decide(&ctx("lc"), &request(Action::Heartbeat)), ForwardingDecision::Drop);
        assert_eq!(any_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_order_and_next() {
        let mut chain = FilterChain::new();
        chain.on_action(Action::Authorize, |_, _| ForwardingDecision::Next);
        chain.on_action(Action::Authorize, |ctx, _| {
            if ctx.sender.as_str() == "em1" {
                ForwardingDecision::reject(ErrorCode::SecurityError, "meters may not authorize")
            } else {
                ForwardingDecision::Next
            }
        });
        chain.on_action(Action::Authorize, |_, _| ForwardingDecision::Drop);

        assert!(matches!(
            chain.decide(&ctx("em1"), &request(Action::Authorize)),
            ForwardingDecision::Reject { code: ErrorCode::SecurityError, .. }
        ));
        assert_eq!(chain.decide(&ctx("cs1"), &request(Action::Authorize)), ForwardingDecision::Drop);
        assert_eq!(chain.len(), 3);
    }
}
