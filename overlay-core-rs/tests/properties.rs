//! Property tests for path accumulation and format transparency
//!
//! - Append-only paths: every hop adds exactly itself
//! - Requests arrive carrying every hop they crossed, in order
//! - Payloads survive any mix of JSON and binary links unchanged

use overlay_core::transport::memory;
use overlay_core::{
    Action, Destination, EventLog, HandlerError, NetworkPath, NodeConfig, NodeId, NodeRole,
    OverlayNode, Payload, Request, WireFormat,
};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

fn node_id() -> impl Strategy<Value = NodeId> {
    "[a-z]{1,6}[0-9]{0,2}".prop_map(NodeId::from)
}

fn wire_format() -> impl Strategy<Value = WireFormat> {
    prop_oneof![Just(WireFormat::Json), Just(WireFormat::Binary)]
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,16}".prop_map(Value::String),
    ]
}

fn json_document() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-zA-Z]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        json_document().prop_map(Payload::Json),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(|bytes| Payload::binary(bytes)),
    ]
}

// ============================================================================
// Topology
// ============================================================================

/// station -> gw0 -> ... -> gwN -> csms, one format per link
fn line(formats: &[WireFormat], log: &EventLog) -> (OverlayNode, Vec<OverlayNode>) {
    let mut nodes = vec![OverlayNode::new(NodeConfig::new("station", NodeRole::ChargingStation))];
    for i in 0..formats.len() - 1 {
        nodes.push(OverlayNode::new(NodeConfig::new(format!("gw{}", i), NodeRole::Gateway)));
    }
    nodes.push(OverlayNode::new(NodeConfig::new("csms", NodeRole::Csms)));

    for (pair, format) in nodes.windows(2).zip(formats) {
        memory::connect_upstream(&pair[0], &pair[1], *format);
    }
    for node in &nodes {
        node.on_event(log.observer());
        node.start();
    }

    let csms = nodes[nodes.len() - 1].clone();
    csms.handle_fn(Action::DataTransfer, |request: Request| async move {
        Ok::<_, HandlerError>(request.payload)
    });

    (nodes[0].clone(), nodes)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn append_adds_exactly_one_hop(
        hops in prop::collection::vec(node_id(), 0..8),
        next in node_id()
    ) {
        let path = NetworkPath::from(hops.clone());
        let extended = path.append(next.clone());

        prop_assert_eq!(extended.len(), path.len() + 1);
        prop_assert_eq!(extended.last(), Some(&next));
        prop_assert_eq!(&extended.hops()[..hops.len()], &hops[..]);
        prop_assert_eq!(path.hops(), &hops[..]);
        prop_assert_eq!(extended.source(), hops.first().or(Some(&next)));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn request_path_lists_every_hop(formats in prop::collection::vec(wire_format(), 1..6)) {
        let log = EventLog::new();
        let nodes = runtime().block_on(async {
            let (station, nodes) = line(&formats, &log);
            station
                .request(Destination::Csms, Action::DataTransfer, Payload::empty())
                .await
                .map(|_| nodes)
        }).unwrap();

        let expected: Vec<NodeId> = nodes[..nodes.len() - 1].iter().map(|n| n.id().clone()).collect();
        let received = log.requests_received("csms");
        prop_assert_eq!(received.len(), 1);
        prop_assert_eq!(received[0].network_path.hops(), &expected[..]);
    }

    #[test]
    fn payload_survives_mixed_links(
        formats in prop::collection::vec(wire_format(), 1..5),
        payload in payload()
    ) {
        let log = EventLog::new();
        let response = runtime().block_on(async {
            let (station, _nodes) = line(&formats, &log);
            station
                .request(Destination::Csms, Action::DataTransfer, payload.clone())
                .await
        }).unwrap();

        let received = log.requests_received("csms");
        prop_assert_eq!(&received[0].payload, &payload);
        prop_assert_eq!(&response.payload, &payload);
    }
}
