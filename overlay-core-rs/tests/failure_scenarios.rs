//! Lost, duplicated, unroutable and malformed traffic

mod common;

use std::time::Duration;

use common::{wait_for, Chain};
use overlay_core::{
    Action, Destination, ErrorCode, ForwardingDecision, Frame, Inbound, NetworkPath,
    OverlayError, OverlayEvent, OverlayMessage, Payload, Request, RequestId, Response,
    WireFormat,
};
use serde_json::json;

fn is_error_sent(event: &OverlayEvent, at: &str, code: ErrorCode) -> bool {
    matches!(event, OverlayEvent::RequestErrorSent { node, error, .. }
        if node.as_str() == at && error.error_code == code)
}

#[tokio::test]
async fn test_dropped_request_times_out_and_cleans_up() {
    let chain = Chain::build(WireFormat::Json, |config| {
        config.with_request_timeout(Duration::from_millis(150))
    });
    chain.lc.on_action(Action::Heartbeat, |_, _| ForwardingDecision::Drop);

    let result = chain
        .cs1
        .request(Destination::Csms, Action::Heartbeat, Payload::empty())
        .await;

    assert!(matches!(result, Err(OverlayError::RequestTimeout(_))));
    assert_eq!(chain.cs1.pending_requests(), 0);
    assert!(chain.log.requests_received("gw").is_empty());
    assert_eq!(
        chain.log.count(|event| matches!(event, OverlayEvent::RequestTimedOut { .. })),
        1
    );
}

#[tokio::test]
async fn test_unanswered_forward_entry_expires() {
    let chain = Chain::build(WireFormat::Json, |config| {
        config
            .with_forward_timeout(Duration::from_millis(50))
            .with_request_timeout(Duration::from_millis(600))
    });
    chain.csms.handle_fn(Action::Heartbeat, |_request: Request| async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(Payload::empty())
    });

    let result = chain
        .cs1
        .request(Destination::Csms, Action::Heartbeat, Payload::empty())
        .await;
    assert!(matches!(result, Err(OverlayError::RequestTimeout(_))));

    let expired_at_gw = chain.log.count(|event| {
        matches!(event, OverlayEvent::CorrelationExpired { node, origin, .. }
            if node.as_str() == "gw" && origin.as_str() == "lc")
    });
    assert_eq!(expired_at_gw, 1);

    // The late answer finds nothing to correlate with
    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::UnknownCorrelation { node, .. } if node.as_str() == "gw"))
        .await
    );
    assert_eq!(chain.gw.pending_requests(), 0);
}

#[tokio::test]
async fn test_duplicate_request_is_dropped() {
    let chain = Chain::new();

    let mut request = Request::new(Action::Heartbeat, Payload::empty(), Destination::Csms);
    request.network_path = NetworkPath::from(["cs1"]);
    let message = OverlayMessage::Request(request.clone());

    chain.lc.send_raw(chain.gw.id(), &message).await.unwrap();
    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::ResponseReceived { node, .. } if node.as_str() == "lc"))
        .await
    );

    chain.lc.send_raw(chain.gw.id(), &message).await.unwrap();
    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::DuplicateRequest { node, request_id, .. }
                if node.as_str() == "gw" && *request_id == request.request_id))
        .await
    );
    assert_eq!(chain.log.requests_received("csms").len(), 1);
}

#[tokio::test]
async fn test_reused_request_id_is_refused_at_origin() {
    let chain = Chain::build(WireFormat::Json, |config| {
        config.with_request_timeout(Duration::from_millis(800))
    });
    chain.csms.handle_fn(Action::Heartbeat, |_request: Request| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Payload::empty())
    });

    let mut request = Request::new(Action::Heartbeat, Payload::empty(), Destination::Csms);
    request.request_id = RequestId::from("dup");

    let first = {
        let cs1 = chain.cs1.clone();
        let request = request.clone();
        tokio::spawn(async move { cs1.send_request(request).await })
    };
    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::RequestSent { node, .. } if node.as_str() == "cs1"))
        .await
    );

    let second = chain.cs1.send_request(request.clone()).await;
    assert!(matches!(second, Err(OverlayError::DuplicateRequest(id)) if id.as_str() == "dup"));

    // The request already in flight still gets its answer
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.request_id.as_str(), "dup");
    assert_eq!(chain.log.requests_received("csms").len(), 1);
    assert_eq!(
        chain.log.count(|event| matches!(event, OverlayEvent::UnknownCorrelation { .. })),
        0
    );

    // Answered ids stay reserved while they are remembered
    let again = chain.cs1.send_request(request).await;
    assert!(matches!(again, Err(OverlayError::DuplicateRequest(_))));
    assert_eq!(chain.cs1.pending_requests(), 0);
}

#[tokio::test]
async fn test_duplicate_at_terminal_node_is_dropped() {
    let chain = Chain::new();

    let mut request = Request::new(Action::Heartbeat, Payload::empty(), Destination::Csms);
    request.network_path = NetworkPath::from(["cs1", "lc"]);
    let message = OverlayMessage::Request(request);

    chain.gw.send_raw(chain.csms.id(), &message).await.unwrap();
    chain.gw.send_raw(chain.csms.id(), &message).await.unwrap();

    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::DuplicateRequest { node, .. } if node.as_str() == "csms"))
        .await
    );
    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::ResponseSent { node, .. } if node.as_str() == "csms"))
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        chain.log.count(|event| matches!(event,
            OverlayEvent::ResponseSent { node, .. } if node.as_str() == "csms")),
        1
    );
}

#[tokio::test]
async fn test_unknown_correlation_is_reported_and_dropped() {
    let chain = Chain::new();

    let mut request = Request::new(Action::Heartbeat, Payload::empty(), Destination::Csms);
    request.request_id = RequestId::from("never-sent");
    request.network_path = NetworkPath::from(["cs1"]);
    let stray = OverlayMessage::Response(Response::for_request(&request, Payload::empty()));

    chain.csms.send_raw(chain.gw.id(), &stray).await.unwrap();

    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::UnknownCorrelation { node, message, .. }
                if node.as_str() == "gw" && message.request_id().as_str() == "never-sent"))
        .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(chain.log.response_paths_at("lc").is_empty());
}

#[tokio::test]
async fn test_send_failure_answers_with_network_error() {
    let chain = Chain::new();
    chain.gw_csms.set_connected(false);

    let result = chain
        .cs1
        .request(Destination::Csms, Action::Heartbeat, Payload::empty())
        .await;

    match result {
        Err(OverlayError::Rejected { code, .. }) => assert_eq!(code, ErrorCode::NetworkError),
        other => panic!("expected network error, got {:?}", other),
    }
    assert_eq!(chain.gw.pending_requests(), 0);
    assert_eq!(
        chain.log.count(|event| matches!(event,
            OverlayEvent::SendFailed { node, to, .. } if node.as_str() == "gw" && to.as_str() == "csms")),
        1
    );

    // Link restored, traffic flows again
    chain.gw_csms.set_connected(true);
    chain
        .cs1
        .request(Destination::Csms, Action::Heartbeat, Payload::empty())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_destination_has_no_route() {
    let chain = Chain::new();

    let result = chain
        .cs1
        .request(Destination::to("cs9"), Action::Reset, Payload::empty())
        .await;

    assert!(matches!(
        result,
        Err(OverlayError::Rejected { code: ErrorCode::NetworkError, .. })
    ));
    assert_eq!(
        chain.log.count(|event| is_error_sent(event, "gw", ErrorCode::NetworkError)),
        1
    );
}

#[tokio::test]
async fn test_station_does_not_forward() {
    let chain = Chain::new();

    let mut request = Request::new(Action::Reset, Payload::empty(), Destination::to("cs2"));
    request.network_path = NetworkPath::from(["csms", "gw"]);
    chain
        .lc
        .send_raw(chain.cs1.id(), &OverlayMessage::Request(request))
        .await
        .unwrap();

    assert!(wait_for(&chain.log, |event| is_error_sent(event, "cs1", ErrorCode::NetworkError)).await);
}

#[tokio::test]
async fn test_origination_without_route_fails_locally() {
    let chain = Chain::new();
    chain.gw.remove_neighbor(&"csms".into());

    let result = chain
        .gw
        .request(Destination::Csms, Action::Heartbeat, Payload::empty())
        .await;
    assert!(matches!(result, Err(OverlayError::NoRoute(_))));
    assert_eq!(chain.gw.pending_requests(), 0);
}

#[tokio::test]
async fn test_malformed_request_frame_gets_format_violation() {
    let chain = Chain::new();

    chain
        .gw
        .inbox()
        .send(Inbound {
            from: chain.lc.id().clone(),
            frame: Frame::Text(json!([2, "bad-1"]).to_string()),
        })
        .await
        .unwrap();

    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::MalformedFrame { node, .. } if node.as_str() == "gw"))
        .await
    );
    assert!(wait_for(&chain.log, |event| is_error_sent(event, "gw", ErrorCode::FormatViolation)).await);

    chain
        .gw
        .inbox()
        .send(Inbound {
            from: chain.lc.id().clone(),
            frame: Frame::Text("not json".to_string()),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        chain.log.count(|event| matches!(event, OverlayEvent::MalformedFrame { .. })),
        2
    );
    assert_eq!(
        chain.log.count(|event| is_error_sent(event, "gw", ErrorCode::FormatViolation)),
        1
    );
}

#[tokio::test]
async fn test_plain_ocpp_frame_from_neighbour() {
    let chain = Chain::new();

    chain
        .lc
        .inbox()
        .send(Inbound {
            from: chain.cs1.id().clone(),
            frame: Frame::Text(json!([2, "plain-1", "Heartbeat", {}]).to_string()),
        })
        .await
        .unwrap();

    assert!(
        wait_for(&chain.log, |event| matches!(event,
            OverlayEvent::ResponseReceived { node, response, .. }
                if node.as_str() == "cs1" && response.request_id.as_str() == "plain-1"))
        .await
    );
    let received = chain.log.requests_received("csms");
    assert_eq!(received[0].network_path, NetworkPath::from(["cs1", "lc", "gw"]));
}
