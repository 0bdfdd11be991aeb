//! WebSocket links between overlay nodes
//!
//! A downstream node dials its upstream at `{url}/{own id}?role={role}`.
//! The subprotocol picks the framing: `ocpp2.0.1` for JSON frames,
//! `overlay.binary.v1` for binary frames. The accepting side answers with
//! its own id and role in `X-Overlay-Node` / `X-Overlay-Role`.
//!
//! Roles configured in `WsConfig::neighbor_roles` override whatever a peer
//! declares. Once the handshake completes both sides register the other as a
//! neighbour; frames read from the socket go to the node's inbox and the
//! neighbour is removed again when the socket closes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use overlay_core::{Frame, Inbound, Link, NodeId, NodeRole, OverlayError, OverlayNode, WireFormat};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async_with_config, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::{UpstreamConfig, WsConfig};

/// OCPP 2.0.1 WebSocket subprotocol, JSON framing
pub const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

/// Overlay binary framing subprotocol
pub const BINARY_SUBPROTOCOL: &str = "overlay.binary.v1";

const NODE_HEADER: &str = "x-overlay-node";
const ROLE_HEADER: &str = "x-overlay-role";

/// WebSocket link errors
#[derive(Debug, Error)]
pub enum WsError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Upstream did not identify itself")]
    UnknownPeer,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn subprotocol(format: WireFormat) -> &'static str {
    match format {
        WireFormat::Json => OCPP_SUBPROTOCOL,
        WireFormat::Binary => BINARY_SUBPROTOCOL,
    }
}

fn ws_config(config: &WsConfig) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_frame_size),
        ..Default::default()
    }
}

/// Build the URL a node dials its upstream on
pub fn build_overlay_url(base_url: &str, node_id: &NodeId, role: NodeRole) -> String {
    format!("{}/{}?role={}", base_url.trim_end_matches('/'), node_id, role)
}

/// Role to register a neighbour with: the configured one if any, else the
/// one it declared
fn neighbor_role(ws: &WsConfig, peer: &NodeId, declared: Option<NodeRole>) -> Option<NodeRole> {
    match (ws.neighbor_roles.get(peer).copied(), declared) {
        (Some(configured), Some(declared)) if configured != declared => {
            warn!("{} declared itself {}, using configured role {}", peer, declared, configured);
            Some(configured)
        }
        (Some(configured), _) => Some(configured),
        (None, declared) => declared,
    }
}

// ============================================================================
// Link
// ============================================================================

/// Outbound half of a WebSocket connection
pub struct WsLink {
    peer: NodeId,
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl Link for WsLink {
    fn peer(&self) -> &NodeId {
        &self.peer
    }

    async fn send(&self, frame: Frame) -> Result<(), OverlayError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.to_vec().into()),
        };
        self.tx.send(message).await.map_err(|_| OverlayError::SendFailed {
            to: self.peer.clone(),
            reason: "websocket closed".to_string(),
        })
    }
}

/// Register `peer` on `node` and pump frames until the socket closes
async fn drive<S>(
    node: &OverlayNode,
    peer: NodeId,
    role: Option<NodeRole>,
    format: WireFormat,
    ws_stream: WebSocketStream<S>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Message>(64);

    let writer_peer = peer.clone();
    let sender_handle = tokio::spawn(async move {
        while let Some(message) = send_rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                error!("Failed to send to {}: {}", writer_peer, e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    node.add_neighbor(
        Arc::new(WsLink {
            peer: peer.clone(),
            tx: send_tx,
        }),
        role,
        format,
    );
    info!("{}: link to {} up ({:?})", node.id(), peer, format);

    let inbox = node.inbox();
    while let Some(message) = ws_rx.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => Frame::Text(text.to_string()),
            Ok(Message::Binary(data)) => Frame::Binary(Bytes::from(data)),
            Ok(Message::Close(_)) => {
                info!("{}: {} closed the link", node.id(), peer);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("{}: link to {} failed: {}", node.id(), peer, e);
                break;
            }
        };
        debug!("{}: {} byte frame from {}", node.id(), frame.len(), peer);

        let inbound = Inbound {
            from: peer.clone(),
            frame,
        };
        if inbox.send(inbound).await.is_err() {
            debug!("{}: inbox closed, dropping link to {}", node.id(), peer);
            break;
        }
    }

    node.remove_neighbor(&peer);
    sender_handle.abort();
}

// ============================================================================
// Client
// ============================================================================

/// Keeps the link to the upstream neighbour alive
pub struct WsClient {
    node: OverlayNode,
    upstream: UpstreamConfig,
    ws: WsConfig,
}

impl WsClient {
    pub fn new(node: OverlayNode, upstream: UpstreamConfig, ws: WsConfig) -> Self {
        Self { node, upstream, ws }
    }

    /// Run the connection loop, reconnecting with exponential backoff
    pub async fn run(self) {
        let mut reconnect_delay = self.upstream.reconnect_delay;

        loop {
            info!("{}: connecting to {}", self.node.id(), self.upstream.url);

            match self.connect_and_run().await {
                Ok(()) => {
                    info!("{}: upstream link closed", self.node.id());
                    reconnect_delay = self.upstream.reconnect_delay;
                }
                Err(e) => {
                    error!("{}: upstream connection error: {}", self.node.id(), e);
                }
            }

            info!("Reconnecting in {:?}", reconnect_delay);
            tokio::time::sleep(reconnect_delay).await;
            reconnect_delay = std::cmp::min(reconnect_delay * 2, self.upstream.max_reconnect_delay);
        }
    }

    /// Connect once and run until disconnection
    pub async fn connect_and_run(&self) -> Result<(), WsError> {
        let (peer, role, format, ws_stream) = self.connect().await?;
        if self.upstream.default_route {
            self.node.set_default_route(peer.clone());
        }
        drive(&self.node, peer, role, format, ws_stream).await;
        Ok(())
    }

    async fn connect(
        &self,
    ) -> Result<
        (
            NodeId,
            Option<NodeRole>,
            WireFormat,
            WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
        ),
        WsError,
    > {
        let url = build_overlay_url(&self.upstream.url, self.node.id(), self.node.role());
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| WsError::InvalidUrl(e.to_string()))?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(subprotocol(self.upstream.format)),
        );

        let (ws_stream, response) =
            connect_async_with_config(request, Some(ws_config(&self.ws)), false)
                .await
                .map_err(|e| WsError::Connect(e.to_string()))?;

        let header_str = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let format = match header_str(header::SEC_WEBSOCKET_PROTOCOL.as_str()).as_deref() {
            Some(BINARY_SUBPROTOCOL) => WireFormat::Binary,
            Some(OCPP_SUBPROTOCOL) => WireFormat::Json,
            other => {
                warn!("Upstream did not accept a known subprotocol, got: {:?}", other);
                WireFormat::Json
            }
        };
        if format != self.upstream.format {
            warn!(
                "{}: asked for {:?} framing, upstream chose {:?}",
                self.node.id(),
                self.upstream.format,
                format
            );
        }

        let peer = self
            .upstream
            .node_id
            .clone()
            .or_else(|| header_str(NODE_HEADER).map(NodeId::from))
            .ok_or(WsError::UnknownPeer)?;
        let declared = header_str(ROLE_HEADER).and_then(|r| r.parse().ok());
        let role = self
            .upstream
            .role
            .or_else(|| neighbor_role(&self.ws, &peer, declared));

        info!("{}: connected to {} at {}", self.node.id(), peer, url);
        Ok((peer, role, format, ws_stream))
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Who dialled in, as announced in the handshake
#[derive(Debug, Clone)]
struct Handshake {
    peer: NodeId,
    role: Option<NodeRole>,
    format: WireFormat,
}

/// Accepts downstream neighbours
pub struct WsListener {
    node: OverlayNode,
    listener: TcpListener,
    ws: WsConfig,
}

impl WsListener {
    pub async fn bind(node: OverlayNode, addr: SocketAddr, ws: WsConfig) -> Result<Self, WsError> {
        let listener = TcpListener::bind(addr).await?;
        info!("{}: listening on {}", node.id(), listener.local_addr()?);
        Ok(Self { node, listener, ws })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WsError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> Result<(), WsError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("{}: connection from {}", self.node.id(), addr);

            let node = self.node.clone();
            let ws = self.ws.clone();
            tokio::spawn(async move {
                if let Err(e) = accept(node, stream, &ws).await {
                    warn!("Handshake with {} failed: {}", addr, e);
                }
            });
        }
    }
}

async fn accept(node: OverlayNode, stream: TcpStream, ws: &WsConfig) -> Result<(), WsError> {
    let mut handshake = None;
    let local_id = node.id().clone();
    let local_role = node.role();

    let callback = |request: &Request, mut response: Response| {
        let parsed = parse_handshake(request)?;
        let headers = response.headers_mut();
        if let Some(protocol) = parsed.1 {
            headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(protocol));
        }
        if let Ok(value) = HeaderValue::from_str(local_id.as_str()) {
            headers.insert(NODE_HEADER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&local_role.to_string()) {
            headers.insert(ROLE_HEADER, value);
        }
        handshake = Some(parsed.0);
        Ok(response)
    };

    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(ws_config(ws)))
        .await
        .map_err(|e| WsError::Connect(e.to_string()))?;
    let handshake = handshake.ok_or(WsError::UnknownPeer)?;

    let role = neighbor_role(ws, &handshake.peer, handshake.role);
    drive(&node, handshake.peer, role, handshake.format, ws_stream).await;
    Ok(())
}

/// Read the peer id, role and requested framing from the upgrade request
fn parse_handshake(request: &Request) -> Result<(Handshake, Option<&'static str>), ErrorResponse> {
    let peer = request
        .uri()
        .path()
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(NodeId::from)
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "missing node id in path"))?;

    let role = match request
        .uri()
        .query()
        .into_iter()
        .flat_map(|query| query.split('&'))
        .find_map(|pair| pair.strip_prefix("role="))
    {
        Some(role) => Some(
            role.parse::<NodeRole>()
                .map_err(|e| reject(StatusCode::BAD_REQUEST, &e))?,
        ),
        None => None,
    };

    let offered: Vec<&str> = request
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .collect();

    let (format, protocol) = if offered.contains(&BINARY_SUBPROTOCOL) {
        (WireFormat::Binary, Some(BINARY_SUBPROTOCOL))
    } else if offered.contains(&OCPP_SUBPROTOCOL) {
        (WireFormat::Json, Some(OCPP_SUBPROTOCOL))
    } else if offered.is_empty() {
        (WireFormat::Json, None)
    } else {
        return Err(reject(StatusCode::BAD_REQUEST, "no supported subprotocol"));
    };

    Ok((Handshake { peer, role, format }, protocol))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade(uri: &str, protocols: Option<&str>) -> Request {
        let mut request = Request::new(());
        *request.uri_mut() = uri.parse().unwrap();
        if let Some(protocols) = protocols {
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(protocols).unwrap());
        }
        request
    }

    #[test]
    fn test_link_fails_once_socket_is_gone() {
        let (tx, mut rx) = mpsc::channel(4);
        let link = WsLink {
            peer: "gw".into(),
            tx,
        };

        tokio_test::block_on(link.send(Frame::Binary(Bytes::from_static(&[0x4f, 0x4f])))).unwrap();
        assert!(matches!(rx.try_recv(), Ok(Message::Binary(data)) if data.len() == 2));

        drop(rx);
        let err = tokio_test::block_on(link.send(Frame::Text("{}".into()))).unwrap_err();
        assert!(matches!(err, OverlayError::SendFailed { .. }));
    }

    #[test]
    fn test_build_overlay_url() {
        let url = build_overlay_url("ws://gw.local:9000/overlay/", &"lc-1".into(), NodeRole::LocalController);
        assert_eq!(url, "ws://gw.local:9000/overlay/lc-1?role=localController");
    }

    #[test]
    fn test_handshake_reads_peer_and_role() {
        let request = upgrade("/overlay/cs1?role=chargingStation", Some("ocpp2.0.1"));
        let (handshake, protocol) = parse_handshake(&request).unwrap();

        assert_eq!(handshake.peer, NodeId::from("cs1"));
        assert_eq!(handshake.role, Some(NodeRole::ChargingStation));
        assert_eq!(handshake.format, WireFormat::Json);
        assert_eq!(protocol, Some(OCPP_SUBPROTOCOL));
    }

    #[test]
    fn test_handshake_prefers_binary() {
        let request = upgrade("/lc-1", Some("ocpp2.0.1, overlay.binary.v1"));
        let (handshake, protocol) = parse_handshake(&request).unwrap();

        assert_eq!(handshake.format, WireFormat::Binary);
        assert_eq!(protocol, Some(BINARY_SUBPROTOCOL));
        assert_eq!(handshake.role, None);
    }

    #[test]
    fn test_configured_role_wins_over_declared() {
        let mut ws = WsConfig::default();
        ws.neighbor_roles.insert("em1".into(), NodeRole::EnergyMeter);

        let em1 = NodeId::from("em1");
        assert_eq!(neighbor_role(&ws, &em1, None), Some(NodeRole::EnergyMeter));
        assert_eq!(
            neighbor_role(&ws, &em1, Some(NodeRole::ChargingStation)),
            Some(NodeRole::EnergyMeter)
        );
        assert_eq!(
            neighbor_role(&ws, &"cs1".into(), Some(NodeRole::ChargingStation)),
            Some(NodeRole::ChargingStation)
        );
        assert_eq!(neighbor_role(&ws, &"cs1".into(), None), None);
    }

    #[test]
    fn test_handshake_rejects_bad_requests() {
        assert!(parse_handshake(&upgrade("/overlay/", None)).is_err());
        assert!(parse_handshake(&upgrade("/cs1?role=toaster", None)).is_err());
        assert!(parse_handshake(&upgrade("/cs1", Some("ocpp1.6"))).is_err());
    }
}
