//! Station-facing OCPP-J WebSocket server
//!
//! One task per station connection. Each connection has a sender task
//! draining its outgoing queue onto the socket, and a receive loop that
//! answers inbound calls one at a time, so a station's messages are handled
//! in arrival order. Replies to our own calls are routed to the connection
//! registry.

use std::net::SocketAddr;
use std::sync::Arc;

use csms_core::DecisionEngine;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig,
        Message,
    },
};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::ocpp::*;
use crate::router::{Router, StationContext};

/// Central system endpoint stations connect to
pub struct CentralServer {
    config: Arc<ServerConfig>,
    connections: Arc<ConnectionRegistry>,
    router: Arc<Router>,
}

impl CentralServer {
    pub fn new(
        config: ServerConfig,
        engine: Arc<DecisionEngine>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connections,
            router: Arc::new(Router::new(engine)),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Bind the configured address and serve forever
    pub async fn run(&self) -> Result<(), OcppError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept stations on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<(), OcppError> {
        info!(
            "Listening for stations on ws://{}{}/{{stationId}}",
            listener.local_addr()?,
            self.config.path
        );

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("TCP connection from {}", peer);

            let config = self.config.clone();
            let connections = self.connections.clone();
            let router = self.router.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, config, connections, router).await {
                    warn!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

/// Station id from a request path `<prefix>/<stationId>`
pub fn station_id_from_path(path: &str, prefix: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix.trim_end_matches('/'))?;
    let station_id = rest.strip_prefix('/')?.trim_end_matches('/');

    if station_id.is_empty() || station_id.contains('/') {
        None
    } else {
        Some(station_id.to_string())
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    connections: Arc<ConnectionRegistry>,
    router: Arc<Router>,
) -> Result<(), OcppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_frame_size),
        ..Default::default()
    };

    let mut station_id = None;
    let ws_stream = accept_hdr_async_with_config(
        stream,
        |request: &Request, mut response: Response| {
            let Some(id) = station_id_from_path(request.uri().path(), &config.path) else {
                warn!("Rejecting {}: unexpected path {}", peer, request.uri().path());
                return Err(reject(StatusCode::NOT_FOUND, "unknown endpoint"));
            };

            let offered = request
                .headers()
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            if offered.split(',').any(|p| p.trim() == config.subprotocol) {
                if let Ok(value) = HeaderValue::from_str(&config.subprotocol) {
                    response
                        .headers_mut()
                        .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
                }
            } else {
                warn!(
                    "{} did not offer {} subprotocol, got: {:?}",
                    id, config.subprotocol, offered
                );
            }

            station_id = Some(id);
            Ok(response)
        },
        Some(ws_config),
    )
    .await?;

    let Some(station_id) = station_id else {
        return Err(OcppError::InvalidFormat);
    };

    let ctx = StationContext {
        station_id: station_id.clone(),
        endpoint_address: peer.to_string(),
    };

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OcppMessage>(config.outgoing_queue);

    // Spawn sender task
    let sender_station = station_id.clone();
    let sender_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match msg.to_text() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            debug!("Sending to {}: {}", sender_station, text);

            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                error!("Failed to send to {}: {}", sender_station, e);
                break;
            }
        }
    });

    let connection = connections.register(station_id.clone(), out_tx.clone());

    // Main receive loop
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                debug!("Received from {}: {}", station_id, text);

                let reply = match OcppMessage::parse(text.as_bytes()) {
                    Ok(OcppMessage::Call(call)) => Some(router.handle_call(&ctx, call)),
                    Ok(OcppMessage::CallResult(result)) => {
                        connection.complete_result(result);
                        None
                    }
                    Ok(OcppMessage::CallError(error)) => {
                        connection.complete_error(error);
                        None
                    }
                    Err(OcppError::UnknownAction {
                        message_id: Some(message_id),
                        action,
                    }) => {
                        warn!("{} sent unsupported action {}", station_id, action);
                        Some(OcppMessage::CallError(CallError::new(
                            message_id,
                            ErrorCode::NotImplemented,
                            format!("Unknown action {}", action),
                        )))
                    }
                    Err(e) => {
                        warn!("Failed to parse OCPP message from {}: {}", station_id, e);
                        None
                    }
                };

                if let Some(reply) = reply {
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("{} closed the connection", station_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                // Pong is queued by tungstenite
                debug!("Ping from {}", station_id);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error from {}: {}", station_id, e);
                break;
            }
        }
    }

    connections.unregister(&station_id, connection.id());
    sender_handle.abort();
    Ok(())
}
