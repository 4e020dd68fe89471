//! Configuration for the station-facing WebSocket server

use std::net::SocketAddr;

/// OCPP-J server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: SocketAddr,

    /// URL path prefix; the station id is the segment after it
    pub path: String,

    /// WebSocket subprotocol offered back to stations
    pub subprotocol: String,

    /// Largest accepted WebSocket message
    pub max_message_size: usize,

    /// Largest accepted WebSocket frame
    pub max_frame_size: usize,

    /// Outgoing frames buffered per connection
    pub outgoing_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8180)),
            path: "/steve/websocket/CentralSystemService".to_string(),
            subprotocol: "ocpp1.6".to_string(),
            max_message_size: 128 * 1024,
            max_frame_size: 64 * 1024,
            outgoing_queue: 64,
        }
    }
}

impl ServerConfig {
    /// Create config listening on `bind_addr`
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set URL path prefix
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set accepted subprotocol
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }

    /// Set outgoing frame buffer per connection
    pub fn with_outgoing_queue(mut self, frames: usize) -> Self {
        self.outgoing_queue = frames;
        self
    }

    /// Set message and frame size limits
    pub fn with_size_limits(mut self, max_message: usize, max_frame: usize) -> Self {
        self.max_message_size = max_message;
        self.max_frame_size = max_frame;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new("127.0.0.1:9000".parse().unwrap())
            .with_path("/ocpp")
            .with_subprotocol("ocpp1.5")
            .with_outgoing_queue(8)
            .with_size_limits(1024, 512);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.path, "/ocpp");
        assert_eq!(config.subprotocol, "ocpp1.5");
        assert_eq!(config.max_frame_size, 512);
        assert_eq!(config.outgoing_queue, 8);
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8180);
        assert_eq!(config.path, "/steve/websocket/CentralSystemService");
        assert_eq!(config.subprotocol, "ocpp1.6");
        assert_eq!(config.outgoing_queue, 64);
    }
}
