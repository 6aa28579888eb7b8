//! Server configuration.

use std::time::Duration;

use serde_json::{json, Value};

/// Maximum accepted WebSocket payload, in bytes (1 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Interval between liveness pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Where the server gets its TCP listener from. Exactly one source: either
/// an address to bind, or a listener the embedding application already
/// owns.
#[derive(Debug)]
pub enum AcceptorSource {
    /// Bind a fresh listener to `host:port`. Port 0 picks a free port.
    Bind { host: String, port: u16 },
    /// Adopt an existing listener. Consumed by the first `start()`.
    Listener(std::net::TcpListener),
}

impl Default for AcceptorSource {
    fn default() -> Self {
        Self::Bind {
            host: "0.0.0.0".to_string(),
            port: 3001,
        }
    }
}

/// Capacity limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum members per room.
    pub max_peers_per_room: usize,
    /// Maximum concurrent rooms.
    pub max_rooms_per_server: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_peers_per_room: 4,
            max_rooms_per_server: 0,
        }
    }
}

/// Constructor options for [`crate::SignalingServer`].
#[derive(Debug)]
pub struct ServerConfig {
    /// Listener source.
    pub acceptor: AcceptorSource,
    /// Required request path for the WebSocket handshake. `None` accepts
    /// any path.
    pub path: Option<String>,
    /// Capacity limits.
    pub limits: Limits,
    /// Refuse to create rooms without a password.
    pub require_room_password: bool,
    /// ICE server entries advertised in `CONNECTION_ESTABLISHED`. Opaque to
    /// the server; passed through as-is.
    pub ice_servers: Vec<Value>,
    /// Liveness ping cadence. Two missed pongs terminate the peer.
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            acceptor: AcceptorSource::default(),
            path: None,
            limits: Limits::default(),
            require_room_password: false,
            ice_servers: default_ice_servers(),
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

/// The default STUN servers advertised to peers.
pub fn default_ice_servers() -> Vec<Value> {
    vec![
        json!({ "urls": "stun:stun.l.google.com:19302" }),
        json!({ "urls": "stun:stun1.l.google.com:19302" }),
    ]
}
