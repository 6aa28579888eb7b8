//! WebRTC signaling and room-brokering server.
//!
//! Provides a reusable [`SignalingServer`] that can be embedded inside a
//! larger application or run as a standalone binary. Clients connect over
//! WebSocket, are assigned identities, join named rooms (optionally password
//! protected), and exchange SDP offers/answers, ICE candidates, display-name
//! updates, and free-form custom payloads with the other peers in their
//! room. The server never touches media: it is a message relay plus a room
//! membership authority with limits, liveness detection, and
//! targeted/broadcast dispatch.
//!
//! # Example
//!
//! ```rust,no_run
//! use roomcast::{ServerConfig, SignalingServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), roomcast::ServerError> {
//!     let server = SignalingServer::new(ServerConfig::default());
//!     let addr = server.start().await?;
//!     println!("signaling server listening on {addr}");
//!     tokio::signal::ctrl_c().await.ok();
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod protocol;
pub mod room;
mod server;
pub mod validate;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

pub use config::{AcceptorSource, Limits, ServerConfig};
pub use error::{PeerError, RoomError, ServerError};
pub use events::{EventBus, ListenerId, ServerEvent};
pub use protocol::{ClientMessage, ServerMessage};
pub use validate::{ValidationCode, ValidationError};

use server::{accept_loop, liveness_loop, ServerState};

struct Running {
    accept_task: JoinHandle<()>,
    ticker_task: JoinHandle<()>,
}

/// A WebSocket signaling server with an explicit start/stop lifecycle.
///
/// The server owns the registry of connected peers and non-empty rooms, and
/// publishes lifecycle notifications on its [`EventBus`].
pub struct SignalingServer {
    state: Arc<ServerState>,
    acceptor: StdMutex<Option<AcceptorSource>>,
    running: tokio::sync::Mutex<Option<Running>>,
    local_addr: StdMutex<Option<SocketAddr>>,
}

impl SignalingServer {
    /// Create a server from the given configuration. Nothing is bound until
    /// [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        let ServerConfig {
            acceptor,
            path,
            limits,
            require_room_password,
            ice_servers,
            ping_interval,
        } = config;
        Self {
            state: Arc::new(ServerState::new(
                path,
                limits,
                require_room_password,
                ice_servers,
                ping_interval,
            )),
            acceptor: StdMutex::new(Some(acceptor)),
            running: tokio::sync::Mutex::new(None),
            local_addr: StdMutex::new(None),
        }
    }

    /// Bind (or adopt) the listener, spawn the acceptor and the liveness
    /// ticker, and emit [`ServerEvent::ServerStarted`]. Resolves with the
    /// bound address once the server is listening.
    ///
    /// Fails with [`ServerError::AlreadyRunning`] if called twice without an
    /// intervening [`stop`](Self::stop).
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let source = self
            .lock_acceptor()
            .take()
            .ok_or(ServerError::AcceptorUnavailable)?;
        let listener = match source {
            AcceptorSource::Bind { host, port } => {
                let listener = TcpListener::bind((host.as_str(), port)).await?;
                // Bound addresses can be reused by a later restart.
                *self.lock_acceptor() = Some(AcceptorSource::Bind { host, port });
                listener
            }
            AcceptorSource::Listener(std_listener) => {
                std_listener.set_nonblocking(true)?;
                TcpListener::from_std(std_listener)?
            }
        };
        let addr = listener.local_addr()?;
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(addr);

        self.state.accepting.store(true, Ordering::SeqCst);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&self.state)));
        let ticker_task = tokio::spawn(liveness_loop(Arc::clone(&self.state)));
        *running = Some(Running {
            accept_task,
            ticker_task,
        });

        info!(addr = %addr, "signaling server listening");
        self.state.events.emit(&ServerEvent::ServerStarted { addr });
        Ok(addr)
    }

    /// Stop accepting connections, cancel the liveness ticker, clear both
    /// registries, and emit [`ServerEvent::ServerStopped`].
    ///
    /// Connection tasks that are mid-frame finish naturally; their frames
    /// are dropped because the peers are no longer registered.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut running = self.running.lock().await;
        let Running {
            accept_task,
            ticker_task,
        } = running.take().ok_or(ServerError::NotRunning)?;

        self.state.accepting.store(false, Ordering::SeqCst);
        accept_task.abort();
        ticker_task.abort();

        self.state.peers.clear();
        self.state.rooms.clear();
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        info!("signaling server stopped");
        self.state.events.emit(&ServerEvent::ServerStopped);
        Ok(())
    }

    /// The lifecycle event bus. Useful for embedding: subscribe before
    /// [`start`](Self::start) to observe every event.
    pub fn events(&self) -> &EventBus {
        &self.state.events
    }

    /// The bound address while the server is running. With port 0 this is
    /// where the kernel actually put the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.state.peers.len()
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.state.rooms.len()
    }

    fn lock_acceptor(&self) -> std::sync::MutexGuard<'_, Option<AcceptorSource>> {
        self.acceptor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
