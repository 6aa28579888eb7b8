//! Lifecycle event bus.
//!
//! The server publishes a [`ServerEvent`] for every meaningful state change
//! (server lifecycle, peer lifecycle, room lifecycle, limit hits) and
//! embedders subscribe with plain callbacks. Listeners are strictly
//! observational: a panicking listener is caught and logged and never
//! disturbs the server or the other listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, error};
use uuid::Uuid;

/// Everything the server reports to embedders.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The acceptor is listening.
    ServerStarted { addr: std::net::SocketAddr },
    /// The server was stopped and its registries cleared.
    ServerStopped,
    /// The acceptor reported an error after startup.
    ServerError { message: String },
    /// A socket was accepted and assigned an identity.
    PeerConnected { peer_id: Uuid },
    /// A peer entered a room.
    PeerJoined { peer_id: Uuid, room_id: String },
    /// A peer left a room (explicitly or by disconnecting).
    PeerLeft { peer_id: Uuid, room_id: String },
    /// A peer's socket closed and it was dropped from the registry.
    PeerDisconnected { peer_id: Uuid },
    /// A peer missed two consecutive pings and was terminated.
    PeerTimeout { peer_id: Uuid },
    /// A peer changed its display name.
    DisplayNameUpdated {
        peer_id: Uuid,
        old_display_name: String,
        new_display_name: String,
    },
    /// A join was refused because the room is at capacity.
    PeerLimitReached {
        room_id: String,
        current_peers: usize,
        max_peers: usize,
    },
    /// A room was created by a join.
    RoomCreated { room_id: String },
    /// A room became empty and was deleted.
    RoomRemoved { room_id: String },
    /// A room creation was refused because the server is at capacity.
    RoomLimitReached {
        current_rooms: usize,
        max_rooms: usize,
    },
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = std::sync::Arc<dyn Fn(&ServerEvent) + Send + Sync + 'static>;

/// Multi-listener callback registry.
///
/// Listeners run in registration order. Registering the same closure twice
/// yields two independent subscriptions (and two invocations per event);
/// [`EventBus::off`] removes exactly one.
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe. The returned id removes this subscription via [`off`].
    ///
    /// [`off`]: EventBus::off
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, std::sync::Arc::new(listener)));
        id
    }

    /// Unsubscribe. Returns false (and does nothing) for an unknown id.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        match listeners.iter().position(|(lid, _)| *lid == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Deliver `event` to every listener, in registration order.
    ///
    /// Iterates a snapshot, so listeners may subscribe or unsubscribe from
    /// within a callback. Panics are caught and logged.
    pub fn emit(&self, event: &ServerEvent) {
        let snapshot: Vec<Listener> = self
            .lock()
            .iter()
            .map(|(_, listener)| std::sync::Arc::clone(listener))
            .collect();

        debug!(event = ?event, listeners = snapshot.len(), "event emitted");

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = ?event, "event listener panicked");
            }
        }
    }

    /// Number of active subscriptions.
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
