//! Connected-peer state.
//!
//! A [`Peer`] is a pure state holder for one WebSocket connection: identity,
//! display name, room membership, and liveness. It never mutates the server
//! registries and never emits events; the dispatch layer in
//! [`crate::server`] drives all of that.
//!
//! Outbound traffic goes through a per-peer command channel. The connection
//! task is the only writer on the socket, so writes are serialized per peer
//! by construction.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::PeerError;
use crate::protocol::ServerMessage;
use crate::validate::{validate_display_name, ValidationError};

/// Commands consumed by a peer's connection task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Serialize and write a protocol frame.
    Frame(ServerMessage),
    /// Write a WebSocket protocol-level ping.
    Ping,
    /// Drop the connection without a close handshake.
    Terminate,
}

/// Channel for pushing commands to a peer's connection task.
pub type PeerSender = mpsc::UnboundedSender<PeerCommand>;

#[derive(Debug)]
struct PeerState {
    display_name: String,
    room_id: Option<String>,
    is_alive: bool,
    last_pong: Instant,
}

/// One connected client.
#[derive(Debug)]
pub struct Peer {
    /// Unique identity, assigned on accept. Never changes.
    pub id: Uuid,
    joined_at: Instant,
    sender: PeerSender,
    state: Mutex<PeerState>,
}

impl Peer {
    /// Create a peer with a fresh random identity and a default display
    /// name derived from it.
    pub fn new(sender: PeerSender) -> Self {
        let id = Uuid::new_v4();
        let display_name = format!("Peer-{}", &id.to_string()[..8]);
        Self {
            id,
            joined_at: Instant::now(),
            sender,
            state: Mutex::new(PeerState {
                display_name,
                room_id: None,
                is_alive: true,
                last_pong: Instant::now(),
            }),
        }
    }

    /// Queue a frame for delivery. Returns false if the connection task is
    /// gone; never panics.
    pub fn send(&self, frame: ServerMessage) -> bool {
        self.sender.send(PeerCommand::Frame(frame)).is_ok()
    }

    /// Queue an `ERROR` frame carrying `message`.
    pub fn send_error(&self, message: impl Into<String>) -> bool {
        self.send(ServerMessage::Error {
            message: message.into(),
        })
    }

    /// Mark the peer as awaiting a pong and queue a protocol-level ping.
    pub fn ping(&self) {
        self.state().is_alive = false;
        let _ = self.sender.send(PeerCommand::Ping);
    }

    /// Record a received pong: the peer is alive again.
    pub fn update_pong_received(&self) {
        let mut state = self.state();
        state.is_alive = true;
        state.last_pong = Instant::now();
    }

    /// Force the connection closed without a close handshake.
    pub fn terminate(&self) {
        let _ = self.sender.send(PeerCommand::Terminate);
    }

    /// Trim, validate, and assign a new display name. Returns the previous
    /// name on success.
    pub fn update_display_name(&self, name: &str) -> Result<String, ValidationError> {
        validate_display_name(name)?;
        let trimmed = name.trim().to_string();
        let mut state = self.state();
        Ok(std::mem::replace(&mut state.display_name, trimmed))
    }

    /// Record membership of `room_id`. Fails if the peer is already in a
    /// room; the caller owns the corresponding registry mutation.
    pub fn join_room(&self, room_id: &str) -> Result<(), PeerError> {
        let mut state = self.state();
        if state.room_id.is_some() {
            return Err(PeerError::AlreadyInRoom);
        }
        state.room_id = Some(room_id.to_string());
        Ok(())
    }

    /// Clear room membership, returning the room id the peer was in.
    pub fn leave_room(&self) -> Result<String, PeerError> {
        self.state().room_id.take().ok_or(PeerError::NotInRoom)
    }

    /// Current display name.
    pub fn display_name(&self) -> String {
        self.state().display_name.clone()
    }

    /// Id of the room the peer is currently in, if any.
    pub fn room_id(&self) -> Option<String> {
        self.state().room_id.clone()
    }

    /// Whether a pong arrived since the last ping.
    pub fn is_alive(&self) -> bool {
        self.state().is_alive
    }

    /// When the last pong was received.
    pub fn last_pong(&self) -> Instant {
        self.state().last_pong
    }

    /// When the socket was accepted.
    pub fn joined_at(&self) -> Instant {
        self.joined_at
    }

    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
