//! Error types for server lifecycle and registry operations.

use thiserror::Error;

pub use crate::validate::ValidationError;

/// Errors from [`crate::SignalingServer`] lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start()` was called while the server is running.
    #[error("server is already running")]
    AlreadyRunning,
    /// `stop()` was called while the server is not running.
    #[error("server is not running")]
    NotRunning,
    /// The supplied listener was consumed by a previous `start()`.
    #[error("listener source is no longer available")]
    AcceptorUnavailable,
    /// Binding or adopting the listener failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from peer room-membership transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeerError {
    /// The peer is already a member of a room.
    #[error("peer is already in a room")]
    AlreadyInRoom,
    /// The peer is not a member of any room.
    #[error("peer is not in a room")]
    NotInRoom,
}

/// Errors from room member-set mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RoomError {
    /// A member with the same peer id is already present.
    #[error("peer is already a member of the room")]
    DuplicatePeer,
    /// No member with the given peer id is present.
    #[error("peer is not a member of the room")]
    UnknownPeer,
}
