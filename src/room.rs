//! Named rooms.
//!
//! A [`Room`] is a container of peers with an optional password and a
//! creation timestamp. Rooms are created lazily by the first successful
//! join and deleted by the server as soon as they become empty. The member
//! set holds [`Weak`] references; ownership of peers stays with the server's
//! peer registry, so a peer outlives its room exactly when it leaves before
//! the room empties.

use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use crate::error::RoomError;
use crate::peer::Peer;
use crate::protocol::ServerMessage;
use crate::validate::{validate_password, validate_room_id, ValidationError};

#[derive(Debug)]
struct RoomMember {
    id: Uuid,
    peer: Weak<Peer>,
}

/// A named container of peers, with an optional password gate.
#[derive(Debug)]
pub struct Room {
    /// Room id, validated at construction. Never changes.
    pub id: String,
    password: Option<String>,
    created_at: Instant,
    members: Vec<RoomMember>,
}

impl Room {
    /// Construct an empty room, validating the id and (if present) the
    /// password.
    pub fn new(id: &str, password: Option<&str>) -> Result<Self, ValidationError> {
        validate_room_id(id)?;
        if let Some(password) = password {
            validate_password(password)?;
        }
        Ok(Self {
            id: id.to_string(),
            password: password.map(str::to_string),
            created_at: Instant::now(),
            members: Vec::new(),
        })
    }

    /// Add a peer to the member set. Fails if the id is already present.
    pub fn add_peer(&mut self, peer: &Arc<Peer>) -> Result<(), RoomError> {
        if self.has_peer(peer.id) {
            return Err(RoomError::DuplicatePeer);
        }
        self.members.push(RoomMember {
            id: peer.id,
            peer: Arc::downgrade(peer),
        });
        Ok(())
    }

    /// Remove a peer from the member set. Fails if the id is absent.
    pub fn remove_peer(&mut self, peer_id: Uuid) -> Result<(), RoomError> {
        match self.members.iter().position(|m| m.id == peer_id) {
            Some(index) => {
                self.members.remove(index);
                Ok(())
            }
            None => Err(RoomError::UnknownPeer),
        }
    }

    /// Look up a member by id.
    pub fn get_peer(&self, peer_id: Uuid) -> Option<Arc<Peer>> {
        self.members
            .iter()
            .find(|m| m.id == peer_id)
            .and_then(|m| m.peer.upgrade())
    }

    /// Whether a member with this id is present.
    pub fn has_peer(&self, peer_id: Uuid) -> bool {
        self.members.iter().any(|m| m.id == peer_id)
    }

    /// Snapshot of every live member, in insertion order.
    pub fn members(&self) -> Vec<Arc<Peer>> {
        self.members.iter().filter_map(|m| m.peer.upgrade()).collect()
    }

    /// Snapshot of every live member except `peer_id`.
    pub fn members_except(&self, peer_id: Uuid) -> Vec<Arc<Peer>> {
        self.members
            .iter()
            .filter(|m| m.id != peer_id)
            .filter_map(|m| m.peer.upgrade())
            .collect()
    }

    /// Write `frame` to every member whose id is not in `exclude`.
    ///
    /// Iterates a snapshot of the member set; per-peer send failures are
    /// ignored so one broken socket cannot block the fan-out.
    pub fn broadcast(&self, frame: &ServerMessage, exclude: &[Uuid]) {
        for member in self.members.iter().filter(|m| !exclude.contains(&m.id)) {
            let Some(peer) = member.peer.upgrade() else {
                continue;
            };
            if !peer.send(frame.clone()) {
                debug!(peer_id = %member.id, room_id = %self.id, "broadcast send failed (peer gone)");
            }
        }
    }

    /// True for passwordless rooms; literal equality otherwise.
    pub fn verify_password(&self, candidate: &str) -> bool {
        match &self.password {
            None => true,
            Some(password) => password == candidate,
        }
    }

    /// Whether the room requires a password.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True iff the room has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// When the room was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}
