//! Wire protocol for the signaling server.
//!
//! Every frame is a UTF-8 JSON object with exactly the shape
//! `{ "type": "...", "payload": { ... } }`, produced by serde's adjacently
//! tagged enum representation. Type tags are SCREAMING_SNAKE_CASE; payload
//! members are camelCase. Frames that do not decode into a
//! [`ClientMessage`] are logged and dropped by the server; the socket stays
//! open.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SDP description type carried by offers and answers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// An SDP session description, relayed verbatim between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

/// An ICE candidate, relayed verbatim between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    pub sdp_m_line_index: Option<u32>,
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Addressing mode for a `CUSTOM` payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Peer,
    Room,
}

/// Explicit target of a `CUSTOM` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomTarget {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

/// A room member entry in the `ROOM_JOINED` roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Client -> Server messages
// ---------------------------------------------------------------------------

/// Messages accepted from clients. Anything else is dropped by the guard.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Join (and lazily create) a named room.
    JoinRoom {
        room_id: String,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    /// Leave the current room. The socket stays open.
    LeaveRoom {},
    /// Change the display name shown to other peers.
    UpdateDisplayName { display_name: String },
    /// Query a room's existence, password requirement, and occupancy.
    Knock { room_id: String },
    /// Application-defined payload, targeted at one peer or the whole room.
    Custom {
        custom_type: String,
        #[serde(default)]
        target: Option<CustomTarget>,
        #[serde(default)]
        data: Value,
    },
    /// SDP offer for another peer in the same room.
    Offer {
        to_peer_id: String,
        offer: SessionDescription,
    },
    /// SDP answer for another peer in the same room.
    Answer {
        to_peer_id: String,
        answer: SessionDescription,
    },
    /// ICE candidate for another peer in the same room.
    IceCandidate {
        to_peer_id: String,
        candidate: IceCandidateInit,
    },
}

// ---------------------------------------------------------------------------
// Server -> Client messages
// ---------------------------------------------------------------------------

/// Messages sent from the server to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// First frame on every connection: the assigned identity plus the ICE
    /// servers the client should use for its peer connections.
    ConnectionEstablished {
        peer_id: String,
        display_name: String,
        ice_servers: Vec<Value>,
    },
    /// Reply to a successful `JOIN_ROOM`, listing every other member.
    RoomJoined {
        room_id: String,
        display_name: String,
        peers: Vec<PeerSummary>,
    },
    /// Reply to a successful `LEAVE_ROOM`.
    RoomLeft { room_id: String },
    /// Broadcast to existing members when a peer joins their room.
    PeerJoined {
        peer_id: String,
        display_name: String,
    },
    /// Broadcast to remaining members when a peer leaves their room.
    PeerLeft { peer_id: String },
    /// Broadcast to other members when a peer changes its display name.
    PeerUpdated {
        peer_id: String,
        display_name: String,
    },
    /// Reply to a successful `UPDATE_DISPLAY_NAME`.
    DisplayNameUpdated { display_name: String },
    /// The room exists and is password-protected; the candidate was absent
    /// or wrong.
    PasswordRequired { room_id: String },
    /// Reply to `KNOCK`.
    KnockResponse {
        room_id: String,
        exists: bool,
        has_password: bool,
        peer_count: usize,
        is_full: bool,
    },
    /// Relayed application-defined payload.
    Custom {
        from_peer_id: String,
        custom_type: String,
        data: Value,
    },
    /// Operation refusal. Carries a human-readable message only.
    Error { message: String },
    /// Relayed SDP offer.
    Offer {
        from_peer_id: String,
        to_peer_id: String,
        offer: SessionDescription,
    },
    /// Relayed SDP answer.
    Answer {
        from_peer_id: String,
        to_peer_id: String,
        answer: SessionDescription,
    },
    /// Relayed ICE candidate.
    IceCandidate {
        from_peer_id: String,
        to_peer_id: String,
        candidate: IceCandidateInit,
    },
}
