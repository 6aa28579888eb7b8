//! Connection handling and the dispatch state machine.
//!
//! Each accepted TCP connection is upgraded to a WebSocket and assigned a
//! [`Peer`]. A single task per connection owns the socket: it multiplexes
//! inbound frames with the peer's outbound command channel, so writes are
//! serialized per peer and `terminate` can drop the socket without a close
//! handshake. All registry mutations run through [`ServerState`], which owns
//! the peer map and the room map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Limits, MAX_PAYLOAD_BYTES};
use crate::events::{EventBus, ServerEvent};
use crate::peer::{Peer, PeerCommand, PeerSender};
use crate::protocol::{ClientMessage, CustomTarget, PeerSummary, ServerMessage, TargetKind};
use crate::room::Room;
use crate::validate::validate_custom_type;

/// Shared server state: configuration, the two registries, and the event
/// bus. The registries are the sole source of truth for membership;
/// `Peer::room_id` is derived state kept consistent by the transitions
/// below.
pub(crate) struct ServerState {
    pub(crate) path: Option<String>,
    pub(crate) limits: Limits,
    pub(crate) require_room_password: bool,
    pub(crate) ice_servers: Vec<Value>,
    pub(crate) ping_interval: Duration,
    pub(crate) peers: DashMap<Uuid, Arc<Peer>>,
    pub(crate) rooms: DashMap<String, Room>,
    pub(crate) events: EventBus,
    /// False until `start()`, false again after `stop()`. Connections that
    /// race a shutdown are refused at registration.
    pub(crate) accepting: AtomicBool,
}

/// Why a join was refused. Maps onto the reply frame and, for limit hits,
/// the event to publish.
enum JoinDenied {
    PasswordRequiredToCreate,
    ServerFull {
        current_rooms: usize,
        max_rooms: usize,
    },
    ConstructionFailed,
    WrongPassword,
    RoomFull {
        current_peers: usize,
        max_peers: usize,
    },
    TransitionFailed,
}

struct JoinOutcome {
    is_new_room: bool,
    /// The other members, snapshotted while the room guard was held.
    others: Vec<Arc<Peer>>,
}

impl ServerState {
    pub(crate) fn new(
        path: Option<String>,
        limits: Limits,
        require_room_password: bool,
        ice_servers: Vec<Value>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            path,
            limits,
            require_room_password,
            ice_servers,
            ping_interval,
            peers: DashMap::new(),
            rooms: DashMap::new(),
            events: EventBus::new(),
            accepting: AtomicBool::new(false),
        }
    }

    /// Create a peer for a freshly accepted socket, register it, and send
    /// its `CONNECTION_ESTABLISHED`. Returns `None` when the server is
    /// shutting down.
    pub(crate) fn register_peer(&self, sender: PeerSender) -> Option<Arc<Peer>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return None;
        }
        let peer = Arc::new(Peer::new(sender));
        self.peers.insert(peer.id, Arc::clone(&peer));
        self.events.emit(&ServerEvent::PeerConnected { peer_id: peer.id });
        peer.send(ServerMessage::ConnectionEstablished {
            peer_id: peer.id.to_string(),
            display_name: peer.display_name(),
            ice_servers: self.ice_servers.clone(),
        });
        info!(peer_id = %peer.id, "peer connected");
        Some(peer)
    }

    /// Drop a peer whose socket closed: sever room membership, remove it
    /// from the peer map, and report the disconnect.
    pub(crate) fn unregister_peer(&self, peer: &Arc<Peer>) {
        if !self.peers.contains_key(&peer.id) {
            // Already gone, e.g. the registries were cleared by stop().
            return;
        }
        self.remove_peer_from_room(peer);
        self.peers.remove(&peer.id);
        self.events
            .emit(&ServerEvent::PeerDisconnected { peer_id: peer.id });
    }

    /// Route one validated inbound frame. Frames from peers no longer in
    /// the registry are dropped.
    pub(crate) fn dispatch(&self, peer: &Arc<Peer>, message: ClientMessage) {
        if !self.peers.contains_key(&peer.id) {
            debug!(peer_id = %peer.id, "dropping frame from unregistered peer");
            return;
        }
        match message {
            ClientMessage::JoinRoom {
                room_id,
                display_name,
                password,
            } => self.handle_join_room(peer, room_id, display_name, password),
            ClientMessage::LeaveRoom {} => self.handle_leave_room(peer),
            ClientMessage::UpdateDisplayName { display_name } => {
                self.handle_update_display_name(peer, display_name)
            }
            ClientMessage::Knock { room_id } => self.handle_knock(peer, room_id),
            ClientMessage::Custom {
                custom_type,
                target,
                data,
            } => self.handle_custom(peer, custom_type, target, data),
            ClientMessage::Offer { to_peer_id, offer } => {
                self.relay_signal(peer, &to_peer_id, "offer", |from, to| ServerMessage::Offer {
                    from_peer_id: from,
                    to_peer_id: to,
                    offer,
                })
            }
            ClientMessage::Answer { to_peer_id, answer } => {
                self.relay_signal(peer, &to_peer_id, "answer", |from, to| {
                    ServerMessage::Answer {
                        from_peer_id: from,
                        to_peer_id: to,
                        answer,
                    }
                })
            }
            ClientMessage::IceCandidate {
                to_peer_id,
                candidate,
            } => self.relay_signal(peer, &to_peer_id, "ice_candidate", |from, to| {
                ServerMessage::IceCandidate {
                    from_peer_id: from,
                    to_peer_id: to,
                    candidate,
                }
            }),
        }
    }

    // ─── JOIN_ROOM ──────────────────────────────────────────────────────

    fn handle_join_room(
        &self,
        peer: &Arc<Peer>,
        room_id: String,
        display_name: Option<String>,
        password: Option<String>,
    ) {
        if let Some(name) = display_name {
            if let Err(e) = peer.update_display_name(&name) {
                warn!(peer_id = %peer.id, error = %e, "display name rejected on join");
                peer.send_error("Failed to update display name");
                return;
            }
        }

        match self.try_join(peer, &room_id, password.as_deref()) {
            Err(JoinDenied::PasswordRequiredToCreate) => {
                peer.send_error("Password is required to create a room");
            }
            Err(JoinDenied::ServerFull {
                current_rooms,
                max_rooms,
            }) => {
                peer.send_error("Maximum number of rooms reached");
                self.events.emit(&ServerEvent::RoomLimitReached {
                    current_rooms,
                    max_rooms,
                });
            }
            Err(JoinDenied::ConstructionFailed) => {
                peer.send_error("Failed to create room");
            }
            Err(JoinDenied::WrongPassword) => {
                peer.send(ServerMessage::PasswordRequired { room_id });
            }
            Err(JoinDenied::RoomFull {
                current_peers,
                max_peers,
            }) => {
                peer.send_error("Room is full");
                self.events.emit(&ServerEvent::PeerLimitReached {
                    room_id,
                    current_peers,
                    max_peers,
                });
            }
            Err(JoinDenied::TransitionFailed) => {
                peer.send_error("Failed to join room");
            }
            Ok(JoinOutcome { is_new_room, others }) => {
                if is_new_room {
                    self.events.emit(&ServerEvent::RoomCreated {
                        room_id: room_id.clone(),
                    });
                }
                self.events.emit(&ServerEvent::PeerJoined {
                    peer_id: peer.id,
                    room_id: room_id.clone(),
                });

                let display_name = peer.display_name();
                let joined = ServerMessage::PeerJoined {
                    peer_id: peer.id.to_string(),
                    display_name: display_name.clone(),
                };
                for other in &others {
                    if !other.send(joined.clone()) {
                        debug!(peer_id = %other.id, "peer_joined send failed (peer gone)");
                    }
                }

                let peers = others
                    .iter()
                    .map(|other| PeerSummary {
                        id: other.id.to_string(),
                        display_name: other.display_name(),
                    })
                    .collect();
                peer.send(ServerMessage::RoomJoined {
                    room_id: room_id.clone(),
                    display_name,
                    peers,
                });

                info!(peer_id = %peer.id, room_id = %room_id, "peer joined room");
            }
        }
    }

    /// Policy checks plus the membership transition, under the room entry
    /// guard. Member display names are read by the caller after the guard
    /// is gone.
    fn try_join(
        &self,
        peer: &Arc<Peer>,
        room_id: &str,
        password: Option<&str>,
    ) -> Result<JoinOutcome, JoinDenied> {
        // Read len() before entry(): DashMap's len() takes shard locks that
        // conflict with an already-held entry guard.
        let current_rooms = self.rooms.len();

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let room = entry.get_mut();

                let password_ok = match password {
                    Some(candidate) => room.verify_password(candidate),
                    None => !room.has_password(),
                };
                if !password_ok {
                    return Err(JoinDenied::WrongPassword);
                }

                let max_peers = self.limits.max_peers_per_room;
                if max_peers > 0 && room.len() >= max_peers {
                    return Err(JoinDenied::RoomFull {
                        current_peers: room.len(),
                        max_peers,
                    });
                }

                if peer.join_room(room_id).is_err() {
                    return Err(JoinDenied::TransitionFailed);
                }
                if room.add_peer(peer).is_err() {
                    let _ = peer.leave_room();
                    return Err(JoinDenied::TransitionFailed);
                }

                Ok(JoinOutcome {
                    is_new_room: false,
                    others: room.members_except(peer.id),
                })
            }
            Entry::Vacant(slot) => {
                if self.require_room_password && password.is_none() {
                    return Err(JoinDenied::PasswordRequiredToCreate);
                }

                let max_rooms = self.limits.max_rooms_per_server;
                if max_rooms > 0 && current_rooms >= max_rooms {
                    return Err(JoinDenied::ServerFull {
                        current_rooms,
                        max_rooms,
                    });
                }

                let room = match Room::new(room_id, password) {
                    Ok(room) => room,
                    Err(e) => {
                        warn!(room_id = %room_id, error = %e, "room construction rejected");
                        return Err(JoinDenied::ConstructionFailed);
                    }
                };

                let mut room_ref = slot.insert(room);
                if peer.join_room(room_id).is_err() || room_ref.add_peer(peer).is_err() {
                    if peer.room_id().as_deref() == Some(room_id) {
                        let _ = peer.leave_room();
                    }
                    // Roll back the just-created room, unless someone else
                    // managed to join it in the meantime.
                    drop(room_ref);
                    self.rooms.remove_if(room_id, |_, room| room.is_empty());
                    return Err(JoinDenied::TransitionFailed);
                }

                Ok(JoinOutcome {
                    is_new_room: true,
                    others: Vec::new(),
                })
            }
        }
    }

    // ─── LEAVE_ROOM ─────────────────────────────────────────────────────

    fn handle_leave_room(&self, peer: &Arc<Peer>) {
        let room_id = peer.room_id();
        if self.remove_peer_from_room(peer) {
            if let Some(room_id) = room_id {
                peer.send(ServerMessage::RoomLeft { room_id });
            }
        } else {
            peer.send_error("Failed to leave room");
        }
    }

    /// Sever the peer's room membership. Returns false if the peer was not
    /// in a room. Broadcasts `PEER_LEFT` to the remaining members and
    /// deletes the room once empty.
    pub(crate) fn remove_peer_from_room(&self, peer: &Arc<Peer>) -> bool {
        let Ok(room_id) = peer.leave_room() else {
            return false;
        };

        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            if room.remove_peer(peer.id).is_err() {
                error!(peer_id = %peer.id, room_id = %room_id, "peer missing from its own room");
            }
            room.broadcast(
                &ServerMessage::PeerLeft {
                    peer_id: peer.id.to_string(),
                },
                &[peer.id],
            );
            info!(peer_id = %peer.id, room_id = %room_id, room_size = room.len(), "peer left room");
        } else {
            error!(peer_id = %peer.id, room_id = %room_id, "peer's room missing from the registry");
        }

        let removed = self
            .rooms
            .remove_if(&room_id, |_, room| room.is_empty())
            .is_some();

        self.events.emit(&ServerEvent::PeerLeft {
            peer_id: peer.id,
            room_id: room_id.clone(),
        });
        if removed {
            info!(room_id = %room_id, "room removed (empty)");
            self.events.emit(&ServerEvent::RoomRemoved { room_id });
        }
        true
    }

    // ─── UPDATE_DISPLAY_NAME ────────────────────────────────────────────

    fn handle_update_display_name(&self, peer: &Arc<Peer>, display_name: String) {
        match peer.update_display_name(&display_name) {
            Err(e) => {
                warn!(peer_id = %peer.id, error = %e, "display name rejected");
                peer.send_error("Failed to update display name");
            }
            Ok(old_display_name) => {
                let new_display_name = peer.display_name();
                peer.send(ServerMessage::DisplayNameUpdated {
                    display_name: new_display_name.clone(),
                });
                if let Some(room_id) = peer.room_id() {
                    if let Some(room) = self.rooms.get(&room_id) {
                        room.broadcast(
                            &ServerMessage::PeerUpdated {
                                peer_id: peer.id.to_string(),
                                display_name: new_display_name.clone(),
                            },
                            &[peer.id],
                        );
                    }
                }
                self.events.emit(&ServerEvent::DisplayNameUpdated {
                    peer_id: peer.id,
                    old_display_name,
                    new_display_name,
                });
            }
        }
    }

    // ─── KNOCK ──────────────────────────────────────────────────────────

    fn handle_knock(&self, peer: &Arc<Peer>, room_id: String) {
        let (exists, has_password, peer_count) = match self.rooms.get(&room_id) {
            Some(room) => (true, room.has_password(), room.len()),
            None => (false, false, 0),
        };
        let max_peers = self.limits.max_peers_per_room;
        let is_full = max_peers > 0 && peer_count >= max_peers;
        peer.send(ServerMessage::KnockResponse {
            room_id,
            exists,
            has_password,
            peer_count,
            is_full,
        });
    }

    // ─── CUSTOM ─────────────────────────────────────────────────────────

    fn handle_custom(
        &self,
        peer: &Arc<Peer>,
        custom_type: String,
        target: Option<CustomTarget>,
        data: Value,
    ) {
        if let Err(e) = validate_custom_type(&custom_type) {
            warn!(peer_id = %peer.id, error = %e, "custom type rejected");
            peer.send_error("Invalid custom type");
            return;
        }

        let target = match target {
            Some(target) => target,
            None if peer.room_id().is_some() => CustomTarget {
                kind: TargetKind::Room,
                peer_id: None,
            },
            None => {
                peer.send_error("Target is required when not in a room");
                return;
            }
        };

        let frame = ServerMessage::Custom {
            from_peer_id: peer.id.to_string(),
            custom_type,
            data,
        };

        match target.kind {
            TargetKind::Peer => {
                let Some(target_id) = target.peer_id else {
                    peer.send_error("Target peer id is required");
                    return;
                };
                let Some(room_id) = peer.room_id() else {
                    peer.send_error("Not in a room");
                    return;
                };
                let Ok(target_id) = Uuid::parse_str(&target_id) else {
                    peer.send_error("Target peer is not in the room");
                    return;
                };
                let target_peer = self
                    .rooms
                    .get(&room_id)
                    .and_then(|room| room.get_peer(target_id));
                match target_peer {
                    Some(target_peer) => {
                        target_peer.send(frame);
                    }
                    None => {
                        peer.send_error("Target peer is not in the room");
                    }
                }
            }
            TargetKind::Room => {
                let Some(room_id) = peer.room_id() else {
                    peer.send_error("Not in a room");
                    return;
                };
                if let Some(room) = self.rooms.get(&room_id) {
                    room.broadcast(&frame, &[peer.id]);
                } else {
                    error!(peer_id = %peer.id, room_id = %room_id, "peer's room missing from the registry");
                    peer.send_error("Failed to send custom message");
                }
            }
        }
    }

    // ─── OFFER / ANSWER / ICE_CANDIDATE ─────────────────────────────────

    /// Common checks for the three signaling relays. The payload is never
    /// inspected; `build` attaches the sender's id next to the target's.
    fn relay_signal<F>(&self, peer: &Arc<Peer>, to_peer_id: &str, kind: &str, build: F)
    where
        F: FnOnce(String, String) -> ServerMessage,
    {
        let Some(room_id) = peer.room_id() else {
            peer.send_error("Not in a room");
            return;
        };
        let target_id = match Uuid::parse_str(to_peer_id) {
            Ok(id) if id == peer.id => {
                peer.send_error("Cannot signal yourself");
                return;
            }
            Ok(id) => id,
            Err(_) => {
                peer.send_error("Target peer is not in the room");
                return;
            }
        };
        let target_peer = match self.rooms.get(&room_id) {
            Some(room) => room.get_peer(target_id),
            None => {
                error!(peer_id = %peer.id, room_id = %room_id, "peer's room missing from the registry");
                peer.send_error("Failed to relay message");
                return;
            }
        };
        let Some(target_peer) = target_peer else {
            peer.send_error("Target peer is not in the room");
            return;
        };

        debug!(from = %peer.id, to = %target_id, kind, "signal relay");
        target_peer.send(build(peer.id.to_string(), target_id.to_string()));
    }

    // ─── Liveness ───────────────────────────────────────────────────────

    /// One tick of the two-tick liveness cycle: peers that never answered
    /// the previous ping are terminated, everyone else is pinged again.
    pub(crate) fn run_liveness_sweep(&self) {
        let peers: Vec<Arc<Peer>> = self
            .peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for peer in peers {
            if peer.is_alive() {
                peer.ping();
            } else {
                warn!(peer_id = %peer.id, "peer missed its pong, terminating");
                self.events.emit(&ServerEvent::PeerTimeout { peer_id: peer.id });
                peer.terminate();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

/// Accept connections until the task is cancelled by `stop()`.
pub(crate) async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    handle_connection(stream, addr, state).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
                state.events.emit(&ServerEvent::ServerError {
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Drive the liveness ticker until the task is cancelled by `stop()`.
pub(crate) async fn liveness_loop(state: Arc<ServerState>) {
    let mut ticker = tokio::time::interval(state.ping_interval);
    // The first tick completes immediately; peers get their first ping one
    // full interval after startup.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        state.run_liveness_sweep();
    }
}

/// Handle a single connection: upgrade, register, pump frames, clean up.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    addr: std::net::SocketAddr,
    state: Arc<ServerState>,
) {
    let expected_path = state.path.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if let Some(expected) = &expected_path {
            if req.uri().path() != expected {
                let mut not_found = ErrorResponse::new(None);
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                return Err(not_found);
            }
        }
        Ok(resp)
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_PAYLOAD_BYTES);
    ws_config.max_frame_size = Some(MAX_PAYLOAD_BYTES);

    let mut ws =
        match tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
            .await
        {
            Ok(ws) => ws,
            Err(e) => {
                debug!(addr = %addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

    let (tx, mut rx) = mpsc::unbounded_channel::<PeerCommand>();
    let Some(peer) = state.register_peer(tx) else {
        // Lost the race against stop(); refuse with a protocol-error close.
        let frame = CloseFrame {
            code: CloseCode::Protocol,
            reason: "server is shutting down".into(),
        };
        let _ = ws.close(Some(frame)).await;
        return;
    };

    debug!(addr = %addr, peer_id = %peer.id, "WebSocket connection established");

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(PeerCommand::Frame(frame)) => match serde_json::to_string(&frame) {
                    Ok(json) => {
                        // A failed write never removes the peer; the socket's
                        // own close event does.
                        if let Err(e) = ws.send(Message::Text(json)).await {
                            debug!(peer_id = %peer.id, error = %e, "write failed");
                        }
                    }
                    Err(e) => {
                        error!(peer_id = %peer.id, error = %e, "failed to serialize outbound frame");
                    }
                },
                Some(PeerCommand::Ping) => {
                    if let Err(e) = ws.send(Message::Ping(Vec::new())).await {
                        debug!(peer_id = %peer.id, error = %e, "ping write failed");
                    }
                }
                Some(PeerCommand::Terminate) => {
                    // Dropping the stream closes the socket without a close
                    // handshake.
                    break;
                }
                None => break,
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => state.dispatch(&peer, message),
                        Err(e) => {
                            debug!(peer_id = %peer.id, error = %e, "dropping unrecognized frame");
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => peer.update_pong_received(),
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Binary and other frame kinds are not part of the
                    // protocol.
                    continue;
                }
                Some(Err(e)) => {
                    debug!(peer_id = %peer.id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    state.unregister_peer(&peer);
    info!(peer_id = %peer.id, "peer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_ice_servers;
    use crate::protocol::{IceCandidateInit, SdpType, SessionDescription};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_state(limits: Limits, require_room_password: bool) -> Arc<ServerState> {
        let state = Arc::new(ServerState::new(
            None,
            limits,
            require_room_password,
            default_ice_servers(),
            Duration::from_secs(30),
        ));
        state.accepting.store(true, Ordering::SeqCst);
        state
    }

    fn default_state() -> Arc<ServerState> {
        test_state(Limits::default(), false)
    }

    fn connect(state: &ServerState) -> (Arc<Peer>, UnboundedReceiver<PeerCommand>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = state.register_peer(tx).expect("server should be accepting");
        match rx.try_recv().expect("connection frame expected") {
            PeerCommand::Frame(ServerMessage::ConnectionEstablished { peer_id, .. }) => {
                assert_eq!(peer_id, peer.id.to_string());
            }
            other => panic!("expected ConnectionEstablished, got {other:?}"),
        }
        (peer, rx)
    }

    fn next_frame(rx: &mut UnboundedReceiver<PeerCommand>) -> ServerMessage {
        loop {
            match rx.try_recv().expect("expected a queued frame") {
                PeerCommand::Frame(frame) => return frame,
                _ => continue,
            }
        }
    }

    fn assert_silent(rx: &mut UnboundedReceiver<PeerCommand>) {
        assert!(rx.try_recv().is_err(), "expected no queued command");
    }

    fn record_events(state: &ServerState) -> Arc<StdMutex<Vec<ServerEvent>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        state.events.on(move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    fn join(state: &ServerState, peer: &Arc<Peer>, room_id: &str, name: Option<&str>) {
        state.dispatch(
            peer,
            ClientMessage::JoinRoom {
                room_id: room_id.into(),
                display_name: name.map(str::to_string),
                password: None,
            },
        );
    }

    fn join_with_password(state: &ServerState, peer: &Arc<Peer>, room_id: &str, password: &str) {
        state.dispatch(
            peer,
            ClientMessage::JoinRoom {
                room_id: room_id.into(),
                display_name: None,
                password: Some(password.into()),
            },
        );
    }

    /// Registry consistency per the membership invariants: derived room ids
    /// agree with the room map in both directions, and no room is empty.
    fn assert_consistent(state: &ServerState) {
        for entry in state.peers.iter() {
            let peer = entry.value();
            if let Some(room_id) = peer.room_id() {
                let room = state.rooms.get(&room_id).expect("room for peer.room_id");
                assert!(room.has_peer(peer.id));
            }
        }
        for entry in state.rooms.iter() {
            let room = entry.value();
            assert!(!room.is_empty(), "no room in the map may be empty");
            for member in room.members() {
                let registered = state.peers.get(&member.id).expect("member in peer map");
                assert_eq!(registered.room_id().as_deref(), Some(room.id.as_str()));
            }
        }
    }

    // ─── join ───────────────────────────────────────────────────────────

    #[test]
    fn first_join_creates_room_with_empty_roster() {
        let state = default_state();
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);

        join(&state, &c1, "r1", Some("A"));

        match next_frame(&mut rx1) {
            ServerMessage::RoomJoined {
                room_id,
                display_name,
                peers,
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(display_name, "A");
                assert!(peers.is_empty());
            }
            other => panic!("expected RoomJoined, got {other:?}"),
        }

        assert_eq!(c1.room_id().as_deref(), Some("r1"));
        assert_eq!(state.rooms.len(), 1);
        let seen = events.lock().unwrap();
        assert!(seen.contains(&ServerEvent::RoomCreated { room_id: "r1".into() }));
        assert!(seen.contains(&ServerEvent::PeerJoined {
            peer_id: c1.id,
            room_id: "r1".into()
        }));
        drop(seen);
        assert_consistent(&state);
    }

    #[test]
    fn second_join_notifies_existing_and_lists_them() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join(&state, &c1, "r1", Some("A"));
        next_frame(&mut rx1); // RoomJoined

        join(&state, &c2, "r1", Some("B"));

        match next_frame(&mut rx1) {
            ServerMessage::PeerJoined {
                peer_id,
                display_name,
            } => {
                assert_eq!(peer_id, c2.id.to_string());
                assert_eq!(display_name, "B");
            }
            other => panic!("expected PeerJoined, got {other:?}"),
        }
        match next_frame(&mut rx2) {
            ServerMessage::RoomJoined { peers, .. } => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].id, c1.id.to_string());
                assert_eq!(peers[0].display_name, "A");
            }
            other => panic!("expected RoomJoined, got {other:?}"),
        }
        assert_consistent(&state);
    }

    #[test]
    fn join_with_invalid_display_name_stops_before_any_state_change() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        state.dispatch(
            &c1,
            ClientMessage::JoinRoom {
                room_id: "r1".into(),
                display_name: Some("x".repeat(51)),
                password: None,
            },
        );

        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to update display name".into()
            }
        );
        assert!(state.rooms.is_empty());
        assert_eq!(c1.room_id(), None);
    }

    #[test]
    fn join_with_invalid_room_id_fails_construction() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        join(&state, &c1, "bad room!", None);

        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to create room".into()
            }
        );
        assert!(state.rooms.is_empty());
    }

    #[test]
    fn join_while_in_a_room_rolls_back_the_new_room() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        join(&state, &c1, "r1", None);
        next_frame(&mut rx1); // RoomJoined

        join(&state, &c1, "r2", None);

        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to join room".into()
            }
        );
        // Still in r1, and the half-created r2 is gone.
        assert_eq!(c1.room_id().as_deref(), Some("r1"));
        assert!(state.rooms.get("r2").is_none());
        assert!(state.rooms.get("r1").is_some());
        assert_consistent(&state);
    }

    // ─── passwords ──────────────────────────────────────────────────────

    #[test]
    fn require_room_password_blocks_bare_creation() {
        let state = test_state(Limits::default(), true);
        let (c1, mut rx1) = connect(&state);

        join(&state, &c1, "r2", None);
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Password is required to create a room".into()
            }
        );
        assert!(state.rooms.is_empty());

        join_with_password(&state, &c1, "r2", "abcd");
        assert!(matches!(
            next_frame(&mut rx1),
            ServerMessage::RoomJoined { .. }
        ));
    }

    #[test]
    fn wrong_password_gets_password_required() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join_with_password(&state, &c1, "r2", "abcd");
        next_frame(&mut rx1);

        join_with_password(&state, &c2, "r2", "wrong");
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::PasswordRequired { room_id: "r2".into() }
        );
        assert_eq!(c2.room_id(), None);

        // Absent candidate is refused the same way.
        join(&state, &c2, "r2", None);
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::PasswordRequired { room_id: "r2".into() }
        );

        join_with_password(&state, &c2, "r2", "abcd");
        assert!(matches!(
            next_frame(&mut rx2),
            ServerMessage::RoomJoined { .. }
        ));
        assert_consistent(&state);
    }

    #[test]
    fn invalid_password_fails_room_creation() {
        let state = test_state(Limits::default(), true);
        let (c1, mut rx1) = connect(&state);

        join_with_password(&state, &c1, "r2", "abc");
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to create room".into()
            }
        );
        assert!(state.rooms.is_empty());

        // An empty password counts as supplied but fails validation.
        join_with_password(&state, &c1, "r2", "");
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to create room".into()
            }
        );
        assert!(state.rooms.is_empty());
    }

    // ─── limits ─────────────────────────────────────────────────────────

    #[test]
    fn room_capacity_is_enforced_with_event() {
        let state = test_state(
            Limits {
                max_peers_per_room: 2,
                max_rooms_per_server: 0,
            },
            false,
        );
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);
        let (c3, mut rx3) = connect(&state);

        join(&state, &c1, "r3", None);
        join(&state, &c2, "r3", None);
        next_frame(&mut rx1);
        next_frame(&mut rx2);

        join(&state, &c3, "r3", None);
        assert_eq!(
            next_frame(&mut rx3),
            ServerMessage::Error {
                message: "Room is full".into()
            }
        );
        assert_eq!(c3.room_id(), None);
        assert!(events.lock().unwrap().contains(&ServerEvent::PeerLimitReached {
            room_id: "r3".into(),
            current_peers: 2,
            max_peers: 2,
        }));
        assert_consistent(&state);
    }

    #[test]
    fn unlimited_room_capacity_with_zero() {
        let state = test_state(
            Limits {
                max_peers_per_room: 0,
                max_rooms_per_server: 0,
            },
            false,
        );
        let mut receivers = Vec::new();
        for _ in 0..6 {
            let (peer, mut rx) = connect(&state);
            join(&state, &peer, "open", None);
            assert!(matches!(next_frame(&mut rx), ServerMessage::RoomJoined { .. }));
            receivers.push((peer, rx));
        }
        assert_eq!(state.rooms.get("open").unwrap().len(), 6);
    }

    #[test]
    fn server_room_limit_is_enforced_with_event() {
        let state = test_state(
            Limits {
                max_peers_per_room: 0,
                max_rooms_per_server: 1,
            },
            false,
        );
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join(&state, &c1, "r1", None);
        next_frame(&mut rx1);

        join(&state, &c2, "r2", None);
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::Error {
                message: "Maximum number of rooms reached".into()
            }
        );
        assert!(events.lock().unwrap().contains(&ServerEvent::RoomLimitReached {
            current_rooms: 1,
            max_rooms: 1,
        }));

        // Joining the existing room is still allowed.
        join(&state, &c2, "r1", None);
        assert!(matches!(
            next_frame(&mut rx2),
            ServerMessage::RoomJoined { .. }
        ));
    }

    // ─── knock ──────────────────────────────────────────────────────────

    #[test]
    fn knock_reports_room_shape() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join_with_password(&state, &c1, "r6", "abcd");
        next_frame(&mut rx1);

        state.dispatch(&c2, ClientMessage::Knock { room_id: "r6".into() });
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::KnockResponse {
                room_id: "r6".into(),
                exists: true,
                has_password: true,
                peer_count: 1,
                is_full: false,
            }
        );

        state.dispatch(&c2, ClientMessage::Knock { room_id: "nope".into() });
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::KnockResponse {
                room_id: "nope".into(),
                exists: false,
                has_password: false,
                peer_count: 0,
                is_full: false,
            }
        );
    }

    #[test]
    fn knock_reports_full_room() {
        let state = test_state(
            Limits {
                max_peers_per_room: 1,
                max_rooms_per_server: 0,
            },
            false,
        );
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join(&state, &c1, "tight", None);
        next_frame(&mut rx1);

        state.dispatch(&c2, ClientMessage::Knock { room_id: "tight".into() });
        match next_frame(&mut rx2) {
            ServerMessage::KnockResponse { is_full, peer_count, .. } => {
                assert!(is_full);
                assert_eq!(peer_count, 1);
            }
            other => panic!("expected KnockResponse, got {other:?}"),
        }
    }

    // ─── leave ──────────────────────────────────────────────────────────

    #[test]
    fn leave_notifies_remaining_and_keeps_room() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join(&state, &c1, "r5", None);
        join(&state, &c2, "r5", None);
        next_frame(&mut rx1); // RoomJoined
        next_frame(&mut rx1); // PeerJoined(c2)
        next_frame(&mut rx2); // RoomJoined

        state.dispatch(&c1, ClientMessage::LeaveRoom {});

        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::RoomLeft { room_id: "r5".into() }
        );
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::PeerLeft {
                peer_id: c1.id.to_string()
            }
        );
        assert!(state.rooms.get("r5").is_some());
        assert_consistent(&state);
    }

    #[test]
    fn last_leave_deletes_the_room() {
        let state = default_state();
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);

        join(&state, &c1, "r5", None);
        next_frame(&mut rx1);

        state.dispatch(&c1, ClientMessage::LeaveRoom {});
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::RoomLeft { room_id: "r5".into() }
        );
        assert!(state.rooms.get("r5").is_none());

        let seen = events.lock().unwrap();
        let left_at = seen
            .iter()
            .position(|e| matches!(e, ServerEvent::PeerLeft { .. }))
            .expect("peer left event");
        let removed_at = seen
            .iter()
            .position(|e| matches!(e, ServerEvent::RoomRemoved { .. }))
            .expect("room removed event");
        assert!(left_at < removed_at);
    }

    #[test]
    fn leave_without_membership_is_an_error() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        state.dispatch(&c1, ClientMessage::LeaveRoom {});
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to leave room".into()
            }
        );
    }

    // ─── display name ───────────────────────────────────────────────────

    #[test]
    fn display_name_update_replies_broadcasts_and_emits() {
        let state = default_state();
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join(&state, &c1, "r", Some("A"));
        join(&state, &c2, "r", Some("B"));
        next_frame(&mut rx1); // RoomJoined
        next_frame(&mut rx1); // PeerJoined
        next_frame(&mut rx2); // RoomJoined

        state.dispatch(
            &c1,
            ClientMessage::UpdateDisplayName {
                display_name: "Anna".into(),
            },
        );

        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::DisplayNameUpdated {
                display_name: "Anna".into()
            }
        );
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::PeerUpdated {
                peer_id: c1.id.to_string(),
                display_name: "Anna".into()
            }
        );
        assert!(events.lock().unwrap().contains(&ServerEvent::DisplayNameUpdated {
            peer_id: c1.id,
            old_display_name: "A".into(),
            new_display_name: "Anna".into(),
        }));
    }

    #[test]
    fn display_name_update_outside_a_room_only_replies() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        state.dispatch(
            &c1,
            ClientMessage::UpdateDisplayName {
                display_name: "Solo".into(),
            },
        );
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::DisplayNameUpdated {
                display_name: "Solo".into()
            }
        );
    }

    #[test]
    fn invalid_display_name_update_is_refused() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        state.dispatch(
            &c1,
            ClientMessage::UpdateDisplayName {
                display_name: "  ".into(),
            },
        );
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Failed to update display name".into()
            }
        );
    }

    // ─── custom ─────────────────────────────────────────────────────────

    #[test]
    fn custom_defaults_to_room_broadcast_excluding_sender() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);
        let (c3, mut rx3) = connect(&state);

        for (peer, rx) in [(&c1, &mut rx1), (&c2, &mut rx2), (&c3, &mut rx3)] {
            join(&state, peer, "r", None);
            while rx.try_recv().is_ok() {}
        }
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        state.dispatch(
            &c1,
            ClientMessage::Custom {
                custom_type: "chat.message".into(),
                target: None,
                data: json!({"text": "hi"}),
            },
        );

        let expected = ServerMessage::Custom {
            from_peer_id: c1.id.to_string(),
            custom_type: "chat.message".into(),
            data: json!({"text": "hi"}),
        };
        assert_eq!(next_frame(&mut rx2), expected);
        assert_eq!(next_frame(&mut rx3), expected);
        assert_silent(&mut rx1);
    }

    #[test]
    fn custom_peer_target_reaches_only_that_peer() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);
        let (c3, mut rx3) = connect(&state);

        for (peer, rx) in [(&c1, &mut rx1), (&c2, &mut rx2), (&c3, &mut rx3)] {
            join(&state, peer, "r", None);
            while rx.try_recv().is_ok() {}
        }
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        state.dispatch(
            &c1,
            ClientMessage::Custom {
                custom_type: "ping".into(),
                target: Some(CustomTarget {
                    kind: TargetKind::Peer,
                    peer_id: Some(c2.id.to_string()),
                }),
                data: Value::Null,
            },
        );

        assert!(matches!(next_frame(&mut rx2), ServerMessage::Custom { .. }));
        assert_silent(&mut rx1);
        assert_silent(&mut rx3);
    }

    #[test]
    fn custom_without_target_outside_a_room_is_refused() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        state.dispatch(
            &c1,
            ClientMessage::Custom {
                custom_type: "ping".into(),
                target: None,
                data: Value::Null,
            },
        );
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Target is required when not in a room".into()
            }
        );
    }

    #[test]
    fn custom_peer_target_outside_the_room_is_refused() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);
        let (stranger, mut rx3) = connect(&state);

        join(&state, &c1, "r", None);
        join(&state, &c2, "r", None);
        join(&state, &stranger, "elsewhere", None);
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}
        while rx3.try_recv().is_ok() {}

        state.dispatch(
            &c1,
            ClientMessage::Custom {
                custom_type: "ping".into(),
                target: Some(CustomTarget {
                    kind: TargetKind::Peer,
                    peer_id: Some(stranger.id.to_string()),
                }),
                data: Value::Null,
            },
        );
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Target peer is not in the room".into()
            }
        );
        assert_silent(&mut rx3);
    }

    #[test]
    fn custom_with_invalid_type_is_refused() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);
        join(&state, &c1, "r", None);
        next_frame(&mut rx1);

        state.dispatch(
            &c1,
            ClientMessage::Custom {
                custom_type: "has space".into(),
                target: None,
                data: Value::Null,
            },
        );
        assert_eq!(
            next_frame(&mut rx1),
            ServerMessage::Error {
                message: "Invalid custom type".into()
            }
        );
    }

    // ─── signaling relays ───────────────────────────────────────────────

    fn offer_payload() -> SessionDescription {
        SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: Some("s1".into()),
        }
    }

    #[test]
    fn offer_is_relayed_with_from_peer_id() {
        let state = default_state();
        let (x, mut rx_x) = connect(&state);
        let (y, mut rx_y) = connect(&state);

        join(&state, &x, "r4", None);
        join(&state, &y, "r4", None);
        while rx_x.try_recv().is_ok() {}
        while rx_y.try_recv().is_ok() {}

        state.dispatch(
            &x,
            ClientMessage::Offer {
                to_peer_id: y.id.to_string(),
                offer: offer_payload(),
            },
        );

        assert_eq!(
            next_frame(&mut rx_y),
            ServerMessage::Offer {
                from_peer_id: x.id.to_string(),
                to_peer_id: y.id.to_string(),
                offer: offer_payload(),
            }
        );
        // The sender receives nothing.
        assert_silent(&mut rx_x);
    }

    #[test]
    fn answer_and_ice_candidate_are_relayed() {
        let state = default_state();
        let (x, mut rx_x) = connect(&state);
        let (y, mut rx_y) = connect(&state);

        join(&state, &x, "r4", None);
        join(&state, &y, "r4", None);
        while rx_x.try_recv().is_ok() {}
        while rx_y.try_recv().is_ok() {}

        state.dispatch(
            &y,
            ClientMessage::Answer {
                to_peer_id: x.id.to_string(),
                answer: SessionDescription {
                    sdp_type: SdpType::Answer,
                    sdp: Some("s2".into()),
                },
            },
        );
        assert!(matches!(next_frame(&mut rx_x), ServerMessage::Answer { .. }));

        state.dispatch(
            &x,
            ClientMessage::IceCandidate {
                to_peer_id: y.id.to_string(),
                candidate: IceCandidateInit {
                    candidate: "candidate:0 1 UDP 2122252543 192.0.2.1 54400 typ host".into(),
                    sdp_m_line_index: Some(0),
                    sdp_mid: Some("0".into()),
                    username_fragment: None,
                },
            },
        );
        match next_frame(&mut rx_y) {
            ServerMessage::IceCandidate {
                from_peer_id,
                to_peer_id,
                candidate,
            } => {
                assert_eq!(from_peer_id, x.id.to_string());
                assert_eq!(to_peer_id, y.id.to_string());
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("expected IceCandidate, got {other:?}"),
        }
    }

    #[test]
    fn signaling_yourself_is_refused() {
        let state = default_state();
        let (x, mut rx_x) = connect(&state);
        join(&state, &x, "r4", None);
        next_frame(&mut rx_x);

        state.dispatch(
            &x,
            ClientMessage::Offer {
                to_peer_id: x.id.to_string(),
                offer: offer_payload(),
            },
        );
        assert_eq!(
            next_frame(&mut rx_x),
            ServerMessage::Error {
                message: "Cannot signal yourself".into()
            }
        );
    }

    #[test]
    fn signaling_outside_a_room_is_refused() {
        let state = default_state();
        let (x, mut rx_x) = connect(&state);
        let (y, _rx_y) = connect(&state);

        state.dispatch(
            &x,
            ClientMessage::Offer {
                to_peer_id: y.id.to_string(),
                offer: offer_payload(),
            },
        );
        assert_eq!(
            next_frame(&mut rx_x),
            ServerMessage::Error {
                message: "Not in a room".into()
            }
        );
    }

    #[test]
    fn signaling_an_absent_target_is_refused() {
        let state = default_state();
        let (x, mut rx_x) = connect(&state);
        let (outsider, mut rx_o) = connect(&state);

        join(&state, &x, "r4", None);
        join(&state, &outsider, "other", None);
        while rx_x.try_recv().is_ok() {}
        while rx_o.try_recv().is_ok() {}

        state.dispatch(
            &x,
            ClientMessage::Offer {
                to_peer_id: outsider.id.to_string(),
                offer: offer_payload(),
            },
        );
        assert_eq!(
            next_frame(&mut rx_x),
            ServerMessage::Error {
                message: "Target peer is not in the room".into()
            }
        );
        assert_silent(&mut rx_o);
    }

    // ─── lifecycle ──────────────────────────────────────────────────────

    #[test]
    fn registration_is_refused_when_not_accepting() {
        let state = default_state();
        state.accepting.store(false, Ordering::SeqCst);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(state.register_peer(tx).is_none());
        assert!(state.peers.is_empty());
    }

    #[test]
    fn disconnect_cleans_registry_and_room() {
        let state = default_state();
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        join(&state, &c1, "r", None);
        join(&state, &c2, "r", None);
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        state.unregister_peer(&c1);

        assert!(state.peers.get(&c1.id).is_none());
        assert_eq!(
            next_frame(&mut rx2),
            ServerMessage::PeerLeft {
                peer_id: c1.id.to_string()
            }
        );
        assert!(events
            .lock()
            .unwrap()
            .contains(&ServerEvent::PeerDisconnected { peer_id: c1.id }));
        assert_consistent(&state);

        // Second cleanup for the same peer is a no-op.
        let before = events.lock().unwrap().len();
        state.unregister_peer(&c1);
        assert_eq!(events.lock().unwrap().len(), before);
    }

    #[test]
    fn frames_after_removal_are_dropped() {
        let state = default_state();
        let (c1, mut rx1) = connect(&state);

        state.unregister_peer(&c1);
        state.dispatch(&c1, ClientMessage::Knock { room_id: "r".into() });
        assert_silent(&mut rx1);
    }

    // ─── liveness ───────────────────────────────────────────────────────

    #[test]
    fn liveness_pings_then_terminates_silent_peers() {
        let state = default_state();
        let events = record_events(&state);
        let (c1, mut rx1) = connect(&state);
        let (c2, mut rx2) = connect(&state);

        state.run_liveness_sweep();
        assert!(matches!(rx1.try_recv().unwrap(), PeerCommand::Ping));
        assert!(matches!(rx2.try_recv().unwrap(), PeerCommand::Ping));
        assert!(!c1.is_alive());
        assert!(!c2.is_alive());

        // Only c1 answers.
        c1.update_pong_received();

        state.run_liveness_sweep();
        assert!(matches!(rx1.try_recv().unwrap(), PeerCommand::Ping));
        assert!(matches!(rx2.try_recv().unwrap(), PeerCommand::Terminate));
        assert!(events
            .lock()
            .unwrap()
            .contains(&ServerEvent::PeerTimeout { peer_id: c2.id }));
        assert!(!events
            .lock()
            .unwrap()
            .contains(&ServerEvent::PeerTimeout { peer_id: c1.id }));
    }
}
