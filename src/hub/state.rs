//! Hub state task: the single writer for room membership and member sockets.
//!
//! Every WebSocket read loop translates frames into [`HubCommand`]s on one
//! mpsc channel; this task drains that channel, so read-modify-write of the
//! registry is atomic without locking. Delivery never blocks: each member's
//! outbound is an unbounded sender drained by its socket's write pump, and
//! routing to a departed member is logged and absorbed, never an error:
//! stale forwards are an expected race.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ROOM_CAPACITY;
use crate::hub::registry::RoomRegistry;
use crate::signaling::{ClientMessage, ServerMessage};

/// Commands into the hub task.
#[derive(Debug)]
pub enum HubCommand {
    /// A socket was accepted; `tx` is its outbound queue.
    Register {
        member_id: String,
        tx: mpsc::UnboundedSender<ServerMessage>,
    },
    /// A parsed frame from a member's read loop.
    Incoming {
        member_id: String,
        msg: ClientMessage,
    },
    /// The member's socket closed (either direction).
    Disconnect { member_id: String },
    /// Snapshot of room membership for `GET /api/rooms`.
    Rooms {
        reply: oneshot::Sender<HashMap<String, Vec<String>>>,
    },
}

/// Cloneable handle for submitting commands to the hub task.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn send(&self, cmd: HubCommand) {
        // The hub task outlives every socket; a send failure means shutdown.
        let _ = self.tx.send(cmd);
    }

    pub async fn rooms(&self) -> HashMap<String, Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Rooms { reply });
        rx.await.unwrap_or_default()
    }
}

/// Spawn the hub task; returns the command handle.
pub fn spawn() -> HubHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(Hub::default().run(rx));
    HubHandle { tx }
}

#[derive(Default)]
struct Hub {
    registry: RoomRegistry,
    peers: HashMap<String, mpsc::UnboundedSender<ServerMessage>>,
}

impl Hub {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                HubCommand::Register { member_id, tx } => self.register(member_id, tx),
                HubCommand::Incoming { member_id, msg } => self.dispatch(&member_id, msg),
                HubCommand::Disconnect { member_id } => self.disconnect(&member_id),
                HubCommand::Rooms { reply } => {
                    let _ = reply.send(self.registry.snapshot());
                }
            }
        }
    }

    fn register(&mut self, member_id: String, tx: mpsc::UnboundedSender<ServerMessage>) {
        debug!(event = "member_connected", member = %member_id, "Connection accepted");
        let _ = tx.send(ServerMessage::Connected {
            id: member_id.clone(),
        });
        self.peers.insert(member_id, tx);
    }

    fn dispatch(&mut self, member_id: &str, msg: ClientMessage) {
        match msg {
            ClientMessage::JoinRoom { room_id } => self.join_room(member_id, &room_id),
            ClientMessage::SendingSignal {
                user_to_signal,
                caller_id,
                signal,
            } => {
                // Opaque blob; route only.
                self.forward(
                    &user_to_signal,
                    ServerMessage::UserJoined {
                        signal,
                        caller_id,
                        id: member_id.to_string(),
                    },
                );
            }
            ClientMessage::ReturningSignal { signal, caller_id } => {
                self.forward(
                    &caller_id,
                    ServerMessage::ReceivingSignal {
                        signal,
                        id: member_id.to_string(),
                    },
                );
            }
            ClientMessage::FileReceived { sender_id } => {
                self.forward(
                    &sender_id,
                    ServerMessage::FileReceived {
                        id: member_id.to_string(),
                    },
                );
            }
        }
    }

    /// Admission check, then registry mutation, then notifications.
    /// Capacity is enforced here so the registry stays pure.
    fn join_room(&mut self, member_id: &str, room_id: &str) {
        if self.registry.member_count(room_id) >= ROOM_CAPACITY {
            warn!(
                event = "join_rejected_room_full",
                member = %member_id,
                room = %room_id,
                capacity = ROOM_CAPACITY,
                "Join rejected at admission boundary"
            );
            self.forward(
                member_id,
                ServerMessage::RoomFull {
                    room_id: room_id.to_string(),
                },
            );
            return;
        }

        let existing = self.registry.join(room_id, member_id);
        info!(
            event = "member_joined",
            member = %member_id,
            room = %room_id,
            members = existing.len() + 1,
            "Member joined room"
        );

        if !existing.is_empty() {
            self.forward(member_id, ServerMessage::AllUsers { users: existing });
        }
        self.broadcast_count(room_id);
    }

    fn disconnect(&mut self, member_id: &str) {
        self.peers.remove(member_id);
        if let Some(room_id) = self.registry.leave(member_id) {
            info!(
                event = "member_left",
                member = %member_id,
                room = %room_id,
                "Member disconnected"
            );
            self.broadcast_room(
                &room_id,
                ServerMessage::UserLeft {
                    id: member_id.to_string(),
                },
            );
            self.broadcast_count(&room_id);
        } else {
            debug!(event = "member_disconnected_unjoined", member = %member_id, "Disconnect before join");
        }
    }

    /// Broadcast the room's current member count to all of its members.
    fn broadcast_count(&self, room_id: &str) {
        let count = self.registry.member_count(room_id);
        self.broadcast_room(room_id, ServerMessage::TotalUsers { count });
    }

    fn broadcast_room(&self, room_id: &str, msg: ServerMessage) {
        for member in self.registry.members(room_id) {
            self.forward(member, msg.clone());
        }
    }

    /// Deliver to one member; absorb and log if it is gone.
    fn forward(&self, to_id: &str, msg: ServerMessage) {
        match self.peers.get(to_id) {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => {
                debug!(
                    event = "forward_dropped",
                    to = %to_id,
                    "Target not connected; dropping message"
                );
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
