//! Room session coordinator: one event loop per joined room.
//!
//! Everything funnels into a single mpsc stream (hub messages, link events,
//! per-target send results, negotiation timers, user commands) and the loop
//! applies them to the peers map and the session tracker. Peer-leave
//! semantics run exactly once per departing link no matter which signal
//! (hub broadcast, connectivity failure, negotiation timeout) arrives first:
//! whoever removes the entry does the cleanup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::client::peer::{IceConfig, LinkEvent, LinkRole, LinkState, PeerLink};
use crate::client::tracker::SessionTracker;
use crate::client::transfer::send::{OutgoingFanout, SendFileMeta, TargetOutcome};
use crate::client::validate;
use crate::config::{NEGOTIATION_TIMEOUT, WS_CONNECT_ATTEMPTS, WS_CONNECT_RETRY_DELAY};
use crate::error::SessionError;
use crate::protocol::{self, ControlMessage, Frame};
use crate::signaling::{ClientMessage, ServerMessage};

/// User actions driving the session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Share a file with every connected peer.
    SendFile(PathBuf),
    /// Drain the received artifact into a directory (default: save dir).
    Save(Option<PathBuf>),
    /// List peers and their link states.
    Peers,
    /// Leave the room and end the session.
    Quit,
}

/// What the session surfaces to its embedder (the CLI shell).
#[derive(Debug)]
pub enum SessionEvent {
    /// Transient informational notice.
    Notice(String),
    /// Transient error notice; the session continues.
    Error(String),
    /// Room member count changed.
    MemberCount(usize),
    PeerConnected { id: String },
    PeerLeft { id: String },
    /// An incoming transfer started.
    Receiving { from: String },
    /// An incoming transfer completed; the artifact awaits `save`.
    FileReceived { file_name: String, file_size: u64 },
    FileSaved { path: PathBuf },
    SendStarted { file_name: String, targets: usize },
    /// Every target reached a terminal status.
    SendFinished { file_name: String },
    /// The session is over (socket closed or quit).
    Ended,
}

/// Everything needed to join a room.
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// HTTP base of the hub, e.g. `http://127.0.0.1:5000`.
    pub hub_url: String,
    pub room_id: String,
    /// Create the room rather than requiring it to exist.
    pub create: bool,
    pub ice: IceConfig,
    /// Default directory for `save`.
    pub save_dir: PathBuf,
}

/// The merged event stream of the coordinator loop.
enum Internal {
    Server(ServerMessage),
    SocketClosed,
    Link(LinkEvent),
    /// An initiator link finished gathering its offer.
    InitiatorReady {
        remote_id: String,
        link: Arc<PeerLink>,
        signal: Value,
    },
    /// A responder link finished gathering its answer.
    ResponderReady {
        remote_id: String,
        link: Arc<PeerLink>,
        signal: Value,
    },
    NegotiationFailed {
        remote_id: String,
    },
    NegotiationTimeout {
        remote_id: String,
    },
    TargetDone(TargetOutcome),
    Command(SessionCommand),
}

struct PeerEntry {
    link: Option<Arc<PeerLink>>,
    role: LinkRole,
    state: LinkState,
    channel_open: bool,
    /// Tell this (late-joined) peer a share is underway once its channel opens.
    announce_sharing_on_open: bool,
}

enum Flow {
    Continue,
    Stop,
}

pub struct RoomSession {
    local_id: String,
    room_id: String,
    ice: IceConfig,
    save_dir: PathBuf,
    peers: HashMap<String, PeerEntry>,
    /// Join order of known peers, for the "User N" labels.
    join_order: Vec<String>,
    member_count: usize,
    tracker: SessionTracker,
    /// Supervisor of the current outgoing fan-out, if one is running.
    fanout: Option<OutgoingFanout>,
    ws_tx: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    done_tx: mpsc::UnboundedSender<TargetOutcome>,
}

/// Join the room and run the session until it ends. Commands arrive on
/// `commands`; everything observable goes out on `events`.
pub async fn run(
    opts: JoinOptions,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<()> {
    validate::validate_room(&opts.hub_url, &opts.room_id, opts.create).await?;

    let url = ws_url(&opts.hub_url);
    let socket = connect_with_retries(&url).await?;
    let (mut sink, mut stream) = socket.split();

    // Transport hello: the hub assigns our member id.
    let local_id = match next_server_message(&mut stream).await? {
        ServerMessage::Connected { id } => id,
        other => return Err(anyhow!("Expected connection hello, got {:?}", other)),
    };
    info!(event = "session_connected", id = %local_id, room = %opts.room_id, "Connected to hub");

    // Writer pump: session → hub.
    let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<ClientMessage>();
    tokio::spawn(async move {
        while let Some(msg) = ws_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = "encode_failure", %e, "Dropping unencodable message");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<Internal>();
    let (link_tx, mut link_rx) = mpsc::unbounded_channel::<LinkEvent>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TargetOutcome>();

    // Reader pump: hub → session.
    {
        let internal = internal_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str(&text) {
                        Ok(msg) => {
                            if internal.send(Internal::Server(msg)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(event = "bad_frame", %e, "Ignoring unparseable hub frame");
                        }
                    },
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = internal.send(Internal::SocketClosed);
        });
    }

    let mut session = RoomSession {
        local_id,
        room_id: opts.room_id.clone(),
        ice: opts.ice,
        save_dir: opts.save_dir,
        peers: HashMap::new(),
        join_order: Vec::new(),
        member_count: 0,
        tracker: SessionTracker::new(),
        fanout: None,
        ws_tx,
        events,
        internal_tx,
        link_tx,
        done_tx,
    };

    session.signal(ClientMessage::JoinRoom {
        room_id: opts.room_id,
    });

    let result = loop {
        let event = tokio::select! {
            Some(ev) = internal_rx.recv() => ev,
            Some(ev) = link_rx.recv() => Internal::Link(ev),
            Some(outcome) = done_rx.recv() => Internal::TargetDone(outcome),
            cmd = commands.recv() => Internal::Command(cmd.unwrap_or(SessionCommand::Quit)),
        };
        match session.handle(event).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    session.teardown().await;
    session.emit(SessionEvent::Ended);
    result
}

impl RoomSession {
    async fn handle(&mut self, event: Internal) -> Result<Flow> {
        match event {
            Internal::Server(msg) => return self.handle_server(msg),
            Internal::SocketClosed => {
                warn!(event = "hub_disconnected", "Signaling channel lost; ending session");
                self.emit(SessionEvent::Error("Lost connection to the hub".into()));
                return Ok(Flow::Stop);
            }
            Internal::Link(ev) => self.handle_link(ev),
            Internal::InitiatorReady {
                remote_id,
                link,
                signal,
            } => self.initiator_ready(remote_id, link, signal),
            Internal::ResponderReady {
                remote_id,
                link,
                signal,
            } => self.responder_ready(remote_id, link, signal),
            Internal::NegotiationFailed { remote_id } => {
                self.negotiation_failed(&remote_id);
            }
            Internal::NegotiationTimeout { remote_id } => {
                let stalled = self
                    .peers
                    .get(&remote_id)
                    .is_some_and(|p| p.state != LinkState::Connected || !p.channel_open);
                if stalled {
                    warn!(event = "negotiation_timeout", remote = %remote_id, "Handshake never completed");
                    self.negotiation_failed(&remote_id);
                }
            }
            Internal::TargetDone(outcome) => self.target_done(outcome),
            Internal::Command(cmd) => return self.handle_command(cmd).await,
        }
        Ok(Flow::Continue)
    }

    // ── Hub messages ─────────────────────────────────────────────────────

    fn handle_server(&mut self, msg: ServerMessage) -> Result<Flow> {
        match msg {
            ServerMessage::AllUsers { users } => {
                // We are the newcomer: initiate toward every existing member.
                for remote_id in users {
                    self.start_initiator(remote_id);
                }
            }
            ServerMessage::TotalUsers { count } => self.set_member_count(count),
            ServerMessage::UserJoined {
                signal,
                caller_id,
                id,
            } => {
                if caller_id != id {
                    debug!(event = "caller_mismatch", %caller_id, %id, "Using connection id");
                }
                self.start_responder(id, signal);
            }
            ServerMessage::ReceivingSignal { signal, id } => self.complete_handshake(id, signal),
            ServerMessage::UserLeft { id } => self.handle_peer_leave(&id),
            ServerMessage::FileReceived { id } => self.receipt_acknowledged(&id),
            ServerMessage::RoomFull { room_id } => {
                self.emit(SessionEvent::Error(format!("Room {room_id} is full")));
                return Err(SessionError::RoomFullOrInvalid.into());
            }
            ServerMessage::Connected { .. } => {
                debug!(event = "duplicate_hello", "Ignoring repeated hello");
            }
        }
        Ok(Flow::Continue)
    }

    /// Create an initiator link toward an existing member. Gathering runs in
    /// its own task; the loop stays responsive.
    fn start_initiator(&mut self, remote_id: String) {
        if self.peers.contains_key(&remote_id) {
            debug!(event = "duplicate_link", remote = %remote_id, "Link already exists");
            return;
        }
        self.insert_peer(remote_id.clone(), LinkRole::Initiator);

        let ice = self.ice.clone();
        let link_tx = self.link_tx.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match PeerLink::initiate(remote_id.clone(), &ice, link_tx).await {
                Ok((link, signal)) => Internal::InitiatorReady {
                    remote_id,
                    link,
                    signal,
                },
                Err(e) => {
                    warn!(event = "offer_failure", remote = %remote_id, %e, "Failed to build offer");
                    Internal::NegotiationFailed { remote_id }
                }
            };
            let _ = internal.send(event);
        });
    }

    /// Create a responder link for a joiner's relayed offer.
    fn start_responder(&mut self, remote_id: String, offer: Value) {
        if self.peers.contains_key(&remote_id) {
            debug!(event = "duplicate_link", remote = %remote_id, "Link already exists");
            return;
        }
        self.insert_peer(remote_id.clone(), LinkRole::Responder);

        let ice = self.ice.clone();
        let link_tx = self.link_tx.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match PeerLink::respond(remote_id.clone(), offer, &ice, link_tx).await {
                Ok((link, signal)) => Internal::ResponderReady {
                    remote_id,
                    link,
                    signal,
                },
                Err(e) => {
                    warn!(event = "answer_failure", remote = %remote_id, %e, "Failed to build answer");
                    Internal::NegotiationFailed { remote_id }
                }
            };
            let _ = internal.send(event);
        });
    }

    fn insert_peer(&mut self, remote_id: String, role: LinkRole) {
        self.peers.insert(
            remote_id.clone(),
            PeerEntry {
                link: None,
                role,
                state: LinkState::New,
                channel_open: false,
                announce_sharing_on_open: false,
            },
        );
        self.join_order.push(remote_id.clone());

        // Bounded negotiation: a handshake still pending after the timeout
        // is resolved as failed instead of hanging forever.
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(NEGOTIATION_TIMEOUT).await;
            let _ = internal.send(Internal::NegotiationTimeout { remote_id });
        });
    }

    fn initiator_ready(&mut self, remote_id: String, link: Arc<PeerLink>, signal: Value) {
        let Some(entry) = self.peers.get_mut(&remote_id) else {
            // Peer left while we were gathering.
            tokio::spawn(async move { link.close().await });
            return;
        };
        entry.link = Some(link);
        entry.state = LinkState::Negotiating;
        self.signal(ClientMessage::SendingSignal {
            user_to_signal: remote_id,
            caller_id: self.local_id.clone(),
            signal,
        });
    }

    fn responder_ready(&mut self, remote_id: String, link: Arc<PeerLink>, signal: Value) {
        let sending = self.tracker.is_sending();
        let Some(entry) = self.peers.get_mut(&remote_id) else {
            tokio::spawn(async move { link.close().await });
            return;
        };
        entry.link = Some(link);
        entry.state = LinkState::Negotiating;
        // A transfer is underway: tell the late joiner once frames can flow.
        entry.announce_sharing_on_open = sending;
        self.signal(ClientMessage::ReturningSignal {
            signal,
            caller_id: remote_id,
        });
    }

    /// The responder's answer came back: feed it to the initiator link.
    fn complete_handshake(&mut self, remote_id: String, signal: Value) {
        let Some(entry) = self.peers.get(&remote_id) else {
            debug!(event = "stale_signal", remote = %remote_id, "Answer for unknown link");
            return;
        };
        if entry.role != LinkRole::Initiator {
            warn!(event = "unexpected_answer", remote = %remote_id, "Answer for a responder link");
            return;
        }
        let Some(link) = entry.link.clone() else {
            warn!(event = "early_answer", remote = %remote_id, "Answer before offer finished");
            return;
        };
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = link.accept_answer(signal).await {
                warn!(event = "handshake_failure", remote = %link.remote_id(), %e, "Failed to apply answer");
                let _ = internal.send(Internal::NegotiationFailed {
                    remote_id: link.remote_id().to_string(),
                });
            }
        });
    }

    // ── Link events ──────────────────────────────────────────────────────

    fn handle_link(&mut self, ev: LinkEvent) {
        match ev {
            LinkEvent::Connected { remote_id } => {
                if let Some(entry) = self.peers.get_mut(&remote_id) {
                    entry.state = LinkState::Connected;
                    self.emit(SessionEvent::PeerConnected { id: remote_id });
                }
            }
            LinkEvent::ChannelOpen { remote_id } => self.channel_open(&remote_id),
            LinkEvent::Frame { remote_id, data } => self.handle_frame(&remote_id, data),
            LinkEvent::Failed { remote_id } => {
                if self.peers.contains_key(&remote_id) {
                    self.emit(SessionEvent::Error(
                        SessionError::NegotiationFailure.to_string(),
                    ));
                    self.handle_peer_leave(&remote_id);
                }
            }
            LinkEvent::Closed { remote_id } => self.handle_peer_leave(&remote_id),
        }
    }

    fn channel_open(&mut self, remote_id: &str) {
        let sending = self.tracker.is_sending();
        let local_id = self.local_id.clone();
        let Some(entry) = self.peers.get_mut(remote_id) else {
            return;
        };
        entry.channel_open = true;

        if entry.announce_sharing_on_open && sending {
            entry.announce_sharing_on_open = false;
            if let Some(link) = entry.link.clone() {
                tokio::spawn(async move {
                    let _ = send_control(
                        &link,
                        &ControlMessage::PeerIsSharing {
                            sender_id: local_id,
                        },
                    )
                    .await;
                });
            }
        }
    }

    /// Decode and dispatch one data-channel frame.
    fn handle_frame(&mut self, remote_id: &str, data: bytes::Bytes) {
        let frame = match protocol::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = "bad_peer_frame", remote = %remote_id, %e, "Dropping undecodable frame");
                return;
            }
        };
        match frame {
            Frame::Control(ControlMessage::BeginTransfer { sender_id }) => {
                debug!(event = "transfer_begin", remote = %remote_id, declared = %sender_id, "Incoming transfer");
                match self.tracker.begin_receive(remote_id) {
                    Ok(()) => self.emit(SessionEvent::Receiving {
                        from: remote_id.to_string(),
                    }),
                    Err(e) => {
                        warn!(event = "concurrent_transfer", remote = %remote_id, %e, "Rejecting overlapping transfer");
                    }
                }
            }
            Frame::Control(ControlMessage::PeerIsSharing { .. }) => {
                self.tracker.peer_sharing_started(remote_id);
            }
            Frame::Control(ControlMessage::EndSharing) => {
                self.tracker.end_sharing();
            }
            Frame::Control(ControlMessage::Complete {
                file_name,
                file_size,
            }) => {
                if let Some(info) = self
                    .tracker
                    .complete_receive(remote_id, file_name, file_size)
                {
                    info!(
                        event = "file_received",
                        from = %info.sender_id,
                        file = %info.file_name,
                        bytes = info.file_size,
                        "Incoming transfer complete"
                    );
                    // Receipt travels out-of-band, through the hub.
                    self.signal(ClientMessage::FileReceived {
                        sender_id: remote_id.to_string(),
                    });
                    self.emit(SessionEvent::FileReceived {
                        file_name: info.file_name,
                        file_size: info.file_size,
                    });
                }
            }
            Frame::Chunk(chunk) => {
                if !self.tracker.append_chunk(remote_id, chunk) {
                    debug!(event = "stray_chunk", remote = %remote_id, "Chunk outside an active receive");
                }
            }
        }
    }

    // ── Transfer lifecycle ───────────────────────────────────────────────

    /// Receipt relayed from a receiver: flip that target to Acknowledged.
    fn receipt_acknowledged(&mut self, receiver_id: &str) {
        if self.tracker.target_acknowledged(receiver_id) {
            let label = self.member_label(receiver_id);
            self.emit(SessionEvent::Notice(format!("{label} received the file")));
            self.maybe_finish_send();
        } else {
            debug!(event = "stray_receipt", from = %receiver_id, "Receipt for no in-flight target");
        }
    }

    /// A target's stream task ended. Success keeps the target in flight
    /// until its receipt arrives; failure is terminal for that target.
    fn target_done(&mut self, outcome: TargetOutcome) {
        match outcome.result {
            Ok(()) => {
                debug!(event = "target_stream_complete", target = %outcome.target_id, "Stream fully written");
            }
            Err(e) => {
                if self.tracker.target_failed(&outcome.target_id) {
                    let label = self.member_label(&outcome.target_id);
                    self.emit(SessionEvent::Error(format!("Sending to {label} failed: {e}")));
                    if let Some(fanout) = &mut self.fanout {
                        fanout.cancel_target(&outcome.target_id);
                    }
                    self.maybe_finish_send();
                }
            }
        }
    }

    /// Exactly-once session completion: when every target is terminal,
    /// broadcast EndSharing to the remaining peers and discard the session.
    fn maybe_finish_send(&mut self) {
        if let Some(finished) = self.tracker.finish_if_done() {
            self.broadcast_end_sharing();
            self.fanout = None;
            self.emit(SessionEvent::SendFinished {
                file_name: finished.file_name,
            });
        }
    }

    fn broadcast_end_sharing(&self) {
        for entry in self.peers.values() {
            if !entry.channel_open {
                continue;
            }
            if let Some(link) = entry.link.clone() {
                tokio::spawn(async move {
                    let _ = send_control(&link, &ControlMessage::EndSharing).await;
                });
            }
        }
    }

    // ── Peer departure ───────────────────────────────────────────────────

    /// Runs exactly once per departing peer: removing the entry is the
    /// guard, so the hub broadcast, a connectivity failure, and a timeout
    /// can all race here safely.
    fn handle_peer_leave(&mut self, remote_id: &str) {
        let Some(entry) = self.peers.remove(remote_id) else {
            return;
        };
        self.join_order.retain(|id| id != remote_id);
        if self.member_count > 0 {
            self.set_member_count(self.member_count - 1);
        }
        info!(event = "peer_left", remote = %remote_id, "Peer departed");
        self.emit(SessionEvent::PeerLeft {
            id: remote_id.to_string(),
        });

        if let Some(link) = entry.link {
            tokio::spawn(async move { link.close().await });
        }

        // Receiving from them: discard partials, unblock the room.
        if self.tracker.peer_left(remote_id) {
            self.broadcast_end_sharing();
            self.emit(SessionEvent::Error(SessionError::TransferAborted.to_string()));
        }

        // Sending to them: cut that stream, never retry.
        if self.tracker.is_active_target(remote_id) {
            if let Some(fanout) = &mut self.fanout {
                fanout.cancel_target(remote_id);
            }
            self.tracker.target_failed(remote_id);
            let label = self.member_label(remote_id);
            self.emit(SessionEvent::Error(format!(
                "{label} disconnected during the transfer"
            )));
            self.maybe_finish_send();
        }
    }

    fn negotiation_failed(&mut self, remote_id: &str) {
        if self.peers.contains_key(remote_id) {
            self.emit(SessionEvent::Error(
                SessionError::NegotiationFailure.to_string(),
            ));
            self.handle_peer_leave(remote_id);
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: SessionCommand) -> Result<Flow> {
        match cmd {
            SessionCommand::SendFile(path) => self.send_file(path).await,
            SessionCommand::Save(dir) => self.save_artifact(dir),
            SessionCommand::Peers => self.list_peers(),
            SessionCommand::Quit => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue)
    }

    async fn send_file(&mut self, path: PathBuf) {
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                self.emit(SessionEvent::Error(SessionError::NoFileSelected.to_string()));
                return;
            }
        };

        let targets: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.channel_open)
            .map(|(id, _)| id.clone())
            .collect();
        if targets.is_empty() {
            self.emit(SessionEvent::Notice(
                "No connected peers to share with yet".into(),
            ));
            return;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        if let Err(e) = self
            .tracker
            .begin_send(file_name.clone(), targets.clone())
        {
            // Input guards are non-fatal notices, not errors.
            self.emit(SessionEvent::Notice(e.to_string()));
            return;
        }

        let file = Arc::new(SendFileMeta {
            path,
            file_name: file_name.clone(),
            file_size: meta.len(),
        });

        let mut fanout = OutgoingFanout::new();
        for target_id in &targets {
            let link = self
                .peers
                .get(target_id)
                .and_then(|entry| entry.link.clone());
            let Some(link) = link else {
                self.tracker.target_failed(target_id);
                continue;
            };
            fanout.spawn_target(
                target_id.clone(),
                link,
                self.local_id.clone(),
                file.clone(),
                self.done_tx.clone(),
            );
            self.tracker.mark_target_sending(target_id);
        }
        self.fanout = Some(fanout);

        info!(
            event = "send_started",
            file = %file_name,
            size = file.file_size,
            targets = targets.len(),
            "Fan-out started"
        );
        self.emit(SessionEvent::SendStarted {
            file_name,
            targets: targets.len(),
        });
        // Every spawn may have been skipped (links torn down under us).
        self.maybe_finish_send();
    }

    fn save_artifact(&mut self, dir: Option<PathBuf>) {
        let Some(artifact) = self.tracker.take_artifact() else {
            self.emit(SessionEvent::Notice("No received file to save".into()));
            return;
        };
        let dir = dir.unwrap_or_else(|| self.save_dir.clone());
        let events = self.events.clone();
        tokio::spawn(async move {
            match artifact.save_to(&dir).await {
                Ok(path) => {
                    let _ = events.send(SessionEvent::FileSaved { path });
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::Error(format!("Save failed: {e}")));
                }
            }
        });
    }

    fn list_peers(&self) {
        if self.peers.is_empty() {
            self.emit(SessionEvent::Notice(format!(
                "No peers in room {} yet",
                self.room_id
            )));
            return;
        }
        let mut lines = vec![format!("Room {} ({} member(s)):", self.room_id, self.member_count)];
        for id in &self.join_order {
            if let Some(entry) = self.peers.get(id) {
                lines.push(format!(
                    "{} [{:?}, {:?}{}]",
                    id,
                    entry.role,
                    entry.state,
                    if entry.channel_open { ", channel open" } else { "" }
                ));
            }
        }
        self.emit(SessionEvent::Notice(lines.join("\n")));
    }

    // ── Plumbing ─────────────────────────────────────────────────────────

    async fn teardown(&mut self) {
        if let Some(mut fanout) = self.fanout.take() {
            fanout.cancel_all();
        }
        for (id, entry) in self.peers.drain() {
            self.tracker.target_cancelled(&id);
            if let Some(link) = entry.link {
                tokio::spawn(async move { link.close().await });
            }
        }
    }

    fn set_member_count(&mut self, count: usize) {
        if count != self.member_count {
            self.member_count = count;
            self.emit(SessionEvent::MemberCount(count));
        }
    }

    /// "User N" by join order, falling back to a shortened id.
    fn member_label(&self, member_id: &str) -> String {
        match self.join_order.iter().position(|id| id == member_id) {
            Some(idx) => format!("User {}", idx + 1),
            None => format!("User {}", &member_id[..member_id.len().min(8)]),
        }
    }

    fn signal(&self, msg: ClientMessage) {
        let _ = self.ws_tx.send(msg);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn send_control(link: &PeerLink, msg: &ControlMessage) -> Result<()> {
    use crate::client::transfer::FrameSink;
    link.send_frame(protocol::encode_control(msg)?).await
}

/// Derive the hub's WebSocket endpoint from its HTTP base.
fn ws_url(hub_url: &str) -> String {
    let base = hub_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    };
    format!("{ws}/ws")
}

async fn connect_with_retries(
    url: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match connect_async(url).await {
            Ok((socket, _)) => return Ok(socket),
            Err(e) if attempt < WS_CONNECT_ATTEMPTS => {
                warn!(
                    event = "hub_connect_retry",
                    attempt,
                    max = WS_CONNECT_ATTEMPTS,
                    %e,
                    "Hub not reachable; retrying"
                );
                tokio::time::sleep(WS_CONNECT_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Could not reach the hub at {url}"))
            }
        }
    }
}

/// Read frames until the first parseable server message.
async fn next_server_message<S>(stream: &mut S) -> Result<ServerMessage>
where
    S: futures_util::Stream<
            Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    let hello = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if let Ok(msg) = serde_json::from_str(&text) {
                        return Some(msg);
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .context("Timed out waiting for the hub hello")?;
    hello.ok_or_else(|| anyhow!("Hub closed the connection before the hello"))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_is_derived_from_the_http_base() {
        assert_eq!(ws_url("http://127.0.0.1:5000"), "ws://127.0.0.1:5000/ws");
        assert_eq!(ws_url("http://127.0.0.1:5000/"), "ws://127.0.0.1:5000/ws");
        assert_eq!(ws_url("https://drop.example"), "wss://drop.example/ws");
        assert_eq!(ws_url("drop.example:5000"), "ws://drop.example:5000/ws");
    }
}
