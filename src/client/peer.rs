//! Peer link: one negotiated WebRTC connection to one other room member,
//! carrying a single ordered, reliable data channel.
//!
//! Negotiation is trickle-free: each direction produces exactly one payload
//! (a full session description, gathered candidates included), relayed
//! through the hub. The joining member initiates toward every member already
//! present; the present members respond. One handshake per pair, roles
//! fixed by join order, so offers never compete.
//!
//! The link pushes everything it observes (connectivity transitions, channel
//! open, incoming frames) into the session loop as [`LinkEvent`]s; it holds
//! no transfer state of its own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::client::transfer::FrameSink;
use crate::config::{
    DC_BUFFERED_AMOUNT_HIGH, DEFAULT_STUN_URL, DEFAULT_TURN_CREDENTIAL, DEFAULT_TURN_URL,
    DEFAULT_TURN_USERNAME, ICE_GATHER_TIMEOUT,
};

/// Label of the single data channel a link carries.
const CHANNEL_LABEL: &str = "file";

/// Which side of the handshake this link is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Created by the joiner toward an existing member; produces the offer.
    Initiator,
    /// Created by an existing member for a joiner; produces the answer.
    Responder,
}

/// Link lifecycle, tracked by the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

/// What a link reports back into the session loop.
#[derive(Debug)]
pub enum LinkEvent {
    /// The connectivity layer established the connection.
    Connected { remote_id: String },
    /// The data channel is open; frames can flow.
    ChannelOpen { remote_id: String },
    /// An incoming data-channel frame (undecoded).
    Frame { remote_id: String, data: Bytes },
    /// Connectivity failed; terminal.
    Failed { remote_id: String },
    /// The connection closed; terminal.
    Closed { remote_id: String },
}

/// STUN/TURN configuration, overridable from the CLI.
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_url: String,
    pub turn_url: String,
    pub turn_username: String,
    pub turn_credential: String,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_url: DEFAULT_STUN_URL.to_string(),
            turn_url: DEFAULT_TURN_URL.to_string(),
            turn_username: DEFAULT_TURN_USERNAME.to_string(),
            turn_credential: DEFAULT_TURN_CREDENTIAL.to_string(),
        }
    }
}

impl IceConfig {
    fn servers(&self) -> Vec<RTCIceServer> {
        vec![
            RTCIceServer {
                urls: vec![self.stun_url.clone()],
                ..Default::default()
            },
            RTCIceServer {
                urls: vec![self.turn_url.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
                ..Default::default()
            },
        ]
    }
}

pub struct PeerLink {
    remote_id: String,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
}

impl PeerLink {
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Initiator side: create the connection and the data channel, produce
    /// the single offer payload to relay to `remote_id`.
    pub async fn initiate(
        remote_id: String,
        ice: &IceConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<(Arc<Self>, Value)> {
        let pc = new_peer_connection(ice).await?;
        attach_pc_handlers(&pc, &remote_id, &events);

        let channel = Arc::new(RwLock::new(None));
        let dc = pc
            .create_data_channel(
                CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        attach_dc_handlers(&dc, &remote_id, &events);
        *channel.write().await = Some(dc);

        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;
        let signal = gather_local_description(&pc).await?;

        info!(
            event = "link_offer_ready",
            remote = %remote_id,
            "Initiator negotiation payload gathered"
        );

        Ok((
            Arc::new(Self {
                remote_id,
                pc,
                channel,
            }),
            signal,
        ))
    }

    /// Responder side: accept the relayed offer, produce the single answer
    /// payload to relay back.
    pub async fn respond(
        remote_id: String,
        offer: Value,
        ice: &IceConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<(Arc<Self>, Value)> {
        let pc = new_peer_connection(ice).await?;
        attach_pc_handlers(&pc, &remote_id, &events);

        // The initiator created the channel; it arrives via callback.
        let channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>> = Arc::new(RwLock::new(None));
        {
            let channel = channel.clone();
            let remote = remote_id.clone();
            let events = events.clone();
            pc.on_data_channel(Box::new(move |dc| {
                let channel = channel.clone();
                let remote = remote.clone();
                let events = events.clone();
                Box::pin(async move {
                    attach_dc_handlers(&dc, &remote, &events);
                    *channel.write().await = Some(dc);
                })
            }));
        }

        let desc: RTCSessionDescription =
            serde_json::from_value(offer).context("Malformed offer payload")?;
        pc.set_remote_description(desc).await?;

        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer).await?;
        let signal = gather_local_description(&pc).await?;

        info!(
            event = "link_answer_ready",
            remote = %remote_id,
            "Responder negotiation payload gathered"
        );

        Ok((
            Arc::new(Self {
                remote_id,
                pc,
                channel,
            }),
            signal,
        ))
    }

    /// Initiator side: feed the relayed answer to complete the handshake.
    pub async fn accept_answer(&self, answer: Value) -> Result<()> {
        let desc: RTCSessionDescription =
            serde_json::from_value(answer).context("Malformed answer payload")?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(event = "link_close_error", remote = %self.remote_id, %e, "Error closing link");
        }
    }
}

impl FrameSink for PeerLink {
    async fn send_frame(&self, frame: Bytes) -> Result<()> {
        let dc = self
            .channel
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Data channel to {} not ready", self.remote_id))?;
        wait_for_buffer_space(&dc, frame.len()).await?;
        dc.send(&frame)
            .await
            .with_context(|| format!("Send to {} failed", self.remote_id))?;
        Ok(())
    }
}

// ── Connection plumbing ──────────────────────────────────────────────────────

async fn new_peer_connection(ice: &IceConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media = MediaEngine::default();
    let registry = register_default_interceptors(Registry::new(), &mut media)?;
    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();

    let pc = api
        .new_peer_connection(RTCConfiguration {
            ice_servers: ice.servers(),
            ..Default::default()
        })
        .await?;
    Ok(Arc::new(pc))
}

/// Surface connectivity transitions as link events. `Disconnected` is
/// transient (ICE may recover) and only logged; the terminal states map to
/// `Failed`/`Closed`.
fn attach_pc_handlers(
    pc: &Arc<RTCPeerConnection>,
    remote_id: &str,
    events: &mpsc::UnboundedSender<LinkEvent>,
) {
    let remote = remote_id.to_string();
    let events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let remote = remote.clone();
        let events = events.clone();
        Box::pin(async move {
            match state {
                RTCPeerConnectionState::Connected => {
                    info!(event = "link_connected", remote = %remote, "Peer link established");
                    let _ = events.send(LinkEvent::Connected { remote_id: remote });
                }
                RTCPeerConnectionState::Failed => {
                    warn!(event = "link_failed", remote = %remote, "Peer link failed");
                    let _ = events.send(LinkEvent::Failed { remote_id: remote });
                }
                RTCPeerConnectionState::Closed => {
                    debug!(event = "link_closed", remote = %remote, "Peer link closed");
                    let _ = events.send(LinkEvent::Closed { remote_id: remote });
                }
                RTCPeerConnectionState::Disconnected => {
                    warn!(event = "link_transient_disconnect", remote = %remote, "Transient disconnect");
                }
                _ => {}
            }
        })
    }));
}

fn attach_dc_handlers(
    dc: &Arc<RTCDataChannel>,
    remote_id: &str,
    events: &mpsc::UnboundedSender<LinkEvent>,
) {
    {
        let remote = remote_id.to_string();
        let events = events.clone();
        dc.on_open(Box::new(move || {
            let remote = remote.clone();
            let events = events.clone();
            Box::pin(async move {
                debug!(event = "channel_open", remote = %remote, "Data channel open");
                let _ = events.send(LinkEvent::ChannelOpen { remote_id: remote });
            })
        }));
    }

    {
        let remote = remote_id.to_string();
        let events = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let remote = remote.clone();
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(LinkEvent::Frame {
                    remote_id: remote,
                    data: msg.data,
                });
            })
        }));
    }

    {
        let remote = remote_id.to_string();
        dc.on_close(Box::new(move || {
            let remote = remote.clone();
            Box::pin(async move {
                // The peer-connection state change carries the terminal event.
                debug!(event = "channel_closed", remote = %remote, "Data channel closed");
            })
        }));
    }
}

/// Wait for ICE gathering to finish, then return the complete local
/// description as the opaque signal blob.
async fn gather_local_description(pc: &Arc<RTCPeerConnection>) -> Result<Value> {
    let mut gathered = pc.gathering_complete_promise().await;
    timeout(ICE_GATHER_TIMEOUT, gathered.recv())
        .await
        .context("ICE gathering timeout")?;

    let desc = pc
        .local_description()
        .await
        .ok_or_else(|| anyhow!("No local description after ICE gathering"))?;
    Ok(serde_json::to_value(&desc)?)
}

/// Block until the channel's send buffer has room for `next_frame` bytes.
/// Bounded: after the deadline the frame is sent anyway (the SCTP layer
/// still delivers; the watermark only shapes memory).
async fn wait_for_buffer_space(dc: &Arc<RTCDataChannel>, next_frame: usize) -> Result<()> {
    const MAX_WAIT: Duration = Duration::from_secs(10);
    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    let deadline = tokio::time::Instant::now() + MAX_WAIT;
    loop {
        if dc.ready_state() != RTCDataChannelState::Open {
            return Err(anyhow!(
                "Data channel '{}' not open: {:?}",
                dc.label(),
                dc.ready_state()
            ));
        }
        if dc.buffered_amount().await + next_frame <= DC_BUFFERED_AMOUNT_HIGH {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                event = "backpressure_timeout",
                channel = %dc.label(),
                "Send buffer did not drain below the watermark; sending anyway"
            );
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_config_maps_to_stun_and_turn_servers() {
        let ice = IceConfig::default();
        let servers = ice.servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec![DEFAULT_STUN_URL.to_string()]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].urls, vec![DEFAULT_TURN_URL.to_string()]);
        assert_eq!(servers[1].username, DEFAULT_TURN_USERNAME);
        assert_eq!(servers[1].credential, DEFAULT_TURN_CREDENTIAL);
    }
}
