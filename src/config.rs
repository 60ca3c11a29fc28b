//! Centralized configuration constants for roomdrop.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (frame tag bytes) stay in the
//! protocol module.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Chunk size in bytes. Files are split into ordered ranges of exactly this
/// size; the last chunk may be shorter. Small enough to stay well under the
/// 64 KB SCTP message ceiling with the one-byte frame tag included.
pub const CHUNK_SIZE: usize = 16_000;

/// Chunker read-ahead: max chunks buffered between the disk-reader task and
/// a target's send loop. Bounds per-target memory while keeping the data
/// channel saturated during disk reads.
pub const CHUNK_READ_AHEAD: usize = 32;

/// High water mark for the data channel's SCTP send buffer (bytes). When
/// `buffered_amount` exceeds this value the send loop pauses until the
/// buffer drains, so a slow peer bounds its own memory, not ours.
pub const DC_BUFFERED_AMOUNT_HIGH: usize = 1024 * 1024;

// ── Rooms ────────────────────────────────────────────────────────────────────

/// Maximum members per room. Enforced at the hub's join admission check and
/// in the client's pre-join validation; the registry itself never rejects.
pub const ROOM_CAPACITY: usize = 4;

/// Minimum length of a valid room id. Checked client-side before any
/// network traffic.
pub const MIN_ROOM_ID_LEN: usize = 8;

/// Bounded wait for the pre-join `GET /api/rooms` validation call, after
/// which the join attempt is treated as a network failure.
pub const ROOM_VALIDATION_TIMEOUT: Duration = Duration::from_secs(25);

// ── Connection / Negotiation ─────────────────────────────────────────────────

/// Timeout for ICE candidate gathering while producing the single
/// non-trickle negotiation payload.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(15);

/// Bounded negotiation timeout: a link still not `Connected` this long after
/// creation is treated as failed and torn down like a departed peer.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum attempts to reach the hub's WebSocket endpoint on startup before
/// surfacing terminal disconnect. Established connections are not re-dialed;
/// a drop after join is terminal for the session.
pub const WS_CONNECT_ATTEMPTS: u32 = 5;

/// Delay between hub connection attempts.
pub const WS_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

// ── ICE servers ──────────────────────────────────────────────────────────────

/// Default STUN server URL.
pub const DEFAULT_STUN_URL: &str = "stun:openrelay.metered.ca:80";

/// Default TURN relay URL and credentials (a public open relay).
pub const DEFAULT_TURN_URL: &str = "turn:openrelay.metered.ca:443";
pub const DEFAULT_TURN_USERNAME: &str = "openrelayproject";
pub const DEFAULT_TURN_CREDENTIAL: &str = "openrelayproject";

// ── Hub ──────────────────────────────────────────────────────────────────────

/// Default listen address for `roomdrop serve`.
pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:5000";
