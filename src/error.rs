//! User-facing session error taxonomy.
//!
//! These are the errors a room member can actually encounter and act on.
//! Infrastructure failures (socket I/O, task joins) stay `anyhow` at the
//! boundaries; everything here is either a pre-join verdict, a transfer
//! outcome, or an input guard.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The room does not exist, is full, or the id fails the validity check.
    /// Surfaced before joining; the user is sent back to pick another room.
    #[error("room is full or the room id is invalid")]
    RoomFullOrInvalid,

    /// The bounded-wait room validation call did not complete in time.
    #[error("network timeout while validating the room")]
    NetworkTimeout,

    /// Peer connectivity was never established; treated as a peer leave.
    #[error("peer connection could not be established")]
    NegotiationFailure,

    /// The remote side disconnected mid-stream. Partial data is discarded.
    #[error("transfer aborted: peer disconnected mid-stream")]
    TransferAborted,

    /// A file is currently being received; sends are rejected until it
    /// completes. Non-fatal input guard.
    #[error("a user is sharing a file, hold on")]
    AlreadyReceiving,

    /// A send is already in progress. Non-fatal input guard.
    #[error("already sending a file")]
    AlreadySending,

    /// No file was selected, or the selected path is not readable.
    #[error("please select a file")]
    NoFileSelected,
}
