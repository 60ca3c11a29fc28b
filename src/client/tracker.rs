//! Session state tracker: the only cross-link mutable state on a client.
//!
//! Owns the "am I sending" / "am I receiving" flags, the per-target send
//! statuses, and the received-artifact slot. Every mutation goes through the
//! transition methods here; the coordinating loop never pokes the flags
//! directly, so mid-transfer joins and leaves always observe a consistent
//! picture.

use bytes::Bytes;

use crate::client::transfer::recv::{IncomingTransfer, ReceivedFile};
use crate::error::SessionError;

/// Per-target progress of an outgoing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Pending,
    Sending,
    Acknowledged,
    Failed,
    Cancelled,
}

impl TargetStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetStatus::Acknowledged | TargetStatus::Failed | TargetStatus::Cancelled
        )
    }
}

/// Bookkeeping for one outgoing transfer session.
#[derive(Debug)]
struct OutgoingState {
    file_name: String,
    targets: Vec<(String, TargetStatus)>,
}

/// Final report of a completed outgoing session, produced exactly once.
#[derive(Debug)]
pub struct FinishedSend {
    pub file_name: String,
    pub statuses: Vec<(String, TargetStatus)>,
}

/// Summary surfaced when an incoming transfer completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedInfo {
    pub sender_id: String,
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Default)]
pub struct SessionTracker {
    outgoing: Option<OutgoingState>,
    incoming: Option<IncomingTransfer>,
    /// Set while a transfer runs elsewhere in the room (learned via
    /// `PeerIsSharing`); blocks local sends without starting a session.
    peer_sharing: Option<String>,
    /// Completed artifact, held until the user drains it.
    artifact: Option<ReceivedFile>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sending(&self) -> bool {
        self.outgoing.is_some()
    }

    /// True while an accumulation is active or a peer announced it is
    /// sharing elsewhere in the room.
    pub fn is_receiving(&self) -> bool {
        self.incoming.is_some() || self.peer_sharing.is_some()
    }

    // ── Outgoing transitions ─────────────────────────────────────────────

    /// Open an outgoing session toward `targets`. Guards the exclusivity
    /// rules: no send while receiving, one send at a time.
    pub fn begin_send(
        &mut self,
        file_name: String,
        targets: Vec<String>,
    ) -> Result<(), SessionError> {
        if self.is_receiving() {
            return Err(SessionError::AlreadyReceiving);
        }
        if self.outgoing.is_some() {
            return Err(SessionError::AlreadySending);
        }
        self.outgoing = Some(OutgoingState {
            file_name,
            targets: targets
                .into_iter()
                .map(|id| (id, TargetStatus::Pending))
                .collect(),
        });
        Ok(())
    }

    /// The target's stream task was spawned.
    pub fn mark_target_sending(&mut self, target_id: &str) {
        self.set_status(target_id, TargetStatus::Sending);
    }

    /// Receipt acknowledgment arrived from this target. Returns whether the
    /// target was in flight (late/duplicate acks are no-ops).
    pub fn target_acknowledged(&mut self, target_id: &str) -> bool {
        self.set_status(target_id, TargetStatus::Acknowledged)
    }

    /// The target's link died or its stream errored. Not retried.
    pub fn target_failed(&mut self, target_id: &str) -> bool {
        self.set_status(target_id, TargetStatus::Failed)
    }

    /// Local teardown cut this target's stream.
    pub fn target_cancelled(&mut self, target_id: &str) -> bool {
        self.set_status(target_id, TargetStatus::Cancelled)
    }

    /// Whether this member is a still-in-flight target of the current send.
    pub fn is_active_target(&self, member_id: &str) -> bool {
        self.outgoing
            .as_ref()
            .map(|out| {
                out.targets
                    .iter()
                    .any(|(id, status)| id == member_id && !status.is_terminal())
            })
            .unwrap_or(false)
    }

    /// Close the session once every target is terminal. Takes the session,
    /// so the "all done" edge fires exactly once.
    pub fn finish_if_done(&mut self) -> Option<FinishedSend> {
        let done = self
            .outgoing
            .as_ref()
            .is_some_and(|out| out.targets.iter().all(|(_, s)| s.is_terminal()));
        if !done {
            return None;
        }
        self.outgoing.take().map(|out| FinishedSend {
            file_name: out.file_name,
            statuses: out.targets,
        })
    }

    /// Transition a non-terminal target; terminal statuses are never
    /// overwritten. Returns whether a transition happened.
    fn set_status(&mut self, target_id: &str, status: TargetStatus) -> bool {
        let Some(out) = self.outgoing.as_mut() else {
            return false;
        };
        match out
            .targets
            .iter_mut()
            .find(|(id, s)| id == target_id && !s.is_terminal())
        {
            Some((_, s)) => {
                *s = status;
                true
            }
            None => false,
        }
    }

    // ── Incoming transitions ─────────────────────────────────────────────

    /// `BeginTransfer` from `sender_id`: start accumulating.
    pub fn begin_receive(&mut self, sender_id: &str) -> Result<(), SessionError> {
        if self.incoming.is_some() {
            return Err(SessionError::AlreadyReceiving);
        }
        // The announced share has turned into our own receive.
        self.peer_sharing = None;
        self.incoming = Some(IncomingTransfer::new(sender_id));
        Ok(())
    }

    /// `PeerIsSharing`: a transfer runs elsewhere; park, don't accumulate.
    pub fn peer_sharing_started(&mut self, sender_id: &str) {
        if self.incoming.is_none() {
            self.peer_sharing = Some(sender_id.to_string());
        }
    }

    /// Chunk payload from `from_id`. Appended only while an accumulation
    /// from that sender is active; anything else is dropped.
    pub fn append_chunk(&mut self, from_id: &str, chunk: Bytes) -> bool {
        match self.incoming.as_mut() {
            Some(incoming) if incoming.sender_id() == from_id => {
                incoming.append(chunk);
                true
            }
            _ => false,
        }
    }

    /// `Complete` from `from_id`: seal the accumulation into the artifact
    /// slot and report it. `None` if no matching accumulation is active.
    pub fn complete_receive(
        &mut self,
        from_id: &str,
        file_name: String,
        file_size: u64,
    ) -> Option<ReceivedInfo> {
        match self.incoming.as_ref() {
            Some(incoming) if incoming.sender_id() == from_id => {
                let incoming = self.incoming.take().expect("checked above");
                let info = ReceivedInfo {
                    sender_id: from_id.to_string(),
                    file_name: file_name.clone(),
                    file_size,
                };
                self.artifact = Some(incoming.complete(file_name, file_size));
                Some(info)
            }
            _ => None,
        }
    }

    /// `EndSharing`: the room-wide share is over; clear residual bookkeeping.
    pub fn end_sharing(&mut self) {
        self.peer_sharing = None;
        self.incoming = None;
    }

    /// The member left. Discards a mid-stream accumulation from them
    /// (partial data is not salvaged). Returns whether an accumulation was
    /// aborted, so the caller can surface the transfer failure.
    pub fn peer_left(&mut self, member_id: &str) -> bool {
        if self.peer_sharing.as_deref() == Some(member_id) {
            self.peer_sharing = None;
        }
        match self.incoming.as_ref() {
            Some(incoming) if incoming.sender_id() == member_id => {
                tracing::debug!(
                    event = "receive_discarded",
                    sender = %member_id,
                    bytes = incoming.received_bytes(),
                    "Dropping partial accumulation"
                );
                self.incoming = None;
                true
            }
            _ => false,
        }
    }

    // ── Artifact ─────────────────────────────────────────────────────────

    /// Drain the artifact (user-initiated download).
    pub fn take_artifact(&mut self) -> Option<ReceivedFile> {
        self.artifact.take()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn three_targets_finish_exactly_once() {
        let mut tracker = SessionTracker::new();
        tracker
            .begin_send("f.bin".into(), targets(&["t1", "t2", "t3"]))
            .unwrap();
        for id in ["t1", "t2", "t3"] {
            tracker.mark_target_sending(id);
        }
        assert!(tracker.is_sending());

        assert!(tracker.target_acknowledged("t1"));
        assert!(tracker.finish_if_done().is_none());
        assert!(tracker.target_acknowledged("t2"));
        assert!(tracker.finish_if_done().is_none());
        assert!(tracker.target_acknowledged("t3"));

        let finished = tracker.finish_if_done().expect("all targets terminal");
        assert_eq!(finished.file_name, "f.bin");
        assert!(finished
            .statuses
            .iter()
            .all(|(_, s)| *s == TargetStatus::Acknowledged));

        // The edge fires once; afterwards the session is gone.
        assert!(tracker.finish_if_done().is_none());
        assert!(!tracker.is_sending());
    }

    #[test]
    fn disconnected_target_fails_and_session_still_completes() {
        let mut tracker = SessionTracker::new();
        tracker
            .begin_send("f".into(), targets(&["t1", "t2"]))
            .unwrap();
        tracker.mark_target_sending("t1");
        tracker.mark_target_sending("t2");

        assert!(tracker.target_failed("t2"));
        assert!(tracker.finish_if_done().is_none());
        assert!(tracker.target_acknowledged("t1"));

        let finished = tracker.finish_if_done().unwrap();
        let by_id: std::collections::HashMap<_, _> = finished.statuses.into_iter().collect();
        assert_eq!(by_id["t1"], TargetStatus::Acknowledged);
        assert_eq!(by_id["t2"], TargetStatus::Failed);
    }

    #[test]
    fn terminal_statuses_are_never_overwritten() {
        let mut tracker = SessionTracker::new();
        tracker.begin_send("f".into(), targets(&["t1"])).unwrap();
        tracker.mark_target_sending("t1");

        assert!(tracker.target_failed("t1"));
        // Late ack after the failure is a no-op.
        assert!(!tracker.target_acknowledged("t1"));
        assert!(!tracker.is_active_target("t1"));

        let finished = tracker.finish_if_done().unwrap();
        assert_eq!(finished.statuses[0].1, TargetStatus::Failed);
    }

    #[test]
    fn send_guards_enforce_exclusivity() {
        let mut tracker = SessionTracker::new();
        tracker.begin_receive("s").unwrap();
        assert_eq!(
            tracker.begin_send("f".into(), targets(&["t"])),
            Err(SessionError::AlreadyReceiving)
        );

        tracker.peer_left("s");
        tracker.begin_send("f".into(), targets(&["t"])).unwrap();
        assert_eq!(
            tracker.begin_send("g".into(), targets(&["t"])),
            Err(SessionError::AlreadySending)
        );
    }

    #[test]
    fn peer_sharing_blocks_sends_without_a_session() {
        let mut tracker = SessionTracker::new();
        tracker.peer_sharing_started("other");
        assert!(tracker.is_receiving());
        assert_eq!(
            tracker.begin_send("f".into(), targets(&["t"])),
            Err(SessionError::AlreadyReceiving)
        );

        tracker.end_sharing();
        assert!(!tracker.is_receiving());
        assert!(tracker.begin_send("f".into(), targets(&["t"])).is_ok());
    }

    #[test]
    fn chunks_append_only_for_the_active_sender() {
        let mut tracker = SessionTracker::new();
        tracker.begin_receive("alice").unwrap();
        assert!(tracker.append_chunk("alice", Bytes::from_static(b"abc")));
        assert!(!tracker.append_chunk("mallory", Bytes::from_static(b"zzz")));

        let info = tracker
            .complete_receive("alice", "f.txt".into(), 3)
            .unwrap();
        assert_eq!(info.file_name, "f.txt");
        assert_eq!(info.file_size, 3);

        let artifact = tracker.take_artifact().unwrap();
        assert_eq!(artifact.into_bytes(), b"abc");
        // Drained once.
        assert!(tracker.take_artifact().is_none());
    }

    #[test]
    fn sender_disconnect_mid_stream_discards_and_unblocks() {
        let mut tracker = SessionTracker::new();
        tracker.begin_receive("alice").unwrap();
        tracker.append_chunk("alice", Bytes::from_static(b"partial"));

        assert!(tracker.peer_left("alice"));
        assert!(!tracker.is_receiving());
        assert!(tracker.take_artifact().is_none());

        // A new transfer can begin immediately.
        tracker.begin_receive("bob").unwrap();
        assert!(tracker.is_receiving());
    }

    #[test]
    fn unrelated_peer_leave_does_not_touch_the_receive() {
        let mut tracker = SessionTracker::new();
        tracker.begin_receive("alice").unwrap();
        assert!(!tracker.peer_left("bob"));
        assert!(tracker.is_receiving());
    }

    #[test]
    fn complete_from_wrong_sender_is_ignored() {
        let mut tracker = SessionTracker::new();
        tracker.begin_receive("alice").unwrap();
        assert!(tracker
            .complete_receive("mallory", "evil".into(), 1)
            .is_none());
        assert!(tracker.is_receiving());
    }

    #[test]
    fn second_begin_transfer_is_rejected() {
        let mut tracker = SessionTracker::new();
        tracker.begin_receive("alice").unwrap();
        assert_eq!(
            tracker.begin_receive("bob"),
            Err(SessionError::AlreadyReceiving)
        );
    }

    #[test]
    fn cancelled_targets_count_as_terminal() {
        let mut tracker = SessionTracker::new();
        tracker
            .begin_send("f".into(), targets(&["t1", "t2"]))
            .unwrap();
        assert!(tracker.target_cancelled("t1"));
        assert!(tracker.target_cancelled("t2"));
        let finished = tracker.finish_if_done().unwrap();
        assert!(finished
            .statuses
            .iter()
            .all(|(_, s)| *s == TargetStatus::Cancelled));
    }
}
