//! Room registry: in-memory map of room id → ordered members.
//!
//! Pure bookkeeping, owned by the hub task (single writer). The registry
//! never rejects a mutation (capacity is enforced at the admission boundary
//! upstream) and absorbs disconnect races silently: leaving a room that
//! does not exist, or as a member that was never registered, is a no-op.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// room id → member ids, insertion order = join order.
    rooms: HashMap<String, Vec<String>>,
    /// member id → room id, for O(1) leave.
    member_room: HashMap<String, String>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `member_id` in `room_id`. Returns the members that were
    /// already present, in join order, excluding the joiner.
    pub fn join(&mut self, room_id: &str, member_id: &str) -> Vec<String> {
        let members = self.rooms.entry(room_id.to_string()).or_default();
        let existing = members.clone();
        members.push(member_id.to_string());
        self.member_room
            .insert(member_id.to_string(), room_id.to_string());
        existing
    }

    /// Remove `member_id` from whichever room holds it. Returns the room id,
    /// or `None` if the member was not registered. Empty rooms are dropped
    /// so validation sees them as nonexistent.
    pub fn leave(&mut self, member_id: &str) -> Option<String> {
        let room_id = self.member_room.remove(member_id)?;
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.retain(|id| id != member_id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
        Some(room_id)
    }

    /// Current members of a room, in join order. Empty for unknown rooms.
    pub fn members(&self, room_id: &str) -> &[String] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn member_count(&self, room_id: &str) -> usize {
        self.members(room_id).len()
    }

    /// Copy of the whole map, for the read-only `/api/rooms` surface.
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.rooms.clone()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
