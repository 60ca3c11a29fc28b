//! Pre-join validation: is the room worth dialing at all?
//!
//! One bounded-timeout call to the hub's read-only `GET /api/rooms` surface,
//! then pure checks: id length, existence, capacity. Creating a room skips
//! the existence/capacity checks; the hub materializes the room on join.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::{MIN_ROOM_ID_LEN, ROOM_CAPACITY, ROOM_VALIDATION_TIMEOUT};
use crate::error::SessionError;

/// Room ids must be at least [`MIN_ROOM_ID_LEN`] characters.
pub fn room_id_is_valid(room_id: &str) -> bool {
    room_id.trim().len() >= MIN_ROOM_ID_LEN
}

/// The pure admission verdict over a room snapshot.
pub fn admit(
    rooms: &HashMap<String, Vec<String>>,
    room_id: &str,
    creating: bool,
) -> Result<(), SessionError> {
    if !room_id_is_valid(room_id) {
        return Err(SessionError::RoomFullOrInvalid);
    }
    if creating {
        return Ok(());
    }
    match rooms.get(room_id.trim()) {
        Some(members) if members.len() < ROOM_CAPACITY => Ok(()),
        _ => Err(SessionError::RoomFullOrInvalid),
    }
}

/// Validate `room_id` against the hub at `hub_url` (HTTP base, e.g.
/// `http://127.0.0.1:5000`). The lookup is bounded by
/// [`ROOM_VALIDATION_TIMEOUT`]; elapsing it is a network failure, not a
/// verdict about the room.
pub async fn validate_room(hub_url: &str, room_id: &str, creating: bool) -> Result<()> {
    // Fail fast on a bad id before any network traffic.
    if !room_id_is_valid(room_id) {
        return Err(SessionError::RoomFullOrInvalid.into());
    }
    if creating {
        return Ok(());
    }

    let url = format!("{}/api/rooms", hub_url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .get(&url)
        .timeout(ROOM_VALIDATION_TIMEOUT)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                anyhow::Error::from(SessionError::NetworkTimeout)
            } else {
                anyhow::Error::from(e).context("Room lookup failed")
            }
        })?;

    let rooms: HashMap<String, Vec<String>> = response
        .error_for_status()
        .context("Room lookup returned an error status")?
        .json()
        .await
        .context("Malformed room listing")?;

    debug!(
        event = "room_validation",
        room = %room_id,
        members = rooms.get(room_id.trim()).map(Vec::len).unwrap_or(0),
        "Room snapshot fetched"
    );

    admit(&rooms, room_id, creating).map_err(Into::into)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rooms(entries: &[(&str, usize)]) -> HashMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(id, n)| {
                (
                    id.to_string(),
                    (0..*n).map(|i| format!("m{i}")).collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    #[test]
    fn short_room_ids_are_invalid() {
        assert!(!room_id_is_valid("abc"));
        assert!(!room_id_is_valid("1234567"));
        assert!(room_id_is_valid("abcdefgh"));
        assert!(room_id_is_valid("  abcdefgh  "));
    }

    #[test]
    fn admission_requires_an_existing_room_with_space() {
        let snapshot = rooms(&[("abcdefgh", 2), ("full-room", ROOM_CAPACITY)]);

        assert!(admit(&snapshot, "abcdefgh", false).is_ok());
        assert_eq!(
            admit(&snapshot, "full-room", false),
            Err(SessionError::RoomFullOrInvalid)
        );
        assert_eq!(
            admit(&snapshot, "missing-room", false),
            Err(SessionError::RoomFullOrInvalid)
        );
        assert_eq!(
            admit(&snapshot, "short", false),
            Err(SessionError::RoomFullOrInvalid)
        );
    }

    #[test]
    fn creating_bypasses_existence_but_not_id_validity() {
        let snapshot = rooms(&[]);
        assert!(admit(&snapshot, "brand-new-room", true).is_ok());
        assert_eq!(
            admit(&snapshot, "short", true),
            Err(SessionError::RoomFullOrInvalid)
        );
    }
}
