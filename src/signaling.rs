//! Signaling wire messages, exchanged as JSON text frames on the hub's
//! WebSocket. The `signal` payloads are opaque negotiation blobs (serialized
//! session descriptions); the hub routes them without inspection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Register this connection as a member of `room_id`.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    /// Relay the first negotiation payload to an existing member.
    #[serde(rename_all = "camelCase")]
    SendingSignal {
        user_to_signal: String,
        caller_id: String,
        signal: Value,
    },
    /// Relay the reply negotiation payload back to the caller.
    #[serde(rename_all = "camelCase")]
    ReturningSignal { signal: Value, caller_id: String },
    /// Acknowledge receipt of a completed file to its sender.
    #[serde(rename_all = "camelCase")]
    FileReceived { sender_id: String },
}

/// Hub → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Transport hello: the hub-assigned connection id for this member.
    /// Sent once, immediately after the socket is accepted.
    Connected { id: String },
    /// Existing members of the joined room, in join order, excluding the
    /// joiner. Sent only to the joiner, and only when non-empty.
    AllUsers { users: Vec<String> },
    /// New member count, broadcast to the whole room on every join/leave.
    TotalUsers { count: usize },
    /// A newcomer's first negotiation payload, delivered to one existing
    /// member. `id` is the hub's record of the sending connection.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        signal: Value,
        caller_id: String,
        id: String,
    },
    /// The responder's reply payload, delivered back to the initiator.
    #[serde(rename_all = "camelCase")]
    ReceivingSignal { signal: Value, id: String },
    /// A member disconnected; broadcast to its room.
    UserLeft { id: String },
    /// A receiver finished a file this member sent.
    FileReceived { id: String },
    /// Join rejected at the admission boundary: the room is at capacity.
    #[serde(rename_all = "camelCase")]
    RoomFull { room_id: String },
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_the_wire_names() {
        let msg = ClientMessage::SendingSignal {
            user_to_signal: "u1".into(),
            caller_id: "c1".into(),
            signal: json!({"sdp": "v=0"}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "sending-signal");
        assert_eq!(value["userToSignal"], "u1");
        assert_eq!(value["callerId"], "c1");

        let back: ClientMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn server_messages_round_trip() {
        let msgs = [
            ServerMessage::Connected { id: "m0".into() },
            ServerMessage::AllUsers {
                users: vec!["a".into(), "b".into()],
            },
            ServerMessage::TotalUsers { count: 2 },
            ServerMessage::UserJoined {
                signal: json!({"sdp": "v=0"}),
                caller_id: "c".into(),
                id: "c".into(),
            },
            ServerMessage::ReceivingSignal {
                signal: json!(null),
                id: "r".into(),
            },
            ServerMessage::UserLeft { id: "x".into() },
            ServerMessage::FileReceived { id: "y".into() },
            ServerMessage::RoomFull {
                room_id: "abcdefgh".into(),
            },
        ];
        for msg in msgs {
            let text = serde_json::to_string(&msg).unwrap();
            let back: ServerMessage = serde_json::from_str(&text).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn signal_blob_passes_through_verbatim() {
        let blob = json!({"type": "offer", "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1"});
        let msg = ClientMessage::ReturningSignal {
            signal: blob.clone(),
            caller_id: "c".into(),
        };
        let text = serde_json::to_string(&msg).unwrap();
        match serde_json::from_str::<ClientMessage>(&text).unwrap() {
            ClientMessage::ReturningSignal { signal, .. } => assert_eq!(signal, blob),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
