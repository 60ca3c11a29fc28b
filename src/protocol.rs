//! Data-channel wire framing: control frames vs chunk frames.
//!
//! Every message on a peer link's data channel uses this envelope:
//!
//!   [1 byte: frame tag] [N bytes: payload]
//!
//! Frame tags:
//!   0x01 = Control (JSON-encoded ControlMessage)
//!   0x02 = Chunk   (raw file bytes for the active receive session)
//!
//! The receiver inspects the tag first; chunk payloads are never parsed, so
//! file content that happens to contain the text of a control tag is still
//! plain data. One transfer runs per link at a time on an ordered reliable
//! channel, so chunk frames need no sequence header: arrival order is chunk
//! order.

use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Frame tag for control messages (JSON-encoded [`ControlMessage`]).
pub const FRAME_CONTROL: u8 = 0x01;

/// Frame tag for binary chunk data.
pub const FRAME_CHUNK: u8 = 0x02;

// ── Control messages ─────────────────────────────────────────────────────────

/// Transfer-lifecycle control messages, interleaved with chunk frames on the
/// same channel. The ordered channel guarantees no control message is
/// reordered relative to the chunks it brackets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ControlMessage {
    /// The named member is about to stream a file to this link.
    #[serde(rename_all = "camelCase")]
    BeginTransfer { sender_id: String },
    /// A transfer is already underway elsewhere in the room; do not offer to
    /// send, do not assume idle. Sent to late-joined links.
    #[serde(rename_all = "camelCase")]
    PeerIsSharing { sender_id: String },
    /// The room-wide share is over; any parked "peer is sharing" state clears.
    EndSharing,
    /// All chunks for the current transfer have been sent.
    #[serde(rename_all = "camelCase")]
    Complete { file_name: String, file_size: u64 },
}

/// A decoded data-channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Control(ControlMessage),
    Chunk(Bytes),
}

// ── Encode / decode ──────────────────────────────────────────────────────────

/// Encode a control frame: `[0x01][json bytes]`.
pub fn encode_control(msg: &ControlMessage) -> Result<Bytes> {
    let json = serde_json::to_vec(msg)?;
    let mut buf = BytesMut::with_capacity(1 + json.len());
    buf.put_u8(FRAME_CONTROL);
    buf.extend_from_slice(&json);
    Ok(buf.freeze())
}

/// Encode a chunk frame: `[0x02][payload]`.
pub fn encode_chunk(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(FRAME_CHUNK);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Decode an incoming frame by its tag byte.
pub fn decode(mut data: Bytes) -> Result<Frame> {
    if data.is_empty() {
        return Err(anyhow!("Empty frame"));
    }
    let tag = data[0];
    let payload = data.split_off(1);
    match tag {
        FRAME_CONTROL => {
            let msg: ControlMessage = serde_json::from_slice(&payload)?;
            Ok(Frame::Control(msg))
        }
        FRAME_CHUNK => Ok(Frame::Chunk(payload)),
        other => Err(anyhow!("Unknown frame tag: {:#04x}", other)),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_round_trip() {
        let msgs = [
            ControlMessage::BeginTransfer {
                sender_id: "a1".into(),
            },
            ControlMessage::PeerIsSharing {
                sender_id: "b2".into(),
            },
            ControlMessage::EndSharing,
            ControlMessage::Complete {
                file_name: "report.pdf".into(),
                file_size: 32001,
            },
        ];
        for msg in msgs {
            let frame = encode_control(&msg).unwrap();
            assert_eq!(frame[0], FRAME_CONTROL);
            assert_eq!(decode(frame).unwrap(), Frame::Control(msg));
        }
    }

    #[test]
    fn chunk_round_trip() {
        let payload = vec![0u8, 1, 2, 0xff, 0x01, 0x02];
        let frame = encode_chunk(&payload);
        assert_eq!(frame[0], FRAME_CHUNK);
        match decode(frame).unwrap() {
            Frame::Chunk(data) => assert_eq!(&data[..], &payload[..]),
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn chunk_containing_control_text_stays_chunk() {
        // File content that happens to contain a control tag's JSON must not
        // be sniffed into a control message.
        let payload = br#"...{"kind":"endSharing"}... plus {"doneSharing":true}"#;
        match decode(encode_chunk(payload)).unwrap() {
            Frame::Chunk(data) => assert_eq!(&data[..], &payload[..]),
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn control_wire_shape_is_tagged_json() {
        let frame = encode_control(&ControlMessage::Complete {
            file_name: "x.bin".into(),
            file_size: 7,
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&frame[1..]).unwrap();
        assert_eq!(json["kind"], "complete");
        assert_eq!(json["fileName"], "x.bin");
        assert_eq!(json["fileSize"], 7);
    }

    #[test]
    fn empty_and_unknown_frames_are_errors() {
        assert!(decode(Bytes::new()).is_err());
        assert!(decode(Bytes::from_static(&[0x7f, 1, 2])).is_err());
    }
}
