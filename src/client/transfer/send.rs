//! Sending side: one independent chunk stream per target under a
//! supervising fan-out.
//!
//! Every target gets its own task, its own chunker, and its own cancellation
//! token, so a slow or stalled peer never blocks delivery to the others and
//! a departed peer's stream can be cut without touching the rest. The
//! supervisor can enumerate and cancel targets deterministically; nothing is
//! fire-and-forget.
//!
//! Per-target stream: `BeginTransfer` → every chunk in order → `Complete`.
//! Pacing is local-buffer-bound: the bounded chunker channel plus the sink's
//! own backpressure gate each write; no acknowledgment round-trips.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::chunker::spawn_chunker;
use super::FrameSink;
use crate::error::SessionError;
use crate::protocol::{encode_chunk, encode_control, ControlMessage};
use crate::utils::cancel::CancelToken;

/// The outgoing file, shared read-only across target tasks.
#[derive(Debug, Clone)]
pub struct SendFileMeta {
    pub path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
}

/// Terminal report from one target's send task. A clean finish means the
/// stream was fully written; the target still counts as in flight until its
/// receipt acknowledgment arrives out-of-band.
#[derive(Debug)]
pub struct TargetOutcome {
    pub target_id: String,
    pub result: Result<()>,
}

/// Stream one file to one target: begin marker, chunks in order, completion
/// marker. Cancellation is observed between writes; the chunker stops as a
/// side effect of the receiver dropping.
pub async fn run_target_send<S: FrameSink>(
    sink: &S,
    sender_id: &str,
    file: &SendFileMeta,
    cancel: &CancelToken,
) -> Result<()> {
    sink.send_frame(encode_control(&ControlMessage::BeginTransfer {
        sender_id: sender_id.to_string(),
    })?)
    .await?;

    let (mut chunks, reader) = spawn_chunker(file.path.clone(), file.file_size);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(event = "target_send_cancelled", file = %file.file_name, "Send loop cancelled");
                return Err(SessionError::TransferAborted.into());
            }
            chunk = chunks.recv() => match chunk {
                Some(chunk) => sink.send_frame(encode_chunk(&chunk)).await?,
                None => break,
            }
        }
    }

    reader
        .await
        .map_err(|e| anyhow!("Chunker task panicked: {e}"))??;

    sink.send_frame(encode_control(&ControlMessage::Complete {
        file_name: file.file_name.clone(),
        file_size: file.file_size,
    })?)
    .await?;

    Ok(())
}

// ── Supervisor ───────────────────────────────────────────────────────────────

/// The per-target tasks of one outgoing transfer session.
#[derive(Default)]
pub struct OutgoingFanout {
    tasks: HashMap<String, TargetTask>,
}

struct TargetTask {
    cancel: CancelToken,
    _handle: JoinHandle<()>,
}

impl OutgoingFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn one target's send loop. Its terminal result arrives on `done`.
    pub fn spawn_target<S>(
        &mut self,
        target_id: String,
        sink: Arc<S>,
        sender_id: String,
        file: Arc<SendFileMeta>,
        done: mpsc::UnboundedSender<TargetOutcome>,
    ) where
        S: FrameSink + 'static,
    {
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let id = target_id.clone();
        let handle = tokio::spawn(async move {
            let result = run_target_send(&*sink, &sender_id, &file, &task_cancel).await;
            let _ = done.send(TargetOutcome {
                target_id: id,
                result,
            });
        });
        self.tasks.insert(
            target_id,
            TargetTask {
                cancel,
                _handle: handle,
            },
        );
    }

    /// Cancel one target's stream. Returns whether it was part of this
    /// fan-out. Cancelling an already-finished target is harmless.
    pub fn cancel_target(&mut self, target_id: &str) -> bool {
        match self.tasks.remove(target_id) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every remaining stream (session teardown).
    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel.cancel();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode, Frame};
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Frame sink that records every frame it is handed.
    #[derive(Default)]
    struct CollectingSink {
        frames: Mutex<Vec<Bytes>>,
    }

    impl FrameSink for CollectingSink {
        async fn send_frame(&self, frame: Bytes) -> Result<()> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    /// Frame sink that fails after accepting `ok_frames` frames.
    struct FailingSink {
        ok_frames: usize,
        seen: Mutex<usize>,
    }

    impl FrameSink for FailingSink {
        async fn send_frame(&self, _frame: Bytes) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            if *seen > self.ok_frames {
                Err(anyhow!("channel closed"))
            } else {
                Ok(())
            }
        }
    }

    fn test_file(name: &str, data: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir()
            .join("roomdrop_test")
            .join("send")
            .join(name);
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("f.bin");
        std::fs::write(&path, data).unwrap();
        (dir, path)
    }

    fn meta(path: std::path::PathBuf, name: &str, size: u64) -> SendFileMeta {
        SendFileMeta {
            path,
            file_name: name.to_string(),
            file_size: size,
        }
    }

    #[tokio::test]
    async fn stream_shape_is_begin_chunks_complete() {
        let data: Vec<u8> = (0..32001u32).map(|i| (i % 253) as u8).collect();
        let (dir, path) = test_file("shape", &data);

        let sink = CollectingSink::default();
        run_target_send(
            &sink,
            "me",
            &meta(path, "big.bin", 32001),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        let frames = sink.frames.into_inner().unwrap();
        assert_eq!(frames.len(), 5);

        assert_eq!(
            decode(frames[0].clone()).unwrap(),
            Frame::Control(ControlMessage::BeginTransfer {
                sender_id: "me".into()
            })
        );
        let sizes: Vec<usize> = frames[1..4]
            .iter()
            .map(|f| match decode(f.clone()).unwrap() {
                Frame::Chunk(c) => c.len(),
                other => panic!("expected chunk, got {:?}", other),
            })
            .collect();
        assert_eq!(sizes, [16000, 16000, 1]);
        assert_eq!(
            decode(frames[4].clone()).unwrap(),
            Frame::Control(ControlMessage::Complete {
                file_name: "big.bin".into(),
                file_size: 32001,
            })
        );

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn empty_file_sends_begin_then_complete() {
        let (dir, path) = test_file("empty", b"");
        let sink = CollectingSink::default();
        run_target_send(&sink, "me", &meta(path, "nil", 0), &CancelToken::new())
            .await
            .unwrap();

        let frames = sink.frames.into_inner().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            decode(frames[1].clone()).unwrap(),
            Frame::Control(ControlMessage::Complete { file_size: 0, .. })
        ));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn cancelled_target_aborts_without_completion() {
        let data = vec![0u8; 16000 * 4];
        let (dir, path) = test_file("cancel", &data);

        let cancel = CancelToken::new();
        cancel.cancel();

        let sink = CollectingSink::default();
        let err = run_target_send(&sink, "me", &meta(path, "f", data.len() as u64), &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::TransferAborted)
        );

        // Begin went out before the cancellation gate; nothing else did.
        let frames = sink.frames.into_inner().unwrap();
        assert_eq!(frames.len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn sink_failure_is_terminal_for_the_stream() {
        let data = vec![7u8; 16000 * 3];
        let (dir, path) = test_file("fail", &data);

        let sink = FailingSink {
            ok_frames: 2, // begin + first chunk
            seen: Mutex::new(0),
        };
        let result = run_target_send(
            &sink,
            "me",
            &meta(path, "f", data.len() as u64),
            &CancelToken::new(),
        )
        .await;
        assert!(result.is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn fanout_reports_each_target_exactly_once() {
        let data = vec![1u8; 100];
        let (dir, path) = test_file("fanout", &data);
        let file = Arc::new(meta(path, "f", 100));

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut fanout = OutgoingFanout::new();
        fanout.spawn_target(
            "t1".into(),
            Arc::new(CollectingSink::default()),
            "me".into(),
            file.clone(),
            done_tx.clone(),
        );
        fanout.spawn_target(
            "t2".into(),
            Arc::new(CollectingSink::default()),
            "me".into(),
            file,
            done_tx,
        );
        assert!(!fanout.cancel_target("ghost"));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let outcome = done_rx.recv().await.unwrap();
            assert!(outcome.result.is_ok());
            seen.push(outcome.target_id);
        }
        seen.sort();
        assert_eq!(seen, ["t1", "t2"]);
        assert!(done_rx.recv().await.is_none());

        let _ = std::fs::remove_dir_all(dir);
    }
}
