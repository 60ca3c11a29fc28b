//! Chunker: slices a file into an ordered, finite sequence of byte ranges.
//!
//! A dedicated reader task streams 16000-byte chunks into a bounded channel,
//! so disk reads never stall the send loop consuming them, and the channel
//! bound keeps per-target memory flat. The sequence is deterministic: chunk
//! `i` covers bytes `[i * CHUNK_SIZE, min((i+1) * CHUNK_SIZE, size))`.

use anyhow::Result;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{CHUNK_READ_AHEAD, CHUNK_SIZE};

/// Number of chunks a file of `file_size` bytes splits into.
pub fn chunk_count(file_size: u64) -> u64 {
    file_size.div_ceil(CHUNK_SIZE as u64)
}

/// Spawn a reader task that prefetches chunks into a bounded channel.
///
/// The receiver yields chunks in order; the task ends when the file is
/// exhausted or the receiver is dropped. The reader result reports read
/// errors (truncation, I/O) to the consumer that awaits it.
pub fn spawn_chunker(
    path: std::path::PathBuf,
    file_size: u64,
) -> (mpsc::Receiver<Bytes>, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(CHUNK_READ_AHEAD);

    let handle = tokio::spawn(async move {
        let mut file = tokio::fs::File::open(&path).await?;
        let total = chunk_count(file_size);

        for seq in 0..total {
            let offset = seq * CHUNK_SIZE as u64;
            let len = (CHUNK_SIZE as u64).min(file_size - offset) as usize;

            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).await?;

            // Consumer gone (cancelled or failed target): stop reading.
            if tx.send(Bytes::from(buf)).await.is_err() {
                break;
            }
        }

        Ok(())
    });

    (rx, handle)
}

// ── Tests ────────────────────────────────────────────────────────────────────
