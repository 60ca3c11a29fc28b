//! Receiving side: accumulate an ordered chunk stream, then materialize the
//! downloadable artifact.
//!
//! Chunks are kept as received (no copies, no re-slicing) and concatenated
//! only when the user drains the artifact with `save`. One incoming session
//! exists at a time, enforced by the session tracker.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// An in-progress incoming transfer from one originating member.
#[derive(Debug)]
pub struct IncomingTransfer {
    sender_id: String,
    chunks: Vec<Bytes>,
    received_bytes: u64,
}

impl IncomingTransfer {
    pub fn new(sender_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            chunks: Vec::new(),
            received_bytes: 0,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Append a chunk in arrival order. The channel is ordered and reliable;
    /// arrival order is chunk order.
    pub fn append(&mut self, chunk: Bytes) {
        self.received_bytes += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    /// Seal the accumulation into an artifact tagged with the sender's
    /// declared name and size.
    pub fn complete(self, file_name: String, file_size: u64) -> ReceivedFile {
        ReceivedFile {
            file_name,
            file_size,
            chunks: self.chunks,
        }
    }
}

/// A fully-received file, held in memory until the user drains it.
#[derive(Debug)]
pub struct ReceivedFile {
    pub file_name: String,
    /// Size declared by the sender's Complete message.
    pub file_size: u64,
    chunks: Vec<Bytes>,
}

impl ReceivedFile {
    /// Actual accumulated byte count.
    pub fn len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Concatenate the chunk sequence into one contiguous buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Write the artifact into `dir` under its (sanitized) declared name.
    /// Consumes the artifact: this is the user-initiated drain.
    pub async fn save_to(self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(sanitize_file_name(&self.file_name));
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        tokio::fs::write(&path, self.into_bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Reduce a sender-declared file name to a single safe path component.
///
/// - Keeps only the final component (separators stripped)
/// - Filters characters to alphanumeric, `.`, `-`, `_`, and space
/// - Returns "file" if nothing survives
fn sanitize_file_name(name: &str) -> String {
    let last = name
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .next_back()
        .map(str::to_owned)
        .unwrap_or_default();

    let safe: String = last
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();

    if safe.is_empty() {
        "file".to_string()
    } else {
        safe
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("roomdrop_test")
            .join("recv")
            .join(name);
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn reconstructed_artifact_matches_declared_scenario() {
        // 32001 bytes arriving as 16000 + 16000 + 1.
        let mut incoming = IncomingTransfer::new("sender-1");
        incoming.append(Bytes::from(vec![1u8; 16000]));
        incoming.append(Bytes::from(vec![2u8; 16000]));
        incoming.append(Bytes::from(vec![3u8; 1]));
        assert_eq!(incoming.received_bytes(), 32001);

        let artifact = incoming.complete("big.bin".into(), 32001);
        assert_eq!(artifact.len(), 32001);
        assert_eq!(artifact.file_size, 32001);

        let bytes = artifact.into_bytes();
        assert_eq!(bytes.len(), 32001);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[16000], 2);
        assert_eq!(bytes[32000], 3);
    }

    #[test]
    fn chunk_order_is_arrival_order() {
        let mut incoming = IncomingTransfer::new("s");
        for i in 0..5u8 {
            incoming.append(Bytes::from(vec![i; 3]));
        }
        let bytes = incoming.complete("f".into(), 15).into_bytes();
        assert_eq!(bytes, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    }

    #[tokio::test]
    async fn save_to_writes_and_consumes_the_artifact() {
        let dir = test_dir("save");
        let mut incoming = IncomingTransfer::new("s");
        incoming.append(Bytes::from_static(b"hello "));
        incoming.append(Bytes::from_static(b"world"));

        let artifact = incoming.complete("greeting.txt".into(), 11);
        let path = artifact.save_to(&dir).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert_eq!(path.file_name().unwrap(), "greeting.txt");

        cleanup(&dir);
    }

    #[tokio::test]
    async fn declared_name_cannot_escape_the_target_dir() {
        let dir = test_dir("sanitize");
        let mut incoming = IncomingTransfer::new("s");
        incoming.append(Bytes::from_static(b"x"));

        let artifact = incoming.complete("../../etc/passwd".into(), 1);
        let path = artifact.save_to(&dir).await.unwrap();
        assert!(path.starts_with(&dir));
        assert_eq!(path.file_name().unwrap(), "passwd");

        cleanup(&dir);
    }

    #[test]
    fn sanitize_falls_back_when_nothing_survives() {
        assert_eq!(sanitize_file_name("///"), "file");
        assert_eq!(sanitize_file_name("..\\.."), "file");
        assert_eq!(sanitize_file_name("a b-c_d.txt"), "a b-c_d.txt");
    }
}
