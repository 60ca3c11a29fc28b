//! Transfer engine: chunked fan-out sending and single-stream reassembly.
//!
//! The engine depends on a peer link for raw frame delivery only, expressed
//! as the [`FrameSink`] seam so the per-target send loop is exercised against
//! in-memory sinks in tests and against live data channels in production.

pub mod chunker;
pub mod recv;
pub mod send;

use anyhow::Result;
use bytes::Bytes;
use std::future::Future;

/// Raw ordered frame delivery to one peer. Implementations apply their own
/// backpressure; a returned error is terminal for the stream being written.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: Bytes) -> impl Future<Output = Result<()>> + Send;
}
