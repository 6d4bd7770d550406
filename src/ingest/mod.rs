//! Ingestion: how chunks reach the engine.
//!
//! - [`IngestQueue`]: coalescing, backpressure-aware FIFO drained by a
//!   low-priority scheduler task
//! - [`bridge`]: crossbeam transport for producers on other threads

pub mod bridge;
mod queue;

pub use queue::{Backpressure, IngestQueue, Payload, QueueEntry};

/// Kind tag carried by every chunk.
///
/// Only [`ChunkKind::TextDelta`] is rendered; other kinds are accepted and
/// ignored so producers can add event types without breaking the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKind {
    /// Appended answer text.
    TextDelta,
    /// Any other event kind, by name.
    Other(String),
}

impl ChunkKind {
    /// Parse a wire kind name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "text_delta" => Self::TextDelta,
            other => Self::Other(other.to_string()),
        }
    }
}
