//! Cross-thread chunk transport.
//!
//! The engine is single threaded; producers on other threads talk to it
//! through a [`ChunkSender`]. The engine drains the receiving side at the
//! start of every tick.

use super::ChunkKind;
use crate::engine::ResetOptions;
use crate::engine::ResetOrigin;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// Messages from a producer to the engine.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A chunk of stream text.
    Chunk {
        /// Stream name (coalescing key).
        name: String,
        /// Chunk text.
        text: String,
        /// Chunk kind; only text deltas are rendered.
        kind: ChunkKind,
    },
    /// A new stream starts.
    Begin,
    /// The current stream is complete.
    End,
    /// Abandon or clear the current stream.
    Reset {
        /// Who asked.
        origin: ResetOrigin,
        /// What to tear down.
        options: ResetOptions,
    },
}

/// Producer half. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: Sender<StreamMessage>,
}

impl ChunkSender {
    /// Send a text delta. Returns `false` once the engine is gone.
    pub fn text(&self, name: &str, text: &str) -> bool {
        self.send(StreamMessage::Chunk {
            name: name.to_string(),
            text: text.to_string(),
            kind: ChunkKind::TextDelta,
        })
    }

    /// Send any message. Returns `false` once the engine is gone.
    pub fn send(&self, message: StreamMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Consumer half, held by the engine.
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: Receiver<StreamMessage>,
}

impl ChunkReceiver {
    /// Take everything currently buffered without blocking.
    ///
    /// The second value is `true` when every sender has been dropped.
    pub fn drain(&self) -> (Vec<StreamMessage>, bool) {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => return (messages, false),
                Err(TryRecvError::Disconnected) => return (messages, true),
            }
        }
    }
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = unbounded();
    (ChunkSender { tx }, ChunkReceiver { rx })
}
