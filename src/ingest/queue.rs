//! Ingestion queue: buffers named chunks ahead of the engine.
//!
//! Chunks for the same stream name are FIFO. Adjacent same-name chunks are
//! merged on enqueue; past the high-water mark the whole queue is compacted
//! so each name keeps a single entry. Content is never dropped.

use crate::config::QueueConfig;
use std::collections::VecDeque;

/// A queued run of chunks for one stream name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Stream name.
    pub name: String,
    parts: Vec<String>,
    len: usize,
}

impl QueueEntry {
    fn new(name: &str, chunk: &str) -> Self {
        Self {
            name: name.to_string(),
            parts: vec![chunk.to_string()],
            len: chunk.len(),
        }
    }

    /// Bytes held by this entry.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the entry holds no text.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, chunk: &str) {
        self.len += chunk.len();
        self.parts.push(chunk.to_string());
    }

    fn absorb(&mut self, other: Self) {
        self.len += other.len;
        self.parts.extend(other.parts);
    }

    fn into_text(self) -> String {
        if self.parts.len() == 1 {
            return self.parts.into_iter().next().unwrap_or_default();
        }
        let mut text = String::with_capacity(self.len);
        for part in self.parts {
            text.push_str(&part);
        }
        text
    }
}

/// One coalesced unit handed to the engine's chunk handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Stream name.
    pub name: String,
    /// Concatenated text.
    pub text: String,
}

/// What an enqueue did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Nothing notable.
    None,
    /// The queue was compacted to one entry per name.
    Compacted,
    /// Still above the byte cap after compaction; the caller should drain now.
    Saturated,
}

/// FIFO of named chunk runs with coalescing.
#[derive(Debug)]
pub struct IngestQueue {
    entries: VecDeque<QueueEntry>,
    bytes: usize,
    config: QueueConfig,
    compactions: u64,
}

impl IngestQueue {
    /// Create an empty queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            config,
            compactions: 0,
        }
    }

    /// Queue `chunk` under `name`. Empty chunks are ignored.
    pub fn enqueue(&mut self, name: &str, chunk: &str) -> Backpressure {
        if chunk.is_empty() {
            return Backpressure::None;
        }
        self.bytes += chunk.len();
        match self.entries.back_mut() {
            Some(last) if last.name == name => last.push(chunk),
            _ => self.entries.push_back(QueueEntry::new(name, chunk)),
        }

        let over_entries = self.entries.len() > self.config.high_water.min(self.config.max_entries);
        let over_bytes = self.bytes > self.config.max_bytes;
        if !over_entries && !over_bytes {
            return Backpressure::None;
        }
        self.compact();
        if self.bytes > self.config.max_bytes {
            Backpressure::Saturated
        } else {
            Backpressure::Compacted
        }
    }

    /// Merge every entry into the first entry sharing its name.
    ///
    /// Per-name order is preserved; interleaving between names collapses to
    /// first-appearance order.
    pub fn compact(&mut self) {
        let before = self.entries.len();
        let mut merged: Vec<QueueEntry> = Vec::with_capacity(before.min(8));
        for entry in self.entries.drain(..) {
            match merged.iter_mut().find(|e| e.name == entry.name) {
                Some(first) => first.absorb(entry),
                None => merged.push(entry),
            }
        }
        self.entries = merged.into();
        self.compactions += 1;
        tracing::debug!(before, after = self.entries.len(), bytes = self.bytes, "ingest.compact");
    }

    /// Payloads to forward in one drain; grows with the backlog.
    pub fn drain_budget(&self) -> usize {
        let base = self.config.drain_budget;
        if self.entries.len() <= self.config.high_water {
            return base;
        }
        (self.entries.len() / 4).clamp(base, self.config.drain_budget_max)
    }

    /// Pop the next payload, coalescing every leading same-name entry.
    pub fn pop_payload(&mut self) -> Option<Payload> {
        let mut first = self.entries.pop_front()?;
        while self.entries.front().is_some_and(|next| next.name == first.name) {
            if let Some(next) = self.entries.pop_front() {
                first.absorb(next);
            }
        }
        self.bytes -= first.len;
        Some(Payload {
            name: first.name.clone(),
            text: first.into_text(),
        })
    }

    /// Discard everything queued.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.bytes = 0;
        dropped
    }

    /// Queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued bytes.
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Whether queued bytes exceed `max_bytes` even after compaction.
    pub const fn is_saturated(&self) -> bool {
        self.bytes > self.config.max_bytes
    }

    /// Compactions performed.
    pub const fn compactions(&self) -> u64 {
        self.compactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> QueueConfig {
        QueueConfig {
            max_entries: 8,
            max_bytes: 64,
            high_water: 4,
            drain_budget: 2,
            drain_budget_max: 6,
            drain_time_ms: 4,
        }
    }

    #[test]
    fn test_enqueue_merges_same_name() {
        let mut queue = IngestQueue::new(config());
        queue.enqueue("a", "one ");
        queue.enqueue("a", "two");
        queue.enqueue("b", "x");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.bytes(), 8);
        assert_eq!(
            queue.pop_payload(),
            Some(Payload {
                name: "a".into(),
                text: "one two".into()
            })
        );
    }

    #[test]
    fn test_empty_chunks_ignored() {
        let mut queue = IngestQueue::new(config());
        assert_eq!(queue.enqueue("a", ""), Backpressure::None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_compaction_keeps_per_name_order() {
        let mut queue = IngestQueue::new(config());
        for (name, text) in [("a", "1"), ("b", "1"), ("a", "2"), ("b", "2")] {
            assert_eq!(queue.enqueue(name, text), Backpressure::None);
        }
        assert_eq!(queue.enqueue("a", "3"), Backpressure::Compacted);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.compactions(), 1);
        assert_eq!(queue.pop_payload().map(|p| p.text), Some("123".to_string()));
        assert_eq!(queue.pop_payload().map(|p| p.text), Some("12".to_string()));
        assert_eq!(queue.bytes(), 0);
    }

    #[test]
    fn test_saturated_when_bytes_exceed_cap() {
        let mut queue = IngestQueue::new(config());
        let big = "x".repeat(70);
        assert_eq!(queue.enqueue("a", &big), Backpressure::Saturated);
        assert_eq!(queue.bytes(), 70);
    }

    #[test]
    fn test_compaction_resets_drain_budget() {
        let mut queue = IngestQueue::new(QueueConfig {
            high_water: 4,
            max_entries: 100,
            ..config()
        });
        assert_eq!(queue.drain_budget(), 2);
        // Alternate names so nothing merges; compaction collapses to two.
        for i in 0..5 {
            queue.enqueue(if i % 2 == 0 { "a" } else { "b" }, "x");
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_budget(), 2);
    }

    #[test]
    fn test_drain_budget_clamped_to_max() {
        let mut queue = IngestQueue::new(QueueConfig {
            high_water: 2,
            max_entries: 100,
            max_bytes: 1 << 20,
            drain_budget: 2,
            drain_budget_max: 6,
            drain_time_ms: 4,
        });
        // Bypass compaction by pushing entries directly.
        for i in 0..40 {
            queue.entries.push_back(QueueEntry::new(&format!("s{i}"), "x"));
        }
        assert_eq!(queue.drain_budget(), 6);
    }

    #[test]
    fn test_clear() {
        let mut queue = IngestQueue::new(config());
        queue.enqueue("a", "x");
        queue.enqueue("b", "y");
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.bytes(), 0);
        assert_eq!(queue.pop_payload(), None);
    }
}
