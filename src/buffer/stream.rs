//! Stream Buffer: append-only text accumulator for one logical stream.
//!
//! This module provides a rope-like buffer optimized for:
//! - O(1) amortized append of many small chunks
//! - O(new data) delta reads without rebuilding the full string
//! - Rare, amortized materialization into one contiguous string
//!
//! Offsets are byte offsets. Watermarks passed to [`StreamBuffer::delta_since`]
//! should be values previously returned by [`StreamBuffer::len`].

use std::borrow::Cow;

/// Default pending size that triggers materialization.
pub const DEFAULT_MATERIALIZE_THRESHOLD: usize = 16 * 1024;

/// Append-only text accumulator.
///
/// Appended chunks are kept as separate parts until their combined length
/// crosses the materialize threshold; only then are they copied onto the
/// contiguous `materialized` string. This amortizes copy cost across many
/// tiny token deltas.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    /// Contiguous prefix of the stream.
    materialized: String,
    /// Chunks appended since the last materialization, in order.
    pending: Vec<String>,
    /// Combined length of `pending`.
    pending_len: usize,
    /// Pending length that triggers a merge.
    threshold: usize,
    /// Number of merges performed.
    merges: usize,
}

impl StreamBuffer {
    /// Create a buffer with the given materialize threshold.
    pub fn new(threshold: usize) -> Self {
        Self {
            materialized: String::new(),
            pending: Vec::new(),
            pending_len: 0,
            threshold: threshold.max(1),
            merges: 0,
        }
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.materialized.len() + self.pending_len
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a chunk.
    pub fn append(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.pending_len += chunk.len();
        self.pending.push(chunk.to_owned());
        if self.pending_len >= self.threshold {
            self.merge_pending();
        }
    }

    /// Text appended after the `prev` watermark.
    ///
    /// Borrows when the delta lies within a single stored piece; otherwise
    /// copies only the new data.
    pub fn delta_since(&self, prev: usize) -> Cow<'_, str> {
        let total = self.len();
        if prev >= total {
            return Cow::Borrowed("");
        }

        let base = self.materialized.len();
        if prev < base {
            let start = floor_char_boundary(&self.materialized, prev);
            let head = &self.materialized[start..];
            if self.pending.is_empty() {
                return Cow::Borrowed(head);
            }
            let mut out = String::with_capacity(total - start);
            out.push_str(head);
            for part in &self.pending {
                out.push_str(part);
            }
            return Cow::Owned(out);
        }

        // Locate the part containing `prev`.
        let mut offset = base;
        for (index, part) in self.pending.iter().enumerate() {
            if prev < offset + part.len() {
                let start = floor_char_boundary(part, prev - offset);
                let head = &part[start..];
                let tail = &self.pending[index + 1..];
                if tail.is_empty() {
                    return Cow::Borrowed(head);
                }
                let mut out = String::with_capacity(total - prev);
                out.push_str(head);
                for part in tail {
                    out.push_str(part);
                }
                return Cow::Owned(out);
            }
            offset += part.len();
        }
        Cow::Borrowed("")
    }

    /// The full text, materializing pending parts first.
    pub fn text(&mut self) -> &str {
        self.merge_pending();
        &self.materialized
    }

    /// The first `end` bytes (clamped to a char boundary), materializing if needed.
    pub fn prefix(&mut self, end: usize) -> &str {
        if end > self.materialized.len() {
            self.merge_pending();
        }
        let end = floor_char_boundary(&self.materialized, end.min(self.materialized.len()));
        &self.materialized[..end]
    }

    /// Clear all content.
    pub fn reset(&mut self) {
        self.materialized.clear();
        self.pending.clear();
        self.pending_len = 0;
    }

    /// Get memory usage statistics.
    pub fn memory_stats(&self) -> BufferMemoryStats {
        BufferMemoryStats {
            materialized: self.materialized.len(),
            pending_parts: self.pending.len(),
            pending_bytes: self.pending_len,
            merges: self.merges,
        }
    }

    fn merge_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.materialized.reserve(self.pending_len);
        for part in self.pending.drain(..) {
            self.materialized.push_str(&part);
        }
        self.pending_len = 0;
        self.merges += 1;
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MATERIALIZE_THRESHOLD)
    }
}

/// Memory usage statistics for a stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMemoryStats {
    /// Bytes in the contiguous prefix.
    pub materialized: usize,
    /// Number of unmerged parts.
    pub pending_parts: usize,
    /// Bytes in unmerged parts.
    pub pending_bytes: usize,
    /// Merges performed so far.
    pub merges: usize,
}

/// Largest char boundary `<= index`.
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
