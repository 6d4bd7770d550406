//! Host-visible debug log with hard caps.
//!
//! Lines are rate limited per second, truncated to a byte cap and queued up
//! to an entry and byte budget. Whatever is lost is summarised by a single
//! `dropped N telemetry lines` marker delivered ahead of the queued lines.

use crate::buffer::floor_char_boundary;
use crate::config::TelemetryConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Receives flushed telemetry batches.
pub trait TelemetrySink {
    /// Deliver one batch, oldest line first.
    fn emit(&mut self, lines: &[String]);
}

/// Re-emits each line as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&mut self, lines: &[String]) {
        for line in lines {
            tracing::debug!(target: "inkstream::telemetry", "{line}");
        }
    }
}

/// Collects batches in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Every line emitted so far.
    pub lines: Vec<String>,
    /// Number of batches received.
    pub batches: usize,
}

impl TelemetrySink for MemorySink {
    fn emit(&mut self, lines: &[String]) {
        self.lines.extend_from_slice(lines);
        self.batches += 1;
    }
}

/// Bounded, rate-limited line queue.
#[derive(Debug)]
pub struct TelemetryLog {
    config: TelemetryConfig,
    entries: VecDeque<String>,
    bytes: usize,
    /// Lines lost since the last marker went out.
    dropped: u64,
    window_start: Option<Instant>,
    window_count: usize,
    total_dropped: u64,
}

impl TelemetryLog {
    /// Create an empty log.
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            entries: VecDeque::new(),
            bytes: 0,
            dropped: 0,
            window_start: None,
            window_count: 0,
            total_dropped: 0,
        }
    }

    /// Queue a line. Returns `false` if it was rate limited.
    pub fn record(&mut self, now: Instant, line: impl Into<String>) -> bool {
        let window_open = self
            .window_start
            .is_some_and(|start| now.saturating_duration_since(start) < Duration::from_secs(1));
        if !window_open {
            self.window_start = Some(now);
            self.window_count = 0;
        }
        if self.window_count >= self.config.rate_per_sec {
            self.drop_lines(1);
            return false;
        }
        self.window_count += 1;

        let mut line = line.into();
        let cap = floor_char_boundary(&line, self.config.max_line_bytes);
        line.truncate(cap);
        self.bytes += line.len();
        self.entries.push_back(line);

        let mut trimmed = 0;
        while self.entries.len() > self.config.max_entries || self.bytes > self.config.max_bytes {
            let Some(old) = self.entries.pop_front() else { break };
            self.bytes -= old.len();
            trimmed += 1;
        }
        if trimmed > 0 {
            self.drop_lines(trimmed);
        }
        true
    }

    fn drop_lines(&mut self, count: u64) {
        if self.dropped == 0 {
            tracing::warn!(count, "telemetry.dropped");
        }
        self.dropped += count;
        self.total_dropped += count;
    }

    /// Hand up to `batch_size` lines to `sink`. Returns lines emitted.
    pub fn flush(&mut self, sink: &mut dyn TelemetrySink) -> usize {
        let batch_size = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size.min(self.entries.len() + 1));
        if self.dropped > 0 {
            batch.push(format!("dropped {} telemetry lines", self.dropped));
            self.dropped = 0;
        }
        while batch.len() < batch_size {
            let Some(line) = self.entries.pop_front() else { break };
            self.bytes -= line.len();
            batch.push(line);
        }
        if !batch.is_empty() {
            sink.emit(&batch);
        }
        batch.len()
    }

    /// Whether anything (lines or a drop marker) awaits flushing.
    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty() || self.dropped > 0
    }

    /// Queued lines, excluding the marker.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no lines are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queued bytes.
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    /// Lines lost to caps and rate limiting, ever.
    pub const fn total_dropped(&self) -> u64 {
        self.total_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            max_entries: 3,
            max_bytes: 1024,
            max_line_bytes: 8,
            rate_per_sec: 100,
            batch_size: 10,
        }
    }

    #[test]
    fn test_overflow_keeps_one_marker() {
        let mut log = TelemetryLog::new(config());
        let now = Instant::now();
        for i in 0..6 {
            log.record(now, format!("line {i}"));
        }
        assert_eq!(log.len(), 3);
        let mut sink = MemorySink::default();
        log.flush(&mut sink);
        assert_eq!(
            sink.lines,
            vec!["dropped 3 telemetry lines", "line 3", "line 4", "line 5"]
        );
        assert!(!log.has_pending());
        assert_eq!(log.total_dropped(), 3);
    }

    #[test]
    fn test_line_cap_respects_char_boundary() {
        let mut log = TelemetryLog::new(config());
        log.record(Instant::now(), "abcdefgé-tail");
        let mut sink = MemorySink::default();
        log.flush(&mut sink);
        assert_eq!(sink.lines, vec!["abcdefg"]);
    }

    #[test]
    fn test_rate_limit_per_second() {
        let mut log = TelemetryLog::new(TelemetryConfig {
            rate_per_sec: 2,
            ..config()
        });
        let start = Instant::now();
        assert!(log.record(start, "a"));
        assert!(log.record(start, "b"));
        assert!(!log.record(start, "c"));
        assert!(log.record(start + Duration::from_secs(1), "d"));
        assert_eq!(log.total_dropped(), 1);
    }

    #[test]
    fn test_flush_batches() {
        let mut log = TelemetryLog::new(TelemetryConfig {
            batch_size: 2,
            max_entries: 10,
            ..config()
        });
        let now = Instant::now();
        for line in ["a", "b", "c"] {
            log.record(now, line);
        }
        let mut sink = MemorySink::default();
        assert_eq!(log.flush(&mut sink), 2);
        assert_eq!(log.flush(&mut sink), 1);
        assert_eq!(log.flush(&mut sink), 0);
        assert_eq!(sink.batches, 2);
        assert_eq!(log.bytes(), 0);
    }
}
