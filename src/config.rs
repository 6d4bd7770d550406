//! Engine configuration.
//!
//! All heuristics (cadence steps, circuit-breaker ceilings, plain-mode
//! hysteresis) are tunables rather than contract. Every section has a
//! `Default` and is `#[serde(default)]`, so a partial TOML document only
//! overrides what it names:
//!
//! ```toml
//! [plain]
//! activation_lines = 20
//!
//! [cadence.prose]
//! soft_latency_ms = 80
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a [`StreamEngine`](crate::StreamEngine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cooperative scheduler budgets.
    pub scheduler: SchedulerConfig,
    /// Ingestion queue caps and drain budgets.
    pub queue: QueueConfig,
    /// Stream buffer and fence scanner settings.
    pub buffer: BufferConfig,
    /// Snapshot cadence per profile.
    pub cadence: CadenceConfig,
    /// Plain-append mode.
    pub plain: PlainConfig,
    /// Active code block promotion and circuit breakers.
    pub code: CodeStreamConfig,
    /// Closed-block highlighting.
    pub highlight: HighlightConfig,
    /// Telemetry log caps.
    pub telemetry: TelemetryConfig,
    /// Tree patcher.
    pub patch: PatchConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.scheduler.max_tasks_per_tick == 0 {
            return Err(invalid("scheduler.max_tasks_per_tick", "must be non-zero"));
        }
        if self.queue.drain_budget == 0 || self.queue.drain_budget > self.queue.drain_budget_max {
            return Err(invalid(
                "queue.drain_budget",
                "must be non-zero and not above drain_budget_max",
            ));
        }
        for (field, profile) in [
            ("cadence.prose", &self.cadence.prose),
            ("cadence.code", &self.cadence.code),
        ] {
            if profile.growth < 1.0 || !profile.growth.is_finite() {
                return Err(invalid(field, "growth must be a finite factor >= 1"));
            }
            if profile.base_step == 0 || profile.base_step > profile.max_step {
                return Err(invalid(field, "base_step must be in 1..=max_step"));
            }
        }
        if self.plain.activation_lines == 0 {
            return Err(invalid("plain.activation_lines", "must be non-zero"));
        }
        if self.code.plain_promote_chars < self.code.promote_chars {
            return Err(invalid(
                "code.plain_promote_chars",
                "must not be below code.promote_chars",
            ));
        }
        if self.code.plain_lines < self.code.halt_lines {
            return Err(invalid("code.plain_lines", "must not be below code.halt_lines"));
        }
        Ok(())
    }
}

/// Scheduler budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall-clock budget per tick.
    pub tick_budget_ms: u64,
    /// Maximum tasks executed per tick.
    pub max_tasks_per_tick: usize,
    /// Pending sets larger than this are sorted by priority.
    pub sort_threshold: usize,
    /// Upper bound on rounds during a forced synchronous drain.
    pub max_forced_rounds: usize,
}

impl SchedulerConfig {
    /// Tick budget as a duration.
    pub const fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: 8,
            max_tasks_per_tick: 32,
            sort_threshold: 4,
            max_forced_rounds: 10_000,
        }
    }
}

/// Ingestion queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Entry count above which the queue compacts.
    pub max_entries: usize,
    /// Byte count above which the queue compacts.
    pub max_bytes: usize,
    /// Backlog (entries) considered "large": budgets grow, coalescing is aggressive.
    pub high_water: usize,
    /// Payloads forwarded per drain at normal backlog.
    pub drain_budget: usize,
    /// Payload cap per drain under backlog.
    pub drain_budget_max: usize,
    /// Time budget of a single drain.
    pub drain_time_ms: u64,
}

impl QueueConfig {
    /// Drain time budget as a duration.
    pub const fn drain_time(&self) -> Duration {
        Duration::from_millis(self.drain_time_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_entries: 512,
            max_bytes: 1 << 20,
            high_water: 64,
            drain_budget: 8,
            drain_budget_max: 64,
            drain_time_ms: 4,
        }
    }
}

/// Stream buffer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Pending bytes that trigger merging parts into the materialized string.
    pub materialize_threshold: usize,
    /// Bytes of the current line the fence scanner carries across chunks.
    pub fence_tail_len: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            materialize_threshold: 16 * 1024,
            fence_tail_len: 256,
        }
    }
}

/// Snapshot cadence, one profile per content kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Budget while streaming prose.
    pub prose: CadenceProfileConfig,
    /// Budget while a code fence is open.
    pub code: CadenceProfileConfig,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            prose: CadenceProfileConfig::default(),
            code: CadenceProfileConfig {
                base_step: 128,
                growth: 2.0,
                max_step: 16 * 1024,
                min_interval_ms: 32,
                soft_latency_ms: 250,
            },
        }
    }
}

/// Step sizes and latency bounds for one cadence profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceProfileConfig {
    /// Unseen bytes that force a render right after a reset.
    pub base_step: usize,
    /// Geometric growth of the step after each render.
    pub growth: f64,
    /// Step ceiling.
    pub max_step: usize,
    /// Step-triggered renders closer than this are deferred.
    pub min_interval_ms: u64,
    /// Unseen content older than this forces a render.
    pub soft_latency_ms: u64,
}

impl CadenceProfileConfig {
    /// Minimum interval as a duration.
    pub const fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Soft latency as a duration.
    pub const fn soft_latency(&self) -> Duration {
        Duration::from_millis(self.soft_latency_ms)
    }
}

impl Default for CadenceProfileConfig {
    fn default() -> Self {
        Self {
            base_step: 48,
            growth: 1.5,
            max_step: 4096,
            min_interval_ms: 16,
            soft_latency_ms: 120,
        }
    }
}

/// Plain-append mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlainConfig {
    /// Consecutive marker-free lines before plain mode activates.
    pub activation_lines: usize,
    /// Raw tail bytes that trigger promotion into inline markup.
    pub promote_chars: usize,
    /// Lines longer than this are treated as containing markup.
    pub max_line_len: usize,
}

impl Default for PlainConfig {
    fn default() -> Self {
        Self {
            activation_lines: 12,
            promote_chars: 256,
            max_line_len: 16 * 1024,
        }
    }
}

/// Active code block promotion and circuit breakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeStreamConfig {
    /// Tail bytes that schedule a promotion even without a full line.
    pub promote_chars: usize,
    /// Tail bytes cut at an arbitrary boundary once highlighting is off.
    pub plain_promote_chars: usize,
    /// Lines after which highlighting halts.
    pub halt_lines: usize,
    /// Characters after which highlighting halts.
    pub halt_chars: usize,
    /// Lines after which the block switches to plain streaming.
    pub plain_lines: usize,
    /// Frozen markup bytes after which the block switches to plain streaming.
    pub max_frozen_bytes: usize,
}

impl Default for CodeStreamConfig {
    fn default() -> Self {
        Self {
            promote_chars: 512,
            plain_promote_chars: 4096,
            halt_lines: 1500,
            halt_chars: 100_000,
            plain_lines: 4000,
            max_frozen_bytes: 512 * 1024,
        }
    }
}

/// Closed-block highlighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// Blocks with more lines fall back to the neutral style.
    pub max_lines: usize,
    /// Blocks with more characters fall back to the neutral style.
    pub max_chars: usize,
    /// Blocks highlighted per flush.
    pub per_tick: usize,
    /// Top-level blocks inspected per full-scan slice.
    pub scan_slice: usize,
    /// Blocks around the viewport treated as visible.
    pub viewport_margin: usize,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            max_lines: 5000,
            max_chars: 200_000,
            per_tick: 2,
            scan_slice: 64,
            viewport_margin: 8,
        }
    }
}

/// Telemetry log caps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Queued lines retained before trimming.
    pub max_entries: usize,
    /// Queued bytes retained before trimming.
    pub max_bytes: usize,
    /// Per-line byte cap.
    pub max_line_bytes: usize,
    /// Lines accepted per second.
    pub rate_per_sec: usize,
    /// Lines handed to the sink per flush.
    pub batch_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_bytes: 64 * 1024,
            max_line_bytes: 512,
            rate_per_sec: 50,
            batch_size: 32,
        }
    }
}

/// Tree patcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Nodes inspected ahead when realigning the differing middle span.
    pub lookahead: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self { lookahead: 6 }
    }
}
