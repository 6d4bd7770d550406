//! Snapshot cadence: when is a re-render worth it.
//!
//! Each profile keeps a step size. Unseen bytes beyond the step trigger a
//! render; every render grows the step geometrically up to its ceiling, so
//! long documents are re-rendered less often. Structural boundaries and
//! fence closes reset the step, and a soft latency bound forces a render
//! when content has been waiting too long.

use crate::config::{CadenceConfig, CadenceProfileConfig};
use std::time::Instant;

/// Which budget applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CadenceProfile {
    /// Prose outside code fences.
    Prose,
    /// Inside an open code fence.
    Code,
}

/// Why a render is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTrigger {
    /// Unseen content exceeded the current step.
    Step,
    /// A blank line or block marker arrived.
    Boundary,
    /// Unseen content waited longer than the soft latency.
    SoftLatency,
}

#[derive(Debug, Clone, Copy)]
struct ProfileState {
    step: usize,
}

/// Adaptive render cadence.
#[derive(Debug)]
pub struct Cadence {
    config: CadenceConfig,
    prose: ProfileState,
    code: ProfileState,
    rendered_len: usize,
    last_render: Option<Instant>,
    unseen_since: Option<Instant>,
    boundary_pending: bool,
}

impl Cadence {
    /// Create a cadence at base steps.
    pub const fn new(config: CadenceConfig) -> Self {
        let prose = ProfileState {
            step: config.prose.base_step,
        };
        let code = ProfileState {
            step: config.code.base_step,
        };
        Self {
            config,
            prose,
            code,
            rendered_len: 0,
            last_render: None,
            unseen_since: None,
            boundary_pending: false,
        }
    }

    const fn profile_config(&self, profile: CadenceProfile) -> &CadenceProfileConfig {
        match profile {
            CadenceProfile::Prose => &self.config.prose,
            CadenceProfile::Code => &self.config.code,
        }
    }

    fn state_mut(&mut self, profile: CadenceProfile) -> &mut ProfileState {
        match profile {
            CadenceProfile::Prose => &mut self.prose,
            CadenceProfile::Code => &mut self.code,
        }
    }

    /// Current step of a profile.
    pub const fn step(&self, profile: CadenceProfile) -> usize {
        match profile {
            CadenceProfile::Prose => self.prose.step,
            CadenceProfile::Code => self.code.step,
        }
    }

    /// Buffer length at the last render.
    pub const fn rendered_len(&self) -> usize {
        self.rendered_len
    }

    /// Record a chunk and decide whether it should render now.
    pub fn on_chunk(
        &mut self,
        profile: CadenceProfile,
        total_len: usize,
        boundary: bool,
        now: Instant,
    ) -> Option<RenderTrigger> {
        if total_len > self.rendered_len && self.unseen_since.is_none() {
            self.unseen_since = Some(now);
        }
        if boundary {
            self.boundary_pending = true;
            self.reset_step(profile);
        }
        self.due(profile, total_len, now)
    }

    /// Whether a render is due without new input (checked every tick).
    pub fn due(
        &self,
        profile: CadenceProfile,
        total_len: usize,
        now: Instant,
    ) -> Option<RenderTrigger> {
        if total_len <= self.rendered_len {
            return None;
        }
        if self.boundary_pending {
            return Some(RenderTrigger::Boundary);
        }
        let config = self.profile_config(profile);
        let unseen = total_len - self.rendered_len;
        let interval_ok = self
            .last_render
            .is_none_or(|last| now.duration_since(last) >= config.min_interval());
        if unseen > self.step(profile) && interval_ok {
            return Some(RenderTrigger::Step);
        }
        let waited = self
            .unseen_since
            .is_some_and(|since| now.duration_since(since) >= config.soft_latency());
        waited.then_some(RenderTrigger::SoftLatency)
    }

    /// Record a completed render and grow the step.
    pub fn rendered(&mut self, profile: CadenceProfile, total_len: usize, now: Instant) {
        let config = self.profile_config(profile).clone();
        let state = self.state_mut(profile);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let grown = (state.step as f64 * config.growth).ceil() as usize;
        state.step = grown.clamp(config.base_step, config.max_step);
        self.rendered_len = total_len;
        self.last_render = Some(now);
        self.unseen_since = None;
        self.boundary_pending = false;
    }

    /// Reset a profile's step to its base (boundary, fence close).
    pub fn reset_step(&mut self, profile: CadenceProfile) {
        let base = self.profile_config(profile).base_step;
        self.state_mut(profile).step = base;
    }

    /// Forget everything (new stream).
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

/// Whether `chunk` contains a structural boundary: a blank line, or a line
/// starting with a heading, quote or list marker.
///
/// `at_line_start` tells whether the chunk begins a new line.
pub fn has_boundary(chunk: &str, at_line_start: bool) -> bool {
    let starts = chunk.match_indices('\n').map(|(i, _)| i + 1);
    let first = at_line_start.then_some(0);
    first.into_iter().chain(starts).any(|start| {
        let line = &chunk[start..];
        if line.is_empty() {
            return false;
        }
        line.starts_with('\n') || line.starts_with("\r\n") || starts_block(line)
    })
}

fn starts_block(line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let bytes = trimmed.as_bytes();
    match bytes.first() {
        Some(b'#' | b'>') => true,
        Some(b'-' | b'*' | b'+') => matches!(bytes.get(1), Some(b' ')),
        Some(b'0'..=b'9') => {
            let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
            matches!(bytes.get(digits), Some(b'.' | b')'))
                && matches!(bytes.get(digits + 1), Some(b' '))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> CadenceConfig {
        let profile = CadenceProfileConfig {
            base_step: 10,
            growth: 2.0,
            max_step: 40,
            min_interval_ms: 0,
            soft_latency_ms: 100,
        };
        CadenceConfig {
            prose: profile.clone(),
            code: profile,
        }
    }

    #[test]
    fn test_step_triggers_and_grows() {
        let now = Instant::now();
        let mut cadence = Cadence::new(config());
        assert_eq!(cadence.on_chunk(CadenceProfile::Prose, 5, false, now), None);
        assert_eq!(
            cadence.on_chunk(CadenceProfile::Prose, 11, false, now),
            Some(RenderTrigger::Step)
        );
        cadence.rendered(CadenceProfile::Prose, 11, now);
        assert_eq!(cadence.step(CadenceProfile::Prose), 20);
        cadence.rendered(CadenceProfile::Prose, 11, now);
        cadence.rendered(CadenceProfile::Prose, 11, now);
        assert_eq!(cadence.step(CadenceProfile::Prose), 40);
        assert_eq!(cadence.step(CadenceProfile::Code), 10);
    }

    #[test]
    fn test_boundary_forces_render_and_resets_step() {
        let now = Instant::now();
        let mut cadence = Cadence::new(config());
        cadence.rendered(CadenceProfile::Prose, 0, now);
        assert_eq!(cadence.step(CadenceProfile::Prose), 20);
        assert_eq!(
            cadence.on_chunk(CadenceProfile::Prose, 2, true, now),
            Some(RenderTrigger::Boundary)
        );
        assert_eq!(cadence.step(CadenceProfile::Prose), 10);
    }

    #[test]
    fn test_soft_latency() {
        let start = Instant::now();
        let mut cadence = Cadence::new(config());
        assert_eq!(cadence.on_chunk(CadenceProfile::Prose, 3, false, start), None);
        assert_eq!(cadence.due(CadenceProfile::Prose, 3, start + Duration::from_millis(99)), None);
        assert_eq!(
            cadence.due(CadenceProfile::Prose, 3, start + Duration::from_millis(100)),
            Some(RenderTrigger::SoftLatency)
        );
    }

    #[test]
    fn test_min_interval_defers_step_renders() {
        let mut config = config();
        config.prose.min_interval_ms = 50;
        let start = Instant::now();
        let mut cadence = Cadence::new(config);
        cadence.rendered(CadenceProfile::Prose, 0, start);
        let soon = start + Duration::from_millis(10);
        assert_eq!(cadence.on_chunk(CadenceProfile::Prose, 30, false, soon), None);
        assert_eq!(
            cadence.due(CadenceProfile::Prose, 30, start + Duration::from_millis(50)),
            Some(RenderTrigger::Step)
        );
    }

    #[test]
    fn test_has_boundary() {
        assert!(has_boundary("end.\n\nNext", false));
        assert!(has_boundary("x\n# Title", false));
        assert!(has_boundary("- item", true));
        assert!(!has_boundary("- item", false));
        assert!(has_boundary("a\n1. first", false));
        assert!(!has_boundary("plain words\nmore words", false));
        assert!(!has_boundary("a\n2024 was", false));
        assert!(!has_boundary("trailing\n", false));
    }
}
