//! Plain-append mode: skip the transpiler while the stream is plain prose.
//!
//! [`PlainTracker`] watches complete lines outside code fences. After
//! `activation_lines` consecutive lines without markdown markers it reports
//! activation at the end of the last clean line; the first marker seen
//! afterwards, even on an incomplete line, deactivates it again and the
//! count starts over. The two thresholds together give the mode hysteresis.

use crate::config::PlainConfig;
use unicode_segmentation::UnicodeSegmentation;

/// Mode change reported by [`PlainTracker::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlainTransition {
    /// Plain mode starts; content after `origin` is appended raw.
    Activated {
        /// Absolute offset just past the last clean line.
        origin: usize,
    },
    /// A marker arrived; full rendering resumes.
    Deactivated,
}

/// Characters that may carry inline markdown anywhere in a line.
const INLINE_MARKERS: &[char] = &['`', '*', '_', '[', '<', '|', '$', '~', '\\', '!'];

/// Tracks consecutive marker-free lines.
#[derive(Debug)]
pub struct PlainTracker {
    config: PlainConfig,
    clean_lines: usize,
    line: String,
    line_too_long: bool,
    active: bool,
    tokens: Vec<String>,
}

impl PlainTracker {
    /// Create an inactive tracker.
    pub const fn new(config: PlainConfig) -> Self {
        Self {
            config,
            clean_lines: 0,
            line: String::new(),
            line_too_long: false,
            active: false,
            tokens: Vec::new(),
        }
    }

    /// Extra tokens (custom markup openers) that count as markers.
    pub fn set_marker_tokens(&mut self, tokens: Vec<String>) {
        self.tokens = tokens;
    }

    /// Whether plain mode is on.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Consecutive clean lines seen so far.
    pub const fn clean_lines(&self) -> usize {
        self.clean_lines
    }

    /// Feed prose text starting at absolute offset `base`.
    pub fn observe(&mut self, chunk: &str, base: usize) -> Option<PlainTransition> {
        let mut transition = None;
        let mut pos = 0;
        while let Some(rel) = chunk[pos..].find('\n') {
            let end = pos + rel;
            self.push_line_text(&chunk[pos..end]);
            let clean = !self.line_too_long && self.line_is_clean();
            self.line.clear();
            self.line_too_long = false;
            pos = end + 1;

            if clean {
                self.clean_lines += 1;
                if !self.active && self.clean_lines >= self.config.activation_lines {
                    self.active = true;
                    tracing::debug!(clean_lines = self.clean_lines, "plain.activate");
                    transition = Some(PlainTransition::Activated { origin: base + pos });
                }
            } else if let Some(t) = self.dirty() {
                transition = Some(t);
            }
        }
        self.push_line_text(&chunk[pos..]);
        if self.active && !self.line_is_clean() {
            if let Some(t) = self.dirty() {
                transition = Some(t);
            }
        }
        match transition {
            // Activated and deactivated within one chunk nets out.
            Some(PlainTransition::Activated { .. }) if !self.active => None,
            other => other,
        }
    }

    /// Treat the current position as a hard interruption (fence, reset).
    pub fn interrupt(&mut self) -> Option<PlainTransition> {
        self.line.clear();
        self.line_too_long = false;
        self.dirty()
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.clean_lines = 0;
        self.line.clear();
        self.line_too_long = false;
        self.active = false;
    }

    fn dirty(&mut self) -> Option<PlainTransition> {
        self.clean_lines = 0;
        if self.active {
            self.active = false;
            tracing::debug!("plain.deactivate");
            return Some(PlainTransition::Deactivated);
        }
        None
    }

    fn push_line_text(&mut self, text: &str) {
        if self.line.len() + text.len() > self.config.max_line_len {
            self.line_too_long = true;
            return;
        }
        self.line.push_str(text);
    }

    fn line_is_clean(&self) -> bool {
        let line = self.line.strip_suffix('\r').unwrap_or(&self.line);
        if line.starts_with("    ") || line.starts_with('\t') {
            return false;
        }
        let body = line.trim_start();
        let bytes = body.as_bytes();
        let block_marker = match bytes.first() {
            Some(b'#' | b'>' | b'-' | b'+' | b'=') => true,
            Some(b'0'..=b'9') => {
                let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
                matches!(bytes.get(digits), Some(b'.' | b')'))
            }
            _ => false,
        };
        !block_marker
            && !body.contains(INLINE_MARKERS)
            && !self.tokens.iter().any(|token| body.contains(token.as_str()))
    }
}

/// Largest prefix of `tail` that can be promoted without splitting a word
/// or an unterminated tag-like token. Returns 0 when there is none.
pub fn safe_boundary(tail: &str) -> usize {
    let mut cut = 0;
    let mut in_tag = false;
    for (index, segment) in tail.split_word_bound_indices() {
        if segment.contains('<') {
            in_tag = segment.rfind('<') > segment.rfind('>');
        } else if segment.contains('>') {
            in_tag = false;
        }
        if !in_tag && segment.chars().all(char::is_whitespace) {
            cut = index + segment.len();
        }
    }
    cut
}
