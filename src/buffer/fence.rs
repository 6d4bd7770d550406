//! Fence Parser: detects code fence open/close across chunk boundaries.
//!
//! Detection is line based. The parser carries the head of the current,
//! still-incomplete line between calls, so a fence token split across two
//! deliveries is classified exactly once, when its line completes. This
//! makes the reported events independent of how the source was chunked.
//!
//! [`FenceParser::feed`] stops at the first state change and reports a
//! split offset; the caller appends the consumed part and feeds the rest
//! back in.

use super::stream::floor_char_boundary;

/// A configured custom fence (open/close tokens matched at line start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFence {
    /// Token that opens the fence.
    pub open: String,
    /// Token that closes the fence.
    pub close: String,
}

/// Which kind of fence is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceKind {
    /// A backtick or tilde fence.
    Standard {
        /// The fence character.
        marker: char,
        /// Length of the opening run.
        run: usize,
    },
    /// A configured custom fence, by index into the parser's custom table.
    Custom(usize),
}

/// Block container a fence was opened in.
///
/// A closer only counts under the same container, and a line that leaves
/// the container ends the fence without a closer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FenceContainer {
    /// Block quote depth.
    pub quotes: usize,
    /// Spaces after the quote markers.
    pub lead: usize,
    /// Column where list item content starts, if the opener had a list marker.
    pub list_content: Option<usize>,
}

impl FenceContainer {
    /// Container of an opener line. `None` for shapes not modelled here
    /// (quotes nested inside list items), which fall back to lenient closing.
    pub fn of(line: &str) -> Option<Self> {
        let (quotes, rest) = split_quotes(line);
        let lead = leading_spaces(rest);
        if lead > 3 {
            return None;
        }
        let mut body = &rest[lead..];
        let mut column = lead;
        let mut list_content = None;
        while let Some(after) = strip_list_marker(body) {
            let spaces = leading_spaces(after).min(3);
            column += body.len() - after.len() + spaces;
            body = &after[spaces..];
            list_content = Some(column);
        }
        (body.len() == strip_container(line).len()).then_some(Self {
            quotes,
            lead,
            list_content,
        })
    }

    /// The part of `line` a closer is matched against, if `line` sits in
    /// this container at closer indentation.
    pub fn closer_body<'a>(&self, line: &'a str) -> Option<&'a str> {
        let (quotes, rest) = split_quotes(line);
        if quotes != self.quotes {
            return None;
        }
        let lead = leading_spaces(rest);
        let fits = match self.list_content {
            Some(content) => (content..=content + 3).contains(&lead),
            None => lead <= self.lead + 3,
        };
        fits.then(|| &rest[lead..])
    }

    /// Whether `line` ends the container (and with it the fence).
    pub fn exited_by(&self, line: &str) -> bool {
        let (quotes, rest) = split_quotes(line);
        if quotes < self.quotes {
            return true;
        }
        match self.list_content {
            Some(content) => {
                quotes == self.quotes && !rest.trim().is_empty() && leading_spaces(rest) < content
            }
            None => false,
        }
    }
}

/// Current fence state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FenceState {
    /// The open fence, if any.
    pub open: Option<FenceKind>,
    /// Info string of the open fence.
    pub info: String,
    /// Container of the opener line.
    pub container: Option<FenceContainer>,
}

impl FenceState {
    /// Whether a fence is open.
    pub const fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

/// Result of one [`FenceParser::feed`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceStep {
    /// The whole input was consumed without a state change.
    Continue,
    /// A fence opened on the line ending at `split` (relative to the input).
    Opened {
        /// Bytes of the input up to and including the open line.
        split: usize,
        /// Info string (language tag) after the fence token.
        info: String,
        /// Index of the custom fence, if this is one.
        custom: Option<usize>,
    },
    /// A fence closed on the line ending at `split`.
    Closed {
        /// Bytes of the input up to and including the close line.
        split: usize,
        /// Absolute stream offset where the close line starts.
        line_start: usize,
    },
}

/// Stateful scanner over the stream.
#[derive(Debug, Clone)]
pub struct FenceParser {
    state: FenceState,
    customs: Vec<CustomFence>,
    /// Head of the current line, at most `tail_len` bytes.
    line: String,
    /// The current line has non-whitespace beyond the carried head.
    line_overflow: bool,
    /// Absolute offset of the current line start.
    line_start: usize,
    tail_len: usize,
    /// Opener found on a line that also ended the previous fence's container.
    pending: Option<FenceStep>,
}

impl FenceParser {
    /// Create a parser carrying at most `tail_len` bytes of the current line.
    pub fn new(tail_len: usize) -> Self {
        Self {
            state: FenceState::default(),
            customs: Vec::new(),
            line: String::new(),
            line_overflow: false,
            line_start: 0,
            tail_len: tail_len.max(16),
            pending: None,
        }
    }

    /// Replace the custom fence table.
    pub fn set_custom_fences(&mut self, customs: Vec<CustomFence>) {
        self.customs = customs;
    }

    /// Current state.
    pub const fn state(&self) -> &FenceState {
        &self.state
    }

    /// Whether a fence is open.
    pub const fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Whether the incomplete current line would open a fence if it ended now.
    pub fn partial_line_opens(&self) -> bool {
        !self.state.is_open() && !self.line.is_empty() && self.classify_open(&self.line).is_some()
    }

    /// Scan `chunk`, whose first byte sits at absolute offset `base`.
    ///
    /// An opener deferred by a container exit is reported first, with a
    /// zero split.
    pub fn feed(&mut self, chunk: &str, base: usize) -> FenceStep {
        if let Some(step) = self.pending.take() {
            return step;
        }
        let mut pos = 0;
        while pos < chunk.len() {
            let Some(rel) = chunk[pos..].find('\n') else {
                self.carry(&chunk[pos..]);
                break;
            };
            let end = pos + rel;
            self.carry(&chunk[pos..end]);
            let line_start = self.line_start;
            self.line_start = base + end + 1;
            if let Some(step) = self.complete_line(end + 1, line_start) {
                return step;
            }
            pos = end + 1;
        }
        FenceStep::Continue
    }

    /// Treat the incomplete last line as complete (end of stream).
    pub fn finish(&mut self) -> FenceStep {
        self.pending = None;
        if self.line.is_empty() && !self.line_overflow {
            return FenceStep::Continue;
        }
        let line_start = self.line_start;
        self.complete_line(0, line_start).unwrap_or(FenceStep::Continue)
    }

    /// Forget all state (stream reset).
    pub fn reset(&mut self) {
        self.state = FenceState::default();
        self.line.clear();
        self.line_overflow = false;
        self.line_start = 0;
        self.pending = None;
    }

    fn carry(&mut self, text: &str) {
        let room = self.tail_len.saturating_sub(self.line.len());
        if text.len() <= room {
            self.line.push_str(text);
            return;
        }
        let cut = floor_char_boundary(text, room);
        self.line.push_str(&text[..cut]);
        if text[cut..].chars().any(|c| !c.is_whitespace()) {
            self.line_overflow = true;
        }
    }

    fn complete_line(&mut self, split: usize, line_start: usize) -> Option<FenceStep> {
        let line = std::mem::take(&mut self.line);
        let overflow = std::mem::replace(&mut self.line_overflow, false);
        let line = line.strip_suffix('\r').unwrap_or(&line);

        let Some(kind) = self.state.open.clone() else {
            return self.open(line, split, line_start);
        };
        if self.state.container.is_some_and(|container| container.exited_by(line)) {
            tracing::trace!(line_start, "fence.container_exit");
            self.state = FenceState::default();
            let reopened = self.open(line, split, line_start);
            if let Some(FenceStep::Opened { info, custom, .. }) = reopened {
                self.pending = Some(FenceStep::Opened { split: 0, info, custom });
            }
            return Some(FenceStep::Closed { split, line_start });
        }
        if overflow || !self.closes(&kind, line) {
            return None;
        }
        tracing::trace!(line_start, "fence.close");
        self.state = FenceState::default();
        Some(FenceStep::Closed { split, line_start })
    }

    fn open(&mut self, line: &str, split: usize, line_start: usize) -> Option<FenceStep> {
        let (info, custom, kind) = self.classify_open(line)?;
        tracing::trace!(line_start, info = %info, "fence.open");
        self.state = FenceState {
            open: Some(kind),
            info: info.clone(),
            container: FenceContainer::of(line),
        };
        Some(FenceStep::Opened { split, info, custom })
    }

    fn classify_open(&self, line: &str) -> Option<(String, Option<usize>, FenceKind)> {
        let body = strip_container(line);
        // Custom fences take priority over standard ones.
        for (index, custom) in self.customs.iter().enumerate() {
            if let Some(rest) = body.strip_prefix(custom.open.as_str()) {
                return Some((rest.trim().to_string(), Some(index), FenceKind::Custom(index)));
            }
        }
        let (marker, run, info) = fence_opener(line)?;
        Some((info.to_string(), None, FenceKind::Standard { marker, run }))
    }

    fn closes(&self, kind: &FenceKind, line: &str) -> bool {
        let Some(body) = fence_body(line, self.state.container) else {
            return false;
        };
        match kind {
            FenceKind::Standard { marker, run } => is_closing_run(body, *marker, *run),
            FenceKind::Custom(index) => self
                .customs
                .get(*index)
                .is_some_and(|custom| is_custom_closer(body, &custom.close)),
        }
    }
}

impl Default for FenceParser {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Strip up to three spaces of indent plus any quote and list markers.
pub(crate) fn strip_container(line: &str) -> &str {
    let mut rest = strip_indent(line);
    loop {
        if let Some(after) = rest.strip_prefix('>') {
            rest = strip_indent(after.strip_prefix(' ').unwrap_or(after));
            continue;
        }
        if let Some(after) = strip_list_marker(rest) {
            rest = strip_indent(after);
            continue;
        }
        return rest;
    }
}

fn strip_indent(line: &str) -> &str {
    let spaces = line.bytes().take(3).take_while(|&b| b == b' ').count();
    &line[spaces..]
}

fn leading_spaces(line: &str) -> usize {
    line.bytes().take_while(|&b| b == b' ').count()
}

/// Count and strip block quote markers.
fn split_quotes(line: &str) -> (usize, &str) {
    let mut quotes = 0;
    let mut rest = line;
    loop {
        let spaces = leading_spaces(rest);
        match rest[spaces..].strip_prefix('>') {
            Some(after) if spaces <= 3 => {
                quotes += 1;
                rest = after.strip_prefix(' ').unwrap_or(after);
            }
            _ => return (quotes, rest),
        }
    }
}

fn strip_list_marker(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    match bytes.first()? {
        b'-' | b'*' | b'+' if bytes.get(1) == Some(&b' ') => Some(&line[2..]),
        b'0'..=b'9' => {
            let digits = bytes.iter().take(9).take_while(|b| b.is_ascii_digit()).count();
            match (bytes.get(digits), bytes.get(digits + 1)) {
                (Some(b'.' | b')'), Some(b' ')) => Some(&line[digits + 2..]),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Recognize a standard fence opener: marker, run length and info string.
pub(crate) fn fence_opener(line: &str) -> Option<(char, usize, &str)> {
    let body = strip_container(line);
    let marker = body.chars().next().filter(|c| matches!(c, '`' | '~'))?;
    let run = body.chars().take_while(|&c| c == marker).count();
    if run < 3 {
        return None;
    }
    let info = body[run..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((marker, run, info))
}

/// The part of `line` to match a closer against, given the opener's container.
pub(crate) fn fence_body(line: &str, container: Option<FenceContainer>) -> Option<&str> {
    match container {
        Some(container) => container.closer_body(line),
        None => Some(strip_container(line)),
    }
}

/// Whether `body` closes a standard fence opened with `run` × `marker`.
pub(crate) fn is_closing_run(body: &str, marker: char, run: usize) -> bool {
    let count = body.chars().take_while(|&c| c == marker).count();
    count >= run && body[count..].trim().is_empty()
}

/// Whether `body` is the custom close token followed only by whitespace.
pub(crate) fn is_custom_closer(body: &str, close: &str) -> bool {
    body.trim_start()
        .strip_prefix(close)
        .is_some_and(|rest| rest.trim().is_empty())
}
