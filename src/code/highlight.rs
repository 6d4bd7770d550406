//! Highlighter: final highlighting of closed code blocks.
//!
//! Closed blocks are queued by id, from three directions: the patcher
//! (blocks that just appeared), time-sliced scans over the whole document,
//! and cheap scans around the viewport, which jump the queue. A flush
//! handles a few blocks and yields when the host has input waiting.

use crate::config::HighlightConfig;
use crate::error::HighlightError;
use crate::host::{EventOutbox, HostProbe, SurfaceEvent};
use crate::render::escape_markup;
use crate::tree::{Node, NodeFlags, NodeId, PresentationTree};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::ops::Range;

/// Produces markup for source in a language.
pub trait SyntaxHighlighter {
    /// Highlight `source` written in `lang` (canonical name, may be empty).
    fn highlight(&self, source: &str, lang: &str) -> Result<String, HighlightError>;
}

/// Escapes the source without styling it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapeHighlighter;

impl SyntaxHighlighter for EscapeHighlighter {
    fn highlight(&self, source: &str, _lang: &str) -> Result<String, HighlightError> {
        Ok(escape_markup(source).into_owned())
    }
}

/// Flags that take a code block out of the highlight queue's hands.
const NOT_ELIGIBLE: NodeFlags = NodeFlags::HIGHLIGHTED
    .union(NodeFlags::NEUTRAL_STYLE)
    .union(NodeFlags::ACTIVE_CODE)
    .union(NodeFlags::OPEN_FENCE)
    .union(NodeFlags::DEFUSED);

/// Whether a node is a closed code block still waiting for highlighting.
pub fn needs_highlight(node: &Node) -> bool {
    node.code().is_some() && !node.flags.intersects(NOT_ELIGIBLE)
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Blocks highlighted.
    pub highlighted: usize,
    /// Blocks too large to highlight, given the neutral style.
    pub neutral: usize,
    /// Ids dropped because the node is gone or already done.
    pub skipped: usize,
    /// Ids still queued.
    pub remaining: usize,
}

/// De-duplicated queue of closed code blocks.
#[derive(Debug)]
pub struct HighlightQueue {
    queue: VecDeque<NodeId>,
    queued: FxHashSet<NodeId>,
    scan_cursor: Option<usize>,
    config: HighlightConfig,
    calls: u64,
}

impl HighlightQueue {
    /// Create an empty queue.
    pub fn new(config: HighlightConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            queued: FxHashSet::default(),
            scan_cursor: None,
            config,
            calls: 0,
        }
    }

    /// Queue a block at the back. Duplicates are ignored.
    pub fn enqueue(&mut self, id: NodeId) -> bool {
        if !self.queued.insert(id) {
            return false;
        }
        self.queue.push_back(id);
        true
    }

    /// Queue a block at the front, moving it if already queued.
    pub fn enqueue_front(&mut self, id: NodeId) {
        if !self.queued.insert(id) {
            self.queue.retain(|queued| *queued != id);
        }
        self.queue.push_front(id);
    }

    /// Queued ids.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Highlighter invocations so far.
    pub const fn calls(&self) -> u64 {
        self.calls
    }

    /// Start (or restart) a full-document scan.
    pub fn begin_full_scan(&mut self) {
        self.scan_cursor = Some(0);
    }

    /// Whether a full scan is in progress.
    pub const fn scanning(&self) -> bool {
        self.scan_cursor.is_some()
    }

    /// Scan the next slice of top-level blocks. Returns `true` while more remain.
    pub fn scan_slice(&mut self, tree: &PresentationTree) -> bool {
        let Some(start) = self.scan_cursor else {
            return false;
        };
        let blocks = tree.blocks();
        let end = (start + self.config.scan_slice.max(1)).min(blocks.len());
        for block in blocks.get(start..end).unwrap_or_default() {
            self.enqueue_eligible(block, false);
        }
        if end >= blocks.len() {
            self.scan_cursor = None;
            return false;
        }
        self.scan_cursor = Some(end);
        true
    }

    /// Queue eligible blocks around the visible range, ahead of everything else.
    pub fn scan_viewport(&mut self, tree: &PresentationTree, visible: Range<usize>) {
        let margin = self.config.viewport_margin;
        let start = visible.start.saturating_sub(margin);
        let end = visible.end.saturating_add(margin).min(tree.len());
        // Reverse so the topmost visible block ends up first.
        for block in tree.blocks().get(start..end).unwrap_or_default().iter().rev() {
            self.enqueue_eligible(block, true);
        }
    }

    fn enqueue_eligible(&mut self, block: &Node, front: bool) {
        let mut found = Vec::new();
        block.walk(&mut |node| {
            if needs_highlight(node) {
                found.push(node.id);
            }
        });
        if front {
            for id in found.into_iter().rev() {
                self.enqueue_front(id);
            }
        } else {
            for id in found {
                self.enqueue(id);
            }
        }
    }

    /// Highlight up to `per_tick` queued blocks.
    pub fn flush(
        &mut self,
        tree: &mut PresentationTree,
        highlighter: &dyn SyntaxHighlighter,
        host: &dyn HostProbe,
        outbox: &mut EventOutbox,
    ) -> FlushReport {
        let mut report = FlushReport::default();
        let mut handled = 0;
        while handled < self.config.per_tick.max(1) {
            let Some(id) = self.queue.pop_front() else { break };
            self.queued.remove(&id);

            let eligible = tree.find(id).is_some_and(needs_highlight);
            if !eligible {
                report.skipped += 1;
                continue;
            }
            handled += 1;

            let (max_lines, max_chars) = (self.config.max_lines, self.config.max_chars);
            let mut calls = 0;
            let mut neutral = false;
            tree.update(id, |node| {
                let Some(code) = node.code_mut() else { return };
                let too_big = code.source.len() > max_chars || code.line_count() > max_lines;
                let markup = if too_big {
                    None
                } else {
                    calls += 1;
                    match highlighter.highlight(&code.source, &code.lang) {
                        Ok(markup) => Some(markup),
                        Err(err) => {
                            tracing::warn!(error = %err, lang = %code.lang, "highlight.fallback");
                            None
                        }
                    }
                };
                neutral = markup.is_none();
                code.markup = markup.unwrap_or_else(|| escape_markup(&code.source).into_owned());
                code.frozen_len = code.source.len();
                node.flags.insert(if neutral {
                    NodeFlags::NEUTRAL_STYLE
                } else {
                    NodeFlags::HIGHLIGHTED
                });
            });
            self.calls += calls;
            if neutral {
                report.neutral += 1;
            } else {
                report.highlighted += 1;
            }
            outbox.push(SurfaceEvent::CodeUpdated(id));

            if host.input_pending() {
                tracing::trace!(remaining = self.queue.len(), "highlight.yield");
                break;
            }
        }
        report.remaining = self.queue.len();
        report
    }

    /// Drop everything queued and stop scanning.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
        self.scan_cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{IdleHost, ScriptedHost};
    use crate::tree::{CodeData, NodeKind};
    use std::cell::Cell;

    #[derive(Default)]
    struct Counting {
        calls: Cell<usize>,
    }

    impl SyntaxHighlighter for Counting {
        fn highlight(&self, source: &str, lang: &str) -> Result<String, HighlightError> {
            self.calls.set(self.calls.get() + 1);
            if lang == "broken" {
                return Err(HighlightError::UnsupportedLanguage(lang.into()));
            }
            Ok(format!("<hl>{source}</hl>"))
        }
    }

    fn config() -> HighlightConfig {
        HighlightConfig {
            max_lines: 3,
            max_chars: 100,
            per_tick: 2,
            scan_slice: 2,
            viewport_margin: 0,
        }
    }

    fn code_tree(sources: &[(&str, &str)]) -> (PresentationTree, Vec<NodeId>) {
        let mut tree = PresentationTree::new();
        let ids = sources
            .iter()
            .map(|(lang, source)| {
                tree.push_block(Node::new(NodeKind::CodeBlock(CodeData::new(*lang, *source))))
            })
            .collect();
        (tree, ids)
    }

    #[test]
    fn test_flush_highlights_and_is_idempotent() {
        let (mut tree, ids) = code_tree(&[("rust", "a"), ("rust", "b")]);
        let mut queue = HighlightQueue::new(config());
        let highlighter = Counting::default();
        let mut outbox = EventOutbox::new(16);
        queue.enqueue(ids[0]);
        assert!(!queue.enqueue(ids[0]));
        let report = queue.flush(&mut tree, &highlighter, &IdleHost, &mut outbox);
        assert_eq!(report.highlighted, 1);
        let node = tree.find(ids[0]).unwrap();
        assert!(node.flags.contains(NodeFlags::HIGHLIGHTED));
        assert_eq!(node.code().unwrap().markup, "<hl>a</hl>");

        queue.enqueue(ids[0]);
        let report = queue.flush(&mut tree, &highlighter, &IdleHost, &mut outbox);
        assert_eq!(report.skipped, 1);
        assert_eq!(highlighter.calls.get(), 1);
    }

    #[test]
    fn test_size_guard_and_failure_fall_back_to_neutral() {
        let (mut tree, ids) = code_tree(&[("rust", "1\n2\n3\n4\n"), ("broken", "x")]);
        let mut queue = HighlightQueue::new(config());
        let highlighter = Counting::default();
        queue.enqueue(ids[0]);
        queue.enqueue(ids[1]);
        let report = queue.flush(&mut tree, &highlighter, &IdleHost, &mut EventOutbox::new(4));
        assert_eq!(report.neutral, 2);
        assert_eq!(highlighter.calls.get(), 1);
        assert!(tree.find(ids[0]).unwrap().flags.contains(NodeFlags::NEUTRAL_STYLE));
    }

    #[test]
    fn test_flush_yields_on_input() {
        let (mut tree, ids) = code_tree(&[("a", "1"), ("b", "2")]);
        let mut queue = HighlightQueue::new(config());
        let host = ScriptedHost::new();
        host.set_input_pending(true);
        for id in &ids {
            queue.enqueue(*id);
        }
        let report = queue.flush(&mut tree, &EscapeHighlighter, &host, &mut EventOutbox::new(4));
        assert_eq!(report.highlighted, 1);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn test_full_scan_is_sliced() {
        let (tree, _) = code_tree(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut queue = HighlightQueue::new(config());
        queue.begin_full_scan();
        assert!(queue.scan_slice(&tree));
        assert_eq!(queue.len(), 2);
        assert!(!queue.scan_slice(&tree));
        assert_eq!(queue.len(), 3);
        assert!(!queue.scanning());
    }

    #[test]
    fn test_viewport_scan_jumps_queue() {
        let (tree, ids) = code_tree(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut queue = HighlightQueue::new(config());
        queue.enqueue(ids[0]);
        queue.scan_viewport(&tree, 1..3);
        assert_eq!(queue.queue.iter().copied().collect::<Vec<_>>(), vec![ids[1], ids[2], ids[0]]);
    }
}
