//! Active-Code Promoter: the one code block currently being streamed.
//!
//! ```text
//! Closed ──fence opens──▶ Open ──node rendered──▶ Active ──fence closes──▶ Closed
//!                                                   │
//!                                                   └──abort──▶ Defused
//! ```
//!
//! While active, the node's source is split into a frozen zone (already
//! highlighted, `source[..frozen_len]`) and a live tail. Promotion moves
//! whole lines from the tail into the frozen zone, so each highlighter call
//! only sees the delta. Circuit breakers switch a block that grows too
//! large to plain appends for the rest of the stream.

use super::highlight::SyntaxHighlighter;
use super::lang::language_from_shebang;
use crate::config::CodeStreamConfig;
use crate::render::escape_markup;
use crate::tree::{Node, NodeFlags, NodeId, PresentationTree};
use std::time::Instant;

/// Where the engine is in the code fence life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeState {
    /// No fence open.
    #[default]
    Closed,
    /// A fence is open but no live node represents it yet.
    Open,
    /// A live node is streaming.
    Active,
    /// The last active block was abandoned and turned into static text.
    Defused,
}

/// Result of a promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Promotion {
    /// Bytes moved from the tail into the frozen zone.
    pub bytes: usize,
    /// Whether the highlighter ran on them.
    pub highlighted: bool,
}

/// State for the code block being streamed.
#[derive(Debug)]
pub struct ActiveCodeBlock {
    node: NodeId,
    code_start: usize,
    explicit_lang: bool,
    first_line_seen: bool,
    lines: usize,
    chars: usize,
    halt_highlight: bool,
    plain_stream: bool,
    promotions: u64,
    last_promotion: Option<Instant>,
    config: CodeStreamConfig,
}

impl ActiveCodeBlock {
    /// Take over the live code node `node`, whose source starts at absolute
    /// buffer offset `code_start` and currently reads `source`.
    ///
    /// Returns `None` if the node is not in the tree.
    pub fn bind(
        tree: &mut PresentationTree,
        node: NodeId,
        code_start: usize,
        source: &str,
        config: CodeStreamConfig,
    ) -> Option<Self> {
        let mut explicit_lang = false;
        let bound = tree.update(node, |n| {
            n.flags.insert(NodeFlags::ACTIVE_CODE);
            if let Some(code) = n.code_mut() {
                explicit_lang = !code.lang.is_empty();
                code.source.clear();
                code.markup.clear();
                code.frozen_len = 0;
            }
        });
        if !bound {
            return None;
        }
        let mut block = Self {
            node,
            code_start,
            explicit_lang,
            first_line_seen: false,
            lines: 0,
            chars: 0,
            halt_highlight: false,
            plain_stream: false,
            promotions: 0,
            last_promotion: None,
            config,
        };
        block.append(tree, source);
        tracing::debug!(node = node.get(), code_start, "code.bind");
        Some(block)
    }

    /// The live node.
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Absolute buffer offset of the first source byte.
    pub const fn code_start(&self) -> usize {
        self.code_start
    }

    /// Highlighting halted by a circuit breaker.
    pub const fn is_halted(&self) -> bool {
        self.halt_highlight
    }

    /// Switched to plain appends by a circuit breaker.
    pub const fn is_plain(&self) -> bool {
        self.plain_stream
    }

    /// Promotions so far.
    pub const fn promotions(&self) -> u64 {
        self.promotions
    }

    /// When the last promotion ran.
    pub const fn last_promotion(&self) -> Option<Instant> {
        self.last_promotion
    }

    /// Append streamed code to the tail. Returns `true` when a promotion
    /// should be scheduled.
    pub fn append(&mut self, tree: &mut PresentationTree, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let check_first_line = !self.first_line_seen;
        let explicit_lang = self.explicit_lang;
        let mut tail_len = 0;
        let mut first_line_done = false;
        let mut reclassified = None;
        let present = tree.touch(self.node, |n| {
            let Some(code) = n.code_mut() else { return };
            code.source.push_str(text);
            if check_first_line {
                if let Some(end) = code.source.find('\n') {
                    first_line_done = true;
                    let directive = (!explicit_lang)
                        .then(|| language_from_shebang(code.source[..end].trim_end_matches('\r')))
                        .flatten();
                    if let Some(lang) = directive {
                        code.lang.clone_from(&lang);
                        code.markup.clear();
                        code.frozen_len = 0;
                        reclassified = Some(lang);
                    }
                }
            }
            tail_len = code.source.len() - code.frozen_len;
        });
        if !present {
            return false;
        }
        if first_line_done {
            self.first_line_seen = true;
        }
        if let Some(lang) = reclassified {
            self.explicit_lang = true;
            tracing::debug!(node = self.node.get(), %lang, "code.reclassify");
        }

        self.lines += text.matches('\n').count();
        self.chars += text.chars().count();
        self.check_breakers(0);

        let threshold = if self.halt_highlight || self.plain_stream {
            self.config.plain_promote_chars
        } else {
            self.config.promote_chars
        };
        text.contains('\n') || tail_len >= threshold
    }

    /// Move complete lines (or, once halted, a large enough tail) into the
    /// frozen zone.
    pub fn promote(
        &mut self,
        tree: &mut PresentationTree,
        highlighter: &dyn SyntaxHighlighter,
        now: Instant,
    ) -> Promotion {
        let cheap = self.halt_highlight || self.plain_stream;
        let plain_chunk = self.config.plain_promote_chars;
        let mut promotion = Promotion::default();
        let mut frozen_bytes = 0;
        tree.touch(self.node, |n| {
            let Some(code) = n.code_mut() else { return };
            let tail = code.tail();
            let cut = if cheap && tail.len() >= plain_chunk {
                tail.len()
            } else {
                tail.rfind('\n').map_or(0, |i| i + 1)
            };
            if cut == 0 {
                return;
            }
            let delta = &code.source[code.frozen_len..code.frozen_len + cut];
            let markup = if cheap {
                escape_markup(delta).into_owned()
            } else {
                promotion.highlighted = true;
                highlighter.highlight(delta, &code.lang).unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "code.promote_fallback");
                    escape_markup(delta).into_owned()
                })
            };
            code.markup.push_str(&markup);
            code.frozen_len += cut;
            frozen_bytes = code.markup.len();
            promotion.bytes = cut;
        });
        if promotion.bytes > 0 {
            self.promotions += 1;
            self.last_promotion = Some(now);
            self.check_breakers(frozen_bytes);
            tracing::trace!(node = self.node.get(), bytes = promotion.bytes, "code.promote");
        }
        promotion
    }

    /// Cut the source back to `len` bytes (the fence close line was appended).
    pub fn truncate(&mut self, tree: &mut PresentationTree, len: usize) {
        tree.touch(self.node, |n| {
            let Some(code) = n.code_mut() else { return };
            if len < code.source.len() && code.source.is_char_boundary(len) {
                code.source.truncate(len);
                if code.frozen_len > len {
                    // Only reachable when the close line was already promoted.
                    code.frozen_len = 0;
                    code.markup.clear();
                }
            }
        });
    }

    /// Close the block: highlight the remaining tail once, merge it into the
    /// frozen zone and stop following it.
    pub fn finalize(self, tree: &mut PresentationTree, highlighter: &dyn SyntaxHighlighter) {
        let cheap = self.halt_highlight || self.plain_stream;
        let mut highlighted = false;
        tree.update(self.node, |n| {
            if let Some(code) = n.code_mut() {
                let tail = code.tail();
                if !tail.is_empty() {
                    let markup = if cheap {
                        escape_markup(tail).into_owned()
                    } else {
                        highlighted = true;
                        highlighter
                            .highlight(tail, &code.lang)
                            .unwrap_or_else(|_| escape_markup(tail).into_owned())
                    };
                    code.markup.push_str(&markup);
                    code.frozen_len = code.source.len();
                }
            }
            n.flags.remove(NodeFlags::ACTIVE_CODE | NodeFlags::OPEN_FENCE);
            n.flags.insert(NodeFlags::NO_SCROLL_FOLLOW);
            n.flags.insert(if cheap {
                NodeFlags::NEUTRAL_STYLE
            } else {
                NodeFlags::HIGHLIGHTED
            });
        });
        tracing::debug!(
            node = self.node.get(),
            lines = self.lines,
            promotions = self.promotions,
            tail_highlighted = highlighted,
            "code.finalize"
        );
    }

    /// Abandon the block without final highlighting.
    pub fn defuse(self, tree: &mut PresentationTree) {
        tree.update(self.node, defuse_node);
        tracing::debug!(node = self.node.get(), "code.defuse");
    }

    fn check_breakers(&mut self, frozen_bytes: usize) {
        if !self.halt_highlight
            && (self.lines > self.config.halt_lines || self.chars > self.config.halt_chars)
        {
            self.halt_highlight = true;
            tracing::debug!(
                node = self.node.get(),
                lines = self.lines,
                chars = self.chars,
                "code.breaker.halt"
            );
        }
        if !self.plain_stream
            && (self.lines > self.config.plain_lines || frozen_bytes > self.config.max_frozen_bytes)
        {
            self.plain_stream = true;
            tracing::debug!(
                node = self.node.get(),
                lines = self.lines,
                frozen_bytes,
                "code.breaker.plain"
            );
        }
    }
}

/// Turn a streaming code node into static, escaped text.
pub fn defuse_node(node: &mut Node) {
    node.flags.remove(NodeFlags::ACTIVE_CODE | NodeFlags::OPEN_FENCE);
    node.flags.insert(NodeFlags::DEFUSED | NodeFlags::NO_SCROLL_FOLLOW);
    if let Some(code) = node.code_mut() {
        code.markup = escape_markup(&code.source).into_owned();
        code.frozen_len = code.source.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::EscapeHighlighter;
    use crate::error::HighlightError;
    use crate::tree::{CodeData, NodeKind};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recording {
        seen: RefCell<Vec<String>>,
    }

    impl SyntaxHighlighter for Recording {
        fn highlight(&self, source: &str, lang: &str) -> Result<String, HighlightError> {
            self.seen.borrow_mut().push(format!("{lang}:{source}"));
            Ok(format!("[{source}]"))
        }
    }

    fn setup(lang: &str, config: CodeStreamConfig) -> (PresentationTree, ActiveCodeBlock) {
        let mut tree = PresentationTree::new();
        let id = tree.push_block(
            Node::new(NodeKind::CodeBlock(CodeData::new(lang, "")))
                .with_flags(NodeFlags::OPEN_FENCE),
        );
        let block = ActiveCodeBlock::bind(&mut tree, id, 6, "", config).unwrap();
        (tree, block)
    }

    fn code(tree: &mut PresentationTree, id: NodeId) -> CodeData {
        tree.find(id).and_then(Node::code).cloned().unwrap()
    }

    #[test]
    fn test_promotes_whole_lines_only() {
        let (mut tree, mut block) = setup("python", CodeStreamConfig::default());
        let highlighter = Recording::default();
        assert!(!block.append(&mut tree, "print("));
        assert!(block.append(&mut tree, "1)\nx = "));
        let promotion = block.promote(&mut tree, &highlighter, Instant::now());
        assert_eq!(promotion.bytes, 9);
        let data = code(&mut tree, block.node());
        assert_eq!(data.markup, "[print(1)\n]");
        assert_eq!(data.tail(), "x = ");
        assert_eq!(*highlighter.seen.borrow(), vec!["python:print(1)\n".to_string()]);
    }

    #[test]
    fn test_finalize_highlights_tail_once() {
        let (mut tree, mut block) = setup("rust", CodeStreamConfig::default());
        let highlighter = Recording::default();
        block.append(&mut tree, "a\nb");
        block.promote(&mut tree, &highlighter, Instant::now());
        let id = block.node();
        block.finalize(&mut tree, &highlighter);
        let node = tree.find(id).unwrap().clone();
        assert!(node.flags.contains(NodeFlags::HIGHLIGHTED | NodeFlags::NO_SCROLL_FOLLOW));
        assert!(!node.flags.intersects(NodeFlags::ACTIVE_CODE | NodeFlags::OPEN_FENCE));
        assert_eq!(node.code().unwrap().markup, "[a\n][b]");
        assert_eq!(highlighter.seen.borrow().len(), 2);
    }

    #[test]
    fn test_shebang_reclassifies_untagged_block() {
        let (mut tree, mut block) = setup("", CodeStreamConfig::default());
        block.append(&mut tree, "#!/usr/bin/env python3\nprint(1)\n");
        assert_eq!(code(&mut tree, block.node()).lang, "python");
    }

    #[test]
    fn test_explicit_lang_not_reclassified() {
        let (mut tree, mut block) = setup("bash", CodeStreamConfig::default());
        block.append(&mut tree, "#!/usr/bin/env python3\n");
        assert_eq!(code(&mut tree, block.node()).lang, "bash");
    }

    #[test]
    fn test_halt_breaker_switches_to_plain_cuts() {
        let config = CodeStreamConfig {
            promote_chars: 4,
            plain_promote_chars: 8,
            halt_lines: 2,
            halt_chars: 1000,
            plain_lines: 100,
            max_frozen_bytes: 1 << 20,
        };
        let (mut tree, mut block) = setup("rust", config);
        let highlighter = Recording::default();
        block.append(&mut tree, "1\n2\n3\n");
        assert!(block.is_halted());
        block.promote(&mut tree, &highlighter, Instant::now());
        assert!(highlighter.seen.borrow().is_empty());

        // Halted: a long line without newline is cut whole past the larger threshold.
        assert!(block.append(&mut tree, "abcdefghij"));
        let promotion = block.promote(&mut tree, &highlighter, Instant::now());
        assert_eq!(promotion.bytes, 10);
        assert!(!promotion.highlighted);
        let id = block.node();
        block.finalize(&mut tree, &highlighter);
        assert!(tree.find(id).unwrap().flags.contains(NodeFlags::NEUTRAL_STYLE));
    }

    #[test]
    fn test_frozen_size_breaker() {
        let config = CodeStreamConfig {
            max_frozen_bytes: 4,
            ..CodeStreamConfig::default()
        };
        let (mut tree, mut block) = setup("rust", config);
        block.append(&mut tree, "let a = 1;\n");
        block.promote(&mut tree, &EscapeHighlighter, Instant::now());
        assert!(block.is_plain());
    }

    #[test]
    fn test_truncate_drops_close_line() {
        let (mut tree, mut block) = setup("", CodeStreamConfig::default());
        block.append(&mut tree, "x\n```\n");
        block.truncate(&mut tree, 2);
        assert_eq!(code(&mut tree, block.node()).source, "x\n");
    }

    #[test]
    fn test_defuse() {
        let (mut tree, mut block) = setup("", CodeStreamConfig::default());
        block.append(&mut tree, "<b>");
        let id = block.node();
        block.defuse(&mut tree);
        let node = tree.find(id).unwrap();
        assert!(node.flags.contains(NodeFlags::DEFUSED));
        assert!(!node.flags.contains(NodeFlags::ACTIVE_CODE));
        assert_eq!(node.code().unwrap().markup, "&lt;b&gt;");
    }
}
