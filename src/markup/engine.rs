//! Applies a [`RuleSet`] to source text and rendered blocks.

use super::rules::{MarkupRule, RuleKind, RuleSet, TokenMatcher, TokenRole};
use crate::buffer::{
    fence_body, fence_opener, is_closing_run, is_custom_closer, strip_container, CustomFence,
    FenceContainer,
};
use crate::error::MarkupError;
use crate::tree::{Node, NodeFlags, NodeKind};
use lru::LruCache;
use std::borrow::Cow;
use std::num::NonZeroUsize;

/// Resolved blocks remembered by digest.
pub const DEFAULT_MEMO_CAPACITY: usize = 256;

/// Tilde run written in place of custom fence lines.
const FENCE_REWRITE: &str = "~~~~~";

/// Custom markup engine.
#[derive(Debug)]
pub struct MarkupEngine {
    rules: RuleSet,
    memo: LruCache<(u64, bool), Node>,
    memo_hits: u64,
}

#[derive(Debug)]
struct OpenSpan {
    rule: usize,
    token: String,
    children: Vec<Node>,
}

#[derive(Clone, Copy)]
enum SourceFenceKind {
    Standard(char, usize),
    Custom(usize),
}

#[derive(Clone, Copy)]
struct SourceFence {
    kind: SourceFenceKind,
    container: Option<FenceContainer>,
}

impl MarkupEngine {
    /// An engine with no rules.
    pub fn new(memo_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(memo_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            rules: RuleSet::empty(),
            memo: LruCache::new(capacity),
            memo_hits: 0,
        }
    }

    /// Replace the rule table. On error the previous table stays.
    pub fn set_rules(&mut self, rules: Vec<MarkupRule>) -> Result<(), MarkupError> {
        self.rules = RuleSet::compile(rules)?;
        self.memo.clear();
        Ok(())
    }

    /// The active rule table.
    pub const fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Whether no rules are installed.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fence specs for the fence parser.
    pub fn custom_fences(&self) -> Vec<CustomFence> {
        self.rules.custom_fences()
    }

    /// Language tag for the custom fence at `index` of [`MarkupEngine::custom_fences`].
    pub fn fence_info(&self, index: usize) -> Option<&str> {
        let (rule, _) = self.rules.fences.get(index)?;
        match &self.rules.rules.get(*rule)?.kind {
            RuleKind::Fence { info } => Some(info),
            _ => None,
        }
    }

    /// Memo hits so far.
    pub const fn memo_hits(&self) -> u64 {
        self.memo_hits
    }

    /// Forget memoised blocks.
    pub fn clear_memo(&mut self) {
        self.memo.clear();
    }

    /// Source phase: substitute source-rule tokens and rewrite custom fences.
    ///
    /// Standard fenced code passes through untouched.
    pub fn preprocess<'a>(&self, source: &'a str) -> Cow<'a, str> {
        if self.rules.source.is_none() && self.rules.fences.is_empty() {
            return Cow::Borrowed(source);
        }
        let mut out = String::with_capacity(source.len() + 16);
        let mut fence: Option<SourceFence> = None;
        let mut toggles = vec![false; self.rules.rules.len()];
        let mut changed = false;

        for line in source.split_inclusive('\n') {
            let body = line.trim_end_matches(['\n', '\r']);
            let eol = &line[body.len()..];
            let inner = strip_container(body);
            let prefix = &body[..body.len() - inner.len()];

            // Leaving the opener's container ends the fence; the line may open another.
            if fence.is_some_and(|f| f.container.is_some_and(|c| c.exited_by(body))) {
                fence = None;
            }
            match fence {
                Some(SourceFence { kind: SourceFenceKind::Standard(marker, run), container }) => {
                    if fence_body(body, container).is_some_and(|b| is_closing_run(b, marker, run)) {
                        fence = None;
                    }
                    out.push_str(line);
                }
                Some(SourceFence { kind: SourceFenceKind::Custom(index), container }) => {
                    let closes = fence_body(body, container).is_some_and(|b| {
                        self.rules
                            .fences
                            .get(index)
                            .is_some_and(|(_, f)| is_custom_closer(b, &f.close))
                    });
                    if closes {
                        fence = None;
                        push_fence_line(&mut out, prefix, "", eol);
                        changed = true;
                    } else {
                        out.push_str(line);
                    }
                }
                None => {
                    let container = FenceContainer::of(body);
                    if let Some(index) = self.custom_opener(inner) {
                        fence = Some(SourceFence {
                            kind: SourceFenceKind::Custom(index),
                            container,
                        });
                        let info = self.fence_info(index).unwrap_or_default();
                        push_fence_line(&mut out, prefix, info, eol);
                        changed = true;
                    } else if let Some((marker, run, _)) = fence_opener(body) {
                        fence = Some(SourceFence {
                            kind: SourceFenceKind::Standard(marker, run),
                            container,
                        });
                        out.push_str(line);
                    } else {
                        let substituted = self.substitute(line, &mut toggles);
                        changed |= matches!(substituted, Cow::Owned(_));
                        out.push_str(&substituted);
                    }
                }
            }
        }
        if changed {
            Cow::Owned(out)
        } else {
            Cow::Borrowed(source)
        }
    }

    fn custom_opener(&self, inner: &str) -> Option<usize> {
        self.rules
            .fences
            .iter()
            .position(|(_, fence)| inner.starts_with(fence.open.as_str()))
    }

    fn substitute<'a>(&self, line: &'a str, toggles: &mut [bool]) -> Cow<'a, str> {
        let Some(matcher) = self.rules.source.as_ref() else {
            return Cow::Borrowed(line);
        };
        matcher.regex.replace_all(line, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            let Some(&(index, role)) = matcher.roles(token).first() else {
                return token.to_string();
            };
            let kind = self.rules.rules.get(index).map(|r| &r.kind);
            let Some(RuleKind::Source { open_with, close_with }) = kind else {
                return token.to_string();
            };
            let opening = match role {
                TokenRole::Open => true,
                TokenRole::Close => false,
                TokenRole::Both => {
                    toggles[index] = !toggles[index];
                    toggles[index]
                }
            };
            if opening {
                open_with.clone()
            } else {
                close_with.clone()
            }
        })
    }

    /// Tree phase: wrap tree-rule spans in the top-level `blocks`.
    ///
    /// With `streaming`, an unclosed opener of a streaming rule becomes a
    /// pending span; otherwise the opener stays literal text. Blocks without
    /// pending spans are memoised by digest.
    pub fn apply(&mut self, blocks: &mut [Node], streaming: bool) {
        let Some(matcher) = self.rules.tree.as_ref() else {
            return;
        };
        for block in blocks.iter_mut() {
            if block.code().is_some() {
                continue;
            }
            let key = (block.seal(), streaming);
            if let Some(done) = self.memo.get(&key) {
                *block = done.clone();
                self.memo_hits += 1;
                continue;
            }
            if matcher.regex.is_match(&block.text_content()) {
                let children = std::mem::take(&mut block.children);
                let (children, pending) = wrap_children(&self.rules, matcher, children, streaming);
                block.children = children;
                if pending {
                    continue;
                }
            }
            self.memo.put(key, block.clone());
        }
    }

    /// Plain-append phase: add freshly rendered inline nodes to `container`.
    ///
    /// If the container ends in a pending span, only the new nodes are
    /// searched for its closer; text past the closer is wrapped as usual.
    pub fn extend_streaming(&self, container: &mut Vec<Node>, mut incoming: Vec<Node>) {
        let Some(matcher) = self.rules.tree.as_ref() else {
            container.extend(incoming);
            return;
        };

        let pending_rule = container
            .last()
            .filter(|node| node.flags.contains(NodeFlags::PENDING))
            .and_then(|node| match &node.kind {
                NodeKind::Markup { rule } => self.rules.rules.iter().position(|r| &r.name == rule),
                _ => None,
            });
        if let (Some(rule), Some(span)) = (pending_rule, container.last_mut()) {
            let mut rest = Vec::new();
            let mut closed = false;
            for node in incoming {
                if closed {
                    rest.push(node);
                    continue;
                }
                if let NodeKind::Text(text) = &node.kind {
                    if let Some(at) = find_closer(matcher, text, rule) {
                        push_text(&mut span.children, &text[..at.start]);
                        push_text(&mut rest, &text[at.end..]);
                        span.flags.remove(NodeFlags::PENDING);
                        closed = true;
                        continue;
                    }
                }
                span.children.push(node);
            }
            if !closed {
                return;
            }
            incoming = rest;
        }

        let (wrapped, _) = wrap_children(&self.rules, matcher, incoming, true);
        for node in wrapped {
            match node.kind {
                NodeKind::Text(text) => push_text(container, &text),
                _ => container.push(node),
            }
        }
    }
}

impl Default for MarkupEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY)
    }
}

fn push_fence_line(out: &mut String, prefix: &str, info: &str, eol: &str) {
    out.push_str(prefix);
    out.push_str(FENCE_REWRITE);
    out.push_str(info);
    out.push_str(eol);
}

/// Append text, merging with a trailing text node.
fn push_text(out: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node {
        kind: NodeKind::Text(last),
        ..
    }) = out.last_mut()
    {
        last.push_str(text);
        return;
    }
    out.push(Node::text(text));
}

fn find_closer(matcher: &TokenMatcher, text: &str, rule: usize) -> Option<std::ops::Range<usize>> {
    matcher
        .regex
        .find_iter(text)
        .find(|m| {
            matcher
                .roles(m.as_str())
                .iter()
                .any(|&(r, role)| r == rule && role != TokenRole::Open)
        })
        .map(|m| m.range())
}

/// Nodes whose content is never searched for tokens.
const fn is_opaque(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::CodeBlock(_) | NodeKind::InlineCode(_) | NodeKind::Math(_) | NodeKind::Html(_)
    )
}

fn wrap_children(
    rules: &RuleSet,
    matcher: &TokenMatcher,
    children: Vec<Node>,
    streaming: bool,
) -> (Vec<Node>, bool) {
    let mut out = Vec::with_capacity(children.len());
    let mut open: Option<OpenSpan> = None;
    let mut pending = false;

    for mut child in children {
        if let NodeKind::Text(text) = &child.kind {
            split_text(rules, matcher, text, &mut out, &mut open);
            continue;
        }
        if !is_opaque(&child.kind) && !child.children.is_empty() {
            let nested = std::mem::take(&mut child.children);
            let (nested, nested_pending) = wrap_children(rules, matcher, nested, streaming);
            child.children = nested;
            pending |= nested_pending;
        }
        match open.as_mut() {
            Some(span) => span.children.push(child),
            None => out.push(child),
        }
    }

    if let Some(span) = open {
        let keep_pending = streaming && rules.rules.get(span.rule).is_some_and(|r| r.streaming);
        if keep_pending {
            out.push(span_node(rules, span, NodeFlags::PENDING));
            pending = true;
        } else {
            push_text(&mut out, &span.token);
            for node in span.children {
                match node.kind {
                    NodeKind::Text(text) => push_text(&mut out, &text),
                    _ => out.push(node),
                }
            }
        }
    }
    (out, pending)
}

fn split_text(
    rules: &RuleSet,
    matcher: &TokenMatcher,
    text: &str,
    out: &mut Vec<Node>,
    open: &mut Option<OpenSpan>,
) {
    let mut last = 0;
    for m in matcher.regex.find_iter(text) {
        let roles = matcher.roles(m.as_str());
        match open.as_ref().map(|span| span.rule) {
            None => {
                let opener = roles.iter().find(|(_, role)| *role != TokenRole::Close);
                let Some(&(rule, _)) = opener else {
                    continue;
                };
                push_text(out, &text[last..m.start()]);
                *open = Some(OpenSpan {
                    rule,
                    token: m.as_str().to_string(),
                    children: Vec::new(),
                });
            }
            Some(rule) => {
                if !roles.iter().any(|&(r, role)| r == rule && role != TokenRole::Open) {
                    continue;
                }
                if let Some(mut span) = open.take() {
                    push_text(&mut span.children, &text[last..m.start()]);
                    out.push(span_node(rules, span, NodeFlags::empty()));
                }
            }
        }
        last = m.end();
    }
    let rest = &text[last..];
    match open.as_mut() {
        Some(span) => push_text(&mut span.children, rest),
        None => push_text(out, rest),
    }
}

fn span_node(rules: &RuleSet, span: OpenSpan, flags: NodeFlags) -> Node {
    let rule = rules
        .rules
        .get(span.rule)
        .map(|r| r.name.clone())
        .unwrap_or_default();
    Node::new(NodeKind::Markup { rule })
        .with_children(span.children)
        .with_flags(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine(rules: Vec<MarkupRule>) -> MarkupEngine {
        let mut engine = MarkupEngine::default();
        engine.set_rules(rules).unwrap();
        engine
    }

    fn paragraph(children: Vec<Node>) -> Node {
        Node::new(NodeKind::Paragraph).with_children(children)
    }

    fn markup(rule: &str, children: Vec<Node>) -> Node {
        Node::new(NodeKind::Markup { rule: rule.into() }).with_children(children)
    }

    #[test]
    fn test_preprocess_skips_code_fences() {
        let engine = engine(vec![MarkupRule::source("kbd", "[[", "]]", "<kbd>", "</kbd>")]);
        let out = engine.preprocess("press [[Ctrl]]\n```\n[[raw]]\n```\n");
        assert_eq!(out, "press <kbd>Ctrl</kbd>\n```\n[[raw]]\n```\n");
    }

    #[test]
    fn test_preprocess_borrows_when_unchanged() {
        let engine = engine(vec![MarkupRule::source("kbd", "[[", "]]", "<kbd>", "</kbd>")]);
        assert!(matches!(engine.preprocess("nothing here\n"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_preprocess_toggles_symmetric_tokens() {
        let engine = engine(vec![MarkupRule::source("mark", "%%", "%%", "<mark>", "</mark>")]);
        assert_eq!(engine.preprocess("%%a%% and %%b%%"), "<mark>a</mark> and <mark>b</mark>");
    }

    #[test]
    fn test_preprocess_rewrites_custom_fences() {
        let engine = engine(vec![MarkupRule::fence("note", ":::note", ":::", "note")]);
        let out = engine.preprocess("> :::note\n> ```\n> :::\nafter\n");
        assert_eq!(out, "> ~~~~~note\n> ```\n> ~~~~~\nafter\n");
        assert_eq!(engine.fence_info(0), Some("note"));
    }

    #[test]
    fn test_preprocess_quoted_closer_stays_inside_top_level_fence() {
        let engine = engine(vec![MarkupRule::source("kbd", "[[", "]]", "<kbd>", "</kbd>")]);
        let source = "```markdown\n> ```\n> [[raw]]\n> ```\n[[still raw]]\n```\n[[Ctrl]]\n";
        assert_eq!(
            engine.preprocess(source),
            "```markdown\n> ```\n> [[raw]]\n> ```\n[[still raw]]\n```\n<kbd>Ctrl</kbd>\n"
        );
    }

    #[test]
    fn test_preprocess_custom_fence_ends_with_its_quote() {
        let engine = engine(vec![MarkupRule::fence("note", ":::note", ":::", "note")]);
        let out = engine.preprocess("> :::note\n> body\n:::note\nx\n:::\n");
        assert_eq!(out, "> ~~~~~note\n> body\n~~~~~note\nx\n~~~~~\n");
    }

    #[test]
    fn test_apply_wraps_across_inline_nodes() {
        let mut engine = engine(vec![MarkupRule::tree("hl", "==", "==", true)]);
        let mut blocks = vec![paragraph(vec![
            Node::text("a ==b "),
            Node::new(NodeKind::Strong).with_children(vec![Node::text("c")]),
            Node::text(" d== e"),
        ])];
        engine.apply(&mut blocks, true);
        let mut expected = paragraph(vec![
            Node::text("a "),
            markup(
                "hl",
                vec![
                    Node::text("b "),
                    Node::new(NodeKind::Strong).with_children(vec![Node::text("c")]),
                    Node::text(" d"),
                ],
            ),
            Node::text(" e"),
        ]);
        let mut actual = blocks.remove(0);
        actual.seal();
        expected.seal();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_unclosed_streaming_opener_is_pending() {
        let mut engine = engine(vec![MarkupRule::tree("hl", "==", "==", true)]);
        let mut blocks = vec![paragraph(vec![Node::text("x ==open")])];
        engine.apply(&mut blocks, true);
        let span = &blocks[0].children[1];
        assert!(span.flags.contains(NodeFlags::PENDING));
        assert_eq!(span.text_content(), "open");

        let mut final_blocks = vec![paragraph(vec![Node::text("x ==open")])];
        engine.apply(&mut final_blocks, false);
        assert_eq!(final_blocks[0].children, vec![Node::text("x ==open")]);
    }

    #[test]
    fn test_non_streaming_rule_never_pends() {
        let mut engine = engine(vec![MarkupRule::tree("box", "[!", "!]", false)]);
        let mut blocks = vec![paragraph(vec![Node::text("a [!b")])];
        engine.apply(&mut blocks, true);
        assert_eq!(blocks[0].children, vec![Node::text("a [!b")]);
    }

    #[test]
    fn test_resolved_blocks_are_memoised() {
        let mut engine = engine(vec![MarkupRule::tree("hl", "==", "==", true)]);
        let block = paragraph(vec![Node::text("==a==")]);
        engine.apply(&mut [block.clone()], true);
        let mut again = [block];
        engine.apply(&mut again, true);
        assert_eq!(engine.memo_hits(), 1);
        assert!(matches!(&again[0].children[0].kind, NodeKind::Markup { rule } if rule == "hl"));
    }

    #[test]
    fn test_code_is_opaque() {
        let mut engine = engine(vec![MarkupRule::tree("hl", "==", "==", true)]);
        let mut blocks = vec![paragraph(vec![Node::new(NodeKind::InlineCode("==x==".into()))])];
        engine.apply(&mut blocks, true);
        assert_eq!(blocks[0].children[0].kind, NodeKind::InlineCode("==x==".into()));
    }

    #[test]
    fn test_extend_streaming_closes_pending_span() {
        let engine = engine(vec![MarkupRule::tree("hl", "==", "==", true)]);
        let mut container = Vec::new();
        engine.extend_streaming(&mut container, vec![Node::text("a ==b")]);
        assert!(container[1].flags.contains(NodeFlags::PENDING));

        engine.extend_streaming(&mut container, vec![Node::text("c")]);
        assert_eq!(container.len(), 2);
        assert!(container[1].flags.contains(NodeFlags::PENDING));

        engine.extend_streaming(&mut container, vec![Node::text("d== e ==f== g")]);
        assert!(!container[1].flags.contains(NodeFlags::PENDING));
        assert_eq!(container[1].text_content(), "bcd");
        assert_eq!(
            container[2..],
            [Node::text(" e "), markup("hl", vec![Node::text("f")]), Node::text(" g")]
        );
    }
}
