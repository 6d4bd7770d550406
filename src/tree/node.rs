//! Presentation nodes.
//!
//! A [`Node`] carries a content digest that is sealed bottom-up once per
//! candidate tree. Two nodes with equal digests render the same text, so
//! the patcher compares subtrees in O(1).

use bitflags::bitflags;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Stable identity of a node in the live tree.
///
/// Candidate nodes carry [`NodeId::UNASSIGNED`] until they are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(u64);

impl NodeId {
    /// Id of a node that has not entered the live tree.
    pub const UNASSIGNED: Self = Self(0);

    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id was assigned by a live tree.
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

bitflags! {
    /// Per-node state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u16 {
        /// Final highlighting applied; never highlighted again.
        const HIGHLIGHTED      = 0b0000_0000_0001;
        /// Too large to highlight; shown in the neutral style.
        const NEUTRAL_STYLE    = 0b0000_0000_0010;
        /// The code block currently being streamed.
        const ACTIVE_CODE      = 0b0000_0000_0100;
        /// Code block whose fence has not closed in the source.
        const OPEN_FENCE       = 0b0000_0000_1000;
        /// The host should stop following this node.
        const NO_SCROLL_FOLLOW = 0b0000_0001_0000;
        /// Custom markup span whose closer has not arrived.
        const PENDING          = 0b0000_0010_0000;
        /// Active block abandoned and converted to static text.
        const DEFUSED          = 0b0000_0100_0000;
        /// Transpiler failed; content shown as escaped text.
        const RENDER_FALLBACK  = 0b0000_1000_0000;
        /// Typesetter failed; formula shown as escaped source.
        const MATH_FALLBACK    = 0b0001_0000_0000;

        /// Flags that change what a node means, and so enter its digest.
        const STRUCTURAL = Self::OPEN_FENCE.bits() | Self::PENDING.bits();
    }
}

/// Code block payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeData {
    /// Resolved language token (empty when untagged).
    pub lang: String,
    /// Raw source text.
    pub source: String,
    /// Highlighted markup for `source[..frozen_len]`.
    pub markup: String,
    /// Bytes of `source` covered by `markup`; the rest is the live tail.
    pub frozen_len: usize,
}

impl CodeData {
    /// Unstyled code with the given language.
    pub fn new(lang: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            source: source.into(),
            markup: String::new(),
            frozen_len: 0,
        }
    }

    /// The not-yet-promoted tail.
    pub fn tail(&self) -> &str {
        self.source.get(self.frozen_len..).unwrap_or_default()
    }

    /// Number of lines in the source.
    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }
}

/// Typeset formula payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MathData {
    /// Display (block) math rather than inline.
    pub display: bool,
    /// Formula source between the delimiters.
    pub source: String,
    /// Typeset markup; empty until typeset.
    pub rendered: String,
}

/// Plain-append span payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlainData {
    /// Raw text appended since the last promotion.
    pub tail: String,
}

/// What a node is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The tree root.
    Root,
    /// Paragraph.
    Paragraph,
    /// Heading of the given level.
    Heading(u8),
    /// Block quote.
    BlockQuote,
    /// List; `start` is set for ordered lists.
    List {
        /// First item number.
        start: Option<u64>,
    },
    /// List item.
    Item,
    /// Table.
    Table,
    /// Table header row group.
    TableHead,
    /// Table row.
    TableRow,
    /// Table cell.
    TableCell,
    /// Emphasis.
    Emphasis,
    /// Strong emphasis.
    Strong,
    /// Strikethrough.
    Strikethrough,
    /// Hyperlink.
    Link {
        /// Target.
        dest: String,
        /// Title attribute.
        title: String,
    },
    /// Image.
    Image {
        /// Source.
        dest: String,
        /// Title attribute.
        title: String,
    },
    /// Text run.
    Text(String),
    /// Inline code span.
    InlineCode(String),
    /// Soft line break.
    SoftBreak,
    /// Hard line break.
    HardBreak,
    /// Thematic break.
    Rule,
    /// Raw HTML.
    Html(String),
    /// Task list checkbox.
    TaskMarker(bool),
    /// Inline or display math.
    Math(MathData),
    /// Fenced or indented code block.
    CodeBlock(CodeData),
    /// Custom markup span produced by the named rule.
    Markup {
        /// Rule name.
        rule: String,
    },
    /// Host span that raw streamed text is appended to.
    PlainStream(PlainData),
    /// Any other container.
    Block,
}

impl NodeKind {
    /// Whether two kinds are the same variant, ignoring payloads.
    pub fn same_variant(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn hash_content<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Heading(level) => level.hash(state),
            Self::List { start } => start.hash(state),
            Self::Link { dest, title } | Self::Image { dest, title } => {
                dest.hash(state);
                title.hash(state);
            }
            Self::Text(text) | Self::InlineCode(text) | Self::Html(text) => text.hash(state),
            Self::TaskMarker(checked) => checked.hash(state),
            Self::Math(math) => {
                math.display.hash(state);
                math.source.hash(state);
            }
            Self::CodeBlock(code) => {
                code.lang.hash(state);
                code.source.hash(state);
            }
            Self::Markup { rule } => rule.hash(state),
            Self::PlainStream(plain) => plain.tail.hash(state),
            _ => {}
        }
    }
}

/// A node of the presentation tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Stable id once live.
    pub id: NodeId,
    /// What the node is.
    pub kind: NodeKind,
    /// State bits.
    pub flags: NodeFlags,
    /// Child nodes.
    pub children: Vec<Node>,
    /// Content digest; valid after [`Node::seal`].
    pub digest: u64,
}

impl Node {
    /// Create an unassigned, unsealed node.
    pub const fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::UNASSIGNED,
            kind,
            flags: NodeFlags::empty(),
            children: Vec::new(),
            digest: 0,
        }
    }

    /// Create a text node.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Text(text.into()))
    }

    /// Builder: set children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        self.children = children;
        self
    }

    /// Builder: add flags.
    #[must_use]
    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Recompute digests for this subtree, children first.
    pub fn seal(&mut self) -> u64 {
        let mut hasher = FxHasher::default();
        self.kind.hash_content(&mut hasher);
        (self.flags & NodeFlags::STRUCTURAL).bits().hash(&mut hasher);
        self.children.len().hash(&mut hasher);
        for child in &mut self.children {
            child.seal().hash(&mut hasher);
        }
        self.digest = hasher.finish();
        self.digest
    }

    /// Recompute only this node's digest, trusting the children's.
    pub fn reseal_shallow(&mut self) -> u64 {
        let mut hasher = FxHasher::default();
        self.kind.hash_content(&mut hasher);
        (self.flags & NodeFlags::STRUCTURAL).bits().hash(&mut hasher);
        self.children.len().hash(&mut hasher);
        for child in &self.children {
            child.digest.hash(&mut hasher);
        }
        self.digest = hasher.finish();
        self.digest
    }

    /// Markup-free text of the subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        match &self.kind {
            NodeKind::Text(text) | NodeKind::InlineCode(text) | NodeKind::Html(text) => {
                out.push_str(text);
            }
            NodeKind::SoftBreak | NodeKind::HardBreak => out.push('\n'),
            NodeKind::CodeBlock(code) => out.push_str(&code.source),
            NodeKind::Math(math) => out.push_str(&math.source),
            _ => {}
        }
        for child in &self.children {
            child.push_text(out);
        }
        if let NodeKind::PlainStream(plain) = &self.kind {
            out.push_str(&plain.tail);
        }
    }

    /// Code payload, if this is a code block.
    pub const fn code(&self) -> Option<&CodeData> {
        match &self.kind {
            NodeKind::CodeBlock(code) => Some(code),
            _ => None,
        }
    }

    /// Mutable code payload, if this is a code block.
    pub fn code_mut(&mut self) -> Option<&mut CodeData> {
        match &mut self.kind {
            NodeKind::CodeBlock(code) => Some(code),
            _ => None,
        }
    }

    /// Depth-first pre-order visit.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Depth-first pre-order visit with mutable access.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Self)) {
        visit(self);
        for child in &mut self.children {
            child.walk_mut(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(text: &str) -> Node {
        Node::new(NodeKind::Paragraph).with_children(vec![Node::text(text)])
    }

    #[test]
    fn test_digest_ignores_ids_and_decorative_flags() {
        let mut a = paragraph("hello");
        let mut b = paragraph("hello");
        b.id = NodeId::new(9);
        b.flags = NodeFlags::HIGHLIGHTED;
        assert_eq!(a.seal(), b.seal());
    }

    #[test]
    fn test_digest_tracks_content_and_structure() {
        let mut a = paragraph("hello");
        let mut b = paragraph("hellO");
        assert_ne!(a.seal(), b.seal());

        let mut open = Node::new(NodeKind::CodeBlock(CodeData::new("rust", "")))
            .with_flags(NodeFlags::OPEN_FENCE);
        let mut closed = Node::new(NodeKind::CodeBlock(CodeData::new("rust", "")));
        assert_ne!(open.seal(), closed.seal());
    }

    #[test]
    fn test_digest_ignores_highlight_markup() {
        let mut plain = Node::new(NodeKind::CodeBlock(CodeData::new("py", "x = 1\n")));
        let mut styled = plain.clone();
        if let Some(code) = styled.code_mut() {
            code.markup = "<span>x</span> = 1\n".into();
            code.frozen_len = 6;
        }
        assert_eq!(plain.seal(), styled.seal());
    }

    #[test]
    fn test_text_content() {
        let node = Node::new(NodeKind::Root).with_children(vec![
            Node::new(NodeKind::Paragraph).with_children(vec![
                Node::text("Hello "),
                Node::new(NodeKind::Strong).with_children(vec![Node::text("world")]),
                Node::new(NodeKind::SoftBreak),
                Node::new(NodeKind::InlineCode("x".into())),
            ]),
            Node::new(NodeKind::PlainStream(PlainData { tail: "raw".into() }))
                .with_children(vec![Node::text("head ")]),
        ]);
        assert_eq!(node.text_content(), "Hello world\nxhead raw");
    }

    #[test]
    fn test_code_tail() {
        let mut code = CodeData::new("", "abc\ndef");
        code.frozen_len = 4;
        assert_eq!(code.tail(), "def");
        assert_eq!(code.line_count(), 2);
    }
}
