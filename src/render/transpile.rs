//! Markdown transpiler seam and the pulldown-cmark default.

use crate::error::RenderError;
use crate::tree::{CodeData, MathData, Node, NodeKind};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

/// How thorough a transpile should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderProfile {
    /// Fast profile used while the stream is live.
    Streaming,
    /// Full profile used once the stream has ended.
    Final,
}

/// Converts markdown source into presentation nodes.
pub trait Transpiler {
    /// Transpile a whole document into top-level blocks.
    fn transpile(&self, source: &str, profile: RenderProfile) -> Result<Vec<Node>, RenderError>;

    /// Transpile a fragment into inline nodes only.
    fn transpile_inline(&self, source: &str) -> Result<Vec<Node>, RenderError>;
}

/// [`Transpiler`] backed by `pulldown-cmark`.
#[derive(Debug, Clone)]
pub struct PulldownTranspiler {
    max_len: usize,
}

impl PulldownTranspiler {
    /// Create a transpiler with no size limit.
    pub const fn new() -> Self {
        Self { max_len: usize::MAX }
    }

    /// Reject sources longer than `max_len` bytes.
    #[must_use]
    pub const fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    fn options(profile: RenderProfile) -> Options {
        let streaming =
            Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS | Options::ENABLE_MATH;
        match profile {
            RenderProfile::Streaming => streaming,
            RenderProfile::Final => streaming | Options::ENABLE_TABLES | Options::ENABLE_FOOTNOTES,
        }
    }

    fn check_len(&self, source: &str) -> Result<(), RenderError> {
        if source.len() > self.max_len {
            return Err(RenderError::TooLarge {
                len: source.len(),
                limit: self.max_len,
            });
        }
        Ok(())
    }
}

impl Default for PulldownTranspiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transpiler for PulldownTranspiler {
    fn transpile(&self, source: &str, profile: RenderProfile) -> Result<Vec<Node>, RenderError> {
        self.check_len(source)?;
        let parser = Parser::new_ext(source, Self::options(profile));
        Ok(TreeBuilder::default().build(parser))
    }

    fn transpile_inline(&self, source: &str) -> Result<Vec<Node>, RenderError> {
        self.check_len(source)?;
        let parser = Parser::new_ext(source, Self::options(RenderProfile::Streaming));
        let blocks = TreeBuilder::default().build(parser);
        let mut inline = Vec::new();
        for (i, block) in blocks.into_iter().enumerate() {
            if i > 0 {
                inline.push(Node::new(NodeKind::SoftBreak));
            }
            match block.kind {
                NodeKind::Paragraph | NodeKind::Heading(_) => inline.extend(block.children),
                _ => inline.push(Node::text(block.text_content())),
            }
        }
        Ok(inline)
    }
}

/// Folds a pulldown event stream into owned nodes.
#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Node>,
    blocks: Vec<Node>,
}

impl TreeBuilder {
    fn build<'a>(mut self, events: impl Iterator<Item = Event<'a>>) -> Vec<Node> {
        for event in events {
            match event {
                Event::Start(tag) => self.stack.push(Node::new(kind_for(tag))),
                Event::End(_) => self.close(),
                Event::Text(text) => self.text(&text),
                Event::Code(code) => self.leaf(NodeKind::InlineCode(code.into_string())),
                Event::InlineMath(math) => self.leaf(NodeKind::Math(MathData {
                    display: false,
                    source: math.into_string(),
                    rendered: String::new(),
                })),
                Event::DisplayMath(math) => self.leaf(NodeKind::Math(MathData {
                    display: true,
                    source: math.into_string(),
                    rendered: String::new(),
                })),
                Event::Html(html) | Event::InlineHtml(html) => {
                    self.leaf(NodeKind::Html(html.into_string()));
                }
                Event::FootnoteReference(label) => self.text(&format!("[{label}]")),
                Event::SoftBreak => self.leaf(NodeKind::SoftBreak),
                Event::HardBreak => self.leaf(NodeKind::HardBreak),
                Event::Rule => self.leaf(NodeKind::Rule),
                Event::TaskListMarker(checked) => self.leaf(NodeKind::TaskMarker(checked)),
            }
        }
        while !self.stack.is_empty() {
            self.close();
        }
        self.blocks
    }

    fn close(&mut self) {
        if let Some(node) = self.stack.pop() {
            self.attach(node);
        }
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.blocks.push(node),
        }
    }

    fn leaf(&mut self, kind: NodeKind) {
        self.attach(Node::new(kind));
    }

    fn text(&mut self, text: &str) {
        if let Some(top) = self.stack.last_mut() {
            if let Some(code) = top.code_mut() {
                code.source.push_str(text);
                return;
            }
            // pulldown splits runs at special characters; keep them whole.
            if let Some(Node {
                kind: NodeKind::Text(last),
                ..
            }) = top.children.last_mut()
            {
                last.push_str(text);
                return;
            }
        }
        self.attach(Node::text(text));
    }
}

fn kind_for(tag: Tag<'_>) -> NodeKind {
    match tag {
        Tag::Paragraph => NodeKind::Paragraph,
        Tag::Heading { level, .. } => NodeKind::Heading(level as u8),
        Tag::BlockQuote(_) => NodeKind::BlockQuote,
        Tag::CodeBlock(CodeBlockKind::Fenced(info)) => {
            let lang = info.split_whitespace().next().unwrap_or_default();
            NodeKind::CodeBlock(CodeData::new(lang, ""))
        }
        Tag::CodeBlock(CodeBlockKind::Indented) => NodeKind::CodeBlock(CodeData::default()),
        Tag::List(start) => NodeKind::List { start },
        Tag::Item => NodeKind::Item,
        Tag::Table(_) => NodeKind::Table,
        Tag::TableHead => NodeKind::TableHead,
        Tag::TableRow => NodeKind::TableRow,
        Tag::TableCell => NodeKind::TableCell,
        Tag::Emphasis => NodeKind::Emphasis,
        Tag::Strong => NodeKind::Strong,
        Tag::Strikethrough => NodeKind::Strikethrough,
        Tag::Link { dest_url, title, .. } => NodeKind::Link {
            dest: dest_url.into_string(),
            title: title.into_string(),
        },
        Tag::Image { dest_url, title, .. } => NodeKind::Image {
            dest: dest_url.into_string(),
            title: title.into_string(),
        },
        _ => NodeKind::Block,
    }
}
