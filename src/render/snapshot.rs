//! Snapshot Renderer: one candidate tree for the current buffer state.

use super::math::{MathCache, MathTypesetter};
use super::transpile::{RenderProfile, Transpiler};
use crate::code::{language_from_shebang, resolve_language};
use crate::tree::{Node, NodeFlags, NodeKind};

/// A candidate tree; only its patch effect on the live tree persists.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Top-level candidate blocks (unsealed, unassigned).
    pub blocks: Vec<Node>,
    /// Profile used.
    pub profile: RenderProfile,
    /// Whether the transpiler failed and the snapshot is escaped text.
    pub fell_back: bool,
}

/// Drives the transpiler and the per-node post passes.
pub struct SnapshotRenderer {
    transpiler: Box<dyn Transpiler>,
    typesetter: Box<dyn MathTypesetter>,
    math: MathCache,
    renders: u64,
    fallbacks: u64,
}

impl std::fmt::Debug for SnapshotRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotRenderer")
            .field("renders", &self.renders)
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

impl SnapshotRenderer {
    /// Create a renderer over the given collaborators.
    pub fn new(transpiler: Box<dyn Transpiler>, typesetter: Box<dyn MathTypesetter>) -> Self {
        Self {
            transpiler,
            typesetter,
            math: MathCache::default(),
            renders: 0,
            fallbacks: 0,
        }
    }

    /// Replace the transpiler.
    pub fn set_transpiler(&mut self, transpiler: Box<dyn Transpiler>) {
        self.transpiler = transpiler;
    }

    /// Replace the math typesetter and drop memoised formulas.
    pub fn set_typesetter(&mut self, typesetter: Box<dyn MathTypesetter>) {
        self.typesetter = typesetter;
        self.math.clear();
    }

    /// Render `source` into a candidate tree.
    ///
    /// With `fence_open`, the source ends inside an unclosed code fence: a
    /// synthetic newline completes its last line and the last code block is
    /// flagged [`NodeFlags::OPEN_FENCE`].
    pub fn render(&mut self, source: &str, profile: RenderProfile, fence_open: bool) -> Snapshot {
        self.renders += 1;
        let padded;
        let source = if fence_open && !source.is_empty() && !source.ends_with('\n') {
            padded = format!("{source}\n");
            padded.as_str()
        } else {
            source
        };

        let (mut blocks, fell_back) = match self.transpiler.transpile(source, profile) {
            Ok(blocks) => (blocks, false),
            Err(err) => {
                self.fallbacks += 1;
                tracing::warn!(error = %err, len = source.len(), "render.fallback");
                let fallback = Node::new(NodeKind::Paragraph)
                    .with_children(vec![Node::text(source)])
                    .with_flags(NodeFlags::RENDER_FALLBACK);
                (vec![fallback], true)
            }
        };

        normalize_code(&mut blocks);
        if fence_open {
            mark_open_fence(&mut blocks);
        }
        self.math.typeset_all(&mut blocks, self.typesetter.as_ref());
        tracing::debug!(len = source.len(), ?profile, blocks = blocks.len(), "render.full");
        Snapshot {
            blocks,
            profile,
            fell_back,
        }
    }

    /// Render an inline fragment; falls back to a single text node.
    pub fn render_inline(&mut self, source: &str) -> Vec<Node> {
        match self.transpiler.transpile_inline(source) {
            Ok(mut nodes) => {
                self.math.typeset_all(&mut nodes, self.typesetter.as_ref());
                nodes
            }
            Err(err) => {
                self.fallbacks += 1;
                tracing::warn!(error = %err, "render.inline_fallback");
                vec![Node::text(source).with_flags(NodeFlags::RENDER_FALLBACK)]
            }
        }
    }

    /// Drop memoised formulas.
    pub fn clear_caches(&mut self) {
        self.math.clear();
    }

    /// Renders run so far.
    pub const fn renders(&self) -> u64 {
        self.renders
    }

    /// Renders that fell back to escaped text.
    pub const fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    /// Typesetter calls so far (memo misses).
    pub const fn typeset_calls(&self) -> u64 {
        self.math.typeset_calls()
    }
}

fn normalize_code(blocks: &mut [Node]) {
    for block in blocks {
        block.walk_mut(&mut |node| {
            if let Some(code) = node.code_mut() {
                code.lang = resolve_language(&code.lang);
                if code.lang.is_empty() {
                    let first = code.source.lines().next().unwrap_or_default();
                    if let Some(lang) = language_from_shebang(first) {
                        code.lang = lang;
                    }
                }
            }
        });
    }
}

/// Flag the last code block in document order.
fn mark_open_fence(blocks: &mut [Node]) {
    fn last_code(node: &mut Node) -> Option<&mut Node> {
        if node.code().is_some() {
            return Some(node);
        }
        node.children.iter_mut().rev().find_map(last_code)
    }
    if let Some(code) = blocks.iter_mut().rev().find_map(last_code) {
        code.flags.insert(NodeFlags::OPEN_FENCE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::render::{PassthroughMath, PulldownTranspiler};

    struct Failing;

    impl Transpiler for Failing {
        fn transpile(
            &self,
            _source: &str,
            _profile: RenderProfile,
        ) -> Result<Vec<Node>, RenderError> {
            Err(RenderError::Transpile("boom".into()))
        }

        fn transpile_inline(&self, _source: &str) -> Result<Vec<Node>, RenderError> {
            Err(RenderError::Transpile("boom".into()))
        }
    }

    fn renderer() -> SnapshotRenderer {
        SnapshotRenderer::new(Box::new(PulldownTranspiler::new()), Box::new(PassthroughMath))
    }

    #[test]
    fn test_open_fence_flagged_and_lang_resolved() {
        let snapshot = renderer().render("text\n\n```py\nprint(1", RenderProfile::Streaming, true);
        let code = &snapshot.blocks[1];
        assert!(code.flags.contains(NodeFlags::OPEN_FENCE));
        let data = code.code().unwrap();
        assert_eq!(data.lang, "python");
        assert_eq!(data.source, "print(1\n");
    }

    #[test]
    fn test_closed_fence_not_flagged() {
        let snapshot = renderer().render("```py\nx\n```\n", RenderProfile::Final, false);
        assert!(!snapshot.blocks[0].flags.contains(NodeFlags::OPEN_FENCE));
    }

    #[test]
    fn test_transpile_failure_falls_back() {
        let mut renderer = SnapshotRenderer::new(Box::new(Failing), Box::new(PassthroughMath));
        let snapshot = renderer.render("**x**", RenderProfile::Streaming, false);
        assert!(snapshot.fell_back);
        assert!(snapshot.blocks[0].flags.contains(NodeFlags::RENDER_FALLBACK));
        assert_eq!(snapshot.blocks[0].text_content(), "**x**");
        assert_eq!(renderer.render_inline("a").len(), 1);
        assert_eq!(renderer.fallbacks(), 2);
    }

    #[test]
    fn test_math_memoised_across_renders() {
        let mut renderer = renderer();
        renderer.render("$a$ and $b$\n", RenderProfile::Streaming, false);
        renderer.render("$a$ and $b$ and more\n", RenderProfile::Streaming, false);
        assert_eq!(renderer.typeset_calls(), 2);
    }
}
