//! Presentation tree: the live document the host displays.
//!
//! The tree is owned here and mutated only through the patcher and the
//! engine's code block hooks. Hosts read it through [`PresentationTree::root`]
//! and learn what changed from [`SurfaceEvent`](crate::host::SurfaceEvent)s.

mod fingerprint;
mod index;
mod node;
mod patch;

pub use fingerprint::CodeFingerprint;
pub use index::{node_at, node_at_mut, NodeIndex, NodePath};
pub use node::{CodeData, MathData, Node, NodeFlags, NodeId, NodeKind, PlainData};
pub use patch::{patch, PatchStats};

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCounters {
    /// Nodes that entered the tree with a fresh id.
    pub created: u64,
    /// Code blocks that entered the tree with a fresh id.
    pub code_blocks_created: u64,
    /// Plain-append spans created.
    pub plain_spans_created: u64,
    /// Nodes updated in place, keeping their id.
    pub morphs: u64,
}

/// The live presentation tree.
#[derive(Debug)]
pub struct PresentationTree {
    root: Node,
    next_id: u64,
    index: NodeIndex,
    counters: TreeCounters,
}

impl PresentationTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            root: Node::new(NodeKind::Root),
            next_id: 1,
            index: NodeIndex::new(),
            counters: TreeCounters::default(),
        }
    }

    /// The root node.
    pub const fn root(&self) -> &Node {
        &self.root
    }

    /// Top-level blocks.
    pub fn blocks(&self) -> &[Node] {
        &self.root.children
    }

    /// Number of top-level blocks.
    pub fn len(&self) -> usize {
        self.root.children.len()
    }

    /// Whether the tree has no blocks.
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Markup-free text of the whole document.
    pub fn text_content(&self) -> String {
        self.root.text_content()
    }

    /// Lifetime counters.
    pub const fn counters(&self) -> TreeCounters {
        self.counters
    }

    /// Find a live node by id.
    pub fn find(&mut self, id: NodeId) -> Option<&Node> {
        let path = self.index.resolve(&self.root, id)?;
        node_at(&self.root, &path)
    }

    /// Find a live node by id for mutation.
    ///
    /// Callers that change content must reseal the node; see
    /// [`PresentationTree::reseal_path`].
    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let path = self.index.resolve(&self.root, id)?;
        node_at_mut(&mut self.root, &path)
    }

    /// Path of a live node.
    pub fn path_of(&mut self, id: NodeId) -> Option<NodePath> {
        self.index.resolve(&self.root, id)
    }

    /// Recompute digests along `path`, deepest first.
    pub fn reseal_path(&mut self, path: &[usize]) {
        for depth in (0..=path.len()).rev() {
            if let Some(node) = node_at_mut(&mut self.root, &path[..depth]) {
                node.reseal_shallow();
            }
        }
    }

    /// Mutate the node `id` and reseal its ancestors. Returns `false` if it is gone.
    pub fn update(&mut self, id: NodeId, change: impl FnOnce(&mut Node)) -> bool {
        let Some(path) = self.index.resolve(&self.root, id) else {
            return false;
        };
        let Some(node) = node_at_mut(&mut self.root, &path) else {
            return false;
        };
        change(node);
        node.seal();
        self.reseal_path(&path);
        true
    }

    /// Mutate the node `id` without resealing.
    ///
    /// For hot paths (streaming code appends). The digest stays stale until
    /// the next [`PresentationTree::update`] of the node.
    pub fn touch(&mut self, id: NodeId, change: impl FnOnce(&mut Node)) -> bool {
        self.find_mut(id).map(change).is_some()
    }

    /// Append a top-level block, assigning ids.
    pub fn push_block(&mut self, mut node: Node) -> NodeId {
        self.adopt(&mut node);
        node.seal();
        let id = node.id;
        self.root.children.push(node);
        self.root.reseal_shallow();
        id
    }

    /// Replace top-level blocks `start..end` with `blocks`, which must be sealed.
    pub(crate) fn splice(&mut self, start: usize, end: usize, blocks: Vec<Node>) -> Vec<Node> {
        self.index.invalidate_from(start);
        let removed: Vec<Node> = self.root.children.splice(start..end, blocks).collect();
        self.root.reseal_shallow();
        removed
    }

    /// Assign fresh ids to every unassigned node in `node`'s subtree.
    pub(crate) fn adopt(&mut self, node: &mut Node) {
        let mut next_id = self.next_id;
        let mut counters = self.counters;
        node.walk_mut(&mut |n| {
            if n.id.is_assigned() {
                return;
            }
            n.id = NodeId::new(next_id);
            next_id += 1;
            counters.created += 1;
            match n.kind {
                NodeKind::CodeBlock(_) => counters.code_blocks_created += 1,
                NodeKind::PlainStream(_) => counters.plain_spans_created += 1,
                _ => {}
            }
        });
        self.next_id = next_id;
        self.counters = counters;
    }

    pub(crate) fn count_morph(&mut self) {
        self.counters.morphs += 1;
    }

    /// Ids of every node carrying all of `flags`.
    pub fn ids_with_flags(&self, flags: NodeFlags) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.root.walk(&mut |node| {
            if node.flags.contains(flags) {
                ids.push(node.id);
            }
        });
        ids
    }

    /// Whether any node carries all of `flags`.
    pub fn any_with_flags(&self, flags: NodeFlags) -> bool {
        let mut found = false;
        self.root.walk(&mut |node| found |= node.flags.contains(flags));
        found
    }

    /// Remove every block. Ids keep counting up.
    pub fn clear(&mut self) {
        self.root.children.clear();
        self.root.reseal_shallow();
        self.index.clear();
    }
}

impl Default for PresentationTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_block_assigns_ids_and_counts() {
        let mut tree = PresentationTree::new();
        let id = tree.push_block(
            Node::new(NodeKind::Paragraph).with_children(vec![Node::text("a")]),
        );
        tree.push_block(Node::new(NodeKind::CodeBlock(CodeData::new("rust", "x"))));
        assert!(id.is_assigned());
        let counters = tree.counters();
        assert_eq!(counters.created, 3);
        assert_eq!(counters.code_blocks_created, 1);
        assert_eq!(tree.text_content(), "ax");
    }

    #[test]
    fn test_update_reseals_ancestors() {
        let mut tree = PresentationTree::new();
        tree.push_block(Node::new(NodeKind::Paragraph).with_children(vec![Node::text("a")]));
        let text_id = tree.blocks()[0].children[0].id;
        let before = tree.blocks()[0].digest;
        assert!(tree.update(text_id, |node| node.kind = NodeKind::Text("b".into())));
        assert_ne!(tree.blocks()[0].digest, before);

        let mut fresh = Node::new(NodeKind::Paragraph).with_children(vec![Node::text("b")]);
        assert_eq!(tree.blocks()[0].digest, fresh.seal());
    }

    #[test]
    fn test_flag_queries() {
        let mut tree = PresentationTree::new();
        let id = tree.push_block(
            Node::new(NodeKind::CodeBlock(CodeData::default())).with_flags(NodeFlags::ACTIVE_CODE),
        );
        assert!(tree.any_with_flags(NodeFlags::ACTIVE_CODE));
        assert_eq!(tree.ids_with_flags(NodeFlags::ACTIVE_CODE), vec![id]);
        tree.clear();
        assert!(!tree.any_with_flags(NodeFlags::ACTIVE_CODE));
        assert!(tree.find(id).is_none());
    }
}
