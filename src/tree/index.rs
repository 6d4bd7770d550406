//! Id to position lookup for the live tree.
//!
//! Nodes do not hold references to each other. Anything that needs to come
//! back to a node later (the active code block, the highlight queue) keeps
//! its [`NodeId`] and resolves it here. Cached paths are invalidated for
//! every top-level range the patcher detaches; a stale hit is detected by
//! re-checking the id at the cached path.

use super::node::{Node, NodeId};
use rustc_hash::FxHashMap;

/// Path of child indices from the root.
pub type NodePath = Vec<usize>;

/// Relation cache keyed by stable id.
#[derive(Debug, Default)]
pub struct NodeIndex {
    paths: FxHashMap<NodeId, NodePath>,
    hits: u64,
    misses: u64,
}

impl NodeIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `id` to a path under `root`, rebuilding the cache on a miss.
    pub fn resolve(&mut self, root: &Node, id: NodeId) -> Option<NodePath> {
        if let Some(path) = self.paths.get(&id) {
            if node_at(root, path).is_some_and(|node| node.id == id) {
                self.hits += 1;
                return Some(path.clone());
            }
        }
        self.misses += 1;
        self.rebuild(root);
        self.paths.get(&id).cloned()
    }

    /// Forget every path that starts at or after top-level index `start`.
    pub fn invalidate_from(&mut self, start: usize) {
        self.paths.retain(|_, path| path.first().is_some_and(|&top| top < start));
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Cache hits and misses.
    pub const fn hit_rate(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn rebuild(&mut self, root: &Node) {
        self.paths.clear();
        let mut path = Vec::new();
        for (index, child) in root.children.iter().enumerate() {
            path.push(index);
            self.record(child, &mut path);
            path.pop();
        }
    }

    fn record(&mut self, node: &Node, path: &mut NodePath) {
        if node.id.is_assigned() {
            self.paths.insert(node.id, path.clone());
        }
        for (index, child) in node.children.iter().enumerate() {
            path.push(index);
            self.record(child, path);
            path.pop();
        }
    }
}

/// Node at `path` under `root`.
pub fn node_at<'a>(root: &'a Node, path: &[usize]) -> Option<&'a Node> {
    path.iter().try_fold(root, |node, &index| node.children.get(index))
}

/// Mutable node at `path` under `root`.
pub fn node_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> Option<&'a mut Node> {
    path.iter()
        .try_fold(root, |node, &index| node.children.get_mut(index))
}
