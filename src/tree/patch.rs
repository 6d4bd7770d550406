//! Tree Patcher: minimal reconciliation of a candidate tree into the live one.
//!
//! 1. Common prefix and suffix (by digest) are left untouched.
//! 2. Stable-code reuse: code blocks in the candidate middle, at any depth,
//!    whose fingerprint matches a live block in the replaced span are
//!    replaced by the live node, so highlighting survives.
//! 3. In the differing middle, each candidate block is matched against the
//!    next `lookahead` live blocks: an equal digest moves the live block over
//!    verbatim; a same-kind block is morphed (new content, old id); anything
//!    else is inserted fresh.
//!
//! Only the middle span is spliced, so the cost is proportional to what
//! changed rather than to the document.

use super::fingerprint::CodeFingerprint;
use super::node::{Node, NodeFlags, NodeId, NodeKind};
use super::PresentationTree;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// What a patch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchStats {
    /// First replaced top-level index.
    pub start: usize,
    /// Live blocks removed from the tree.
    pub removed: usize,
    /// Blocks inserted in their place.
    pub inserted: usize,
    /// Blocks left alone at the front.
    pub kept_prefix: usize,
    /// Blocks left alone at the back.
    pub kept_suffix: usize,
    /// Code blocks swapped for their live counterpart.
    pub reused_code: usize,
    /// Live blocks moved verbatim inside the middle span.
    pub moved: usize,
    /// Blocks morphed in place.
    pub morphed: usize,
    /// Closed, unhighlighted code blocks that entered the tree.
    pub new_code: Vec<NodeId>,
}

impl PatchStats {
    /// Whether the live tree changed.
    pub const fn changed(&self) -> bool {
        self.removed > 0 || self.inserted > 0
    }
}

/// Reconcile `candidate` (top-level blocks) into `tree`.
pub fn patch(
    tree: &mut PresentationTree,
    mut candidate: Vec<Node>,
    lookahead: usize,
) -> PatchStats {
    for node in &mut candidate {
        node.seal();
    }
    let mut stats = PatchStats::default();

    let old = tree.blocks();
    let prefix = old
        .iter()
        .zip(&candidate)
        .take_while(|(a, b)| a.digest == b.digest)
        .count();
    let max_suffix = old.len().min(candidate.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(candidate.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a.digest == b.digest)
        .count();

    stats.start = prefix;
    stats.kept_prefix = prefix;
    stats.kept_suffix = suffix;

    let old_end = old.len() - suffix;
    let new_end = candidate.len() - suffix;
    if prefix == old_end && prefix == new_end {
        return stats;
    }

    let mut middle: Vec<Node> = candidate.drain(prefix..new_end).collect();
    let mut detached = tree.splice(prefix, old_end, Vec::new());
    let reused = reuse_stable_code(&detached, &mut middle);
    stats.reused_code = reused.len();
    let mut taken = vec![false; detached.len()];
    let mut cursor = 0;
    let mut replacement = Vec::with_capacity(middle.len());

    for mut node in middle {
        let window = cursor..(cursor + lookahead.max(1)).min(detached.len());
        // A live block whose code was lent to another candidate cannot move whole.
        let equal = window.clone().find(|&i| {
            !taken[i] && detached[i].digest == node.digest && !lends_code(&detached[i], &reused)
        });
        if let Some(i) = equal {
            taken[i] = true;
            cursor = i + 1;
            stats.moved += 1;
            replacement.push(std::mem::replace(&mut detached[i], Node::new(NodeKind::Block)));
            continue;
        }

        if cursor < detached.len() && !taken[cursor] && can_morph(&detached[cursor], &node) {
            taken[cursor] = true;
            node.id = detached[cursor].id;
            cursor += 1;
            tree.count_morph();
            stats.morphed += 1;
        }
        tree.adopt(&mut node);
        collect_new_code(&node, &mut stats.new_code);
        replacement.push(node);
    }

    stats.removed = detached.len();
    stats.inserted = replacement.len();
    tree.splice(prefix, prefix, replacement);
    tracing::debug!(
        start = stats.start,
        removed = stats.removed,
        inserted = stats.inserted,
        moved = stats.moved,
        morphed = stats.morphed,
        reused_code = stats.reused_code,
        "tree.patch"
    );
    stats
}

/// Swap candidate code blocks, at any depth, for matching live ones.
/// Returns the ids of the live nodes taken over.
fn reuse_stable_code(old: &[Node], candidate: &mut [Node]) -> FxHashSet<NodeId> {
    let mut live: FxHashMap<CodeFingerprint, VecDeque<&Node>> = FxHashMap::default();
    for block in old {
        block.walk(&mut |node| {
            if let Some(code) = node.code() {
                if !node.flags.contains(NodeFlags::OPEN_FENCE) {
                    live.entry(CodeFingerprint::of(code)).or_default().push_back(node);
                }
            }
        });
    }
    let mut reused = FxHashSet::default();
    if live.is_empty() {
        return reused;
    }

    for block in candidate.iter_mut() {
        let before = reused.len();
        block.walk_mut(&mut |node| {
            let Some(code) = node.code() else { return };
            if node.flags.contains(NodeFlags::OPEN_FENCE) {
                return;
            }
            let Some(found) = live
                .get_mut(&CodeFingerprint::of(code))
                .and_then(VecDeque::pop_front)
            else {
                return;
            };
            let mut kept = found.clone();
            // The live block may still carry a stale digest from before its
            // last content change, and the language may have been normalized
            // differently; the candidate is authoritative for both.
            if let Some(live_code) = kept.code_mut() {
                live_code.lang.clone_from(&code.lang);
                if live_code.source != code.source {
                    live_code.source.clone_from(&code.source);
                    live_code.frozen_len = live_code.frozen_len.min(live_code.source.len());
                }
            }
            kept.flags.remove(NodeFlags::OPEN_FENCE);
            reused.insert(kept.id);
            *node = kept;
        });
        if reused.len() > before {
            block.seal();
        }
    }
    reused
}

fn lends_code(block: &Node, reused: &FxHashSet<NodeId>) -> bool {
    if reused.is_empty() {
        return false;
    }
    let mut lent = false;
    block.walk(&mut |node| lent |= node.code().is_some() && reused.contains(&node.id));
    lent
}

/// Whether `new` may take over `old`'s id.
fn can_morph(old: &Node, new: &Node) -> bool {
    if !old.kind.same_variant(&new.kind) {
        return false;
    }
    // Highlighted or streaming code is only ever kept whole, never rewritten.
    !(old.code().is_some() && old.flags.intersects(NodeFlags::HIGHLIGHTED | NodeFlags::ACTIVE_CODE))
}

fn collect_new_code(node: &Node, out: &mut Vec<NodeId>) {
    node.walk(&mut |n| {
        if n.code().is_some()
            && !n
                .flags
                .intersects(NodeFlags::HIGHLIGHTED | NodeFlags::OPEN_FENCE | NodeFlags::ACTIVE_CODE)
        {
            out.push(n.id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::CodeData;
    use pretty_assertions::assert_eq;

    fn para(text: &str) -> Node {
        Node::new(NodeKind::Paragraph).with_children(vec![Node::text(text)])
    }

    fn code(lang: &str, source: &str) -> Node {
        Node::new(NodeKind::CodeBlock(CodeData::new(lang, source)))
    }

    fn ids(tree: &PresentationTree) -> Vec<NodeId> {
        tree.blocks().iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_initial_patch_inserts_everything() {
        let mut tree = PresentationTree::new();
        let stats = patch(&mut tree, vec![para("a"), para("b")], 6);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.removed, 0);
        assert_eq!(tree.text_content(), "ab");
    }

    #[test]
    fn test_identical_candidate_is_noop() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![para("a"), para("b")], 6);
        let before = ids(&tree);
        let stats = patch(&mut tree, vec![para("a"), para("b")], 6);
        assert!(!stats.changed());
        assert_eq!(stats.kept_prefix, 2);
        assert_eq!(ids(&tree), before);
    }

    #[test]
    fn test_growing_last_block_morphs_in_place() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![para("a"), para("b")], 6);
        let before = ids(&tree);
        let stats = patch(&mut tree, vec![para("a"), para("bc")], 6);
        assert_eq!(stats.kept_prefix, 1);
        assert_eq!(stats.morphed, 1);
        assert_eq!(ids(&tree), before);
        assert_eq!(tree.text_content(), "abc");
    }

    #[test]
    fn test_identical_subtrees_outside_window_untouched() {
        let mut tree = PresentationTree::new();
        let blocks: Vec<Node> = (0..20).map(|i| para(&format!("p{i}"))).collect();
        patch(&mut tree, blocks.clone(), 6);
        let before: Vec<Node> = tree.blocks().to_vec();

        let mut edited = blocks;
        edited[10] = para("changed");
        let stats = patch(&mut tree, edited, 6);
        assert_eq!((stats.kept_prefix, stats.kept_suffix), (10, 9));
        assert_eq!(stats.removed, 1);
        for (i, (old, new)) in before.iter().zip(tree.blocks()).enumerate() {
            if i != 10 {
                assert_eq!(old, new);
            }
        }
    }

    #[test]
    fn test_insertion_moves_following_blocks_verbatim() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![para("a"), para("b"), para("c"), para("z")], 6);
        let before = ids(&tree);
        let stats = patch(
            &mut tree,
            vec![para("a"), code("", "x"), para("b"), para("c"), para("y")],
            6,
        );
        assert_eq!(stats.kept_prefix, 1);
        assert_eq!(stats.moved, 2);
        let after = ids(&tree);
        assert_eq!(after[2], before[1]);
        assert_eq!(after[3], before[2]);
        assert_eq!(stats.new_code, vec![after[1]]);
    }

    #[test]
    fn test_highlighted_code_reused_not_resubmitted() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![para("intro"), code("python", "print(1)\n")], 6);
        let code_id = tree.blocks()[1].id;
        tree.update(code_id, |node| {
            node.flags.insert(NodeFlags::HIGHLIGHTED);
            if let Some(code) = node.code_mut() {
                code.markup = "<b>print</b>(1)\n".into();
            }
        });

        // Intro grows; the code block shifts relative to nothing but must survive.
        let stats = patch(
            &mut tree,
            vec![para("intro!"), code("python", "print(1)\r\n")],
            6,
        );
        assert_eq!(stats.reused_code, 1);
        assert!(stats.new_code.is_empty());
        let kept = &tree.blocks()[1];
        assert_eq!(kept.id, code_id);
        assert!(kept.flags.contains(NodeFlags::HIGHLIGHTED));
        assert_eq!(tree.counters().code_blocks_created, 1);
    }

    #[test]
    fn test_nested_code_reused_when_list_grows() {
        fn list(texts: &[&str]) -> Node {
            let mut item = vec![para("step"), code("python", "x = 1\n")];
            item.extend(texts.iter().map(|t| para(t)));
            Node::new(NodeKind::List { start: Some(1) })
                .with_children(vec![Node::new(NodeKind::Item).with_children(item)])
        }

        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![list(&[])], 6);
        let code_id = code_ids(&tree)[0];
        assert!(tree.update(code_id, |node| node.flags.insert(NodeFlags::HIGHLIGHTED)));

        for grown in [&["more 0"][..], &["more 0", "more 1"]] {
            let stats = patch(&mut tree, vec![list(grown)], 6);
            assert_eq!(stats.reused_code, 1);
            assert!(stats.new_code.is_empty());
        }
        assert_eq!(tree.ids_with_flags(NodeFlags::HIGHLIGHTED), vec![code_id]);
        assert_eq!(tree.counters().code_blocks_created, 1);
    }

    #[test]
    fn test_lent_code_block_is_not_moved_twice() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![para("a"), code("rust", "x"), para("z")], 6);
        let code_id = code_ids(&tree)[0];

        let quoted = Node::new(NodeKind::BlockQuote).with_children(vec![code("rust", "x")]);
        let stats = patch(&mut tree, vec![quoted, code("rust", "x"), para("y")], 6);
        assert_eq!(stats.reused_code, 1);
        assert_eq!(stats.moved, 0);
        let ids = code_ids(&tree);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], code_id);
        assert_ne!(ids[1], code_id);
    }

    fn code_ids(tree: &PresentationTree) -> Vec<NodeId> {
        let mut ids = Vec::new();
        tree.root().walk(&mut |node| {
            if node.code().is_some() {
                ids.push(node.id);
            }
        });
        ids
    }

    #[test]
    fn test_highlighted_code_never_morphed() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![code("rust", "a")], 6);
        let id = tree.blocks()[0].id;
        tree.update(id, |node| node.flags.insert(NodeFlags::HIGHLIGHTED));
        let stats = patch(&mut tree, vec![code("rust", "b")], 6);
        assert_eq!(stats.morphed, 0);
        assert_ne!(tree.blocks()[0].id, id);
        assert_eq!(stats.new_code.len(), 1);
    }

    #[test]
    fn test_removal_shrinks_tree() {
        let mut tree = PresentationTree::new();
        patch(&mut tree, vec![para("a"), para("b"), para("c")], 6);
        let stats = patch(&mut tree, vec![para("a"), para("c")], 6);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.inserted, 0);
        assert_eq!(tree.text_content(), "ac");
    }
}
