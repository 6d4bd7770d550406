//! Math typesetting seam with a memo of typeset formulas.

use super::escape_markup;
use crate::error::MathError;
use crate::tree::{Node, NodeFlags, NodeKind};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Converts formula source into presentation markup.
pub trait MathTypesetter {
    /// Typeset one formula.
    fn typeset(&self, source: &str, display: bool) -> Result<String, MathError>;
}

/// Wraps the escaped source in a math element without typesetting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughMath;

impl MathTypesetter for PassthroughMath {
    fn typeset(&self, source: &str, display: bool) -> Result<String, MathError> {
        let mode = if display { "block" } else { "inline" };
        Ok(format!(r#"<math display="{mode}">{}</math>"#, escape_markup(source)))
    }
}

const DEFAULT_CAPACITY: usize = 256;

/// LRU memo keyed by `(display, source)`.
///
/// Failures are memoised too, so a formula the typesetter rejects is not
/// retried on every render.
#[derive(Debug)]
pub struct MathCache {
    entries: LruCache<(bool, String), Option<String>>,
    typeset_calls: u64,
}

impl MathCache {
    /// Create a memo holding up to `capacity` formulas.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            typeset_calls: 0,
        }
    }

    /// Fill in `rendered` for every math node under `nodes`.
    pub fn typeset_all(&mut self, nodes: &mut [Node], typesetter: &dyn MathTypesetter) {
        for node in nodes {
            node.walk_mut(&mut |n| {
                let NodeKind::Math(math) = &mut n.kind else {
                    return;
                };
                let key = (math.display, math.source.clone());
                let result = if let Some(cached) = self.entries.get(&key) {
                    cached.clone()
                } else {
                    self.typeset_calls += 1;
                    let result = match typesetter.typeset(&math.source, math.display) {
                        Ok(markup) => Some(markup),
                        Err(err) => {
                            tracing::warn!(error = %err, "math.fallback");
                            None
                        }
                    };
                    self.entries.put(key, result.clone());
                    result
                };
                match result {
                    Some(markup) => math.rendered = markup,
                    None => {
                        math.rendered = escape_markup(&math.source).into_owned();
                        n.flags.insert(NodeFlags::MATH_FALLBACK);
                    }
                }
            });
        }
    }

    /// Calls made to the typesetter so far.
    pub const fn typeset_calls(&self) -> u64 {
        self.typeset_calls
    }

    /// Drop every memoised formula.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for MathCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
