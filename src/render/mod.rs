//! Rendering: from buffer text to candidate trees.
//!
//! - [`Cadence`]: decides when a snapshot is worth taking
//! - [`PlainTracker`]: switches to raw appends while the stream is plain prose
//! - [`SnapshotRenderer`]: transpiles, normalizes and typesets a snapshot
//! - [`Transpiler`] / [`MathTypesetter`]: pluggable collaborators

mod cadence;
mod math;
mod plain;
mod snapshot;
mod transpile;

pub use cadence::{has_boundary, Cadence, CadenceProfile, RenderTrigger};
pub use math::{MathCache, MathTypesetter, PassthroughMath};
pub use plain::{safe_boundary, PlainTracker, PlainTransition};
pub use snapshot::{Snapshot, SnapshotRenderer};
pub use transpile::{PulldownTranspiler, RenderProfile, Transpiler};

use std::borrow::Cow;

/// Escape `&`, `<`, `>` and `"` for embedding text in markup.
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markup() {
        assert!(matches!(escape_markup("plain"), Cow::Borrowed("plain")));
        assert_eq!(
            escape_markup(r#"<a href="x">&</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;"
        );
    }
}
