//! Code blocks: streaming promotion and final highlighting.
//!
//! - [`ActiveCodeBlock`]: frozen/tail promotion for the block being streamed
//! - [`HighlightQueue`]: viewport-aware final highlighting of closed blocks
//! - [`SyntaxHighlighter`]: the pluggable highlighter seam

mod active;
mod highlight;
mod lang;

pub use active::{defuse_node, ActiveCodeBlock, CodeState, Promotion};
pub use highlight::{
    needs_highlight, EscapeHighlighter, FlushReport, HighlightQueue, SyntaxHighlighter,
};
pub use lang::{language_from_shebang, resolve_language};
