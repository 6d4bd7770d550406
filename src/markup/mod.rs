//! Custom markup: user-defined token pairs layered over markdown.
//!
//! Rules apply in three places:
//!
//! - source rules rewrite raw text before transpiling
//! - fence rules become code fences the stream buffer tracks like ``` fences
//! - tree rules wrap rendered inline content in
//!   [`NodeKind::Markup`](crate::tree::NodeKind::Markup) spans
//!
//! While streaming, a tree rule whose closer has not arrived yields a span
//! flagged [`NodeFlags::PENDING`](crate::tree::NodeFlags::PENDING).

mod engine;
mod rules;

pub use engine::{MarkupEngine, DEFAULT_MEMO_CAPACITY};
pub use rules::{MarkupRule, RuleKind, RuleSet};
