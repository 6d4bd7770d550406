//! Error types for the streaming renderer.
//!
//! Nothing in this crate is fatal to the host. These errors describe why a
//! single unit of work (a render, a highlight, a typeset formula) fell back
//! to a cheaper presentation; the engine logs them and keeps streaming.

use crate::tree::NodeId;
use thiserror::Error;

/// The markdown transpiler could not produce a tree.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The transpiler rejected or failed on the source.
    #[error("transpile failed: {0}")]
    Transpile(String),
    /// The source was larger than the transpiler accepts.
    #[error("source of {len} bytes exceeds transpiler limit of {limit}")]
    TooLarge {
        /// Source length in bytes.
        len: usize,
        /// Limit in bytes.
        limit: usize,
    },
}

/// The syntax highlighter failed for one code unit.
#[derive(Debug, Error)]
pub enum HighlightError {
    /// No grammar is registered for the language.
    #[error("no grammar for language `{0}`")]
    UnsupportedLanguage(String),
    /// The highlighter failed while processing the source.
    #[error("highlighting failed: {0}")]
    Failed(String),
}

/// The math typesetter failed for one formula.
#[derive(Debug, Error)]
#[error("typesetting failed: {reason}")]
pub struct MathError {
    /// Why the typesetter gave up.
    pub reason: String,
}

/// A custom markup rule table could not be compiled.
#[derive(Debug, Error)]
pub enum MarkupError {
    /// A rule has an empty open or close token.
    #[error("rule `{0}` has an empty open or close token")]
    EmptyToken(String),
    /// Two rules share a name.
    #[error("duplicate rule name `{0}`")]
    DuplicateName(String),
    /// The combined matcher failed to compile.
    #[error("matcher compilation failed: {0}")]
    Regex(#[from] regex::Error),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML text did not parse.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value parsed but is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },
}

/// Why a scheduled task did not complete.
///
/// Tasks report failures instead of panicking; the scheduler logs them,
/// counts them and moves on to the next task in the tick.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A render failed.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// A highlight failed.
    #[error(transparent)]
    Highlight(#[from] HighlightError),
    /// The node the task targeted is no longer in the live tree.
    #[error("node {0:?} is detached")]
    Detached(NodeId),
}

/// Crate-level error for fallible public entry points.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Markup rule error.
    #[error(transparent)]
    Markup(#[from] MarkupError),
    /// I/O error (tick source threads).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
