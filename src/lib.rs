//! # Inkstream
//!
//! An incremental renderer for markdown streamed from generative backends.
//!
//! Text arrives in arbitrary chunks at high frequency. Inkstream turns it into
//! a live [`PresentationTree`] while keeping every unit of work inside a
//! per-tick time budget, so the host's interface stays responsive.
//!
//! ## Core Concepts
//!
//! - **Cooperative scheduler**: keyed, prioritized tasks run in budgeted slices
//! - **Snapshot and patch**: each render transpiles the buffer and patches only
//!   the blocks that changed, preserving node identity
//! - **Active code**: the open code fence streams into one node, promoted to
//!   highlighted markup in chunks
//! - **Plain append**: long runs of marker-free prose skip snapshots entirely
//! - **Custom markup**: user token pairs rewritten, fenced or wrapped as spans
//!
//! ## Example
//!
//! ```rust,ignore
//! use inkstream::{ChunkKind, EngineConfig, ImmediateTicks, StreamEngine};
//!
//! let mut engine = StreamEngine::new(EngineConfig::default());
//! engine.on_chunk("answer", "# Title\n\nsome ", ChunkKind::TextDelta);
//! engine.on_chunk("answer", "`code`\n", ChunkKind::TextDelta);
//! engine.pump(&mut ImmediateTicks::new(), 64);
//! engine.end_stream();
//!
//! for event in engine.drain_events() {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod buffer;
pub mod clock;
pub mod code;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod ingest;
pub mod markup;
pub mod render;
pub mod sched;
pub mod telemetry;
pub mod tree;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use code::{CodeState, EscapeHighlighter, SyntaxHighlighter};
pub use config::EngineConfig;
pub use engine::{Collaborators, EngineStats, ResetOptions, ResetOrigin, StreamEngine};
pub use error::{ConfigError, Error, HighlightError, MarkupError, RenderError, TaskError};
pub use host::{HostProbe, IdleHost, ScriptedHost, SurfaceEvent};
pub use ingest::bridge::{ChunkSender, StreamMessage};
pub use ingest::{Backpressure, ChunkKind};
pub use markup::{MarkupRule, RuleKind};
pub use render::{MathTypesetter, PulldownTranspiler, RenderProfile, Transpiler};
pub use sched::{ImmediateTicks, Priority, Scheduler, TickSource, TickerActor};
pub use telemetry::{MemorySink, TelemetrySink, TracingSink};
pub use tree::{Node, NodeFlags, NodeId, NodeKind, PresentationTree};
