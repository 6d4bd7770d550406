//! Stream engine: one per presentation surface.
//!
//! [`StreamEngine`] owns a [`Scheduler`] and the core state its tasks run
//! against. Hosts push chunks with [`StreamEngine::on_chunk`] (or through a
//! [`ChunkSender`] from another thread), drive ticks from any
//! [`TickSource`], read the [`PresentationTree`] and drain
//! [`SurfaceEvent`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use inkstream::{ChunkKind, EngineConfig, StreamEngine};
//!
//! let mut engine = StreamEngine::new(EngineConfig::default());
//! engine.on_chunk("answer", "Hello **wor", ChunkKind::TextDelta);
//! engine.on_chunk("answer", "ld**", ChunkKind::TextDelta);
//! engine.end_stream();
//! assert_eq!(engine.tree().text_content(), "Hello world");
//! ```

mod core;

use self::core::{schedule_drain, schedule_highlight, schedule_telemetry, EngineCore, Sched, STREAM};
use crate::clock::{Clock, SystemClock};
use crate::code::{CodeState, EscapeHighlighter, SyntaxHighlighter};
use crate::config::EngineConfig;
use crate::error::{Error, MarkupError};
use crate::host::{HostProbe, IdleHost, SurfaceEvent};
use crate::ingest::bridge::{self, ChunkReceiver, ChunkSender, StreamMessage};
use crate::ingest::{Backpressure, ChunkKind};
use crate::markup::MarkupRule;
use crate::render::{
    MathTypesetter, PassthroughMath, PulldownTranspiler, SnapshotRenderer, Transpiler,
};
use crate::sched::{Scheduler, SliceReport, TickSource};
use crate::telemetry::{TelemetrySink, TracingSink};
use crate::tree::{PresentationTree, TreeCounters};
use std::fmt;
use std::rc::Rc;

/// Who asked for a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetOrigin {
    /// A new stream is starting on this surface.
    NewStream,
    /// The user cleared the conversation.
    ClearCommand,
    /// The surface was hidden.
    VisibilityChange,
    /// The producer aborted the stream.
    Abort,
}

impl ResetOrigin {
    /// The options this origin usually implies.
    pub const fn default_options(self) -> ResetOptions {
        match self {
            Self::NewStream | Self::ClearCommand => ResetOptions {
                finalize_active: true,
                clear_buffer: true,
                clear_presentation: true,
                force_heavy_reset: false,
            },
            Self::VisibilityChange => ResetOptions {
                finalize_active: true,
                clear_buffer: false,
                clear_presentation: false,
                force_heavy_reset: false,
            },
            Self::Abort => ResetOptions {
                finalize_active: false,
                clear_buffer: false,
                clear_presentation: false,
                force_heavy_reset: false,
            },
        }
    }
}

/// What a reset tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOptions {
    /// Finalize the active code block instead of defusing it.
    pub finalize_active: bool,
    /// Drop the stream text and fence state.
    pub clear_buffer: bool,
    /// Empty the presentation tree.
    pub clear_presentation: bool,
    /// Also drop caches and every scheduled task.
    pub force_heavy_reset: bool,
}

impl Default for ResetOptions {
    fn default() -> Self {
        ResetOrigin::NewStream.default_options()
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Chunks accepted.
    pub chunks: u64,
    /// Coalesced payloads ingested.
    pub payloads: u64,
    /// Chunks that found the queue saturated.
    pub saturated: u64,
    /// Snapshot renders patched into the tree.
    pub full_renders: u64,
    /// Plain-mode promotions.
    pub plain_renders: u64,
    /// Active code promotions.
    pub promotions: u64,
    /// Closed blocks given their final highlight (or neutral style).
    pub highlights: u64,
    /// Tasks that returned an error.
    pub failed_tasks: u64,
    /// Tree counters.
    pub tree: TreeCounters,
}

/// Pluggable collaborators.
pub struct Collaborators {
    /// Time source for budgets and cadence.
    pub clock: Rc<dyn Clock>,
    /// Input and viewport signals.
    pub host: Box<dyn HostProbe>,
    /// Markdown transpiler.
    pub transpiler: Box<dyn Transpiler>,
    /// Code highlighter.
    pub highlighter: Box<dyn SyntaxHighlighter>,
    /// Math typesetter.
    pub typesetter: Box<dyn MathTypesetter>,
    /// Telemetry destination.
    pub sink: Box<dyn TelemetrySink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            clock: Rc::new(SystemClock),
            host: Box::new(IdleHost),
            transpiler: Box::new(PulldownTranspiler::new()),
            highlighter: Box::new(EscapeHighlighter),
            typesetter: Box::new(PassthroughMath),
            sink: Box::new(TracingSink),
        }
    }
}

#[derive(Debug)]
struct Bridge {
    rx: ChunkReceiver,
    closed: bool,
}

/// Incremental renderer for one presentation surface.
pub struct StreamEngine {
    core: EngineCore,
    sched: Sched,
    bridge: Option<Bridge>,
}

impl fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEngine")
            .field("sched", &self.sched)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl StreamEngine {
    /// Create an engine with default collaborators.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    /// Create an engine from a TOML configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        Ok(Self::new(EngineConfig::from_toml_str(text)?))
    }

    /// Create an engine with the given collaborators.
    pub fn with_collaborators(config: EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            clock,
            host,
            transpiler,
            highlighter,
            typesetter,
            sink,
        } = collaborators;
        let sched = Scheduler::new(config.scheduler.clone(), Rc::clone(&clock));
        let renderer = SnapshotRenderer::new(transpiler, typesetter);
        Self {
            core: EngineCore::new(config, clock, host, highlighter, sink, renderer),
            sched,
            bridge: None,
        }
    }

    /// Accept a chunk. Non-text kinds are ignored; a chunk with no active
    /// stream begins one.
    pub fn on_chunk(&mut self, name: &str, text: &str, kind: ChunkKind) -> Backpressure {
        if kind != ChunkKind::TextDelta {
            tracing::trace!(name, ?kind, "ingest.skip");
            return Backpressure::None;
        }
        if !self.core.stream_active {
            self.begin_stream();
        }
        let verdict = self.core.enqueue(name, text);
        schedule_drain(&self.core, &mut self.sched);
        verdict
    }

    /// Start a stream, resetting any previous one on this surface.
    pub fn begin_stream(&mut self) {
        if self.core.stream_active || !self.core.buffer.is_empty() || !self.core.tree.is_empty() {
            self.reset_stream(ResetOrigin::NewStream, ResetOptions::default());
        }
        self.core.stream_active = true;
        tracing::debug!("stream.begin");
    }

    /// Finish the stream: drain all queued work synchronously, close any open
    /// fence, render with the final profile and queue a full highlight scan.
    pub fn end_stream(&mut self) {
        self.sched.run_until_idle(&mut self.core);
        self.core.drain_all(&mut self.sched);
        self.sched.run_until_idle(&mut self.core);
        self.core.finish(&mut self.sched);
        schedule_telemetry(&self.core, &mut self.sched);
    }

    /// Abandon or clear the stream. Safe to call repeatedly.
    pub fn reset_stream(&mut self, origin: ResetOrigin, options: ResetOptions) {
        self.sched.cancel_group(STREAM);
        if options.force_heavy_reset {
            self.sched.cancel_all();
        }
        self.core.reset(origin, options);
        schedule_telemetry(&self.core, &mut self.sched);
    }

    /// Run one budgeted tick.
    pub fn tick(&mut self) -> SliceReport {
        self.pull_bridge();
        self.core.poll_cadence(&mut self.sched);
        let report = self.sched.run_slice(&mut self.core);
        schedule_telemetry(&self.core, &mut self.sched);
        report
    }

    /// Run work now: a single tick, or with `force` everything pending.
    /// Returns the number of tasks run.
    pub fn kick(&mut self, force: bool) -> usize {
        if !force {
            return self.tick().ran;
        }
        self.pull_bridge();
        self.core.poll_cadence(&mut self.sched);
        let before = self.sched.stats().ran;
        self.sched.run_until_idle(&mut self.core);
        schedule_telemetry(&self.core, &mut self.sched);
        usize::try_from(self.sched.stats().ran - before).unwrap_or(usize::MAX)
    }

    /// Tick from `source` until idle, the source ends or `max_ticks` ticks
    /// have run. Returns the ticks run.
    pub fn pump(&mut self, source: &mut dyn TickSource, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks {
            self.pull_bridge();
            if self.is_idle() {
                break;
            }
            if source.next_tick().is_none() {
                break;
            }
            self.tick();
            ticks += 1;
        }
        ticks
    }

    /// Whether nothing is pending or waiting to be rendered.
    pub fn is_idle(&self) -> bool {
        !self.sched.has_pending()
            && self.core.queue.is_empty()
            && !self.core.has_unrendered()
            && self.bridge.as_ref().is_none_or(|bridge| bridge.closed)
    }

    /// Connect a cross-thread producer. Replaces any earlier bridge.
    pub fn attach_bridge(&mut self) -> ChunkSender {
        let (tx, rx) = bridge::channel();
        self.bridge = Some(Bridge { rx, closed: false });
        tx
    }

    fn pull_bridge(&mut self) {
        let Some(bridge) = self.bridge.as_mut() else { return };
        if bridge.closed {
            return;
        }
        let (messages, disconnected) = bridge.rx.drain();
        bridge.closed = disconnected;
        for message in messages {
            match message {
                StreamMessage::Chunk { name, text, kind } => {
                    self.on_chunk(&name, &text, kind);
                }
                StreamMessage::Begin => self.begin_stream(),
                StreamMessage::End => self.end_stream(),
                StreamMessage::Reset { origin, options } => self.reset_stream(origin, options),
            }
        }
    }

    /// Install a custom markup rule table. On error the old table stays.
    pub fn set_markup_rules(&mut self, rules: Vec<MarkupRule>) -> Result<(), MarkupError> {
        self.core.markup.set_rules(rules)?;
        self.core.fence.set_custom_fences(self.core.markup.custom_fences());
        self.core.plain.set_marker_tokens(self.core.markup.rules().marker_tokens());
        Ok(())
    }

    /// The host's visible range changed: highlight what is now in view first.
    pub fn viewport_changed(&mut self) {
        let Some(visible) = self.core.host.viewport() else { return };
        self.core.highlights.scan_viewport(&self.core.tree, visible);
        schedule_highlight(&self.core, &mut self.sched);
    }

    /// The live presentation tree.
    pub const fn tree(&self) -> &PresentationTree {
        &self.core.tree
    }

    /// Take the surface events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<SurfaceEvent> {
        self.core.outbox.drain()
    }

    /// Whether plain-append mode is on.
    pub const fn is_plain_mode(&self) -> bool {
        self.core.is_plain()
    }

    /// Where the code fence life cycle stands.
    pub const fn code_state(&self) -> CodeState {
        self.core.code_state
    }

    /// Whether a stream is in progress.
    pub const fn is_streaming(&self) -> bool {
        self.core.stream_active
    }

    /// Counters.
    pub fn stats(&self) -> EngineStats {
        let counters = self.core.counters;
        EngineStats {
            chunks: counters.chunks,
            payloads: counters.payloads,
            saturated: counters.saturated,
            full_renders: counters.full_renders,
            plain_renders: counters.plain_renders,
            promotions: counters.promotions,
            highlights: counters.highlights,
            failed_tasks: self.sched.stats().failed,
            tree: self.core.tree.counters(),
        }
    }
}
