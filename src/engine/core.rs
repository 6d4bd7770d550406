//! Engine core: the state every scheduled task runs against.
//!
//! Text flows `queue -> ingest -> buffer`, and at each fence event the
//! chunk is split so prose and code take their own paths:
//!
//! - prose: plain-mode tracker, then render cadence
//! - code with a bound [`ActiveCodeBlock`]: tail appends and promotions,
//!   no snapshots until the fence closes
//! - code in a nested or indented fence: snapshots on the code cadence

use super::{ResetOptions, ResetOrigin};
use crate::buffer::{FenceParser, FenceStep, StreamBuffer};
use crate::clock::Clock;
use crate::code::{defuse_node, ActiveCodeBlock, CodeState, HighlightQueue, SyntaxHighlighter};
use crate::config::EngineConfig;
use crate::error::{RenderError, TaskError};
use crate::host::{EventOutbox, HostProbe, SurfaceEvent};
use crate::ingest::{Backpressure, IngestQueue};
use crate::markup::MarkupEngine;
use crate::render::{
    has_boundary, safe_boundary, Cadence, CadenceProfile, PlainTracker, PlainTransition,
    RenderProfile, SnapshotRenderer,
};
use crate::sched::{Priority, Scheduler, TaskGroup, TaskKey};
use crate::telemetry::{TelemetryLog, TelemetrySink};
use crate::tree::{patch, Node, NodeFlags, NodeId, NodeKind, PlainData, PresentationTree};
use std::rc::Rc;

pub(crate) type Sched = Scheduler<EngineCore>;

pub(crate) const DRAIN: TaskKey = "ingest.drain";
pub(crate) const RENDER: TaskKey = "render";
pub(crate) const PROMOTE: TaskKey = "code.promote";
pub(crate) const HIGHLIGHT_FLUSH: TaskKey = "highlight.flush";
pub(crate) const HIGHLIGHT_SCAN: TaskKey = "highlight.scan";
pub(crate) const TELEMETRY_FLUSH: TaskKey = "telemetry.flush";

/// Work tied to the current stream; cancelled on reset.
pub(crate) const STREAM: TaskGroup = "stream";
pub(crate) const HIGHLIGHT: TaskGroup = "highlight";

const OUTBOX_CAPACITY: usize = 256;

/// Engine-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub(crate) chunks: u64,
    pub(crate) payloads: u64,
    pub(crate) saturated: u64,
    pub(crate) full_renders: u64,
    pub(crate) plain_renders: u64,
    pub(crate) promotions: u64,
    pub(crate) highlights: u64,
}

/// The host span plain-mode text is appended to.
#[derive(Debug, Clone, Copy)]
struct PlainSpan {
    node: NodeId,
    /// Buffer offset up to which text has been handed to the span.
    consumed: usize,
}

/// Everything a task may touch.
pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) host: Box<dyn HostProbe>,
    pub(crate) highlighter: Box<dyn SyntaxHighlighter>,
    pub(crate) sink: Box<dyn TelemetrySink>,
    pub(crate) renderer: SnapshotRenderer,
    pub(crate) queue: IngestQueue,
    pub(crate) buffer: StreamBuffer,
    pub(crate) fence: FenceParser,
    pub(crate) cadence: Cadence,
    pub(crate) plain: PlainTracker,
    plain_span: Option<PlainSpan>,
    pub(crate) active: Option<ActiveCodeBlock>,
    pub(crate) code_state: CodeState,
    pub(crate) highlights: HighlightQueue,
    pub(crate) markup: MarkupEngine,
    pub(crate) tree: PresentationTree,
    pub(crate) outbox: EventOutbox,
    pub(crate) telemetry: TelemetryLog,
    pub(crate) counters: Counters,
    pub(crate) stream_active: bool,
    at_line_start: bool,
}

impl EngineCore {
    pub(crate) fn new(
        config: EngineConfig,
        clock: Rc<dyn Clock>,
        host: Box<dyn HostProbe>,
        highlighter: Box<dyn SyntaxHighlighter>,
        sink: Box<dyn TelemetrySink>,
        renderer: SnapshotRenderer,
    ) -> Self {
        Self {
            queue: IngestQueue::new(config.queue.clone()),
            buffer: StreamBuffer::new(config.buffer.materialize_threshold),
            fence: FenceParser::new(config.buffer.fence_tail_len),
            cadence: Cadence::new(config.cadence.clone()),
            plain: PlainTracker::new(config.plain.clone()),
            plain_span: None,
            active: None,
            code_state: CodeState::Closed,
            highlights: HighlightQueue::new(config.highlight.clone()),
            markup: MarkupEngine::default(),
            tree: PresentationTree::new(),
            outbox: EventOutbox::new(OUTBOX_CAPACITY),
            telemetry: TelemetryLog::new(config.telemetry.clone()),
            counters: Counters::default(),
            stream_active: false,
            at_line_start: true,
            config,
            clock,
            host,
            highlighter,
            sink,
            renderer,
        }
    }

    pub(crate) const fn is_plain(&self) -> bool {
        self.plain_span.is_some()
    }

    /// Log a line to the host-visible telemetry channel.
    pub(crate) fn note(&mut self, line: impl Into<String>) {
        let now = self.clock.now();
        self.telemetry.record(now, line);
    }

    /// Whether buffered text is waiting for a snapshot.
    pub(crate) fn has_unrendered(&self) -> bool {
        self.active.is_none()
            && self.plain_span.is_none()
            && self.buffer.len() > self.cadence.rendered_len()
    }

    // ---- ingestion ----------------------------------------------------

    /// Queue a chunk. Returns the queue's backpressure verdict.
    pub(crate) fn enqueue(&mut self, name: &str, text: &str) -> Backpressure {
        self.counters.chunks += 1;
        let verdict = self.queue.enqueue(name, text);
        if verdict == Backpressure::Saturated {
            self.counters.saturated += 1;
            let bytes = self.queue.bytes();
            tracing::warn!(bytes, "ingest.saturated");
            self.note(format!("ingest saturated at {bytes} bytes"));
        }
        verdict
    }

    /// Feed everything still queued, synchronously.
    pub(crate) fn drain_all(&mut self, sched: &mut Sched) {
        while let Some(payload) = self.queue.pop_payload() {
            self.counters.payloads += 1;
            self.ingest(&payload.text, sched);
        }
    }

    /// Split `text` at fence events and route each piece.
    pub(crate) fn ingest(&mut self, text: &str, sched: &mut Sched) {
        let mut rest = text;
        while !rest.is_empty() {
            let in_code = self.fence.is_open();
            match self.fence.feed(rest, self.buffer.len()) {
                FenceStep::Continue => {
                    self.absorb(rest, in_code, sched);
                    break;
                }
                FenceStep::Opened { split, custom, .. } => {
                    let (head, tail) = rest.split_at(split);
                    self.absorb(head, false, sched);
                    self.on_fence_open(custom, sched);
                    rest = tail;
                }
                FenceStep::Closed { split, line_start } => {
                    let (head, tail) = rest.split_at(split);
                    self.absorb(head, true, sched);
                    self.close_active(line_start, sched);
                    self.render_now(sched);
                    rest = tail;
                }
            }
        }
    }

    fn absorb(&mut self, text: &str, code: bool, sched: &mut Sched) {
        if text.is_empty() {
            return;
        }
        if code {
            self.absorb_code(text, sched);
        } else {
            self.absorb_prose(text, sched);
        }
    }

    fn absorb_prose(&mut self, text: &str, sched: &mut Sched) {
        let base = self.buffer.len();
        self.buffer.append(text);
        let boundary = has_boundary(text, self.at_line_start);
        self.at_line_start = text.ends_with('\n');

        match self.plain.observe(text, base) {
            Some(PlainTransition::Activated { origin }) => self.enter_plain(origin, sched),
            Some(PlainTransition::Deactivated) => self.leave_plain(sched),
            None => {}
        }
        if self.plain_span.is_some() {
            self.append_plain(sched);
            return;
        }

        let now = self.clock.now();
        let due = self
            .cadence
            .on_chunk(CadenceProfile::Prose, self.buffer.len(), boundary, now);
        if let Some(trigger) = due {
            tracing::trace!(?trigger, "render.due");
            schedule_render(sched);
        }
    }

    fn absorb_code(&mut self, text: &str, sched: &mut Sched) {
        self.buffer.append(text);
        self.at_line_start = text.ends_with('\n');

        if let Some(active) = self.active.as_mut() {
            if active.append(&mut self.tree, text) && !sched.is_scheduled(PROMOTE) {
                sched.schedule(PROMOTE, Some(STREAM), Priority::High, promote_task);
            }
            self.outbox.push(SurfaceEvent::CodeUpdated(active.node()));
            return;
        }

        let now = self.clock.now();
        if self
            .cadence
            .on_chunk(CadenceProfile::Code, self.buffer.len(), false, now)
            .is_some()
        {
            schedule_render(sched);
        }
    }

    // ---- code fences --------------------------------------------------

    fn on_fence_open(&mut self, custom: Option<usize>, sched: &mut Sched) {
        self.plain.interrupt();
        self.plain_span = None;
        self.code_state = CodeState::Open;
        sched.cancel(RENDER);

        let code_start = self.buffer.len();
        let top_level = self.opener_is_top_level(code_start, custom);
        self.render_now(sched);
        if !top_level {
            tracing::trace!(code_start, "code.nested");
            return;
        }

        let node = self
            .tree
            .blocks()
            .last()
            .filter(|block| block.code().is_some() && block.flags.contains(NodeFlags::OPEN_FENCE))
            .map(|block| block.id);
        // An indented opener may still sit inside a list item.
        let Some(node) = node else {
            tracing::trace!(code_start, "code.nested");
            return;
        };
        let source = self.buffer.delta_since(code_start);
        let config = self.config.code.clone();
        let bound = ActiveCodeBlock::bind(&mut self.tree, node, code_start, &source, config);
        if let Some(active) = bound {
            self.active = Some(active);
            self.code_state = CodeState::Active;
            self.outbox.push(SurfaceEvent::ScrollFollow(node));
        }
    }

    /// Whether the opener line just appended starts within three spaces of
    /// column 0, outside any quote or list marker.
    fn opener_is_top_level(&mut self, code_start: usize, custom: Option<usize>) -> bool {
        let text = self.buffer.prefix(code_start);
        let body = text.strip_suffix('\n').unwrap_or(text);
        let line = &body[body.rfind('\n').map_or(0, |i| i + 1)..];
        let indent = line.bytes().take(3).take_while(|&b| b == b' ').count();
        let line = &line[indent..];
        match custom {
            Some(index) => self
                .markup
                .custom_fences()
                .get(index)
                .is_some_and(|fence| line.starts_with(fence.open.as_str())),
            None => line.starts_with(['`', '~']),
        }
    }

    /// Finish the bound block at a fence close whose line starts at `line_start`.
    fn close_active(&mut self, line_start: usize, sched: &mut Sched) {
        sched.cancel(PROMOTE);
        if let Some(mut active) = self.active.take() {
            let node = active.node();
            active.truncate(&mut self.tree, line_start.saturating_sub(active.code_start()));
            active.finalize(&mut self.tree, self.highlighter.as_ref());
            self.outbox.push(SurfaceEvent::CodeUpdated(node));
        }
        self.code_state = CodeState::Closed;
        self.cadence.reset_step(CadenceProfile::Code);
        self.cadence.reset_step(CadenceProfile::Prose);
    }

    // ---- plain mode ---------------------------------------------------

    fn enter_plain(&mut self, origin: usize, sched: &mut Sched) {
        sched.cancel(RENDER);
        if let Err(err) = self.render(Some(origin), RenderProfile::Streaming) {
            tracing::warn!(error = %err, "plain.prefix_failed");
        }
        let node = self
            .tree
            .push_block(Node::new(NodeKind::PlainStream(PlainData::default())));
        self.plain_span = Some(PlainSpan { node, consumed: origin });
        self.cadence.rendered(CadenceProfile::Prose, origin, self.clock.now());
        schedule_highlight(self, sched);
        self.note(format!("plain mode on at {origin}"));
    }

    fn leave_plain(&mut self, sched: &mut Sched) {
        if self.plain_span.take().is_some() {
            self.render_now(sched);
        }
    }

    fn append_plain(&mut self, sched: &mut Sched) {
        let Some(span) = self.plain_span.as_mut() else { return };
        let delta = self.buffer.delta_since(span.consumed);
        span.consumed = self.buffer.len();
        let node = span.node;

        let promote_chars = self.config.plain.promote_chars;
        let mut promoted = None;
        let present = self.tree.touch(node, |n| {
            let NodeKind::PlainStream(plain) = &mut n.kind else { return };
            plain.tail.push_str(&delta);
            if plain.tail.len() >= promote_chars {
                let cut = safe_boundary(&plain.tail);
                if cut > 0 {
                    promoted = Some(plain.tail.drain(..cut).collect::<String>());
                }
            }
        });
        if !present {
            self.plain_span = None;
            self.plain.reset();
            self.render_now(sched);
            return;
        }

        if let Some(text) = promoted {
            let inline = self.renderer.render_inline(&text);
            let markup = &self.markup;
            self.tree
                .update(node, |n| markup.extend_streaming(&mut n.children, inline));
            self.counters.plain_renders += 1;
            tracing::trace!(bytes = text.len(), "plain.promote");
        }
        self.outbox.push(SurfaceEvent::CodeUpdated(node));
    }

    // ---- rendering ----------------------------------------------------

    const fn cadence_profile(&self) -> CadenceProfile {
        if self.fence.is_open() {
            CadenceProfile::Code
        } else {
            CadenceProfile::Prose
        }
    }

    /// Snapshot the buffer (or its first `end` bytes) and patch it in.
    fn render(&mut self, end: Option<usize>, profile: RenderProfile) -> Result<(), TaskError> {
        let streaming = profile == RenderProfile::Streaming;
        let fence_open =
            streaming && end.is_none() && (self.fence.is_open() || self.fence.partial_line_opens());
        let source = match end {
            Some(end) => self.buffer.prefix(end),
            None => self.buffer.text(),
        };
        let prepared = self.markup.preprocess(source);
        let snapshot = self.renderer.render(&prepared, profile, fence_open);
        let mut blocks = snapshot.blocks;
        self.markup.apply(&mut blocks, streaming);

        let stats = patch(&mut self.tree, blocks, self.config.patch.lookahead);
        self.counters.full_renders += 1;
        tracing::debug!(
            kept = stats.kept_prefix + stats.kept_suffix,
            removed = stats.removed,
            inserted = stats.inserted,
            morphed = stats.morphed,
            reused_code = stats.reused_code,
            "render.patch"
        );

        if stats.changed() {
            self.outbox.push(SurfaceEvent::Patched {
                start: stats.start,
                removed: stats.removed,
                inserted: stats.inserted,
            });
        }
        for id in &stats.new_code {
            self.highlights.enqueue(*id);
        }
        if let Some(visible) = self.host.viewport() {
            self.highlights.scan_viewport(&self.tree, visible);
        }
        self.check_active_attached();
        if let Some(last) = self.tree.blocks().last() {
            if !last.flags.contains(NodeFlags::NO_SCROLL_FOLLOW) {
                self.outbox.push(SurfaceEvent::ScrollFollow(last.id));
            }
        }

        if snapshot.fell_back {
            self.note("render fell back to escaped text");
            return Err(RenderError::Transpile("snapshot fell back to escaped text".into()).into());
        }
        Ok(())
    }

    fn check_active_attached(&mut self) {
        let detached = self
            .active
            .as_ref()
            .is_some_and(|active| self.tree.find(active.node()).is_none());
        if detached {
            self.active = None;
            self.code_state = CodeState::Defused;
            tracing::warn!("code.detached");
        }
    }

    /// Streaming render of the whole buffer, advancing the cadence.
    fn render_streaming(&mut self, sched: &mut Sched) -> Result<(), TaskError> {
        let profile = self.cadence_profile();
        let result = self.render(None, RenderProfile::Streaming);
        self.cadence.rendered(profile, self.buffer.len(), self.clock.now());
        schedule_highlight(self, sched);
        result
    }

    /// Like [`EngineCore::render_streaming`], outside a task: failures are logged.
    fn render_now(&mut self, sched: &mut Sched) {
        sched.cancel(RENDER);
        if let Err(err) = self.render_streaming(sched) {
            tracing::warn!(error = %err, "render.failed");
        }
    }

    /// Schedule a render if the cadence says one is due without new input.
    pub(crate) fn poll_cadence(&self, sched: &mut Sched) {
        if self.active.is_some() || self.plain_span.is_some() || sched.is_scheduled(RENDER) {
            return;
        }
        let now = self.clock.now();
        if let Some(trigger) = self.cadence.due(self.cadence_profile(), self.buffer.len(), now) {
            tracing::trace!(?trigger, "render.poll");
            schedule_render(sched);
        }
    }

    // ---- lifecycle ----------------------------------------------------

    /// End of stream: close whatever is open and render with the final profile.
    pub(crate) fn finish(&mut self, sched: &mut Sched) {
        if let FenceStep::Closed { line_start, .. } = self.fence.finish() {
            self.close_active(line_start, sched);
        }
        sched.cancel(PROMOTE);
        sched.cancel(RENDER);
        if let Some(active) = self.active.take() {
            let node = active.node();
            active.finalize(&mut self.tree, self.highlighter.as_ref());
            self.outbox.push(SurfaceEvent::CodeUpdated(node));
        }
        self.code_state = CodeState::Closed;
        self.plain.reset();
        self.plain_span = None;

        if let Err(err) = self.render(None, RenderProfile::Final) {
            tracing::warn!(error = %err, "render.final_failed");
        }
        self.cadence.rendered(CadenceProfile::Prose, self.buffer.len(), self.clock.now());

        self.highlights.begin_full_scan();
        if !sched.is_scheduled(HIGHLIGHT_SCAN) {
            sched.schedule(HIGHLIGHT_SCAN, Some(HIGHLIGHT), Priority::Idle, scan_task);
        }
        self.stream_active = false;
        let (bytes, blocks) = (self.buffer.len(), self.tree.len());
        tracing::debug!(bytes, blocks, "stream.end");
        self.note(format!("stream end: {bytes} bytes, {blocks} blocks"));
    }

    /// Tear down stream state according to `options`.
    pub(crate) fn reset(&mut self, origin: ResetOrigin, options: ResetOptions) {
        let mut abandoned = false;
        if let Some(active) = self.active.take() {
            if options.finalize_active {
                active.finalize(&mut self.tree, self.highlighter.as_ref());
            } else {
                active.defuse(&mut self.tree);
                abandoned = true;
            }
        }
        // Blocks left flagged by an interrupted bind or a lost handle.
        for id in self.tree.ids_with_flags(NodeFlags::ACTIVE_CODE) {
            self.tree.update(id, defuse_node);
            abandoned = true;
        }
        self.code_state = if abandoned { CodeState::Defused } else { CodeState::Closed };

        let dropped = self.queue.clear();
        self.plain.reset();
        self.plain_span = None;
        self.cadence.reset();
        if options.clear_buffer {
            self.buffer.reset();
            self.fence.reset();
            self.at_line_start = true;
        }
        if options.clear_presentation {
            self.tree.clear();
            self.highlights.clear();
            self.outbox.clear();
            self.outbox.push(SurfaceEvent::Cleared);
        }
        if options.force_heavy_reset {
            self.renderer.clear_caches();
            self.markup.clear_memo();
            self.highlights.clear();
        }
        self.stream_active = false;
        tracing::debug!(?origin, dropped, abandoned, "stream.reset");
        self.note(format!("reset {origin:?}: dropped {dropped} queued chunks"));
    }
}

fn schedule_render(sched: &mut Sched) {
    if !sched.is_scheduled(RENDER) {
        sched.schedule(RENDER, Some(STREAM), Priority::Normal, render_task);
    }
}

/// Schedule the ingest drain; a saturated queue drains ahead of renders.
pub(crate) fn schedule_drain(core: &EngineCore, sched: &mut Sched) {
    let priority = if core.queue.is_saturated() {
        Priority::High
    } else {
        Priority::Low
    };
    if sched.priority_of(DRAIN).is_some_and(|pending| pending <= priority) {
        return;
    }
    sched.schedule(DRAIN, Some(STREAM), priority, drain_task);
}

pub(crate) fn schedule_highlight(core: &EngineCore, sched: &mut Sched) {
    if !core.highlights.is_empty() && !sched.is_scheduled(HIGHLIGHT_FLUSH) {
        sched.schedule(HIGHLIGHT_FLUSH, Some(HIGHLIGHT), Priority::Idle, flush_task);
    }
}

pub(crate) fn schedule_telemetry(core: &EngineCore, sched: &mut Sched) {
    if core.telemetry.has_pending() && !sched.is_scheduled(TELEMETRY_FLUSH) {
        sched.schedule(TELEMETRY_FLUSH, None, Priority::Idle, telemetry_task);
    }
}

// ---- tasks ------------------------------------------------------------

fn drain_task(core: &mut EngineCore, sched: &mut Sched) -> Result<(), TaskError> {
    let budget = core.queue.drain_budget();
    let deadline = core.clock.now() + core.config.queue.drain_time();
    for _ in 0..budget {
        let Some(payload) = core.queue.pop_payload() else { break };
        core.counters.payloads += 1;
        core.ingest(&payload.text, sched);
        if core.clock.now() >= deadline || core.host.input_pending() {
            break;
        }
    }
    if !core.queue.is_empty() {
        tracing::trace!(remaining = core.queue.len(), "ingest.more");
        schedule_drain(core, sched);
    }
    Ok(())
}

fn render_task(core: &mut EngineCore, sched: &mut Sched) -> Result<(), TaskError> {
    if core.active.is_some() || core.plain_span.is_some() {
        return Ok(());
    }
    core.render_streaming(sched)
}

fn promote_task(core: &mut EngineCore, _sched: &mut Sched) -> Result<(), TaskError> {
    let Some(active) = core.active.as_mut() else {
        return Ok(());
    };
    let node = active.node();
    if core.tree.find(node).is_none() {
        core.active = None;
        core.code_state = CodeState::Defused;
        return Err(TaskError::Detached(node));
    }
    let promotion = active.promote(&mut core.tree, core.highlighter.as_ref(), core.clock.now());
    if promotion.bytes > 0 {
        core.counters.promotions += 1;
        core.outbox.push(SurfaceEvent::CodeUpdated(node));
    }
    Ok(())
}

fn flush_task(core: &mut EngineCore, sched: &mut Sched) -> Result<(), TaskError> {
    let report = core.highlights.flush(
        &mut core.tree,
        core.highlighter.as_ref(),
        core.host.as_ref(),
        &mut core.outbox,
    );
    core.counters.highlights += (report.highlighted + report.neutral) as u64;
    if report.remaining > 0 {
        schedule_highlight(core, sched);
    }
    Ok(())
}

fn scan_task(core: &mut EngineCore, sched: &mut Sched) -> Result<(), TaskError> {
    if core.highlights.scan_slice(&core.tree) {
        sched.schedule(HIGHLIGHT_SCAN, Some(HIGHLIGHT), Priority::Idle, scan_task);
    }
    schedule_highlight(core, sched);
    Ok(())
}

fn telemetry_task(core: &mut EngineCore, sched: &mut Sched) -> Result<(), TaskError> {
    core.telemetry.flush(core.sink.as_mut());
    schedule_telemetry(core, sched);
    Ok(())
}
