//! The boundary between the engine and its host surface.
//!
//! The host reports whether user input is waiting and which part of the
//! document is visible; the engine reports what it changed.

use crate::tree::NodeId;
use std::cell::Cell;
use std::collections::VecDeque;
use std::ops::Range;
use std::rc::Rc;

/// Signals the host exposes to cooperative tasks.
pub trait HostProbe {
    /// Whether user input is waiting; long tasks yield when this is true.
    fn input_pending(&self) -> bool {
        false
    }

    /// Visible top-level block indices, if the host knows them.
    fn viewport(&self) -> Option<Range<usize>> {
        None
    }
}

/// A host with no input and no viewport information.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleHost;

impl HostProbe for IdleHost {}

/// A host whose signals are set by hand.
///
/// Clones share state, so the host side can keep a handle.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHost {
    input: Rc<Cell<bool>>,
    viewport: Rc<Cell<Option<(usize, usize)>>>,
}

impl ScriptedHost {
    /// Create a host with no pending input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending-input signal.
    pub fn set_input_pending(&self, pending: bool) {
        self.input.set(pending);
    }

    /// Set the visible block range.
    pub fn set_viewport(&self, range: Option<Range<usize>>) {
        self.viewport.set(range.map(|r| (r.start, r.end)));
    }
}

impl HostProbe for ScriptedHost {
    fn input_pending(&self) -> bool {
        self.input.get()
    }

    fn viewport(&self) -> Option<Range<usize>> {
        self.viewport.get().map(|(start, end)| start..end)
    }
}

/// A change to the live tree the host should reflect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Top-level blocks `start..start + removed` were replaced by `inserted` blocks.
    Patched {
        /// First replaced top-level index.
        start: usize,
        /// Blocks removed.
        removed: usize,
        /// Blocks inserted.
        inserted: usize,
    },
    /// A code node's frozen or tail zone changed.
    CodeUpdated(NodeId),
    /// The host should keep this node in view.
    ScrollFollow(NodeId),
    /// The tree was emptied.
    Cleared,
    /// Earlier events were dropped on overflow; re-read the whole tree.
    Resync,
}

/// Bounded outbox of surface events.
#[derive(Debug)]
pub(crate) struct EventOutbox {
    events: VecDeque<SurfaceEvent>,
    capacity: usize,
}

impl EventOutbox {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(2),
        }
    }

    /// Queue an event; consecutive duplicates collapse. On overflow the
    /// backlog is replaced by a single [`SurfaceEvent::Resync`].
    pub(crate) fn push(&mut self, event: SurfaceEvent) {
        if self.events.back() == Some(&event) {
            return;
        }
        if self.events.len() >= self.capacity {
            let dropped = self.events.len();
            self.events.clear();
            self.events.push_back(SurfaceEvent::Resync);
            tracing::debug!(dropped, "outbox.resync");
        }
        self.events.push_back(event);
    }

    pub(crate) fn drain(&mut self) -> Vec<SurfaceEvent> {
        self.events.drain(..).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_coalesces_duplicates() {
        let mut outbox = EventOutbox::new(4);
        outbox.push(SurfaceEvent::Cleared);
        outbox.push(SurfaceEvent::Cleared);
        outbox.push(SurfaceEvent::ScrollFollow(NodeId::new(1)));
        assert_eq!(
            outbox.drain(),
            vec![SurfaceEvent::Cleared, SurfaceEvent::ScrollFollow(NodeId::new(1))]
        );
        assert!(outbox.drain().is_empty());
    }

    #[test]
    fn test_outbox_overflow_leaves_one_resync() {
        let mut outbox = EventOutbox::new(3);
        for id in 1..=10 {
            outbox.push(SurfaceEvent::CodeUpdated(NodeId::new(id)));
        }
        let events = outbox.drain();
        assert!(events.len() <= 3);
        assert_eq!(events[0], SurfaceEvent::Resync);
        assert_eq!(events.iter().filter(|e| **e == SurfaceEvent::Resync).count(), 1);
        assert_eq!(events.last(), Some(&SurfaceEvent::CodeUpdated(NodeId::new(10))));
    }

    #[test]
    fn test_scripted_host_shared() {
        let host = ScriptedHost::new();
        let probe = host.clone();
        host.set_input_pending(true);
        host.set_viewport(Some(2..5));
        assert!(probe.input_pending());
        assert_eq!(probe.viewport(), Some(2..5));
    }
}
