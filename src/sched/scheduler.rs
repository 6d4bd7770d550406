//! Frame-paced cooperative task pump.
//!
//! Each key holds at most one pending task. A tick snapshots the pending
//! set, runs tasks until the count or time budget is spent, and puts the
//! remainder back in front of whatever was scheduled during the tick.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::TaskError;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Identifies a task slot. Scheduling the same key again replaces the task.
pub type TaskKey = &'static str;

/// Names a set of tasks that can be cancelled together.
pub type TaskGroup = &'static str;

/// Boxed task body. Tasks may schedule further work through the scheduler
/// they are handed.
pub type TaskFn<C> = Box<dyn FnOnce(&mut C, &mut Scheduler<C>) -> Result<(), TaskError>>;

/// Task priority; lower variants run first once the pending set is sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Teardown and correctness-critical work.
    Critical,
    /// Work the user is watching (active code promotion).
    High,
    /// Renders.
    Normal,
    /// Ingestion drains.
    Low,
    /// Highlighting, scans, telemetry.
    Idle,
}

struct PendingTask<C> {
    run: TaskFn<C>,
    group: Option<TaskGroup>,
    priority: Priority,
    seq: u64,
}

/// Outcome of one slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Tasks executed.
    pub ran: usize,
    /// Tasks that returned an error.
    pub failed: usize,
    /// Tasks put back because the budget ran out.
    pub deferred: usize,
    /// Tasks pending after the slice.
    pub remaining: usize,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Slices run.
    pub slices: u64,
    /// Tasks executed.
    pub ran: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Tasks replaced by a re-registration before running.
    pub replaced: u64,
}

/// Single-threaded task pump over a context `C`.
pub struct Scheduler<C> {
    pending: IndexMap<TaskKey, PendingTask<C>>,
    seq: u64,
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,
    /// Keys and groups cancelled while a slice is running; consulted for the
    /// snapshot taken at slice start.
    cancelled_keys: FxHashSet<TaskKey>,
    cancelled_groups: FxHashSet<TaskGroup>,
    cancelled_all: bool,
    running: bool,
    stats: SchedulerStats,
}

impl<C> fmt::Debug for Scheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("running", &self.running)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<C> Scheduler<C> {
    /// Create a scheduler with the given budgets and time source.
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            pending: IndexMap::new(),
            seq: 0,
            config,
            clock,
            cancelled_keys: FxHashSet::default(),
            cancelled_groups: FxHashSet::default(),
            cancelled_all: false,
            running: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Register `task` under `key`, replacing any pending task with that key.
    ///
    /// The replacement takes the new group and moves to the back of the
    /// insertion order.
    pub fn schedule<F>(
        &mut self,
        key: TaskKey,
        group: Option<TaskGroup>,
        priority: Priority,
        task: F,
    ) where
        F: FnOnce(&mut C, &mut Self) -> Result<(), TaskError> + 'static,
    {
        self.seq += 1;
        if self.pending.shift_remove(key).is_some() {
            self.stats.replaced += 1;
        }
        self.pending.insert(
            key,
            PendingTask {
                run: Box::new(task),
                group,
                priority,
                seq: self.seq,
            },
        );
        tracing::trace!(key, ?priority, "sched.schedule");
    }

    /// Remove the pending task for `key`.
    pub fn cancel(&mut self, key: TaskKey) -> bool {
        if self.running {
            self.cancelled_keys.insert(key);
        }
        self.pending.shift_remove(key).is_some()
    }

    /// Remove every pending task in `group`.
    pub fn cancel_group(&mut self, group: TaskGroup) -> usize {
        if self.running {
            self.cancelled_groups.insert(group);
        }
        let before = self.pending.len();
        self.pending.retain(|_, task| task.group != Some(group));
        before - self.pending.len()
    }

    /// Drop all pending work.
    pub fn cancel_all(&mut self) {
        if self.running {
            self.cancelled_all = true;
        }
        self.pending.clear();
    }

    /// Whether `key` has a pending task.
    pub fn is_scheduled(&self, key: TaskKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Priority of the pending task for `key`.
    pub fn priority_of(&self, key: TaskKey) -> Option<Priority> {
        self.pending.get(key).map(|task| task.priority)
    }

    /// Number of pending tasks.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether any work is pending.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Lifetime counters.
    pub const fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Run one budgeted slice.
    pub fn run_slice(&mut self, ctx: &mut C) -> SliceReport {
        let max_tasks = self.config.max_tasks_per_tick;
        let budget = self.config.tick_budget();
        self.run_with_limits(ctx, max_tasks, Some(budget))
    }

    /// Run slices without budgets until nothing is pending or `max_rounds`
    /// slices have run. Used for teardown and end-of-stream flushes.
    pub fn run_until_idle(&mut self, ctx: &mut C) -> usize {
        let mut rounds = 0;
        while self.has_pending() && rounds < self.config.max_forced_rounds {
            self.run_with_limits(ctx, usize::MAX, None);
            rounds += 1;
        }
        if self.has_pending() {
            tracing::warn!(rounds, pending = self.pending.len(), "sched.forced_drain_incomplete");
        }
        rounds
    }

    fn run_with_limits(
        &mut self,
        ctx: &mut C,
        max_tasks: usize,
        budget: Option<Duration>,
    ) -> SliceReport {
        let start = self.clock.now();
        let mut batch: Vec<(TaskKey, PendingTask<C>)> = self.pending.drain(..).collect();
        if batch.len() > self.config.sort_threshold {
            batch.sort_by_key(|(_, task)| (task.priority, task.seq));
        }

        self.running = true;
        let mut report = SliceReport::default();
        let mut rest = batch.into_iter();

        for (key, task) in rest.by_ref() {
            if self.is_stale(key, &task) {
                continue;
            }
            report.ran += 1;
            if let Err(err) = (task.run)(ctx, self) {
                report.failed += 1;
                tracing::warn!(key, error = %err, "sched.task_failed");
            }
            let over_count = report.ran >= max_tasks;
            let over_time = budget.is_some_and(|b| self.clock.now().duration_since(start) >= b);
            if over_count || over_time {
                break;
            }
        }

        // Requeue what did not run, ahead of tasks scheduled during the slice.
        let scheduled_during = std::mem::take(&mut self.pending);
        for (key, task) in rest {
            if self.is_stale_against(key, &task, &scheduled_during) {
                continue;
            }
            report.deferred += 1;
            self.pending.insert(key, task);
        }
        for (key, task) in scheduled_during {
            self.pending.shift_remove(key);
            self.pending.insert(key, task);
        }

        self.running = false;
        self.cancelled_keys.clear();
        self.cancelled_groups.clear();
        self.cancelled_all = false;

        report.remaining = self.pending.len();
        self.stats.slices += 1;
        self.stats.ran += report.ran as u64;
        self.stats.failed += report.failed as u64;
        report
    }

    fn is_stale(&self, key: TaskKey, task: &PendingTask<C>) -> bool {
        self.is_stale_against(key, task, &self.pending)
    }

    /// A snapshot task is stale if it was cancelled mid-slice or a newer
    /// registration for its key exists.
    fn is_stale_against(
        &self,
        key: TaskKey,
        task: &PendingTask<C>,
        pending: &IndexMap<TaskKey, PendingTask<C>>,
    ) -> bool {
        self.cancelled_all
            || self.cancelled_keys.contains(key)
            || task.group.is_some_and(|g| self.cancelled_groups.contains(g))
            || pending.get(key).is_some_and(|newer| newer.seq > task.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::RenderError;

    fn scheduler(max_tasks: usize) -> (Scheduler<Vec<&'static str>>, ManualClock) {
        let clock = ManualClock::new();
        let config = SchedulerConfig {
            max_tasks_per_tick: max_tasks,
            ..SchedulerConfig::default()
        };
        (Scheduler::new(config, Rc::new(clock.clone())), clock)
    }

    #[test]
    fn test_reschedule_replaces() {
        let (mut sched, _) = scheduler(32);
        sched.schedule("a", None, Priority::Normal, |log: &mut Vec<_>, _| {
            log.push("first");
            Ok(())
        });
        sched.schedule("a", None, Priority::Normal, |log: &mut Vec<_>, _| {
            log.push("second");
            Ok(())
        });
        let mut log = Vec::new();
        let report = sched.run_slice(&mut log);
        assert_eq!(log, vec!["second"]);
        assert_eq!(report.ran, 1);
        assert_eq!(sched.stats().replaced, 1);
    }

    #[test]
    fn test_priority_sort_above_threshold() {
        let (mut sched, _) = scheduler(32);
        let keys: [(TaskKey, Priority); 6] = [
            ("idle", Priority::Idle),
            ("low", Priority::Low),
            ("normal", Priority::Normal),
            ("high", Priority::High),
            ("critical", Priority::Critical),
            ("normal2", Priority::Normal),
        ];
        for (key, priority) in keys {
            sched.schedule(key, None, priority, move |log: &mut Vec<_>, _| {
                log.push(key);
                Ok(())
            });
        }
        let mut log = Vec::new();
        sched.run_slice(&mut log);
        assert_eq!(log, vec!["critical", "high", "normal", "normal2", "low", "idle"]);
    }

    #[test]
    fn test_insertion_order_below_threshold() {
        let (mut sched, _) = scheduler(32);
        sched.schedule("idle", None, Priority::Idle, |log: &mut Vec<_>, _| {
            log.push("idle");
            Ok(())
        });
        sched.schedule("high", None, Priority::High, |log: &mut Vec<_>, _| {
            log.push("high");
            Ok(())
        });
        let mut log = Vec::new();
        sched.run_slice(&mut log);
        assert_eq!(log, vec!["idle", "high"]);
    }

    #[test]
    fn test_count_budget_requeues_remainder() {
        let (mut sched, _) = scheduler(2);
        for key in ["a", "b", "c"] {
            sched.schedule(key, None, Priority::Normal, move |log: &mut Vec<_>, _| {
                log.push(key);
                Ok(())
            });
        }
        let mut log = Vec::new();
        let report = sched.run_slice(&mut log);
        assert_eq!(report.ran, 2);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.remaining, 1);
        sched.run_slice(&mut log);
        assert_eq!(log, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_time_budget_yields() {
        let (mut sched, clock) = scheduler(32);
        for key in ["a", "b"] {
            let clock = clock.clone();
            sched.schedule(key, None, Priority::Normal, move |log: &mut Vec<_>, _| {
                log.push(key);
                clock.advance(Duration::from_millis(50));
                Ok(())
            });
        }
        let mut log = Vec::new();
        let report = sched.run_slice(&mut log);
        assert_eq!(log, vec!["a"]);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn test_failure_does_not_abort_tick() {
        let (mut sched, _) = scheduler(32);
        sched.schedule("bad", None, Priority::Normal, |_: &mut Vec<_>, _| {
            Err(RenderError::Transpile("boom".into()).into())
        });
        sched.schedule("good", None, Priority::Normal, |log: &mut Vec<_>, _| {
            log.push("good");
            Ok(())
        });
        let mut log = Vec::new();
        let report = sched.run_slice(&mut log);
        assert_eq!(report.failed, 1);
        assert_eq!(log, vec!["good"]);
        // Not retried.
        assert!(!sched.has_pending());
    }

    #[test]
    fn test_cancel_group_mid_slice() {
        let (mut sched, _) = scheduler(32);
        sched.schedule("killer", None, Priority::Normal, |log: &mut Vec<_>, sched| {
            log.push("killer");
            sched.cancel_group("victims");
            Ok(())
        });
        sched.schedule("victim", Some("victims"), Priority::Normal, |log: &mut Vec<_>, _| {
            log.push("victim");
            Ok(())
        });
        let mut log = Vec::new();
        sched.run_slice(&mut log);
        assert_eq!(log, vec!["killer"]);
        assert!(!sched.has_pending());
    }

    #[test]
    fn test_regroup_on_reschedule() {
        let (mut sched, _) = scheduler(32);
        sched.schedule("a", Some("one"), Priority::Normal, |_: &mut Vec<&str>, _| Ok(()));
        sched.schedule("a", Some("two"), Priority::Normal, |_: &mut Vec<&str>, _| Ok(()));
        assert_eq!(sched.cancel_group("one"), 0);
        assert_eq!(sched.cancel_group("two"), 1);
    }

    fn step(
        log: &mut Vec<&'static str>,
        sched: &mut Scheduler<Vec<&'static str>>,
    ) -> Result<(), TaskError> {
        log.push("step");
        if log.len() < 3 {
            sched.schedule("step", None, Priority::Low, step);
        }
        Ok(())
    }

    #[test]
    fn test_task_can_reschedule_itself() {
        let (mut sched, _) = scheduler(32);
        sched.schedule("step", None, Priority::Low, step);
        let mut log = Vec::new();
        sched.run_slice(&mut log);
        assert_eq!(log.len(), 1);
        assert!(sched.is_scheduled("step"));
        sched.run_until_idle(&mut log);
        assert_eq!(log.len(), 3);
    }
}
