//! Cooperative scheduling: the engine's only concurrency primitive.
//!
//! There are no locks in this crate. Shared mutable state (the stream
//! buffer, the active code block) is only touched from tasks run by a
//! [`Scheduler`], and tasks never run concurrently with each other.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Tick    ┌──────────────┐  run_slice   ┌──────────────┐
//! │  TickSource  │ ────────▶ │ StreamEngine │ ───────────▶ │  Scheduler   │
//! └──────────────┘           └──────────────┘              └──────────────┘
//!                                                                 │
//!                                             tasks(&mut core, &mut sched)
//!                                                                 ▼
//!                                                          ┌──────────────┐
//!                                                          │  EngineCore  │
//!                                                          └──────────────┘
//! ```

mod scheduler;
mod ticker;

pub use scheduler::{Priority, Scheduler, SchedulerStats, SliceReport, TaskFn, TaskGroup, TaskKey};
pub use ticker::{ImmediateTicks, Tick, TickSource, TickerActor};
