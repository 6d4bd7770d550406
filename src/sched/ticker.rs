//! Tick sources: the injectable pacing strategy behind the scheduler.
//!
//! [`TickerActor`] paces ticks from a dedicated thread, standing in for a
//! display-refresh callback. [`ImmediateTicks`] is the fallback chain that
//! hands out the next tick as soon as it is asked for.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A tick event.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Frame number (monotonically increasing).
    pub frame: u64,
    /// Time elapsed since the source started.
    pub elapsed: Duration,
}

/// Something that paces engine ticks.
pub trait TickSource {
    /// Block until the next tick. `None` means the source is exhausted.
    fn next_tick(&mut self) -> Option<Tick>;
}

/// Ticks immediately, one after another.
#[derive(Debug)]
pub struct ImmediateTicks {
    frame: u64,
    start: Instant,
}

impl ImmediateTicks {
    /// Create a new immediate source.
    pub fn new() -> Self {
        Self {
            frame: 0,
            start: Instant::now(),
        }
    }
}

impl Default for ImmediateTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ImmediateTicks {
    fn next_tick(&mut self) -> Option<Tick> {
        let tick = Tick {
            frame: self.frame,
            elapsed: self.start.elapsed(),
        };
        self.frame += 1;
        Some(tick)
    }
}

/// Ticker actor that generates regular timing events on its own thread.
#[derive(Debug)]
pub struct TickerActor {
    /// Handle to the ticker thread.
    handle: Option<JoinHandle<()>>,
    /// Flag to signal shutdown.
    shutdown: Arc<AtomicBool>,
    /// Receiver for tick events.
    tick_rx: Receiver<Tick>,
}

impl TickerActor {
    /// Spawn a ticker with the given interval (16ms for ~60 FPS).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS fails to spawn the ticker thread.
    pub fn spawn(interval: Duration) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        // Bounded channel with small buffer - ticks must not queue up
        let (tick_tx, tick_rx) = bounded(2);

        let handle = thread::Builder::new()
            .name("inkstream-ticker".to_string())
            .spawn(move || {
                Self::run_loop(&tick_tx, &shutdown_clone, interval);
            })?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            tick_rx,
        })
    }

    /// Get a reference to the tick receiver, for `select!`-driven hosts.
    #[inline]
    pub const fn receiver(&self) -> &Receiver<Tick> {
        &self.tick_rx
    }

    /// Signal the ticker to shutdown.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Wait for the ticker thread to finish.
    pub fn join(mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn run_loop(tick_tx: &Sender<Tick>, shutdown: &Arc<AtomicBool>, interval: Duration) {
        let start = Instant::now();
        let mut frame = 0u64;
        let mut next_tick = start + interval;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            let now = Instant::now();
            if now >= next_tick {
                let tick = Tick {
                    frame,
                    elapsed: now - start,
                };

                // Receiver too slow: skip the tick rather than build a backlog
                let _ = tick_tx.try_send(tick);

                frame += 1;
                next_tick += interval;

                if next_tick < now {
                    next_tick = now + interval;
                }
            } else {
                let sleep_duration = next_tick - now;
                thread::sleep(sleep_duration.min(Duration::from_millis(1)));
            }
        }
    }
}

impl TickSource for TickerActor {
    fn next_tick(&mut self) -> Option<Tick> {
        self.tick_rx.recv().ok()
    }
}

impl Drop for TickerActor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_basic() {
        let ticker = TickerActor::spawn(Duration::from_millis(10)).unwrap();

        let tick = ticker.receiver().recv_timeout(Duration::from_millis(100));
        assert!(tick.is_ok());
        assert_eq!(tick.unwrap().frame, 0);

        let tick2 = ticker.receiver().recv_timeout(Duration::from_millis(50));
        assert!(tick2.is_ok());

        ticker.join();
    }

    #[test]
    fn test_ticker_shutdown() {
        let ticker = TickerActor::spawn(Duration::from_millis(100)).unwrap();
        ticker.shutdown();
        thread::sleep(Duration::from_millis(50));
        ticker.join();
    }

    #[test]
    fn test_immediate_ticks_count_up() {
        let mut ticks = ImmediateTicks::new();
        assert_eq!(ticks.next_tick().map(|t| t.frame), Some(0));
        assert_eq!(ticks.next_tick().map(|t| t.frame), Some(1));
    }
}
