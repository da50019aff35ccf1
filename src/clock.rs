//! Game clocks.
//!
//! [`ClockState`] is plain data: two countdowns, the side currently running
//! (if any) and the side that flagged (if any). Only one side runs at a time.
//! Reaching zero stops that side and freezes both clocks.
//!
//! [`ClockTicker`] is the periodic timer that drives a `ClockState`. It is an
//! owned resource: dropping it stops the timer.

use std::time::Duration;

use shakmaty::Color;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::constants::DEFAULT_CLOCK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockState {
    pub white: Duration,
    pub black: Duration,
    pub running: Option<Color>,
    pub flagged: Option<Color>,
}

impl Default for ClockState {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK)
    }
}

impl ClockState {
    /// Both sides get `budget`; nothing runs yet.
    pub fn new(budget: Duration) -> Self {
        Self {
            white: budget,
            black: budget,
            running: None,
            flagged: None,
        }
    }

    pub fn remaining(&self, side: Color) -> Duration {
        match side {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn remaining_mut(&mut self, side: Color) -> &mut Duration {
        match side {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Run `side`'s clock. Has no effect once a flag has fallen.
    pub fn start(&mut self, side: Color) {
        if self.flagged.is_none() {
            self.running = Some(side);
        }
    }

    pub fn stop(&mut self) {
        self.running = None;
    }

    /// Charge `elapsed` to the running side. Returns the side that flagged
    /// on this tick, if any.
    pub fn tick(&mut self, elapsed: Duration) -> Option<Color> {
        let side = self.running?;
        let left = self.remaining_mut(side);
        *left = left.saturating_sub(elapsed);
        if left.is_zero() {
            self.running = None;
            self.flagged = Some(side);
            return Some(side);
        }
        None
    }
}

/// A periodic timer task on the current tokio runtime.
pub struct ClockTicker {
    task: Option<JoinHandle<()>>,
}

impl ClockTicker {
    /// Call `on_tick(elapsed)` every `period`, where `elapsed` is the time
    /// actually measured since the previous tick.
    ///
    /// Outside a tokio runtime the ticker stays inactive.
    pub fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut(Duration) + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime, clock ticker disabled");
            return Self { task: None };
        };

        let task = handle.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            loop {
                let now = interval.tick().await;
                on_tick(now.saturating_duration_since(last));
                last = now;
            }
        });
        debug!(?period, "clock ticker started");
        Self { task: Some(task) }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ClockTicker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
