use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::attempt::ClockSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockState {
    Idle,
    Running,
    Paused,
    Expired,
    Stopped,
}

/// Result of a single clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Clock is not running; nothing changed.
    Idle,
    Running { remaining: u32 },
    /// Reached zero on this tick. Reported exactly once.
    Expired,
}

/// Countdown for a scored attempt. Advances only through [`SessionClock::tick`].
#[derive(Debug, Clone)]
pub struct SessionClock {
    budget: u32,
    remaining: u32,
    state: ClockState,
}

impl SessionClock {
    pub fn new(budget_seconds: u32) -> Self {
        Self {
            budget: budget_seconds,
            remaining: budget_seconds,
            state: ClockState::Idle,
        }
    }

    pub fn start(&mut self) {
        if self.state == ClockState::Idle {
            self.state = ClockState::Running;
        }
    }

    pub fn pause(&mut self) {
        if self.state == ClockState::Running {
            self.state = ClockState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == ClockState::Paused {
            self.state = ClockState::Running;
        }
    }

    /// Freezes the clock for good without signalling expiry.
    pub fn stop(&mut self) {
        if self.state != ClockState::Expired {
            self.state = ClockState::Stopped;
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.state != ClockState::Running {
            return TickOutcome::Idle;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.state = ClockState::Expired;
            return TickOutcome::Expired;
        }

        TickOutcome::Running {
            remaining: self.remaining,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Seconds consumed so far.
    pub fn used(&self) -> u32 {
        self.budget - self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.state == ClockState::Running
    }

    pub fn is_expired(&self) -> bool {
        self.state == ClockState::Expired
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot {
            remaining_seconds: Some(self.remaining),
            running: self.is_running(),
        }
    }
}

/// Background task that turns an interval into `Tick` messages.
///
/// The task is aborted when the handle is stopped or dropped, so no tick is
/// produced after teardown. It holds only a weak sender and ends on its own
/// once the receiving side is gone.
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<M>(
        period: Duration,
        tx: mpsc::WeakUnboundedSender<M>,
        make_tick: fn() -> M,
    ) -> Self
    where
        M: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(tx) = tx.upgrade() else {
                    break;
                };
                if tx.send(make_tick()).is_err() {
                    break;
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// A ticker that never fires; ticks are injected by the caller.
    pub fn manual() -> Self {
        Self { handle: None }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
