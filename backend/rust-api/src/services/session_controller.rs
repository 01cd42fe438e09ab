//! State machine of one live game attempt.
//!
//! `NotStarted -> Armed -> {Paused <-> Armed} -> {Disqualified | Finished}`.
//! The controller is synchronous: it owns the clock and the violation
//! monitor, decides every transition immediately and hands the session that
//! must be persisted back to the caller.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::AttemptError;
use crate::models::anticheat::MonitorEvent;
use crate::models::attempt::{
    AttemptMode, AttemptOutcome, AttemptPhase, ClockSnapshot, CompletionReport,
    FullscreenResponse, LiveAttemptSnapshot, PersistenceStatus, ProgressReport,
};
use crate::models::{AssessmentSession, GameKind, GameResult};
use crate::services::clock::{SessionClock, TickOutcome};
use crate::services::score_aggregator;
use crate::services::violation_monitor::{SignalSource, ViolationCallbacks, ViolationMonitor};

/// Tab switches that end a scored attempt.
pub const MAX_TAB_VIOLATIONS: u32 = 3;

pub const DISQUALIFICATION_REASON: &str = "Disqualified due to tab switching violations";

#[derive(Debug, Clone)]
pub struct AttemptSpec {
    pub attempt_id: Uuid,
    pub user_id: String,
    pub game: GameKind,
    pub quiz_id: Option<String>,
    pub mode: AttemptMode,
    pub time_budget_seconds: u32,
}

/// Terminal transition of an attempt.
#[derive(Debug, Clone)]
pub struct Closed {
    pub outcome: AttemptOutcome,
    /// Updated assessment to store; `None` for practice and quit.
    pub persist: Option<AssessmentSession>,
    pub first_completion: bool,
    pub violations: u32,
}

/// What handling one input did to the attempt.
#[derive(Debug, Clone)]
pub enum Step {
    Ignored,
    Started,
    Ticked {
        remaining: Option<u32>,
        elapsed: u32,
    },
    Paused,
    Resumed,
    Warned {
        violations: u32,
        remaining: u32,
    },
    ProgressRecorded,
    Closed(Closed),
}

#[derive(Debug, Clone, Copy)]
enum Closing {
    Completed,
    Expired,
    Disqualified,
}

pub struct SessionController {
    spec: AttemptSpec,
    phase: AttemptPhase,
    /// Present only for scored attempts.
    clock: Option<SessionClock>,
    monitor: ViolationMonitor,
    callbacks: Arc<dyn ViolationCallbacks>,
    violations: u32,
    elapsed_seconds: u32,
    progress: ProgressReport,
    /// Present only for scored attempts.
    session: Option<AssessmentSession>,
    outcome: Option<AttemptOutcome>,
}

impl SessionController {
    pub fn new(
        spec: AttemptSpec,
        session: AssessmentSession,
        source: Arc<dyn SignalSource>,
        callbacks: Arc<dyn ViolationCallbacks>,
    ) -> Self {
        let scored = spec.mode == AttemptMode::Scored;
        Self {
            clock: scored.then(|| SessionClock::new(spec.time_budget_seconds)),
            session: scored.then_some(session),
            spec,
            phase: AttemptPhase::NotStarted,
            monitor: ViolationMonitor::new(source),
            callbacks,
            violations: 0,
            elapsed_seconds: 0,
            progress: ProgressReport::default(),
            outcome: None,
        }
    }

    pub fn spec(&self) -> &AttemptSpec {
        &self.spec
    }

    pub fn phase(&self) -> AttemptPhase {
        self.phase
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn outcome(&self) -> Option<&AttemptOutcome> {
        self.outcome.as_ref()
    }

    pub fn monitor_armed(&self) -> bool {
        self.monitor.is_armed()
    }

    fn scored(&self) -> bool {
        self.spec.mode == AttemptMode::Scored
    }

    /// Outcome of the page's fullscreen request.
    pub fn request_start(&mut self, response: FullscreenResponse) -> Result<Step, AttemptError> {
        match (self.phase, response) {
            (AttemptPhase::NotStarted, FullscreenResponse::Denied) => {
                Err(AttemptError::FullscreenDenied)
            }
            (AttemptPhase::NotStarted, FullscreenResponse::Granted) => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.start();
                }
                if self.scored() {
                    self.monitor.arm(self.callbacks.clone());
                }
                self.phase = AttemptPhase::Armed;
                tracing::info!(
                    "Attempt armed: attempt={}, game={}, mode={:?}",
                    self.spec.attempt_id,
                    self.spec.game.as_str(),
                    self.spec.mode
                );
                Ok(Step::Started)
            }
            // Re-entering fullscreen once started is reported through the monitor.
            (phase, _) if phase.is_live() => Ok(Step::Ignored),
            (phase, _) => Err(AttemptError::InvalidPhase(phase)),
        }
    }

    pub fn tick(&mut self) -> Step {
        if self.phase != AttemptPhase::Armed {
            return Step::Ignored;
        }

        self.elapsed_seconds += 1;
        match self.clock.as_mut().map(SessionClock::tick) {
            None => Step::Ticked {
                remaining: None,
                elapsed: self.elapsed_seconds,
            },
            Some(TickOutcome::Running { remaining }) => Step::Ticked {
                remaining: Some(remaining),
                elapsed: self.elapsed_seconds,
            },
            Some(TickOutcome::Expired) => {
                tracing::info!("Attempt clock expired: attempt={}", self.spec.attempt_id);
                self.close(Closing::Expired, None)
            }
            Some(TickOutcome::Idle) => Step::Ignored,
        }
    }

    pub fn on_monitor_event(&mut self, event: MonitorEvent) -> Step {
        if !self.scored() || !self.phase.is_live() {
            return Step::Ignored;
        }

        match event {
            MonitorEvent::TabSwitchDetected => self.record_tab_switch(),
            MonitorEvent::FullscreenExited if self.phase == AttemptPhase::Armed => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.pause();
                }
                self.phase = AttemptPhase::Paused;
                Step::Paused
            }
            MonitorEvent::FullscreenRestored if self.phase == AttemptPhase::Paused => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.resume();
                }
                self.phase = AttemptPhase::Armed;
                Step::Resumed
            }
            _ => Step::Ignored,
        }
    }

    // Pausing does not stop the count.
    fn record_tab_switch(&mut self) -> Step {
        self.violations += 1;
        tracing::warn!(
            "Tab switch detected: attempt={}, user={}, violations={}",
            self.spec.attempt_id,
            self.spec.user_id,
            self.violations
        );

        if self.violations >= MAX_TAB_VIOLATIONS {
            return self.close(
                Closing::Disqualified,
                Some(DISQUALIFICATION_REASON.to_string()),
            );
        }

        Step::Warned {
            violations: self.violations,
            remaining: MAX_TAB_VIOLATIONS - self.violations,
        }
    }

    pub fn report_progress(&mut self, progress: ProgressReport) -> Result<Step, AttemptError> {
        if !self.phase.is_live() {
            return Err(AttemptError::InvalidPhase(self.phase));
        }
        self.progress = progress;
        Ok(Step::ProgressRecorded)
    }

    /// The game's own completion callback. Ignored once the attempt is closed.
    pub fn complete(&mut self, report: CompletionReport) -> Result<Step, AttemptError> {
        match self.phase {
            AttemptPhase::Armed => {}
            phase if phase.is_terminal() => return Ok(Step::Ignored),
            phase => return Err(AttemptError::InvalidPhase(phase)),
        }

        self.progress = ProgressReport {
            puzzles_completed: report.score,
            effort_metric: report.effort_metric,
        };
        let failure = report.failed.then(|| {
            report
                .failure_reason
                .unwrap_or_else(|| "Ended by game".to_string())
        });
        Ok(self.close(Closing::Completed, failure))
    }

    /// Forced disqualification from outside the monitor.
    pub fn disqualify(&mut self, reason: Option<String>) -> Result<Step, AttemptError> {
        match self.phase {
            phase if phase.is_live() => {}
            phase if phase.is_terminal() => return Ok(Step::Ignored),
            phase => return Err(AttemptError::InvalidPhase(phase)),
        }

        let reason = reason.unwrap_or_else(|| DISQUALIFICATION_REASON.to_string());
        Ok(self.close(Closing::Disqualified, Some(reason)))
    }

    /// Deliberate quit: progress is discarded and nothing is recorded.
    pub fn quit(&mut self) -> Step {
        if self.phase.is_terminal() {
            return Step::Ignored;
        }

        self.teardown();
        self.phase = AttemptPhase::Finished;
        self.outcome = Some(AttemptOutcome::Quit);
        tracing::info!(
            "Attempt quit, progress discarded: attempt={}, game={}",
            self.spec.attempt_id,
            self.spec.game.as_str()
        );

        Step::Closed(Closed {
            outcome: AttemptOutcome::Quit,
            persist: None,
            first_completion: false,
            violations: self.violations,
        })
    }

    /// Navigation away. A running attempt is treated as quit.
    pub fn dispose(&mut self) -> Step {
        let step = self.quit();
        self.teardown();
        step
    }

    fn teardown(&mut self) {
        self.monitor.disarm();
        if let Some(clock) = self.clock.as_mut() {
            clock.stop();
        }
    }

    fn time_spent(&self) -> u32 {
        match &self.clock {
            Some(clock) => clock.used(),
            None => self.elapsed_seconds,
        }
    }

    fn close(&mut self, closing: Closing, failure_reason: Option<String>) -> Step {
        self.teardown();

        let result = GameResult {
            puzzles_completed: self.progress.puzzles_completed,
            time_spent_seconds: self.time_spent(),
            effort_metric: self.progress.effort_metric,
            completed_at: Utc::now(),
            failed: failure_reason.is_some(),
            failure_reason,
        };

        let (phase, outcome) = match closing {
            Closing::Completed => (
                AttemptPhase::Finished,
                AttemptOutcome::Completed {
                    result: result.clone(),
                },
            ),
            Closing::Expired => (
                AttemptPhase::Finished,
                AttemptOutcome::Expired {
                    result: result.clone(),
                },
            ),
            Closing::Disqualified => (
                AttemptPhase::Disqualified,
                AttemptOutcome::Disqualified {
                    result: result.clone(),
                },
            ),
        };
        self.phase = phase;
        self.outcome = Some(outcome.clone());

        let game = self.spec.game;
        let mut first_completion = false;
        let persist = self.session.as_mut().map(|session| {
            let update = score_aggregator::add_result(session, game, result, Utc::now());
            first_completion = update.first_completion;
            session.clone()
        });

        tracing::info!(
            "Attempt closed: attempt={}, game={}, outcome={}, violations={}",
            self.spec.attempt_id,
            game.as_str(),
            outcome.label(),
            self.violations
        );

        Step::Closed(Closed {
            outcome,
            persist,
            first_completion,
            violations: self.violations,
        })
    }

    pub fn snapshot(&self, persistence: PersistenceStatus) -> LiveAttemptSnapshot {
        let clock = match &self.clock {
            Some(clock) => clock.snapshot(),
            None => ClockSnapshot {
                remaining_seconds: None,
                running: self.phase == AttemptPhase::Armed,
            },
        };

        LiveAttemptSnapshot {
            attempt_id: self.spec.attempt_id,
            user_id: self.spec.user_id.clone(),
            game: self.spec.game,
            quiz_id: self.spec.quiz_id.clone(),
            mode: self.spec.mode,
            phase: self.phase,
            clock,
            violations: self.violations,
            paused: self.phase == AttemptPhase::Paused,
            elapsed_seconds: self.elapsed_seconds,
            outcome: self.outcome.clone(),
            persistence,
        }
    }
}
