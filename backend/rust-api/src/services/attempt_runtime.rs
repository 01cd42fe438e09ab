//! Task that owns one live attempt.
//!
//! Every input (HTTP calls, clock ticks, monitor events, save results) is
//! turned into an [`AttemptCommand`] and handled in arrival order by a single
//! task, so the session controller is never touched concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::error::AttemptError;
use crate::metrics::{ATTEMPTS_ACTIVE, ATTEMPTS_TOTAL};
use crate::models::anticheat::{
    ActionTaken, IncidentType, MonitorEvent, PlatformSignal, ViolationIncident,
};
use crate::models::attempt::{
    AttemptOutcome, CompletionReport, FullscreenResponse, LiveAttemptSnapshot, PersistenceStatus,
    ProgressReport,
};
use crate::models::events::{
    AttemptClosed, AttemptEvent, PhaseChange, TimeExpired, TimerTick, ViolationWarning,
};
use crate::models::AssessmentSession;
use crate::services::clock::Ticker;
use crate::services::incident_publisher::{self, IncidentPublisher};
use crate::services::persistence::PersistenceLane;
use crate::services::session_controller::{
    AttemptSpec, Closed, SessionController, Step, MAX_TAB_VIOLATIONS,
};
use crate::services::unlock_policy;
use crate::services::violation_monitor::{SignalBus, ViolationCallbacks};

const EVENT_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, AttemptError>>;

/// Shared collaborators of every attempt task.
#[derive(Clone)]
pub struct AttemptContext {
    pub lane: Arc<PersistenceLane>,
    pub incidents: Arc<dyn IncidentPublisher>,
    /// `None` disables the background clock; ticks are then injected.
    pub tick_interval: Option<Duration>,
}

pub enum AttemptCommand {
    Start {
        response: FullscreenResponse,
        reply: Reply<LiveAttemptSnapshot>,
    },
    Tick,
    Monitor(MonitorEvent),
    Progress {
        report: ProgressReport,
        reply: Reply<LiveAttemptSnapshot>,
    },
    Complete {
        report: CompletionReport,
        reply: Reply<LiveAttemptSnapshot>,
    },
    Quit {
        reply: Reply<LiveAttemptSnapshot>,
    },
    Disqualify {
        reason: Option<String>,
        reply: Reply<LiveAttemptSnapshot>,
    },
    Snapshot {
        reply: oneshot::Sender<LiveAttemptSnapshot>,
    },
    RetryPersist {
        reply: oneshot::Sender<LiveAttemptSnapshot>,
    },
    PersistFinished(Result<(), String>),
    Dispose {
        reply: oneshot::Sender<LiveAttemptSnapshot>,
    },
}

/// Cloneable address of a running attempt.
#[derive(Clone)]
pub struct AttemptHandle {
    attempt_id: Uuid,
    user_id: String,
    tx: mpsc::UnboundedSender<AttemptCommand>,
    bus: Arc<SignalBus>,
    events: broadcast::Sender<AttemptEvent>,
}

impl AttemptHandle {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttemptEvent> {
        self.events.subscribe()
    }

    /// Forwards a raw browser signal to whoever is listening on the bus.
    pub fn signal(&self, signal: PlatformSignal) -> usize {
        self.bus.emit(signal)
    }

    /// Injects one clock tick. Used when the background clock is disabled.
    pub fn tick(&self) -> bool {
        self.tx.send(AttemptCommand::Tick).is_ok()
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AttemptCommand,
    ) -> Result<T, AttemptError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| AttemptError::AttemptNotFound(self.attempt_id))?;
        rx.await
            .map_err(|_| AttemptError::AttemptNotFound(self.attempt_id))
    }

    pub async fn start(
        &self,
        response: FullscreenResponse,
    ) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Start { response, reply })
            .await?
    }

    pub async fn report_progress(
        &self,
        report: ProgressReport,
    ) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Progress { report, reply })
            .await?
    }

    pub async fn complete(
        &self,
        report: CompletionReport,
    ) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Complete { report, reply })
            .await?
    }

    pub async fn quit(&self) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Quit { reply }).await?
    }

    pub async fn disqualify(
        &self,
        reason: Option<String>,
    ) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Disqualify { reason, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Snapshot { reply }).await
    }

    pub async fn retry_persist(&self) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::RetryPersist { reply })
            .await
    }

    /// Tears the attempt down. A running attempt ends as a quit.
    pub async fn dispose(&self) -> Result<LiveAttemptSnapshot, AttemptError> {
        self.call(|reply| AttemptCommand::Dispose { reply }).await
    }
}

/// Starts the task for a freshly mounted attempt.
pub fn spawn(spec: AttemptSpec, session: AssessmentSession, ctx: AttemptContext) -> AttemptHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let bus = Arc::new(SignalBus::new());

    let weak = tx.downgrade();
    let monitor_tx = weak.clone();
    let callbacks: Arc<dyn ViolationCallbacks> = Arc::new(move |event: MonitorEvent| {
        if let Some(tx) = monitor_tx.upgrade() {
            let _ = tx.send(AttemptCommand::Monitor(event));
        }
    });

    let handle = AttemptHandle {
        attempt_id: spec.attempt_id,
        user_id: spec.user_id.clone(),
        tx,
        bus: bus.clone(),
        events: events.clone(),
    };

    let controller = SessionController::new(spec, session, bus, callbacks);
    let runtime = AttemptRuntime {
        controller,
        ticker: Ticker::manual(),
        persistence: PersistenceStatus::NotRequired,
        ctx,
        events,
        weak,
    };

    ATTEMPTS_ACTIVE.inc();
    tokio::spawn(runtime.run(rx));
    handle
}

struct AttemptRuntime {
    controller: SessionController,
    ticker: Ticker,
    persistence: PersistenceStatus,
    ctx: AttemptContext,
    events: broadcast::Sender<AttemptEvent>,
    weak: mpsc::WeakUnboundedSender<AttemptCommand>,
}

impl AttemptRuntime {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AttemptCommand>) {
        let attempt_id = self.controller.spec().attempt_id;
        tracing::debug!("Attempt task started: attempt={}", attempt_id);

        while let Some(command) = rx.recv().await {
            if let AttemptCommand::Dispose { reply } = command {
                let step = self.controller.dispose();
                self.apply(step);
                let _ = reply.send(self.snapshot());
                break;
            }
            self.handle(command);
        }

        // Disposed, or every handle is gone. No-op once the attempt has ended.
        let step = self.controller.dispose();
        self.apply(step);
        tracing::debug!("Attempt task stopped: attempt={}", attempt_id);
    }

    fn handle(&mut self, command: AttemptCommand) {
        match command {
            AttemptCommand::Start { response, reply } => {
                let result = self.controller.request_start(response);
                self.answer(result, reply);
            }
            AttemptCommand::Tick => {
                let step = self.controller.tick();
                self.apply(step);
            }
            AttemptCommand::Monitor(event) => {
                let step = self.controller.on_monitor_event(event);
                self.apply(step);
            }
            AttemptCommand::Progress { report, reply } => {
                let result = self.controller.report_progress(report);
                self.answer(result, reply);
            }
            AttemptCommand::Complete { report, reply } => {
                let result = self.controller.complete(report);
                self.answer(result, reply);
            }
            AttemptCommand::Quit { reply } => {
                let step = self.controller.quit();
                self.answer(Ok(step), reply);
            }
            AttemptCommand::Disqualify { reason, reply } => {
                let result = self.controller.disqualify(reason);
                self.answer(result, reply);
            }
            AttemptCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            AttemptCommand::RetryPersist { reply } => {
                if matches!(self.persistence, PersistenceStatus::Failed { .. }) {
                    tracing::info!(
                        "Retrying assessment save: attempt={}",
                        self.controller.spec().attempt_id
                    );
                    self.persistence = PersistenceStatus::Pending;
                    self.spawn_flush();
                }
                let _ = reply.send(self.snapshot());
            }
            AttemptCommand::PersistFinished(result) => {
                self.persistence = match result {
                    Ok(()) => PersistenceStatus::Saved,
                    Err(error) => PersistenceStatus::Failed { error },
                };
            }
            // Handled by the run loop.
            AttemptCommand::Dispose { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn answer(&mut self, result: Result<Step, AttemptError>, reply: Reply<LiveAttemptSnapshot>) {
        let response = result.map(|step| {
            self.apply(step);
            self.snapshot()
        });
        let _ = reply.send(response);
    }

    fn snapshot(&self) -> LiveAttemptSnapshot {
        self.controller.snapshot(self.persistence.clone())
    }

    fn publish(&self, event: AttemptEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn apply(&mut self, step: Step) {
        let attempt_id = self.controller.spec().attempt_id;
        let now = Utc::now();

        match step {
            Step::Ignored | Step::ProgressRecorded => {}
            Step::Started => {
                if let Some(period) = self.ctx.tick_interval {
                    self.ticker = Ticker::spawn(period, self.weak.clone(), || AttemptCommand::Tick);
                }
            }
            Step::Ticked { remaining, elapsed } => {
                self.publish(AttemptEvent::TimerTick(TimerTick {
                    attempt_id,
                    remaining_seconds: remaining,
                    elapsed_seconds: elapsed,
                    timestamp: now,
                }));
            }
            Step::Paused => self.publish(AttemptEvent::Paused(PhaseChange {
                attempt_id,
                timestamp: now,
            })),
            Step::Resumed => self.publish(AttemptEvent::Resumed(PhaseChange {
                attempt_id,
                timestamp: now,
            })),
            Step::Warned {
                violations,
                remaining,
            } => {
                self.report_incident(IncidentType::TabSwitch, ActionTaken::Warned, violations);
                self.publish(AttemptEvent::ViolationWarning(ViolationWarning {
                    attempt_id,
                    violations,
                    remaining_before_disqualification: remaining,
                    message: format!(
                        "Tab switching detected. {} more violation(s) will disqualify this attempt.",
                        remaining
                    ),
                    timestamp: now,
                }));
            }
            Step::Closed(closed) => self.on_closed(closed),
        }
    }

    fn on_closed(&mut self, closed: Closed) {
        let spec = self.controller.spec().clone();
        let now = Utc::now();
        self.ticker.stop();

        ATTEMPTS_TOTAL
            .with_label_values(&[spec.game.as_str(), closed.outcome.label()])
            .inc();
        ATTEMPTS_ACTIVE.dec();

        if let Some(session) = closed.persist {
            if let Some(next) = spec.game.next() {
                if unlock_policy::is_unlocked(next, &session.results) {
                    tracing::info!("Game unlocked: user={}, game={}", spec.user_id, next.as_str());
                }
            }
            if closed.first_completion {
                tracing::info!(
                    "Assessment completed: user={}, total_score={:?}",
                    spec.user_id,
                    session.total_score
                );
            }
            self.ctx.lane.record(session);
            self.persistence = PersistenceStatus::Pending;
            self.spawn_flush();
        }

        let closing = |result: Option<_>| AttemptClosed {
            attempt_id: spec.attempt_id,
            result,
            timestamp: now,
        };
        match closed.outcome {
            AttemptOutcome::Completed { result } => {
                self.publish(AttemptEvent::Finished(closing(Some(result))));
            }
            AttemptOutcome::Expired { result } => {
                self.publish(AttemptEvent::TimeExpired(TimeExpired {
                    attempt_id: spec.attempt_id,
                    timestamp: now,
                }));
                self.publish(AttemptEvent::Finished(closing(Some(result))));
            }
            AttemptOutcome::Disqualified { result } => {
                let incident_type = if closed.violations >= MAX_TAB_VIOLATIONS {
                    IncidentType::TabSwitch
                } else {
                    IncidentType::ExternalDisqualification
                };
                self.report_incident(incident_type, ActionTaken::Disqualified, closed.violations);
                self.publish(AttemptEvent::Disqualified(closing(Some(result))));
            }
            AttemptOutcome::Quit => {
                self.publish(AttemptEvent::Quit(PhaseChange {
                    attempt_id: spec.attempt_id,
                    timestamp: now,
                }));
            }
        }
    }

    fn report_incident(&self, incident_type: IncidentType, action: ActionTaken, violations: u32) {
        let spec = self.controller.spec();
        incident_publisher::dispatch(
            self.ctx.incidents.clone(),
            ViolationIncident {
                id: Uuid::new_v4().to_string(),
                attempt_id: spec.attempt_id,
                user_id: spec.user_id.clone(),
                game: spec.game,
                incident_type,
                violations,
                action_taken: action,
                timestamp: Utc::now(),
            },
        );
    }

    fn spawn_flush(&self) {
        let lane = self.ctx.lane.clone();
        let user_id = self.controller.spec().user_id.clone();
        let tx = self.weak.clone();

        tokio::spawn(async move {
            let result = lane.flush(&user_id).await.map_err(|e| format!("{:#}", e));
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(AttemptCommand::PersistFinished(result));
            }
        });
    }
}
