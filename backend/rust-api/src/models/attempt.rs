use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::anticheat::PlatformSignal;
use super::{GameKind, GameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptMode {
    /// Graded attempt: clock, monitor, unlock policy and persistence apply.
    Scored,
    /// Ungraded rehearsal. Nothing is enforced or stored.
    Practice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    NotStarted,
    Armed,
    Paused,
    Disqualified,
    Finished,
}

impl AttemptPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptPhase::Disqualified | AttemptPhase::Finished)
    }

    pub fn is_live(self) -> bool {
        matches!(self, AttemptPhase::Armed | AttemptPhase::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockSnapshot {
    /// `None` for practice attempts, which have no time bound.
    pub remaining_seconds: Option<u32>,
    pub running: bool,
}

/// How the attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Completed { result: GameResult },
    Expired { result: GameResult },
    Disqualified { result: GameResult },
    /// Deliberate quit. No result is recorded.
    Quit,
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Completed { .. } => "completed",
            AttemptOutcome::Expired { .. } => "expired",
            AttemptOutcome::Disqualified { .. } => "disqualified",
            AttemptOutcome::Quit => "quit",
        }
    }

    pub fn result(&self) -> Option<&GameResult> {
        match self {
            AttemptOutcome::Completed { result }
            | AttemptOutcome::Expired { result }
            | AttemptOutcome::Disqualified { result } => Some(result),
            AttemptOutcome::Quit => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceStatus {
    NotRequired,
    Pending,
    Saved,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveAttemptSnapshot {
    pub attempt_id: Uuid,
    pub user_id: String,
    pub game: GameKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<String>,
    pub mode: AttemptMode,
    pub phase: AttemptPhase,
    pub clock: ClockSnapshot,
    pub violations: u32,
    pub paused: bool,
    pub elapsed_seconds: u32,
    pub outcome: Option<AttemptOutcome>,
    pub persistence: PersistenceStatus,
}

/// Payload of the game's `onComplete` callback.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CompletionReport {
    pub score: u32,
    #[serde(default)]
    pub effort_metric: f64,
    #[serde(default)]
    pub failed: bool,
    #[validate(length(max = 500))]
    pub failure_reason: Option<String>,
}

/// Running progress, used for best-effort scoring on disqualification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct ProgressReport {
    pub puzzles_completed: u32,
    #[serde(default)]
    pub effort_metric: f64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MountAttemptRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    pub game_type: String,
    #[validate(length(min = 1, max = 128))]
    pub quiz_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MountAttemptQuery {
    #[serde(default)]
    pub trial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullscreenResponse {
    Granted,
    Denied,
}

#[derive(Debug, Deserialize)]
pub struct StartAttemptRequest {
    pub fullscreen: FullscreenResponse,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub signal: PlatformSignal,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DisqualifyRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
}
