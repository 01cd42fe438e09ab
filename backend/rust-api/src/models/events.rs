use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GameResult;

/// Events pushed to the client over the attempt stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttemptEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
    ViolationWarning(ViolationWarning),
    Paused(PhaseChange),
    Resumed(PhaseChange),
    Disqualified(AttemptClosed),
    Finished(AttemptClosed),
    Quit(PhaseChange),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimerTick {
    pub attempt_id: Uuid,
    /// Absent for practice attempts.
    pub remaining_seconds: Option<u32>,
    pub elapsed_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeExpired {
    pub attempt_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ViolationWarning {
    pub attempt_id: Uuid,
    pub violations: u32,
    pub remaining_before_disqualification: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PhaseChange {
    pub attempt_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttemptClosed {
    pub attempt_id: Uuid,
    pub result: Option<GameResult>,
    pub timestamp: DateTime<Utc>,
}

impl AttemptEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            AttemptEvent::TimerTick(_) => "timer-tick",
            AttemptEvent::TimeExpired(_) => "time-expired",
            AttemptEvent::ViolationWarning(_) => "violation-warning",
            AttemptEvent::Paused(_) => "paused",
            AttemptEvent::Resumed(_) => "resumed",
            AttemptEvent::Disqualified(_) => "disqualified",
            AttemptEvent::Finished(_) => "finished",
            AttemptEvent::Quit(_) => "quit",
        }
    }

    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptEvent::Disqualified(_) | AttemptEvent::Finished(_) | AttemptEvent::Quit(_)
        )
    }
}
