use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GameKind;

/// Raw browser signal forwarded by the client page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformSignal {
    VisibilityHidden,
    VisibilityVisible,
    FullscreenEntered,
    FullscreenExited,
}

/// Domain event produced by the violation monitor from raw signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEvent {
    TabSwitchDetected,
    FullscreenExited,
    FullscreenRestored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationIncident {
    pub id: String,
    pub attempt_id: Uuid,
    pub user_id: String,
    pub game: GameKind,
    pub incident_type: IncidentType,
    pub violations: u32,
    pub action_taken: ActionTaken,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    TabSwitch,
    ExternalDisqualification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    Warned,
    Disqualified,
}
