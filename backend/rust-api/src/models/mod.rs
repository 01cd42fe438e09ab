use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AttemptError;

pub mod anticheat;
pub mod attempt;
pub mod events;
pub mod system_settings;

/// Mini-games of the assessment. Declaration order is the unlock chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameKind {
    UnblockMe,
    Minesweeper,
    WaterCapacity,
    QuestionGame,
}

impl GameKind {
    pub const ALL: [GameKind; 4] = [
        GameKind::UnblockMe,
        GameKind::Minesweeper,
        GameKind::WaterCapacity,
        GameKind::QuestionGame,
    ];

    /// Games that must all have a result before the total score is valid.
    pub const REQUIRED: [GameKind; 3] = [
        GameKind::UnblockMe,
        GameKind::Minesweeper,
        GameKind::WaterCapacity,
    ];

    /// Route string used by the client (`/games/{game_type}`).
    pub fn as_str(self) -> &'static str {
        match self {
            GameKind::UnblockMe => "unblock-me",
            GameKind::Minesweeper => "minesweeper",
            GameKind::WaterCapacity => "water-capacity",
            GameKind::QuestionGame => "question-game",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GameKind::UnblockMe => "Unblock Me",
            GameKind::Minesweeper => "Minesweeper",
            GameKind::WaterCapacity => "Water Capacity",
            GameKind::QuestionGame => "Question Game",
        }
    }

    /// Games that need a recorded attempt before this one may be entered.
    pub fn prerequisites(self) -> &'static [GameKind] {
        match self {
            GameKind::UnblockMe => &[],
            GameKind::Minesweeper => &[GameKind::UnblockMe],
            GameKind::WaterCapacity => &[GameKind::Minesweeper],
            GameKind::QuestionGame => &[
                GameKind::UnblockMe,
                GameKind::Minesweeper,
                GameKind::WaterCapacity,
            ],
        }
    }

    pub fn next(self) -> Option<GameKind> {
        match self {
            GameKind::UnblockMe => Some(GameKind::Minesweeper),
            GameKind::Minesweeper => Some(GameKind::WaterCapacity),
            GameKind::WaterCapacity => Some(GameKind::QuestionGame),
            GameKind::QuestionGame => None,
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for GameKind {
    type Err = AttemptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AttemptError::UnknownGame(s.to_string()))
    }
}

/// Recorded outcome of one scored attempt at a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameResult {
    /// Primary score unit. Quiz points for the question game, already-weighted
    /// points for minesweeper.
    pub puzzles_completed: u32,
    pub time_spent_seconds: u32,
    /// Game-specific secondary metric (error rate, minimum-moves baseline).
    pub effort_metric: f64,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Per-user aggregate of all game results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub user_id: String,
    #[serde(default)]
    pub results: BTreeMap<GameKind, GameResult>,
    /// Only set once every required game has a result.
    pub total_score: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AssessmentSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            results: BTreeMap::new(),
            total_score: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn result(&self, kind: GameKind) -> Option<&GameResult> {
        self.results.get(&kind)
    }

    pub fn has_attempted(&self, kind: GameKind) -> bool {
        self.results.contains_key(&kind)
    }
}

#[derive(Debug, Serialize)]
pub struct GameStatus {
    pub game: GameKind,
    pub unlocked: bool,
    pub attempted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_prerequisites: Vec<GameKind>,
    pub result: Option<GameResult>,
}

#[derive(Debug, Serialize)]
pub struct AssessmentOverview {
    pub user_id: String,
    pub games: Vec<GameStatus>,
    pub total_score: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
}
