use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::GameKind;

/// Raw row of the `system_settings` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub key: String,
    pub category: String,
    pub value: Document,
    #[serde(rename = "updatedBy", skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

/// Per-game time budget in seconds for scored attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBudgets {
    #[serde(default = "default_puzzle_budget")]
    pub unblock_me: u32,
    #[serde(default = "default_puzzle_budget")]
    pub minesweeper: u32,
    #[serde(default = "default_puzzle_budget")]
    pub water_capacity: u32,
    #[serde(default = "default_quiz_budget")]
    pub question_game: u32,
}

impl Default for TimeBudgets {
    fn default() -> Self {
        Self {
            unblock_me: default_puzzle_budget(),
            minesweeper: default_puzzle_budget(),
            water_capacity: default_puzzle_budget(),
            question_game: default_quiz_budget(),
        }
    }
}

impl TimeBudgets {
    pub fn for_game(&self, kind: GameKind) -> u32 {
        match kind {
            GameKind::UnblockMe => self.unblock_me,
            GameKind::Minesweeper => self.minesweeper,
            GameKind::WaterCapacity => self.water_capacity,
            GameKind::QuestionGame => self.question_game,
        }
    }
}

/// Assessment-wide settings editable by administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AssessmentSettings {
    #[serde(default)]
    pub available_roles: Vec<String>,
    /// Contact link (group chat invite) per role.
    #[serde(default)]
    pub contact_links: BTreeMap<String, String>,
    #[serde(default)]
    pub time_budgets: TimeBudgets,
}

#[derive(Debug, Serialize)]
pub struct PublicSettingsResponse {
    pub available_roles: Vec<String>,
    pub contact_links: BTreeMap<String, String>,
}

impl From<AssessmentSettings> for PublicSettingsResponse {
    fn from(settings: AssessmentSettings) -> Self {
        Self {
            available_roles: settings.available_roles,
            contact_links: settings.contact_links,
        }
    }
}

fn default_puzzle_budget() -> u32 {
    300
}

fn default_quiz_budget() -> u32 {
    600
}

pub(crate) mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bson_dt = bson::DateTime::from_millis(date.timestamp_millis());
        bson_dt.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}
