use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::Database;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::metrics::track_db_operation;
use crate::models::system_settings::bson_datetime_as_chrono;
use crate::models::{AssessmentSession, GameKind, GameResult};

/// External key-value store holding one assessment per user.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn get_assessment_by_user_id(&self, user_id: &str) -> Result<Option<AssessmentSession>>;

    /// Upsert keyed by `user_id`.
    async fn save_assessment(&self, session: &AssessmentSession) -> Result<()>;

    /// Liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAssessmentStore {
    sessions: RwLock<HashMap<String, AssessmentSession>>,
    saves: AtomicUsize,
    failures_left: AtomicUsize,
}

impl InMemoryAssessmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes the next `count` saves fail, to exercise retry paths.
    pub fn fail_next_saves(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl AssessmentStore for InMemoryAssessmentStore {
    async fn get_assessment_by_user_id(&self, user_id: &str) -> Result<Option<AssessmentSession>> {
        Ok(self.sessions.read().await.get(user_id).cloned())
    }

    async fn save_assessment(&self, session: &AssessmentSession) -> Result<()> {
        let injected_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected_failure {
            return Err(anyhow!("assessment store unavailable"));
        }

        self.sessions
            .write()
            .await
            .insert(session.user_id.clone(), session.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Stored form of an assessment. BSON needs string map keys.
#[derive(Debug, Serialize, Deserialize)]
struct AssessmentDocument {
    #[serde(rename = "_id")]
    user_id: String,
    #[serde(default)]
    results: BTreeMap<String, StoredResult>,
    total_score: Option<i64>,
    completed_at: Option<i64>,
    #[serde(with = "bson_datetime_as_chrono")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResult {
    puzzles_completed: i64,
    time_spent_seconds: i64,
    effort_metric: f64,
    #[serde(with = "bson_datetime_as_chrono")]
    completed_at: DateTime<Utc>,
    #[serde(default)]
    failed: bool,
    failure_reason: Option<String>,
}

impl From<&AssessmentSession> for AssessmentDocument {
    fn from(session: &AssessmentSession) -> Self {
        let results = session
            .results
            .iter()
            .map(|(kind, result)| {
                (
                    kind.as_str().to_string(),
                    StoredResult {
                        puzzles_completed: i64::from(result.puzzles_completed),
                        time_spent_seconds: i64::from(result.time_spent_seconds),
                        effort_metric: result.effort_metric,
                        completed_at: result.completed_at,
                        failed: result.failed,
                        failure_reason: result.failure_reason.clone(),
                    },
                )
            })
            .collect();

        Self {
            user_id: session.user_id.clone(),
            results,
            total_score: session.total_score.map(|total| total as i64),
            completed_at: session.completed_at.map(|at| at.timestamp_millis()),
            created_at: session.created_at,
        }
    }
}

impl TryFrom<AssessmentDocument> for AssessmentSession {
    type Error = anyhow::Error;

    fn try_from(document: AssessmentDocument) -> Result<Self> {
        let mut results = BTreeMap::new();
        for (key, stored) in document.results {
            let kind: GameKind = key
                .parse()
                .with_context(|| format!("Unknown game key in stored assessment: {key}"))?;
            results.insert(
                kind,
                GameResult {
                    puzzles_completed: u32::try_from(stored.puzzles_completed)
                        .context("Stored puzzles_completed out of range")?,
                    time_spent_seconds: u32::try_from(stored.time_spent_seconds)
                        .context("Stored time_spent_seconds out of range")?,
                    effort_metric: stored.effort_metric,
                    completed_at: stored.completed_at,
                    failed: stored.failed,
                    failure_reason: stored.failure_reason,
                },
            );
        }

        Ok(AssessmentSession {
            user_id: document.user_id,
            results,
            total_score: document
                .total_score
                .map(u64::try_from)
                .transpose()
                .context("Stored total_score is negative")?,
            completed_at: document
                .completed_at
                .and_then(DateTime::from_timestamp_millis),
            created_at: document.created_at,
        })
    }
}

const ASSESSMENTS_COLLECTION: &str = "assessments";

pub struct MongoAssessmentStore {
    mongo: Database,
}

impl MongoAssessmentStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> mongodb::Collection<AssessmentDocument> {
        self.mongo.collection(ASSESSMENTS_COLLECTION)
    }
}

#[async_trait]
impl AssessmentStore for MongoAssessmentStore {
    async fn get_assessment_by_user_id(&self, user_id: &str) -> Result<Option<AssessmentSession>> {
        let document = track_db_operation("find_one", ASSESSMENTS_COLLECTION, async {
            self.collection()
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to query assessment")
        })
        .await?;

        document.map(AssessmentSession::try_from).transpose()
    }

    async fn save_assessment(&self, session: &AssessmentSession) -> Result<()> {
        let document = AssessmentDocument::from(session);
        track_db_operation("replace_one", ASSESSMENTS_COLLECTION, async {
            self.collection()
                .replace_one(doc! { "_id": &session.user_id }, &document)
                .upsert(true)
                .await
                .context("Failed to upsert assessment")
        })
        .await?;

        tracing::debug!("Assessment saved to MongoDB: user={}", session.user_id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }
}
