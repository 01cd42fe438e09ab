use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AttemptError;
use crate::models::attempt::{AttemptMode, LiveAttemptSnapshot, PersistenceStatus};
use crate::models::{AssessmentOverview, AssessmentSession, GameKind, GameStatus};
use crate::services::attempt_runtime::{self, AttemptContext, AttemptHandle};
use crate::services::session_controller::AttemptSpec;
use crate::services::settings_service::SettingsService;
use crate::services::unlock_policy;

pub struct MountRequest {
    pub user_id: String,
    pub game: GameKind,
    pub quiz_id: Option<String>,
    pub mode: AttemptMode,
}

/// How long attempts stay registered.
#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    /// Time a finished attempt stays readable once its save has settled.
    pub retention: Duration,
    /// Age after which an attempt nobody finished is torn down.
    pub abandon_after: Duration,
    /// Period of the background sweep. Zero disables it.
    pub sweep_interval: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(300),
            abandon_after: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct Entry {
    handle: AttemptHandle,
    mounted_at: Instant,
    settled_since: Option<Instant>,
}

#[derive(Default)]
struct Attempts {
    by_id: HashMap<Uuid, Entry>,
    by_user: HashMap<String, Uuid>,
}

impl Attempts {
    fn remove(&mut self, attempt_id: Uuid) -> Option<AttemptHandle> {
        let entry = self.by_id.remove(&attempt_id)?;
        if self.by_user.get(entry.handle.user_id()) == Some(&attempt_id) {
            self.by_user.remove(entry.handle.user_id());
        }
        Some(entry.handle)
    }
}

enum SweepAction {
    Keep,
    Settled,
    Evict,
    Abandon,
}

/// Live attempts, at most one per user.
pub struct AttemptRegistry {
    ctx: AttemptContext,
    settings: Arc<SettingsService>,
    limits: RegistryLimits,
    attempts: RwLock<Attempts>,
}

impl AttemptRegistry {
    pub fn new(ctx: AttemptContext, settings: Arc<SettingsService>, limits: RegistryLimits) -> Self {
        Self {
            ctx,
            settings,
            limits,
            attempts: RwLock::new(Attempts::default()),
        }
    }

    /// Loads the user's assessment, or an empty one if none was stored yet.
    pub async fn load_session(&self, user_id: &str) -> Result<AssessmentSession, AttemptError> {
        let stored = self
            .ctx
            .lane
            .load(user_id)
            .await
            .map_err(|e| AttemptError::Persistence(format!("{:#}", e)))?;
        Ok(stored.unwrap_or_else(|| AssessmentSession::new(user_id)))
    }

    /// Stores an empty assessment for a user who has none. Existing progress,
    /// including a result decided but not yet written, is left untouched.
    pub async fn ensure_session(&self, user_id: &str) -> Result<AssessmentSession, AttemptError> {
        let (session, created) = self
            .ctx
            .lane
            .create_if_absent(AssessmentSession::new(user_id))
            .await
            .map_err(|e| AttemptError::Persistence(format!("{:#}", e)))?;
        if created {
            tracing::info!("Assessment created: user={}", user_id);
        }
        Ok(session)
    }

    pub async fn overview(&self, user_id: &str) -> Result<AssessmentOverview, AttemptError> {
        let session = self.load_session(user_id).await?;
        Ok(overview_of(&session))
    }

    /// Mounts a new attempt. Any previous attempt of the same user is
    /// disposed first, as if the page had navigated away. A refused entry
    /// leaves the previous attempt running.
    pub async fn mount(
        &self,
        request: MountRequest,
    ) -> Result<(AttemptHandle, LiveAttemptSnapshot), AttemptError> {
        let session = self.load_session(&request.user_id).await?;
        self.check_entry(&request, &session)?;

        let session = match self.detach_user(&request.user_id).await {
            Some(previous) => {
                tracing::info!(
                    "Disposing previous attempt on remount: attempt={}, user={}",
                    previous.attempt_id(),
                    request.user_id
                );
                // A task that already stopped has nothing left to tear down.
                let _ = previous.dispose().await;
                // The previous attempt may have decided a result meanwhile.
                let session = self.load_session(&request.user_id).await?;
                self.check_entry(&request, &session)?;
                session
            }
            None => session,
        };

        let budgets = self.settings.current().await.time_budgets;
        let spec = AttemptSpec {
            attempt_id: Uuid::new_v4(),
            user_id: request.user_id.clone(),
            game: request.game,
            quiz_id: request.quiz_id,
            mode: request.mode,
            time_budget_seconds: budgets.for_game(request.game),
        };
        tracing::info!(
            "Attempt mounted: attempt={}, user={}, game={}, mode={:?}, budget={}s",
            spec.attempt_id,
            spec.user_id,
            spec.game.as_str(),
            spec.mode,
            spec.time_budget_seconds
        );

        let attempt_id = spec.attempt_id;
        let handle = attempt_runtime::spawn(spec, session, self.ctx.clone());
        let snapshot = handle.snapshot().await?;

        let mut attempts = self.attempts.write().await;
        if let Some(raced) = attempts.by_user.insert(request.user_id, attempt_id) {
            // Two mounts for one user overlapped; the later one wins.
            if let Some(other) = attempts.by_id.remove(&raced) {
                tokio::spawn(async move {
                    let _ = other.handle.dispose().await;
                });
            }
        }
        attempts.by_id.insert(
            attempt_id,
            Entry {
                handle: handle.clone(),
                mounted_at: Instant::now(),
                settled_since: None,
            },
        );

        Ok((handle, snapshot))
    }

    pub async fn get(&self, attempt_id: Uuid) -> Result<AttemptHandle, AttemptError> {
        self.attempts
            .read()
            .await
            .by_id
            .get(&attempt_id)
            .map(|entry| entry.handle.clone())
            .ok_or(AttemptError::AttemptNotFound(attempt_id))
    }

    /// Removes the attempt and tears it down.
    pub async fn dispose(&self, attempt_id: Uuid) -> Result<LiveAttemptSnapshot, AttemptError> {
        let handle = self
            .attempts
            .write()
            .await
            .remove(attempt_id)
            .ok_or(AttemptError::AttemptNotFound(attempt_id))?;
        handle.dispose().await
    }

    pub async fn active_count(&self) -> usize {
        self.attempts.read().await.by_id.len()
    }

    /// Drops finished attempts whose save has settled for longer than the
    /// retention period, and tears down attempts abandoned before finishing.
    /// Returns how many attempts were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let entries: Vec<(Uuid, AttemptHandle, Instant, Option<Instant>)> = self
            .attempts
            .read()
            .await
            .by_id
            .iter()
            .map(|(id, entry)| (*id, entry.handle.clone(), entry.mounted_at, entry.settled_since))
            .collect();

        let mut removed = 0;
        for (attempt_id, handle, mounted_at, settled_since) in entries {
            let action = match handle.snapshot().await {
                // The task is gone.
                Err(_) => SweepAction::Evict,
                Ok(snapshot) => {
                    let settled = matches!(
                        snapshot.persistence,
                        PersistenceStatus::NotRequired | PersistenceStatus::Saved
                    );
                    let abandoned = now.duration_since(mounted_at) >= self.limits.abandon_after;
                    if snapshot.phase.is_terminal() && settled {
                        let since = settled_since.unwrap_or(now);
                        if now.duration_since(since) >= self.limits.retention {
                            SweepAction::Evict
                        } else {
                            SweepAction::Settled
                        }
                    } else if abandoned {
                        SweepAction::Abandon
                    } else {
                        SweepAction::Keep
                    }
                }
            };

            match action {
                SweepAction::Keep => {}
                SweepAction::Settled => {
                    if let Some(entry) = self.attempts.write().await.by_id.get_mut(&attempt_id) {
                        entry.settled_since.get_or_insert(now);
                    }
                }
                SweepAction::Evict => {
                    if self.attempts.write().await.remove(attempt_id).is_some() {
                        tracing::debug!("Attempt evicted: attempt={}", attempt_id);
                        removed += 1;
                    }
                }
                SweepAction::Abandon => {
                    if let Some(handle) = self.attempts.write().await.remove(attempt_id) {
                        tracing::info!(
                            "Tearing down abandoned attempt: attempt={}, user={}",
                            attempt_id,
                            handle.user_id()
                        );
                        let _ = handle.dispose().await;
                        removed += 1;
                    }
                }
            }
        }
        removed
    }

    /// Sweeps on the configured interval until the process stops.
    pub async fn run_sweeper(&self) {
        if self.limits.sweep_interval.is_zero() {
            tracing::info!("Attempt sweeper disabled");
            return;
        }
        tracing::info!(
            "Starting attempt sweeper (interval {}s)",
            self.limits.sweep_interval.as_secs()
        );

        loop {
            tokio::time::sleep(self.limits.sweep_interval).await;
            let removed = self.sweep().await;
            if removed > 0 {
                tracing::info!("Attempt sweep removed {} attempt(s)", removed);
            }
        }
    }

    fn check_entry(
        &self,
        request: &MountRequest,
        session: &AssessmentSession,
    ) -> Result<(), AttemptError> {
        unlock_policy::check_entry(request.game, request.mode, &session.results).inspect_err(|e| {
            tracing::info!(
                "Attempt refused: user={}, game={}, reason={}",
                request.user_id,
                request.game.as_str(),
                e
            );
        })
    }

    async fn detach_user(&self, user_id: &str) -> Option<AttemptHandle> {
        let mut attempts = self.attempts.write().await;
        let attempt_id = attempts.by_user.get(user_id).copied()?;
        attempts.remove(attempt_id)
    }
}

pub fn overview_of(session: &AssessmentSession) -> AssessmentOverview {
    let games = GameKind::ALL
        .iter()
        .map(|&game| GameStatus {
            game,
            unlocked: unlock_policy::is_unlocked(game, &session.results),
            attempted: session.has_attempted(game),
            missing_prerequisites: unlock_policy::missing_prerequisites(game, &session.results),
            result: session.result(game).cloned(),
        })
        .collect();

    AssessmentOverview {
        user_id: session.user_id.clone(),
        games,
        total_score: session.total_score,
        completed_at: session.completed_at,
    }
}
