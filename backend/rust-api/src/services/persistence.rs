use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use crate::metrics::ASSESSMENT_SAVES_TOTAL;
use crate::models::AssessmentSession;
use crate::services::assessment_store::AssessmentStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Write-behind path from decided sessions to the store.
///
/// Sessions decided by an attempt are recorded here first and flushed in the
/// background. Until the flush succeeds, reads through the lane see the
/// decided session rather than the stale stored one. Flushes for one user are
/// serialized and always write the newest decided session.
pub struct PersistenceLane {
    store: Arc<dyn AssessmentStore>,
    retry: RetryConfig,
    unsaved: Mutex<HashMap<String, AssessmentSession>>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PersistenceLane {
    pub fn new(store: Arc<dyn AssessmentStore>, retry: RetryConfig) -> Self {
        Self {
            store,
            retry,
            unsaved: Mutex::new(HashMap::new()),
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(&self, user_id: &str) -> Result<Option<AssessmentSession>> {
        if let Some(session) = self.unsaved(user_id) {
            return Ok(Some(session));
        }
        self.store.get_assessment_by_user_id(user_id).await
    }

    pub fn record(&self, session: AssessmentSession) {
        self.unsaved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.user_id.clone(), session);
    }

    pub fn has_unsaved(&self, user_id: &str) -> bool {
        self.unsaved(user_id).is_some()
    }

    fn unsaved(&self, user_id: &str) -> Option<AssessmentSession> {
        self.unsaved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Drops the user's flush lock once nothing is left to write and no other
    /// flush holds or waits on it.
    fn release_user_lock(&self, user_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and the caller hold the only references.
        if Arc::strong_count(lock) == 2 && !self.has_unsaved(user_id) {
            locks.remove(user_id);
        }
    }

    /// Writes the newest decided session for `user_id`, retrying transient
    /// failures. Succeeds immediately when a later flush already wrote it.
    pub async fn flush(&self, user_id: &str) -> Result<()> {
        let lock = self.user_lock(user_id);
        let guard = lock.lock().await;
        let result = self.flush_locked(user_id).await;
        drop(guard);
        self.release_user_lock(user_id, &lock);
        result
    }

    /// Stores `session` only if the user has no assessment yet, neither
    /// stored nor decided and waiting to be written. Returns the session that
    /// is current afterwards and whether it was created.
    ///
    /// Runs under the user's flush lock, so a decided session cannot be
    /// written between the existence check and the insert.
    pub async fn create_if_absent(
        &self,
        session: AssessmentSession,
    ) -> Result<(AssessmentSession, bool)> {
        let user_id = session.user_id.clone();
        let lock = self.user_lock(&user_id);
        let guard = lock.lock().await;

        let result = self.create_locked(session).await;
        drop(guard);
        self.release_user_lock(&user_id, &lock);
        result
    }

    async fn create_locked(&self, session: AssessmentSession) -> Result<(AssessmentSession, bool)> {
        let user_id = session.user_id.clone();
        if let Some(existing) = self.load(&user_id).await? {
            return Ok((existing, false));
        }

        {
            let mut unsaved = self.unsaved.lock().unwrap_or_else(PoisonError::into_inner);
            // An attempt may have decided a session while the store was read.
            if let Some(decided) = unsaved.get(&user_id) {
                return Ok((decided.clone(), false));
            }
            unsaved.insert(user_id.clone(), session.clone());
        }

        self.flush_locked(&user_id).await?;
        Ok((session, true))
    }

    async fn flush_locked(&self, user_id: &str) -> Result<()> {
        let Some(session) = self.unsaved(user_id) else {
            return Ok(());
        };

        let saved = retry_async_with_config(self.retry.clone(), || {
            self.store.save_assessment(&session)
        })
        .await;

        match saved {
            Ok(()) => {
                ASSESSMENT_SAVES_TOTAL.with_label_values(&["saved"]).inc();
                let mut unsaved = self.unsaved.lock().unwrap_or_else(PoisonError::into_inner);
                if unsaved.get(user_id) == Some(&session) {
                    unsaved.remove(user_id);
                }
                tracing::info!("Assessment persisted: user={}", user_id);
                Ok(())
            }
            Err(e) => {
                ASSESSMENT_SAVES_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!("Assessment save failed after retries: user={}, error={:#}", user_id, e);
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.user_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
