use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mongodb::{
    bson::{doc, from_document, to_document},
    Database,
};
use tokio::sync::RwLock;

use crate::metrics::{record_cache_hit, record_cache_miss};
use crate::models::system_settings::{AssessmentSettings, SystemSetting};

const KEY_ASSESSMENT: &str = "assessment";

/// Backing source of assessment settings.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn fetch(&self) -> Result<Option<AssessmentSettings>>;
}

/// Settings fixed at startup from configuration.
pub struct StaticSettingsSource {
    settings: AssessmentSettings,
}

impl StaticSettingsSource {
    pub fn new(settings: AssessmentSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsSource for StaticSettingsSource {
    async fn fetch(&self) -> Result<Option<AssessmentSettings>> {
        Ok(Some(self.settings.clone()))
    }
}

pub struct MongoSettingsSource {
    mongo: Database,
}

impl MongoSettingsSource {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    pub async fn upsert(&self, settings: &AssessmentSettings, updated_by: &str) -> Result<()> {
        let collection = self.mongo.collection::<SystemSetting>("system_settings");
        let value_doc = to_document(settings).context("Failed to serialize settings value")?;
        let now = mongodb::bson::DateTime::from_millis(Utc::now().timestamp_millis());

        collection
            .update_one(
                doc! { "key": KEY_ASSESSMENT },
                doc! {
                    "$set": {
                        "key": KEY_ASSESSMENT,
                        "category": "assessment",
                        "value": value_doc,
                        "updatedBy": updated_by,
                        "updatedAt": now,
                    }
                },
            )
            .upsert(true)
            .await
            .context("Failed to upsert assessment settings")?;

        Ok(())
    }
}

#[async_trait]
impl SettingsSource for MongoSettingsSource {
    async fn fetch(&self) -> Result<Option<AssessmentSettings>> {
        let collection = self.mongo.collection::<SystemSetting>("system_settings");
        match collection
            .find_one(doc! { "key": KEY_ASSESSMENT })
            .await
            .context("Failed to query assessment settings")?
        {
            Some(setting) => {
                let parsed = from_document(setting.value)
                    .map_err(|e| anyhow!("Failed to parse assessment settings: {e}"))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }
}

struct CachedSettings {
    fetched_at: Instant,
    settings: AssessmentSettings,
}

/// Settings lookup with a time-based cache in front of the source.
///
/// A failed refresh serves the last cached value, or the defaults if nothing
/// was ever fetched, and is not retried before the TTL has passed again.
pub struct SettingsService {
    source: Box<dyn SettingsSource>,
    defaults: AssessmentSettings,
    ttl: Duration,
    cache: RwLock<Option<CachedSettings>>,
}

impl SettingsService {
    pub fn new(source: Box<dyn SettingsSource>, defaults: AssessmentSettings, ttl: Duration) -> Self {
        Self {
            source,
            defaults,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> AssessmentSettings {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                record_cache_hit();
                return cached.settings.clone();
            }
        }
        record_cache_miss();

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return cached.settings.clone();
            }
        }

        match self.source.fetch().await {
            Ok(fetched) => {
                let settings = fetched.unwrap_or_else(|| self.defaults.clone());
                *cache = Some(CachedSettings {
                    fetched_at: Instant::now(),
                    settings: settings.clone(),
                });
                settings
            }
            Err(e) => {
                tracing::warn!("Settings refresh failed, serving cached value: {:#}", e);
                let settings = cache
                    .as_ref()
                    .map(|cached| cached.settings.clone())
                    .unwrap_or_else(|| self.defaults.clone());
                // Next attempt after another full TTL.
                *cache = Some(CachedSettings {
                    fetched_at: Instant::now(),
                    settings: settings.clone(),
                });
                settings
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SettingsSource for CountingSource {
        async fn fetch(&self) -> Result<Option<AssessmentSettings>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("source down"));
            }
            Ok(Some(AssessmentSettings {
                available_roles: vec![format!("role-{n}")],
                ..Default::default()
            }))
        }
    }

    fn service(ttl: Duration) -> (SettingsService, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            calls: calls.clone(),
            failing: failing.clone(),
        };
        (
            SettingsService::new(Box::new(source), AssessmentSettings::default(), ttl),
            calls,
            failing,
        )
    }

    #[tokio::test]
    async fn serves_from_cache_within_ttl() {
        let (service, calls, _) = service(Duration::from_secs(60));
        let first = service.current().await;
        let second = service.current().await;
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refetches_after_invalidate() {
        let (service, calls, _) = service(Duration::from_secs(60));
        service.current().await;
        service.invalidate().await;
        let refreshed = service.current().await;
        assert_eq!(refreshed.available_roles, vec!["role-1".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_value() {
        let (service, _, failing) = service(Duration::ZERO);
        let first = service.current().await;
        failing.store(true, Ordering::SeqCst);
        let second = service.current().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn failure_without_cache_falls_back_to_defaults() {
        let (service, _, failing) = service(Duration::from_secs(60));
        failing.store(true, Ordering::SeqCst);
        assert_eq!(service.current().await, AssessmentSettings::default());
    }

    #[tokio::test]
    async fn failed_refresh_is_not_retried_within_ttl() {
        let (service, calls, failing) = service(Duration::from_secs(60));
        failing.store(true, Ordering::SeqCst);

        for _ in 0..5 {
            assert_eq!(service.current().await, AssessmentSettings::default());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        failing.store(false, Ordering::SeqCst);
        service.invalidate().await;
        assert_eq!(service.current().await.available_roles, vec!["role-1".to_string()]);
    }
}
