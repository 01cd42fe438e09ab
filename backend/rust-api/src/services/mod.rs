use std::sync::Arc;

use anyhow::Context;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::config::{Config, StorageBackend};
use crate::models::system_settings::AssessmentSettings;
use crate::utils::retry::RetryConfig;

use assessment_store::{AssessmentStore, InMemoryAssessmentStore, MongoAssessmentStore};
use attempt_registry::AttemptRegistry;
use attempt_runtime::AttemptContext;
use incident_publisher::{IncidentPublisher, LogIncidentPublisher, RedisIncidentPublisher};
use persistence::PersistenceLane;
use settings_service::{MongoSettingsSource, SettingsService, SettingsSource, StaticSettingsSource};

pub mod assessment_store;
pub mod attempt_registry;
pub mod attempt_runtime;
pub mod clock;
pub mod incident_publisher;
pub mod persistence;
pub mod score_aggregator;
pub mod session_controller;
pub mod settings_service;
pub mod unlock_policy;
pub mod violation_monitor;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AssessmentStore>,
    pub lane: Arc<PersistenceLane>,
    pub settings: Arc<SettingsService>,
    pub registry: AttemptRegistry,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    /// Connects the backends named in `config`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let redis = match &config.redis_uri {
            Some(uri) => Some(connect_redis(uri).await?),
            None => {
                tracing::info!("Redis not configured, incidents are only logged");
                None
            }
        };
        let incidents: Arc<dyn IncidentPublisher> = match &redis {
            Some(redis) => Arc::new(RedisIncidentPublisher::new(redis.clone())),
            None => Arc::new(LogIncidentPublisher),
        };

        let defaults = AssessmentSettings {
            time_budgets: config.default_budgets,
            ..Default::default()
        };

        let (store, source): (Arc<dyn AssessmentStore>, Box<dyn SettingsSource>) =
            match config.storage_backend {
                StorageBackend::Memory => {
                    tracing::info!("Using in-memory assessment store");
                    (
                        Arc::new(InMemoryAssessmentStore::new()),
                        Box::new(StaticSettingsSource::new(defaults.clone())),
                    )
                }
                StorageBackend::Mongo => {
                    let client = MongoClient::with_uri_str(&config.mongo_uri)
                        .await
                        .context("Failed to create MongoDB client")?;
                    let mongo = client.database(&config.mongo_database);
                    tracing::info!("Using MongoDB assessment store: db={}", config.mongo_database);
                    let settings_source = MongoSettingsSource::new(mongo.clone());
                    seed_settings(&settings_source, &defaults).await;
                    (
                        Arc::new(MongoAssessmentStore::new(mongo)),
                        Box::new(settings_source),
                    )
                }
            };

        Ok(Self::assemble(
            config,
            store,
            source,
            defaults,
            incidents,
            redis,
            RetryConfig::aggressive(),
        ))
    }

    /// In-process state with no external services.
    pub fn in_memory(config: Config, store: Arc<InMemoryAssessmentStore>) -> Self {
        let defaults = AssessmentSettings {
            time_budgets: config.default_budgets,
            ..Default::default()
        };
        Self::assemble(
            config,
            store,
            Box::new(StaticSettingsSource::new(defaults.clone())),
            defaults,
            Arc::new(LogIncidentPublisher),
            None,
            RetryConfig::immediate(1),
        )
    }

    fn assemble(
        config: Config,
        store: Arc<dyn AssessmentStore>,
        source: Box<dyn SettingsSource>,
        defaults: AssessmentSettings,
        incidents: Arc<dyn IncidentPublisher>,
        redis: Option<ConnectionManager>,
        retry: RetryConfig,
    ) -> Self {
        let lane = Arc::new(PersistenceLane::new(store.clone(), retry));
        let settings = Arc::new(SettingsService::new(
            source,
            defaults,
            config.settings_cache_ttl(),
        ));
        let registry = AttemptRegistry::new(
            AttemptContext {
                lane: lane.clone(),
                incidents,
                tick_interval: config.tick_interval(),
            },
            settings.clone(),
            config.registry_limits(),
        );

        Self {
            config,
            store,
            lane,
            settings,
            registry,
            redis,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");
    let client = redis::Client::open(uri).context("Invalid Redis URI")?;

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

/// Writes the configured defaults on first boot so administrators have a
/// settings document to edit.
async fn seed_settings(source: &MongoSettingsSource, defaults: &AssessmentSettings) {
    match source.fetch().await {
        Ok(Some(_)) => {}
        Ok(None) => match source.upsert(defaults, "system").await {
            Ok(()) => tracing::info!("Seeded default assessment settings"),
            Err(e) => tracing::warn!("Failed to seed assessment settings: {:#}", e),
        },
        Err(e) => tracing::warn!("Could not read assessment settings: {:#}", e),
    }
}
