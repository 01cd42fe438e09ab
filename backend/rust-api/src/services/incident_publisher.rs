use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::metrics::{track_cache_operation, ANTICHEAT_VIOLATIONS_TOTAL};
use crate::models::anticheat::{IncidentType, ViolationIncident};

const INCIDENTS_CHANNEL: &str = "incidents";

#[async_trait]
pub trait IncidentPublisher: Send + Sync {
    async fn publish(&self, incident: &ViolationIncident) -> Result<()>;
}

/// Publishes incidents on the Redis `incidents` channel.
pub struct RedisIncidentPublisher {
    redis: ConnectionManager,
}

impl RedisIncidentPublisher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl IncidentPublisher for RedisIncidentPublisher {
    async fn publish(&self, incident: &ViolationIncident) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload =
            serde_json::to_string(incident).context("Failed to serialize incident for pub/sub")?;

        track_cache_operation("publish", async {
            let _: () = redis::cmd("PUBLISH")
                .arg(INCIDENTS_CHANNEL)
                .arg(&payload)
                .query_async(&mut conn)
                .await
                .context("Failed to publish incident to Redis Pub/Sub")?;
            Ok(())
        })
        .await?;

        tracing::info!(
            "Incident published to Redis Pub/Sub: channel={}, id={}",
            INCIDENTS_CHANNEL,
            incident.id
        );
        Ok(())
    }
}

/// Used when Redis is not configured: incidents only reach the log.
pub struct LogIncidentPublisher;

#[async_trait]
impl IncidentPublisher for LogIncidentPublisher {
    async fn publish(&self, incident: &ViolationIncident) -> Result<()> {
        tracing::info!(
            "Incident recorded: attempt={}, user={}, type={:?}, action={:?}",
            incident.attempt_id,
            incident.user_id,
            incident.incident_type,
            incident.action_taken
        );
        Ok(())
    }
}

/// Counts the incident and publishes it without blocking the caller.
pub fn dispatch(publisher: std::sync::Arc<dyn IncidentPublisher>, incident: ViolationIncident) {
    let label = match incident.incident_type {
        IncidentType::TabSwitch => "tab_switch",
        IncidentType::ExternalDisqualification => "external_disqualification",
    };
    ANTICHEAT_VIOLATIONS_TOTAL.with_label_values(&[label]).inc();

    tokio::spawn(async move {
        if let Err(e) = publisher.publish(&incident).await {
            tracing::warn!("Failed to publish incident {}: {:#}", incident.id, e);
        }
    });
}
