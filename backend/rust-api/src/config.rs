use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::system_settings::TimeBudgets;
use crate::services::attempt_registry::RegistryLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Mongo,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub storage_backend: StorageBackend,
    pub mongo_uri: String,
    pub mongo_database: String,
    /// Incident publishing is enabled only when set.
    pub redis_uri: Option<String>,
    /// Zero disables the background clock.
    pub tick_interval_ms: u64,
    pub settings_cache_ttl_seconds: u64,
    pub default_budgets: TimeBudgets,
    /// Seconds a finished attempt stays readable after its save settled.
    pub attempt_retention_seconds: u64,
    pub attempt_abandon_after_seconds: u64,
    /// Zero disables the attempt sweeper.
    pub attempt_sweep_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            storage_backend: StorageBackend::Memory,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            mongo_database: "proctor".to_string(),
            redis_uri: None,
            tick_interval_ms: 1000,
            settings_cache_ttl_seconds: 60,
            default_budgets: TimeBudgets::default(),
            attempt_retention_seconds: 300,
            attempt_abandon_after_seconds: 7200,
            attempt_sweep_interval_seconds: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let storage_backend = match settings.get_string("storage.backend") {
            Ok(value) => parse_backend(&value)?,
            Err(_) => defaults.storage_backend,
        };

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or(defaults.mongo_uri);

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.is_empty());

        let tick_interval_ms = read_u64(&settings, "clock.tick_interval_ms", defaults.tick_interval_ms)?;
        let settings_cache_ttl_seconds = read_u64(
            &settings,
            "settings.cache_ttl_seconds",
            defaults.settings_cache_ttl_seconds,
        )?;

        let attempt_retention_seconds = read_u64(
            &settings,
            "attempts.retention_seconds",
            defaults.attempt_retention_seconds,
        )?;
        let attempt_abandon_after_seconds = read_u64(
            &settings,
            "attempts.abandon_after_seconds",
            defaults.attempt_abandon_after_seconds,
        )?;
        let attempt_sweep_interval_seconds = read_u64(
            &settings,
            "attempts.sweep_interval_seconds",
            defaults.attempt_sweep_interval_seconds,
        )?;

        let budgets = defaults.default_budgets;
        let default_budgets = TimeBudgets {
            unblock_me: read_u32(&settings, "budgets.unblock_me", budgets.unblock_me)?,
            minesweeper: read_u32(&settings, "budgets.minesweeper", budgets.minesweeper)?,
            water_capacity: read_u32(&settings, "budgets.water_capacity", budgets.water_capacity)?,
            question_game: read_u32(&settings, "budgets.question_game", budgets.question_game)?,
        };

        Ok(Config {
            bind_addr,
            storage_backend,
            mongo_uri,
            mongo_database,
            redis_uri,
            tick_interval_ms,
            settings_cache_ttl_seconds,
            default_budgets,
            attempt_retention_seconds,
            attempt_abandon_after_seconds,
            attempt_sweep_interval_seconds,
        })
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }

    pub fn settings_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.settings_cache_ttl_seconds)
    }

    pub fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            retention: Duration::from_secs(self.attempt_retention_seconds),
            abandon_after: Duration::from_secs(self.attempt_abandon_after_seconds),
            sweep_interval: Duration::from_secs(self.attempt_sweep_interval_seconds),
        }
    }
}

fn parse_backend(value: &str) -> Result<StorageBackend, config::ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(StorageBackend::Memory),
        "mongo" => Ok(StorageBackend::Mongo),
        other => Err(config::ConfigError::Message(format!(
            "storage.backend must be 'memory' or 'mongo', got '{}'",
            other
        ))),
    }
}

fn read_u64(settings: &config::Config, key: &str, default: u64) -> Result<u64, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) => u64::try_from(value)
            .map_err(|_| config::ConfigError::Message(format!("{} must not be negative", key))),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

fn read_u32(settings: &config::Config, key: &str, default: u32) -> Result<u32, config::ConfigError> {
    let value = read_u64(settings, key, u64::from(default))?;
    u32::try_from(value).map_err(|_| config::ConfigError::Message(format!("{} is too large", key)))
}
