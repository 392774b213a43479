use seatlock_core::EngineConfig;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub booking: BookingRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 { 15_000 }

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 { 30 }
fn default_acquire_timeout_seconds() -> u64 { 3 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    pub lock_ttl_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub io_timeout_ms: u64,
    #[serde(default = "default_max_advance_days")]
    pub max_advance_days: i64,
    pub catalog: CatalogConfig,
}

fn default_max_advance_days() -> i64 { 90 }

// Ten years ahead is far beyond any real booking window.
const MAX_ADVANCE_DAYS_LIMIT: i64 = 3650;

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub sections: Vec<String>,
    pub seats_per_section: u32,
    #[serde(default)]
    pub seed_on_startup: bool,
}

impl BookingRules {
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !(0..=MAX_ADVANCE_DAYS_LIMIT).contains(&self.max_advance_days) {
            return Err(config::ConfigError::Message(format!(
                "booking.max_advance_days must be between 0 and {}, got {}",
                MAX_ADVANCE_DAYS_LIMIT, self.max_advance_days
            )));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_ttl: Duration::from_secs(self.lock_ttl_seconds),
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `SEATLOCK__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("SEATLOCK").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.booking.validate()?;
        Ok(config)
    }
}
