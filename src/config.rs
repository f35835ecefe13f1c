use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::hub::HubConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    /// Longest a single socket write may take before the client is dropped
    pub write_timeout: Duration,
    pub hub: HubConfig,
}

impl Config {
    /// Reads the process environment, with `.env` as fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = HubConfig::default();

        let hub = HubConfig {
            room_queue_capacity: positive(&lookup, "ROOM_QUEUE_CAPACITY", defaults.room_queue_capacity)?,
            outbox_capacity: positive(&lookup, "OUTBOX_CAPACITY", defaults.outbox_capacity)?,
            history_tail: parse(&lookup, "HISTORY_TAIL", defaults.history_tail)?,
            room_idle_timeout: Duration::from_secs(parse(
                &lookup,
                "ROOM_IDLE_SECS",
                defaults.room_idle_timeout.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(positive(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
        };

        Ok(Self {
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 4000)))?,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://chat.db?mode=rwc".to_owned()),
            db_max_connections: positive(&lookup, "DB_MAX_CONNECTIONS", 16)?,
            write_timeout: Duration::from_secs(positive(&lookup, "WRITE_TIMEOUT_SECS", 10)?),
            hub,
        })
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };

    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.clone(),
    })
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: lookup(key).unwrap_or_default(),
        });
    }
    Ok(value)
}
