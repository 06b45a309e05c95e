//! Process configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::services::ServiceSettings;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres connection string. Without one the service keeps its state in memory.
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub gateway_secret: String,
    pub verify_timeout: Duration,
    pub conflict_retries: u32,
    pub event_subject_prefix: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("database", &self.database_url.is_some())
            .field("nats_url", &self.nats_url)
            .field("verify_timeout", &self.verify_timeout)
            .field("conflict_retries", &self.conflict_retries)
            .field("event_subject_prefix", &self.event_subject_prefix)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            port: parse_or(&var, "PORT", 8083)?,
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
            gateway_secret: var("PAYMENT_GATEWAY_SECRET").ok_or(ConfigError::Missing("PAYMENT_GATEWAY_SECRET"))?,
            verify_timeout: Duration::from_millis(parse_or(&var, "PAYMENT_VERIFY_TIMEOUT_MS", 5000)?),
            conflict_retries: parse_or(&var, "CART_CONFLICT_RETRIES", 3)?,
            event_subject_prefix: var("EVENT_SUBJECT_PREFIX").unwrap_or_else(|| "storefront".to_string()),
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings { conflict_retries: self.conflict_retries, verify_timeout: self.verify_timeout }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
