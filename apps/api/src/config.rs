use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Upper bound for the availability probe. The probe runs on every uncached
/// request, so it must stay well inside the per-request budget.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub prediction_api_url: String,
    pub prediction_timeout: Duration,
    pub prediction_fetch_limit: u32,
    pub probe_timeout: Duration,
    pub probe_ttl: Duration,
    pub store_timeout: Duration,
    pub default_page_limit: u32,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let probe_timeout = Duration::from_millis(parse_env("PROBE_TIMEOUT_MS", 1_000)?);

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            prediction_api_url: require_env("PREDICTION_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            prediction_timeout: Duration::from_millis(parse_env("PREDICTION_TIMEOUT_MS", 2_500)?),
            prediction_fetch_limit: parse_env("PREDICTION_FETCH_LIMIT", 500)?,
            probe_timeout: probe_timeout.min(MAX_PROBE_TIMEOUT),
            probe_ttl: Duration::from_secs(parse_env("PROBE_TTL_SECS", 10)?),
            store_timeout: Duration::from_millis(parse_env("STORE_TIMEOUT_MS", 5_000)?),
            default_page_limit: parse_env::<u32>("DEFAULT_PAGE_LIMIT", 20)?.max(1),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
