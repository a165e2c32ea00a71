//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use scribe_market_core::MarketPolicy;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where the marketplace documents live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process memory only; for local development.
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub cors_origin: String,
    /// Lower-cased email domains allowed to sign up and sign in. Empty allows all.
    pub allowed_email_domains: Vec<String>,
    pub session_ttl: Duration,
    pub policy: MarketPolicy,
    pub sweep_interval: std::time::Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Store Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let store_backend = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
        };

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Auth Settings ---
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:5173".to_string());
        let allowed_email_domains = lookup("ALLOWED_EMAIL_DOMAINS")
            .map(|raw| {
                raw.split(',')
                    .map(|d| d.trim().trim_start_matches('@').to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let session_ttl = Duration::days(parse_number(&lookup, "SESSION_TTL_DAYS", 30)?);

        // --- Workflow Limits ---
        let policy = MarketPolicy {
            max_active_assignments: parse_number(&lookup, "MAX_ACTIVE_ASSIGNMENTS", 5)?,
            max_pending_requests: parse_number(&lookup, "MAX_PENDING_REQUESTS", 5)?,
            request_ttl: Duration::hours(parse_number(&lookup, "REQUEST_TTL_HOURS", 48)?),
        };
        let sweep_interval =
            std::time::Duration::from_secs(parse_number(&lookup, "SWEEP_INTERVAL_SECS", 60)?);

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            cors_origin,
            allowed_email_domains,
            session_ttl,
            policy,
            sweep_interval,
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("'{}' is not a number", raw))
        })?,
        None => default,
    };
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_for_memory_backend() {
        let config = load(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.policy.max_active_assignments, 5);
        assert_eq!(config.policy.request_ttl, Duration::hours(48));
        assert_eq!(config.session_ttl, Duration::days(30));
        assert_eq!(config.sweep_interval.as_secs(), 60);
        assert!(config.allowed_email_domains.is_empty());
    }

    #[test]
    fn postgres_requires_database_url() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn allowlist_is_normalised() {
        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("ALLOWED_EMAIL_DOMAINS", " @Campus.edu, ,example.org"),
        ])
        .unwrap();
        assert_eq!(config.allowed_email_domains, vec!["campus.edu", "example.org"]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("STORE_BACKEND", "mongo")]).is_err());
        assert!(load(&[("STORE_BACKEND", "memory"), ("REQUEST_TTL_HOURS", "soon")]).is_err());
        assert!(load(&[("STORE_BACKEND", "memory"), ("MAX_PENDING_REQUESTS", "0")]).is_err());
        assert!(load(&[("STORE_BACKEND", "memory"), ("RUST_LOG", "chatty")]).is_err());
    }
}
