use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use keyward_auth::{DEFAULT_TOKEN_TTL_HOURS, LedgerConfig, RefresherConfig};

/// Upper bound for `TOKEN_TTL_HOURS` (100 years).
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 100;

/// Upper bound for the millisecond timeouts (one hour).
pub const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; `None` runs on the in-memory store.
    pub database_url: Option<String>,
    /// Token validity in hours; `0` issues tokens without time expiry.
    pub token_ttl_hours: i64,
    pub last_used_queue_capacity: usize,
    pub last_used_timeout: Duration,
    /// Deadline handed to every ledger/resolver call made for a request.
    pub request_timeout: Duration,
    /// Display name of an administrator to create at startup.
    pub bootstrap_admin: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            last_used_queue_capacity: 1024,
            last_used_timeout: Duration::from_millis(2000),
            request_timeout: Duration::from_millis(5000),
            bootstrap_admin: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token_ttl_hours: i64 = parse_or(&lookup, "TOKEN_TTL_HOURS", defaults.token_ttl_hours)?;
        if !(0..=MAX_TOKEN_TTL_HOURS).contains(&token_ttl_hours) {
            anyhow::bail!("TOKEN_TTL_HOURS must be between 0 and {MAX_TOKEN_TTL_HOURS}");
        }

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            database_url: non_empty("DATABASE_URL"),
            token_ttl_hours,
            last_used_queue_capacity: parse_or(
                &lookup,
                "LAST_USED_QUEUE_CAPACITY",
                defaults.last_used_queue_capacity,
            )?,
            last_used_timeout: timeout_ms(&lookup, "LAST_USED_TIMEOUT_MS", defaults.last_used_timeout)?,
            request_timeout: timeout_ms(&lookup, "REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            bootstrap_admin: non_empty("BOOTSTRAP_ADMIN_LABEL"),
        })
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        if self.token_ttl_hours == 0 {
            LedgerConfig::default().without_expiry()
        } else {
            LedgerConfig::default().with_ttl(chrono::Duration::hours(self.token_ttl_hours))
        }
    }

    pub fn refresher_config(&self) -> RefresherConfig {
        RefresherConfig::default()
            .with_queue_capacity(self.last_used_queue_capacity)
            .with_update_timeout(self.last_used_timeout)
    }
}

fn timeout_ms(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let ms: u64 = parse_or(lookup, key, default.as_millis() as u64)?;
    if ms > MAX_TIMEOUT_MS {
        anyhow::bail!("{key} must be at most {MAX_TIMEOUT_MS}");
    }
    Ok(Duration::from_millis(ms))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid value, got {raw:?}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.token_ttl_hours, 48);
        assert_eq!(
            cfg.ledger_config().token_ttl,
            Some(chrono::Duration::hours(48))
        );
    }

    #[test]
    fn values_are_parsed() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/keyward"),
            ("TOKEN_TTL_HOURS", "0"),
            ("REQUEST_TIMEOUT_MS", "250"),
            ("BOOTSTRAP_ADMIN_LABEL", "root"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/keyward"));
        assert_eq!(cfg.ledger_config().token_ttl, None);
        assert_eq!(cfg.request_timeout, Duration::from_millis(250));
        assert_eq!(cfg.bootstrap_admin.as_deref(), Some("root"));
    }

    #[test]
    fn invalid_numbers_are_reported_with_the_key() {
        let err = AppConfig::from_lookup(lookup(&[("LAST_USED_QUEUE_CAPACITY", "lots")])).unwrap_err();
        assert!(err.to_string().contains("LAST_USED_QUEUE_CAPACITY"));

        assert!(AppConfig::from_lookup(lookup(&[("TOKEN_TTL_HOURS", "-1")])).is_err());
    }

    #[test]
    fn ttl_beyond_the_bound_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("TOKEN_TTL_HOURS", "10000000000")])).unwrap_err();
        assert!(err.to_string().contains("TOKEN_TTL_HOURS"));

        let max = MAX_TOKEN_TTL_HOURS.to_string();
        let cfg = AppConfig::from_lookup(lookup(&[("TOKEN_TTL_HOURS", max.as_str())])).unwrap();
        assert_eq!(
            cfg.ledger_config().token_ttl,
            Some(chrono::Duration::hours(MAX_TOKEN_TTL_HOURS))
        );
    }

    #[test]
    fn timeouts_beyond_the_bound_are_rejected() {
        let huge = u64::MAX.to_string();
        for key in ["REQUEST_TIMEOUT_MS", "LAST_USED_TIMEOUT_MS"] {
            let err = AppConfig::from_lookup(lookup(&[(key, huge.as_str())])).unwrap_err();
            assert!(err.to_string().contains(key));
        }

        let cfg = AppConfig::from_lookup(lookup(&[("REQUEST_TIMEOUT_MS", "3600000")])).unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(3600));
    }
}
