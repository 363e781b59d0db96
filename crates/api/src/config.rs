//! Application configuration loaded from environment variables.

use std::time::Duration;

use dispatch::{DEFAULT_OFFER_TTL, DEFAULT_SWEEP_INTERVAL, OfferPolicy};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
/// - `DATABASE_URL` — PostgreSQL URL; unset keeps every store in memory
/// - `OFFER_TTL_SECS` — offer lifetime, clamped to 60–120 (default: `90`)
/// - `OFFER_SWEEP_INTERVAL_SECS` — expiry sweep period (default: `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub offer_ttl_secs: u64,
    pub offer_sweep_interval_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            offer_ttl_secs: number("OFFER_TTL_SECS", defaults.offer_ttl_secs),
            offer_sweep_interval_secs: number(
                "OFFER_SWEEP_INTERVAL_SECS",
                defaults.offer_sweep_interval_secs,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn offer_policy(&self) -> OfferPolicy {
        OfferPolicy::new(Duration::from_secs(self.offer_ttl_secs))
            .with_sweep_interval(Duration::from_secs(self.offer_sweep_interval_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            offer_ttl_secs: DEFAULT_OFFER_TTL.as_secs(),
            offer_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.offer_ttl_secs, 90);
        assert_eq!(config.offer_sweep_interval_secs, 5);
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/transfers"),
            ("OFFER_TTL_SECS", "75"),
        ]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/transfers")
        );
        assert_eq!(config.offer_policy().ttl(), Duration::from_secs(75));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = from_pairs(&[("PORT", "http"), ("OFFER_TTL_SECS", "-1"), ("DATABASE_URL", " ")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.offer_ttl_secs, 90);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_offer_ttl_is_clamped() {
        let config = from_pairs(&[("OFFER_TTL_SECS", "600")]);
        assert_eq!(config.offer_policy().ttl(), Duration::from_secs(120));
    }
}
