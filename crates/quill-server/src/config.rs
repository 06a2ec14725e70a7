use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use quill_core::EngineConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub auth_secret: String,
    pub auth_clock_skew: Duration,
    pub ping_interval: Duration,
    pub inactivity_timeout: Duration,
    pub max_sync_attempts: u32,
    pub sync_backoff_base: Duration,
    pub create_dedup_window: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("auth_secret", &"[REDACTED]")
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("ping_interval", &self.ping_interval)
            .field("inactivity_timeout", &self.inactivity_timeout)
            .field("max_sync_attempts", &self.max_sync_attempts)
            .field("sync_backoff_base", &self.sync_backoff_base)
            .field("create_dedup_window", &self.create_dedup_window)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "QUILL_BIND_ADDR", "127.0.0.1:8080");
        let db_path = value_or_default(&lookup, "QUILL_DB_PATH", "quill.db");

        let auth_secret = required_trimmed(&lookup, "QUILL_AUTH_SECRET")?;
        if auth_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "QUILL_AUTH_SECRET must be at least 32 characters".to_string(),
            ));
        }

        let auth_clock_skew_secs = parse_in_range(
            &lookup,
            "QUILL_AUTH_CLOCK_SKEW_SECS",
            "60",
            0..=300,
        )?;
        let ping_interval_secs = parse_in_range(
            &lookup,
            "QUILL_PING_INTERVAL_SECS",
            "30",
            5..=300,
        )?;
        let inactivity_timeout_secs = parse_in_range(
            &lookup,
            "QUILL_INACTIVITY_TIMEOUT_SECS",
            "120",
            10..=3_600,
        )?;
        if inactivity_timeout_secs <= ping_interval_secs {
            return Err(ConfigError::Invalid(
                "QUILL_INACTIVITY_TIMEOUT_SECS must exceed QUILL_PING_INTERVAL_SECS".to_string(),
            ));
        }

        let max_sync_attempts =
            parse_in_range(&lookup, "QUILL_MAX_SYNC_ATTEMPTS", "3", 1..=10)?;
        let sync_backoff_base_ms =
            parse_in_range(&lookup, "QUILL_SYNC_BACKOFF_BASE_MS", "2000", 100..=60_000)?;
        let create_dedup_window_secs =
            parse_in_range(&lookup, "QUILL_CREATE_DEDUP_WINDOW_SECS", "30", 1..=3_600)?;

        Ok(Self {
            bind_addr,
            db_path,
            auth_secret,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            ping_interval: Duration::from_secs(ping_interval_secs),
            inactivity_timeout: Duration::from_secs(inactivity_timeout_secs),
            #[allow(clippy::cast_possible_truncation)]
            max_sync_attempts: max_sync_attempts as u32,
            sync_backoff_base: Duration::from_millis(sync_backoff_base_ms),
            create_dedup_window: Duration::from_secs(create_dedup_window_secs),
        })
    }

    /// Engine tuning derived from this server configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_sync_attempts: self.max_sync_attempts,
            backoff_base: self.sync_backoff_base,
            create_dedup_window: self.create_dedup_window,
            editing_inactivity_timeout: self.inactivity_timeout,
            ..EngineConfig::default()
        }
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let value = value_or_default(&lookup, name, default)
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be an integer in [{}, {}]",
                range.start(),
                range.end()
            ))
        })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn config_requires_auth_secret() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("QUILL_AUTH_SECRET"));
    }

    #[test]
    fn config_rejects_short_secret() {
        let mut map = HashMap::new();
        map.insert("QUILL_AUTH_SECRET", "short");
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("32 characters"));
    }

    #[test]
    fn config_redacts_secret_in_debug() {
        let mut map = HashMap::new();
        map.insert(
            "QUILL_AUTH_SECRET",
            "a-very-long-shared-secret-for-hs256-tokens",
        );
        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();

        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("a-very-long-shared-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn config_rejects_timeout_below_ping_interval() {
        let mut map = HashMap::new();
        map.insert(
            "QUILL_AUTH_SECRET",
            "a-very-long-shared-secret-for-hs256-tokens",
        );
        map.insert("QUILL_PING_INTERVAL_SECS", "60");
        map.insert("QUILL_INACTIVITY_TIMEOUT_SECS", "30");
        let err = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }
}
