//! Runtime configuration read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use stockwise_core::TransitionPolicy;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_NOTIFICATION_BUFFER: usize = 256;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where the ledger lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres {
        url: String,
        max_connections: u32,
        run_migrations: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    /// `None` when `JWT_SECRET` is unset; the binary decides on a fallback.
    pub jwt_secret: Option<String>,
    pub transition_policy: TransitionPolicy,
    /// Capacity of the realtime broadcast channel feeding `/stream`.
    pub notification_buffer: usize,
    /// Longest wait for a row lock held by another transaction.
    pub lock_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            storage: StorageConfig::InMemory,
            jwt_secret: None,
            transition_policy: TransitionPolicy::default(),
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = parse(
            "BIND_ADDR",
            get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let persistent = match get("USE_PERSISTENT_STORES") {
            Some(value) => parse_bool("USE_PERSISTENT_STORES", &value)?,
            None => false,
        };
        let storage = if persistent {
            let url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
            let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
                Some(value) => parse("DATABASE_MAX_CONNECTIONS", value)?,
                None => DEFAULT_MAX_CONNECTIONS,
            };
            let run_migrations = match get("DATABASE_RUN_MIGRATIONS") {
                Some(value) => parse_bool("DATABASE_RUN_MIGRATIONS", &value)?,
                None => true,
            };
            StorageConfig::Postgres {
                url,
                max_connections,
                run_migrations,
            }
        } else {
            StorageConfig::InMemory
        };

        let transition_policy = match get("STATUS_TRANSITIONS") {
            Some(value) => value.parse().map_err(|e: stockwise_core::DomainError| {
                ConfigError::Invalid {
                    key: "STATUS_TRANSITIONS",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => TransitionPolicy::default(),
        };

        let notification_buffer: usize = match get("NOTIFICATION_BUFFER") {
            Some(value) => parse("NOTIFICATION_BUFFER", value)?,
            None => DEFAULT_NOTIFICATION_BUFFER,
        };
        if notification_buffer == 0 {
            return Err(ConfigError::Invalid {
                key: "NOTIFICATION_BUFFER",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let lock_timeout_ms: u64 = match get("LEDGER_LOCK_TIMEOUT_MS") {
            Some(value) => parse("LEDGER_LOCK_TIMEOUT_MS", value)?,
            None => DEFAULT_LOCK_TIMEOUT_MS,
        };

        Ok(Self {
            bind_addr,
            storage,
            jwt_secret: get("JWT_SECRET"),
            transition_policy,
            notification_buffer,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn persistent_storage_requires_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stockwise"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert_eq!(
            cfg.storage,
            StorageConfig::Postgres {
                url: "postgres://localhost/stockwise".to_string(),
                max_connections: 4,
                run_migrations: true,
            }
        );
    }

    #[test]
    fn strict_transitions_and_custom_buffer() {
        let cfg = config(&[
            ("STATUS_TRANSITIONS", "Strict"),
            ("NOTIFICATION_BUFFER", "16"),
            ("BIND_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();
        assert_eq!(cfg.transition_policy, TransitionPolicy::Strict);
        assert_eq!(cfg.notification_buffer, 16);
        assert_eq!(cfg.bind_addr.port(), 9000);
    }

    #[test]
    fn malformed_values_name_the_key() {
        match config(&[("DATABASE_MAX_CONNECTIONS", "x"), ("USE_PERSISTENT_STORES", "maybe")]) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "USE_PERSISTENT_STORES"),
            other => panic!("Expected Invalid, got {other:?}"),
        }
        assert!(matches!(
            config(&[("NOTIFICATION_BUFFER", "0")]),
            Err(ConfigError::Invalid { key: "NOTIFICATION_BUFFER", .. })
        ));
        assert!(matches!(
            config(&[("STATUS_TRANSITIONS", "loose")]),
            Err(ConfigError::Invalid { key: "STATUS_TRANSITIONS", .. })
        ));
    }
}
