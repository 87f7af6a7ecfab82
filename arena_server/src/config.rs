//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use skill_arena::ArenaConfig;
use skill_arena::db::DatabaseConfig;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Where the arena keeps its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local state, lost on restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::Invalid {
                var: "STORAGE_BACKEND".to_string(),
                reason: format!("unknown backend '{other}', expected postgres or memory"),
            }),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Postgres => write!(f, "postgres"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address
    pub bind: SocketAddr,
    /// Prometheus scrape address; metrics are disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    pub storage: StorageBackend,
    /// Present for the postgres backend only
    pub database: Option<DatabaseConfig>,
    /// Engine constants
    pub arena: ArenaConfig,
}

/// Values given on the command line take precedence over the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<SocketAddr>,
    pub metrics_bind: Option<SocketAddr>,
    pub storage: Option<StorageBackend>,
    pub database_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Recognized variables:
    /// - `SERVER_BIND`: HTTP bind address (default: 127.0.0.1:8080)
    /// - `METRICS_BIND`: Prometheus listener address (default: disabled)
    /// - `STORAGE_BACKEND`: `postgres` or `memory` (default: postgres)
    /// - `DATABASE_URL` and the `DB_*` pool settings for postgres
    /// - the engine variables read by [`ArenaConfig::from_env`]
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(overrides: Overrides) -> Result<Self, ConfigError> {
        let bind = match overrides.bind {
            Some(bind) => bind,
            None => parse_env("SERVER_BIND")?.unwrap_or(parse_addr("SERVER_BIND", DEFAULT_BIND)?),
        };
        let metrics_bind = match overrides.metrics_bind {
            Some(addr) => Some(addr),
            None => parse_env("METRICS_BIND")?,
        };
        let storage = match overrides.storage {
            Some(storage) => storage,
            None => parse_env("STORAGE_BACKEND")?.unwrap_or(StorageBackend::Postgres),
        };

        let database = match storage {
            StorageBackend::Memory => None,
            StorageBackend::Postgres => Some(match overrides.database_url {
                Some(database_url) => DatabaseConfig {
                    database_url,
                    ..DatabaseConfig::development()
                },
                None => DatabaseConfig::from_env()?,
            }),
        };

        let config = ServerConfig {
            bind,
            metrics_bind,
            storage,
            database,
            arena: ArenaConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// In-memory configuration with engine defaults, used by tests
    pub fn in_memory(bind: SocketAddr) -> Self {
        Self {
            bind,
            metrics_bind: None,
            storage: StorageBackend::Memory,
            database: None,
            arena: ArenaConfig::default(),
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("must differ from SERVER_BIND ({})", self.bind),
            });
        }

        match (self.storage, &self.database) {
            (StorageBackend::Postgres, None) => {
                return Err(ConfigError::MissingRequired {
                    var: "DATABASE_URL".to_string(),
                    hint: "Set DATABASE_URL or run with --storage memory".to_string(),
                });
            }
            (StorageBackend::Postgres, Some(db)) if db.database_url.is_empty() => {
                return Err(ConfigError::Invalid {
                    var: "DATABASE_URL".to_string(),
                    reason: "Must not be empty".to_string(),
                });
            }
            _ => {}
        }

        self.arena.validate()?;
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error(transparent)]
    Engine(#[from] skill_arena::ConfigError),
}

fn parse_addr(var: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        var: var.to_string(),
        reason: format!("'{value}' is not an IP:PORT address"),
    })
}

/// Parse an optional environment variable, rejecting unparsable values
fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            reason: format!("cannot parse '{value}'"),
        }),
        Err(_) => Ok(None),
    }
}
