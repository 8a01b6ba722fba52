//! Node configuration
//!
//! Read from environment variables, with defaults for everything.

use std::env;
use std::path::PathBuf;

use depot_planner::PlannerConfig;
use depot_service::config::DEFAULT_PLAN_TIMEOUT_MS;
use depot_service::ServiceConfig;

/// Node configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage backend
    pub storage: StorageConfig,
    /// Planning and status-update behaviour
    pub service: ServiceConfig,
    /// JSON array of products loaded at start-up
    pub seed_file: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Where orders and products are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Process-local store, lost on exit.
    Memory,
    /// SQLite database at the given path (`:memory:` for a private in-memory database).
    Sqlite(String),
}

impl StorageConfig {
    fn parse(raw: Option<String>) -> Self {
        match raw.as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StorageConfig::Memory,
            Some(path) => StorageConfig::Sqlite(path.to_string()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = PlannerConfig::default();
        Self {
            server: ServerConfig {
                port: env_parse("DEPOT_PORT").unwrap_or(3000),
                host: env::var("DEPOT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            storage: StorageConfig::parse(env::var("DEPOT_DATABASE").ok()),
            service: ServiceConfig {
                plan_timeout_ms: env_parse("DEPOT_PLAN_TIMEOUT_MS").unwrap_or(DEFAULT_PLAN_TIMEOUT_MS),
                planner: PlannerConfig {
                    max_table_cells: env_parse("DEPOT_PLANNER_MAX_CELLS")
                        .unwrap_or(defaults.max_table_cells),
                    ..defaults
                },
            },
            seed_file: env::var_os("DEPOT_SEED_FILE").map(PathBuf::from),
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_selection() {
        assert_eq!(StorageConfig::parse(None), StorageConfig::Memory);
        assert_eq!(StorageConfig::parse(Some("memory".into())), StorageConfig::Memory);
        assert_eq!(StorageConfig::parse(Some("  ".into())), StorageConfig::Memory);
        assert_eq!(
            StorageConfig::parse(Some(":memory:".into())),
            StorageConfig::Sqlite(":memory:".into())
        );
        assert_eq!(
            StorageConfig::parse(Some("/var/lib/depot.db".into())),
            StorageConfig::Sqlite("/var/lib/depot.db".into())
        );
    }
}
