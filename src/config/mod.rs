use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub environment: Environment,
    pub connection: ConnectionConfig,
    pub find: FindConfig,
    pub sweeper: SweeperConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub ping_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindConfig {
    pub default_limit: i64,
    pub max_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub log_request_summaries: bool,
    pub debug_logging: bool,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        // Load .env if present so embedders pick up BASIN_* overrides
        let _ = dotenvy::dotenv();

        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Connection overrides
        if let Ok(v) = env::var("BASIN_CONNECT_TIMEOUT_SECS") {
            self.connection.connect_timeout_secs =
                v.parse().unwrap_or(self.connection.connect_timeout_secs);
        }
        if let Ok(v) = env::var("BASIN_OPERATION_TIMEOUT_SECS") {
            self.connection.operation_timeout_secs =
                v.parse().unwrap_or(self.connection.operation_timeout_secs);
        }
        if let Ok(v) = env::var("BASIN_PING_TIMEOUT_SECS") {
            self.connection.ping_timeout_secs =
                v.parse().unwrap_or(self.connection.ping_timeout_secs);
        }

        // Find overrides
        if let Ok(v) = env::var("BASIN_FIND_DEFAULT_LIMIT") {
            self.find.default_limit = v.parse().unwrap_or(self.find.default_limit);
        }
        if let Ok(v) = env::var("BASIN_FIND_MAX_LIMIT") {
            self.find.max_limit = v.parse().unwrap_or(self.find.max_limit);
        }

        // Sweeper overrides
        if let Ok(v) = env::var("BASIN_SWEEPER_ENABLED") {
            self.sweeper.enabled = v.parse().unwrap_or(self.sweeper.enabled);
        }
        if let Ok(v) = env::var("BASIN_SWEEPER_INTERVAL_SECS") {
            self.sweeper.interval_secs = v.parse().unwrap_or(self.sweeper.interval_secs);
        }

        // Audit overrides
        if let Ok(v) = env::var("BASIN_AUDIT_REQUEST_SUMMARIES") {
            self.audit.log_request_summaries =
                v.parse().unwrap_or(self.audit.log_request_summaries);
        }
        if let Ok(v) = env::var("BASIN_AUDIT_DEBUG_LOGGING") {
            self.audit.debug_logging = v.parse().unwrap_or(self.audit.debug_logging);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            connection: ConnectionConfig {
                connect_timeout_secs: 30,
                operation_timeout_secs: 30,
                ping_timeout_secs: 5,
            },
            find: FindConfig { default_limit: 20, max_limit: 200 },
            sweeper: SweeperConfig { enabled: true, interval_secs: 60 },
            audit: AuditConfig { log_request_summaries: true, debug_logging: true },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            connection: ConnectionConfig {
                connect_timeout_secs: 10,
                operation_timeout_secs: 15,
                ping_timeout_secs: 5,
            },
            find: FindConfig { default_limit: 20, max_limit: 200 },
            sweeper: SweeperConfig { enabled: true, interval_secs: 60 },
            audit: AuditConfig { log_request_summaries: true, debug_logging: false },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            connection: ConnectionConfig {
                connect_timeout_secs: 5,
                operation_timeout_secs: 10,
                ping_timeout_secs: 2,
            },
            find: FindConfig { default_limit: 20, max_limit: 200 },
            sweeper: SweeperConfig { enabled: true, interval_secs: 60 },
            audit: AuditConfig { log_request_summaries: false, debug_logging: false },
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::development()
    }
}

// Global singleton config - initialized once at startup.
// DbManager takes its config by value; this is the convenience default
// used by DbManager::from_env().
pub static CONFIG: Lazy<ManagerConfig> = Lazy::new(ManagerConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static ManagerConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = ManagerConfig::development();
        assert_eq!(config.find.default_limit, 20);
        assert_eq!(config.find.max_limit, 200);
        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_secs, 60);
    }

    #[test]
    fn test_default_production_config() {
        let config = ManagerConfig::production();
        assert!(!config.audit.log_request_summaries);
        assert_eq!(config.connection.connect_timeout_secs, 5);
        // The find cap is a contract, not an environment tunable default
        assert_eq!(config.find.max_limit, 200);
    }
}
