//! Server Configuration
//!
//! Layered, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `config/default` and `config/local` (TOML, JSON or YAML), then `--config`
//! 3. `MYCELIO__SECTION__KEY` environment variables
//! 4. CLI flags, applied by `main`

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use mycelio_api::ApiConfig;
use mycelio_auth::{AuthConfig, MIN_CRON_SECRET_LEN};
use mycelio_core::EngineConfig;
use mycelio_db::DatabaseConfig;
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub auth: AuthConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Server binding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Production posture: strict cron guard, no validation details on the wire
    pub production: bool,
    /// Upper bound on draining background work at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            production: false,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerSettings {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

/// Which store backs the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process store; state is lost on restart
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Prometheus exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Exporter port (separate from the API listener)
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl ServerConfig {
    /// Load configuration from files and environment
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MYCELIO")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.cron.allowed_ips")
                .with_list_parse_key("auth.cron.trusted_proxies")
                .with_list_parse_key("api.cors_origins")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to read configuration")?;
        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Configuration for local development
    pub fn development() -> Self {
        Self {
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
            metrics: MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Propagate the production switch into the sections that depend on it
    pub fn apply_production(&mut self) {
        if self.server.production {
            self.auth.cron.production = true;
            self.api.expose_error_details = false;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(mut e) = self.engine.validate() {
            errors.append(&mut e);
        }
        if let Err(mut e) = self.auth.validate() {
            errors.append(&mut e);
        }
        if self.logging.format != "json" && self.logging.format != "pretty" {
            errors.push(format!("Unknown log format: {}", self.logging.format));
        }
        if self.api.max_body_size < self.engine.max_payload_bytes {
            errors.push("api.max_body_size must be at least engine.max_payload_bytes".to_string());
        }

        if self.server.production {
            if self.storage.backend == StorageBackend::Memory {
                errors.push("The in-memory store is not allowed in production".to_string());
            }
            if let Some(secret) = &self.auth.cron.secret {
                if secret.len() < MIN_CRON_SECRET_LEN {
                    errors.push(format!(
                        "auth.cron.secret must be at least {} characters in production",
                        MIN_CRON_SECRET_LEN
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.engine.min_bounty, 10);
    }

    #[test]
    fn test_production_rejects_memory_store_and_weak_secret() {
        let mut config = ServerConfig::default();
        config.server.production = true;
        config.auth.cron.secret = Some("short".to_string());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_apply_production() {
        let mut config = ServerConfig::default();
        config.server.production = true;
        config.apply_production();
        assert!(config.auth.cron.production);
        assert!(!config.api.expose_error_details);
    }

    #[test]
    fn test_body_limit_must_fit_payloads() {
        let mut config = ServerConfig::default();
        config.api.max_body_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig::default();
        assert_eq!(config.server.socket_addr().unwrap().port(), 3000);

        let mut bad = ServerConfig::default();
        bad.server.host = "not a host".to_string();
        assert!(bad.server.socket_addr().is_err());
    }

    #[test]
    fn test_toml_overrides_durations() {
        let raw = r#"
            [server]
            port = 8080

            [engine]
            claim_window = "10m"
            auto_settle_enabled = false

            [auth.rate_limit]
            strict = 3
        "#;
        let config: ServerConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.claim_window, Duration::from_secs(600));
        assert!(!config.engine.auto_settle_enabled);
        assert_eq!(config.auth.rate_limit.strict, 3);
        assert_eq!(config.auth.rate_limit.task, 20);
    }
}
