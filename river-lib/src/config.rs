//! Deployment configuration with hierarchical overrides using figment.
//!
//! Precedence, lowest to highest:
//! 1. Embedded defaults
//! 2. TOML file (`/etc/river-collector/config.toml`, or the path named by
//!    `RIVER_CONFIG`)
//! 3. Environment variables prefixed `RIVER_` (e.g. `RIVER_POLLING_ENABLED`)
//!
//! `LOG_LEVEL` is deliberately not part of this structure; the daemon binary
//! reads it directly when installing the tracing subscriber, before any
//! configuration is loaded.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an alternate TOML file location.
const CONFIG_PATH_ENV: &str = "RIVER_CONFIG";

/// Default TOML file location inside the container image.
const SYSTEM_CONFIG_PATH: &str = "/etc/river-collector/config.toml";

/// Configuration loading and validation errors. Validation failures are
/// startup-fatal; the daemon exits non-zero without spawning any task.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid configuration format: {0}")]
    InvalidFormat(#[from] figment::Error),

    #[error("configuration validation failed: {message}")]
    ValidationError { message: String },
}

/// Deployment configuration for the collector daemon.
///
/// Field names are the recognized option names; each is overridable through
/// the environment as `RIVER_<NAME>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Enable the polling worker pool.
    pub polling_enabled: bool,
    /// Enable Redfish event subscriptions and the ingest path.
    pub rf_subscribe_enabled: bool,
    /// Enable inbound event routing beyond the liveness/readiness probes.
    pub rest_enabled: bool,

    /// Poll tick interval in seconds.
    pub polling_interval: u64,
    /// HSM endpoint refresh interval in seconds.
    pub hsm_refresh_interval: u64,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout: u64,

    /// Address of the State Manager (HSM).
    pub sm_url: String,
    /// This collector's advertised event-callback URL.
    pub rest_url: String,
    /// Port the ingress server listens on.
    pub rest_port: u16,

    /// Use the secret store for BMC credentials.
    pub vault_enabled: bool,
    /// Address of the secret store.
    pub vault_addr: String,
    /// Keypath under which per-endpoint credentials live.
    pub vault_keypath: String,

    /// Path to the broker list JSON.
    pub kafka_brokers_config: PathBuf,

    /// CA bundle source (PEM path); empty disables the validated client.
    pub ca_uri: String,
    /// Log TLS failovers to the permissive client.
    pub log_insecure_failover: bool,

    /// Disregard timestamps provided in pushed events and stamp receipt
    /// time instead. For fleets where BMC clocks cannot be trusted.
    pub ignore_provided_timestamp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polling_enabled: false,
            rf_subscribe_enabled: false,
            rest_enabled: true,
            polling_interval: 10,
            hsm_refresh_interval: 30,
            http_timeout: 10,
            sm_url: String::new(),
            rest_url: String::new(),
            rest_port: 80,
            vault_enabled: true,
            vault_addr: "http://localhost:8200".to_owned(),
            vault_keypath: "secret/hms-creds".to_owned(),
            kafka_brokers_config: PathBuf::from("configs/kafka_brokers.json"),
            ca_uri: String::new(),
            log_insecure_failover: true,
            ignore_provided_timestamp: false,
        }
    }
}

impl Config {
    /// Validate mandatory URLs for the enabled modes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` when a mode is enabled without
    /// the URL it depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.polling_enabled || self.rf_subscribe_enabled) && self.sm_url.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "sm_url cannot be empty while polling or subscribing is enabled"
                    .to_owned(),
            });
        }
        if self.rf_subscribe_enabled && self.rest_url.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "rest_url cannot be empty while rf_subscribe is enabled".to_owned(),
            });
        }
        if self.vault_enabled && self.vault_addr.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "vault_addr cannot be empty while vault is enabled".to_owned(),
            });
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval)
    }

    pub fn hsm_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.hsm_refresh_interval)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }
}

/// Configuration loader with hierarchical override support.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from defaults, the optional TOML file, and the
    /// `RIVER_`-prefixed environment, then validate it.
    pub fn load() -> Result<Config, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| SYSTEM_CONFIG_PATH.to_owned());
        Self::load_from(Path::new(&path))
    }

    /// Load with an explicit TOML path; missing files are skipped.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        let config: Config = figment.merge(Env::prefixed("RIVER_")).extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_intervals() {
        let config = Config::default();
        assert!(!config.polling_enabled);
        assert!(!config.rf_subscribe_enabled);
        assert!(config.rest_enabled);
        assert_eq!(config.polling_interval(), Duration::from_secs(10));
        assert_eq!(config.hsm_refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert_eq!(config.rest_port, 80);
        assert!(config.vault_enabled);
    }

    #[test]
    fn defaults_pass_validation_with_everything_disabled() {
        let config = Config {
            vault_enabled: false,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn polling_requires_sm_url() {
        let config = Config {
            polling_enabled: true,
            vault_enabled: false,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sm_url"));
    }

    #[test]
    fn subscribing_requires_rest_url() {
        let config = Config {
            rf_subscribe_enabled: true,
            sm_url: "http://hsm:27779".to_owned(),
            vault_enabled: false,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rest_url"));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "polling_interval = 5\nsm_url = \"http://hsm:27779\"\nvault_enabled = false"
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.polling_interval, 5);
        assert_eq!(config.sm_url, "http://hsm:27779");
        assert!(!config.vault_enabled);
        // Untouched keys keep their defaults.
        assert_eq!(config.hsm_refresh_interval, 30);
    }

    #[test]
    fn missing_toml_file_falls_back_to_defaults() {
        let config = ConfigLoader::load_from(Path::new("/nonexistent/river.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
