//! Runtime configuration for the collector.
//!
//! These are the operational knobs of the runtime itself — worker counts,
//! channel bounds, deadlines — derived from the deployment configuration
//! but kept separate so tests can tune them without a full `Config`.

use river_lib::config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the collector runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Number of polling workers; bounds concurrent outbound fetches.
    pub worker_count: usize,

    /// Capacity of the poll-job channel. A full channel blocks the tick
    /// enqueuer, which is the system's primary backpressure mechanism.
    pub job_queue_depth: usize,

    /// Interval between poll ticks.
    pub polling_interval: Duration,

    /// Interval between HSM inventory refreshes; also paces the
    /// subscription reconcile loop.
    pub hsm_refresh_interval: Duration,

    /// Per-request HTTP timeout.
    pub http_timeout: Duration,

    /// Producer flush deadline during shutdown.
    pub flush_deadline: Duration,

    /// Upper bound on waiting for background tasks to drain at shutdown.
    pub shutdown_timeout: Duration,

    /// Attempts to build the CA-validated client before failing over to
    /// the permissive client only.
    pub trust_retry_attempts: u32,

    /// Delay between validated-client build attempts.
    pub trust_retry_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            worker_count: 30,
            job_queue_depth: 128,
            polling_interval: Duration::from_secs(10),
            hsm_refresh_interval: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
            flush_deadline: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(30),
            trust_retry_attempts: 10,
            trust_retry_delay: Duration::from_secs(2),
        }
    }
}

impl CollectorConfig {
    /// Validates the configuration and returns any errors.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }
        if self.job_queue_depth == 0 {
            anyhow::bail!("job_queue_depth must be greater than 0");
        }
        if self.polling_interval.is_zero() {
            anyhow::bail!("polling_interval must be greater than 0");
        }
        if self.hsm_refresh_interval.is_zero() {
            anyhow::bail!("hsm_refresh_interval must be greater than 0");
        }
        if self.http_timeout.is_zero() {
            anyhow::bail!("http_timeout must be greater than 0");
        }
        if self.flush_deadline.is_zero() {
            anyhow::bail!("flush_deadline must be greater than 0");
        }
        Ok(())
    }

    /// Sets the number of polling workers.
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the poll-job channel capacity.
    pub fn with_job_queue_depth(mut self, depth: usize) -> Self {
        self.job_queue_depth = depth;
        self
    }

    /// Sets the producer flush deadline.
    pub fn with_flush_deadline(mut self, deadline: Duration) -> Self {
        self.flush_deadline = deadline;
        self
    }
}

impl From<&Config> for CollectorConfig {
    fn from(config: &Config) -> Self {
        Self {
            polling_interval: config.polling_interval(),
            hsm_refresh_interval: config.hsm_refresh_interval(),
            http_timeout: config.http_timeout(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CollectorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_fails_validation() {
        let config = CollectorConfig::default().with_worker_count(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_queue_depth_fails_validation() {
        let config = CollectorConfig::default().with_job_queue_depth(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn intervals_derive_from_deployment_config() {
        let deploy = Config {
            polling_interval: 3,
            hsm_refresh_interval: 60,
            http_timeout: 5,
            ..Config::default()
        };
        let runtime = CollectorConfig::from(&deploy);
        assert_eq!(runtime.polling_interval, Duration::from_secs(3));
        assert_eq!(runtime.hsm_refresh_interval, Duration::from_secs(60));
        assert_eq!(runtime.http_timeout, Duration::from_secs(5));
        // Runtime-only knobs keep their defaults.
        assert_eq!(runtime.worker_count, 30);
        assert_eq!(runtime.flush_deadline, Duration::from_secs(15));
    }
}
