//! Lifecycle supervisor.
//!
//! Owns all shared state and starts the components in dependency order:
//! HTTP client pair, publisher, ingress server, inventory loop, then the
//! poller and subscription manager. On SIGINT/SIGTERM the shutdown signal
//! fans out, the tick loops exit, the job channel closes and the workers
//! drain, the ingress server finishes in-flight requests, and finally the
//! publisher flushes against its deadline. A failed background task is
//! converted into the same graceful shutdown rather than a process abort.

use crate::client::{ClientSettings, HttpClientPair};
use crate::config::CollectorConfig;
use crate::ingress::{self, IngressState};
use crate::inventory::{self, Inventory};
use crate::poller::{self, PollerContext};
use crate::publisher::Publisher;
use crate::subscriptions::{self, SubscriptionManager};
use crate::vault::VaultSettings;
use anyhow::Context as _;
use river_lib::config::{Config, ConfigError};
use river_lib::telemetry::{CollectorStats, ReadinessState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// The collector daemon: validated configuration plus runtime knobs.
pub struct Collector {
    config: Config,
    runtime: CollectorConfig,
}

impl Collector {
    /// Validate the deployment configuration and derive the runtime knobs.
    /// Misconfiguration here is the only non-zero exit path.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = CollectorConfig::from(&config);
        Ok(Self { config, runtime })
    }

    /// Override the runtime knobs; used by tests and embedders.
    pub fn with_runtime(mut self, runtime: CollectorConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Run until SIGINT/SIGTERM, then drain and flush.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self { config, runtime } = self;
        runtime.validate().context("invalid runtime configuration")?;

        let stats = Arc::new(CollectorStats::default());
        let readiness = Arc::new(ReadinessState::default());

        let client_settings = ClientSettings {
            timeout: runtime.http_timeout,
            ca_bundle_path: (!config.ca_uri.is_empty()).then(|| PathBuf::from(&config.ca_uri)),
            log_insecure_failover: config.log_insecure_failover,
            trust_retry_attempts: runtime.trust_retry_attempts,
            trust_retry_delay: runtime.trust_retry_delay,
        };
        let client = Arc::new(
            HttpClientPair::bootstrap(&client_settings)
                .await
                .context("constructing the HTTP client pair")?,
        );

        let publisher = Arc::new(
            Publisher::from_config_file(&config.kafka_brokers_config, Arc::clone(&stats))
                .context("loading the broker configuration")?,
        );
        readiness.set_publisher_connected(publisher.connected());
        if !publisher.connected() {
            warn!("no broker connections; events will be dropped until brokers return");
        }

        let inventory = Arc::new(Inventory::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut background = JoinSet::new();

        // The ingress server always runs so the probes keep answering.
        let router = ingress::build_router(IngressState {
            inventory: Arc::clone(&inventory),
            publisher: Arc::clone(&publisher),
            stats: Arc::clone(&stats),
            readiness: Arc::clone(&readiness),
            ignore_provided_timestamp: config.ignore_provided_timestamp,
            rest_enabled: config.rest_enabled,
        });
        let rest_port = config.rest_port;
        let ingress_shutdown = shutdown_rx.clone();
        background.spawn(async move {
            if let Err(err) = ingress::serve(router, rest_port, ingress_shutdown).await {
                error!(%err, "ingress server failed");
            }
        });

        let vault = config.vault_enabled.then(|| VaultSettings {
            addr: config.vault_addr.clone(),
            keypath: config.vault_keypath.clone(),
        });

        if config.polling_enabled || config.rf_subscribe_enabled {
            background.spawn(inventory::run_inventory_loop(
                Arc::clone(&inventory),
                Arc::clone(&client),
                config.sm_url.clone(),
                vault.clone(),
                runtime.hsm_refresh_interval,
                Arc::clone(&readiness),
                shutdown_rx.clone(),
            ));
        }

        let mut worker_handles = Vec::new();
        if config.polling_enabled {
            let (job_tx, job_rx) = mpsc::channel(runtime.job_queue_depth);
            let ctx = Arc::new(PollerContext {
                client: Arc::clone(&client),
                publisher: Arc::clone(&publisher),
                stats: Arc::clone(&stats),
                vault: vault.clone(),
            });
            worker_handles = poller::spawn_workers(runtime.worker_count, job_rx, ctx);
            background.spawn(poller::run_tick_loop(
                Arc::clone(&inventory),
                job_tx,
                runtime.polling_interval,
                shutdown_rx.clone(),
            ));
            info!(workers = runtime.worker_count, "polling enabled");
        }

        if config.rf_subscribe_enabled {
            let manager = Arc::new(SubscriptionManager::new(
                Arc::clone(&client),
                config.rest_url.clone(),
            ));
            background.spawn(subscriptions::run_subscription_loop(
                manager,
                Arc::clone(&inventory),
                runtime.hsm_refresh_interval,
                shutdown_rx.clone(),
            ));
            info!("redfish event subscribing enabled");
        }

        drop(shutdown_rx);

        wait_for_shutdown(&mut background).await?;

        info!("initiating graceful shutdown");
        let _ = shutdown_tx.send(true);

        // Drain the loops; an unresponsive task is abandoned, not waited on
        // forever.
        let drained = tokio::time::timeout(runtime.shutdown_timeout, async {
            while background.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                timeout_secs = runtime.shutdown_timeout.as_secs(),
                "background tasks did not stop before the deadline"
            );
            background.abort_all();
        }

        // The tick loop dropped its sender, so the workers drain the job
        // channel and exit.
        let worker_deadline = tokio::time::Instant::now() + runtime.shutdown_timeout;
        for handle in worker_handles {
            match tokio::time::timeout_at(worker_deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => error!("poll worker panicked"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("poll workers still busy at the shutdown deadline");
                    break;
                }
            }
        }

        let flush_deadline = runtime.flush_deadline;
        let flush_publisher = Arc::clone(&publisher);
        let abandoned =
            tokio::task::spawn_blocking(move || flush_publisher.shutdown(flush_deadline))
                .await
                .unwrap_or_else(|_| {
                    error!("publisher flush task panicked");
                    0
                });

        info!(
            abandoned_messages = abandoned,
            stats = ?stats.snapshot(),
            "collector exiting"
        );
        Ok(())
    }
}

/// Block until a termination signal arrives or a background task dies. A
/// dead task is logged and treated as a shutdown request.
async fn wait_for_shutdown(background: &mut JoinSet<()>) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
            Some(result) = background.join_next() => report_early_exit(result),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt"),
            Some(result) = background.join_next() => report_early_exit(result),
        }
    }

    Ok(())
}

fn report_early_exit(result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => warn!("a background task exited early; shutting down"),
        Err(err) if err.is_panic() => {
            error!("a background task panicked; converting to graceful shutdown");
        }
        Err(_) => warn!("a background task was cancelled; shutting down"),
    }
}
