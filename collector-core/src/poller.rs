//! Polling worker pool.
//!
//! A fixed pool of workers consumes fetch jobs from one bounded channel. On
//! every tick the supervisor enqueues one job per endpoint × telemetry
//! kind; a full channel blocks the enqueuer, which is the system's primary
//! backpressure against slow brokers or slow BMCs. Transport and parse
//! failures never outlive one poll cycle.

use crate::client::HttpClientPair;
use crate::inventory::{Endpoint, Inventory};
use crate::parsers;
use crate::publisher::{PublishError, Publisher};
use crate::vault::{self, VaultSettings};
use chrono::Utc;
use reqwest::StatusCode;
use river_lib::models::TelemetryKind;
use river_lib::telemetry::CollectorStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One fetch unit: a single endpoint × telemetry kind.
#[derive(Clone)]
pub struct PollJob {
    pub endpoint: Arc<Endpoint>,
    pub kind: TelemetryKind,
}

/// Shared context handed to every worker.
pub struct PollerContext {
    pub client: Arc<HttpClientPair>,
    pub publisher: Arc<Publisher>,
    pub stats: Arc<CollectorStats>,
    pub vault: Option<VaultSettings>,
}

/// Spawn the worker pool. Workers exit when the job channel closes and
/// drains; the supervisor joins the returned handles before flushing the
/// publisher.
pub fn spawn_workers(
    worker_count: usize,
    job_rx: mpsc::Receiver<PollJob>,
    ctx: Arc<PollerContext>,
) -> Vec<JoinHandle<()>> {
    let job_rx = Arc::new(Mutex::new(job_rx));
    (0..worker_count)
        .map(|worker_id| {
            let job_rx = Arc::clone(&job_rx);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only for the dequeue itself so
                    // the pool keeps draining while this worker fetches.
                    let job = job_rx.lock().await.recv().await;
                    match job {
                        Some(job) => process_job(&ctx, &job).await,
                        None => break,
                    }
                }
                debug!(worker_id, "poll worker drained and stopped");
            })
        })
        .collect()
}

/// The tick loop: enumerate the inventory snapshot and enqueue one job per
/// endpoint × kind. Sending blocks while the channel is full; shutdown is
/// observed even mid-enqueue.
pub async fn run_tick_loop(
    inventory: Arc<Inventory>,
    job_tx: mpsc::Sender<PollJob>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    'outer: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                for endpoint in inventory.snapshot() {
                    if endpoint.credentials_stale() {
                        debug!(endpoint = %endpoint.id, "credentials stale, endpoint skipped this tick");
                        continue;
                    }
                    for kind in TelemetryKind::ALL {
                        let job = PollJob { endpoint: Arc::clone(&endpoint), kind };
                        tokio::select! {
                            result = job_tx.send(job) => {
                                if result.is_err() {
                                    break 'outer;
                                }
                            }
                            _ = shutdown.changed() => break 'outer,
                        }
                    }
                }
            }
        }
    }

    info!("poll tick loop stopped");
    // Dropping the sender lets the workers drain and exit.
}

/// Fetch, parse, and publish one job. All failures are contained here.
pub(crate) async fn process_job(ctx: &PollerContext, job: &PollJob) {
    let endpoint = &job.endpoint;
    let url = endpoint.family.payload_url(&endpoint.fqdn, job.kind);

    let body = match fetch_payload(ctx, endpoint, &url).await {
        Some(body) => body,
        None => return,
    };

    let events = match parsers::parse_and_tag(&body, endpoint.family, job.kind, &endpoint.id, Utc::now())
    {
        Ok(events) => events,
        Err(err) => {
            ctx.stats.record_parse_failure();
            warn!(endpoint = %endpoint.id, kind = %job.kind, %err, "payload parse failed");
            return;
        }
    };

    endpoint.touch(Utc::now());

    for event in events {
        match ctx.publisher.publish(&event) {
            Ok(()) => {}
            Err(PublishError::Backpressure) => {
                ctx.stats.record_dropped();
                warn!(endpoint = %endpoint.id, kind = %job.kind, "producer queue full, event dropped");
            }
            Err(PublishError::Shutdown) => return,
            Err(err) => {
                warn!(endpoint = %endpoint.id, %err, "publish failed");
            }
        }
    }
}

/// Fetch one payload, handling authentication rejection with a one-shot
/// credential refresh. Returns `None` when the payload is abandoned for
/// this tick.
async fn fetch_payload(
    ctx: &PollerContext,
    endpoint: &Arc<Endpoint>,
    url: &str,
) -> Option<Vec<u8>> {
    let creds = endpoint.credentials();
    let (status, body) = match ctx.client.get(url, Some(&creds)).await {
        Ok(response) => response,
        Err(err) => {
            warn!(endpoint = %endpoint.id, %url, %err, "payload fetch failed");
            return None;
        }
    };

    if status == StatusCode::UNAUTHORIZED {
        ctx.stats.record_auth_failure();

        // One-shot refresh: pull fresh credentials and retry once before
        // benching the endpoint until the next inventory tick.
        if let Some(vault) = &ctx.vault {
            if let Ok(fresh) = vault::fetch_credentials(&ctx.client, vault, &endpoint.id).await {
                endpoint.set_credentials(fresh.clone());
                match ctx.client.get(url, Some(&fresh)).await {
                    Ok((retry_status, retry_body)) if retry_status.is_success() => {
                        return Some(retry_body);
                    }
                    Ok((retry_status, _)) => {
                        debug!(endpoint = %endpoint.id, status = retry_status.as_u16(), "retry after refresh still rejected");
                    }
                    Err(err) => {
                        warn!(endpoint = %endpoint.id, %err, "retry after credential refresh failed");
                    }
                }
            }
        }

        endpoint.mark_credentials_stale();
        warn!(endpoint = %endpoint.id, "authentication rejected; credentials marked stale");
        return None;
    }

    if !status.is_success() {
        warn!(endpoint = %endpoint.id, %url, status = status.as_u16(), "unexpected status, payload abandoned");
        return None;
    }

    Some(body)
}
