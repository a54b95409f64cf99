//! Redfish event subscription reconciliation.
//!
//! Each endpoint carries at most one push subscription targeting this
//! collector. The reconcile pass lists the BMC's subscriptions, verifies
//! ours (destination URL, event-type set, context), deletes orphans whose
//! destination matches us but whose metadata drifted, and creates the
//! subscription when it is missing. The pass is idempotent: repeating it
//! against an unchanged BMC performs no writes.
//!
//! Per endpoint × subscription:
//!
//! ```text
//! UNVERIFIED --(list ok, match)--> VERIFIED
//! UNVERIFIED --(list ok, miss) --> CREATING
//! CREATING   --(create ok)     --> VERIFIED
//! CREATING   --(create fail)   --> UNVERIFIED
//! VERIFIED   --(tick)          --> UNVERIFIED
//! ```
//!
//! Shutdown is terminal but deliberately leaves remote subscriptions in
//! place so brief restarts do not lose events.

use crate::client::{ensure_success, ClientError, HttpClientPair};
use crate::inventory::{Endpoint, Inventory};
use crate::parsers::base_url;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Event classes this collector subscribes to: alerting plus the status
/// changes that carry environmental telemetry.
pub const REQUESTED_EVENT_TYPES: &[&str] = &["Alert", "StatusChange"];

const SUBSCRIPTIONS_PATH: &str = "/redfish/v1/EventService/Subscriptions";

/// Verification phase of one endpoint's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Unverified,
    Creating,
    Verified,
}

/// What we know about one endpoint's subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub phase: SubscriptionPhase,
    pub remote_id: Option<String>,
    pub last_verified: Option<DateTime<Utc>>,
}

impl Default for SubscriptionRecord {
    fn default() -> Self {
        Self {
            phase: SubscriptionPhase::Unverified,
            remote_id: None,
            last_verified: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionCollection {
    #[serde(rename = "Members", default)]
    members: Vec<OdataRef>,
}

#[derive(Debug, Deserialize)]
struct OdataRef {
    #[serde(rename = "@odata.id")]
    odata_id: String,
}

/// Redfish EventDestination resource, pared down to what we reconcile on.
#[derive(Debug, Serialize, Deserialize)]
struct EventDestination {
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "Destination")]
    destination: String,
    #[serde(rename = "EventTypes", default)]
    event_types: Vec<String>,
    #[serde(rename = "Context", default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(rename = "Protocol", default, skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
}

/// Maintains one push subscription per endpoint.
pub struct SubscriptionManager {
    client: Arc<HttpClientPair>,
    /// This collector's advertised callback URL; the remote destination
    /// must equal it exactly.
    destination: String,
    records: Mutex<HashMap<String, SubscriptionRecord>>,
}

impl SubscriptionManager {
    pub fn new(client: Arc<HttpClientPair>, destination: String) -> Self {
        Self {
            client,
            destination,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of one endpoint's record, for probes and tests.
    pub async fn record(&self, endpoint_id: &str) -> Option<SubscriptionRecord> {
        self.records.lock().await.get(endpoint_id).cloned()
    }

    /// Reconcile one endpoint. Safe to repeat; a failure leaves the record
    /// unverified and is retried next cycle.
    pub async fn reconcile_endpoint(&self, endpoint: &Endpoint) -> Result<(), ClientError> {
        // Each tick re-verifies from scratch.
        {
            let mut records = self.records.lock().await;
            records.entry(endpoint.id.clone()).or_default().phase = SubscriptionPhase::Unverified;
        }

        let creds = endpoint.credentials();
        let collection_url = format!("{}{}", base_url(&endpoint.fqdn), SUBSCRIPTIONS_PATH);
        let (status, body) = self.client.get(&collection_url, Some(&creds)).await?;
        let body = ensure_success(status, &collection_url, body)?;
        let collection: SubscriptionCollection = serde_json::from_slice(&body)?;

        let mut matched: Option<EventDestination> = None;
        for member in &collection.members {
            let member_url = format!("{}{}", base_url(&endpoint.fqdn), member.odata_id);
            let (status, body) = self.client.get(&member_url, Some(&creds)).await?;
            let body = ensure_success(status, &member_url, body)?;
            let remote: EventDestination = match serde_json::from_slice(&body) {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(endpoint = %endpoint.id, %member_url, %err, "undecodable subscription resource");
                    continue;
                }
            };

            if remote.destination != self.destination {
                // Someone else's subscription; leave it alone.
                continue;
            }

            if self.matches(&remote, endpoint) && matched.is_none() {
                matched = Some(remote);
            } else {
                // Ours, but drifted (or a duplicate): tear the orphan down
                // before re-creating.
                info!(
                    endpoint = %endpoint.id,
                    remote_id = remote.id.as_deref().unwrap_or("?"),
                    "deleting drifted subscription"
                );
                let delete_url = member_url;
                let status = self.client.delete(&delete_url, Some(&creds)).await?;
                if !status.is_success() {
                    warn!(endpoint = %endpoint.id, status = status.as_u16(), "orphan delete rejected");
                }
            }
        }

        if let Some(remote) = matched {
            let mut records = self.records.lock().await;
            let record = records.entry(endpoint.id.clone()).or_default();
            record.phase = SubscriptionPhase::Verified;
            record.remote_id = remote.id;
            record.last_verified = Some(Utc::now());
            debug!(endpoint = %endpoint.id, "subscription verified");
            return Ok(());
        }

        self.create_subscription(endpoint, &collection_url).await
    }

    async fn create_subscription(
        &self,
        endpoint: &Endpoint,
        collection_url: &str,
    ) -> Result<(), ClientError> {
        {
            let mut records = self.records.lock().await;
            records.entry(endpoint.id.clone()).or_default().phase = SubscriptionPhase::Creating;
        }

        let request = EventDestination {
            id: None,
            destination: self.destination.clone(),
            event_types: REQUESTED_EVENT_TYPES
                .iter()
                .map(|t| (*t).to_owned())
                .collect(),
            // The context identifies the origin endpoint in pushed bodies.
            context: Some(endpoint.id.clone()),
            protocol: Some("Redfish".to_owned()),
        };
        let body = serde_json::to_value(&request)?;

        let creds = endpoint.credentials();
        let result = self.client.post(collection_url, Some(&creds), &body).await;

        let mut records = self.records.lock().await;
        let record = records.entry(endpoint.id.clone()).or_default();
        match result {
            Ok((status, _)) if status.is_success() => {
                record.phase = SubscriptionPhase::Verified;
                record.last_verified = Some(Utc::now());
                info!(endpoint = %endpoint.id, "subscription created");
                Ok(())
            }
            Ok((status, _)) => {
                record.phase = SubscriptionPhase::Unverified;
                warn!(endpoint = %endpoint.id, status = status.as_u16(), "subscription create rejected");
                Ok(())
            }
            Err(err) => {
                record.phase = SubscriptionPhase::Unverified;
                Err(err)
            }
        }
    }

    fn matches(&self, remote: &EventDestination, endpoint: &Endpoint) -> bool {
        let wanted: BTreeSet<&str> = REQUESTED_EVENT_TYPES.iter().copied().collect();
        let got: BTreeSet<&str> = remote.event_types.iter().map(String::as_str).collect();
        remote.destination == self.destination
            && wanted == got
            && remote.context.as_deref() == Some(endpoint.id.as_str())
    }
}

/// The reconcile loop: one pass over the inventory per tick, sequential so
/// at most one reconcile is in flight per endpoint. Failures are logged
/// and retried next cycle; the loop never takes the process down.
pub async fn run_subscription_loop(
    manager: Arc<SubscriptionManager>,
    inventory: Arc<Inventory>,
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
                    if *shutdown.borrow() {
                        break 'outer;
                    }
                    if let Err(err) = manager.reconcile_endpoint(&endpoint).await {
                        warn!(endpoint = %endpoint.id, %err, "subscription reconcile failed");
                    }
                }
            }
        }
    }

    info!("subscription loop stopped");
}
