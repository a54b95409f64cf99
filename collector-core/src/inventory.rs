//! Endpoint inventory and the HSM reconcile loop.
//!
//! The inventory map is written exclusively by the reconcile loop and read
//! by the poller and subscription manager through point-in-time snapshots.
//! Endpoints are held only while HSM most recently reported them
//! `DiscoverOK`; they are never evicted by the loop — removal is implicit
//! on shutdown.

use crate::client::HttpClientPair;
use crate::hsm;
use crate::parsers::VendorFamily;
use crate::vault::{self, VaultSettings};
use chrono::{DateTime, Utc};
use river_lib::models::{Credentials, RedfishEndpointDescription};
use river_lib::telemetry::ReadinessState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A reachable BMC with everything the poller and subscriber need bound to
/// it: the vendor parser family and the current credentials.
#[derive(Debug)]
pub struct Endpoint {
    pub id: String,
    pub fqdn: String,
    pub model: String,
    pub family: VendorFamily,
    credentials: RwLock<Credentials>,
    credentials_stale: AtomicBool,
    last_contacted: Mutex<Option<DateTime<Utc>>>,
}

impl Endpoint {
    pub fn new(desc: &RedfishEndpointDescription, credentials: Credentials) -> Self {
        let model = desc
            .model
            .clone()
            .or_else(|| desc.endpoint_type.clone())
            .unwrap_or_default();
        Self {
            id: desc.id.clone(),
            fqdn: desc.fqdn.clone(),
            family: VendorFamily::from_model(&model),
            model,
            credentials: RwLock::new(credentials),
            credentials_stale: AtomicBool::new(false),
            last_contacted: Mutex::new(None),
        }
    }

    /// Current credentials; callers get an owned copy so a rotation cannot
    /// tear a request in half.
    pub fn credentials(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the credentials and clear the stale flag.
    pub fn set_credentials(&self, creds: Credentials) {
        *self
            .credentials
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = creds;
        self.credentials_stale.store(false, Ordering::Release);
    }

    /// Mark the credentials rejected; the endpoint is skipped by pollers
    /// until the next inventory tick refreshes it.
    pub fn mark_credentials_stale(&self) {
        self.credentials_stale.store(true, Ordering::Release);
    }

    pub fn credentials_stale(&self) -> bool {
        self.credentials_stale.load(Ordering::Acquire)
    }

    /// Record a successful contact.
    pub fn touch(&self, when: DateTime<Utc>) {
        *self
            .last_contacted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(when);
    }

    pub fn last_contacted(&self) -> Option<DateTime<Utc>> {
        *self
            .last_contacted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The known-BMC set, keyed by stable endpoint id.
#[derive(Debug, Default)]
pub struct Inventory {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent point-in-time view for pollers and subscribers.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.endpoints
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an endpoint. Outside of tests, only the
    /// reconcile pass writes here.
    pub fn insert(&self, endpoint: Endpoint) {
        self.endpoints
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(endpoint.id.clone(), Arc::new(endpoint));
    }
}

/// One reconcile pass against HSM. Returns the number of endpoints newly
/// inserted.
pub async fn refresh_once(
    inventory: &Inventory,
    client: &HttpClientPair,
    sm_url: &str,
    vault: Option<&VaultSettings>,
) -> usize {
    let descriptions = match hsm::fetch_redfish_endpoints(client, sm_url).await {
        Ok(descriptions) if !descriptions.is_empty() => descriptions,
        Ok(_) => {
            warn!("no endpoints retrieved from the State Manager");
            return 0;
        }
        Err(err) => {
            warn!(%err, "endpoint list fetch from the State Manager failed");
            return 0;
        }
    };

    let mut inserted = 0usize;
    for desc in descriptions {
        if let Some(existing) = inventory.get(&desc.id) {
            // Known endpoint: only credential rotation needs attention.
            if existing.credentials_stale() {
                if let Some(vault) = vault {
                    match vault::fetch_credentials(client, vault, &existing.id).await {
                        Ok(creds) => {
                            existing.set_credentials(creds);
                            info!(endpoint = %existing.id, "refreshed stale credentials");
                        }
                        Err(err) => {
                            warn!(endpoint = %existing.id, %err, "credential refresh failed");
                        }
                    }
                }
            }
            continue;
        }

        if !desc.is_usable() {
            warn!(
                endpoint = %desc.id,
                status = %desc.discovery_info.last_discovery_status,
                "ignoring endpoint whose last HSM discovery was not DiscoverOK"
            );
            continue;
        }

        let credentials = if let Some(vault) = vault {
            match vault::fetch_credentials(client, vault, &desc.id).await {
                Ok(creds) => creds,
                Err(err) => {
                    // Skip this tick; the situation may improve next time.
                    warn!(endpoint = %desc.id, %err, "credential fetch failed, endpoint deferred");
                    continue;
                }
            }
        } else {
            Credentials::new(
                desc.user.clone().unwrap_or_default(),
                desc.password.clone().unwrap_or_default(),
            )
        };

        let endpoint = Endpoint::new(&desc, credentials);
        debug!(
            endpoint = %endpoint.id,
            fqdn = %endpoint.fqdn,
            family = ?endpoint.family,
            "endpoint joined the inventory"
        );
        inventory.insert(endpoint);
        inserted += 1;
    }

    if inserted > 0 {
        info!(inserted, total = inventory.len(), "inventory refreshed");
    }
    inserted
}

/// The periodic reconcile loop. Marks the readiness gate after the first
/// pass that yields a usable inventory, and exits promptly on shutdown.
pub async fn run_inventory_loop(
    inventory: Arc<Inventory>,
    client: Arc<HttpClientPair>,
    sm_url: String,
    vault: Option<VaultSettings>,
    interval: Duration,
    readiness: Arc<ReadinessState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                refresh_once(&inventory, &client, &sm_url, vault.as_ref()).await;
                if !inventory.is_empty() && !readiness.inventory_primed() {
                    readiness.set_inventory_primed();
                }
            }
        }
    }

    info!("inventory loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use river_lib::models::DiscoveryInfo;

    fn description(id: &str, status: &str) -> RedfishEndpointDescription {
        RedfishEndpointDescription {
            id: id.to_owned(),
            fqdn: format!("{id}.local"),
            endpoint_type: Some("NodeBMC".to_owned()),
            model: Some("Gigabyte R272-Z30".to_owned()),
            user: Some("root".to_owned()),
            password: Some("initial".to_owned()),
            discovery_info: DiscoveryInfo {
                last_discovery_status: status.to_owned(),
            },
        }
    }

    #[test]
    fn endpoint_binds_family_from_model() {
        let mut desc = description("x3000c0s1b0", "DiscoverOK");
        desc.model = Some("Intel S2600".to_owned());
        let ep = Endpoint::new(&desc, Credentials::new("root", "pw"));
        assert_eq!(ep.family, VendorFamily::Intel);
    }

    #[test]
    fn stale_flag_round_trip() {
        let desc = description("x3000c0s1b0", "DiscoverOK");
        let ep = Endpoint::new(&desc, Credentials::new("root", "old"));
        assert!(!ep.credentials_stale());

        ep.mark_credentials_stale();
        assert!(ep.credentials_stale());

        ep.set_credentials(Credentials::new("root", "new"));
        assert!(!ep.credentials_stale());
        assert_eq!(ep.credentials().password, "new");
    }

    #[test]
    fn snapshot_is_a_point_in_time_copy() {
        let inventory = Inventory::new();
        inventory.insert(Endpoint::new(
            &description("x3000c0s1b0", "DiscoverOK"),
            Credentials::new("root", "pw"),
        ));

        let snapshot = inventory.snapshot();
        assert_eq!(snapshot.len(), 1);

        inventory.insert(Endpoint::new(
            &description("x3000c0s2b0", "DiscoverOK"),
            Credentials::new("root", "pw"),
        ));
        // The earlier snapshot is unaffected by later writes.
        assert_eq!(snapshot.len(), 1);
        assert_eq!(inventory.len(), 2);
    }
}
