//! State Manager (HSM) client.
//!
//! HSM holds the authoritative list of discovered Redfish endpoints. It is
//! trusted platform infrastructure, reached through the permissive client.

use crate::client::{ensure_success, ClientError, HttpClientPair};
use river_lib::models::RedfishEndpointDescription;

/// Fetch the current endpoint list.
pub async fn fetch_redfish_endpoints(
    client: &HttpClientPair,
    sm_url: &str,
) -> Result<Vec<RedfishEndpointDescription>, ClientError> {
    let url = format!(
        "{}/Inventory/RedfishEndpoints",
        sm_url.trim_end_matches('/')
    );
    let (status, body) = client.get_permissive(&url, None).await?;
    let body = ensure_success(status, &url, body)?;
    let endpoints = serde_json::from_slice(&body)?;
    Ok(endpoints)
}
