//! Secret store client.
//!
//! Per-endpoint BMC credentials live under a configured keypath; they
//! rotate out of band, so a fetch failure only skips the endpoint until the
//! next inventory tick.

use crate::client::{ensure_success, ClientError, HttpClientPair};
use river_lib::models::Credentials;

/// Settings for the secret store, carried by the inventory loop.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub addr: String,
    pub keypath: String,
}

/// Fetch the credentials for one endpoint id.
pub async fn fetch_credentials(
    client: &HttpClientPair,
    settings: &VaultSettings,
    endpoint_id: &str,
) -> Result<Credentials, ClientError> {
    let url = format!(
        "{}/{}/{}",
        settings.addr.trim_end_matches('/'),
        settings.keypath.trim_matches('/'),
        endpoint_id
    );
    let (status, body) = client.get_permissive(&url, None).await?;
    let body = ensure_success(status, &url, body)?;
    let creds: Credentials = serde_json::from_slice(&body)?;
    Ok(creds)
}
