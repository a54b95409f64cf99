//! HTTP client pair with hot-swappable trust.
//!
//! Two clients are maintained: a permissive one (TLS verification disabled)
//! for bootstrap and for endpoints without a trusted chain, and a validated
//! one built from the current CA bundle. The validated client is a
//! copy-on-write pointer: callers load it once per request, trust reloads
//! publish a new client under the exclusive lease. Requests in flight at the
//! moment of a swap finish on the client they started with; requests started
//! after `reload_trust` returns observe the new bundle.
//!
//! Both clients sit behind a retrying transport: transient failures
//! (connection errors, timeouts, 5xx) are retried with exponential backoff,
//! 4xx responses are never retried.

use reqwest::{Certificate, Client, Method, StatusCode};
use river_lib::models::Credentials;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = concat!("river-collector/", env!("CARGO_PKG_VERSION"));

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// HTTP client construction and transport errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Network-level failure, surfaced after retries are exhausted.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to build HTTP client: {0}")]
    Build(String),

    #[error("invalid CA trust bundle: {0}")]
    Bundle(String),

    /// The remote rejected our credentials (HTTP 401/403).
    #[error("authentication rejected (HTTP {status}) by {url}")]
    Auth { status: u16, url: String },

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    /// True for failures worth retrying on a later cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Map a non-success response to the error taxonomy.
pub fn ensure_success(
    status: StatusCode,
    url: &str,
    body: Vec<u8>,
) -> Result<Vec<u8>, ClientError> {
    if status.is_success() {
        Ok(body)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(ClientError::Auth {
            status: status.as_u16(),
            url: url.to_owned(),
        })
    } else {
        Err(ClientError::Status {
            status: status.as_u16(),
            url: url.to_owned(),
        })
    }
}

/// Settings for constructing the client pair.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Per-request timeout applied to both clients.
    pub timeout: Duration,
    /// PEM bundle path; `None` disables the validated client.
    pub ca_bundle_path: Option<PathBuf>,
    /// Log failovers onto the permissive client.
    pub log_insecure_failover: bool,
    /// Attempts to build the validated client at bootstrap.
    pub trust_retry_attempts: u32,
    /// Delay between build attempts.
    pub trust_retry_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            ca_bundle_path: None,
            log_insecure_failover: true,
            trust_retry_attempts: 10,
            trust_retry_delay: Duration::from_secs(2),
        }
    }
}

/// The permissive/validated client pair shared by every outbound caller.
pub struct HttpClientPair {
    permissive: Client,
    validated: RwLock<Arc<Client>>,
    validated_available: AtomicBool,
    log_insecure_failover: bool,
    timeout: Duration,
}

impl HttpClientPair {
    /// Construct the pair. The permissive client is mandatory; failing to
    /// build it is a transport-level startup failure. The validated client
    /// is attempted `trust_retry_attempts` times, after which the system
    /// proceeds with the permissive client only.
    pub async fn bootstrap(settings: &ClientSettings) -> Result<Self, ClientError> {
        let permissive = Self::build_permissive(settings.timeout)?;
        let pair = Self {
            permissive: permissive.clone(),
            validated: RwLock::new(Arc::new(permissive)),
            validated_available: AtomicBool::new(false),
            log_insecure_failover: settings.log_insecure_failover,
            timeout: settings.timeout,
        };

        let Some(path) = &settings.ca_bundle_path else {
            warn!("no CA bundle configured; Redfish operations use the permissive client");
            return Ok(pair);
        };

        for attempt in 1..=settings.trust_retry_attempts.max(1) {
            let built = std::fs::read(path)
                .map_err(|err| ClientError::Bundle(format!("reading {}: {err}", path.display())))
                .and_then(|pem| Self::build_validated(&pem, settings.timeout));

            match built {
                Ok(client) => {
                    *pair.validated.write().await = Arc::new(client);
                    pair.validated_available.store(true, Ordering::Release);
                    info!(bundle = %path.display(), "validated HTTP client ready");
                    break;
                }
                Err(err) => {
                    error!(attempt, %err, "validated client construction failed");
                    if attempt < settings.trust_retry_attempts {
                        tokio::time::sleep(settings.trust_retry_delay).await;
                    }
                }
            }
        }

        if !pair.validated_available.load(Ordering::Acquire) && pair.log_insecure_failover {
            warn!(
                bundle = %path.display(),
                "exhausted validated-client retries; proceeding with permissive client only"
            );
        }

        Ok(pair)
    }

    /// Replace the validated client with one built from the given PEM
    /// bundle. On build failure the previous client stays in place.
    pub async fn reload_trust(&self, bundle_pem: &[u8]) -> Result<(), ClientError> {
        // Build outside the lease so in-flight requests are not blocked on
        // certificate parsing.
        let client = Self::build_validated(bundle_pem, self.timeout)?;

        let mut slot = self.validated.write().await;
        *slot = Arc::new(client);
        drop(slot);

        self.validated_available.store(true, Ordering::Release);
        info!("validated HTTP client rebuilt from rolled trust bundle");
        Ok(())
    }

    /// True once a CA-validated client has been constructed.
    pub fn validated_available(&self) -> bool {
        self.validated_available.load(Ordering::Acquire)
    }

    /// GET through the validated client (or the permissive fallback when no
    /// trust bundle could be loaded).
    pub async fn get(
        &self,
        url: &str,
        creds: Option<&Credentials>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let client = self.validated_client().await;
        self.execute(&client, Method::GET, url, creds, None).await
    }

    /// GET through the permissive client. Used for trusted infrastructure
    /// (HSM, secret store) that terminates TLS inside the platform.
    pub async fn get_permissive(
        &self,
        url: &str,
        creds: Option<&Credentials>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        self.execute(&self.permissive, Method::GET, url, creds, None)
            .await
    }

    /// POST a JSON body through the validated client.
    pub async fn post(
        &self,
        url: &str,
        creds: Option<&Credentials>,
        body: &serde_json::Value,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let client = self.validated_client().await;
        self.execute(&client, Method::POST, url, creds, Some(body))
            .await
    }

    /// DELETE through the validated client.
    pub async fn delete(
        &self,
        url: &str,
        creds: Option<&Credentials>,
    ) -> Result<StatusCode, ClientError> {
        let client = self.validated_client().await;
        let (status, _) = self
            .execute(&client, Method::DELETE, url, creds, None)
            .await?;
        Ok(status)
    }

    /// Load the validated-client pointer once. Holding the returned `Arc`
    /// pins the trust store for the duration of one request.
    async fn validated_client(&self) -> Arc<Client> {
        if !self.validated_available() && self.log_insecure_failover {
            debug!("validated client unavailable, request goes out permissive");
        }
        self.validated.read().await.clone()
    }

    async fn execute(
        &self,
        client: &Client,
        method: Method,
        url: &str,
        creds: Option<&Credentials>,
        body: Option<&serde_json::Value>,
    ) -> Result<(StatusCode, Vec<u8>), ClientError> {
        let mut attempt = 0u32;
        loop {
            let mut request = client.request(method.clone(), url);
            if let Some(creds) = creds {
                request = request.basic_auth(&creds.username, Some(&creds.password));
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < MAX_RETRIES {
                        warn!(%url, status = status.as_u16(), attempt, "server error, retrying");
                        tokio::time::sleep(retry_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let bytes = response.bytes().await.map_err(ClientError::Transport)?;
                    return Ok((status, bytes.to_vec()));
                }
                Err(err) if (err.is_timeout() || err.is_connect()) && attempt < MAX_RETRIES => {
                    warn!(%url, %err, attempt, "transport error, retrying");
                    tokio::time::sleep(retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(ClientError::Transport(err)),
            }
        }
    }

    fn build_permissive(timeout: Duration) -> Result<Client, ClientError> {
        Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| ClientError::Build(err.to_string()))
    }

    fn build_validated(bundle_pem: &[u8], timeout: Duration) -> Result<Client, ClientError> {
        let certs = Certificate::from_pem_bundle(bundle_pem)
            .map_err(|err| ClientError::Bundle(err.to_string()))?;
        if certs.is_empty() {
            return Err(ClientError::Bundle(
                "bundle contains no certificates".to_owned(),
            ));
        }

        let mut builder = Client::builder().timeout(timeout).user_agent(USER_AGENT);
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
        builder
            .build()
            .map_err(|err| ClientError::Build(err.to_string()))
    }
}

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * 2u32.saturating_pow(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn ensure_success_maps_auth_statuses() {
        let err = ensure_success(StatusCode::UNAUTHORIZED, "https://bmc/x", vec![]).unwrap_err();
        assert!(err.is_auth());
        let err = ensure_success(StatusCode::FORBIDDEN, "https://bmc/x", vec![]).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn ensure_success_maps_server_errors_as_transient() {
        let err =
            ensure_success(StatusCode::BAD_GATEWAY, "https://bmc/x", vec![]).unwrap_err();
        assert!(err.is_transient());
        assert!(!err.is_auth());
    }

    #[test]
    fn ensure_success_passes_bodies_through() {
        let body = ensure_success(StatusCode::OK, "https://bmc/x", b"payload".to_vec()).unwrap();
        assert_eq!(body, b"payload");
    }

    #[test]
    fn invalid_bundle_is_rejected() {
        let err = HttpClientPair::build_validated(b"not pem", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ClientError::Bundle(_)));
    }
}
