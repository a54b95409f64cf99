//! Inbound event ingress server.
//!
//! Accepts POSTed Redfish event bodies from subscribed BMCs, resolves the
//! origin endpoint against the inventory, routes the body through the
//! pushed-event normalizer, and forwards the results to the publisher.
//! Liveness and readiness probes are always served, even when inbound
//! routing is disabled.

use crate::inventory::Inventory;
use crate::parsers::{self, ParseError};
use crate::publisher::{PublishError, Publisher};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use river_lib::models::MessageKind;
use river_lib::telemetry::{CollectorStats, ReadinessState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared state behind the router.
#[derive(Clone)]
pub struct IngressState {
    pub inventory: Arc<Inventory>,
    pub publisher: Arc<Publisher>,
    pub stats: Arc<CollectorStats>,
    pub readiness: Arc<ReadinessState>,
    pub ignore_provided_timestamp: bool,
    /// Gate inbound routing; the probes are served regardless.
    pub rest_enabled: bool,
}

/// Build the ingress router. The collection endpoint lives at the root
/// path, matching the destination URL registered with the BMCs.
pub fn build_router(state: IngressState) -> Router {
    let mut router = Router::new()
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness));

    if state.rest_enabled {
        router = router.route("/", post(ingest));
    }

    router.with_state(state)
}

/// Serve the router until shutdown, draining in-flight requests.
pub async fn serve(
    router: Router,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "ingress server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    info!("ingress server stopped");
    Ok(())
}

async fn liveness() -> StatusCode {
    StatusCode::OK
}

async fn readiness(State(state): State<IngressState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn ingest(State(state): State<IngressState>, body: Bytes) -> StatusCode {
    // The subscription context carries the endpoint id; without it the
    // origin cannot be attributed.
    let Some(context) = parsers::extract_context(&body) else {
        warn!("inbound event with no usable context, rejected");
        return StatusCode::BAD_REQUEST;
    };
    let Some(endpoint) = state.inventory.get(&context) else {
        warn!(context = %context, "inbound event from unknown origin, rejected");
        return StatusCode::BAD_REQUEST;
    };

    let parsed = match parsers::parse_pushed_event(
        &body,
        &endpoint.id,
        Utc::now(),
        state.ignore_provided_timestamp,
    ) {
        Ok(parsed) => parsed,
        Err(ParseError::Json(err)) => {
            state.stats.record_parse_failure();
            warn!(endpoint = %endpoint.id, %err, "malformed inbound event body");
            return StatusCode::BAD_REQUEST;
        }
        Err(err) => {
            state.stats.record_parse_failure();
            warn!(endpoint = %endpoint.id, %err, "inbound event body rejected");
            return StatusCode::BAD_REQUEST;
        }
    };

    endpoint.touch(Utc::now());

    let mut enqueued = 0usize;
    for event in &parsed.events {
        match state.publisher.publish(event) {
            Ok(()) => enqueued += 1,
            Err(PublishError::Backpressure) => {
                state.stats.record_dropped();
                return StatusCode::SERVICE_UNAVAILABLE;
            }
            Err(PublishError::Shutdown) => return StatusCode::SERVICE_UNAVAILABLE,
            Err(err) => {
                warn!(endpoint = %endpoint.id, %err, "inbound event publish failed");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
    }
    for record in &parsed.resource_records {
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(endpoint = %endpoint.id, %err, "resource record serialization failed");
                continue;
            }
        };
        match state.publisher.publish_raw(MessageKind::ResourceEvent, &payload) {
            Ok(()) => enqueued += 1,
            Err(PublishError::Backpressure) => {
                state.stats.record_dropped();
                return StatusCode::SERVICE_UNAVAILABLE;
            }
            Err(PublishError::Shutdown) => return StatusCode::SERVICE_UNAVAILABLE,
            Err(err) => {
                warn!(endpoint = %endpoint.id, %err, "resource record publish failed");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
    }

    debug!(endpoint = %endpoint.id, enqueued, "inbound event body processed");
    StatusCode::OK
}
