//! Integration tests for subscription reconciliation: idempotence, drift
//! teardown, and creation.

use collector_core::client::{ClientSettings, HttpClientPair};
use collector_core::inventory::Endpoint;
use collector_core::subscriptions::{SubscriptionManager, SubscriptionPhase};
use river_lib::models::{Credentials, DiscoveryInfo, RedfishEndpointDescription};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DESTINATION: &str = "http://collector.local:80";
const ENDPOINT_ID: &str = "x3000c0s1b0";

async fn manager() -> Arc<SubscriptionManager> {
    let client = HttpClientPair::bootstrap(&ClientSettings::default())
        .await
        .unwrap();
    Arc::new(SubscriptionManager::new(
        Arc::new(client),
        DESTINATION.to_owned(),
    ))
}

fn bmc_endpoint(server_uri: &str) -> Endpoint {
    let desc = RedfishEndpointDescription {
        id: ENDPOINT_ID.to_owned(),
        fqdn: server_uri.to_owned(),
        endpoint_type: Some("NodeBMC".to_owned()),
        model: Some("Gigabyte".to_owned()),
        user: None,
        password: None,
        discovery_info: DiscoveryInfo {
            last_discovery_status: "DiscoverOK".to_owned(),
        },
    };
    Endpoint::new(&desc, Credentials::new("root", "pw"))
}

async fn mount_collection(server: &MockServer, member_ids: &[&str]) {
    let members: Vec<_> = member_ids
        .iter()
        .map(|id| json!({"@odata.id": format!("/redfish/v1/EventService/Subscriptions/{id}")}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/redfish/v1/EventService/Subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Members": members})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn missing_subscription_is_created() {
    let server = MockServer::start().await;
    mount_collection(&server, &[]).await;
    Mock::given(method("POST"))
        .and(path("/redfish/v1/EventService/Subscriptions"))
        .and(body_partial_json(json!({
            "Destination": DESTINATION,
            "Context": ENDPOINT_ID,
            "Protocol": "Redfish"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager().await;
    let endpoint = bmc_endpoint(&server.uri());
    manager.reconcile_endpoint(&endpoint).await.unwrap();

    let record = manager.record(ENDPOINT_ID).await.unwrap();
    assert_eq!(record.phase, SubscriptionPhase::Verified);
    assert!(record.last_verified.is_some());
}

#[tokio::test]
async fn matching_subscription_means_zero_writes() {
    let server = MockServer::start().await;
    mount_collection(&server, &["1"]).await;
    Mock::given(method("GET"))
        .and(path("/redfish/v1/EventService/Subscriptions/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Id": "1",
            "Destination": DESTINATION,
            "EventTypes": ["Alert", "StatusChange"],
            "Context": ENDPOINT_ID,
            "Protocol": "Redfish"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/redfish/v1/EventService/Subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/redfish/v1/EventService/Subscriptions/1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let manager = manager().await;
    let endpoint = bmc_endpoint(&server.uri());

    // Running the reconcile twice with no remote changes performs zero
    // write operations on either pass.
    manager.reconcile_endpoint(&endpoint).await.unwrap();
    manager.reconcile_endpoint(&endpoint).await.unwrap();

    let record = manager.record(ENDPOINT_ID).await.unwrap();
    assert_eq!(record.phase, SubscriptionPhase::Verified);
    assert_eq!(record.remote_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn drifted_subscription_is_deleted_and_recreated() {
    let server = MockServer::start().await;
    mount_collection(&server, &["7"]).await;
    // Ours by destination, but the event-type set drifted.
    Mock::given(method("GET"))
        .and(path("/redfish/v1/EventService/Subscriptions/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Id": "7",
            "Destination": DESTINATION,
            "EventTypes": ["Alert"],
            "Context": ENDPOINT_ID
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/redfish/v1/EventService/Subscriptions/7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/redfish/v1/EventService/Subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager().await;
    let endpoint = bmc_endpoint(&server.uri());
    manager.reconcile_endpoint(&endpoint).await.unwrap();

    let record = manager.record(ENDPOINT_ID).await.unwrap();
    assert_eq!(record.phase, SubscriptionPhase::Verified);
}

#[tokio::test]
async fn foreign_subscriptions_are_left_alone() {
    let server = MockServer::start().await;
    mount_collection(&server, &["2"]).await;
    Mock::given(method("GET"))
        .and(path("/redfish/v1/EventService/Subscriptions/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Id": "2",
            "Destination": "http://some-other-collector:80",
            "EventTypes": ["Alert"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/redfish/v1/EventService/Subscriptions/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    // Ours is missing, so it still gets created.
    Mock::given(method("POST"))
        .and(path("/redfish/v1/EventService/Subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager().await;
    let endpoint = bmc_endpoint(&server.uri());
    manager.reconcile_endpoint(&endpoint).await.unwrap();
}

#[tokio::test]
async fn create_failure_returns_to_unverified_for_the_next_cycle() {
    let server = MockServer::start().await;
    mount_collection(&server, &[]).await;
    Mock::given(method("POST"))
        .and(path("/redfish/v1/EventService/Subscriptions"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager().await;
    let endpoint = bmc_endpoint(&server.uri());
    manager.reconcile_endpoint(&endpoint).await.unwrap();

    let record = manager.record(ENDPOINT_ID).await.unwrap();
    assert_eq!(record.phase, SubscriptionPhase::Unverified);
    assert!(record.last_verified.is_none());
}
