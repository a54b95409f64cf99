//! Normalized telemetry schema and external wire records.
//!
//! The event schema is what downstream analytics consume from the bus; the
//! wire records mirror what HSM and the secret store return. Everything here
//! is plain data: no I/O, no clocks.

use serde::{Deserialize, Serialize};

/// Telemetry-source tag stamped on every normalized event emitted by this
/// collector. River is the air-cooled deployment class.
pub const TELEMETRY_SOURCE: &str = "River";

/// HSM discovery status that marks an endpoint as usable.
pub const DISCOVER_OK: &str = "DiscoverOK";

/// The closed set of telemetry resources polled from each BMC.
///
/// Each kind maps, per vendor family, to a single relative URL on the BMC
/// (see `collector_core::parsers`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryKind {
    Power,
    Thermal,
}

impl TelemetryKind {
    /// All kinds, in the order jobs are enqueued per endpoint.
    pub const ALL: [TelemetryKind; 2] = [TelemetryKind::Power, TelemetryKind::Thermal];

    /// The Redfish resource name under the chassis path.
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetryKind::Power => "Power",
            TelemetryKind::Thermal => "Thermal",
        }
    }
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message-kind tag carried by every normalized event.
///
/// The tag selects the bus topic; the serialized form is the message id
/// downstream consumers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "CrayTelemetry.Power")]
    Power,
    #[serde(rename = "CrayTelemetry.Voltage")]
    Voltage,
    #[serde(rename = "CrayTelemetry.Temperature")]
    Temperature,
    #[serde(rename = "ResourceEvent")]
    ResourceEvent,
}

impl MessageKind {
    /// Static kind-to-topic assignment. Every normalized event routes to
    /// exactly one topic; brokers advertise the subset they accept.
    pub fn topic(self) -> &'static str {
        match self {
            MessageKind::Power => "cray-telemetry-power",
            MessageKind::Voltage => "cray-telemetry-voltage",
            MessageKind::Temperature => "cray-telemetry-temperature",
            MessageKind::ResourceEvent => "cray-dmtf-resource-event",
        }
    }
}

/// One normalized telemetry event: a message-kind tag, an RFC 3339 event
/// timestamp, and the sensor payloads read in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "MessageId")]
    pub message_id: MessageKind,
    #[serde(rename = "EventTimestamp")]
    pub event_timestamp: String,
    #[serde(rename = "Oem")]
    pub oem: SensorBlock,
}

impl Event {
    /// Create an empty event shell for the given kind and timestamp.
    pub fn new(message_id: MessageKind, event_timestamp: impl Into<String>) -> Self {
        Self {
            message_id,
            event_timestamp: event_timestamp.into(),
            oem: SensorBlock::default(),
        }
    }

    /// True when the event carries no sensor payloads. Empty events are
    /// never handed to the publisher.
    pub fn is_empty(&self) -> bool {
        self.oem.sensors.is_empty()
    }
}

/// OEM block holding the telemetry source tag and the sensor payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorBlock {
    #[serde(rename = "TelemetrySource", default = "default_telemetry_source")]
    pub telemetry_source: String,
    #[serde(rename = "Sensors", default)]
    pub sensors: Vec<SensorPayload>,
}

fn default_telemetry_source() -> String {
    TELEMETRY_SOURCE.to_owned()
}

impl Default for SensorBlock {
    fn default() -> Self {
        Self {
            telemetry_source: TELEMETRY_SOURCE.to_owned(),
            sensors: Vec::new(),
        }
    }
}

/// The smallest unit of normalized telemetry: one reading from one sensor
/// on one endpoint.
///
/// `value` is the reading serialized as a decimal string with full
/// precision; it always parses back to a finite number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPayload {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "PhysicalContext")]
    pub physical_context: String,
    #[serde(
        rename = "DeviceSpecificContext",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub device_specific_context: Option<String>,
    #[serde(rename = "Index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u8>,
    #[serde(
        rename = "ParentalIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parental_index: Option<u8>,
    #[serde(rename = "Value")]
    pub value: String,
}

/// BMC credentials, from HSM or the secret store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// True when either half is missing. Endpoints with empty credentials
    /// are not visible to pollers while the secret store is enabled.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

// Passwords stay out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One entry of the endpoint list returned by HSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedfishEndpointDescription {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FQDN")]
    pub fqdn: String,
    #[serde(rename = "Type", default)]
    pub endpoint_type: Option<String>,
    /// Vendor/model string as discovered; selects the parser family.
    #[serde(rename = "Model", default)]
    pub model: Option<String>,
    #[serde(rename = "User", default)]
    pub user: Option<String>,
    #[serde(rename = "Password", default)]
    pub password: Option<String>,
    #[serde(rename = "DiscoveryInfo", default)]
    pub discovery_info: DiscoveryInfo,
}

impl RedfishEndpointDescription {
    /// True iff HSM most recently reported this endpoint as discovered OK.
    pub fn is_usable(&self) -> bool {
        self.discovery_info.last_discovery_status == DISCOVER_OK
    }
}

/// Discovery metadata reported by HSM per endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    #[serde(rename = "LastDiscoveryStatus", default)]
    pub last_discovery_status: String,
}

/// One broker this collector produces to, with the topics it advertises.
/// Parsed from the broker list JSON named by `kafka_brokers_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaBrokerConfig {
    #[serde(rename = "BrokerAddress")]
    pub broker_address: String,
    #[serde(rename = "Topics")]
    pub topics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_wire_field_names() {
        let mut event = Event::new(MessageKind::Power, "2024-05-01T12:00:00Z");
        event.oem.sensors.push(SensorPayload {
            timestamp: "2024-05-01T12:00:00Z".to_owned(),
            location: "x3000c0s1b0".to_owned(),
            physical_context: "Chassis".to_owned(),
            device_specific_context: None,
            index: Some(0),
            parental_index: None,
            value: "312.5".to_owned(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["MessageId"], "CrayTelemetry.Power");
        assert_eq!(json["EventTimestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(json["Oem"]["TelemetrySource"], "River");
        let sensor = &json["Oem"]["Sensors"][0];
        assert_eq!(sensor["Location"], "x3000c0s1b0");
        assert_eq!(sensor["Index"], 0);
        assert_eq!(sensor["Value"], "312.5");
        // Optional fields are omitted, not serialized as null.
        assert!(sensor.get("DeviceSpecificContext").is_none());
        assert!(sensor.get("ParentalIndex").is_none());
    }

    #[test]
    fn topic_map_covers_every_kind() {
        assert_eq!(MessageKind::Power.topic(), "cray-telemetry-power");
        assert_eq!(MessageKind::Voltage.topic(), "cray-telemetry-voltage");
        assert_eq!(
            MessageKind::Temperature.topic(),
            "cray-telemetry-temperature"
        );
        assert_eq!(
            MessageKind::ResourceEvent.topic(),
            "cray-dmtf-resource-event"
        );
    }

    #[test]
    fn hsm_record_usable_only_on_discover_ok() {
        let raw = serde_json::json!({
            "ID": "x3000c0s1b0",
            "FQDN": "x3000c0s1b0.local",
            "Type": "NodeBMC",
            "DiscoveryInfo": { "LastDiscoveryStatus": "DiscoverOK" }
        });
        let ep: RedfishEndpointDescription = serde_json::from_value(raw).unwrap();
        assert!(ep.is_usable());

        let raw = serde_json::json!({
            "ID": "x3000c0s2b0",
            "FQDN": "x3000c0s2b0.local",
            "DiscoveryInfo": { "LastDiscoveryStatus": "HTTPsGetFailed" }
        });
        let ep: RedfishEndpointDescription = serde_json::from_value(raw).unwrap();
        assert!(!ep.is_usable());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials::new("root", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn broker_config_parses_broker_list_json() {
        let raw = r#"[
            {"BrokerAddress": "kafka-1:9092", "Topics": ["cray-telemetry-power"]},
            {"BrokerAddress": "kafka-2:9092", "Topics": ["cray-dmtf-resource-event"]}
        ]"#;
        let brokers: Vec<KafkaBrokerConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(brokers.len(), 2);
        assert_eq!(brokers[0].broker_address, "kafka-1:9092");
        assert_eq!(brokers[1].topics, vec!["cray-dmtf-resource-event"]);
    }
}
