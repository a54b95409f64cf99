//! Pushed Redfish event normalization.
//!
//! BMCs with an active subscription POST event bodies to the ingress
//! server. Records that carry OEM sensor telemetry are re-tagged with the
//! source location and forwarded as normalized events; anything else is
//! passed through to the resource-event topic untouched.

use super::{format_timestamp, ParseError};
use chrono::{DateTime, Utc};
use river_lib::models::{Event, MessageKind, SensorBlock};
use serde::Deserialize;
use serde_json::Value;

/// Outcome of normalizing one pushed body.
#[derive(Debug, Default)]
pub struct PushedEvents {
    /// Telemetry events, re-tagged and ready for the publisher.
    pub events: Vec<Event>,
    /// Non-telemetry records forwarded verbatim to the resource-event
    /// topic.
    pub resource_records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PushedBody {
    #[serde(rename = "Context", default)]
    context: Option<String>,
    #[serde(rename = "Events", default)]
    events: Vec<Value>,
}

/// Pull the subscriber context out of a pushed body without fully decoding
/// it. The context is set to the endpoint id at subscription-create time,
/// so it identifies the origin BMC.
pub fn extract_context(payload: &[u8]) -> Option<String> {
    let body: PushedBody = serde_json::from_slice(payload).ok()?;
    if let Some(context) = body.context {
        if !context.is_empty() {
            return Some(context);
        }
    }
    body.events
        .iter()
        .find_map(|record| record.get("Context")?.as_str().map(str::to_owned))
}

/// Normalize a pushed Redfish event body for the given source endpoint.
///
/// `ignore_provided_timestamp` replaces the outer event timestamp with the
/// receipt time; timestamps inside already-formed sensor payloads are left
/// as provided.
pub fn parse_pushed_event(
    payload: &[u8],
    location: &str,
    now: DateTime<Utc>,
    ignore_provided_timestamp: bool,
) -> Result<PushedEvents, ParseError> {
    let body: PushedBody = serde_json::from_slice(payload)?;
    let receipt_timestamp = format_timestamp(now);

    let mut out = PushedEvents::default();
    for record in body.events {
        let message_id = record
            .get("MessageId")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(kind) = telemetry_kind_for(message_id) else {
            out.resource_records.push(record);
            continue;
        };

        let Some(mut oem) = record
            .get("Oem")
            .cloned()
            .and_then(|value| serde_json::from_value::<SensorBlock>(value).ok())
        else {
            out.resource_records.push(record);
            continue;
        };

        let event_timestamp = if ignore_provided_timestamp {
            receipt_timestamp.clone()
        } else {
            record
                .get("EventTimestamp")
                .and_then(Value::as_str)
                .filter(|ts| !ts.is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| receipt_timestamp.clone())
        };

        oem.sensors.retain(|sensor| {
            sensor
                .value
                .parse::<f64>()
                .map(f64::is_finite)
                .unwrap_or(false)
        });
        for sensor in &mut oem.sensors {
            sensor.location = location.to_owned();
            if sensor.timestamp.is_empty() {
                sensor.timestamp = event_timestamp.clone();
            }
        }

        if oem.sensors.is_empty() {
            continue;
        }

        out.events.push(Event {
            message_id: kind,
            event_timestamp,
            oem,
        });
    }

    Ok(out)
}

fn telemetry_kind_for(message_id: &str) -> Option<MessageKind> {
    if message_id.ends_with("Power") {
        Some(MessageKind::Power)
    } else if message_id.ends_with("Voltage") {
        Some(MessageKind::Voltage)
    } else if message_id.ends_with("Temperature") {
        Some(MessageKind::Temperature)
    } else {
        None
    }
}
