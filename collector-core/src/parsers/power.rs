//! Power payload normalization.
//!
//! One `Power` event is produced from the "Server Power Control" entries,
//! and one `Voltage` event from the power supplies and voltage rails. Rail
//! names carry a three-character vendor prefix that is stripped to form the
//! device-specific context.

use super::{format_timestamp, format_value, member_index, ParseError};
use chrono::{DateTime, Utc};
use river_lib::models::{Event, MessageKind, SensorPayload};
use serde::Deserialize;
use tracing::warn;

const SERVER_POWER_CONTROL: &str = "Server Power Control";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PowerBody {
    #[serde(default)]
    power_control: Vec<PowerControl>,
    #[serde(default)]
    power_supplies: Vec<PowerSupply>,
    #[serde(default)]
    voltages: Vec<VoltageReading>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PowerControl {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    member_id: Option<String>,
    #[serde(default)]
    power_consumed_watts: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PowerSupply {
    #[serde(default)]
    member_id: Option<String>,
    #[serde(default)]
    line_input_voltage: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VoltageReading {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    reading_volts: Option<f64>,
}

pub(super) fn parse_power(
    payload: &[u8],
    location: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Event>, ParseError> {
    let body: PowerBody = serde_json::from_slice(payload)?;
    let timestamp = format_timestamp(now);

    let mut events = Vec::with_capacity(2);

    let mut power = Event::new(MessageKind::Power, timestamp.clone());
    for control in &body.power_control {
        if control.name.as_deref() != Some(SERVER_POWER_CONTROL) {
            continue;
        }
        let Some(member_id) = control.member_id.as_deref() else {
            continue;
        };
        let Some(index) = member_index(member_id) else {
            warn!(location, member_id, "power-control member id outside index range, skipped");
            continue;
        };
        let Some(value) = control.power_consumed_watts.and_then(format_value) else {
            continue;
        };
        power.oem.sensors.push(SensorPayload {
            timestamp: timestamp.clone(),
            location: location.to_owned(),
            physical_context: "Chassis".to_owned(),
            device_specific_context: None,
            index: Some(index),
            parental_index: None,
            value,
        });
    }
    if !power.is_empty() {
        events.push(power);
    }

    let mut voltage = Event::new(MessageKind::Voltage, timestamp.clone());
    for supply in &body.power_supplies {
        let Some(member_id) = supply.member_id.as_deref() else {
            continue;
        };
        let Some(index) = member_index(member_id) else {
            warn!(location, member_id, "power-supply member id outside index range, skipped");
            continue;
        };
        let Some(value) = supply.line_input_voltage.and_then(format_value) else {
            continue;
        };
        voltage.oem.sensors.push(SensorPayload {
            timestamp: timestamp.clone(),
            location: location.to_owned(),
            physical_context: "PowerSupplyBay".to_owned(),
            device_specific_context: None,
            index: Some(index),
            parental_index: None,
            value,
        });
    }
    for rail in &body.voltages {
        let Some(name) = rail.name.as_deref() else {
            continue;
        };
        let Some(value) = rail.reading_volts.and_then(format_value) else {
            continue;
        };
        // Rail names carry a three-character prefix ("P12 VDD" -> " VDD");
        // shorter names yield an empty context but the reading still flows.
        let device_context = name.get(3..).unwrap_or("").to_owned();
        voltage.oem.sensors.push(SensorPayload {
            timestamp: timestamp.clone(),
            location: location.to_owned(),
            physical_context: "SystemBoard".to_owned(),
            device_specific_context: Some(device_context),
            index: None,
            parental_index: None,
            value,
        });
    }
    if !voltage.is_empty() {
        events.push(voltage);
    }

    Ok(events)
}
