//! Thermal payload normalization.

use super::{format_timestamp, format_value, ParseError};
use chrono::{DateTime, Utc};
use river_lib::models::{Event, MessageKind, SensorPayload};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ThermalBody {
    #[serde(default)]
    temperatures: Vec<TemperatureReading>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemperatureReading {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    reading_celsius: Option<f64>,
}

/// One `Temperature` event with a payload per temperature reading; the
/// reading name becomes the device-specific context.
pub(super) fn parse_thermal(
    payload: &[u8],
    location: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Event>, ParseError> {
    let body: ThermalBody = serde_json::from_slice(payload)?;
    let timestamp = format_timestamp(now);

    let mut event = Event::new(MessageKind::Temperature, timestamp.clone());
    for reading in &body.temperatures {
        let Some(name) = reading.name.as_deref() else {
            continue;
        };
        let Some(value) = reading.reading_celsius.and_then(format_value) else {
            continue;
        };
        event.oem.sensors.push(SensorPayload {
            timestamp: timestamp.clone(),
            location: location.to_owned(),
            physical_context: "Baseboard".to_owned(),
            device_specific_context: Some(name.to_owned()),
            index: None,
            parental_index: None,
            value,
        });
    }

    if event.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(vec![event])
    }
}
