//! Vendor parser registry.
//!
//! Each BMC family is a tagged variant carrying a capability set: the
//! chassis URL builder plus pure parse functions per telemetry kind.
//! Parsers perform no I/O and read no clocks; the caller supplies the
//! timestamp. A top-level JSON decode failure surfaces as `ParseError`;
//! missing or malformed fields inside an otherwise well-formed payload are
//! skipped silently at the sensor-payload granularity. Events with no
//! sensor payloads are never returned.

mod events;
mod power;
mod thermal;

pub use events::{extract_context, parse_pushed_event, PushedEvents};

use chrono::{DateTime, SecondsFormat, Utc};
use river_lib::models::{Event, TelemetryKind};
use thiserror::Error;

/// Payload decode errors. These never propagate beyond one poll cycle; the
/// caller logs and abandons the payload.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("top-level JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no parser registered for {family:?}/{kind}")]
    UnknownParser {
        family: VendorFamily,
        kind: TelemetryKind,
    },
}

/// Parse function signature shared by every registry entry.
pub type ParseFn = fn(&[u8], &str, DateTime<Utc>) -> Result<Vec<Event>, ParseError>;

/// The BMC families found in River cabinets. Exactly one family is bound
/// to each endpoint at insert time, chosen from the discovered model
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorFamily {
    Gigabyte,
    Intel,
    Hpe,
}

impl VendorFamily {
    /// Select the family from the discovered vendor/model string. Unknown
    /// models fall back to Gigabyte, the majority platform in River racks.
    pub fn from_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("intel") {
            VendorFamily::Intel
        } else if model.contains("hpe") || model.contains("proliant") || model.contains("ilo") {
            VendorFamily::Hpe
        } else {
            VendorFamily::Gigabyte
        }
    }

    /// The chassis identifier is the only vendor-specific part of the
    /// telemetry URL.
    fn chassis(self) -> &'static str {
        match self {
            VendorFamily::Gigabyte => "Self",
            VendorFamily::Intel => "RackMount/Baseboard",
            VendorFamily::Hpe => "1",
        }
    }

    /// Full payload URL for one telemetry kind on one endpoint.
    pub fn payload_url(self, fqdn: &str, kind: TelemetryKind) -> String {
        format!(
            "{}/redfish/v1/Chassis/{}/{}",
            base_url(fqdn),
            self.chassis(),
            kind.as_str()
        )
    }
}

/// Endpoint FQDNs normally carry no scheme; default to HTTPS.
pub(crate) fn base_url(fqdn: &str) -> String {
    if fqdn.contains("://") {
        fqdn.to_owned()
    } else {
        format!("https://{fqdn}")
    }
}

/// Look up the parse function for a family/kind combination.
pub fn lookup(family: VendorFamily, kind: TelemetryKind) -> Option<ParseFn> {
    // The River families share normalization rules; they differ upstream in
    // the chassis path. The registry stays keyed by family so a divergent
    // firmware generation can split off without touching callers.
    match (family, kind) {
        (_, TelemetryKind::Power) => Some(power::parse_power),
        (_, TelemetryKind::Thermal) => Some(thermal::parse_thermal),
    }
}

/// Decode a raw payload into normalized events tagged with the source
/// location and the caller-supplied timestamp.
pub fn parse_and_tag(
    payload: &[u8],
    family: VendorFamily,
    kind: TelemetryKind,
    location: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Event>, ParseError> {
    let parser = lookup(family, kind).ok_or(ParseError::UnknownParser { family, kind })?;
    parser(payload, location, now)
}

/// RFC 3339 rendering shared by all parsers.
pub(crate) fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render a reading as a decimal string with full precision. Non-finite
/// readings are rejected; the sensor payload is skipped.
pub(crate) fn format_value(value: f64) -> Option<String> {
    if value.is_finite() {
        Some(format!("{value}"))
    } else {
        None
    }
}

/// Parse a Redfish member identifier into a sensor index. Identifiers
/// outside the unsigned 8-bit range are rejected; the caller skips the
/// payload with a warning.
pub(crate) fn member_index(member_id: &str) -> Option<u8> {
    member_id.trim().parse::<u8>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_selection_from_model_strings() {
        assert_eq!(
            VendorFamily::from_model("Intel Corporation S2600BPB"),
            VendorFamily::Intel
        );
        assert_eq!(
            VendorFamily::from_model("ProLiant DL325 Gen10"),
            VendorFamily::Hpe
        );
        assert_eq!(
            VendorFamily::from_model("Gigabyte R272-Z30"),
            VendorFamily::Gigabyte
        );
        // Unknown models fall back to the majority platform.
        assert_eq!(VendorFamily::from_model(""), VendorFamily::Gigabyte);
    }

    #[test]
    fn payload_urls_use_vendor_chassis() {
        assert_eq!(
            VendorFamily::Intel.payload_url("x3000c0s1b0", TelemetryKind::Power),
            "https://x3000c0s1b0/redfish/v1/Chassis/RackMount/Baseboard/Power"
        );
        assert_eq!(
            VendorFamily::Gigabyte.payload_url("x3000c0s1b0", TelemetryKind::Thermal),
            "https://x3000c0s1b0/redfish/v1/Chassis/Self/Thermal"
        );
        assert_eq!(
            VendorFamily::Hpe.payload_url("x3000c0s1b0", TelemetryKind::Power),
            "https://x3000c0s1b0/redfish/v1/Chassis/1/Power"
        );
    }

    #[test]
    fn scheme_qualified_fqdns_pass_through() {
        assert_eq!(
            VendorFamily::Gigabyte.payload_url("http://127.0.0.1:8080", TelemetryKind::Power),
            "http://127.0.0.1:8080/redfish/v1/Chassis/Self/Power"
        );
    }

    #[test]
    fn every_family_and_kind_has_a_parser() {
        for family in [
            VendorFamily::Gigabyte,
            VendorFamily::Intel,
            VendorFamily::Hpe,
        ] {
            for kind in TelemetryKind::ALL {
                assert!(lookup(family, kind).is_some());
            }
        }
    }

    #[test]
    fn member_index_bounds() {
        assert_eq!(member_index("0"), Some(0));
        assert_eq!(member_index("255"), Some(255));
        assert_eq!(member_index("256"), None);
        assert_eq!(member_index("-1"), None);
        assert_eq!(member_index("psu0"), None);
    }

    #[test]
    fn format_value_full_precision() {
        assert_eq!(format_value(312.5).as_deref(), Some("312.5"));
        assert_eq!(format_value(208.0).as_deref(), Some("208"));
        assert_eq!(format_value(12.01).as_deref(), Some("12.01"));
        assert_eq!(format_value(f64::NAN), None);
        assert_eq!(format_value(f64::INFINITY), None);
    }
}
