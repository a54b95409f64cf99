//! # River Collector Foundation
//!
//! Shared foundation crate for the river-collector telemetry pipeline.
//! Provides the pieces every component needs but none owns exclusively:
//!
//! - `config`: deployment configuration with hierarchical overrides
//! - `models`: the normalized event schema and external wire records
//! - `telemetry`: process-wide counters and the readiness state backing
//!   the ingress probes
//!
//! The collection runtime itself lives in `collector-core`; the daemon
//! binary is `riverd`.

pub mod config;
pub mod models;
pub mod telemetry;

pub use config::{Config, ConfigError, ConfigLoader};
pub use models::{
    Credentials, Event, KafkaBrokerConfig, MessageKind, RedfishEndpointDescription, SensorBlock,
    SensorPayload, TelemetryKind,
};
pub use telemetry::{CollectorStats, ReadinessState, StatsSnapshot};
