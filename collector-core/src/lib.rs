//! # Collector Core Runtime
//!
//! The collection runtime for the river-collector telemetry pipeline.
//! Acquires environmental and power telemetry from BMCs over their
//! Redfish surface, normalizes it into the shared event schema, and
//! produces the events to a set of Kafka brokers by topic class.
//!
//! ## Architecture
//!
//! ```text
//!        HSM ──► inventory loop ──► endpoint set
//!                                    │        │
//!                              poll ticks   subscription
//!                                    │        reconcile
//!                                    ▼        ▼
//!   BMC fleet ◄── HTTP client pair ──┴────────┘
//!        │
//!        ├── polled payloads ──► vendor parsers ──► publisher ──► brokers
//!        └── pushed events  ──► ingress server ──►     ▲
//!                                                      │
//!                              lifecycle supervisor ───┘ (drain + flush)
//! ```
//!
//! The supervisor owns all shared state and passes it by reference to the
//! component tasks; nothing lives at module scope.

pub mod client;
pub mod collector;
pub mod config;
pub mod hsm;
pub mod ingress;
pub mod inventory;
pub mod parsers;
pub mod poller;
pub mod publisher;
pub mod subscriptions;
pub mod vault;

pub use client::{ClientError, ClientSettings, HttpClientPair};
pub use collector::Collector;
pub use config::CollectorConfig;
pub use ingress::IngressState;
pub use inventory::{Endpoint, Inventory};
pub use parsers::{ParseError, VendorFamily};
pub use publisher::{Broker, ProducerHandle, PublishError, Publisher};
pub use subscriptions::SubscriptionManager;
