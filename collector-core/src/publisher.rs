//! Event publishing fabric.
//!
//! One producer per configured broker; each normalized event routes to the
//! first broker advertising its topic. Writes are asynchronous and batched
//! inside the producer; a full local queue surfaces as backpressure to the
//! caller, which drops the event and counts it. Shutdown flushes every
//! broker against a deadline and reports whatever had to be abandoned.

use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
use river_lib::models::{Event, KafkaBrokerConfig, MessageKind};
use river_lib::telemetry::CollectorStats;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Publishing errors surfaced to the poller and ingress.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The producer's local queue is full; the caller drops the event.
    #[error("producer local queue full")]
    Backpressure,

    /// Publishing after shutdown began; callers exit their loop.
    #[error("publisher is shut down")]
    Shutdown,

    #[error("producer error: {0}")]
    Producer(String),

    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Seam over one broker connection. The production implementation wraps an
/// rdkafka threaded producer; tests substitute an in-memory recorder.
pub trait ProducerHandle: Send + Sync {
    /// Enqueue one message onto the producer's local queue without
    /// blocking.
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Flush against a deadline; returns the number of messages still
    /// unflushed when it expired.
    fn flush(&self, deadline: Duration) -> usize;
}

/// rdkafka-backed producer handle.
pub struct KafkaProducerHandle {
    producer: ThreadedProducer<DefaultProducerContext>,
}

impl KafkaProducerHandle {
    /// Build a producer for one broker address. This does not connect; the
    /// client dials lazily once messages are enqueued.
    pub fn connect(broker_address: &str) -> Result<Self, PublishError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", broker_address)
            .set("client.id", "river-collector")
            .create()
            .map_err(|err: KafkaError| PublishError::Producer(err.to_string()))?;
        Ok(Self { producer })
    }
}

impl ProducerHandle for KafkaProducerHandle {
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        // No key: partitioning stays round-robin.
        let record: BaseRecord<'_, (), [u8]> = BaseRecord::to(topic).payload(payload);
        self.producer.send(record).map_err(|(err, _)| match err {
            KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => {
                PublishError::Backpressure
            }
            other => PublishError::Producer(other.to_string()),
        })
    }

    fn flush(&self, deadline: Duration) -> usize {
        if let Err(err) = self.producer.flush(deadline) {
            warn!(%err, "producer flush did not complete before the deadline");
        }
        self.producer.in_flight_count().max(0) as usize
    }
}

/// One broker with the topics it advertises.
pub struct Broker {
    config: KafkaBrokerConfig,
    handle: Box<dyn ProducerHandle>,
}

impl Broker {
    pub fn new(config: KafkaBrokerConfig, handle: Box<dyn ProducerHandle>) -> Self {
        Self { config, handle }
    }

    fn advertises(&self, topic: &str) -> bool {
        self.config.topics.iter().any(|t| t == topic)
    }
}

/// Multiplexes normalized events onto broker connections by topic.
pub struct Publisher {
    brokers: Vec<Broker>,
    stats: Arc<CollectorStats>,
    closed: AtomicBool,
}

impl Publisher {
    /// Build brokers from the broker list JSON at `path`.
    pub fn from_config_file(path: &Path, stats: Arc<CollectorStats>) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|err| anyhow::anyhow!("reading {}: {err}", path.display()))?;
        let configs: Vec<KafkaBrokerConfig> = serde_json::from_slice(&raw)
            .map_err(|err| anyhow::anyhow!("decoding {}: {err}", path.display()))?;

        let mut brokers = Vec::with_capacity(configs.len());
        for config in configs {
            match KafkaProducerHandle::connect(&config.broker_address) {
                Ok(handle) => {
                    info!(broker = %config.broker_address, topics = ?config.topics, "producer ready");
                    brokers.push(Broker::new(config, Box::new(handle)));
                }
                Err(err) => {
                    warn!(broker = %config.broker_address, %err, "producer construction failed");
                }
            }
        }
        Ok(Self::with_brokers(brokers, stats))
    }

    /// Build from pre-constructed brokers. Used by tests and by anything
    /// embedding the runtime.
    pub fn with_brokers(brokers: Vec<Broker>, stats: Arc<CollectorStats>) -> Self {
        Self {
            brokers,
            stats,
            closed: AtomicBool::new(false),
        }
    }

    /// True when at least one broker connection exists.
    pub fn connected(&self) -> bool {
        !self.brokers.is_empty()
    }

    /// Publish one normalized event. Never blocks: a full producer queue
    /// returns `Backpressure` and the caller decides what to drop.
    pub fn publish(&self, event: &Event) -> Result<(), PublishError> {
        if event.is_empty() {
            // Parsers never emit these; a hit here is a bug upstream.
            warn!(kind = ?event.message_id, "refusing to publish event with no sensor payloads");
            return Ok(());
        }
        let payload = serde_json::to_vec(event)?;
        self.publish_bytes(event.message_id, &payload)
    }

    /// Publish a pre-serialized payload under a message kind. Used for
    /// resource-event passthrough from the ingress path.
    pub fn publish_raw(&self, kind: MessageKind, payload: &[u8]) -> Result<(), PublishError> {
        self.publish_bytes(kind, payload)
    }

    fn publish_bytes(&self, kind: MessageKind, payload: &[u8]) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::Shutdown);
        }

        let topic = kind.topic();
        let Some(broker) = self.brokers.iter().find(|b| b.advertises(topic)) else {
            warn!(topic, "no broker advertises this topic; event dropped");
            self.stats.record_unrouted();
            return Ok(());
        };

        broker.handle.enqueue(topic, payload)?;
        self.stats.record_published();
        debug!(topic, bytes = payload.len(), "event enqueued");
        Ok(())
    }

    /// Flush every broker against the deadline and reject further
    /// publishes. Returns the total abandoned-message count.
    ///
    /// Blocking: run on a blocking thread during async shutdown.
    pub fn shutdown(&self, deadline: Duration) -> u64 {
        self.closed.store(true, Ordering::Release);

        let mut abandoned = 0u64;
        for broker in &self.brokers {
            let remaining = broker.handle.flush(deadline) as u64;
            info!(
                broker = %broker.config.broker_address,
                abandoned = remaining,
                "closed connection with broker"
            );
            abandoned += remaining;
        }
        if abandoned > 0 {
            self.stats.record_abandoned(abandoned);
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use river_lib::models::SensorPayload;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandle {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        queue_full: AtomicBool,
        unflushed: usize,
    }

    impl RecordingHandle {
        fn sent_topics(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }
    }

    impl ProducerHandle for Arc<RecordingHandle> {
        fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
            if self.queue_full.load(Ordering::Relaxed) {
                return Err(PublishError::Backpressure);
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_vec()));
            Ok(())
        }

        fn flush(&self, _deadline: Duration) -> usize {
            self.unflushed
        }
    }

    fn broker_config(address: &str, topics: &[&str]) -> KafkaBrokerConfig {
        KafkaBrokerConfig {
            broker_address: address.to_owned(),
            topics: topics.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    fn sample_event(kind: MessageKind) -> Event {
        let mut event = Event::new(kind, "2024-05-01T12:00:00Z");
        event.oem.sensors.push(SensorPayload {
            timestamp: "2024-05-01T12:00:00Z".to_owned(),
            location: "x3000c0s1b0".to_owned(),
            physical_context: "Chassis".to_owned(),
            device_specific_context: None,
            index: Some(0),
            parental_index: None,
            value: "312.5".to_owned(),
        });
        event
    }

    fn publisher_with(
        brokers: Vec<(Arc<RecordingHandle>, KafkaBrokerConfig)>,
    ) -> (Publisher, Arc<CollectorStats>) {
        let stats = Arc::new(CollectorStats::default());
        let brokers = brokers
            .into_iter()
            .map(|(handle, config)| Broker::new(config, Box::new(handle)))
            .collect();
        (
            Publisher::with_brokers(brokers, Arc::clone(&stats)),
            stats,
        )
    }

    #[test]
    fn events_route_to_the_first_advertising_broker() {
        let telemetry = Arc::new(RecordingHandle::default());
        let resource = Arc::new(RecordingHandle::default());
        let (publisher, stats) = publisher_with(vec![
            (
                Arc::clone(&telemetry),
                broker_config("kafka-1:9092", &["cray-telemetry-power"]),
            ),
            (
                Arc::clone(&resource),
                broker_config("kafka-2:9092", &["cray-dmtf-resource-event"]),
            ),
        ]);

        publisher.publish(&sample_event(MessageKind::Power)).unwrap();
        publisher
            .publish_raw(MessageKind::ResourceEvent, b"{}")
            .unwrap();

        assert_eq!(telemetry.sent_topics(), vec!["cray-telemetry-power"]);
        assert_eq!(resource.sent_topics(), vec!["cray-dmtf-resource-event"]);
        assert_eq!(stats.snapshot().events_published, 2);
    }

    #[test]
    fn unrouted_events_are_counted_and_dropped() {
        let handle = Arc::new(RecordingHandle::default());
        let (publisher, stats) = publisher_with(vec![(
            Arc::clone(&handle),
            broker_config("kafka-1:9092", &["cray-telemetry-power"]),
        )]);

        publisher
            .publish(&sample_event(MessageKind::Temperature))
            .unwrap();

        assert!(handle.sent_topics().is_empty());
        assert_eq!(stats.snapshot().events_unrouted, 1);
        assert_eq!(stats.snapshot().events_published, 0);
    }

    #[test]
    fn queue_full_surfaces_as_backpressure() {
        let handle = Arc::new(RecordingHandle::default());
        handle.queue_full.store(true, Ordering::Relaxed);
        let (publisher, _stats) = publisher_with(vec![(
            Arc::clone(&handle),
            broker_config("kafka-1:9092", &["cray-telemetry-power"]),
        )]);

        let err = publisher
            .publish(&sample_event(MessageKind::Power))
            .unwrap_err();
        assert!(matches!(err, PublishError::Backpressure));
    }

    #[test]
    fn empty_events_never_reach_a_broker() {
        let handle = Arc::new(RecordingHandle::default());
        let (publisher, _stats) = publisher_with(vec![(
            Arc::clone(&handle),
            broker_config("kafka-1:9092", &["cray-telemetry-power"]),
        )]);

        let empty = Event::new(MessageKind::Power, "2024-05-01T12:00:00Z");
        publisher.publish(&empty).unwrap();
        assert!(handle.sent_topics().is_empty());
    }

    #[test]
    fn shutdown_reports_abandoned_messages_and_rejects_new_work() {
        let handle = Arc::new(RecordingHandle {
            unflushed: 5,
            ..RecordingHandle::default()
        });
        let (publisher, stats) = publisher_with(vec![(
            Arc::clone(&handle),
            broker_config("kafka-1:9092", &["cray-telemetry-power"]),
        )]);

        let abandoned = publisher.shutdown(Duration::from_secs(15));
        assert_eq!(abandoned, 5);
        assert_eq!(stats.snapshot().messages_abandoned, 5);

        let err = publisher
            .publish(&sample_event(MessageKind::Power))
            .unwrap_err();
        assert!(matches!(err, PublishError::Shutdown));
    }
}
