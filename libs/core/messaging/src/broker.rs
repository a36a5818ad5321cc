//! Broker client seam.
//!
//! The components in this crate never talk to a broker library directly. They
//! drive these traits, implemented by the Kafka backend (`kafka` feature) and
//! by [`crate::memory::InMemoryBroker`] for tests and local runs.

use crate::config::TopicSpec;
use crate::error::MessagingError;
use async_trait::async_trait;

/// A message pulled from a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,

    /// Raw payload. `None` for tombstones.
    pub payload: Option<Vec<u8>>,
}

impl ReceivedMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Option<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload,
        }
    }
}

/// Physical connection lifecycle shared by all client kinds.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Establish the connection. May hang; callers bound it with a timeout.
    async fn connect(&self) -> Result<(), MessagingError>;

    /// Release the connection.
    async fn disconnect(&self) -> Result<(), MessagingError>;
}

/// Client able to publish raw payloads.
#[async_trait]
pub trait ProducerClient: BrokerConnection {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MessagingError>;
}

/// Group consumer client.
#[async_trait]
pub trait ConsumerClient: BrokerConnection {
    /// Add `topic` to the subscription set.
    ///
    /// Subscribing to a topic already in the set must not change delivery:
    /// each message still arrives once, with no replay.
    ///
    /// With `from_beginning`, a group with no committed offset starts at the
    /// earliest retained message instead of only new ones.
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), MessagingError>;

    /// Next message across all subscribed topics. `None` once the stream is closed.
    async fn recv(&self) -> Option<Result<ReceivedMessage, MessagingError>>;
}

/// Administrative client used for topic provisioning.
#[async_trait]
pub trait AdminClient: BrokerConnection {
    async fn list_topics(&self) -> Result<Vec<String>, MessagingError>;

    async fn create_topic(&self, topic: &TopicSpec) -> Result<(), MessagingError>;
}

/// Produces fresh administrative clients, one per provisioning call.
pub trait AdminFactory: Send + Sync + 'static {
    fn admin(&self) -> Result<Box<dyn AdminClient>, MessagingError>;
}
