//! Producer for JSON messages.
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{Producer, RetryPolicy, TopicProvisioner, TopicSpec};
//!
//! let producer = Producer::new(client, TopicProvisioner::new(admin_factory), RetryPolicy::default());
//!
//! // Connect in the background; readiness does not wait for the broker.
//! producer.start();
//!
//! producer.ensure_topic(&TopicSpec::single("user-created")).await?;
//! producer.send("user-created", &event).await?;
//! ```

use crate::broker::ProducerClient;
use crate::clock::{default_clock, Clock};
use crate::config::{RetryPolicy, TopicSpec};
use crate::connection::{ClientRole, ConnectionManager, ConnectionState, ConnectionStatus};
use crate::error::MessagingError;
use crate::metrics::MessagingMetrics;
use crate::provisioner::{ProvisionOutcome, TopicProvisioner};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Publishes JSON payloads over its own broker connection.
pub struct Producer<P: ProducerClient> {
    connection: Arc<ConnectionManager<P>>,
    provisioner: TopicProvisioner,
    policy: RetryPolicy,
    metrics: MessagingMetrics,
}

impl<P: ProducerClient> Clone for Producer<P> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            provisioner: self.provisioner.clone(),
            policy: self.policy.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<P: ProducerClient> Producer<P> {
    pub fn new(client: P, provisioner: TopicProvisioner, policy: RetryPolicy) -> Self {
        Self::with_clock(client, provisioner, policy, default_clock())
    }

    pub fn with_clock(
        client: P,
        provisioner: TopicProvisioner,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connection: Arc::new(ConnectionManager::with_clock(
                client,
                ClientRole::Producer,
                clock,
            )),
            provisioner,
            policy,
            metrics: MessagingMetrics::new(ClientRole::Producer.into()),
        }
    }

    /// Start connecting in the background.
    ///
    /// Exhausted retries only produce a warning here; the returned handle
    /// carries the result for callers that want to inspect it.
    pub fn start(&self) -> JoinHandle<Result<(), MessagingError>> {
        let producer = self.clone();
        tokio::spawn(async move {
            let result = producer.connect().await;
            if let Err(e) = &result {
                warn!(error = %e, "Producer could not connect; sends will fail until it reconnects");
            }
            result
        })
    }

    /// Connect and wait for the outcome.
    pub async fn connect(&self) -> Result<(), MessagingError> {
        self.connection.connect_with_retry(&self.policy).await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Serialize `payload` as JSON and publish it to `topic`.
    ///
    /// Fails fast with [`MessagingError::NotConnected`] unless connected.
    /// Publish failures are returned to the caller.
    pub async fn send<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<(), MessagingError> {
        if !self.connection.is_connected() {
            self.metrics.publish_failed(topic);
            return Err(MessagingError::NotConnected {
                role: ClientRole::Producer,
            });
        }

        let bytes = serde_json::to_vec(payload)?;
        let size = bytes.len();

        if let Err(e) = self.connection.client().publish(topic, bytes).await {
            self.metrics.publish_failed(topic);
            error!(topic, error = %e, "Failed to send message");
            return Err(e);
        }

        self.metrics.message_published(topic);
        debug!(topic, bytes = size, "Message sent");
        Ok(())
    }

    /// Create `topic` if missing, over a scoped admin connection.
    pub async fn ensure_topic(&self, topic: &TopicSpec) -> Result<ProvisionOutcome, MessagingError> {
        self.provisioner.ensure_topic(topic).await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Connection status handle for health reporting.
    pub fn status(&self) -> Arc<dyn ConnectionStatus> {
        self.connection.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RecordingClock;
    use crate::memory::InMemoryBroker;
    use serde_json::json;
    use std::time::Duration;

    fn producer(broker: &InMemoryBroker) -> Producer<crate::memory::MemoryProducer> {
        Producer::with_clock(
            broker.producer(),
            TopicProvisioner::new(broker.admin_factory()),
            RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(5)),
            Arc::new(RecordingClock::new()),
        )
    }

    #[tokio::test]
    async fn test_send_publishes_json() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();

        producer
            .send("user-created", &json!({"event": "user.created", "userId": 42}))
            .await
            .unwrap();

        assert_eq!(
            broker.published("user-created"),
            vec![json!({"event": "user.created", "userId": 42})]
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_fails_fast() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);

        let err = producer.send("orders", &json!({})).await.unwrap_err();

        assert!(err.is_not_connected());
        assert!(broker.published("orders").is_empty());
    }

    #[tokio::test]
    async fn test_send_after_exhausted_retries_fails() {
        let broker = InMemoryBroker::unreachable();
        let producer = producer(&broker);

        assert!(producer.connect().await.is_err());
        assert_eq!(producer.state(), ConnectionState::Failed);

        let err = producer.send("orders", &json!({"id": 1})).await.unwrap_err();
        assert!(err.is_not_connected());
    }

    #[tokio::test]
    async fn test_publish_failure_propagates() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);
        producer.connect().await.unwrap();
        broker.fail_publishes(Some("leader not available"));

        let err = producer.send("orders", &json!({"id": 1})).await.unwrap_err();

        assert!(matches!(err, MessagingError::Publish { .. }));
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let broker = InMemoryBroker::unreachable();
        let producer = producer(&broker);

        let handle = producer.start();
        let result = handle.await.unwrap();

        assert!(result.is_err());
        assert_eq!(broker.connect_attempts(ClientRole::Producer), 3);
    }

    #[tokio::test]
    async fn test_ensure_topic_delegates_to_provisioner() {
        let broker = InMemoryBroker::new();
        let producer = producer(&broker);

        let outcome = producer
            .ensure_topic(&TopicSpec::single("user-created"))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::Created);
        assert!(broker.topics().contains_key("user-created"));
    }
}
