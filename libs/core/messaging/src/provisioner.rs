//! Idempotent topic creation over a short-lived admin connection.

use crate::broker::{AdminClient, AdminFactory};
use crate::config::TopicSpec;
use crate::connection::ClientRole;
use crate::error::MessagingError;
use crate::metrics::MessagingMetrics;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `ensure_topic` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

/// Ensures topics exist. Each call opens and releases its own admin client.
#[derive(Clone)]
pub struct TopicProvisioner {
    factory: Arc<dyn AdminFactory>,
    metrics: MessagingMetrics,
}

impl TopicProvisioner {
    pub fn new(factory: impl AdminFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            metrics: MessagingMetrics::new(ClientRole::Admin.into()),
        }
    }

    /// Create `topic` if it is not already listed by the broker.
    ///
    /// The admin connection is released on every exit path. A
    /// [`MessagingError::TopicExists`] from a concurrent creator is treated
    /// as success.
    pub async fn ensure_topic(&self, topic: &TopicSpec) -> Result<ProvisionOutcome, MessagingError> {
        let session = AdminSession::new(self.factory.admin()?);
        let result = self.provision(session.client(), topic).await;
        session.release().await;

        match &result {
            Ok(ProvisionOutcome::Created) => {
                self.metrics.topic_created(&topic.name);
                info!(topic = %topic.name, partitions = topic.partitions, "Topic created");
            }
            Ok(ProvisionOutcome::AlreadyExists) => {
                debug!(topic = %topic.name, "Topic already exists");
            }
            Err(e) => {
                warn!(topic = %topic.name, error = %e, "Failed to ensure topic");
            }
        }
        result
    }

    async fn provision(
        &self,
        admin: &dyn AdminClient,
        topic: &TopicSpec,
    ) -> Result<ProvisionOutcome, MessagingError> {
        admin.connect().await?;

        let existing = admin.list_topics().await?;
        if existing.iter().any(|name| name == &topic.name) {
            return Ok(ProvisionOutcome::AlreadyExists);
        }

        match admin.create_topic(topic).await {
            Ok(()) => Ok(ProvisionOutcome::Created),
            Err(MessagingError::TopicExists(_)) => {
                debug!(topic = %topic.name, "Topic created concurrently");
                Ok(ProvisionOutcome::AlreadyExists)
            }
            Err(e) => Err(e),
        }
    }
}

/// Scoped admin connection.
///
/// `release` disconnects explicitly. If the session is dropped without it
/// (a panic or a cancelled future), disconnect is spawned on the runtime.
struct AdminSession {
    client: Arc<dyn AdminClient>,
    released: bool,
}

impl AdminSession {
    fn new(client: Box<dyn AdminClient>) -> Self {
        Self {
            client: Arc::from(client),
            released: false,
        }
    }

    fn client(&self) -> &dyn AdminClient {
        self.client.as_ref()
    }

    async fn release(mut self) {
        self.released = true;
        disconnect_admin(self.client.clone()).await;
    }
}

impl Drop for AdminSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(disconnect_admin(self.client.clone()));
        }
    }
}

async fn disconnect_admin(client: Arc<dyn AdminClient>) {
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "Failed to release admin connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;

    #[tokio::test]
    async fn test_creates_missing_topic() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let outcome = provisioner
            .ensure_topic(&TopicSpec::new("user-created", 1))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::Created);
        assert_eq!(broker.topics().get("user-created"), Some(&1));
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }

    #[tokio::test]
    async fn test_existing_topic_is_untouched() {
        let broker = InMemoryBroker::new().with_topic("user-created", 3);
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let outcome = provisioner
            .ensure_topic(&TopicSpec::single("user-created"))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert_eq!(broker.create_topic_calls(), 0);
        assert_eq!(broker.topics().get("user-created"), Some(&3));
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }

    #[tokio::test]
    async fn test_second_call_is_noop() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::new(broker.admin_factory());
        let topic = TopicSpec::single("orders");

        provisioner.ensure_topic(&topic).await.unwrap();
        let outcome = provisioner.ensure_topic(&topic).await.unwrap();

        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert_eq!(broker.create_topic_calls(), 1);
        assert_eq!(broker.disconnects(ClientRole::Admin), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creation_counts_as_existing() {
        let broker = InMemoryBroker::new();
        broker.create_concurrently("orders");
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let outcome = provisioner
            .ensure_topic(&TopicSpec::single("orders"))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert_eq!(broker.create_topic_calls(), 1);
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }

    #[tokio::test]
    async fn test_other_create_failures_propagate() {
        let broker = InMemoryBroker::new();
        broker.fail_create_topics(Some("topic 'orders' already exists but is marked for deletion"));
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let err = provisioner
            .ensure_topic(&TopicSpec::single("orders"))
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::Provisioning(_)));
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }

    #[tokio::test]
    async fn test_failed_admin_release_is_counted_and_swallowed() {
        let broker = InMemoryBroker::new();
        broker.fail_disconnects(Some("socket reset"));
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let outcome = provisioner
            .ensure_topic(&TopicSpec::single("orders"))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisionOutcome::Created);
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }

    #[tokio::test]
    async fn test_list_failure_still_releases() {
        let broker = InMemoryBroker::new();
        broker.fail_list_topics(Some("metadata unavailable"));
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let err = provisioner
            .ensure_topic(&TopicSpec::single("orders"))
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::Provisioning(_)));
        assert!(broker.topics().is_empty());
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_and_releases() {
        let broker = InMemoryBroker::unreachable();
        let provisioner = TopicProvisioner::new(broker.admin_factory());

        let err = provisioner
            .ensure_topic(&TopicSpec::single("orders"))
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::Connection(_)));
        assert_eq!(broker.disconnects(ClientRole::Admin), 1);
    }
}
