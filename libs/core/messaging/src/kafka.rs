//! Kafka backend built on `rdkafka`.
//!
//! Client construction never touches the network. `connect` verifies
//! reachability with a metadata request, which is blocking in librdkafka and
//! therefore runs on the blocking pool.

use crate::broker::{
    AdminClient, AdminFactory, BrokerConnection, ConsumerClient, ProducerClient, ReceivedMessage,
};
use crate::config::{BrokerEndpoint, TopicSpec};
use crate::error::MessagingError;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient as RdAdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Connection settings shared by the Kafka clients.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub endpoint: BrokerEndpoint,
    pub client_id: String,

    /// Bound for metadata requests used by connect and topic listing.
    pub metadata_timeout: Duration,

    /// librdkafka `message.timeout.ms`, caps how long a send can wait.
    pub message_timeout: Duration,
}

impl KafkaSettings {
    pub fn new(endpoint: BrokerEndpoint, client_id: impl Into<String>) -> Self {
        Self {
            endpoint,
            client_id: client_id.into(),
            metadata_timeout: Duration::from_secs(5),
            message_timeout: Duration::from_secs(5),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.endpoint.bootstrap_servers())
            .set("client.id", &self.client_id);
        config
    }
}

fn kafka_error(err: KafkaError) -> MessagingError {
    MessagingError::Connection(err.to_string())
}

async fn fetch_topic_names<F>(fetch: F) -> Result<Vec<String>, MessagingError>
where
    F: FnOnce() -> Result<Vec<String>, KafkaError> + Send + 'static,
{
    tokio::task::spawn_blocking(fetch)
        .await
        .map_err(|e| MessagingError::connection(format!("metadata task failed: {e}")))?
        .map_err(kafka_error)
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

pub struct KafkaProducerClient {
    producer: FutureProducer,
    settings: KafkaSettings,
}

impl KafkaProducerClient {
    pub fn new(settings: KafkaSettings) -> Result<Self, MessagingError> {
        let producer = settings
            .client_config()
            .set(
                "message.timeout.ms",
                settings.message_timeout.as_millis().to_string(),
            )
            .create::<FutureProducer>()
            .map_err(|e| MessagingError::Config(e.to_string()))?;

        Ok(Self { producer, settings })
    }
}

#[async_trait]
impl BrokerConnection for KafkaProducerClient {
    async fn connect(&self) -> Result<(), MessagingError> {
        let producer = self.producer.clone();
        let timeout = self.settings.metadata_timeout;
        let topics = fetch_topic_names(move || {
            producer
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|m| m.topics().iter().map(|t| t.name().to_string()).collect())
        })
        .await?;

        debug!(brokers = %self.settings.endpoint.bootstrap_servers(), topics = topics.len(), "Producer reached broker");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        let producer = self.producer.clone();
        let timeout = self.settings.message_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| MessagingError::connection(format!("flush task failed: {e}")))?
            .map_err(kafka_error)
    }
}

#[async_trait]
impl ProducerClient for KafkaProducerClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MessagingError> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_slice());

        self.producer
            .send(record, Timeout::After(self.settings.message_timeout))
            .await
            .map(|_| ())
            .map_err(|(err, _)| MessagingError::publish(topic, err.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Group consumer with auto-commit.
///
/// librdkafka fixes `auto.offset.reset` per client, so replay-from-beginning
/// is chosen at construction and the per-subscribe flag must agree with it.
pub struct KafkaConsumerClient {
    consumer: Arc<StreamConsumer>,
    settings: KafkaSettings,
    from_beginning: bool,
    topics: Mutex<BTreeSet<String>>,
    closed: AtomicBool,
}

impl KafkaConsumerClient {
    pub fn new(
        settings: KafkaSettings,
        group_id: &str,
        from_beginning: bool,
    ) -> Result<Self, MessagingError> {
        let consumer = settings
            .client_config()
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set(
                "auto.offset.reset",
                if from_beginning { "earliest" } else { "latest" },
            )
            .create::<StreamConsumer>()
            .map_err(|e| MessagingError::Config(e.to_string()))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            settings,
            from_beginning,
            topics: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BrokerConnection for KafkaConsumerClient {
    async fn connect(&self) -> Result<(), MessagingError> {
        let consumer = self.consumer.clone();
        let timeout = self.settings.metadata_timeout;
        fetch_topic_names(move || {
            consumer
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|m| m.topics().iter().map(|t| t.name().to_string()).collect())
        })
        .await?;

        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        self.closed.store(true, Ordering::SeqCst);
        self.consumer.unsubscribe();
        if let Ok(mut topics) = self.topics.lock() {
            topics.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl ConsumerClient for KafkaConsumerClient {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), MessagingError> {
        if from_beginning != self.from_beginning {
            warn!(
                topic,
                requested = from_beginning,
                configured = self.from_beginning,
                "Offset reset policy is fixed per consumer; using the configured one"
            );
        }

        let topics: Vec<String> = {
            let mut topics = self
                .topics
                .lock()
                .map_err(|_| MessagingError::subscribe(topic, "subscription set poisoned"))?;
            topics.insert(topic.to_string());
            topics.iter().cloned().collect()
        };
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();

        self.consumer
            .subscribe(&names)
            .map_err(|e| MessagingError::subscribe(topic, e.to_string()))
    }

    async fn recv(&self) -> Option<Result<ReceivedMessage, MessagingError>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let received = match self.consumer.recv().await {
            Ok(message) => Ok(ReceivedMessage::new(
                message.topic(),
                message.partition(),
                message.offset(),
                message.payload().map(<[u8]>::to_vec),
            )),
            Err(e) => Err(kafka_error(e)),
        };
        Some(received)
    }
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

pub struct KafkaAdminClient {
    admin: Arc<RdAdminClient<DefaultClientContext>>,
    settings: KafkaSettings,
}

#[async_trait]
impl BrokerConnection for KafkaAdminClient {
    async fn connect(&self) -> Result<(), MessagingError> {
        self.list_topics().await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        Ok(())
    }
}

#[async_trait]
impl AdminClient for KafkaAdminClient {
    async fn list_topics(&self) -> Result<Vec<String>, MessagingError> {
        let admin = self.admin.clone();
        let timeout = self.settings.metadata_timeout;
        fetch_topic_names(move || {
            admin
                .inner()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|m| m.topics().iter().map(|t| t.name().to_string()).collect())
        })
        .await
        .map_err(|e| MessagingError::provisioning(e.to_string()))
    }

    async fn create_topic(&self, topic: &TopicSpec) -> Result<(), MessagingError> {
        let new_topic = NewTopic::new(
            &topic.name,
            i32::try_from(topic.partitions).unwrap_or(i32::MAX),
            TopicReplication::Fixed(1),
        );
        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(
            self.settings.metadata_timeout,
        )));

        let results = self
            .admin
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| MessagingError::provisioning(e.to_string()))?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(MessagingError::TopicExists(name));
                }
                Err((name, code)) => {
                    return Err(MessagingError::provisioning(format!(
                        "failed to create topic '{name}': {code}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builds a fresh admin client per provisioning call.
#[derive(Clone)]
pub struct KafkaAdminFactory {
    settings: KafkaSettings,
}

impl KafkaAdminFactory {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }
}

impl AdminFactory for KafkaAdminFactory {
    fn admin(&self) -> Result<Box<dyn AdminClient>, MessagingError> {
        let admin = self
            .settings
            .client_config()
            .create::<RdAdminClient<DefaultClientContext>>()
            .map_err(|e| MessagingError::Config(e.to_string()))?;

        Ok(Box::new(KafkaAdminClient {
            admin: Arc::new(admin),
            settings: self.settings.clone(),
        }))
    }
}
