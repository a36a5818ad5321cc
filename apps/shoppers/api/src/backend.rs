//! Broker clients for the configured backend.
//!
//! With the `kafka` feature the clients talk to the configured cluster.
//! Without it an in-process broker stands in, which is enough to run the
//! API locally without any infrastructure.

use messaging::TopicProvisioner;

use crate::config::Config;

#[cfg(feature = "kafka")]
pub type ProducerBackend = messaging::kafka::KafkaProducerClient;
#[cfg(feature = "kafka")]
pub type ConsumerBackend = messaging::kafka::KafkaConsumerClient;

#[cfg(not(feature = "kafka"))]
pub type ProducerBackend = messaging::MemoryProducer;
#[cfg(not(feature = "kafka"))]
pub type ConsumerBackend = messaging::MemoryConsumer;

/// Unconnected clients, ready to hand to `Producer` and `Consumer`.
pub struct Backend {
    pub producer: ProducerBackend,
    pub consumer: ConsumerBackend,
    pub provisioner: TopicProvisioner,
}

#[cfg(feature = "kafka")]
pub fn build(config: &Config) -> eyre::Result<Backend> {
    use messaging::ConsumerOptions;
    use messaging::kafka::{
        KafkaAdminFactory, KafkaConsumerClient, KafkaProducerClient, KafkaSettings,
    };

    let endpoint = config.broker_endpoint()?;
    tracing::info!(brokers = %endpoint.bootstrap_servers(), "Using Kafka backend");

    let producer_settings = KafkaSettings::new(endpoint.clone(), &config.kafka.producer_client_id);
    let consumer_settings = KafkaSettings::new(endpoint, &config.kafka.consumer_client_id);

    Ok(Backend {
        producer: KafkaProducerClient::new(producer_settings.clone())?,
        consumer: KafkaConsumerClient::new(
            consumer_settings,
            &config.kafka.consumer_group,
            ConsumerOptions::default().from_beginning,
        )?,
        provisioner: TopicProvisioner::new(KafkaAdminFactory::new(producer_settings)),
    })
}

#[cfg(not(feature = "kafka"))]
pub fn build(config: &Config) -> eyre::Result<Backend> {
    let broker = messaging::InMemoryBroker::new();
    tracing::warn!(
        group = %config.kafka.consumer_group,
        "Built without the `kafka` feature, using the in-process broker"
    );

    Ok(Backend {
        producer: broker.producer(),
        consumer: broker.consumer(config.kafka.consumer_group.clone()),
        provisioner: TopicProvisioner::new(broker.admin_factory()),
    })
}
