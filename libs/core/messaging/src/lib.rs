//! Broker integration layer: resilient connections, idempotent topic
//! provisioning, JSON producer and consumer dispatch.
//!
//! The broker is treated as eventually-available infrastructure. Producers
//! and consumers connect in the background with a bounded retry policy, the
//! process reports itself ready regardless, and startup subscriptions degrade
//! to a logged [`StartupOutcome`] instead of failing the process.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────┐        ┌───────────────────┐
//!  HTTP/service ─▶│     Producer     │        │     Consumer      │──▶ handlers
//!                 │ ┌──────────────┐ │        │ ┌───────────────┐ │
//!                 │ │ConnectionMgr │ │        │ │ ConnectionMgr │ │
//!                 │ └──────────────┘ │        │ └───────────────┘ │
//!                 │ TopicProvisioner │        │  dispatch loop    │
//!                 └────────┬─────────┘        └────────▲──────────┘
//!                          │   ProducerClient /        │
//!                          ▼   AdminClient      ConsumerClient
//!                 ┌──────────────────────────────────────────────┐
//!                 │   broker backend: Kafka (feature) / memory   │
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! The two connection managers are independent; neither shares a connection
//! or a lock with the other.
//!
//! # Example
//!
//! ```ignore
//! use messaging::{handler_fn, Consumer, InMemoryBroker, Producer, RetryPolicy,
//!     SubscriptionBootstrapper, TopicProvisioner};
//!
//! let broker = InMemoryBroker::new();
//! let producer = Producer::new(broker.producer(), TopicProvisioner::new(broker.admin_factory()), RetryPolicy::default());
//! let consumer = Consumer::new(broker.consumer("my-group"), RetryPolicy::default());
//!
//! producer.start();
//! consumer.start();
//!
//! SubscriptionBootstrapper::new(consumer.clone())
//!     .register("user-created", handler_fn("audit", |payload| async move {
//!         tracing::info!(%payload, "user created");
//!         Ok(())
//!     }))
//!     .spawn();
//! ```

mod bootstrap;
mod broker;
mod clock;
mod config;
mod connection;
mod consumer;
mod error;
mod handler;
mod health;
mod memory;
mod metrics;
mod producer;
mod provisioner;
mod retry;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use bootstrap::{FailedSubscription, Registration, StartupOutcome, SubscriptionBootstrapper};
pub use broker::{
    AdminClient, AdminFactory, BrokerConnection, ConsumerClient, ProducerClient, ReceivedMessage,
};
pub use clock::{default_clock, Clock, RecordingClock, TokioClock};
pub use config::{BootstrapPolicy, BrokerEndpoint, ConsumerOptions, RetryPolicy, TopicSpec};
pub use connection::{ClientRole, ConnectionManager, ConnectionState, ConnectionStatus};
pub use consumer::Consumer;
pub use error::{ErrorCategory, HandlerError, MessagingError, MessagingResult};
pub use handler::{handler_fn, FnHandler, HandlerRegistry, MessageHandler, NoOpHandler};
pub use health::{HealthState, HealthStatus, MessagingStatus};
pub use memory::{InMemoryBroker, MemoryAdmin, MemoryAdminFactory, MemoryConsumer, MemoryProducer};
pub use metrics::{init_metrics, prometheus_handle, render_metrics, MessagingMetrics};
pub use producer::Producer;
pub use provisioner::{ProvisionOutcome, TopicProvisioner};
pub use retry::{retry_fixed, retry_with_policy, RetryOutcome};
