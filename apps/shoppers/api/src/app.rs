//! Wiring of the messaging handles, the users domain and the HTTP routes.

use axum::Router;
use domain_users::{InMemoryUserRepository, USER_CREATED_TOPIC, UserCreatedHandler, UsersService};
use messaging::{
    BootstrapPolicy, Consumer, ConsumerClient, HealthState, Producer, ProducerClient,
    StartupOutcome, SubscriptionBootstrapper,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "shoppers-api";

/// Everything the process shares between request handlers and background tasks.
pub struct App<P: ProducerClient, C: ConsumerClient> {
    pub producer: Producer<P>,
    pub consumer: Consumer<C>,
    pub users: UsersService<InMemoryUserRepository, P>,
    pub health: HealthState,
}

/// Handles of the startup tasks spawned by [`App::start`].
pub struct StartupTasks {
    pub producer: JoinHandle<Result<(), messaging::MessagingError>>,
    pub consumer: JoinHandle<Result<(), messaging::MessagingError>>,
    pub subscriptions: JoinHandle<StartupOutcome>,
    pub topics: JoinHandle<()>,
}

impl StartupTasks {
    /// Stop whatever is still retrying, e.g. on shutdown.
    pub fn abort(&self) {
        self.producer.abort();
        self.consumer.abort();
        self.subscriptions.abort();
        self.topics.abort();
    }
}

impl<P: ProducerClient, C: ConsumerClient> App<P, C> {
    pub fn new(producer: Producer<P>, consumer: Consumer<C>, partitions: u32) -> Self {
        let users = UsersService::new(InMemoryUserRepository::new(), producer.clone())
            .with_partitions(partitions);
        let health = HealthState::new(SERVICE_NAME)
            .with_connection(producer.status())
            .with_connection(consumer.status());

        Self {
            producer,
            consumer,
            users,
            health,
        }
    }

    /// Health probes at the root, users API under `/users`.
    pub fn router(&self) -> Router {
        Router::new()
            .nest("/users", domain_users::handlers::router(self.users.clone()))
            .merge(self.health.router())
    }

    /// Kick off broker connects, topic provisioning and subscriptions.
    ///
    /// Nothing here is awaited; the HTTP server starts while these run.
    pub fn start(&self, policy: BootstrapPolicy) -> StartupTasks {
        let producer = self.producer.start();
        let consumer = self.consumer.start();

        let handler = Arc::new(UserCreatedHandler::new(self.users.repository().clone()));
        let subscriptions = SubscriptionBootstrapper::new(self.consumer.clone())
            .with_policy(policy)
            .register(USER_CREATED_TOPIC, handler)
            .spawn();

        let users = self.users.clone();
        let topics = tokio::spawn(async move {
            match users.init().await {
                Ok(outcome) => info!(topic = USER_CREATED_TOPIC, ?outcome, "Topic ready"),
                Err(e) => warn!(
                    topic = USER_CREATED_TOPIC,
                    error = %e,
                    "Topic provisioning failed, continuing without it"
                ),
            }
        });

        StartupTasks {
            producer,
            consumer,
            subscriptions,
            topics,
        }
    }

    /// Close both broker connections; the consumer's dispatch loop stops first.
    pub async fn shutdown(&self) {
        info!("Shutting down: closing broker connections");
        tokio::join!(self.producer.disconnect(), self.consumer.disconnect());
        info!("Broker connections closed");
    }
}
