//! Startup wiring of well-known subscriptions.
//!
//! Broker availability is never a precondition for process health: the
//! bootstrapper retries each subscription a bounded number of times and then
//! reports a [`StartupOutcome`] instead of failing.

use crate::broker::ConsumerClient;
use crate::clock::{default_clock, Clock};
use crate::config::BootstrapPolicy;
use crate::consumer::Consumer;
use crate::error::MessagingError;
use crate::handler::MessageHandler;
use crate::retry::retry_fixed;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A (topic, handler) pair wired at startup.
#[derive(Clone)]
pub struct Registration {
    pub topic: String,
    pub handler: Arc<dyn MessageHandler>,
}

/// A registration that could not be subscribed.
#[derive(Debug)]
pub struct FailedSubscription {
    pub topic: String,
    pub attempts: u32,
    pub error: MessagingError,
}

/// Result of a bootstrap run.
#[derive(Debug, Default)]
pub struct StartupOutcome {
    pub subscribed: Vec<String>,
    pub failed: Vec<FailedSubscription>,
}

impl StartupOutcome {
    /// True when at least one registration is not active.
    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Log a one-line summary at the appropriate level.
    pub fn log(&self) {
        if self.is_degraded() {
            let failed: Vec<&str> = self.failed.iter().map(|f| f.topic.as_str()).collect();
            warn!(
                subscribed = ?self.subscribed,
                failed = ?failed,
                "Messaging degraded: some subscriptions are inactive"
            );
        } else {
            info!(subscribed = ?self.subscribed, "All subscriptions active");
        }
    }
}

/// Subscribes registered handlers once the consumer is likely connected.
pub struct SubscriptionBootstrapper<C: ConsumerClient> {
    consumer: Consumer<C>,
    registrations: Vec<Registration>,
    policy: BootstrapPolicy,
    clock: Arc<dyn Clock>,
}

impl<C: ConsumerClient> SubscriptionBootstrapper<C> {
    pub fn new(consumer: Consumer<C>) -> Self {
        Self {
            consumer,
            registrations: Vec::new(),
            policy: BootstrapPolicy::default(),
            clock: default_clock(),
        }
    }

    pub fn with_policy(mut self, policy: BootstrapPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add a (topic, handler) pair.
    pub fn register(mut self, topic: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.registrations.push(Registration {
            topic: topic.into(),
            handler,
        });
        self
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Subscribe every registration. Never fails; inspect the outcome instead.
    pub async fn run(self) -> StartupOutcome {
        self.clock.sleep(self.policy.initial_delay).await;

        let mut outcome = StartupOutcome::default();

        for registration in &self.registrations {
            let topic = registration.topic.as_str();
            let attempt = retry_fixed(
                self.policy.max_attempts,
                self.policy.retry_delay,
                self.clock.as_ref(),
                topic,
                |_| self.consumer.subscribe(topic, registration.handler.clone()),
            )
            .await;

            match attempt.result {
                Ok(()) => outcome.subscribed.push(registration.topic.clone()),
                Err(e) => {
                    error!(
                        topic,
                        attempts = attempt.attempts,
                        error = %e,
                        "Giving up on subscription, continuing without it"
                    );
                    outcome.failed.push(FailedSubscription {
                        topic: registration.topic.clone(),
                        attempts: attempt.attempts,
                        error: e,
                    });
                }
            }
        }

        outcome
    }

    /// Run in the background and log the outcome when done.
    pub fn spawn(self) -> JoinHandle<StartupOutcome> {
        tokio::spawn(async move {
            let outcome = self.run().await;
            outcome.log();
            outcome
        })
    }
}
