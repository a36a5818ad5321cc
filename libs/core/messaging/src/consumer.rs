//! Group consumer with a single dispatch loop.
//!
//! Subscribing waits a bounded time for the connection, registers the
//! topic's handler and starts the dispatch loop on first use. The loop
//! decodes each message as JSON and runs the topic's handler to completion
//! before pulling the next message. Decode errors, handler errors, handler
//! timeouts and handler panics are logged and the loop moves on: a failed
//! message is dropped from the application's point of view, with no retry
//! and no dead-lettering.

use crate::broker::{ConsumerClient, ReceivedMessage};
use crate::clock::{default_clock, Clock};
use crate::config::{ConsumerOptions, RetryPolicy};
use crate::connection::{ClientRole, ConnectionManager, ConnectionState, ConnectionStatus};
use crate::error::{HandlerError, MessagingError};
use crate::handler::{HandlerRegistry, MessageHandler};
use crate::metrics::MessagingMetrics;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consumes subscribed topics and dispatches to registered handlers.
pub struct Consumer<C: ConsumerClient> {
    inner: Arc<Inner<C>>,
}

impl<C: ConsumerClient> Clone for Consumer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<C: ConsumerClient> {
    connection: Arc<ConnectionManager<C>>,
    registry: HandlerRegistry,
    options: ConsumerOptions,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    metrics: MessagingMetrics,
}

impl<C: ConsumerClient> Consumer<C> {
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self::with_options(client, policy, ConsumerOptions::default(), default_clock())
    }

    pub fn with_options(
        client: C,
        policy: RetryPolicy,
        options: ConsumerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                connection: Arc::new(ConnectionManager::with_clock(
                    client,
                    ClientRole::Consumer,
                    clock.clone(),
                )),
                registry: HandlerRegistry::new(),
                options,
                policy,
                clock,
                dispatch: Mutex::new(None),
                shutdown,
                metrics: MessagingMetrics::new(ClientRole::Consumer.into()),
            }),
        }
    }

    /// Start connecting in the background. Failure is logged, not raised.
    pub fn start(&self) -> JoinHandle<Result<(), MessagingError>> {
        let consumer = self.clone();
        tokio::spawn(async move {
            let result = consumer.connect().await;
            if let Err(e) = &result {
                warn!(error = %e, "Consumer could not connect; subscriptions will fail until it reconnects");
            }
            result
        })
    }

    /// Connect and wait for the outcome.
    pub async fn connect(&self) -> Result<(), MessagingError> {
        self.inner.shutdown.send_replace(false);
        self.inner
            .connection
            .connect_with_retry(&self.inner.policy)
            .await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Topics with a registered handler.
    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.topics()
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Waits up to `max_polls` x `poll_interval` for the connection and fails
    /// with [`MessagingError::NotConnected`] if it never comes up. A second
    /// subscription to the same topic replaces the first handler.
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MessagingError> {
        self.wait_until_connected().await?;

        let handler_name = handler.name().to_string();
        let previous = self.inner.registry.insert(topic, handler);

        if let Err(e) = self
            .inner
            .connection
            .client()
            .subscribe(topic, self.inner.options.from_beginning)
            .await
        {
            self.inner.registry.restore(topic, previous);
            error!(topic, error = %e, "Failed to subscribe");
            return Err(e);
        }

        info!(topic, handler = %handler_name, "Subscribed to topic");
        self.ensure_dispatch_loop();
        Ok(())
    }

    async fn wait_until_connected(&self) -> Result<(), MessagingError> {
        if self.is_connected() {
            return Ok(());
        }

        for poll in 1..=self.inner.options.max_polls {
            debug!(poll, state = %self.state(), "Waiting for consumer connection");
            self.inner.clock.sleep(self.inner.options.poll_interval).await;
            if self.is_connected() {
                return Ok(());
            }
        }

        Err(MessagingError::NotConnected {
            role: ClientRole::Consumer,
        })
    }

    fn ensure_dispatch_loop(&self) {
        let Ok(mut dispatch) = self.inner.dispatch.lock() else {
            return;
        };
        if dispatch.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let inner = self.inner.clone();
        let shutdown_rx = self.inner.shutdown.subscribe();
        *dispatch = Some(tokio::spawn(run_dispatch(inner, shutdown_rx)));
    }

    /// Run one received message through decoding and its handler.
    pub async fn dispatch(&self, message: ReceivedMessage) -> Result<(), MessagingError> {
        self.inner.dispatch(message).await
    }

    /// Stop the dispatch loop and release the connection.
    pub async fn disconnect(&self) {
        self.inner.shutdown.send_replace(true);

        let handle = self
            .inner
            .dispatch
            .lock()
            .ok()
            .and_then(|mut dispatch| dispatch.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch loop ended abnormally");
            }
        }

        self.inner.connection.disconnect().await;
    }

    /// Connection status handle for health reporting.
    pub fn status(&self) -> Arc<dyn ConnectionStatus> {
        self.inner.connection.clone()
    }
}

impl<C: ConsumerClient> Inner<C> {
    async fn dispatch(&self, message: ReceivedMessage) -> Result<(), MessagingError> {
        let topic = message.topic.as_str();
        self.metrics.message_consumed(topic);

        let Some(bytes) = message.payload.as_deref() else {
            debug!(topic, offset = message.offset, "Skipping message without payload");
            return Ok(());
        };

        let Some(handler) = self.registry.get(topic) else {
            warn!(topic, offset = message.offset, "No handler registered for topic");
            return Ok(());
        };

        let payload: Value = serde_json::from_slice(bytes).map_err(HandlerError::from)?;

        let start = Instant::now();
        let result = self.invoke(handler.as_ref(), payload).await;
        self.metrics.handler_completed(topic, start.elapsed());

        result.map_err(MessagingError::from)
    }

    async fn invoke(&self, handler: &dyn MessageHandler, payload: Value) -> Result<(), HandlerError> {
        let guarded = AssertUnwindSafe(handler.handle(payload)).catch_unwind();

        let outcome = match self.options.handler_timeout {
            Some(limit) => {
                tokio::select! {
                    biased;
                    outcome = guarded => outcome,
                    _ = self.clock.sleep(limit) => return Err(HandlerError::TimedOut(limit)),
                }
            }
            None => guarded.await,
        };

        outcome.unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run_dispatch<C: ConsumerClient>(inner: Arc<Inner<C>>, mut shutdown_rx: watch::Receiver<bool>) {
    info!(topics = ?inner.registry.topics(), "Starting dispatch loop");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping dispatch loop");
                    break;
                }
            }

            next = inner.connection.client().recv() => match next {
                None => {
                    info!("Message stream closed, stopping dispatch loop");
                    break;
                }
                Some(Err(e)) => {
                    error!(error = %e, "Error receiving message");
                    inner.clock.sleep(inner.options.error_backoff).await;
                }
                Some(Ok(message)) => {
                    let (topic, partition, offset) =
                        (message.topic.clone(), message.partition, message.offset);

                    if let Err(e) = inner.dispatch(message).await {
                        inner.metrics.handler_failed(&topic, &e.category().to_string());
                        error!(
                            topic = %topic,
                            partition,
                            offset,
                            error = %e,
                            "Failed to process message, skipping"
                        );
                    }
                }
            }
        }
    }

    info!("Dispatch loop stopped");
}
