//! In-process broker for tests and local runs without Kafka.
//!
//! Topics keep every published message so a consumer group without a
//! committed offset can replay from the beginning. Failures are scripted:
//! whole-broker reachability, a number of refused connects per role, hanging
//! connects, and failing publishes, topic listings or disconnects.

use crate::broker::{
    AdminClient, AdminFactory, BrokerConnection, ConsumerClient, ProducerClient, ReceivedMessage,
};
use crate::config::TopicSpec;
use crate::connection::ClientRole;
use crate::error::MessagingError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct BrokerState {
    unreachable: bool,
    hang_connects: bool,
    refuse_connects: HashMap<ClientRole, u32>,
    publish_failure: Option<String>,
    list_topics_failure: Option<String>,
    disconnect_failure: Option<String>,
    create_topic_failure: Option<String>,
    concurrent_creates: HashSet<String>,
    connect_attempts: HashMap<ClientRole, u32>,
    disconnects: HashMap<ClientRole, u32>,
    list_topics_calls: u32,
    create_topic_calls: u32,
    topics: BTreeMap<String, TopicLog>,
    committed: HashMap<(String, String), i64>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

#[derive(Default)]
struct TopicLog {
    partitions: u32,
    messages: Vec<Option<Vec<u8>>>,
}

#[derive(Clone)]
struct Subscriber {
    sender: mpsc::UnboundedSender<ReceivedMessage>,
}

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// A reachable broker with no topics.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that refuses every connection until made reachable.
    pub fn unreachable() -> Self {
        let broker = Self::new();
        broker.set_reachable(false);
        broker
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            link: Link::new(self.clone(), ClientRole::Producer),
        }
    }

    pub fn consumer(&self, group: impl Into<String>) -> MemoryConsumer {
        let (sender, receiver) = mpsc::unbounded_channel();
        MemoryConsumer {
            link: Link::new(self.clone(), ClientRole::Consumer),
            group: group.into(),
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    pub fn admin_factory(&self) -> MemoryAdminFactory {
        MemoryAdminFactory {
            broker: self.clone(),
        }
    }

    // ---- scripting ----

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Refuse the next `count` connects for `role`.
    pub fn fail_next_connects(&self, role: ClientRole, count: u32) {
        self.lock().refuse_connects.insert(role, count);
    }

    /// Make connects never settle.
    pub fn hang_connects(&self, hang: bool) {
        self.lock().hang_connects = hang;
    }

    /// Fail every publish with `message`, or stop failing with `None`.
    pub fn fail_publishes(&self, message: Option<&str>) {
        self.lock().publish_failure = message.map(str::to_string);
    }

    pub fn fail_list_topics(&self, message: Option<&str>) {
        self.lock().list_topics_failure = message.map(str::to_string);
    }

    pub fn fail_create_topics(&self, message: Option<&str>) {
        self.lock().create_topic_failure = message.map(str::to_string);
    }

    /// Have another client create `topic` between the next listing and the
    /// create call that follows it.
    pub fn create_concurrently(&self, topic: &str) {
        self.lock().concurrent_creates.insert(topic.to_string());
    }

    /// Make every client's disconnect report `message`. The link is still
    /// released and counted.
    pub fn fail_disconnects(&self, message: Option<&str>) {
        self.lock().disconnect_failure = message.map(str::to_string);
    }

    /// Pre-create a topic.
    pub fn with_topic(self, name: &str, partitions: u32) -> Self {
        self.lock().topics.entry(name.to_string()).or_default().partitions = partitions;
        self
    }

    /// Append a raw record to `topic` and deliver it to current subscribers.
    pub fn inject(&self, topic: &str, payload: Option<Vec<u8>>) {
        let mut state = self.lock();
        append(&mut state, topic, payload);
    }

    // ---- inspection ----

    pub fn connect_attempts(&self, role: ClientRole) -> u32 {
        self.lock().connect_attempts.get(&role).copied().unwrap_or(0)
    }

    pub fn disconnects(&self, role: ClientRole) -> u32 {
        self.lock().disconnects.get(&role).copied().unwrap_or(0)
    }

    pub fn list_topics_calls(&self) -> u32 {
        self.lock().list_topics_calls
    }

    pub fn create_topic_calls(&self) -> u32 {
        self.lock().create_topic_calls
    }

    /// Topic names with their partition counts.
    pub fn topics(&self) -> BTreeMap<String, u32> {
        self.lock()
            .topics
            .iter()
            .map(|(name, log)| (name.clone(), log.partitions))
            .collect()
    }

    /// Payloads on `topic` decoded as JSON, oldest first. Undecodable records are skipped.
    pub fn published(&self, topic: &str) -> Vec<serde_json::Value> {
        self.lock()
            .topics
            .get(topic)
            .map(|log| {
                log.messages
                    .iter()
                    .flatten()
                    .filter_map(|bytes| serde_json::from_slice(bytes).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn append(state: &mut BrokerState, topic: &str, payload: Option<Vec<u8>>) {
    let log = state.topics.entry(topic.to_string()).or_insert_with(|| TopicLog {
        partitions: 1,
        messages: Vec::new(),
    });
    let offset = log.messages.len() as i64;
    log.messages.push(payload.clone());

    if let Some(subscribers) = state.subscribers.get_mut(topic) {
        subscribers.retain(|s| {
            s.sender
                .send(ReceivedMessage::new(topic, 0, offset, payload.clone()))
                .is_ok()
        });
    }
}

/// Per-client connection bookkeeping.
struct Link {
    broker: InMemoryBroker,
    role: ClientRole,
    connected: AtomicBool,
}

impl Link {
    fn new(broker: InMemoryBroker, role: ClientRole) -> Self {
        Self {
            broker,
            role,
            connected: AtomicBool::new(false),
        }
    }

    async fn connect(&self) -> Result<(), MessagingError> {
        let hang = {
            let mut state = self.broker.lock();
            *state.connect_attempts.entry(self.role).or_default() += 1;

            if let Some(remaining) = state.refuse_connects.get_mut(&self.role) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(MessagingError::connection("connection refused"));
                }
            }
            if state.unreachable {
                return Err(MessagingError::connection("broker unreachable"));
            }
            state.hang_connects
        };

        if hang {
            std::future::pending::<()>().await;
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MessagingError> {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.broker.lock();
        *state.disconnects.entry(self.role).or_default() += 1;
        match state.disconnect_failure.clone() {
            Some(message) => Err(MessagingError::connection(message)),
            None => Ok(()),
        }
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.connected.load(Ordering::SeqCst) && !self.broker.lock().unreachable {
            Ok(())
        } else {
            Err(MessagingError::NotConnected { role: self.role })
        }
    }
}

/// Producer client over [`InMemoryBroker`].
pub struct MemoryProducer {
    link: Link,
}

#[async_trait]
impl BrokerConnection for MemoryProducer {
    async fn connect(&self) -> Result<(), MessagingError> {
        self.link.connect().await
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        self.link.disconnect()
    }
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), MessagingError> {
        self.link
            .ensure_connected()
            .map_err(|e| MessagingError::publish(topic, e.to_string()))?;

        let mut state = self.link.broker.lock();
        if let Some(message) = state.publish_failure.clone() {
            return Err(MessagingError::publish(topic, message));
        }
        append(&mut state, topic, Some(payload));
        Ok(())
    }
}

/// Group consumer over [`InMemoryBroker`].
pub struct MemoryConsumer {
    link: Link,
    group: String,
    sender: Mutex<Option<mpsc::UnboundedSender<ReceivedMessage>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReceivedMessage>>,
}

impl MemoryConsumer {
    fn sender(&self) -> Option<mpsc::UnboundedSender<ReceivedMessage>> {
        self.sender.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl BrokerConnection for MemoryConsumer {
    async fn connect(&self) -> Result<(), MessagingError> {
        self.link.connect().await
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        let released = self.link.disconnect();
        let ours = self.sender.lock().ok().and_then(|mut s| s.take());
        if let Some(ours) = ours {
            let mut state = self.link.broker.lock();
            for subscribers in state.subscribers.values_mut() {
                subscribers.retain(|s| !s.sender.same_channel(&ours));
            }
        }
        released
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn subscribe(&self, topic: &str, from_beginning: bool) -> Result<(), MessagingError> {
        self.link
            .ensure_connected()
            .map_err(|e| MessagingError::subscribe(topic, e.to_string()))?;
        let sender = self
            .sender()
            .ok_or_else(|| MessagingError::subscribe(topic, "consumer closed"))?;

        let mut state = self.link.broker.lock();
        let already = state
            .subscribers
            .get(topic)
            .is_some_and(|subs| subs.iter().any(|s| s.sender.same_channel(&sender)));
        if already {
            return Ok(());
        }

        let key = (self.group.clone(), topic.to_string());
        let start = match state.committed.get(&key) {
            Some(committed) => committed + 1,
            None if from_beginning => 0,
            None => state
                .topics
                .get(topic)
                .map(|log| log.messages.len() as i64)
                .unwrap_or(0),
        };

        if let Some(log) = state.topics.get(topic) {
            for (offset, payload) in log.messages.iter().enumerate().skip(start as usize) {
                let _ = sender.send(ReceivedMessage::new(topic, 0, offset as i64, payload.clone()));
            }
        }

        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { sender });
        Ok(())
    }

    async fn recv(&self) -> Option<Result<ReceivedMessage, MessagingError>> {
        let message = self.receiver.lock().await.recv().await?;

        // auto-commit on delivery
        self.link.broker.lock().committed.insert(
            (self.group.clone(), message.topic.clone()),
            message.offset,
        );
        Some(Ok(message))
    }
}

/// Hands out fresh [`MemoryAdmin`] clients.
#[derive(Clone)]
pub struct MemoryAdminFactory {
    broker: InMemoryBroker,
}

impl AdminFactory for MemoryAdminFactory {
    fn admin(&self) -> Result<Box<dyn AdminClient>, MessagingError> {
        Ok(Box::new(MemoryAdmin {
            link: Link::new(self.broker.clone(), ClientRole::Admin),
        }))
    }
}

pub struct MemoryAdmin {
    link: Link,
}

#[async_trait]
impl BrokerConnection for MemoryAdmin {
    async fn connect(&self) -> Result<(), MessagingError> {
        self.link.connect().await
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        self.link.disconnect()
    }
}

#[async_trait]
impl AdminClient for MemoryAdmin {
    async fn list_topics(&self) -> Result<Vec<String>, MessagingError> {
        self.link.ensure_connected()?;
        let mut state = self.link.broker.lock();
        state.list_topics_calls += 1;
        if let Some(message) = state.list_topics_failure.clone() {
            return Err(MessagingError::provisioning(message));
        }
        Ok(state.topics.keys().cloned().collect())
    }

    async fn create_topic(&self, topic: &TopicSpec) -> Result<(), MessagingError> {
        self.link.ensure_connected()?;
        let mut state = self.link.broker.lock();
        state.create_topic_calls += 1;
        if let Some(message) = state.create_topic_failure.clone() {
            return Err(MessagingError::provisioning(message));
        }
        if state.concurrent_creates.remove(&topic.name) {
            state.topics.insert(
                topic.name.clone(),
                TopicLog {
                    partitions: topic.partitions,
                    messages: Vec::new(),
                },
            );
        }
        if state.topics.contains_key(&topic.name) {
            return Err(MessagingError::TopicExists(topic.name.clone()));
        }
        state.topics.insert(
            topic.name.clone(),
            TopicLog {
                partitions: topic.partitions,
                messages: Vec::new(),
            },
        );
        Ok(())
    }
}
