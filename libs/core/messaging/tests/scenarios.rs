//! End-to-end behaviour over the in-memory broker.

use messaging::{
    handler_fn, ClientRole, ConnectionState, Consumer, ConsumerOptions, HandlerError,
    InMemoryBroker, MemoryConsumer, MemoryProducer, ProvisionOutcome, Producer, RecordingClock,
    RetryPolicy, SubscriptionBootstrapper, TopicProvisioner, TopicSpec,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(5), Duration::from_secs(5))
}

fn producer(broker: &InMemoryBroker, max_attempts: u32) -> Producer<MemoryProducer> {
    Producer::new(
        broker.producer(),
        TopicProvisioner::new(broker.admin_factory()),
        policy(max_attempts),
    )
}

fn consumer(broker: &InMemoryBroker) -> Consumer<MemoryConsumer> {
    Consumer::new(broker.consumer("scenario-group"), policy(3))
}

#[tokio::test]
async fn scenario_a_topic_provisioned_once() {
    let broker = InMemoryBroker::new();
    let provisioner = TopicProvisioner::new(broker.admin_factory());
    let orders = TopicSpec::new("orders", 3);

    let first = provisioner.ensure_topic(&orders).await.unwrap();
    let second = provisioner.ensure_topic(&orders).await.unwrap();

    assert_eq!(first, ProvisionOutcome::Created);
    assert_eq!(second, ProvisionOutcome::AlreadyExists);
    assert_eq!(broker.topics().get("orders"), Some(&3));
    assert_eq!(broker.create_topic_calls(), 1);
    assert_eq!(broker.disconnects(ClientRole::Admin), 2);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_connects_on_final_attempt() {
    let broker = InMemoryBroker::new();
    broker.fail_next_connects(ClientRole::Producer, 2);
    let producer = producer(&broker, 3);

    producer.connect().await.unwrap();

    assert_eq!(producer.state(), ConnectionState::Connected);
    assert_eq!(broker.connect_attempts(ClientRole::Producer), 3);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_handler_invoked_once() {
    let broker = InMemoryBroker::new();
    let producer = producer(&broker, 3);
    let consumer = consumer(&broker);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn("capture", move |payload: Value| {
        let tx = tx.clone();
        async move {
            tx.send(payload)
                .map_err(|e| HandlerError::failed(e.to_string()))
        }
    });

    producer.start();
    consumer.start();
    consumer.subscribe("user-created", handler).await.unwrap();

    // The producer connects in the background; wait for it like a caller would.
    while !producer.is_connected() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let event = json!({ "event": "user.created", "userId": 42 });
    producer.send("user-created", &event).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), event);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn scenario_d_bootstrap_degrades_and_process_keeps_serving() {
    let broker = InMemoryBroker::unreachable();
    let consumer = consumer(&broker);
    consumer.start();

    let bootstrap = SubscriptionBootstrapper::new(consumer.clone())
        .register("user-created", handler_fn("noop", |_| async { Ok(()) }))
        .spawn();

    // Unrelated work completes while messaging is still retrying.
    let unrelated = tokio::spawn(async { 2 + 2 });
    assert_eq!(unrelated.await.unwrap(), 4);
    assert!(!bootstrap.is_finished());

    let outcome = bootstrap.await.unwrap();

    assert!(outcome.is_degraded());
    assert_eq!(outcome.failed[0].topic, "user-created");
    assert_eq!(outcome.failed[0].attempts, 3);
    assert_eq!(consumer.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn connect_attempts_never_exceed_policy() {
    for max_attempts in 1..=4 {
        for refusals in 0..=5 {
            let broker = InMemoryBroker::new();
            broker.fail_next_connects(ClientRole::Producer, refusals);
            let producer = Producer::with_clock(
                broker.producer(),
                TopicProvisioner::new(broker.admin_factory()),
                policy(max_attempts),
                Arc::new(RecordingClock::new()),
            );

            let result = producer.connect().await;
            let attempts = broker.connect_attempts(ClientRole::Producer);

            assert!(attempts <= max_attempts);
            if refusals >= max_attempts {
                assert!(result.is_err());
                assert_eq!(attempts, max_attempts);
            } else {
                assert!(result.is_ok());
                assert_eq!(attempts, refusals + 1);
            }
        }
    }
}

#[tokio::test]
async fn send_after_failed_connect_is_an_error() {
    let broker = InMemoryBroker::unreachable();
    let producer = Producer::with_clock(
        broker.producer(),
        TopicProvisioner::new(broker.admin_factory()),
        policy(2),
        Arc::new(RecordingClock::new()),
    );

    assert!(producer.connect().await.is_err());
    assert!(producer
        .send("orders", &json!({"id": 1}))
        .await
        .unwrap_err()
        .is_not_connected());
}

#[tokio::test]
async fn failing_message_does_not_block_next_one() {
    let broker = InMemoryBroker::new();
    let consumer = Consumer::with_options(
        broker.consumer("scenario-group"),
        policy(1),
        ConsumerOptions::default(),
        Arc::new(RecordingClock::new()),
    );
    consumer.connect().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = handler_fn("strict", move |payload: Value| {
        let tx = tx.clone();
        async move {
            if payload.get("userId").is_none() {
                return Err(HandlerError::invalid_payload("missing userId"));
            }
            let _ = tx.send(payload);
            Ok(())
        }
    });
    consumer.subscribe("user-created", handler).await.unwrap();

    broker.inject("user-created", Some(br#"{"event":"user.created"}"#.to_vec()));
    broker.inject("user-created", Some(br#"{"userId":7}"#.to_vec()));

    assert_eq!(rx.recv().await.unwrap(), json!({"userId": 7}));
}
