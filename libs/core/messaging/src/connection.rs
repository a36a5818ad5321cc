//! Connection lifecycle with bounded retries.
//!
//! ```text
//!                 connect_with_retry
//!  Disconnected ─────────────────────▶ Connecting ──ok──▶ Connected
//!       ▲                                  │                  │
//!       │                               exhausted         disconnect
//!       │                                  ▼                  │
//!       │                               Failed ───────────────┤
//!       └─────────────────────────────────────────────────────┘
//! ```

use crate::broker::BrokerConnection;
use crate::clock::{default_clock, Clock};
use crate::config::RetryPolicy;
use crate::error::MessagingError;
use crate::metrics::MessagingMetrics;
use crate::retry::retry_with_policy;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use strum::{AsRefStr, Display, IntoStaticStr};
use tracing::{error, info, warn};

/// Observable state of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Which kind of client a connection belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClientRole {
    Producer,
    Consumer,
    Admin,
}

/// Anything that can report a connection state, used by health reporting.
pub trait ConnectionStatus: Send + Sync {
    fn role(&self) -> ClientRole;

    fn state(&self) -> ConnectionState;
}

/// Owns one broker client and the state of its connection.
pub struct ConnectionManager<C: BrokerConnection> {
    client: Arc<C>,
    role: ClientRole,
    state: RwLock<ConnectionState>,
    clock: Arc<dyn Clock>,
    metrics: MessagingMetrics,
}

impl<C: BrokerConnection> ConnectionManager<C> {
    pub fn new(client: C, role: ClientRole) -> Self {
        Self::with_clock(client, role, default_clock())
    }

    pub fn with_clock(client: C, role: ClientRole, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: Arc::new(client),
            role,
            state: RwLock::new(ConnectionState::Disconnected),
            clock,
            metrics: MessagingMetrics::new(role.into()),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn role(&self) -> ClientRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Failed)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
        self.metrics.connected(next == ConnectionState::Connected);
    }

    /// Connect, retrying under `policy`.
    ///
    /// Already connected is a no-op. A concurrent call while another connect
    /// is in flight is rejected rather than queued.
    pub async fn connect_with_retry(&self, policy: &RetryPolicy) -> Result<(), MessagingError> {
        {
            let mut state = self
                .state
                .write()
                .map_err(|_| MessagingError::connection("connection state lock poisoned"))?;
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(MessagingError::connection(format!(
                        "{} connect already in progress",
                        self.role
                    )))
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    *state = ConnectionState::Connecting;
                }
            }
        }
        let mut guard = ConnectingGuard::new(&self.state);

        info!(role = %self.role, max_attempts = policy.max_attempts, "Connecting to broker");

        let client = self.client.clone();
        let metrics = self.metrics.clone();
        let outcome = retry_with_policy(policy, self.clock.as_ref(), self.role.as_ref(), |_| {
            let client = client.clone();
            metrics.connect_attempt();
            async move { client.connect().await }
        })
        .await;
        let attempts = outcome.attempts;
        guard.disarm();

        match outcome.into_result() {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!(role = %self.role, attempts, "Connected to broker");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                error!(
                    role = %self.role,
                    attempts,
                    error = %e,
                    "Failed to connect to broker"
                );
                Err(e)
            }
        }
    }

    /// Release the connection if it is established; otherwise do nothing.
    ///
    /// Teardown failures are logged, never returned.
    pub async fn disconnect(&self) {
        if !self.is_connected() {
            return;
        }

        match self.client.disconnect().await {
            Ok(()) => info!(role = %self.role, "Disconnected from broker"),
            Err(e) => warn!(role = %self.role, error = %e, "Error while disconnecting from broker"),
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Puts a `Connecting` state back to `Disconnected` when a connect future is
/// dropped before it finished, so the next call is not rejected.
struct ConnectingGuard<'a> {
    state: &'a RwLock<ConnectionState>,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn new(state: &'a RwLock<ConnectionState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.state.write() {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                warn!("Connect cancelled before completion");
            }
        }
    }
}

impl<C: BrokerConnection> ConnectionStatus for ConnectionManager<C> {
    fn role(&self) -> ClientRole {
        self.role
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RecordingClock;
    use crate::memory::InMemoryBroker;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(50), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_connects_first_attempt() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(broker.producer(), ClientRole::Producer);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.connect_with_retry(&fast_policy(3)).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(broker.connect_attempts(ClientRole::Producer), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(ClientRole::Producer, 2);
        let clock = RecordingClock::new();
        let manager = ConnectionManager::with_clock(
            broker.producer(),
            ClientRole::Producer,
            Arc::new(clock.clone()),
        );

        manager.connect_with_retry(&fast_policy(3)).await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(broker.connect_attempts(ClientRole::Producer), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10); 2]);
    }

    #[tokio::test]
    async fn test_exhaustion_marks_failed() {
        let broker = InMemoryBroker::unreachable();
        let manager = ConnectionManager::with_clock(
            broker.consumer("group"),
            ClientRole::Consumer,
            Arc::new(RecordingClock::new()),
        );

        let err = manager.connect_with_retry(&fast_policy(3)).await.unwrap_err();

        assert!(matches!(err, MessagingError::Connection(_)));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(broker.connect_attempts(ClientRole::Consumer), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_times_out() {
        let broker = InMemoryBroker::new();
        broker.hang_connects(true);
        let manager = ConnectionManager::new(broker.producer(), ClientRole::Producer);
        let policy = RetryPolicy::new(2, Duration::from_secs(5), Duration::from_secs(5));

        let err = manager.connect_with_retry(&policy).await.unwrap_err();

        assert!(matches!(err, MessagingError::Timeout(_)));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(broker.connect_attempts(ClientRole::Producer), 2);
    }

    #[tokio::test]
    async fn test_failed_can_reconnect() {
        let broker = InMemoryBroker::unreachable();
        let manager = ConnectionManager::with_clock(
            broker.producer(),
            ClientRole::Producer,
            Arc::new(RecordingClock::new()),
        );

        assert!(manager.connect_with_retry(&fast_policy(1)).await.is_err());
        broker.set_reachable(true);
        manager.connect_with_retry(&fast_policy(1)).await.unwrap();

        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(broker.producer(), ClientRole::Producer);

        manager.connect_with_retry(&fast_policy(1)).await.unwrap();
        manager.connect_with_retry(&fast_policy(1)).await.unwrap();

        assert_eq!(broker.connect_attempts(ClientRole::Producer), 1);
    }

    #[tokio::test]
    async fn test_disconnect_only_when_connected() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(broker.producer(), ClientRole::Producer);

        manager.disconnect().await;
        assert_eq!(broker.disconnects(ClientRole::Producer), 0);

        manager.connect_with_retry(&fast_policy(1)).await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(broker.disconnects(ClientRole::Producer), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_connect_can_be_retried() {
        let broker = InMemoryBroker::new();
        broker.hang_connects(true);
        let manager = ConnectionManager::new(broker.producer(), ClientRole::Producer);
        let policy = RetryPolicy::new(1, Duration::from_secs(30), Duration::from_secs(5));

        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), manager.connect_with_retry(&policy)).await;
        assert!(cancelled.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        broker.hang_connects(false);
        manager.connect_with_retry(&policy).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(broker.connect_attempts(ClientRole::Producer), 2);
    }

    #[tokio::test]
    async fn test_aborted_connect_task_can_be_retried() {
        let broker = InMemoryBroker::new();
        broker.hang_connects(true);
        let manager = Arc::new(ConnectionManager::new(broker.producer(), ClientRole::Producer));

        let background = manager.clone();
        let task = tokio::spawn(async move { background.connect_with_retry(&fast_policy(1)).await });
        while broker.connect_attempts(ClientRole::Producer) == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        broker.hang_connects(false);
        manager.connect_with_retry(&fast_policy(1)).await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_failed_disconnect_still_ends_disconnected() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(broker.producer(), ClientRole::Producer);
        manager.connect_with_retry(&fast_policy(1)).await.unwrap();
        broker.fail_disconnects(Some("socket reset"));

        manager.disconnect().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(broker.disconnects(ClientRole::Producer), 1);

        broker.fail_disconnects(None);
        manager.connect_with_retry(&fast_policy(1)).await.unwrap();
        assert!(manager.is_connected());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ClientRole::Consumer.to_string(), "consumer");
    }

    #[test]
    fn test_role_static_label() {
        let label: &'static str = ClientRole::Producer.into();
        assert_eq!(label, "producer");
        assert_eq!(<&'static str>::from(ClientRole::Admin), "admin");
        assert_eq!(ClientRole::Consumer.as_ref(), "consumer");
    }
}
