//! Policy and addressing types shared by all messaging components.

use crate::error::MessagingError;
use std::sync::Arc;
use std::time::Duration;

/// How persistently a connect attempt is retried.
///
/// The delay between attempts is fixed; there is no exponential growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, always at least 1.
    pub max_attempts: u32,

    /// Upper bound for a single attempt before it counts as failed.
    pub per_attempt_timeout: Duration,

    /// Wait between a failed attempt and the next one.
    pub inter_attempt_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, per_attempt_timeout: Duration, inter_attempt_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            per_attempt_timeout,
            inter_attempt_delay,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_inter_attempt_delay(mut self, delay: Duration) -> Self {
        self.inter_attempt_delay = delay;
        self
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 5s per attempt, 5s between attempts.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(5),
            inter_attempt_delay: Duration::from_secs(5),
        }
    }
}

/// Ordered, non-empty list of `host:port` broker addresses.
///
/// Immutable once built; clones share the same list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    hosts: Arc<[String]>,
}

impl BrokerEndpoint {
    /// Build an endpoint, rejecting an empty list or entries without a numeric port.
    pub fn new<I, S>(hosts: I) -> Result<Self, MessagingError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: Vec<String> = hosts
            .into_iter()
            .map(|h| h.into().trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        if hosts.is_empty() {
            return Err(MessagingError::Config(
                "at least one broker address is required".to_string(),
            ));
        }

        for host in &hosts {
            let valid = host
                .rsplit_once(':')
                .map(|(name, port)| !name.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(MessagingError::Config(format!(
                    "invalid broker address '{host}', expected host:port"
                )));
            }
        }

        Ok(Self {
            hosts: hosts.into(),
        })
    }

    /// Parse a comma separated list such as `"kafka-1:9092,kafka-2:9092"`.
    pub fn parse(list: &str) -> Result<Self, MessagingError> {
        Self::new(list.split(','))
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Comma joined form understood by Kafka clients.
    pub fn bootstrap_servers(&self) -> String {
        self.hosts.join(",")
    }
}

/// A topic to provision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicSpec {
    pub name: String,

    /// Partition count, at least 1.
    pub partitions: u32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        Self {
            name: name.into(),
            partitions: partitions.max(1),
        }
    }

    /// Single-partition topic.
    pub fn single(name: impl Into<String>) -> Self {
        Self::new(name, 1)
    }
}

/// Tuning for the consumer's readiness wait and dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Interval between connection checks while a subscribe waits.
    pub poll_interval: Duration,

    /// Number of checks before subscribe gives up with `NotConnected`.
    pub max_polls: u32,

    /// Start from the earliest retained message when the group has no committed offset.
    pub from_beginning: bool,

    /// Optional bound on a single handler invocation.
    pub handler_timeout: Option<Duration>,

    /// Pause after a broker-side receive error before polling again.
    pub error_backoff: Duration,
}

impl ConsumerOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    pub fn with_from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 10,
            from_beginning: true,
            handler_timeout: None,
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Timing of the startup subscription bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPolicy {
    /// Wait before the first subscribe attempt.
    pub initial_delay: Duration,

    /// Subscribe attempts per registration, at least 1.
    pub max_attempts: u32,

    /// Wait between failed subscribe attempts.
    pub retry_delay: Duration,
}

impl BootstrapPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}
