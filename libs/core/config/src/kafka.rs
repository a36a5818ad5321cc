use crate::{env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;

/// Kafka connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Ordered `host:port` list, never empty
    pub brokers: Vec<String>,
    pub producer_client_id: String,
    pub consumer_client_id: String,
    pub consumer_group: String,
    pub connect_max_attempts: u32,
    pub connect_timeout: Duration,
    pub connect_delay: Duration,
    pub default_partitions: u32,
}

impl KafkaConfig {
    /// Comma joined broker list
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            producer_client_id: "shoppers-producer".to_string(),
            consumer_client_id: "shoppers-consumer".to_string(),
            consumer_group: "shoppers-consumer-group".to_string(),
            connect_max_attempts: 3,
            connect_timeout: Duration::from_millis(5000),
            connect_delay: Duration::from_millis(5000),
            default_partitions: 1,
        }
    }
}

impl FromEnv for KafkaConfig {
    /// Reads:
    /// - KAFKA_BROKERS: comma separated, defaults to localhost:9092
    /// - KAFKA_PRODUCER_CLIENT_ID / KAFKA_CONSUMER_CLIENT_ID / KAFKA_CONSUMER_GROUP
    /// - KAFKA_CONNECT_MAX_ATTEMPTS (3), KAFKA_CONNECT_TIMEOUT_MS (5000), KAFKA_CONNECT_DELAY_MS (5000)
    /// - KAFKA_DEFAULT_PARTITIONS (1)
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let brokers: Vec<String> = env_or_default("KAFKA_BROKERS", "localhost:9092")
            .split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "KAFKA_BROKERS".to_string(),
                details: "at least one broker is required".to_string(),
            });
        }

        let connect_max_attempts = env_parse("KAFKA_CONNECT_MAX_ATTEMPTS", 3u32)?;
        if connect_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KAFKA_CONNECT_MAX_ATTEMPTS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let default_partitions = env_parse("KAFKA_DEFAULT_PARTITIONS", 1u32)?;
        if default_partitions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KAFKA_DEFAULT_PARTITIONS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            brokers,
            producer_client_id: env_or_default(
                "KAFKA_PRODUCER_CLIENT_ID",
                &defaults.producer_client_id,
            ),
            consumer_client_id: env_or_default(
                "KAFKA_CONSUMER_CLIENT_ID",
                &defaults.consumer_client_id,
            ),
            consumer_group: env_or_default("KAFKA_CONSUMER_GROUP", &defaults.consumer_group),
            connect_max_attempts,
            connect_timeout: Duration::from_millis(env_parse("KAFKA_CONNECT_TIMEOUT_MS", 5000u64)?),
            connect_delay: Duration::from_millis(env_parse("KAFKA_CONNECT_DELAY_MS", 5000u64)?),
            default_partitions,
        })
    }
}
