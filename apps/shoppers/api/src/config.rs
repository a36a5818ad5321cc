use core_config::{FromEnv, kafka::KafkaConfig, server::ServerConfig};
use messaging::{BrokerEndpoint, RetryPolicy};

// Re-export Environment for use in other modules
pub use core_config::Environment;

/// Application-specific configuration
/// Composes shared config components from the `config` library
#[derive(Clone, Debug)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub server: ServerConfig,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let kafka = KafkaConfig::from_env()?; // Defaults to localhost:9092
        let server = ServerConfig::from_env()?; // Defaults: HOST=0.0.0.0, PORT=3000

        Ok(Self {
            kafka,
            server,
            environment,
        })
    }

    /// Connect retry policy shared by producer and consumer
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.kafka.connect_max_attempts)
            .with_per_attempt_timeout(self.kafka.connect_timeout)
            .with_inter_attempt_delay(self.kafka.connect_delay)
    }

    pub fn broker_endpoint(&self) -> eyre::Result<BrokerEndpoint> {
        Ok(BrokerEndpoint::new(self.kafka.brokers.iter().cloned())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn with_kafka(kafka: KafkaConfig) -> Config {
        Config {
            kafka,
            server: ServerConfig::default(),
            environment: Environment::Development,
        }
    }

    #[test]
    fn test_retry_policy_from_kafka_config() {
        let config = with_kafka(KafkaConfig {
            connect_max_attempts: 4,
            connect_timeout: Duration::from_millis(250),
            connect_delay: Duration::from_millis(100),
            ..KafkaConfig::default()
        });

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.per_attempt_timeout, Duration::from_millis(250));
        assert_eq!(policy.inter_attempt_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_retry_policy_clamps_zero_attempts() {
        let config = with_kafka(KafkaConfig {
            connect_max_attempts: 0,
            ..KafkaConfig::default()
        });

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.per_attempt_timeout, config.kafka.connect_timeout);
    }

    #[test]
    fn test_broker_endpoint_rejects_missing_port() {
        let config = with_kafka(KafkaConfig {
            brokers: vec!["kafka-1".to_string()],
            ..KafkaConfig::default()
        });
        assert!(config.broker_endpoint().is_err());

        let endpoint = with_kafka(KafkaConfig::default()).broker_endpoint().unwrap();
        assert_eq!(endpoint.bootstrap_servers(), "localhost:9092");
    }
}
