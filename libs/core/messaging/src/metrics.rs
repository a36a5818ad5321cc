//! Prometheus metrics for broker clients.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls return the existing handle.
/// Returns `None` when another recorder is already installed.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok::<_, metrics_exporter_prometheus::BuildError>(handle)
        })
        .map_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
        .ok()
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    prometheus_handle().map(|h| h.render()).unwrap_or_default()
}

/// Metrics helper labelled with the client role.
#[derive(Debug, Clone)]
pub struct MessagingMetrics {
    role: &'static str,
}

impl MessagingMetrics {
    pub fn new(role: &'static str) -> Self {
        Self { role }
    }

    pub fn connect_attempt(&self) {
        counter!("messaging_connect_attempts_total", "role" => self.role).increment(1);
    }

    /// 1 when connected, 0 otherwise.
    pub fn connected(&self, up: bool) {
        gauge!("messaging_connected", "role" => self.role).set(if up { 1.0 } else { 0.0 });
    }

    pub fn message_published(&self, topic: &str) {
        counter!(
            "messaging_messages_published_total",
            "topic" => topic.to_string()
        )
        .increment(1);
    }

    pub fn publish_failed(&self, topic: &str) {
        counter!(
            "messaging_publish_failures_total",
            "topic" => topic.to_string()
        )
        .increment(1);
    }

    pub fn message_consumed(&self, topic: &str) {
        counter!(
            "messaging_messages_consumed_total",
            "topic" => topic.to_string()
        )
        .increment(1);
    }

    pub fn handler_completed(&self, topic: &str, duration: Duration) {
        histogram!(
            "messaging_handler_duration_seconds",
            "topic" => topic.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn handler_failed(&self, topic: &str, category: &str) {
        counter!(
            "messaging_handler_failures_total",
            "topic" => topic.to_string(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn topic_created(&self, topic: &str) {
        counter!(
            "messaging_topics_created_total",
            "topic" => topic.to_string()
        )
        .increment(1);
    }
}
