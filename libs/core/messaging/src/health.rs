//! Health endpoints for K8s probes.
//!
//! Broker connectivity is reported but never gates liveness or readiness:
//! the process keeps serving its non-messaging routes while the broker is
//! down, so `/ready` answers 200 with `messaging: "degraded"`.

use crate::connection::{ConnectionState, ConnectionStatus};
use crate::metrics::render_metrics;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Overall messaging condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingStatus {
    Connected,
    Degraded,
}

/// Body returned by the probes.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: String,
    pub messaging: MessagingStatus,
    pub connections: BTreeMap<String, ConnectionState>,
}

/// Shared view over the broker connections of a process.
#[derive(Clone)]
pub struct HealthState {
    service: String,
    connections: Arc<RwLock<Vec<Arc<dyn ConnectionStatus>>>>,
}

impl HealthState {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            connections: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Track a connection, typically `producer.status()` or `consumer.status()`.
    pub fn track(&self, connection: Arc<dyn ConnectionStatus>) {
        if let Ok(mut connections) = self.connections.write() {
            connections.push(connection);
        }
    }

    pub fn with_connection(self, connection: Arc<dyn ConnectionStatus>) -> Self {
        self.track(connection);
        self
    }

    /// Connected only when every tracked connection is.
    pub fn messaging(&self) -> MessagingStatus {
        let all_connected = self
            .connections
            .read()
            .map(|c| c.iter().all(|s| s.state() == ConnectionState::Connected))
            .unwrap_or(false);

        if all_connected {
            MessagingStatus::Connected
        } else {
            MessagingStatus::Degraded
        }
    }

    pub fn status(&self, status: &'static str) -> HealthStatus {
        let connections = self
            .connections
            .read()
            .map(|c| {
                c.iter()
                    .map(|s| (s.role().to_string(), s.state()))
                    .collect()
            })
            .unwrap_or_default();

        HealthStatus {
            status,
            service: self.service.clone(),
            messaging: self.messaging(),
            connections,
        }
    }

    /// `/health`, `/healthz`, `/ready`, `/readyz` and `/metrics`.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.clone())
    }
}

/// Liveness probe handler.
async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthStatus>) {
    (StatusCode::OK, Json(state.status("healthy")))
}

/// Readiness probe handler.
async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthStatus>) {
    (StatusCode::OK, Json(state.status("ready")))
}

async fn metrics_handler() -> String {
    render_metrics()
}
