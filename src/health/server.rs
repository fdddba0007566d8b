//! Heartbeat aggregation HTTP server
//!
//! Workers POST their pid on every health report; `/health` answers healthy
//! only when every expected worker has a fresh heartbeat.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Heartbeat request body. `pid` may also arrive as a numeric string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default, deserialize_with = "deserialize_pid")]
    pub pid: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PidField {
    Number(i64),
    Text(String),
}

fn deserialize_pid<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<PidField>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PidField::Number(pid)) => Ok(Some(pid)),
        Some(PidField::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("pid is not an integer: {:?}", text))),
    }
}

/// Health response body; `heartbeats` is absent until the first heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeats: Option<BTreeMap<String, i64>>,
}

/// Liveness verdict over all tracked workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    pub healthy: bool,
    /// Heartbeat age in whole seconds per pid
    pub ages: BTreeMap<u32, i64>,
}

/// Last-seen timestamp per worker pid. Entries are never removed.
#[derive(Debug, Default)]
pub struct HeartbeatTable {
    heartbeats: RwLock<HashMap<u32, DateTime<Utc>>>,
}

impl HeartbeatTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, pid: u32) {
        self.record_at(pid, Utc::now()).await;
    }

    pub async fn record_at(&self, pid: u32, at: DateTime<Utc>) {
        self.heartbeats.write().await.insert(pid, at);
    }

    pub async fn len(&self) -> usize {
        self.heartbeats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heartbeats.read().await.is_empty()
    }

    pub async fn verdict(&self, processes: usize, threshold: Duration) -> Option<HealthVerdict> {
        self.verdict_at(Utc::now(), processes, threshold).await
    }

    /// `None` until the first heartbeat arrives.
    pub async fn verdict_at(
        &self,
        now: DateTime<Utc>,
        processes: usize,
        threshold: Duration,
    ) -> Option<HealthVerdict> {
        let heartbeats = self.heartbeats.read().await;
        if heartbeats.is_empty() {
            return None;
        }

        let ages: BTreeMap<u32, i64> = heartbeats
            .iter()
            .map(|(pid, last_seen)| (*pid, (now - *last_seen).num_seconds().max(0)))
            .collect();

        let threshold = threshold.as_secs() as i64;
        let fresh = ages.values().max().is_some_and(|oldest| *oldest <= threshold);

        Some(HealthVerdict {
            healthy: fresh && ages.len() == processes,
            ages,
        })
    }
}

/// Shared state for the health server
#[derive(Debug)]
pub struct HealthState {
    /// Expected number of worker processes
    pub processes: usize,
    /// Maximum heartbeat age
    pub threshold: Duration,
    pub heartbeats: HeartbeatTable,
}

impl HealthState {
    pub fn new(processes: usize, threshold: Duration) -> Self {
        Self {
            processes,
            threshold,
            heartbeats: HeartbeatTable::new(),
        }
    }
}

/// Routes for the heartbeat aggregator
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/health", get(health_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/api/heartbeat", post(heartbeat_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    host: String,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, host: impl Into<String>, port: u16) -> Self {
        Self {
            state,
            host: host.into(),
            port,
        }
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> crate::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        Self::serve(listener, Arc::clone(&self.state), shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(
        listener: TcpListener,
        state: Arc<HealthState>,
        shutdown: F,
    ) -> crate::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting health server on {}", listener.local_addr()?);

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::DaemonError::HealthServer(e.to_string()))?;

        info!("Health server stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let Some(verdict) = state
        .heartbeats
        .verdict(state.processes, state.threshold)
        .await
    else {
        warn!("Daemon has no heartbeat. Healthcheck status: UNHEALTHY");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(HealthResponse::default()));
    };

    let status = if verdict.healthy {
        debug!("Healthcheck heartbeat status: HEALTHY");
        StatusCode::OK
    } else {
        warn!(
            tracked = verdict.ages.len(),
            expected = state.processes,
            "Healthcheck heartbeat status: UNHEALTHY"
        );
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let heartbeats = verdict
        .ages
        .into_iter()
        .map(|(pid, age)| (pid.to_string(), age))
        .collect();

    (
        status,
        Json(HealthResponse {
            heartbeats: Some(heartbeats),
        }),
    )
}

async fn heartbeat_handler(
    State(state): State<Arc<HealthState>>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> impl IntoResponse {
    let pid = body
        .ok()
        .and_then(|Json(request)| request.pid)
        .and_then(|pid| u32::try_from(pid).ok())
        .filter(|pid| *pid != 0);

    match pid {
        Some(pid) => {
            debug!("Received heartbeat from {}", pid);
            state.heartbeats.record(pid).await;
            (StatusCode::CREATED, Json(serde_json::json!({})))
        }
        None => (StatusCode::BAD_REQUEST, Json(serde_json::json!({}))),
    }
}
