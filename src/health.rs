//! Health check module
//! Provides health status for the node and the stores it depends on

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::queue::redis_backend::RedisPool;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    /// Record a component and fold it into the overall state.
    fn record(&mut self, name: &str, health: ComponentHealth) {
        self.status = match (&self.status, &health.status) {
            (_, ComponentState::Down) | (HealthState::Unhealthy, _) => HealthState::Unhealthy,
            (_, ComponentState::Warning) | (HealthState::Degraded, _) => HealthState::Degraded,
            _ => HealthState::Healthy,
        };
        self.checks.insert(name.to_string(), health);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the node. A store left as `None` runs in memory and is
/// reported as a warning.
#[derive(Clone, Default)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    queue_pool: Option<RedisPool>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, queue_pool: Option<RedisPool>) -> Self {
        Self {
            db_pool,
            queue_pool,
        }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let ledger = match &self.db_pool {
            Some(pool) => probe("database", crate::database::health_check(pool)).await,
            None => ComponentHealth::warning(None, Some("in-memory ledger".to_string())),
        };
        health_status.record("database", ledger);

        let queue = match &self.queue_pool {
            Some(pool) => probe("queue", crate::queue::redis_backend::health_check(pool)).await,
            None => ComponentHealth::warning(None, Some("in-memory queue".to_string())),
        };
        health_status.record("queue", queue);

        health_status
    }
}

async fn probe<F, E>(component: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!(component, response_time_ms = elapsed as u64, "health check ok");
            ComponentHealth::up(Some(elapsed))
        }
        Ok(Err(e)) => {
            error!(component, error = %e, "health check failed");
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!(component, "health check timed out");
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

/// `/health`, `/health/ready` and `/health/live`.
pub fn routes(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(checker)
}

async fn health(
    State(checker): State<Arc<HealthChecker>>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    let health_status = checker.check_health().await;

    // Return 503 if any component is down
    if health_status.status == HealthState::Unhealthy {
        error!("health check failed - service unhealthy");
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - ready once every store answers
async fn readiness(
    state: State<Arc<HealthChecker>>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    health(state).await
}

/// Liveness probe - the process is up
async fn liveness() -> &'static str {
    "OK"
}
