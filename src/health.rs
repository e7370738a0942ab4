//! Health and status endpoints for the ingestion service.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ingest::OddsIngestionService;

/// Service health state
#[derive(Clone, Default)]
pub struct HealthState {
    pub last_run_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_run_count: Arc<RwLock<usize>>,
    pub error_count: Arc<RwLock<usize>>,
    /// Set while the feed reports it is not configured.
    pub warning: Arc<RwLock<Option<String>>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, count: usize, warning: Option<String>) {
        *self.last_run_time.write().await = Some(Utc::now());
        *self.last_run_count.write().await = count;
        *self.error_count.write().await = 0;
        *self.warning.write().await = warning;
    }

    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }
}

#[derive(Clone)]
pub struct AppState {
    pub health: HealthState,
    pub service: Arc<OddsIngestionService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let health = &state.health;
    let last_run = *health.last_run_time.read().await;
    let last_count = *health.last_run_count.read().await;
    let errors = *health.error_count.read().await;
    let warning = health.warning.read().await.clone();

    let status = if errors > 5 || warning.is_some() {
        "degraded"
    } else {
        "ok"
    };

    let http_status = if errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "odds-engine",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "warning": warning,
            "last_run": last_run.map(|t| t.to_rfc3339()),
            "last_run_count": last_count,
            "consecutive_errors": errors
        })),
    )
}

async fn status_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.service.status().await {
        Ok(status) => (StatusCode::OK, Json(json!(status))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string(), "code": e.code() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_resets_error_count() {
        let health = HealthState::new();
        health.record_error().await;
        health.record_error().await;
        assert_eq!(*health.error_count.read().await, 2);

        health.record_success(12, None).await;
        assert_eq!(*health.error_count.read().await, 0);
        assert_eq!(*health.last_run_count.read().await, 12);
        assert!(health.last_run_time.read().await.is_some());
    }
}
