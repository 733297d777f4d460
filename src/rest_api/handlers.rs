//! HTTP handlers for the REST API

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, instrument};

use super::dto::HealthResponse;
use super::server::ApiState;

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        leader: state.is_leader.load(Ordering::Relaxed),
    })
}

/// Metrics endpoint in the Prometheus text format
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_health_reports_leadership() {
        let state = Arc::new(ApiState {
            is_leader: Arc::new(AtomicBool::new(true)),
        });
        let Json(body) = health(State(state.clone())).await;
        assert_eq!(body.status, "healthy");
        assert!(body.leader);

        state.is_leader.store(false, Ordering::Relaxed);
        let Json(body) = health(State(state)).await;
        assert!(!body.leader);
    }

    #[tokio::test]
    async fn test_metrics_are_registered() {
        crate::controller::metrics::inc_reconcile_error("handlers-test", "rpc");
        let body = metrics().await.unwrap();
        assert!(body.contains("shard_drain_reconcile_errors_total"));
        assert!(body.contains("# TYPE shard_drain_planned_reparent counter"));
    }
}
