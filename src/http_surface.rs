//! `/health` and `/metrics` response bodies.
//!
//! No embedded web framework: this just builds the JSON payload and
//! picks a status code. Callers wire it into whatever HTTP server they
//! already run (axum, actix, a raw hyper service, ...).

use crate::http_client::HttpClient;
use crate::metrics::Metrics;
use crate::queue::AnalysisQueue;
use serde::Serialize;
use std::sync::Arc;

/// A status code plus a JSON body, ready to write back verbatim.
#[derive(Debug, Clone)]
pub struct SurfaceResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl SurfaceResponse {
    fn json(status: u16, value: &impl Serialize) -> Self {
        let body = serde_json::to_string(value)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize response\"}".to_string());
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }
}

/// Builds `/health` and `/metrics` bodies from the live `Metrics` and
/// `AnalysisQueue`/`HttpClient` state.
pub struct HttpSurface {
    metrics: Arc<Metrics>,
    queue: Arc<AnalysisQueue>,
    http_client: Arc<HttpClient>,
}

impl HttpSurface {
    pub fn new(metrics: Arc<Metrics>, queue: Arc<AnalysisQueue>, http_client: Arc<HttpClient>) -> Self {
        Self {
            metrics,
            queue,
            http_client,
        }
    }

    /// `GET /metrics`: always 200, since a metrics snapshot itself can't
    /// fail — it just reflects whatever state the process is in.
    pub async fn metrics(&self) -> SurfaceResponse {
        let circuit_state = self.http_client.circuit_state().await;
        let snapshot = self.metrics.snapshot(circuit_state);
        SurfaceResponse::json(200, &snapshot)
    }

    /// `GET /health`: 200 when healthy, 503 when degraded (circuit open or
    /// memory at/above critical).
    pub async fn health(&self) -> SurfaceResponse {
        let circuit_state = self.http_client.circuit_state().await;
        let snapshot = self.metrics.health(circuit_state, self.queue.capacity() as u64);
        let status = if snapshot.status == "healthy" { 200 } else { 503 };
        SurfaceResponse::json(status, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    fn surface() -> HttpSurface {
        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(AnalysisQueue::new(50, metrics.clone(), Duration::from_secs(30)));
        let http_client = Arc::new(HttpClient::new(Arc::new(Config::default()), metrics.clone()));
        HttpSurface::new(metrics, queue, http_client)
    }

    #[tokio::test]
    async fn health_reports_200_when_healthy() {
        let surface = surface();
        let response = surface.health().await;
        assert_eq!(response.status, 200);
        assert!(response.body.contains("\"status\":\"healthy\""));
    }

    #[tokio::test]
    async fn metrics_reports_200_and_json_content_type() {
        let surface = surface();
        let response = surface.metrics().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "application/json");
        assert!(response.body.contains("\"counters\""));
    }

    #[tokio::test]
    async fn health_reports_503_when_memory_critical() {
        let metrics = Arc::new(Metrics::new());
        metrics.set_memory_heap_used_percent(95);
        let queue = Arc::new(AnalysisQueue::new(50, metrics.clone(), Duration::from_secs(30)));
        let http_client = Arc::new(HttpClient::new(Arc::new(Config::default()), metrics.clone()));
        let surface = HttpSurface::new(metrics, queue, http_client);
        let response = surface.health().await;
        assert_eq!(response.status, 503);
    }

    #[test]
    fn circuit_state_round_trips_as_str() {
        assert_eq!(crate::circuit_breaker::CircuitState::Closed.as_str(), "closed");
    }
}
