use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::metrics::BridgeMetrics;

/// Build the pull-based observability router.
///
/// - `GET /metrics` — Prometheus text exposition
/// - `GET /metrics.json` — the same samples as JSON
/// - `GET /healthz` — liveness probe
pub fn metrics_router(metrics: Arc<BridgeMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(export_prometheus))
        .route("/metrics.json", get(export_json))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn export_prometheus(State(metrics): State<Arc<BridgeMetrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.collector().export_prometheus(),
    )
}

async fn export_json(State(metrics): State<Arc<BridgeMetrics>>) -> impl IntoResponse {
    Json(metrics.collector().export_json())
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router_with_samples() -> Router {
        let metrics = Arc::new(BridgeMetrics::new());
        metrics.record_sent("crm", "ok");
        metrics.set_queue_size("crm", 3);
        metrics_router(metrics)
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = router_with_samples();
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn prometheus_endpoint_exposes_samples() {
        let app = router_with_samples();
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("bridge_messages_sent_total"));
        assert!(text.contains("bridge_queue_size{system=\"crm\"} 3"));
    }

    #[tokio::test]
    async fn json_endpoint_exposes_samples() {
        let app = router_with_samples();
        let req = Request::builder()
            .uri("/metrics.json")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["counters"].is_object());
        assert!(json["gauges"].is_object());
    }
}
