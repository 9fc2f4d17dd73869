use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use estate_ops::workflows::escrow::{
    escrow_router, EscrowRepository, EscrowService, PaymentProcessor,
};
use estate_ops::workflows::eviction::{
    eviction_router, EvictionRepository, EvictionService, LeaseDirectory, TenantNotifier,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_workflow_routes<L, R, N, E, P>(
    evictions: Arc<EvictionService<L, R, N>>,
    escrows: Arc<EscrowService<E, P>>,
) -> axum::Router
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
    E: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    eviction_router(evictions)
        .merge(escrow_router(escrows))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
