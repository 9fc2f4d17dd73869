use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::domain::{LandlordId, NewEvictionNotice, NoticeId, NoticeStatus};
use super::repository::{EvictionRepository, LeaseDirectory, TenantNotifier};
use super::service::{EvictionError, EvictionService};

/// Body accepted by the status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeRequest {
    pub status: NoticeStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Router builder exposing the eviction notice lifecycle.
pub fn eviction_router<L, R, N>(service: Arc<EvictionService<L, R, N>>) -> Router
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    Router::new()
        .route("/api/v1/evictions", post(create_handler::<L, R, N>))
        .route(
            "/api/v1/eviction-sweeps",
            post(sweep_handler::<L, R, N>),
        )
        .route(
            "/api/v1/evictions/:notice_id",
            get(fetch_handler::<L, R, N>),
        )
        .route(
            "/api/v1/evictions/:notice_id/status",
            post(status_handler::<L, R, N>),
        )
        .route(
            "/api/v1/evictions/:notice_id/complete",
            post(complete_handler::<L, R, N>),
        )
        .route(
            "/api/v1/landlords/:landlord_id/evictions",
            get(landlord_handler::<L, R, N>),
        )
        .with_state(service)
}

pub(crate) async fn create_handler<L, R, N>(
    State(service): State<Arc<EvictionService<L, R, N>>>,
    axum::Json(request): axum::Json<NewEvictionNotice>,
) -> Response
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    match service.create_notice(request, Utc::now()) {
        Ok(notice) => (StatusCode::CREATED, axum::Json(notice)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn fetch_handler<L, R, N>(
    State(service): State<Arc<EvictionService<L, R, N>>>,
    Path(notice_id): Path<String>,
) -> Response
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    match service.get_notice(&NoticeId(notice_id)) {
        Ok(notice) => (StatusCode::OK, axum::Json(notice)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<L, R, N>(
    State(service): State<Arc<EvictionService<L, R, N>>>,
    Path(notice_id): Path<String>,
    axum::Json(request): axum::Json<StatusChangeRequest>,
) -> Response
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    let result = service.update_status(
        &NoticeId(notice_id),
        request.status,
        request.notes.as_deref(),
        Utc::now(),
    );
    match result {
        Ok(notice) => (StatusCode::OK, axum::Json(notice)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn complete_handler<L, R, N>(
    State(service): State<Arc<EvictionService<L, R, N>>>,
    Path(notice_id): Path<String>,
) -> Response
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    match service.complete_eviction(&NoticeId(notice_id), Utc::now()) {
        Ok(notice) => (StatusCode::OK, axum::Json(notice)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn landlord_handler<L, R, N>(
    State(service): State<Arc<EvictionService<L, R, N>>>,
    Path(landlord_id): Path<String>,
) -> Response
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    match service.notices_for_landlord(&LandlordId(landlord_id)) {
        Ok(notices) => (StatusCode::OK, axum::Json(notices)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn sweep_handler<L, R, N>(
    State(service): State<Arc<EvictionService<L, R, N>>>,
) -> Response
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    match service.process_expired_notices(Utc::now()) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn status_for(error: &EvictionError) -> StatusCode {
    match error {
        EvictionError::LeaseNotFound(_) | EvictionError::NoticeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EvictionError::InvalidLeaseState { .. }
        | EvictionError::InvalidTransition { .. }
        | EvictionError::ConcurrentUpdate { .. } => StatusCode::CONFLICT,
        EvictionError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: EvictionError) -> Response {
    let payload = json!({ "error": error.to_string() });
    (status_for(&error), axum::Json(payload)).into_response()
}
