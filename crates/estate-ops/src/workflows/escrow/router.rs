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

use super::domain::{EscrowId, FundJobRequest, MilestoneId, ReleaseRequest};
use super::processor::{PaymentProcessor, ProcessorErrorKind};
use super::repository::EscrowRepository;
use super::service::{EscrowError, EscrowService};

/// Release body; the milestone comes from the path.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseBody {
    pub payment_intent_id: String,
    pub contractor_account_id: String,
    pub customer_processor_id: String,
    pub payment_method_id: String,
}

/// Router builder exposing escrow funding, release, and refund endpoints.
pub fn escrow_router<R, P>(service: Arc<EscrowService<R, P>>) -> Router
where
    R: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    Router::new()
        .route("/api/v1/escrows", post(fund_handler::<R, P>))
        .route("/api/v1/escrows/:escrow_id", get(summary_handler::<R, P>))
        .route(
            "/api/v1/escrows/:escrow_id/refund",
            post(refund_handler::<R, P>),
        )
        .route(
            "/api/v1/milestones/:milestone_id/release",
            post(release_handler::<R, P>),
        )
        .with_state(service)
}

pub(crate) async fn fund_handler<R, P>(
    State(service): State<Arc<EscrowService<R, P>>>,
    axum::Json(request): axum::Json<FundJobRequest>,
) -> Response
where
    R: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    match service.fund_job(request, Utc::now()).await {
        Ok(funded) => (StatusCode::CREATED, axum::Json(funded)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn summary_handler<R, P>(
    State(service): State<Arc<EscrowService<R, P>>>,
    Path(escrow_id): Path<String>,
) -> Response
where
    R: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    match service.escrow_summary(&EscrowId(escrow_id)) {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn release_handler<R, P>(
    State(service): State<Arc<EscrowService<R, P>>>,
    Path(milestone_id): Path<String>,
    axum::Json(body): axum::Json<ReleaseBody>,
) -> Response
where
    R: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    let request = ReleaseRequest {
        milestone_id: MilestoneId(milestone_id),
        payment_intent_id: body.payment_intent_id,
        contractor_account_id: body.contractor_account_id,
        customer_processor_id: body.customer_processor_id,
        payment_method_id: body.payment_method_id,
    };
    match service.release_milestone_payment(&request, Utc::now()).await {
        Ok(release) => (StatusCode::CREATED, axum::Json(release)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn refund_handler<R, P>(
    State(service): State<Arc<EscrowService<R, P>>>,
    Path(escrow_id): Path<String>,
) -> Response
where
    R: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    match service.refund_escrow(&EscrowId(escrow_id), Utc::now()).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn status_for(error: &EscrowError) -> StatusCode {
    match error {
        EscrowError::EscrowNotFound(_) | EscrowError::MilestoneNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        EscrowError::MilestoneAlreadyReleased(_)
        | EscrowError::EscrowRefunded(_)
        | EscrowError::PaymentIntentMismatch { .. }
        | EscrowError::NothingToRefund(_) => StatusCode::CONFLICT,
        EscrowError::InvalidFunding(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EscrowError::Processor { source, .. } => match source.kind {
            ProcessorErrorKind::CardDeclined => StatusCode::PAYMENT_REQUIRED,
            ProcessorErrorKind::InvalidRequest | ProcessorErrorKind::Idempotency => {
                StatusCode::BAD_REQUEST
            }
            ProcessorErrorKind::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
            ProcessorErrorKind::Authentication
            | ProcessorErrorKind::Api
            | ProcessorErrorKind::Network => StatusCode::BAD_GATEWAY,
        },
        EscrowError::Bookkeeping { .. } | EscrowError::Repository(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: EscrowError) -> Response {
    let payload = match error.processor_error() {
        Some(source) => json!({
            "error": error.to_string(),
            "kind": source.kind,
            "code": source.code,
            "decline_code": source.decline_code,
            "retryable": source.is_retryable(),
        }),
        None => json!({ "error": error.to_string() }),
    };
    (status_for(&error), axum::Json(payload)).into_response()
}
