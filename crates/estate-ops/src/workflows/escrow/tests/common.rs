use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::money::Money;
use crate::workflows::escrow::domain::{
    EscrowId, EscrowRelease, EscrowSettings, EscrowStatus, FundJobRequest, FundedEscrow, JobEscrow,
    JobId, JobMilestone, MilestoneDraft, MilestoneId, MilestoneStatus, ReleaseRequest,
};
use crate::workflows::escrow::processor::{
    Balance, BalanceAmount, ChargeRequest, ConnectedAccount, PaymentIntent, PaymentIntentRequest,
    PaymentProcessor, ProcessorError, Refund, Transfer, TransferRequest,
};
use crate::workflows::escrow::repository::{EscrowRepository, MilestoneContext};
use crate::workflows::escrow::EscrowService;
use crate::workflows::RepositoryError;

pub(super) type TestService = EscrowService<MemoryEscrows, RecordingProcessor>;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 15, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn settings() -> EscrowSettings {
    EscrowSettings {
        platform_fee: Money::from_dollars(2.00),
        currency: "usd".to_string(),
    }
}

pub(super) fn build_service() -> (TestService, Arc<MemoryEscrows>, Arc<RecordingProcessor>) {
    let repository = Arc::new(MemoryEscrows::default());
    let processor = Arc::new(RecordingProcessor::default());
    let service = EscrowService::new(repository.clone(), processor.clone(), settings());
    (service, repository, processor)
}

pub(super) fn fund_request(amounts: &[f64]) -> FundJobRequest {
    FundJobRequest {
        job_id: JobId::from("job-roof-41"),
        customer_processor_id: "cus_owner".to_string(),
        payment_method_id: "pm_card_visa".to_string(),
        milestones: amounts
            .iter()
            .enumerate()
            .map(|(index, amount)| MilestoneDraft {
                title: format!("Phase {}", index + 1),
                amount: Money::from_dollars(*amount),
            })
            .collect(),
    }
}

pub(super) async fn funded(service: &TestService, amounts: &[f64]) -> FundedEscrow {
    service
        .fund_job(fund_request(amounts), now())
        .await
        .expect("job funded")
}

/// Release of `funded.milestones[index]` against the escrow's own hold.
pub(super) fn release_request(funded: &FundedEscrow, index: usize) -> ReleaseRequest {
    release_request_for(&funded.milestones[index].id, &funded.escrow.payment_intent_id)
}

pub(super) fn release_request_for(
    milestone_id: &MilestoneId,
    payment_intent_id: &str,
) -> ReleaseRequest {
    ReleaseRequest {
        milestone_id: milestone_id.clone(),
        payment_intent_id: payment_intent_id.to_string(),
        contractor_account_id: "acct_roofer".to_string(),
        customer_processor_id: "cus_owner".to_string(),
        payment_method_id: "pm_card_visa".to_string(),
    }
}

#[derive(Default)]
struct EscrowTables {
    escrows: HashMap<EscrowId, JobEscrow>,
    milestones: HashMap<MilestoneId, JobMilestone>,
    releases: Vec<EscrowRelease>,
}

#[derive(Default)]
pub(super) struct MemoryEscrows {
    tables: Mutex<EscrowTables>,
    fail_release_writes: AtomicBool,
}

impl MemoryEscrows {
    pub(super) fn fail_release_writes(&self) {
        self.fail_release_writes.store(true, Ordering::SeqCst);
    }

    pub(super) fn releases(&self) -> Vec<EscrowRelease> {
        self.tables.lock().expect("escrow mutex poisoned").releases.clone()
    }

    pub(super) fn escrow(&self, id: &EscrowId) -> JobEscrow {
        self.tables
            .lock()
            .expect("escrow mutex poisoned")
            .escrows
            .get(id)
            .cloned()
            .expect("escrow stored")
    }

    pub(super) fn milestone(&self, id: &MilestoneId) -> JobMilestone {
        self.tables
            .lock()
            .expect("escrow mutex poisoned")
            .milestones
            .get(id)
            .cloned()
            .expect("milestone stored")
    }
}

impl EscrowRepository for MemoryEscrows {
    fn insert_escrow(
        &self,
        escrow: JobEscrow,
        milestones: Vec<JobMilestone>,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().expect("escrow mutex poisoned");
        if tables.escrows.contains_key(&escrow.id) {
            return Err(RepositoryError::Conflict);
        }
        for milestone in milestones {
            tables.milestones.insert(milestone.id.clone(), milestone);
        }
        tables.escrows.insert(escrow.id.clone(), escrow);
        Ok(())
    }

    fn fetch_escrow(&self, id: &EscrowId) -> Result<Option<JobEscrow>, RepositoryError> {
        let tables = self.tables.lock().expect("escrow mutex poisoned");
        Ok(tables.escrows.get(id).cloned())
    }

    fn milestone_context(
        &self,
        id: &MilestoneId,
    ) -> Result<Option<MilestoneContext>, RepositoryError> {
        let tables = self.tables.lock().expect("escrow mutex poisoned");
        Ok(tables.milestones.get(id).and_then(|milestone| {
            tables
                .escrows
                .get(&milestone.escrow_id)
                .map(|escrow| MilestoneContext {
                    milestone: milestone.clone(),
                    escrow: escrow.clone(),
                })
        }))
    }

    fn milestones_for_escrow(&self, id: &EscrowId) -> Result<Vec<JobMilestone>, RepositoryError> {
        let tables = self.tables.lock().expect("escrow mutex poisoned");
        Ok(tables
            .milestones
            .values()
            .filter(|milestone| &milestone.escrow_id == id)
            .cloned()
            .collect())
    }

    fn mark_captured(&self, id: &EscrowId, at: DateTime<Utc>) -> Result<JobEscrow, RepositoryError> {
        let mut tables = self.tables.lock().expect("escrow mutex poisoned");
        let escrow = tables.escrows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        escrow.captured_at.get_or_insert(at);
        Ok(escrow.clone())
    }

    fn record_release(&self, release: EscrowRelease) -> Result<JobMilestone, RepositoryError> {
        if self.fail_release_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("primary database offline".to_string()));
        }
        let mut tables = self.tables.lock().expect("escrow mutex poisoned");
        let milestone = tables
            .milestones
            .get_mut(&release.milestone_id)
            .ok_or(RepositoryError::NotFound)?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(RepositoryError::Conflict);
        }
        milestone.status = MilestoneStatus::Completed;
        milestone.released_at = Some(release.released_at);
        let updated = milestone.clone();
        tables.releases.push(release);
        Ok(updated)
    }

    fn releases_for_escrow(&self, id: &EscrowId) -> Result<Vec<EscrowRelease>, RepositoryError> {
        let tables = self.tables.lock().expect("escrow mutex poisoned");
        Ok(tables
            .releases
            .iter()
            .filter(|release| &release.escrow_id == id)
            .cloned()
            .collect())
    }

    fn mark_refunded(&self, id: &EscrowId, at: DateTime<Utc>) -> Result<JobEscrow, RepositoryError> {
        let mut tables = self.tables.lock().expect("escrow mutex poisoned");
        let escrow = tables.escrows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if escrow.status == EscrowStatus::Refunded {
            return Err(RepositoryError::Conflict);
        }
        escrow.status = EscrowStatus::Refunded;
        escrow.refunded_at = Some(at);
        Ok(escrow.clone())
    }
}

/// Processor call as observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Call {
    Authorize { amount: Money, manual_capture: bool, key: String },
    Capture { payment_intent_id: String, amount: Money, key: String },
    Cancel { payment_intent_id: String },
    Transfer { amount: Money, destination: String, key: String },
    Charge { amount: Money, customer_id: String, payment_method_id: String, key: String },
    Refund { payment_intent_id: String, amount: Option<Money>, key: String },
}

#[derive(Default)]
pub(super) struct RecordingProcessor {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, ProcessorError>>,
    sequence: AtomicUsize,
}

impl RecordingProcessor {
    pub(super) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("processor mutex poisoned").clone()
    }

    /// Fail every call to `operation` ("authorize", "capture", "transfer",
    /// "charge", "refund", "cancel", "lookup") with `error`.
    pub(super) fn fail(&self, operation: &'static str, error: ProcessorError) {
        self.failures
            .lock()
            .expect("processor mutex poisoned")
            .insert(operation, error);
    }

    pub(super) fn clear_failures(&self) {
        self.failures.lock().expect("processor mutex poisoned").clear();
    }

    fn check(&self, operation: &'static str) -> Result<(), ProcessorError> {
        match self
            .failures
            .lock()
            .expect("processor mutex poisoned")
            .get(operation)
        {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("processor mutex poisoned").push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}_{id:04}")
    }
}

#[async_trait]
impl PaymentProcessor for RecordingProcessor {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.check("authorize")?;
        self.record(Call::Authorize {
            amount: request.amount,
            manual_capture: request.manual_capture,
            key: idempotency_key.to_string(),
        });
        Ok(PaymentIntent {
            id: self.next_id("pi"),
            amount: request.amount,
            amount_received: Money::ZERO,
            currency: request.currency.clone(),
            status: "requires_capture".to_string(),
        })
    }

    async fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.check("capture")?;
        self.record(Call::Capture {
            payment_intent_id: payment_intent_id.to_string(),
            amount,
            key: idempotency_key.to_string(),
        });
        Ok(PaymentIntent {
            id: payment_intent_id.to_string(),
            amount,
            amount_received: amount,
            currency: "usd".to_string(),
            status: "succeeded".to_string(),
        })
    }

    async fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.check("cancel")?;
        self.record(Call::Cancel {
            payment_intent_id: payment_intent_id.to_string(),
        });
        Ok(PaymentIntent {
            id: payment_intent_id.to_string(),
            amount: Money::ZERO,
            amount_received: Money::ZERO,
            currency: "usd".to_string(),
            status: "canceled".to_string(),
        })
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
        idempotency_key: &str,
    ) -> Result<Transfer, ProcessorError> {
        self.check("transfer")?;
        self.record(Call::Transfer {
            amount: request.amount,
            destination: request.destination_account_id.clone(),
            key: idempotency_key.to_string(),
        });
        Ok(Transfer {
            id: self.next_id("tr"),
            amount: request.amount,
            currency: request.currency.clone(),
            destination: request.destination_account_id.clone(),
            reversed: false,
        })
    }

    async fn create_charge(
        &self,
        request: &ChargeRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.check("charge")?;
        self.record(Call::Charge {
            amount: request.amount,
            customer_id: request.customer_id.clone(),
            payment_method_id: request.payment_method_id.clone(),
            key: idempotency_key.to_string(),
        });
        Ok(PaymentIntent {
            id: self.next_id("pi_fee"),
            amount: request.amount,
            amount_received: request.amount,
            currency: request.currency.clone(),
            status: "succeeded".to_string(),
        })
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<Refund, ProcessorError> {
        self.check("refund")?;
        self.record(Call::Refund {
            payment_intent_id: payment_intent_id.to_string(),
            amount,
            key: idempotency_key.to_string(),
        });
        Ok(Refund {
            id: self.next_id("re"),
            amount: amount.unwrap_or_default(),
            status: "succeeded".to_string(),
            payment_intent: Some(payment_intent_id.to_string()),
        })
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        self.check("lookup")?;
        Ok(ConnectedAccount {
            id: account_id.to_string(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
        })
    }

    async fn retrieve_balance(&self) -> Result<Balance, ProcessorError> {
        self.check("lookup")?;
        Ok(Balance {
            available: vec![BalanceAmount {
                amount: Money::from_cents(1_000),
                currency: "usd".to_string(),
            }],
            pending: Vec::new(),
        })
    }

    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, ProcessorError> {
        self.check("lookup")?;
        Ok(Transfer {
            id: transfer_id.to_string(),
            amount: Money::from_cents(50_000),
            currency: "usd".to_string(),
            destination: "acct_roofer".to_string(),
            reversed: false,
        })
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
