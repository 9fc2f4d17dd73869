use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    EscrowId, EscrowRelease, EscrowSettings, EscrowStatus, FundJobRequest, FundedEscrow,
    JobEscrow, JobMilestone, MilestoneId, MilestoneStatus, ReleaseId, ReleaseRequest,
};
use super::processor::{
    Balance, ChargeRequest, ConnectedAccount, PaymentIntent, PaymentIntentRequest,
    PaymentProcessor, ProcessorError, Refund, Transfer, TransferRequest,
};
use super::repository::{EscrowRepository, MilestoneContext};
use crate::money::Money;
use crate::workflows::RepositoryError;

fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// External call that failed, reported with the processor error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStep {
    Authorize,
    Capture,
    Transfer,
    PlatformFee,
    Refund,
    CancelHold,
    Lookup,
}

impl fmt::Display for PaymentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Authorize => "authorize",
            Self::Capture => "capture",
            Self::Transfer => "transfer",
            Self::PlatformFee => "platform fee",
            Self::Refund => "refund",
            Self::CancelHold => "cancel hold",
            Self::Lookup => "lookup",
        };
        f.write_str(label)
    }
}

/// How the customer's money went back to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RefundMethod {
    /// Nothing was captured yet, so the hold was released.
    CancelledHold { payment_intent_id: String },
    Refunded { refund_id: String, amount: Money },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundOutcome {
    pub escrow: JobEscrow,
    pub method: RefundMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowSummary {
    pub escrow: JobEscrow,
    pub milestones: Vec<JobMilestone>,
    pub releases: Vec<EscrowRelease>,
    pub released_total: Money,
}

/// Moves escrowed customer funds to contractors through the payment processor
/// and keeps local bookkeeping in step.
pub struct EscrowService<R, P> {
    repository: Arc<R>,
    processor: Arc<P>,
    settings: EscrowSettings,
}

impl<R, P> EscrowService<R, P>
where
    R: EscrowRepository + 'static,
    P: PaymentProcessor + 'static,
{
    pub fn new(repository: Arc<R>, processor: Arc<P>, settings: EscrowSettings) -> Self {
        Self {
            repository,
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &EscrowSettings {
        &self.settings
    }

    /// Place a hold for the sum of the job's milestones and record the escrow.
    pub async fn fund_job(
        &self,
        request: FundJobRequest,
        now: DateTime<Utc>,
    ) -> Result<FundedEscrow, EscrowError> {
        if request.milestones.is_empty() {
            return Err(EscrowError::InvalidFunding(
                "a funded job needs at least one milestone".to_string(),
            ));
        }
        if let Some(draft) = request
            .milestones
            .iter()
            .find(|draft| !draft.amount.is_positive() || draft.title.trim().is_empty())
        {
            return Err(EscrowError::InvalidFunding(format!(
                "milestone '{}' must have a title and a positive amount",
                draft.title
            )));
        }
        let total = request
            .milestones
            .iter()
            .try_fold(Money::ZERO, |sum, draft| sum.checked_add(draft.amount))
            .ok_or_else(|| EscrowError::InvalidFunding("milestone total overflows".to_string()))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("job_id".to_string(), request.job_id.0.clone());
        let intent = self
            .create_payment_intent(
                total,
                &request.customer_processor_id,
                &request.payment_method_id,
                metadata,
                &format!("{}-fund", request.job_id),
            )
            .await?;

        let escrow = JobEscrow {
            id: EscrowId(prefixed_id("esc")),
            job_id: request.job_id.clone(),
            customer_id: request.customer_processor_id,
            payment_intent_id: intent.id,
            funded_amount: total,
            currency: self.settings.currency.clone(),
            status: EscrowStatus::Active,
            created_at: now,
            captured_at: None,
            refunded_at: None,
        };
        let milestones: Vec<JobMilestone> = request
            .milestones
            .into_iter()
            .map(|draft| JobMilestone {
                id: MilestoneId(prefixed_id("ms")),
                escrow_id: escrow.id.clone(),
                job_id: request.job_id.clone(),
                title: draft.title,
                amount: draft.amount,
                status: MilestoneStatus::Pending,
                released_at: None,
            })
            .collect();

        self.repository
            .insert_escrow(escrow.clone(), milestones.clone())?;

        info!(
            escrow_id = %escrow.id,
            job_id = %escrow.job_id,
            amount = %escrow.funded_amount,
            milestones = milestones.len(),
            "job escrow funded"
        );

        Ok(FundedEscrow { escrow, milestones })
    }

    /// Pay out one completed milestone: capture the hold, transfer the full
    /// amount to the contractor, charge the platform fee to the customer, and
    /// record the release.
    ///
    /// A manual-capture hold can be captured only once, so the first release
    /// captures the whole escrow and later releases draw on the captured funds.
    ///
    /// The processor calls are not compensated if a later one fails. Each uses
    /// a key derived from the escrow or milestone id, so retrying the whole
    /// operation replays completed calls instead of moving money twice.
    pub async fn release_milestone_payment(
        &self,
        request: &ReleaseRequest,
        now: DateTime<Utc>,
    ) -> Result<EscrowRelease, EscrowError> {
        let MilestoneContext { milestone, escrow } = self
            .repository
            .milestone_context(&request.milestone_id)?
            .ok_or_else(|| EscrowError::MilestoneNotFound(request.milestone_id.clone()))?;

        if milestone.status == MilestoneStatus::Completed {
            return Err(EscrowError::MilestoneAlreadyReleased(milestone.id));
        }
        if escrow.status == EscrowStatus::Refunded {
            return Err(EscrowError::EscrowRefunded(escrow.id));
        }
        if request.payment_intent_id != escrow.payment_intent_id {
            warn!(
                escrow_id = %escrow.id,
                milestone_id = %milestone.id,
                payment_intent_id = %request.payment_intent_id,
                "release names a payment intent that does not fund the escrow"
            );
            return Err(EscrowError::PaymentIntentMismatch {
                escrow_id: escrow.id,
                payment_intent_id: request.payment_intent_id.clone(),
            });
        }

        let amount = milestone.amount;
        let platform_fee = self.settings.platform_fee;

        if escrow.captured_at.is_none() {
            self.capture_hold(&escrow, now).await?;
        }

        let transfer = self
            .transfer_to_contractor(
                amount,
                &request.contractor_account_id,
                Some(escrow.job_id.0.as_str()),
                &format!("{}-transfer", milestone.id),
            )
            .await?;

        let fee_charge = self
            .charge_platform_fee(
                &request.customer_processor_id,
                &request.payment_method_id,
                &format!("Platform fee for milestone {}", milestone.title),
                &format!("{}-fee", milestone.id),
            )
            .await?;

        let release = EscrowRelease {
            id: ReleaseId(prefixed_id("rel")),
            escrow_id: escrow.id.clone(),
            milestone_id: milestone.id.clone(),
            amount,
            platform_fee,
            contractor_amount: amount,
            transfer_id: transfer.id,
            fee_charge_id: fee_charge.id,
            released_at: now,
        };

        match self.repository.record_release(release.clone()) {
            Ok(_) => {}
            Err(RepositoryError::Conflict) => {
                return Err(EscrowError::MilestoneAlreadyReleased(milestone.id))
            }
            Err(source) => {
                warn!(
                    milestone_id = %milestone.id,
                    transfer_id = %release.transfer_id,
                    fee_charge_id = %release.fee_charge_id,
                    error = %source,
                    "milestone paid at processor but release was not recorded"
                );
                return Err(EscrowError::Bookkeeping {
                    milestone_id: milestone.id,
                    transfer_id: release.transfer_id,
                    source,
                });
            }
        }

        info!(
            escrow_id = %release.escrow_id,
            milestone_id = %release.milestone_id,
            amount = %release.amount,
            platform_fee = %release.platform_fee,
            transfer_id = %release.transfer_id,
            "milestone payment released"
        );

        Ok(release)
    }

    async fn capture_hold(&self, escrow: &JobEscrow, now: DateTime<Utc>) -> Result<(), EscrowError> {
        self.processor
            .capture_payment_intent(
                &escrow.payment_intent_id,
                escrow.funded_amount,
                &format!("{}-capture", escrow.id),
            )
            .await
            .map_err(|source| EscrowError::Processor {
                step: PaymentStep::Capture,
                source,
            })?;
        self.repository.mark_captured(&escrow.id, now)?;
        info!(
            escrow_id = %escrow.id,
            amount = %escrow.funded_amount,
            "escrow hold captured"
        );
        Ok(())
    }

    /// Return an escrow's unreleased funds to the customer. An uncaptured hold
    /// is cancelled; otherwise the captured balance not yet paid to
    /// contractors is refunded.
    pub async fn refund_escrow(
        &self,
        escrow_id: &EscrowId,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, EscrowError> {
        let escrow = self.escrow(escrow_id)?;
        if escrow.status == EscrowStatus::Refunded {
            return Err(EscrowError::EscrowRefunded(escrow.id));
        }

        let method = if escrow.captured_at.is_none() {
            let intent = self
                .processor
                .cancel_payment_intent(&escrow.payment_intent_id)
                .await
                .map_err(|source| EscrowError::Processor {
                    step: PaymentStep::CancelHold,
                    source,
                })?;
            RefundMethod::CancelledHold {
                payment_intent_id: intent.id,
            }
        } else {
            let released: Money = self
                .repository
                .releases_for_escrow(&escrow.id)?
                .iter()
                .map(|release| release.contractor_amount)
                .sum();
            let unreleased = escrow
                .funded_amount
                .checked_sub(released)
                .filter(|balance| balance.is_positive())
                .ok_or_else(|| EscrowError::NothingToRefund(escrow.id.clone()))?;
            let refund: Refund = self
                .processor
                .create_refund(
                    &escrow.payment_intent_id,
                    Some(unreleased),
                    &format!("{}-refund", escrow.id),
                )
                .await
                .map_err(|source| EscrowError::Processor {
                    step: PaymentStep::Refund,
                    source,
                })?;
            RefundMethod::Refunded {
                refund_id: refund.id,
                amount: refund.amount,
            }
        };

        let escrow = match self.repository.mark_refunded(&escrow.id, now) {
            Ok(escrow) => escrow,
            Err(RepositoryError::Conflict) => return Err(EscrowError::EscrowRefunded(escrow.id)),
            Err(other) => return Err(other.into()),
        };

        info!(escrow_id = %escrow.id, method = ?method, "escrow refunded");
        Ok(RefundOutcome { escrow, method })
    }

    pub fn escrow(&self, escrow_id: &EscrowId) -> Result<JobEscrow, EscrowError> {
        self.repository
            .fetch_escrow(escrow_id)?
            .ok_or_else(|| EscrowError::EscrowNotFound(escrow_id.clone()))
    }

    pub fn escrow_summary(&self, escrow_id: &EscrowId) -> Result<EscrowSummary, EscrowError> {
        let escrow = self.escrow(escrow_id)?;
        let milestones = self.repository.milestones_for_escrow(escrow_id)?;
        let releases = self.repository.releases_for_escrow(escrow_id)?;
        let released_total = releases.iter().map(|release| release.contractor_amount).sum();
        Ok(EscrowSummary {
            escrow,
            milestones,
            releases,
            released_total,
        })
    }

    pub async fn create_payment_intent(
        &self,
        amount: Money,
        customer_id: &str,
        payment_method_id: &str,
        metadata: BTreeMap<String, String>,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, EscrowError> {
        let request = PaymentIntentRequest {
            amount,
            currency: self.settings.currency.clone(),
            customer_id: customer_id.to_string(),
            payment_method_id: payment_method_id.to_string(),
            manual_capture: true,
            metadata,
        };
        self.processor
            .create_payment_intent(&request, idempotency_key)
            .await
            .map_err(|source| EscrowError::Processor {
                step: PaymentStep::Authorize,
                source,
            })
    }

    pub async fn transfer_to_contractor(
        &self,
        amount: Money,
        contractor_account_id: &str,
        transfer_group: Option<&str>,
        idempotency_key: &str,
    ) -> Result<Transfer, EscrowError> {
        let request = TransferRequest {
            amount,
            currency: self.settings.currency.clone(),
            destination_account_id: contractor_account_id.to_string(),
            transfer_group: transfer_group.map(str::to_string),
            metadata: BTreeMap::new(),
        };
        self.processor
            .create_transfer(&request, idempotency_key)
            .await
            .map_err(|source| EscrowError::Processor {
                step: PaymentStep::Transfer,
                source,
            })
    }

    /// Charge the flat platform fee to the payer's stored payment method.
    pub async fn charge_platform_fee(
        &self,
        customer_id: &str,
        payment_method_id: &str,
        description: &str,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, EscrowError> {
        let request = ChargeRequest {
            amount: self.settings.platform_fee,
            currency: self.settings.currency.clone(),
            customer_id: customer_id.to_string(),
            payment_method_id: payment_method_id.to_string(),
            description: description.to_string(),
            metadata: BTreeMap::new(),
        };
        self.processor
            .create_charge(&request, idempotency_key)
            .await
            .map_err(|source| EscrowError::Processor {
                step: PaymentStep::PlatformFee,
                source,
            })
    }

    pub async fn contractor_account(
        &self,
        account_id: &str,
    ) -> Result<ConnectedAccount, EscrowError> {
        self.processor
            .retrieve_account(account_id)
            .await
            .map_err(lookup_error)
    }

    pub async fn platform_balance(&self) -> Result<Balance, EscrowError> {
        self.processor.retrieve_balance().await.map_err(lookup_error)
    }

    pub async fn transfer(&self, transfer_id: &str) -> Result<Transfer, EscrowError> {
        self.processor
            .retrieve_transfer(transfer_id)
            .await
            .map_err(lookup_error)
    }
}

fn lookup_error(source: ProcessorError) -> EscrowError {
    EscrowError::Processor {
        step: PaymentStep::Lookup,
        source,
    }
}

/// Error raised by the escrow service.
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("escrow {0} not found")]
    EscrowNotFound(EscrowId),
    #[error("milestone {0} not found")]
    MilestoneNotFound(MilestoneId),
    #[error("milestone {0} has already been released")]
    MilestoneAlreadyReleased(MilestoneId),
    #[error("escrow {0} has been refunded")]
    EscrowRefunded(EscrowId),
    #[error("payment intent {payment_intent_id} does not fund escrow {escrow_id}")]
    PaymentIntentMismatch {
        escrow_id: EscrowId,
        payment_intent_id: String,
    },
    #[error("escrow {0} has no unreleased funds to refund")]
    NothingToRefund(EscrowId),
    #[error("invalid escrow funding: {0}")]
    InvalidFunding(String),
    #[error("payment processor {step} failed: {source}")]
    Processor {
        step: PaymentStep,
        #[source]
        source: ProcessorError,
    },
    #[error("milestone {milestone_id} was paid (transfer {transfer_id}) but the release was not recorded: {source}")]
    Bookkeeping {
        milestone_id: MilestoneId,
        transfer_id: String,
        #[source]
        source: RepositoryError,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EscrowError {
    pub fn processor_error(&self) -> Option<&ProcessorError> {
        match self {
            Self::Processor { source, .. } => Some(source),
            _ => None,
        }
    }
}
