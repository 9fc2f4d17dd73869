//! Escrowed job payments: funding holds, milestone payouts to contractors,
//! platform fees, and refunds through an external payment processor.

pub mod domain;
pub mod processor;
pub mod repository;
pub mod router;
pub mod service;
pub mod stripe;

#[cfg(test)]
mod tests;

pub use crate::money::Money;
pub use domain::{
    EscrowId, EscrowRelease, EscrowSettings, EscrowStatus, FundJobRequest, FundedEscrow,
    JobEscrow, JobId, JobMilestone, MilestoneDraft, MilestoneId, MilestoneStatus, ReleaseId,
    ReleaseRequest,
};
pub use processor::{
    Balance, BalanceAmount, ChargeRequest, ConnectedAccount, PaymentIntent, PaymentIntentRequest,
    PaymentProcessor, ProcessorError, ProcessorErrorKind, Refund, Transfer, TransferRequest,
};
pub use repository::{EscrowRepository, MilestoneContext};
pub use router::{escrow_router, ReleaseBody};
pub use service::{
    EscrowError, EscrowService, EscrowSummary, PaymentStep, RefundMethod, RefundOutcome,
};
pub use stripe::{StripeClient, StripeClientConfig};
