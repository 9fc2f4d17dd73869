use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

macro_rules! string_id {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(value: &str) -> Self {
                    Self(value.to_string())
                }
            }
        )+
    };
}

string_id!(EscrowId, MilestoneId, ReleaseId, JobId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Active,
    Refunded,
}

impl EscrowStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Completed,
}

impl MilestoneStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }
}

/// Customer funds held for one contractor job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEscrow {
    pub id: EscrowId,
    pub job_id: JobId,
    pub customer_id: String,
    pub payment_intent_id: String,
    pub funded_amount: Money,
    pub currency: String,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    /// Set once the hold has been captured in full by the first release.
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMilestone {
    pub id: MilestoneId,
    pub escrow_id: EscrowId,
    pub job_id: JobId,
    pub title: String,
    pub amount: Money,
    pub status: MilestoneStatus,
    pub released_at: Option<DateTime<Utc>>,
}

/// Immutable record of one milestone payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRelease {
    pub id: ReleaseId,
    pub escrow_id: EscrowId,
    pub milestone_id: MilestoneId,
    pub amount: Money,
    pub platform_fee: Money,
    pub contractor_amount: Money,
    pub transfer_id: String,
    pub fee_charge_id: String,
    pub released_at: DateTime<Utc>,
}

/// Inputs for paying out one completed milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub milestone_id: MilestoneId,
    pub payment_intent_id: String,
    pub contractor_account_id: String,
    pub customer_processor_id: String,
    pub payment_method_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneDraft {
    pub title: String,
    pub amount: Money,
}

/// Customer request to place a job's milestone total on hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundJobRequest {
    pub job_id: JobId,
    pub customer_processor_id: String,
    pub payment_method_id: String,
    pub milestones: Vec<MilestoneDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundedEscrow {
    pub escrow: JobEscrow,
    pub milestones: Vec<JobMilestone>,
}

/// Fee schedule and currency used for every escrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowSettings {
    /// Flat fee charged to the payer on each release.
    pub platform_fee: Money,
    pub currency: String,
}

impl Default for EscrowSettings {
    fn default() -> Self {
        Self {
            platform_fee: Money::from_cents(200),
            currency: "usd".to_string(),
        }
    }
}
