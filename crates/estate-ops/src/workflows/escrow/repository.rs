use chrono::{DateTime, Utc};

use super::domain::{EscrowId, EscrowRelease, JobEscrow, JobMilestone, MilestoneId};
use crate::workflows::RepositoryError;

/// Milestone loaded together with the escrow that funds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneContext {
    pub milestone: JobMilestone,
    pub escrow: JobEscrow,
}

/// Bookkeeping store mirroring money movement at the processor.
pub trait EscrowRepository: Send + Sync {
    fn insert_escrow(
        &self,
        escrow: JobEscrow,
        milestones: Vec<JobMilestone>,
    ) -> Result<(), RepositoryError>;
    fn fetch_escrow(&self, id: &EscrowId) -> Result<Option<JobEscrow>, RepositoryError>;
    fn milestone_context(
        &self,
        id: &MilestoneId,
    ) -> Result<Option<MilestoneContext>, RepositoryError>;
    fn milestones_for_escrow(&self, id: &EscrowId) -> Result<Vec<JobMilestone>, RepositoryError>;
    /// Records that the escrow's hold was captured. Keeps the first timestamp
    /// when called again.
    fn mark_captured(&self, id: &EscrowId, at: DateTime<Utc>) -> Result<JobEscrow, RepositoryError>;
    /// Stores `release` and marks its milestone completed in one transaction.
    /// Fails with `RepositoryError::Conflict` unless the milestone is pending.
    fn record_release(&self, release: EscrowRelease) -> Result<JobMilestone, RepositoryError>;
    fn releases_for_escrow(&self, id: &EscrowId) -> Result<Vec<EscrowRelease>, RepositoryError>;
    /// Fails with `RepositoryError::Conflict` if the escrow is already refunded.
    fn mark_refunded(&self, id: &EscrowId, at: DateTime<Utc>) -> Result<JobEscrow, RepositoryError>;
}
