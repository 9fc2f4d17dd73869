use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::domain::{
    EvictionNotice, ExpirySweepReport, LandlordId, LeaseId, LeaseStatus, NewEvictionNotice,
    NoticeId, NoticeStatus, SweepFailure,
};
use super::repository::{EvictionRepository, LeaseDirectory, TenantNotifier};
use crate::workflows::RepositoryError;

fn next_notice_id() -> NoticeId {
    NoticeId(format!("evn_{}", uuid::Uuid::new_v4().simple()))
}

/// Service enforcing the eviction notice lifecycle over injected collaborators.
pub struct EvictionService<L, R, N> {
    leases: Arc<L>,
    notices: Arc<R>,
    notifier: Arc<N>,
}

impl<L, R, N> EvictionService<L, R, N>
where
    L: LeaseDirectory + 'static,
    R: EvictionRepository + 'static,
    N: TenantNotifier + 'static,
{
    pub fn new(leases: Arc<L>, notices: Arc<R>, notifier: Arc<N>) -> Self {
        Self {
            leases,
            notices,
            notifier,
        }
    }

    /// Serve a new notice against an open lease.
    pub fn create_notice(
        &self,
        request: NewEvictionNotice,
        now: DateTime<Utc>,
    ) -> Result<EvictionNotice, EvictionError> {
        let lease = self
            .leases
            .lease(&request.lease_id)?
            .ok_or_else(|| EvictionError::LeaseNotFound(request.lease_id.clone()))?;

        if !lease.status.accepts_eviction() {
            return Err(EvictionError::InvalidLeaseState {
                lease_id: lease.lease_id,
                status: lease.status,
            });
        }

        let notice = EvictionNotice::serve(next_notice_id(), &lease, request, now);
        let stored = self.notices.insert(notice)?;

        info!(
            notice_id = %stored.id,
            lease_id = %stored.lease_id,
            notice_type = stored.notice_type.label(),
            deadline = %stored.deadline_date(),
            "eviction notice served"
        );

        if let Err(err) = self.notifier.notice_served(&stored) {
            warn!(notice_id = %stored.id, error = %err, "tenant notification failed");
        }

        Ok(stored)
    }

    /// Apply a status change from the allow-list, appending `notes` if given.
    pub fn update_status(
        &self,
        notice_id: &NoticeId,
        new_status: NoticeStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EvictionNotice, EvictionError> {
        let notice = self.get_notice(notice_id)?;
        self.transition(notice, new_status, notes, now)
    }

    /// Close out a notice filed with the court. Offboarding is delegated to the
    /// notifier.
    pub fn complete_eviction(
        &self,
        notice_id: &NoticeId,
        now: DateTime<Utc>,
    ) -> Result<EvictionNotice, EvictionError> {
        let notice = self.update_status(notice_id, NoticeStatus::Completed, None, now)?;

        if let Err(err) = self.notifier.eviction_completed(&notice) {
            warn!(notice_id = %notice.id, error = %err, "offboarding hook failed");
        }

        Ok(notice)
    }

    pub fn get_notice(&self, notice_id: &NoticeId) -> Result<EvictionNotice, EvictionError> {
        self.notices
            .fetch(notice_id)?
            .ok_or_else(|| EvictionError::NoticeNotFound(notice_id.clone()))
    }

    pub fn notices_for_landlord(
        &self,
        landlord_id: &LandlordId,
    ) -> Result<Vec<EvictionNotice>, EvictionError> {
        let mut notices = self.notices.for_landlord(landlord_id)?;
        notices.sort_by(|a, b| b.served_at.cmp(&a.served_at));
        Ok(notices)
    }

    /// Notices in `served` or `cure_period` whose deadline is before `now`.
    pub fn expired_notices(&self, now: DateTime<Utc>) -> Result<Vec<EvictionNotice>, EvictionError> {
        let notices = self.notices.due_for_expiry(now)?;
        Ok(notices
            .into_iter()
            .filter(|notice| notice.status.awaiting_deadline() && notice.is_past_deadline(now))
            .collect())
    }

    /// Expire every overdue notice. One bad record never blocks the rest and
    /// successful transitions are kept even if later ones fail.
    pub fn process_expired_notices(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ExpirySweepReport, EvictionError> {
        let mut report = ExpirySweepReport::default();

        for notice in self.expired_notices(now)? {
            let notice_id = notice.id.clone();
            let note = format!(
                "Automatically marked as expired - deadline {} passed",
                notice.deadline_date().format("%Y-%m-%d")
            );

            match self.transition(notice, NoticeStatus::Expired, Some(&note), now) {
                Ok(_) => report.processed += 1,
                Err(err) => {
                    warn!(notice_id = %notice_id, error = %err, "failed to expire notice");
                    report.failures.push(SweepFailure {
                        notice_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            processed = report.processed,
            failed = report.failures.len(),
            "eviction expiry sweep finished"
        );

        Ok(report)
    }

    fn transition(
        &self,
        mut notice: EvictionNotice,
        new_status: NoticeStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EvictionNotice, EvictionError> {
        let current = notice.status;
        if !current.can_transition_to(new_status) {
            return Err(EvictionError::InvalidTransition {
                from: current,
                to: new_status,
            });
        }

        if let Some(note) = notes.filter(|note| !note.trim().is_empty()) {
            notice.append_note(note, now);
        }
        notice.apply_status(new_status, now);

        match self.notices.update_if_status(notice.clone(), current) {
            Ok(()) => {}
            Err(RepositoryError::Conflict) => {
                return Err(EvictionError::ConcurrentUpdate {
                    notice_id: notice.id,
                    expected: current,
                })
            }
            Err(other) => return Err(other.into()),
        }

        info!(
            notice_id = %notice.id,
            from = current.label(),
            to = new_status.label(),
            "eviction notice status updated"
        );

        Ok(notice)
    }
}

/// Error raised by the eviction service.
#[derive(Debug, thiserror::Error)]
pub enum EvictionError {
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),
    #[error("eviction notice {0} not found")]
    NoticeNotFound(NoticeId),
    #[error("cannot serve an eviction notice on lease {lease_id} with status {}", .status.label())]
    InvalidLeaseState { lease_id: LeaseId, status: LeaseStatus },
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: NoticeStatus, to: NoticeStatus },
    #[error("eviction notice {notice_id} changed while being updated (expected status {expected})")]
    ConcurrentUpdate {
        notice_id: NoticeId,
        expected: NoticeStatus,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EvictionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::LeaseNotFound(_) | Self::NoticeNotFound(_))
    }
}
