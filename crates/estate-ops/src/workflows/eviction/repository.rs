use chrono::{DateTime, Utc};

use super::domain::{
    EvictionNotice, LandlordId, LeaseId, LeaseSnapshot, NoticeId, NoticeStatus,
};
use crate::workflows::RepositoryError;

/// Read access to leases and the parties attached to them.
pub trait LeaseDirectory: Send + Sync {
    fn lease(&self, id: &LeaseId) -> Result<Option<LeaseSnapshot>, RepositoryError>;
}

/// Storage for eviction notices. Notices are never deleted.
pub trait EvictionRepository: Send + Sync {
    fn insert(&self, notice: EvictionNotice) -> Result<EvictionNotice, RepositoryError>;
    fn fetch(&self, id: &NoticeId) -> Result<Option<EvictionNotice>, RepositoryError>;
    /// Writes `notice` only while the stored row still has status `expected`,
    /// otherwise returns `RepositoryError::Conflict`.
    fn update_if_status(
        &self,
        notice: EvictionNotice,
        expected: NoticeStatus,
    ) -> Result<(), RepositoryError>;
    /// Notices still awaiting a response whose deadline is before `now`.
    fn due_for_expiry(&self, now: DateTime<Utc>) -> Result<Vec<EvictionNotice>, RepositoryError>;
    fn for_landlord(&self, landlord: &LandlordId) -> Result<Vec<EvictionNotice>, RepositoryError>;
}

/// Outbound tenant-facing hooks (mail, SMS, offboarding).
pub trait TenantNotifier: Send + Sync {
    fn notice_served(&self, notice: &EvictionNotice) -> Result<(), NotifierError>;
    fn eviction_completed(&self, notice: &EvictionNotice) -> Result<(), NotifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Notifier that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl TenantNotifier for NoopNotifier {
    fn notice_served(&self, _notice: &EvictionNotice) -> Result<(), NotifierError> {
        Ok(())
    }

    fn eviction_completed(&self, _notice: &EvictionNotice) -> Result<(), NotifierError> {
        Ok(())
    }
}
