//! Eviction notice lifecycle: serving, status transitions, and the daily
//! expiry sweep.

pub mod domain;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    EvictionNotice, ExpirySweepReport, LandlordId, LeaseId, LeaseSnapshot, LeaseStatus,
    NewEvictionNotice, NoticeId, NoticeStatus, NoticeType, PropertyId, SweepFailure, TenantId,
    UnitId,
};
pub use repository::{
    EvictionRepository, LeaseDirectory, NoopNotifier, NotifierError, TenantNotifier,
};
pub use router::{eviction_router, StatusChangeRequest};
pub use service::{EvictionError, EvictionService};
