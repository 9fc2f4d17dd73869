use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::eviction::domain::{
    EvictionNotice, LandlordId, LeaseId, LeaseSnapshot, LeaseStatus, NewEvictionNotice,
    NoticeId, NoticeStatus, NoticeType, PropertyId, TenantId, UnitId,
};
use crate::workflows::eviction::repository::{
    EvictionRepository, LeaseDirectory, NotifierError, TenantNotifier,
};
use crate::workflows::eviction::EvictionService;
use crate::workflows::RepositoryError;

pub(super) type TestService = EvictionService<MemoryLeases, MemoryNotices, RecordingNotifier>;

pub(super) fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn lease(id: &str, status: LeaseStatus) -> LeaseSnapshot {
    LeaseSnapshot {
        lease_id: LeaseId::from(id),
        status,
        tenant_id: TenantId::from("tenant-7"),
        tenant_name: "Jordan Reyes".to_string(),
        tenant_email: Some("jordan@example.com".to_string()),
        unit_id: UnitId::from("unit-2b"),
        unit_label: "2B".to_string(),
        property_id: PropertyId::from("prop-maple"),
        landlord_id: LandlordId::from("landlord-1"),
    }
}

pub(super) fn request(lease_id: &str, notice_type: NoticeType) -> NewEvictionNotice {
    NewEvictionNotice {
        lease_id: LeaseId::from(lease_id),
        notice_type,
        reason: "Unpaid rent for December".to_string(),
        amount_owed: Some(crate::money::Money::from_cents(145_000)),
        additional_notes: None,
    }
}

pub(super) fn build_service() -> (TestService, Arc<MemoryNotices>, Arc<RecordingNotifier>) {
    let leases = Arc::new(MemoryLeases::with(vec![
        lease("lease-active", LeaseStatus::Active),
        lease("lease-mtm", LeaseStatus::MonthToMonth),
        lease("lease-terminated", LeaseStatus::Terminated),
        lease("lease-ended", LeaseStatus::Ended),
    ]));
    let notices = Arc::new(MemoryNotices::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = EvictionService::new(leases, notices.clone(), notifier.clone());
    (service, notices, notifier)
}

/// Serves a notice and walks it through `path`, returning the final notice.
pub(super) fn notice_in(
    service: &TestService,
    path: &[NoticeStatus],
    served_at: DateTime<Utc>,
) -> EvictionNotice {
    let mut notice = service
        .create_notice(request("lease-active", NoticeType::SevenDay), served_at)
        .expect("notice served");
    for status in path {
        notice = service
            .update_status(&notice.id, *status, None, served_at)
            .expect("path transition allowed");
    }
    notice
}

#[derive(Default)]
pub(super) struct MemoryLeases {
    leases: HashMap<LeaseId, LeaseSnapshot>,
}

impl MemoryLeases {
    pub(super) fn with(leases: Vec<LeaseSnapshot>) -> Self {
        Self {
            leases: leases
                .into_iter()
                .map(|lease| (lease.lease_id.clone(), lease))
                .collect(),
        }
    }
}

impl LeaseDirectory for MemoryLeases {
    fn lease(&self, id: &LeaseId) -> Result<Option<LeaseSnapshot>, RepositoryError> {
        Ok(self.leases.get(id).cloned())
    }
}

#[derive(Default)]
pub(super) struct MemoryNotices {
    records: Mutex<HashMap<NoticeId, EvictionNotice>>,
    failing_updates: Mutex<HashSet<NoticeId>>,
    stale_reads: Mutex<HashMap<NoticeId, EvictionNotice>>,
}

impl MemoryNotices {
    pub(super) fn fail_updates_for(&self, id: &NoticeId) {
        self.failing_updates
            .lock()
            .expect("failure mutex poisoned")
            .insert(id.clone());
    }

    pub(super) fn stored(&self, id: &NoticeId) -> EvictionNotice {
        self.records
            .lock()
            .expect("repository mutex poisoned")
            .get(id)
            .cloned()
            .expect("notice stored")
    }

    /// Simulates another writer: the stored status changes while readers
    /// keep seeing the previous row.
    pub(super) fn race_status(&self, id: &NoticeId, status: NoticeStatus) {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if let Some(notice) = guard.get_mut(id) {
            self.stale_reads
                .lock()
                .expect("stale mutex poisoned")
                .insert(id.clone(), notice.clone());
            notice.status = status;
        }
    }
}

impl EvictionRepository for MemoryNotices {
    fn insert(&self, notice: EvictionNotice) -> Result<EvictionNotice, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&notice.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(notice.id.clone(), notice.clone());
        Ok(notice)
    }

    fn fetch(&self, id: &NoticeId) -> Result<Option<EvictionNotice>, RepositoryError> {
        if let Some(stale) = self.stale_reads.lock().expect("stale mutex poisoned").get(id) {
            return Ok(Some(stale.clone()));
        }
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update_if_status(
        &self,
        notice: EvictionNotice,
        expected: NoticeStatus,
    ) -> Result<(), RepositoryError> {
        if self
            .failing_updates
            .lock()
            .expect("failure mutex poisoned")
            .contains(&notice.id)
        {
            return Err(RepositoryError::Unavailable("disk full".to_string()));
        }

        let mut guard = self.records.lock().expect("repository mutex poisoned");
        match guard.get(&notice.id) {
            Some(current) if current.status == expected => {
                guard.insert(notice.id.clone(), notice);
                Ok(())
            }
            Some(_) => Err(RepositoryError::Conflict),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn due_for_expiry(&self, now: DateTime<Utc>) -> Result<Vec<EvictionNotice>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        let mut due: Vec<EvictionNotice> = guard
            .values()
            .filter(|notice| notice.status.awaiting_deadline() && notice.is_past_deadline(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.deadline_date().cmp(&b.deadline_date()));
        Ok(due)
    }

    fn for_landlord(&self, landlord: &LandlordId) -> Result<Vec<EvictionNotice>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|notice| &notice.landlord_id == landlord)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    served: Mutex<Vec<NoticeId>>,
    completed: Mutex<Vec<NoticeId>>,
    offline: bool,
}

impl RecordingNotifier {
    pub(super) fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub(super) fn served(&self) -> Vec<NoticeId> {
        self.served.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn completed(&self) -> Vec<NoticeId> {
        self.completed.lock().expect("notifier mutex poisoned").clone()
    }
}

impl TenantNotifier for RecordingNotifier {
    fn notice_served(&self, notice: &EvictionNotice) -> Result<(), NotifierError> {
        if self.offline {
            return Err(NotifierError::Transport("smtp relay down".to_string()));
        }
        self.served
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice.id.clone());
        Ok(())
    }

    fn eviction_completed(&self, notice: &EvictionNotice) -> Result<(), NotifierError> {
        if self.offline {
            return Err(NotifierError::Transport("smtp relay down".to_string()));
        }
        self.completed
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice.id.clone());
        Ok(())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
