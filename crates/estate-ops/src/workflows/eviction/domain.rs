use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::Money;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
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
    };
}

string_id!(
    /// Identifier wrapper for issued eviction notices.
    NoticeId
);
string_id!(LeaseId);
string_id!(TenantId);
string_id!(UnitId);
string_id!(PropertyId);
string_id!(LandlordId);

/// Statutory notice periods. Each maps to a fixed number of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeType {
    #[serde(rename = "3_day")]
    ThreeDay,
    #[serde(rename = "7_day")]
    SevenDay,
    #[serde(rename = "30_day")]
    ThirtyDay,
}

impl NoticeType {
    pub const fn days(self) -> i64 {
        match self {
            Self::ThreeDay => 3,
            Self::SevenDay => 7,
            Self::ThirtyDay => 30,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ThreeDay => "3_day",
            Self::SevenDay => "7_day",
            Self::ThirtyDay => "30_day",
        }
    }

    pub fn deadline_from(self, served_at: DateTime<Utc>) -> DateTime<Utc> {
        served_at + Duration::days(self.days())
    }
}

/// Lifecycle of a notice.
///
/// ```text
/// served ──▶ cure_period ──▶ filed_with_court ──▶ completed (terminal)
///   │            ├──▶ cured (terminal)
///   │            └──▶ expired (terminal)
///   ├──▶ cured
///   └──▶ expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeStatus {
    Served,
    CurePeriod,
    Cured,
    Expired,
    FiledWithCourt,
    Completed,
}

impl NoticeStatus {
    pub const ALL: [Self; 6] = [
        Self::Served,
        Self::CurePeriod,
        Self::Cured,
        Self::Expired,
        Self::FiledWithCourt,
        Self::Completed,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Served => "served",
            Self::CurePeriod => "cure_period",
            Self::Cured => "cured",
            Self::Expired => "expired",
            Self::FiledWithCourt => "filed_with_court",
            Self::Completed => "completed",
        }
    }

    /// The allow-list of status changes, total over every pair.
    pub const fn can_transition_to(self, next: NoticeStatus) -> bool {
        use NoticeStatus::*;
        match (self, next) {
            (Served, CurePeriod) | (Served, Cured) | (Served, Expired) => true,
            (CurePeriod, Cured) | (CurePeriod, Expired) | (CurePeriod, FiledWithCourt) => true,
            (FiledWithCourt, Completed) => true,
            (Served, _)
            | (CurePeriod, _)
            | (Expired, _)
            | (FiledWithCourt, _)
            | (Cured, _)
            | (Completed, _) => false,
        }
    }

    /// Statuses still inside the tenant's window to respond.
    pub const fn awaiting_deadline(self) -> bool {
        matches!(self, Self::Served | Self::CurePeriod)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cured | Self::Expired | Self::Completed)
    }
}

impl fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Pending,
    Active,
    MonthToMonth,
    Terminated,
    Ended,
}

impl LeaseStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::MonthToMonth => "month_to_month",
            Self::Terminated => "terminated",
            Self::Ended => "ended",
        }
    }

    pub const fn accepts_eviction(self) -> bool {
        !matches!(self, Self::Terminated | Self::Ended)
    }
}

/// Lease row loaded together with the parties a notice refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSnapshot {
    pub lease_id: LeaseId,
    pub status: LeaseStatus,
    pub tenant_id: TenantId,
    pub tenant_name: String,
    pub tenant_email: Option<String>,
    pub unit_id: UnitId,
    pub unit_label: String,
    pub property_id: PropertyId,
    pub landlord_id: LandlordId,
}

/// Landlord request to serve a notice against a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvictionNotice {
    pub lease_id: LeaseId,
    pub notice_type: NoticeType,
    pub reason: String,
    #[serde(default)]
    pub amount_owed: Option<Money>,
    #[serde(default)]
    pub additional_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionNotice {
    pub id: NoticeId,
    pub lease_id: LeaseId,
    pub tenant_id: TenantId,
    pub unit_id: UnitId,
    pub landlord_id: LandlordId,
    pub notice_type: NoticeType,
    pub status: NoticeStatus,
    pub reason: String,
    pub amount_owed: Option<Money>,
    pub additional_notes: Option<String>,
    pub served_at: DateTime<Utc>,
    deadline_date: DateTime<Utc>,
    pub cured_at: Option<DateTime<Utc>>,
    pub filed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvictionNotice {
    pub fn serve(
        id: NoticeId,
        lease: &LeaseSnapshot,
        request: NewEvictionNotice,
        served_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            lease_id: lease.lease_id.clone(),
            tenant_id: lease.tenant_id.clone(),
            unit_id: lease.unit_id.clone(),
            landlord_id: lease.landlord_id.clone(),
            notice_type: request.notice_type,
            status: NoticeStatus::Served,
            reason: request.reason,
            amount_owed: request.amount_owed,
            additional_notes: request.additional_notes,
            served_at,
            deadline_date: request.notice_type.deadline_from(served_at),
            cured_at: None,
            filed_at: None,
            completed_at: None,
        }
    }

    pub fn deadline_date(&self) -> DateTime<Utc> {
        self.deadline_date
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline_date < now
    }

    /// Appends a timestamped line; earlier notes are never rewritten.
    pub fn append_note(&mut self, note: &str, at: DateTime<Utc>) {
        let line = format!("[{}] {}", at.to_rfc3339(), note.trim());
        self.additional_notes = Some(match self.additional_notes.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
            _ => line,
        });
    }

    /// Moves to `next` and stamps the matching timestamp. Callers validate the
    /// transition first.
    pub(crate) fn apply_status(&mut self, next: NoticeStatus, at: DateTime<Utc>) {
        self.status = next;
        match next {
            NoticeStatus::Cured => self.cured_at = Some(at),
            NoticeStatus::FiledWithCourt => self.filed_at = Some(at),
            NoticeStatus::Completed => self.completed_at = Some(at),
            NoticeStatus::Served | NoticeStatus::CurePeriod | NoticeStatus::Expired => {}
        }
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySweepReport {
    pub processed: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub notice_id: NoticeId,
    pub error: String,
}
