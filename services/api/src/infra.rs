use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use estate_ops::money::Money;
use estate_ops::workflows::escrow::{
    Balance, BalanceAmount, ChargeRequest, ConnectedAccount, EscrowId, EscrowRelease,
    EscrowRepository, EscrowStatus, JobEscrow, JobMilestone, MilestoneContext, MilestoneId,
    MilestoneStatus, PaymentIntent, PaymentIntentRequest, PaymentProcessor, ProcessorError,
    Refund, StripeClient, Transfer, TransferRequest,
};
use estate_ops::workflows::eviction::{
    EvictionNotice, EvictionRepository, LandlordId, LeaseDirectory, LeaseId, LeaseSnapshot,
    LeaseStatus, NoticeId, NoticeStatus, NotifierError, PropertyId, TenantId, TenantNotifier,
    UnitId,
};
use estate_ops::workflows::RepositoryError;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryLeaseDirectory {
    leases: Arc<Mutex<HashMap<LeaseId, LeaseSnapshot>>>,
}

impl InMemoryLeaseDirectory {
    /// Directory preloaded with the demo portfolio.
    pub(crate) fn seeded() -> Self {
        let directory = Self::default();
        for (lease, status, tenant, unit) in [
            ("lease-maple-1a", LeaseStatus::Active, "Jordan Reyes", "1A"),
            ("lease-maple-2c", LeaseStatus::MonthToMonth, "Sam Patel", "2C"),
            ("lease-maple-3b", LeaseStatus::Ended, "Alex Kim", "3B"),
        ] {
            directory.insert(LeaseSnapshot {
                lease_id: LeaseId::from(lease),
                status,
                tenant_id: TenantId(format!("tenant-{unit}").to_ascii_lowercase()),
                tenant_name: tenant.to_string(),
                tenant_email: None,
                unit_id: UnitId(format!("unit-{unit}").to_ascii_lowercase()),
                unit_label: unit.to_string(),
                property_id: PropertyId::from("prop-maple-court"),
                landlord_id: LandlordId::from("landlord-maple"),
            });
        }
        directory
    }

    pub(crate) fn insert(&self, lease: LeaseSnapshot) {
        self.leases
            .lock()
            .expect("lease mutex poisoned")
            .insert(lease.lease_id.clone(), lease);
    }
}

impl LeaseDirectory for InMemoryLeaseDirectory {
    fn lease(&self, id: &LeaseId) -> Result<Option<LeaseSnapshot>, RepositoryError> {
        let guard = self.leases.lock().expect("lease mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryEvictionRepository {
    notices: Arc<Mutex<HashMap<NoticeId, EvictionNotice>>>,
}

impl EvictionRepository for InMemoryEvictionRepository {
    fn insert(&self, notice: EvictionNotice) -> Result<EvictionNotice, RepositoryError> {
        let mut guard = self.notices.lock().expect("repository mutex poisoned");
        if guard.contains_key(&notice.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(notice.id.clone(), notice.clone());
        Ok(notice)
    }

    fn fetch(&self, id: &NoticeId) -> Result<Option<EvictionNotice>, RepositoryError> {
        let guard = self.notices.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update_if_status(
        &self,
        notice: EvictionNotice,
        expected: NoticeStatus,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.notices.lock().expect("repository mutex poisoned");
        match guard.get(&notice.id).map(|stored| stored.status) {
            Some(status) if status == expected => {
                guard.insert(notice.id.clone(), notice);
                Ok(())
            }
            Some(_) => Err(RepositoryError::Conflict),
            None => Err(RepositoryError::NotFound),
        }
    }

    fn due_for_expiry(&self, now: DateTime<Utc>) -> Result<Vec<EvictionNotice>, RepositoryError> {
        let guard = self.notices.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|notice| notice.status.awaiting_deadline() && notice.is_past_deadline(now))
            .cloned()
            .collect())
    }

    fn for_landlord(&self, landlord: &LandlordId) -> Result<Vec<EvictionNotice>, RepositoryError> {
        let guard = self.notices.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|notice| &notice.landlord_id == landlord)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct EscrowTables {
    escrows: HashMap<EscrowId, JobEscrow>,
    milestones: HashMap<MilestoneId, JobMilestone>,
    releases: Vec<EscrowRelease>,
}

/// Single mutex over all three tables, so a release and its milestone update
/// land together.
#[derive(Default, Clone)]
pub(crate) struct InMemoryEscrowRepository {
    tables: Arc<Mutex<EscrowTables>>,
}

impl EscrowRepository for InMemoryEscrowRepository {
    fn insert_escrow(
        &self,
        escrow: JobEscrow,
        milestones: Vec<JobMilestone>,
    ) -> Result<(), RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        if guard.escrows.contains_key(&escrow.id) {
            return Err(RepositoryError::Conflict);
        }
        for milestone in milestones {
            guard.milestones.insert(milestone.id.clone(), milestone);
        }
        guard.escrows.insert(escrow.id.clone(), escrow);
        Ok(())
    }

    fn fetch_escrow(&self, id: &EscrowId) -> Result<Option<JobEscrow>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        Ok(guard.escrows.get(id).cloned())
    }

    fn milestone_context(
        &self,
        id: &MilestoneId,
    ) -> Result<Option<MilestoneContext>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        Ok(guard.milestones.get(id).and_then(|milestone| {
            guard
                .escrows
                .get(&milestone.escrow_id)
                .map(|escrow| MilestoneContext {
                    milestone: milestone.clone(),
                    escrow: escrow.clone(),
                })
        }))
    }

    fn milestones_for_escrow(&self, id: &EscrowId) -> Result<Vec<JobMilestone>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        let mut milestones: Vec<JobMilestone> = guard
            .milestones
            .values()
            .filter(|milestone| &milestone.escrow_id == id)
            .cloned()
            .collect();
        milestones.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(milestones)
    }

    fn mark_captured(&self, id: &EscrowId, at: DateTime<Utc>) -> Result<JobEscrow, RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        let escrow = guard.escrows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        escrow.captured_at.get_or_insert(at);
        Ok(escrow.clone())
    }

    fn record_release(&self, release: EscrowRelease) -> Result<JobMilestone, RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        let milestone = guard
            .milestones
            .get_mut(&release.milestone_id)
            .ok_or(RepositoryError::NotFound)?;
        if milestone.status != MilestoneStatus::Pending {
            return Err(RepositoryError::Conflict);
        }
        milestone.status = MilestoneStatus::Completed;
        milestone.released_at = Some(release.released_at);
        let updated = milestone.clone();
        guard.releases.push(release);
        Ok(updated)
    }

    fn releases_for_escrow(&self, id: &EscrowId) -> Result<Vec<EscrowRelease>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        Ok(guard
            .releases
            .iter()
            .filter(|release| &release.escrow_id == id)
            .cloned()
            .collect())
    }

    fn mark_refunded(&self, id: &EscrowId, at: DateTime<Utc>) -> Result<JobEscrow, RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        let escrow = guard.escrows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if escrow.status == EscrowStatus::Refunded {
            return Err(RepositoryError::Conflict);
        }
        escrow.status = EscrowStatus::Refunded;
        escrow.refunded_at = Some(at);
        Ok(escrow.clone())
    }
}

/// Offline processor used when no API key is configured. Every call succeeds
/// and returns synthetic identifiers; replays of an idempotency key return the
/// first result.
#[derive(Default)]
pub(crate) struct SandboxProcessor {
    sequence: AtomicU64,
    replays: Mutex<HashMap<String, String>>,
    captured: Mutex<HashMap<String, Money>>,
}

impl SandboxProcessor {
    fn object_id(&self, prefix: &str, idempotency_key: Option<&str>) -> String {
        let mut replays = self.replays.lock().expect("sandbox mutex poisoned");
        if let Some(existing) = idempotency_key.and_then(|key| replays.get(key)) {
            return existing.clone();
        }
        let id = format!(
            "{prefix}_sandbox_{:06}",
            self.sequence.fetch_add(1, Ordering::Relaxed) + 1
        );
        if let Some(key) = idempotency_key {
            replays.insert(key.to_string(), id.clone());
        }
        id
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let status = if request.manual_capture {
            "requires_capture"
        } else {
            "succeeded"
        };
        Ok(PaymentIntent {
            id: self.object_id("pi", Some(idempotency_key)),
            amount: request.amount,
            amount_received: Money::ZERO,
            currency: request.currency.clone(),
            status: status.to_string(),
        })
    }

    async fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Money,
        _idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.captured
            .lock()
            .expect("sandbox mutex poisoned")
            .insert(payment_intent_id.to_string(), amount);
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
        Ok(Transfer {
            id: self.object_id("tr", Some(idempotency_key)),
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
        Ok(PaymentIntent {
            id: self.object_id("pi", Some(idempotency_key)),
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
        let amount = match amount {
            Some(amount) => amount,
            None => self
                .captured
                .lock()
                .expect("sandbox mutex poisoned")
                .get(payment_intent_id)
                .copied()
                .unwrap_or(Money::ZERO),
        };
        Ok(Refund {
            id: self.object_id("re", Some(idempotency_key)),
            amount,
            status: "succeeded".to_string(),
            payment_intent: Some(payment_intent_id.to_string()),
        })
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        Ok(ConnectedAccount {
            id: account_id.to_string(),
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
        })
    }

    async fn retrieve_balance(&self) -> Result<Balance, ProcessorError> {
        Ok(Balance {
            available: vec![BalanceAmount {
                amount: Money::ZERO,
                currency: "usd".to_string(),
            }],
            pending: Vec::new(),
        })
    }

    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, ProcessorError> {
        Ok(Transfer {
            id: transfer_id.to_string(),
            amount: Money::ZERO,
            currency: "usd".to_string(),
            destination: String::new(),
            reversed: false,
        })
    }
}

/// Processor chosen at startup from configuration.
pub(crate) enum ConfiguredProcessor {
    Stripe(StripeClient),
    Sandbox(SandboxProcessor),
}

impl ConfiguredProcessor {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Stripe(_) => "stripe",
            Self::Sandbox(_) => "sandbox",
        }
    }

    fn inner(&self) -> &dyn PaymentProcessor {
        match self {
            Self::Stripe(client) => client,
            Self::Sandbox(sandbox) => sandbox,
        }
    }
}

#[async_trait]
impl PaymentProcessor for ConfiguredProcessor {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.inner()
            .create_payment_intent(request, idempotency_key)
            .await
    }

    async fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.inner()
            .capture_payment_intent(payment_intent_id, amount, idempotency_key)
            .await
    }

    async fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.inner().cancel_payment_intent(payment_intent_id).await
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
        idempotency_key: &str,
    ) -> Result<Transfer, ProcessorError> {
        self.inner().create_transfer(request, idempotency_key).await
    }

    async fn create_charge(
        &self,
        request: &ChargeRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.inner().create_charge(request, idempotency_key).await
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<Refund, ProcessorError> {
        self.inner()
            .create_refund(payment_intent_id, amount, idempotency_key)
            .await
    }

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        self.inner().retrieve_account(account_id).await
    }

    async fn retrieve_balance(&self) -> Result<Balance, ProcessorError> {
        self.inner().retrieve_balance().await
    }

    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, ProcessorError> {
        self.inner().retrieve_transfer(transfer_id).await
    }
}

/// Tenant notifier that only records events in the log.
#[derive(Default, Clone, Copy)]
pub(crate) struct LoggingNotifier;

impl TenantNotifier for LoggingNotifier {
    fn notice_served(&self, notice: &EvictionNotice) -> Result<(), NotifierError> {
        info!(
            notice_id = %notice.id,
            tenant_id = %notice.tenant_id,
            deadline = %notice.deadline_date(),
            "tenant notified of eviction notice"
        );
        Ok(())
    }

    fn eviction_completed(&self, notice: &EvictionNotice) -> Result<(), NotifierError> {
        info!(
            notice_id = %notice.id,
            tenant_id = %notice.tenant_id,
            unit_id = %notice.unit_id,
            "tenant offboarding queued"
        );
        Ok(())
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("failed to parse '{raw}' as RFC 3339 or YYYY-MM-DD"))
}
