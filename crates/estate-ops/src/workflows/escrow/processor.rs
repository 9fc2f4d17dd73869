use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Payment-intent creation parameters. `manual_capture` places a hold only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    pub amount: Money,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub manual_capture: bool,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub amount: Money,
    pub currency: String,
    pub destination_account_id: String,
    pub transfer_group: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Confirmed, off-session charge against a stored payment method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: Money,
    pub currency: String,
    pub customer_id: String,
    pub payment_method_id: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Money,
    #[serde(default)]
    pub amount_received: Money,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub destination: String,
    #[serde(default)]
    pub reversed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: Money,
    pub status: String,
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
}

impl ConnectedAccount {
    pub fn can_receive_payouts(&self) -> bool {
        self.payouts_enabled && self.details_submitted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAmount {
    pub amount: Money,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Vec<BalanceAmount>,
    pub pending: Vec<BalanceAmount>,
}

/// Processor-side failure classes, kept so callers can tell a permanent decline
/// from a transient outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorErrorKind {
    CardDeclined,
    InvalidRequest,
    Authentication,
    RateLimited,
    Idempotency,
    Api,
    Network,
}

impl ProcessorErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::CardDeclined => "card_declined",
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::RateLimited => "rate_limited",
            Self::Idempotency => "idempotency",
            Self::Api => "api",
            Self::Network => "network",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorError {
    pub kind: ProcessorErrorKind,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: String,
    pub http_status: Option<u16>,
}

impl ProcessorError {
    pub fn new(kind: ProcessorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            decline_code: None,
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProcessorErrorKind::RateLimited | ProcessorErrorKind::Api | ProcessorErrorKind::Network
        )
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.kind.label())?;
        if let Some(code) = &self.code {
            write!(f, " ({code})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ProcessorError {}

/// External payment processor. Mutating calls take an idempotency key so a
/// retried request is applied at most once on the processor side.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn create_transfer(
        &self,
        request: &TransferRequest,
        idempotency_key: &str,
    ) -> Result<Transfer, ProcessorError>;

    async fn create_charge(
        &self,
        request: &ChargeRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError>;

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<Refund, ProcessorError>;

    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError>;

    async fn retrieve_balance(&self) -> Result<Balance, ProcessorError>;

    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, ProcessorError>;
}
