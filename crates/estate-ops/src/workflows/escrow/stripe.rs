use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::processor::{
    Balance, ChargeRequest, ConnectedAccount, PaymentIntent, PaymentIntentRequest,
    PaymentProcessor, ProcessorError, ProcessorErrorKind, Refund, Transfer, TransferRequest,
};
use crate::config::PaymentsConfig;
use crate::money::Money;

/// Connection settings for the Stripe REST API.
#[derive(Clone)]
pub struct StripeClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl StripeClientConfig {
    /// `None` when no API key is configured.
    pub fn from_payments(config: &PaymentsConfig) -> Option<Self> {
        config.api_key.as_ref().map(|api_key| Self {
            api_base: config.api_base.clone(),
            api_key: api_key.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

/// `PaymentProcessor` backed by Stripe Connect. Bodies are form encoded and
/// every mutating call carries an `Idempotency-Key` header.
#[derive(Clone)]
pub struct StripeClient {
    config: StripeClientConfig,
    client: Client,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.config.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

type Form = Vec<(String, String)>;

impl StripeClient {
    pub fn new(config: StripeClientConfig) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| ProcessorError::new(ProcessorErrorKind::Network, err.to_string()))?;

        Ok(Self { config, client })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.api_key)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &Form,
        idempotency_key: Option<&str>,
    ) -> Result<T, ProcessorError> {
        let mut builder = self.request(Method::POST, path).form(form);
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        self.send(builder).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProcessorError> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ProcessorError> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|err| {
                ProcessorError::new(
                    ProcessorErrorKind::Api,
                    format!("unexpected response body: {err}"),
                )
            });
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, "payment processor returned an error");
        Err(map_error_response(status, &body))
    }
}

fn map_transport_error(error: reqwest::Error) -> ProcessorError {
    let message = if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    };
    ProcessorError::new(ProcessorErrorKind::Network, message)
}

pub(crate) fn map_error_response(status: StatusCode, body: &str) -> ProcessorError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|env| env.error);

    let error_type = parsed.as_ref().and_then(|err| err.kind.as_deref());
    let kind = match (status, error_type) {
        (StatusCode::UNAUTHORIZED, _) | (StatusCode::FORBIDDEN, _) => {
            ProcessorErrorKind::Authentication
        }
        (StatusCode::TOO_MANY_REQUESTS, _) => ProcessorErrorKind::RateLimited,
        (_, Some("card_error")) => ProcessorErrorKind::CardDeclined,
        (_, Some("idempotency_error")) => ProcessorErrorKind::Idempotency,
        (_, Some("invalid_request_error")) => ProcessorErrorKind::InvalidRequest,
        (status, _) if status.is_server_error() => ProcessorErrorKind::Api,
        (_, Some("api_error")) => ProcessorErrorKind::Api,
        _ if status.is_client_error() => ProcessorErrorKind::InvalidRequest,
        _ => ProcessorErrorKind::Api,
    };

    let (code, decline_code, message) = match parsed {
        Some(err) => (
            err.code,
            err.decline_code,
            err.message
                .unwrap_or_else(|| format!("payment processor returned {status}")),
        ),
        None => (None, None, format!("payment processor returned {status}")),
    };

    ProcessorError {
        kind,
        code,
        decline_code,
        message,
        http_status: Some(status.as_u16()),
    }
}

fn push_metadata(form: &mut Form, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
}

fn amount_field(name: &str, amount: Money) -> (String, String) {
    (name.to_string(), amount.cents().to_string())
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, request), fields(amount = request.amount.cents()))]
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let capture_method = if request.manual_capture {
            "manual"
        } else {
            "automatic"
        };
        let mut form: Form = vec![
            amount_field("amount", request.amount),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer_id.clone()),
            ("payment_method".to_string(), request.payment_method_id.clone()),
            ("capture_method".to_string(), capture_method.to_string()),
            ("confirm".to_string(), "true".to_string()),
        ];
        push_metadata(&mut form, &request.metadata);
        self.post("/v1/payment_intents", &form, Some(idempotency_key))
            .await
    }

    #[instrument(skip(self), fields(amount = amount.cents()))]
    async fn capture_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let form: Form = vec![amount_field("amount_to_capture", amount)];
        self.post(
            &format!("/v1/payment_intents/{payment_intent_id}/capture"),
            &form,
            Some(idempotency_key),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn cancel_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        self.post(
            &format!("/v1/payment_intents/{payment_intent_id}/cancel"),
            &Form::new(),
            None,
        )
        .await
    }

    #[instrument(skip(self, request), fields(amount = request.amount.cents(), destination = %request.destination_account_id))]
    async fn create_transfer(
        &self,
        request: &TransferRequest,
        idempotency_key: &str,
    ) -> Result<Transfer, ProcessorError> {
        let mut form: Form = vec![
            amount_field("amount", request.amount),
            ("currency".to_string(), request.currency.clone()),
            (
                "destination".to_string(),
                request.destination_account_id.clone(),
            ),
        ];
        if let Some(group) = &request.transfer_group {
            form.push(("transfer_group".to_string(), group.clone()));
        }
        push_metadata(&mut form, &request.metadata);
        self.post("/v1/transfers", &form, Some(idempotency_key)).await
    }

    #[instrument(skip(self, request), fields(amount = request.amount.cents()))]
    async fn create_charge(
        &self,
        request: &ChargeRequest,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, ProcessorError> {
        let mut form: Form = vec![
            amount_field("amount", request.amount),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer_id.clone()),
            ("payment_method".to_string(), request.payment_method_id.clone()),
            ("description".to_string(), request.description.clone()),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
        ];
        push_metadata(&mut form, &request.metadata);
        self.post("/v1/payment_intents", &form, Some(idempotency_key))
            .await
    }

    #[instrument(skip(self))]
    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<Refund, ProcessorError> {
        let mut form: Form = vec![(
            "payment_intent".to_string(),
            payment_intent_id.to_string(),
        )];
        if let Some(amount) = amount {
            form.push(amount_field("amount", amount));
        }
        self.post("/v1/refunds", &form, Some(idempotency_key)).await
    }

    #[instrument(skip(self))]
    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, ProcessorError> {
        self.get(&format!("/v1/accounts/{account_id}")).await
    }

    #[instrument(skip(self))]
    async fn retrieve_balance(&self) -> Result<Balance, ProcessorError> {
        self.get("/v1/balance").await
    }

    #[instrument(skip(self))]
    async fn retrieve_transfer(&self, transfer_id: &str) -> Result<Transfer, ProcessorError> {
        self.get(&format!("/v1/transfers/{transfer_id}")).await
    }
}
