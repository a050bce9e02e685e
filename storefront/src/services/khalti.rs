// storefront/src/services/khalti.rs

//! Khalti ePayment client.
//!
//! Two calls are used: `epayment/initiate/` to open a payment session and
//! `epayment/lookup/` to read the status of that session. The client holds no
//! per-request state and is shared across handlers.

use crate::config::KhaltiConfig;
use crate::models::OrderLineItem;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Error)]
pub enum GatewayError {
  #[error("Payment gateway misconfigured: {0}")]
  Configuration(String),

  #[error("Amount {0} cannot be expressed in paisa")]
  InvalidAmount(Decimal),

  #[error("Payment gateway request timed out")]
  Timeout,

  #[error("Payment gateway unreachable: {0}")]
  Transport(String),

  #[error("Payment gateway rejected the request ({status}): {detail}")]
  Rejected {
    status: u16,
    detail: String,
    payload: Option<JsonValue>,
  },

  #[error("Unexpected payment gateway response: {0}")]
  InvalidResponse(String),
}

impl GatewayError {
  /// The raw gateway body, when there was one.
  pub fn payload(&self) -> Option<&JsonValue> {
    match self {
      GatewayError::Rejected { payload, .. } => payload.as_ref(),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for GatewayError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      GatewayError::Timeout
    } else if err.is_decode() {
      GatewayError::InvalidResponse(err.to_string())
    } else {
      GatewayError::Transport(err.to_string())
    }
  }
}

/// Lookup status vocabulary. Only `Completed` confirms an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
  Completed,
  Pending,
  Initiated,
  Refunded,
  PartiallyRefunded,
  Expired,
  UserCanceled,
  Other(String),
}

impl GatewayStatus {
  pub fn parse(raw: &str) -> Self {
    match raw.trim() {
      "Completed" => GatewayStatus::Completed,
      "Pending" => GatewayStatus::Pending,
      "Initiated" => GatewayStatus::Initiated,
      "Refunded" => GatewayStatus::Refunded,
      "Partially Refunded" => GatewayStatus::PartiallyRefunded,
      "Expired" => GatewayStatus::Expired,
      "User canceled" | "User cancelled" => GatewayStatus::UserCanceled,
      other => GatewayStatus::Other(other.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      GatewayStatus::Completed => "Completed",
      GatewayStatus::Pending => "Pending",
      GatewayStatus::Initiated => "Initiated",
      GatewayStatus::Refunded => "Refunded",
      GatewayStatus::PartiallyRefunded => "Partially Refunded",
      GatewayStatus::Expired => "Expired",
      GatewayStatus::UserCanceled => "User canceled",
      GatewayStatus::Other(raw) => raw,
    }
  }

  pub fn is_completed(&self) -> bool {
    matches!(self, GatewayStatus::Completed)
  }
}

impl std::fmt::Display for GatewayStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerInfo {
  pub name: String,
  pub email: String,
  pub phone: String,
}

#[derive(Debug, Clone)]
pub struct InitiatePayment {
  /// Base currency units (rupees).
  pub amount: Decimal,
  pub order_id: String,
  pub line_items: Vec<OrderLineItem>,
  pub customer: CustomerInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
  pub payment_url: String,
  pub transaction_token: String,
}

#[derive(Debug, Clone)]
pub struct PaymentVerification {
  pub status: GatewayStatus,
  pub gateway_transaction_id: Option<String>,
  pub raw_payload: JsonValue,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  async fn initiate(&self, request: &InitiatePayment) -> Result<PaymentSession, GatewayError>;

  /// Reads the current status of a session. No retries.
  async fn verify(&self, transaction_token: &str) -> Result<PaymentVerification, GatewayError>;
}

/// Converts rupees to paisa. Amounts with fractional paisa are rejected rather
/// than rounded.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
  let paisa = amount
    .checked_mul(Decimal::ONE_HUNDRED)
    .ok_or(GatewayError::InvalidAmount(amount))?
    .normalize();
  if paisa.scale() != 0 {
    return Err(GatewayError::InvalidAmount(amount));
  }
  paisa.to_i64().ok_or(GatewayError::InvalidAmount(amount))
}

/// Picks a human-readable message out of a gateway error body: `detail`, then
/// `message`, then the first field-level validation error.
pub fn extract_error_detail(body: &JsonValue) -> Option<String> {
  for key in ["detail", "message"] {
    if let Some(text) = body.get(key).and_then(JsonValue::as_str) {
      return Some(text.to_string());
    }
  }
  body.as_object()?.iter().find_map(|(field, value)| {
    let first = match value {
      JsonValue::Array(messages) => messages.first()?.as_str()?,
      JsonValue::String(message) if field != "error_key" => message.as_str(),
      _ => return None,
    };
    Some(format!("{field}: {first}"))
  })
}

#[derive(Serialize)]
struct ProductDetail<'a> {
  identity: String,
  name: &'a str,
  total_price: i64,
  quantity: i32,
  unit_price: i64,
}

#[derive(Serialize)]
struct InitiateBody<'a> {
  return_url: String,
  website_url: &'a str,
  amount: i64,
  purchase_order_id: &'a str,
  purchase_order_name: String,
  customer_info: &'a CustomerInfo,
  product_details: Vec<ProductDetail<'a>>,
}

#[derive(Deserialize)]
struct InitiateResponse {
  pidx: String,
  payment_url: String,
}

#[derive(Serialize)]
struct LookupBody<'a> {
  pidx: &'a str,
}

#[derive(Clone)]
pub struct KhaltiClient {
  http: Client,
  base_url: String,
  secret_key: SecretString,
  client_url: String,
}

impl std::fmt::Debug for KhaltiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("KhaltiClient")
      .field("base_url", &self.base_url)
      .field("secret_key", &"[REDACTED]")
      .field("client_url", &self.client_url)
      .finish()
  }
}

impl KhaltiClient {
  /// Fails with `GatewayError::Configuration` if a credential or URL is blank.
  pub fn new(config: &KhaltiConfig, client_url: &str) -> Result<Self, GatewayError> {
    if config.secret_key.expose_secret().trim().is_empty() {
      return Err(GatewayError::Configuration("KHALTI_SECRET_KEY is empty".to_string()));
    }
    if client_url.trim().is_empty() {
      return Err(GatewayError::Configuration("CLIENT_URL is empty".to_string()));
    }

    let http = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| GatewayError::Configuration(e.to_string()))?;

    let mut base_url = config.base_url.trim().to_string();
    if !base_url.ends_with('/') {
      base_url.push('/');
    }

    Ok(Self {
      http,
      base_url,
      secret_key: SecretString::from(config.secret_key.expose_secret().to_owned()),
      client_url: client_url.trim_end_matches('/').to_string(),
    })
  }

  async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<JsonValue, GatewayError> {
    let response = self
      .http
      .post(format!("{}{path}", self.base_url))
      .header("Authorization", format!("Key {}", self.secret_key.expose_secret()))
      .json(body)
      .send()
      .await?;

    let status = response.status();
    let text = response.text().await?;
    let payload: Option<JsonValue> = serde_json::from_str(&text).ok();

    if !status.is_success() {
      let detail = payload
        .as_ref()
        .and_then(extract_error_detail)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
      return Err(GatewayError::Rejected {
        status: status.as_u16(),
        detail,
        payload,
      });
    }

    payload.ok_or_else(|| GatewayError::InvalidResponse(format!("non-JSON body with status {status}")))
  }
}

#[async_trait]
impl PaymentGateway for KhaltiClient {
  #[instrument(name = "khalti::initiate", skip_all, fields(order_id = %request.order_id))]
  async fn initiate(&self, request: &InitiatePayment) -> Result<PaymentSession, GatewayError> {
    let amount = to_minor_units(request.amount)?;
    let product_details = request
      .line_items
      .iter()
      .map(|item| {
        let unit_price = to_minor_units(item.price)?;
        let total_price = unit_price
          .checked_mul(i64::from(item.quantity))
          .ok_or_else(|| GatewayError::InvalidAmount(item.line_total()))?;
        Ok(ProductDetail {
          identity: item.product_id.to_string(),
          name: &item.title,
          total_price,
          quantity: item.quantity,
          unit_price,
        })
      })
      .collect::<Result<Vec<_>, GatewayError>>()?;

    let body = InitiateBody {
      return_url: format!("{}/shop/payment-success", self.client_url),
      website_url: &self.client_url,
      amount,
      purchase_order_id: &request.order_id,
      purchase_order_name: format!("Order #{}", request.order_id),
      customer_info: &request.customer,
      product_details,
    };

    let payload = self.post("epayment/initiate/", &body).await.map_err(|e| {
      error!(error = %e, gateway_payload = ?e.payload(), "Khalti initiate failed.");
      e
    })?;
    let parsed: InitiateResponse =
      serde_json::from_value(payload).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

    info!(pidx = %parsed.pidx, amount_paisa = amount, "Khalti payment session opened.");
    Ok(PaymentSession {
      payment_url: parsed.payment_url,
      transaction_token: parsed.pidx,
    })
  }

  #[instrument(name = "khalti::verify", skip(self))]
  async fn verify(&self, transaction_token: &str) -> Result<PaymentVerification, GatewayError> {
    let payload = self
      .post("epayment/lookup/", &LookupBody { pidx: transaction_token })
      .await
      .map_err(|e| {
        error!(error = %e, gateway_payload = ?e.payload(), "Khalti lookup failed.");
        e
      })?;

    let status = payload
      .get("status")
      .and_then(JsonValue::as_str)
      .map(GatewayStatus::parse)
      .ok_or_else(|| GatewayError::InvalidResponse("lookup response has no status".to_string()))?;

    let gateway_transaction_id = payload
      .get("transaction_id")
      .and_then(JsonValue::as_str)
      .filter(|id| !id.is_empty())
      .or_else(|| payload.get("pidx").and_then(JsonValue::as_str))
      .map(str::to_string);

    debug!(%status, ?gateway_transaction_id, "Khalti lookup succeeded.");
    Ok(PaymentVerification {
      status,
      gateway_transaction_id,
      raw_payload: payload,
    })
  }
}
