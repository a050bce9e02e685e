// storefront/src/models/order.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, Type as SqlxType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
  Pending,
  /// A capture holds the order. Never visible as a terminal state.
  Processing,
  Confirmed,
  Completed,
  Cancelled,
  Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "payment_status_enum", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
  Pending,
  Paid,
  Failed,
}

/// Why a capture left the order `cancelled/failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "capture_failure_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaptureFailure {
  /// Paid but out of stock. Final; the payment has to be refunded.
  StockConflict,
  /// Gateway, store or internal error. A later capture may claim the order again.
  Transient,
}

/// The `(orderStatus, paymentStatus)` pair. Transitions compare and set both
/// fields together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderState {
  pub order_status: OrderStatus,
  pub payment_status: PaymentStatus,
}

impl OrderState {
  pub const PENDING: Self = Self::new(OrderStatus::Pending, PaymentStatus::Pending);
  pub const CLAIMED: Self = Self::new(OrderStatus::Processing, PaymentStatus::Pending);
  pub const CONFIRMED: Self = Self::new(OrderStatus::Confirmed, PaymentStatus::Paid);
  pub const CANCELLED: Self = Self::new(OrderStatus::Cancelled, PaymentStatus::Failed);

  pub const fn new(order_status: OrderStatus, payment_status: PaymentStatus) -> Self {
    Self {
      order_status,
      payment_status,
    }
  }

  /// `paid` implies confirmed/completed and `failed` implies cancelled/rejected.
  pub fn is_consistent(&self) -> bool {
    match self.payment_status {
      PaymentStatus::Paid => matches!(self.order_status, OrderStatus::Confirmed | OrderStatus::Completed),
      PaymentStatus::Failed => matches!(self.order_status, OrderStatus::Cancelled | OrderStatus::Rejected),
      PaymentStatus::Pending => matches!(self.order_status, OrderStatus::Pending | OrderStatus::Processing),
    }
  }

  pub fn is_paid(&self) -> bool {
    self.payment_status == PaymentStatus::Paid
  }

  pub fn is_closed(&self) -> bool {
    self.payment_status == PaymentStatus::Failed
  }
}

impl std::fmt::Display for OrderState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}/{:?}", self.order_status, self.payment_status)
  }
}

/// A frozen copy of a cart line at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineItem {
  pub product_id: Uuid,
  pub title: String,
  pub image: Option<String>,
  /// Unit price after sale-price resolution.
  pub price: Decimal,
  pub quantity: i32,
  pub selected_color: String,
  pub selected_size: String,
}

impl OrderLineItem {
  pub fn line_total(&self) -> Decimal {
    self.price * Decimal::from(self.quantity)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddressInfo {
  pub address: String,
  pub city: String,
  #[serde(default, alias = "pincode")]
  pub postal_code: Option<String>,
  pub phone: String,
  #[serde(default)]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  pub id: Uuid,
  pub user_id: Uuid,
  #[sqlx(json)]
  pub cart_items: Vec<OrderLineItem>,
  #[sqlx(json)]
  pub address_info: AddressInfo,
  pub total_amount: Decimal,
  pub order_status: OrderStatus,
  pub payment_status: PaymentStatus,
  pub payment_method: String,
  pub payment_token: Option<String>,
  pub payment_id: Option<String>,
  pub payment_details: Option<JsonValue>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub capture_failure: Option<CaptureFailure>,
  pub order_date: DateTime<Utc>,
  pub order_update_date: DateTime<Utc>,
}

impl Order {
  /// A new `pending/pending` order.
  pub fn new_pending(
    user_id: Uuid,
    cart_items: Vec<OrderLineItem>,
    address_info: AddressInfo,
    total_amount: Decimal,
    payment_method: &str,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      user_id,
      cart_items,
      address_info,
      total_amount,
      order_status: OrderStatus::Pending,
      payment_status: PaymentStatus::Pending,
      payment_method: payment_method.to_string(),
      payment_token: None,
      payment_id: None,
      payment_details: None,
      capture_failure: None,
      order_date: now,
      order_update_date: now,
    }
  }

  pub fn state(&self) -> OrderState {
    OrderState::new(self.order_status, self.payment_status)
  }

  /// Cancelled by a capture that failed for a reason other than stock, so the
  /// payment can still be reconciled by capturing again.
  pub fn accepts_capture_retry(&self) -> bool {
    self.state() == OrderState::CANCELLED && self.capture_failure == Some(CaptureFailure::Transient)
  }

  pub fn set_state(&mut self, state: OrderState) {
    self.order_status = state.order_status;
    self.payment_status = state.payment_status;
  }
}
