// storefront/src/models/checkout.rs

//! Request and response bodies of the checkout endpoints.

use super::cart::default_variant;
use super::order::{AddressInfo, Order};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /orders`. Titles and prices are never taken from the client;
/// they are snapshotted from the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckoutRequest {
  pub user_id: Uuid,
  #[serde(alias = "cartItems")]
  pub line_items: Vec<CheckoutLineItem>,
  pub address_info: AddressInfo,
  pub total_amount: Decimal,
  pub payment_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckoutLineItem {
  pub product_id: Uuid,
  pub quantity: i32,
  #[serde(default = "default_variant")]
  pub selected_color: String,
  #[serde(default = "default_variant")]
  pub selected_size: String,
}

/// What the client needs to redirect the buyer to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
  pub order_id: Uuid,
  pub payment_url: String,
  pub transaction_token: String,
}

/// Body of `POST /orders/capture`. Also accepts the gateway's return-URL
/// parameter names.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CaptureRequest {
  #[serde(alias = "purchase_order_id")]
  pub order_id: String,
  #[serde(alias = "pidx")]
  pub transaction_token: String,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
  /// Payment verified, stock decremented, order confirmed by this call.
  Confirmed(Order),
  /// An earlier capture already confirmed the order. Nothing was changed.
  AlreadyConfirmed(Order),
  /// The gateway has not completed the payment yet. Safe to retry later.
  Pending { order: Order, gateway_status: String },
}

impl CaptureOutcome {
  pub fn order(&self) -> &Order {
    match self {
      CaptureOutcome::Confirmed(order) | CaptureOutcome::AlreadyConfirmed(order) => order,
      CaptureOutcome::Pending { order, .. } => order,
    }
  }

  pub fn message(&self) -> String {
    match self {
      CaptureOutcome::Confirmed(_) => "Payment verified and order confirmed".to_string(),
      CaptureOutcome::AlreadyConfirmed(_) => "Order already confirmed".to_string(),
      CaptureOutcome::Pending { gateway_status, .. } => {
        format!("Payment is still processing (gateway status: {gateway_status}); verify again later")
      }
    }
  }
}
