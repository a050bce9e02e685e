// storefront/src/store/mod.rs

//! Persistence boundaries used by the order workflow.
//!
//! Each trait covers one collaborator. `PgStore` implements all of them
//! against PostgreSQL; `MemoryStore` implements them in-process for tests and
//! local development.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{CaptureFailure, Cart, Customer, Order, OrderLineItem, OrderState, Product};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  /// `available` is `None` when the product no longer exists.
  #[error("Insufficient stock for product {product_id}: requested {requested}, available {available:?}")]
  StockConflict {
    product_id: Uuid,
    requested: i32,
    available: Option<i32>,
  },

  #[error("Duplicate record: {0}")]
  Duplicate(String),

  /// Non-positive, or too large to sum with the other lines of the product.
  #[error("Invalid quantity for product {product_id}")]
  InvalidQuantity { product_id: Uuid },
}

/// Quantity to take from one product's stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDelta {
  pub product_id: Uuid,
  pub quantity: i32,
}

pub(crate) fn ensure_positive(deltas: &[StockDelta]) -> Result<(), StoreError> {
  match deltas.iter().find(|delta| delta.quantity < 1) {
    Some(delta) => Err(StoreError::InvalidQuantity {
      product_id: delta.product_id,
    }),
    None => Ok(()),
  }
}

/// Sums quantities per product (variants share stock) and orders the result by
/// product id, so concurrent captures lock rows in the same order.
///
/// Fails with `StoreError::InvalidQuantity` for a quantity below 1 or a
/// per-product sum that does not fit in an `i32`.
pub fn aggregate_stock_deltas(items: &[OrderLineItem]) -> Result<Vec<StockDelta>, StoreError> {
  let mut per_product: BTreeMap<Uuid, i32> = BTreeMap::new();
  for item in items {
    let invalid = || StoreError::InvalidQuantity {
      product_id: item.product_id,
    };
    if item.quantity < 1 {
      return Err(invalid());
    }
    let total = per_product.entry(item.product_id).or_default();
    *total = total.checked_add(item.quantity).ok_or_else(invalid)?;
  }
  Ok(
    per_product
      .into_iter()
      .map(|(product_id, quantity)| StockDelta { product_id, quantity })
      .collect(),
  )
}

/// Fields written together with a status transition. `None` payment fields
/// keep their stored value; `capture_failure` is always overwritten.
#[derive(Debug, Clone)]
pub struct StatusChange {
  pub state: OrderState,
  pub payment_id: Option<String>,
  pub payment_details: Option<JsonValue>,
  pub capture_failure: Option<CaptureFailure>,
  pub at: DateTime<Utc>,
}

impl StatusChange {
  pub fn to(state: OrderState, at: DateTime<Utc>) -> Self {
    Self {
      state,
      payment_id: None,
      payment_details: None,
      capture_failure: None,
      at,
    }
  }

  pub fn cancelled(reason: CaptureFailure, at: DateTime<Utc>) -> Self {
    Self {
      capture_failure: Some(reason),
      ..Self::to(OrderState::CANCELLED, at)
    }
  }
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
  async fn insert(&self, order: &Order) -> Result<(), StoreError>;

  async fn find(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

  /// Newest first.
  async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;

  /// Returns `false` if there was nothing to delete.
  async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

  /// Records the gateway token on a still-pending order.
  async fn attach_payment_token(&self, id: Uuid, token: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

  /// Atomically moves the order to `processing/pending` if it is
  /// `pending/pending`, if it is `processing/pending` and was last updated
  /// before `stale_before`, or if it was cancelled by a transient capture
  /// failure. The failure reason is cleared. Returns the claimed order, or
  /// `None` if the claim was not granted.
  async fn claim_for_capture(
    &self,
    id: Uuid,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
  ) -> Result<Option<Order>, StoreError>;

  /// Applies `change` only if the order is currently in `expected`. Status,
  /// payment fields and update date are written in one statement. Returns the
  /// updated order, or `None` if the current state did not match.
  async fn transition(
    &self,
    id: Uuid,
    expected: OrderState,
    change: StatusChange,
  ) -> Result<Option<Order>, StoreError>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
  /// Products for the given ids. Unknown ids are omitted.
  async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;

  /// Takes every delta from stock, or none of them. Fails with
  /// `StoreError::StockConflict` if any product is missing or short, and with
  /// `StoreError::InvalidQuantity` for a delta below 1.
  async fn decrement_stock(&self, deltas: &[StockDelta]) -> Result<(), StoreError>;

  /// Puts stock back after a capture that decremented it was rolled back.
  async fn restock(&self, deltas: &[StockDelta]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
  async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError>;

  /// Empties the user's cart. The cart itself is kept.
  async fn clear_for_user(&self, user_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
  async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal::Decimal;

  fn item(product_id: Uuid, quantity: i32, color: &str) -> OrderLineItem {
    OrderLineItem {
      product_id,
      title: "Singing Bowl".to_string(),
      image: None,
      price: Decimal::from(100),
      quantity,
      selected_color: color.to_string(),
      selected_size: "default".to_string(),
    }
  }

  #[test]
  fn deltas_merge_variants_and_sort_by_product() {
    let a = Uuid::from_u128(2);
    let b = Uuid::from_u128(1);
    let deltas = aggregate_stock_deltas(&[item(a, 1, "red"), item(b, 4, "default"), item(a, 2, "blue")]).unwrap();
    assert_eq!(
      deltas,
      vec![
        StockDelta { product_id: b, quantity: 4 },
        StockDelta { product_id: a, quantity: 3 },
      ]
    );
  }

  #[test]
  fn overflowing_variant_sums_are_rejected() {
    let id = Uuid::new_v4();
    let half = i32::MAX / 2 + 1;
    let err = aggregate_stock_deltas(&[item(id, half, "red"), item(id, half, "blue")]).unwrap_err();
    assert!(matches!(err, StoreError::InvalidQuantity { product_id } if product_id == id));
  }

  #[test]
  fn non_positive_quantities_are_rejected() {
    let id = Uuid::new_v4();
    assert!(aggregate_stock_deltas(&[item(id, 0, "default")]).is_err());
    assert!(aggregate_stock_deltas(&[item(id, -3, "default")]).is_err());
  }
}
