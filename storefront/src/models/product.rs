// storefront/src/models/product.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The catalog fields the order workflow reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
  pub id: Uuid,
  pub title: String,
  pub image: Option<String>,
  pub price: Decimal,
  pub sale_price: Option<Decimal>,
  pub total_stock: i32,
}

impl Product {
  /// `salePrice` when set and positive, otherwise `price`.
  pub fn effective_price(&self) -> Decimal {
    match self.sale_price {
      Some(sale) if sale > Decimal::ZERO => sale,
      _ => self.price,
    }
  }
}
