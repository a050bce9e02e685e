// storefront/src/models/cart.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variant value used when a product has no color or size options.
pub const DEFAULT_VARIANT: &str = "default";

pub(crate) fn default_variant() -> String {
  DEFAULT_VARIANT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
  pub product_id: Uuid,
  pub quantity: i32,
  #[serde(default = "default_variant")]
  pub selected_color: String,
  #[serde(default = "default_variant")]
  pub selected_size: String,
}

impl CartItem {
  pub fn new(product_id: Uuid, quantity: i32) -> Self {
    Self {
      product_id,
      quantity,
      selected_color: default_variant(),
      selected_size: default_variant(),
    }
  }

  pub fn with_color(mut self, color: impl Into<String>) -> Self {
    self.selected_color = color.into();
    self
  }

  pub fn with_size(mut self, size: impl Into<String>) -> Self {
    self.selected_size = size.into();
    self
  }

  fn same_variant(&self, other: &CartItem) -> bool {
    self.product_id == other.product_id
      && self.selected_color == other.selected_color
      && self.selected_size == other.selected_size
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
  pub user_id: Uuid,
  pub items: Vec<CartItem>,
}

impl Cart {
  pub fn new(user_id: Uuid) -> Self {
    Self {
      user_id,
      items: Vec::new(),
    }
  }

  /// Adds `item`, merging quantities with an existing line of the same variant.
  pub fn add_item(&mut self, item: CartItem) {
    match self.items.iter_mut().find(|existing| existing.same_variant(&item)) {
      Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
      None => self.items.push(item),
    }
  }

  pub fn clear(&mut self) {
    self.items.clear();
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}
