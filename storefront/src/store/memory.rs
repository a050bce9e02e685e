// storefront/src/store/memory.rs

use super::{
  ensure_positive, CartStore, Catalog, CustomerDirectory, OrderRepository, StatusChange, StockDelta, StoreError,
};
use crate::models::{Cart, CartItem, Customer, Order, OrderState, Product};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
  orders: HashMap<Uuid, Order>,
  products: HashMap<Uuid, Product>,
  carts: HashMap<Uuid, Cart>,
  customers: HashMap<Uuid, Customer>,
}

/// In-process store. Every operation runs under one mutex, so conditional
/// updates are atomic the same way the SQL statements are.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn put_product(&self, product: Product) {
    self.inner.lock().products.insert(product.id, product);
  }

  pub fn put_customer(&self, customer: Customer) {
    self.inner.lock().customers.insert(customer.id, customer);
  }

  pub fn product(&self, id: Uuid) -> Option<Product> {
    self.inner.lock().products.get(&id).cloned()
  }

  pub fn set_price(&self, id: Uuid, price: Decimal) -> bool {
    match self.inner.lock().products.get_mut(&id) {
      Some(product) => {
        product.price = price;
        true
      }
      None => false,
    }
  }

  /// Adds an item to the user's cart, creating the cart if needed.
  pub fn add_to_cart(&self, user_id: Uuid, item: CartItem) {
    self
      .inner
      .lock()
      .carts
      .entry(user_id)
      .or_insert_with(|| Cart::new(user_id))
      .add_item(item);
  }

  pub fn cart(&self, user_id: Uuid) -> Option<Cart> {
    self.inner.lock().carts.get(&user_id).cloned()
  }

  pub fn order_count(&self) -> usize {
    self.inner.lock().orders.len()
  }
}

#[async_trait]
impl OrderRepository for MemoryStore {
  async fn insert(&self, order: &Order) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    if inner.orders.contains_key(&order.id) {
      return Err(StoreError::Duplicate(format!("order {}", order.id)));
    }
    inner.orders.insert(order.id, order.clone());
    Ok(())
  }

  async fn find(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
    Ok(self.inner.lock().orders.get(&id).cloned())
  }

  async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
    let mut orders: Vec<Order> = self
      .inner
      .lock()
      .orders
      .values()
      .filter(|o| o.user_id == user_id)
      .cloned()
      .collect();
    orders.sort_by(|a, b| b.order_date.cmp(&a.order_date));
    Ok(orders)
  }

  async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
    Ok(self.inner.lock().orders.remove(&id).is_some())
  }

  async fn attach_payment_token(&self, id: Uuid, token: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
    let mut inner = self.inner.lock();
    match inner.orders.get_mut(&id) {
      Some(order) if order.state() == OrderState::PENDING => {
        order.payment_token = Some(token.to_string());
        order.order_update_date = at;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn claim_for_capture(
    &self,
    id: Uuid,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
  ) -> Result<Option<Order>, StoreError> {
    let mut inner = self.inner.lock();
    let Some(order) = inner.orders.get_mut(&id) else {
      return Ok(None);
    };
    let claimable = match order.state() {
      OrderState::PENDING => true,
      OrderState::CLAIMED => order.order_update_date < stale_before,
      _ => order.accepts_capture_retry(),
    };
    if !claimable {
      return Ok(None);
    }
    order.set_state(OrderState::CLAIMED);
    order.capture_failure = None;
    order.order_update_date = now;
    Ok(Some(order.clone()))
  }

  async fn transition(
    &self,
    id: Uuid,
    expected: OrderState,
    change: StatusChange,
  ) -> Result<Option<Order>, StoreError> {
    let mut inner = self.inner.lock();
    match inner.orders.get_mut(&id) {
      Some(order) if order.state() == expected => {
        order.set_state(change.state);
        if change.payment_id.is_some() {
          order.payment_id = change.payment_id;
        }
        if change.payment_details.is_some() {
          order.payment_details = change.payment_details;
        }
        order.capture_failure = change.capture_failure;
        order.order_update_date = change.at;
        Ok(Some(order.clone()))
      }
      _ => Ok(None),
    }
  }
}

#[async_trait]
impl Catalog for MemoryStore {
  async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
    let inner = self.inner.lock();
    Ok(ids.iter().filter_map(|id| inner.products.get(id).cloned()).collect())
  }

  async fn decrement_stock(&self, deltas: &[StockDelta]) -> Result<(), StoreError> {
    ensure_positive(deltas)?;
    let mut inner = self.inner.lock();
    // Check everything first so a conflict leaves stock untouched.
    for delta in deltas {
      let available = inner.products.get(&delta.product_id).map(|p| p.total_stock);
      if available.map_or(true, |stock| stock < delta.quantity) {
        return Err(StoreError::StockConflict {
          product_id: delta.product_id,
          requested: delta.quantity,
          available,
        });
      }
    }
    for delta in deltas {
      if let Some(product) = inner.products.get_mut(&delta.product_id) {
        product.total_stock -= delta.quantity;
      }
    }
    Ok(())
  }

  async fn restock(&self, deltas: &[StockDelta]) -> Result<(), StoreError> {
    ensure_positive(deltas)?;
    let mut inner = self.inner.lock();
    for delta in deltas {
      if let Some(product) = inner.products.get_mut(&delta.product_id) {
        product.total_stock = product.total_stock.saturating_add(delta.quantity);
      }
    }
    Ok(())
  }
}

#[async_trait]
impl CartStore for MemoryStore {
  async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
    Ok(self.cart(user_id))
  }

  async fn clear_for_user(&self, user_id: Uuid) -> Result<(), StoreError> {
    if let Some(cart) = self.inner.lock().carts.get_mut(&user_id) {
      cart.clear();
    }
    Ok(())
  }
}

#[async_trait]
impl CustomerDirectory for MemoryStore {
  async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
    Ok(self.inner.lock().customers.get(&id).cloned())
  }
}
