// storefront/src/store/postgres.rs

use super::{
  ensure_positive, CartStore, Catalog, CustomerDirectory, OrderRepository, StatusChange, StockDelta, StoreError,
};
use crate::models::{
  CaptureFailure, Cart, CartItem, Customer, Order, OrderState, OrderStatus, PaymentStatus, Product,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, cart_items, address_info, total_amount, order_status, payment_status, \
   payment_method, payment_token, payment_id, payment_details, capture_failure, order_date, order_update_date";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
    let pool = PgPoolOptions::new()
      .max_connections(max_connections)
      .connect(database_url)
      .await?;
    info!(max_connections, "Connected to PostgreSQL.");
    Ok(Self::new(pool))
  }

  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    info!("Database migrations applied.");
    Ok(())
  }
}

#[async_trait]
impl OrderRepository for PgStore {
  #[instrument(name = "pg::insert_order", skip_all, fields(order_id = %order.id))]
  async fn insert(&self, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
      "INSERT INTO orders (id, user_id, cart_items, address_info, total_amount, order_status, payment_status, \
       payment_method, payment_token, payment_id, payment_details, capture_failure, order_date, order_update_date) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(Json(&order.cart_items))
    .bind(Json(&order.address_info))
    .bind(order.total_amount)
    .bind(order.order_status)
    .bind(order.payment_status)
    .bind(&order.payment_method)
    .bind(&order.payment_token)
    .bind(&order.payment_id)
    .bind(&order.payment_details)
    .bind(order.capture_failure)
    .bind(order.order_date)
    .bind(order.order_update_date)
    .execute(&self.pool)
    .await
    .map_err(|e| match e {
      sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(format!("order {}", order.id)),
      other => StoreError::Database(other),
    })?;
    Ok(())
  }

  async fn find(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(order)
  }

  async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
    let orders = sqlx::query_as::<_, Order>(&format!(
      "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY order_date DESC"
    ))
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(orders)
  }

  async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM orders WHERE id = $1")
      .bind(id)
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn attach_payment_token(&self, id: Uuid, token: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
    let result = sqlx::query(
      "UPDATE orders SET payment_token = $2, order_update_date = $3 \
       WHERE id = $1 AND order_status = $4 AND payment_status = $5",
    )
    .bind(id)
    .bind(token)
    .bind(at)
    .bind(OrderStatus::Pending)
    .bind(PaymentStatus::Pending)
    .execute(&self.pool)
    .await?;
    Ok(result.rows_affected() == 1)
  }

  #[instrument(name = "pg::claim_for_capture", skip(self))]
  async fn claim_for_capture(
    &self,
    id: Uuid,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
  ) -> Result<Option<Order>, StoreError> {
    let claimed = sqlx::query_as::<_, Order>(&format!(
      "UPDATE orders SET order_status = $2, payment_status = $4, capture_failure = NULL, order_update_date = $3 \
       WHERE id = $1 AND ( \
         (payment_status = $4 AND order_status = $5) \
         OR (payment_status = $4 AND order_status = $2 AND order_update_date < $6) \
         OR (payment_status = $7 AND order_status = $8 AND capture_failure = $9)) \
       RETURNING {ORDER_COLUMNS}"
    ))
    .bind(id)
    .bind(OrderState::CLAIMED.order_status)
    .bind(now)
    .bind(OrderState::CLAIMED.payment_status)
    .bind(OrderStatus::Pending)
    .bind(stale_before)
    .bind(OrderState::CANCELLED.payment_status)
    .bind(OrderState::CANCELLED.order_status)
    .bind(CaptureFailure::Transient)
    .fetch_optional(&self.pool)
    .await?;
    debug!(granted = claimed.is_some(), "Capture claim attempted.");
    Ok(claimed)
  }

  #[instrument(name = "pg::transition", skip(self, change), fields(to = %change.state))]
  async fn transition(
    &self,
    id: Uuid,
    expected: OrderState,
    change: StatusChange,
  ) -> Result<Option<Order>, StoreError> {
    let updated = sqlx::query_as::<_, Order>(&format!(
      "UPDATE orders SET order_status = $2, payment_status = $3, \
         payment_id = COALESCE($4, payment_id), payment_details = COALESCE($5, payment_details), \
         order_update_date = $6, capture_failure = $9 \
       WHERE id = $1 AND order_status = $7 AND payment_status = $8 \
       RETURNING {ORDER_COLUMNS}"
    ))
    .bind(id)
    .bind(change.state.order_status)
    .bind(change.state.payment_status)
    .bind(change.payment_id)
    .bind(change.payment_details)
    .bind(change.at)
    .bind(expected.order_status)
    .bind(expected.payment_status)
    .bind(change.capture_failure)
    .fetch_optional(&self.pool)
    .await?;
    Ok(updated)
  }
}

#[async_trait]
impl Catalog for PgStore {
  async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
    let products = sqlx::query_as::<_, Product>(
      "SELECT id, title, image, price, sale_price, total_stock FROM products WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&self.pool)
    .await?;
    Ok(products)
  }

  #[instrument(name = "pg::decrement_stock", skip_all, fields(products = deltas.len()))]
  async fn decrement_stock(&self, deltas: &[StockDelta]) -> Result<(), StoreError> {
    ensure_positive(deltas)?;
    let mut tx = self.pool.begin().await?;
    for delta in deltas {
      let result = sqlx::query(
        "UPDATE products SET total_stock = total_stock - $1, updated_at = now() \
         WHERE id = $2 AND total_stock >= $1",
      )
      .bind(delta.quantity)
      .bind(delta.product_id)
      .execute(&mut *tx)
      .await?;

      if result.rows_affected() == 0 {
        let available: Option<i32> = sqlx::query_scalar("SELECT total_stock FROM products WHERE id = $1")
          .bind(delta.product_id)
          .fetch_optional(&mut *tx)
          .await?;
        tx.rollback().await?;
        warn!(product_id = %delta.product_id, requested = delta.quantity, ?available, "Stock decrement rejected.");
        return Err(StoreError::StockConflict {
          product_id: delta.product_id,
          requested: delta.quantity,
          available,
        });
      }
    }
    tx.commit().await?;
    Ok(())
  }

  async fn restock(&self, deltas: &[StockDelta]) -> Result<(), StoreError> {
    ensure_positive(deltas)?;
    let mut tx = self.pool.begin().await?;
    for delta in deltas {
      sqlx::query("UPDATE products SET total_stock = total_stock + $1, updated_at = now() WHERE id = $2")
        .bind(delta.quantity)
        .bind(delta.product_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
  }
}

#[async_trait]
impl CartStore for PgStore {
  async fn find_by_user(&self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
    let exists: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM carts WHERE user_id = $1")
      .bind(user_id)
      .fetch_optional(&self.pool)
      .await?;
    if exists.is_none() {
      return Ok(None);
    }

    let items = sqlx::query_as::<_, CartItem>(
      "SELECT product_id, quantity, selected_color, selected_size FROM cart_items \
       WHERE user_id = $1 ORDER BY added_at",
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(Some(Cart { user_id, items }))
  }

  async fn clear_for_user(&self, user_id: Uuid) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;
    let removed = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
      .bind(user_id)
      .execute(&mut *tx)
      .await?
      .rows_affected();
    sqlx::query("UPDATE carts SET updated_at = now() WHERE user_id = $1")
      .bind(user_id)
      .execute(&mut *tx)
      .await?;
    tx.commit().await?;
    debug!(%user_id, removed, "Cart cleared.");
    Ok(())
  }
}

#[async_trait]
impl CustomerDirectory for PgStore {
  async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
    let customer = sqlx::query_as::<_, Customer>("SELECT id, user_name AS name, email FROM users WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;
    Ok(customer)
  }
}
