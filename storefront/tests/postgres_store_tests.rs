// tests/postgres_store_tests.rs
//! Runs against a real PostgreSQL. `#[sqlx::test]` creates a fresh database per
//! test from `DATABASE_URL` and applies `./migrations`.
//!
//! `DATABASE_URL=postgres://... cargo test -p katmandu_shop --features postgres-tests`
#![cfg(feature = "postgres-tests")]

use chrono::{Duration, Utc};
use katmandu_shop::models::{
  AddressInfo, CaptureFailure, Order, OrderLineItem, OrderState, OrderStatus, DEFAULT_VARIANT,
};
use katmandu_shop::store::{
  CartStore, Catalog, CustomerDirectory, OrderRepository, PgStore, StatusChange, StockDelta, StoreError,
};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_product(pool: &PgPool, title: &str, stock: i32) -> Uuid {
  let id = Uuid::new_v4();
  sqlx::query("INSERT INTO products (id, title, price, total_stock) VALUES ($1, $2, $3, $4)")
    .bind(id)
    .bind(title)
    .bind(Decimal::from(500))
    .bind(stock)
    .execute(pool)
    .await
    .unwrap();
  id
}

async fn stock_of(pool: &PgPool, product_id: Uuid) -> i32 {
  sqlx::query_scalar("SELECT total_stock FROM products WHERE id = $1")
    .bind(product_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn pending_order(store: &PgStore, product_id: Uuid) -> Order {
  let item = OrderLineItem {
    product_id,
    title: "Pashmina Shawl".to_string(),
    image: None,
    price: Decimal::from(500),
    quantity: 2,
    selected_color: DEFAULT_VARIANT.to_string(),
    selected_size: DEFAULT_VARIANT.to_string(),
  };
  let address = AddressInfo {
    address: "Lakeside 4".to_string(),
    city: "Pokhara".to_string(),
    postal_code: None,
    phone: "9812345678".to_string(),
    notes: Some("Ring twice".to_string()),
  };
  let order = Order::new_pending(
    Uuid::new_v4(),
    vec![item],
    address,
    Decimal::from(1000),
    "khalti",
    Utc::now(),
  );
  store.insert(&order).await.unwrap();
  order
}

#[sqlx::test(migrations = "./migrations")]
async fn inserted_orders_read_back_with_line_items_and_address(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let product = seed_product(&pool, "Pashmina Shawl", 5).await;
  let order = pending_order(&store, product).await;

  let found = store.find(order.id).await.unwrap().expect("order stored");
  assert_eq!(found.state(), OrderState::PENDING);
  assert_eq!(found.cart_items, order.cart_items);
  assert_eq!(found.address_info.notes.as_deref(), Some("Ring twice"));
  assert_eq!(found.total_amount, Decimal::from(1000));
  assert_eq!(found.capture_failure, None);

  let listed = store.list_for_user(order.user_id).await.unwrap();
  assert_eq!(listed.len(), 1);

  assert!(store.delete(order.id).await.unwrap());
  assert!(!store.delete(order.id).await.unwrap());
  assert!(store.find(order.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn claim_is_granted_once_until_it_goes_stale(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let product = seed_product(&pool, "Pashmina Shawl", 5).await;
  let order = pending_order(&store, product).await;
  let now = Utc::now();

  let claimed = store
    .claim_for_capture(order.id, now, now - Duration::seconds(120))
    .await
    .unwrap()
    .expect("pending order is claimable");
  assert_eq!(claimed.state(), OrderState::CLAIMED);

  let fresh = store
    .claim_for_capture(order.id, now, now - Duration::seconds(120))
    .await
    .unwrap();
  assert!(fresh.is_none(), "a live claim is not granted twice");

  let later = now + Duration::seconds(300);
  let reclaimed = store
    .claim_for_capture(order.id, later, later - Duration::seconds(120))
    .await
    .unwrap()
    .expect("a stale claim can be taken over");
  assert_eq!(reclaimed.order_update_date.timestamp(), later.timestamp());
}

#[sqlx::test(migrations = "./migrations")]
async fn only_transient_cancellations_can_be_claimed_again(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let product = seed_product(&pool, "Pashmina Shawl", 5).await;
  let transient = pending_order(&store, product).await;
  let conflicted = pending_order(&store, product).await;
  let now = Utc::now();
  let stale_before = now - Duration::seconds(120);

  for (order, reason) in [
    (&transient, CaptureFailure::Transient),
    (&conflicted, CaptureFailure::StockConflict),
  ] {
    store.claim_for_capture(order.id, now, stale_before).await.unwrap().unwrap();
    let cancelled = store
      .transition(order.id, OrderState::CLAIMED, StatusChange::cancelled(reason, now))
      .await
      .unwrap()
      .expect("claimed order cancels");
    assert_eq!(cancelled.state(), OrderState::CANCELLED);
    assert_eq!(cancelled.capture_failure, Some(reason));
  }

  let retried = store
    .claim_for_capture(transient.id, now, stale_before)
    .await
    .unwrap()
    .expect("transient cancellation is retryable");
  assert_eq!(retried.state(), OrderState::CLAIMED);
  assert_eq!(retried.capture_failure, None);

  let refused = store.claim_for_capture(conflicted.id, now, stale_before).await.unwrap();
  assert!(refused.is_none());
  let still = store.find(conflicted.id).await.unwrap().unwrap();
  assert_eq!(still.state(), OrderState::CANCELLED);
  assert_eq!(still.capture_failure, Some(CaptureFailure::StockConflict));
}

#[sqlx::test(migrations = "./migrations")]
async fn transition_applies_only_from_the_expected_state(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let product = seed_product(&pool, "Pashmina Shawl", 5).await;
  let order = pending_order(&store, product).await;
  let now = Utc::now();

  let mismatch = store
    .transition(order.id, OrderState::CLAIMED, StatusChange::to(OrderState::CONFIRMED, now))
    .await
    .unwrap();
  assert!(mismatch.is_none());
  assert_eq!(store.find(order.id).await.unwrap().unwrap().state(), OrderState::PENDING);

  store
    .claim_for_capture(order.id, now, now - Duration::seconds(120))
    .await
    .unwrap()
    .unwrap();
  let confirmed = store
    .transition(
      order.id,
      OrderState::CLAIMED,
      StatusChange {
        payment_id: Some("txn-77".to_string()),
        payment_details: Some(json!({"status": "Completed"})),
        ..StatusChange::to(OrderState::CONFIRMED, now)
      },
    )
    .await
    .unwrap()
    .expect("claimed order confirms");
  assert_eq!(confirmed.state(), OrderState::CONFIRMED);
  assert_eq!(confirmed.payment_details, Some(json!({"status": "Completed"})));

  // A later change without payment fields keeps the stored ones.
  let completed = store
    .transition(
      order.id,
      OrderState::CONFIRMED,
      StatusChange::to(
        OrderState {
          order_status: OrderStatus::Completed,
          ..OrderState::CONFIRMED
        },
        now,
      ),
    )
    .await
    .unwrap()
    .expect("confirmed order completes");
  assert_eq!(completed.payment_id.as_deref(), Some("txn-77"));
}

#[sqlx::test(migrations = "./migrations")]
async fn payment_token_attaches_only_to_pending_orders(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let product = seed_product(&pool, "Pashmina Shawl", 5).await;
  let order = pending_order(&store, product).await;
  let now = Utc::now();

  assert!(store.attach_payment_token(order.id, "pidx-1", now).await.unwrap());
  store
    .claim_for_capture(order.id, now, now - Duration::seconds(120))
    .await
    .unwrap()
    .unwrap();
  assert!(!store.attach_payment_token(order.id, "pidx-2", now).await.unwrap());
  let stored = store.find(order.id).await.unwrap().unwrap();
  assert_eq!(stored.payment_token.as_deref(), Some("pidx-1"));
}

#[sqlx::test(migrations = "./migrations")]
async fn decrement_takes_all_deltas_or_none(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let shawl = seed_product(&pool, "Pashmina Shawl", 5).await;
  let bowl = seed_product(&pool, "Singing Bowl", 1).await;

  store
    .decrement_stock(&[
      StockDelta { product_id: shawl, quantity: 2 },
      StockDelta { product_id: bowl, quantity: 1 },
    ])
    .await
    .unwrap();
  assert_eq!(stock_of(&pool, shawl).await, 3);
  assert_eq!(stock_of(&pool, bowl).await, 0);

  let err = store
    .decrement_stock(&[
      StockDelta { product_id: shawl, quantity: 1 },
      StockDelta { product_id: bowl, quantity: 1 },
    ])
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    StoreError::StockConflict { product_id, requested: 1, available: Some(0) } if product_id == bowl
  ));
  assert_eq!(stock_of(&pool, shawl).await, 3, "earlier rows roll back with the conflict");

  let missing = Uuid::new_v4();
  let err = store
    .decrement_stock(&[StockDelta { product_id: missing, quantity: 1 }])
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::StockConflict { available: None, .. }));

  let err = store
    .decrement_stock(&[StockDelta { product_id: shawl, quantity: -4 }])
    .await
    .unwrap_err();
  assert!(matches!(err, StoreError::InvalidQuantity { .. }));
  assert_eq!(stock_of(&pool, shawl).await, 3);

  store
    .restock(&[StockDelta { product_id: bowl, quantity: 1 }])
    .await
    .unwrap();
  assert_eq!(stock_of(&pool, bowl).await, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn clearing_a_cart_keeps_the_cart_row(pool: PgPool) {
  let store = PgStore::new(pool.clone());
  let shawl = seed_product(&pool, "Pashmina Shawl", 5).await;
  let user_id = Uuid::new_v4();
  sqlx::query("INSERT INTO users (id, user_name, email) VALUES ($1, 'Bimala', 'bimala@example.com')")
    .bind(user_id)
    .execute(&pool)
    .await
    .unwrap();
  sqlx::query("INSERT INTO carts (user_id) VALUES ($1)")
    .bind(user_id)
    .execute(&pool)
    .await
    .unwrap();
  sqlx::query("INSERT INTO cart_items (user_id, product_id, quantity, selected_color) VALUES ($1, $2, 3, 'red')")
    .bind(user_id)
    .bind(shawl)
    .execute(&pool)
    .await
    .unwrap();

  let cart = store.find_by_user(user_id).await.unwrap().expect("cart exists");
  assert_eq!(cart.items.len(), 1);
  assert_eq!(cart.items[0].selected_color, "red");
  assert_eq!(cart.items[0].selected_size, DEFAULT_VARIANT);

  store.clear_for_user(user_id).await.unwrap();
  let cart = store.find_by_user(user_id).await.unwrap().expect("cart row kept");
  assert!(cart.is_empty());
  assert!(store.find_by_user(Uuid::new_v4()).await.unwrap().is_none());

  let customer = store
    .find_customer(user_id)
    .await
    .unwrap()
    .expect("user row maps to a customer");
  assert_eq!(customer.name, "Bimala");
}
