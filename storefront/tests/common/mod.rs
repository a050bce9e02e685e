// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use katmandu_shop::models::{
  AddressInfo, Cart, CaptureRequest, CartItem, CheckoutLineItem, CheckoutRequest, CheckoutSession, Customer, Order,
  Product, DEFAULT_VARIANT,
};
use katmandu_shop::pipelines::{OrderWorkflow, WorkflowDeps};
use katmandu_shop::services::khalti::{
  GatewayError, GatewayStatus, InitiatePayment, PaymentGateway, PaymentSession, PaymentVerification,
};
use katmandu_shop::services::notifier::{Notifier, NotifyError};
use katmandu_shop::store::{CartStore, MemoryStore, OrderRepository, StoreError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

/// What the fake gateway answers to a lookup.
#[derive(Debug, Clone)]
pub enum VerifyScript {
  Status(&'static str),
  Timeout,
}

pub struct FakeGateway {
  initiate_fails: AtomicBool,
  verify_script: Mutex<VerifyScript>,
  sessions_opened: AtomicUsize,
  verify_calls: AtomicUsize,
  pub initiated: Mutex<Vec<InitiatePayment>>,
}

impl FakeGateway {
  pub fn new() -> Self {
    Self {
      initiate_fails: AtomicBool::new(false),
      verify_script: Mutex::new(VerifyScript::Status("Completed")),
      sessions_opened: AtomicUsize::new(0),
      verify_calls: AtomicUsize::new(0),
      initiated: Mutex::new(Vec::new()),
    }
  }

  pub fn fail_initiate(&self, fail: bool) {
    self.initiate_fails.store(fail, Ordering::SeqCst);
  }

  pub fn script_verify(&self, script: VerifyScript) {
    *self.verify_script.lock() = script;
  }

  pub fn verify_calls(&self) -> usize {
    self.verify_calls.load(Ordering::SeqCst)
  }

  pub fn transaction_id_for(token: &str) -> String {
    format!("txn_{token}")
  }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
  async fn initiate(&self, request: &InitiatePayment) -> Result<PaymentSession, GatewayError> {
    self.initiated.lock().push(request.clone());
    if self.initiate_fails.load(Ordering::SeqCst) {
      return Err(GatewayError::Rejected {
        status: 400,
        detail: "Amount should be greater than Rs. 10".to_string(),
        payload: Some(json!({ "detail": "Amount should be greater than Rs. 10" })),
      });
    }
    let n = self.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;
    let token = format!("pidx_{n}");
    Ok(PaymentSession {
      payment_url: format!("https://test-pay.khalti.com/?pidx={token}"),
      transaction_token: token,
    })
  }

  async fn verify(&self, transaction_token: &str) -> Result<PaymentVerification, GatewayError> {
    self.verify_calls.fetch_add(1, Ordering::SeqCst);
    // Let concurrent captures interleave here.
    tokio::task::yield_now().await;
    let script = self.verify_script.lock().clone();
    match script {
      VerifyScript::Timeout => Err(GatewayError::Timeout),
      VerifyScript::Status(status) => {
        let completed = status == "Completed";
        let transaction_id = completed.then(|| Self::transaction_id_for(transaction_token));
        Ok(PaymentVerification {
          status: GatewayStatus::parse(status),
          gateway_transaction_id: transaction_id.clone(),
          raw_payload: json!({
            "pidx": transaction_token,
            "status": status,
            "transaction_id": transaction_id,
          }),
        })
      }
    }
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  pub sent: Mutex<Vec<(String, Uuid)>>,
}

impl RecordingNotifier {
  pub fn sent(&self) -> Vec<(String, Uuid)> {
    self.sent.lock().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn notify_buyer(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError> {
    self.sent.lock().push((customer.email.clone(), order.id));
    Ok(())
  }

  async fn notify_operator(&self, order: &Order, _customer: &Customer) -> Result<(), NotifyError> {
    self.sent.lock().push(("operator".to_string(), order.id));
    Ok(())
  }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
  async fn notify_buyer(&self, _order: &Order, _customer: &Customer) -> Result<(), NotifyError> {
    Err(NotifyError::InvalidAddress("mailbox unavailable".to_string()))
  }

  async fn notify_operator(&self, _order: &Order, _customer: &Customer) -> Result<(), NotifyError> {
    Err(NotifyError::NoRecipient("operator"))
  }
}

/// A cart store whose writes always fail.
pub struct FailingCartStore;

#[async_trait]
impl CartStore for FailingCartStore {
  async fn find_by_user(&self, _user_id: Uuid) -> Result<Option<Cart>, StoreError> {
    Err(StoreError::Database(sqlx::Error::PoolTimedOut))
  }

  async fn clear_for_user(&self, _user_id: Uuid) -> Result<(), StoreError> {
    Err(StoreError::Database(sqlx::Error::PoolTimedOut))
  }
}

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub gateway: Arc<FakeGateway>,
  pub notifier: Arc<RecordingNotifier>,
  pub workflow: Arc<OrderWorkflow>,
  pub customer: Customer,
}

impl Harness {
  pub fn new() -> Self {
    Self::build(None, None)
  }

  pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
    Self::build(Some(notifier), None)
  }

  pub fn with_cart_store(carts: Arc<dyn CartStore>) -> Self {
    Self::build(None, Some(carts))
  }

  fn build(notifier_override: Option<Arc<dyn Notifier>>, carts: Option<Arc<dyn CartStore>>) -> Self {
    setup_tracing();
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let customer = Customer {
      id: Uuid::new_v4(),
      name: "Aarati Shrestha".to_string(),
      email: "aarati@example.com".to_string(),
    };
    store.put_customer(customer.clone());

    let active_notifier: Arc<dyn Notifier> = match notifier_override {
      Some(n) => n,
      None => notifier.clone(),
    };
    let mut deps = WorkflowDeps::from_store(
      store.clone(),
      gateway.clone(),
      active_notifier,
      chrono::Duration::seconds(120),
    );
    if let Some(carts) = carts {
      deps.carts = carts;
    }

    Self {
      store,
      gateway,
      notifier,
      workflow: Arc::new(OrderWorkflow::new(deps)),
      customer,
    }
  }

  pub fn add_product(&self, title: &str, price: i64, stock: i32) -> Product {
    let product = Product {
      id: Uuid::new_v4(),
      title: title.to_string(),
      image: Some(format!("https://cdn.example/{}.jpg", title.to_lowercase().replace(' ', "-"))),
      price: Decimal::from(price),
      sale_price: None,
      total_stock: stock,
    };
    self.store.put_product(product.clone());
    product
  }

  /// Puts the items in the customer's cart, as the storefront would before checkout.
  pub fn fill_cart(&self, items: &[(&Product, i32)]) {
    for (product, quantity) in items {
      self.store.add_to_cart(self.customer.id, CartItem::new(product.id, *quantity));
    }
  }

  pub fn checkout_request(&self, items: &[(&Product, i32)]) -> CheckoutRequest {
    let total: Decimal = items
      .iter()
      .map(|(p, q)| p.effective_price() * Decimal::from(*q))
      .sum();
    self.checkout_request_with_total(items, total)
  }

  pub fn checkout_request_with_total(&self, items: &[(&Product, i32)], total_amount: Decimal) -> CheckoutRequest {
    CheckoutRequest {
      user_id: self.customer.id,
      line_items: items
        .iter()
        .map(|(p, q)| CheckoutLineItem {
          product_id: p.id,
          quantity: *q,
          selected_color: DEFAULT_VARIANT.to_string(),
          selected_size: DEFAULT_VARIANT.to_string(),
        })
        .collect(),
      address_info: AddressInfo {
        address: "Thamel Marg 12".to_string(),
        city: "Kathmandu".to_string(),
        postal_code: Some("44600".to_string()),
        phone: "9801234567".to_string(),
        notes: None,
      },
      total_amount,
      payment_method: "khalti".to_string(),
    }
  }

  pub async fn place_order(&self, items: &[(&Product, i32)]) -> CheckoutSession {
    self
      .workflow
      .create_order(self.checkout_request(items))
      .await
      .expect("order creation should succeed")
  }

  pub async fn order(&self, id: Uuid) -> Order {
    self.store.find(id).await.unwrap().expect("order should exist")
  }

  pub fn stock_of(&self, product: &Product) -> i32 {
    self.store.product(product.id).expect("product should exist").total_stock
  }
}

pub fn capture_request(session: &CheckoutSession) -> CaptureRequest {
  CaptureRequest {
    order_id: session.order_id.to_string(),
    transaction_token: session.transaction_token.clone(),
  }
}
