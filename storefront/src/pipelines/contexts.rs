// storefront/src/pipelines/contexts.rs

//! Context data shared by the steps of the order pipelines.
//! Handlers receive these wrapped in `orderflow::ContextData`.

use crate::models::{CaptureFailure, CaptureOutcome, CheckoutRequest, Customer, Order, OrderLineItem};
use crate::services::khalti::{PaymentGateway, PaymentSession, PaymentVerification};
use crate::services::notifier::Notifier;
use crate::store::{CartStore, Catalog, CustomerDirectory, OrderRepository, StockDelta};
use std::sync::Arc;
use uuid::Uuid;

/// Collaborators of the order workflow.
#[derive(Clone)]
pub struct WorkflowDeps {
  pub orders: Arc<dyn OrderRepository>,
  pub catalog: Arc<dyn Catalog>,
  pub carts: Arc<dyn CartStore>,
  pub customers: Arc<dyn CustomerDirectory>,
  pub gateway: Arc<dyn PaymentGateway>,
  pub notifier: Arc<dyn Notifier>,
  /// How long a capture claim blocks other captures of the same order.
  pub claim_ttl: chrono::Duration,
}

impl WorkflowDeps {
  /// Uses one store for every persistence collaborator.
  pub fn from_store<S>(
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    claim_ttl: chrono::Duration,
  ) -> Self
  where
    S: OrderRepository + Catalog + CartStore + CustomerDirectory + 'static,
  {
    Self {
      orders: store.clone(),
      catalog: store.clone(),
      carts: store.clone(),
      customers: store,
      gateway,
      notifier,
      claim_ttl,
    }
  }
}

/// Underlying data for the create-order pipeline.
#[derive(Clone)]
pub struct CreateOrderCtx {
  pub deps: WorkflowDeps,
  pub request: CheckoutRequest,
  pub line_items: Vec<OrderLineItem>,
  pub customer: Option<Customer>,
  pub order: Option<Order>,
  pub session: Option<PaymentSession>,
}

impl CreateOrderCtx {
  pub fn new(deps: WorkflowDeps, request: CheckoutRequest) -> Self {
    Self {
      deps,
      request,
      line_items: Vec::new(),
      customer: None,
      order: None,
      session: None,
    }
  }
}

/// Underlying data for the capture pipeline.
#[derive(Clone)]
pub struct CaptureOrderCtx {
  pub deps: WorkflowDeps,
  /// As received; parsed by the first step.
  pub raw_order_id: String,
  pub transaction_token: String,
  pub order_id: Option<Uuid>,
  pub order: Option<Order>,
  pub verification: Option<PaymentVerification>,
  /// Stock taken by this capture, put back if a later step fails.
  pub stock_taken: Vec<StockDelta>,
  /// Recorded on the order if this capture has to cancel it.
  pub failure: CaptureFailure,
  pub outcome: Option<CaptureOutcome>,
}

impl CaptureOrderCtx {
  pub fn new(deps: WorkflowDeps, raw_order_id: String, transaction_token: String) -> Self {
    Self {
      deps,
      raw_order_id,
      transaction_token,
      order_id: None,
      order: None,
      verification: None,
      stock_taken: Vec::new(),
      failure: CaptureFailure::Transient,
      outcome: None,
    }
  }
}
