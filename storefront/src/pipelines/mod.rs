// storefront/src/pipelines/mod.rs

//! The order workflow: two `orderflow` pipelines plus the read paths that
//! go straight to the repository.

use crate::errors::{AppError, Result};
use crate::models::{CaptureOutcome, CaptureRequest, CheckoutRequest, CheckoutSession, Order};
use orderflow::{ContextData, Pipeline};
use tracing::{info, instrument};
use uuid::Uuid;

pub mod capture_order_pipeline;
pub mod common_steps;
pub mod contexts;
pub mod create_order_pipeline;

pub use contexts::{CaptureOrderCtx, CreateOrderCtx, WorkflowDeps};

pub struct OrderWorkflow {
  deps: WorkflowDeps,
  create: Pipeline<CreateOrderCtx, AppError>,
  capture: Pipeline<CaptureOrderCtx, AppError>,
}

impl OrderWorkflow {
  /// Builds both pipelines. Called once at startup.
  pub fn new(deps: WorkflowDeps) -> Self {
    let create = create_order_pipeline::build_create_order_pipeline();
    let capture = capture_order_pipeline::build_capture_order_pipeline();
    info!(
      create_steps = ?create.step_names(),
      capture_steps = ?capture.step_names(),
      "Order pipelines built."
    );
    Self { deps, create, capture }
  }

  /// Persists a pending order and opens a payment session for it.
  #[instrument(name = "OrderWorkflow::create_order", skip_all, fields(user_id = %request.user_id))]
  pub async fn create_order(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
    let ctx = ContextData::new(CreateOrderCtx::new(self.deps.clone(), request));
    self.create.run(ctx.clone()).await?;

    let (order_id, session) = ctx.with(|c| (c.order.as_ref().map(|o| o.id), c.session.clone()));
    match (order_id, session) {
      (Some(order_id), Some(session)) => Ok(CheckoutSession {
        order_id,
        payment_url: session.payment_url,
        transaction_token: session.transaction_token,
      }),
      _ => Err(AppError::Internal("create-order pipeline finished without a payment session".to_string())),
    }
  }

  /// Verifies the payment with the gateway and confirms the order. Safe to
  /// call repeatedly for the same order.
  #[instrument(name = "OrderWorkflow::capture_order", skip_all, fields(order_id = %request.order_id))]
  pub async fn capture_order(&self, request: CaptureRequest) -> Result<CaptureOutcome> {
    let ctx = ContextData::new(CaptureOrderCtx::new(
      self.deps.clone(),
      request.order_id,
      request.transaction_token,
    ));
    self.capture.run(ctx.clone()).await?;

    ctx
      .with(|c| c.outcome.clone())
      .ok_or_else(|| AppError::Internal("capture pipeline finished without an outcome".to_string()))
  }

  pub async fn find_order(&self, order_id: Uuid) -> Result<Order> {
    self
      .deps
      .orders
      .find(order_id)
      .await?
      .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))
  }

  /// Newest first. An empty history is `NotFound`.
  pub async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
    let orders = self.deps.orders.list_for_user(user_id).await?;
    if orders.is_empty() {
      return Err(AppError::NotFound("No orders found!".to_string()));
    }
    Ok(orders)
  }
}
