// storefront/src/pipelines/capture_order_pipeline.rs

//! Capture: the buyer returns from Khalti and the order is reconciled with the
//! gateway's view of the payment.
//!
//! The order is claimed (`pending/pending -> processing/pending`) before the
//! gateway is asked, so only one capture per order can reach the stock
//! decrement. Every later transition is a compare-and-set on the claimed state.
//!
//! Failure after the claim:
//! - stock conflict: `cancelled/failed`, final
//! - gateway, store or internal error: `cancelled/failed`, marked transient so
//!   a later capture can claim the order again and re-verify
//! - failure after the decrement: stock restocked, then the same rollback
//! - gateway reports a non-final status: claim released back to `pending/pending`

use crate::errors::AppError;
use crate::models::{CaptureFailure, CaptureOutcome, Order, OrderState};
use crate::pipelines::common_steps::send_order_notifications;
use crate::pipelines::contexts::CaptureOrderCtx;
use crate::store::{aggregate_stock_deltas, StatusChange, StoreError};
use chrono::Utc;
use orderflow::{ContextData, Pipeline, PipelineControl};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub fn build_capture_order_pipeline() -> Pipeline<CaptureOrderCtx, AppError> {
  let mut p = Pipeline::<CaptureOrderCtx, AppError>::new(&[
    ("load_order", false, None),
    ("claim_order", false, None),
    ("verify_payment", false, None),
    ("decrement_stock", false, None),
    ("clear_cart", true, None),
    ("confirm_order", false, None),
    ("notify_order_confirmed", true, None),
  ]);

  p.on("load_order", load_order);
  p.on("claim_order", claim_order);
  p.compensate("claim_order", cancel_claimed_order);
  p.on("verify_payment", verify_payment);
  p.on("decrement_stock", decrement_stock);
  p.compensate("decrement_stock", restock_items);
  p.on("clear_cart", clear_cart);
  p.on("confirm_order", confirm_order);
  p.on("notify_order_confirmed", notify_order_confirmed);

  p
}

fn required_order_id(ctx: &ContextData<CaptureOrderCtx>) -> Result<Uuid, AppError> {
  ctx
    .with(|c| c.order_id)
    .ok_or_else(|| AppError::Internal("capture step ran before the order was loaded".to_string()))
}

fn required_order(ctx: &ContextData<CaptureOrderCtx>) -> Result<Order, AppError> {
  ctx
    .with(|c| c.order.clone())
    .ok_or_else(|| AppError::Internal("capture step ran before the order was loaded".to_string()))
}

/// Ends the run with the order as an earlier capture left it.
fn stop_already_confirmed(ctx: &ContextData<CaptureOrderCtx>, order: Order) -> PipelineControl {
  info!(order_id = %order.id, "Order already confirmed; nothing to capture.");
  ctx.update(|c| c.outcome = Some(CaptureOutcome::AlreadyConfirmed(order)));
  PipelineControl::Stop
}

#[instrument(name = "capture_order::load_order", skip_all, err(Display))]
async fn load_order(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let (orders, raw_order_id, token) =
    ctx.with(|c| (c.deps.orders.clone(), c.raw_order_id.clone(), c.transaction_token.clone()));

  let order_id = Uuid::parse_str(raw_order_id.trim())
    .map_err(|_| AppError::Validation(format!("Invalid order id '{raw_order_id}'")))?;
  if token.trim().is_empty() {
    return Err(AppError::Validation("Transaction token is required".to_string()));
  }

  let Some(order) = orders.find(order_id).await? else {
    error!(%order_id, "Capture requested for an unknown order.");
    return Err(AppError::NotFound(format!("Order {order_id} not found")));
  };

  if order.payment_token.as_deref() != Some(token.trim()) {
    warn!(%order_id, "Capture token does not match the order's payment session.");
    return Err(AppError::Validation("Transaction token does not match this order".to_string()));
  }

  ctx.update(|c| c.order_id = Some(order_id));
  let state = order.state();
  if state.is_paid() {
    return Ok(stop_already_confirmed(&ctx, order));
  }
  if state.is_closed() {
    if !order.accepts_capture_retry() {
      return Err(AppError::OrderClosed(order_id));
    }
    info!(%order_id, "Retrying capture after an earlier transient failure.");
  }

  ctx.update(|c| c.order = Some(order));
  Ok(PipelineControl::Continue)
}

#[instrument(name = "capture_order::claim_order", skip_all, err(Display))]
async fn claim_order(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let order_id = required_order_id(&ctx)?;
  let (orders, claim_ttl) = ctx.with(|c| (c.deps.orders.clone(), c.deps.claim_ttl));

  let now = Utc::now();
  if let Some(claimed) = orders.claim_for_capture(order_id, now, now - claim_ttl).await? {
    debug!(%order_id, "Capture claim granted.");
    ctx.update(|c| c.order = Some(claimed));
    return Ok(PipelineControl::Continue);
  }

  // Lost the claim: report what the other capture left behind.
  let current = orders
    .find(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;
  let state = current.state();
  if state.is_paid() {
    Ok(stop_already_confirmed(&ctx, current))
  } else if state.is_closed() && !current.accepts_capture_retry() {
    Err(AppError::OrderClosed(order_id))
  } else {
    info!(%order_id, %state, "Another capture holds this order.");
    Err(AppError::CaptureInProgress(order_id))
  }
}

#[instrument(name = "capture_order::cancel_claimed_order", skip_all)]
async fn cancel_claimed_order(ctx: ContextData<CaptureOrderCtx>) -> Result<(), AppError> {
  let order_id = required_order_id(&ctx)?;
  let (orders, reason) = ctx.with(|c| (c.deps.orders.clone(), c.failure));

  match orders
    .transition(order_id, OrderState::CLAIMED, StatusChange::cancelled(reason, Utc::now()))
    .await?
  {
    Some(_) => warn!(%order_id, ?reason, "Capture failed; order cancelled and payment marked failed."),
    None => warn!(%order_id, "Capture failed but the order had already left the processing state; left as is."),
  }
  Ok(())
}

#[instrument(name = "capture_order::verify_payment", skip_all, err(Display))]
async fn verify_payment(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let order_id = required_order_id(&ctx)?;
  let (gateway, orders, token) =
    ctx.with(|c| (c.deps.gateway.clone(), c.deps.orders.clone(), c.transaction_token.clone()));

  let verification = match gateway.verify(token.trim()).await {
    Ok(v) => v,
    Err(e) => {
      error!(%order_id, error = %e, gateway_payload = ?e.payload(), "Payment verification failed.");
      return Err(AppError::Gateway(e));
    }
  };

  if !verification.status.is_completed() {
    let gateway_status = verification.status.to_string();
    info!(%order_id, %gateway_status, "Payment not completed yet; releasing the order.");
    let released = orders
      .transition(order_id, OrderState::CLAIMED, StatusChange::to(OrderState::PENDING, Utc::now()))
      .await?;
    let order = match released {
      Some(order) => order,
      None => orders
        .find(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?,
    };
    ctx.update(|c| c.outcome = Some(CaptureOutcome::Pending { order, gateway_status }));
    return Ok(PipelineControl::Stop);
  }

  ctx.update(|c| c.verification = Some(verification));
  Ok(PipelineControl::Continue)
}

#[instrument(name = "capture_order::decrement_stock", skip_all, err(Display))]
async fn decrement_stock(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let order = required_order(&ctx)?;
  let (catalog, gateway_payload) = ctx.with(|c| {
    (
      c.deps.catalog.clone(),
      c.verification.as_ref().map(|v| v.raw_payload.clone()),
    )
  });

  let deltas = aggregate_stock_deltas(&order.cart_items)?;
  match catalog.decrement_stock(&deltas).await {
    Ok(()) => {
      ctx.update(|c| c.stock_taken = deltas);
      Ok(PipelineControl::Continue)
    }
    Err(StoreError::StockConflict {
      product_id,
      requested,
      available,
    }) => {
      error!(
        order_id = %order.id,
        %product_id,
        requested,
        ?available,
        refund_required = true,
        gateway_payload = ?gateway_payload,
        "Payment captured but stock is insufficient; refund required."
      );
      ctx.update(|c| c.failure = CaptureFailure::StockConflict);
      Err(AppError::StockConflict {
        product_id,
        requested,
        available,
      })
    }
    Err(other) => Err(other.into()),
  }
}

#[instrument(name = "capture_order::restock_items", skip_all)]
async fn restock_items(ctx: ContextData<CaptureOrderCtx>) -> Result<(), AppError> {
  let (catalog, deltas) = ctx.with(|c| (c.deps.catalog.clone(), c.stock_taken.clone()));
  if deltas.is_empty() {
    return Ok(());
  }
  catalog.restock(&deltas).await?;
  ctx.update(|c| c.stock_taken.clear());
  warn!(products = deltas.len(), "Stock restored after a failed capture.");
  Ok(())
}

#[instrument(name = "capture_order::clear_cart", skip_all, err(Display))]
async fn clear_cart(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let order = required_order(&ctx)?;
  let carts = ctx.with(|c| c.deps.carts.clone());
  match carts.find_by_user(order.user_id).await? {
    Some(cart) if !cart.is_empty() => {
      carts.clear_for_user(order.user_id).await?;
      debug!(order_id = %order.id, user_id = %order.user_id, items = cart.items.len(), "Cart cleared after capture.");
    }
    _ => debug!(user_id = %order.user_id, "No cart items to clear."),
  }
  Ok(PipelineControl::Continue)
}

#[instrument(name = "capture_order::confirm_order", skip_all, err(Display))]
async fn confirm_order(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let order_id = required_order_id(&ctx)?;
  let (orders, verification, token) =
    ctx.with(|c| (c.deps.orders.clone(), c.verification.clone(), c.transaction_token.clone()));
  let verification =
    verification.ok_or_else(|| AppError::Internal("confirm_order ran without a verification".to_string()))?;

  let change = StatusChange {
    state: OrderState::CONFIRMED,
    payment_id: Some(verification.gateway_transaction_id.unwrap_or_else(|| token.trim().to_string())),
    payment_details: Some(verification.raw_payload),
    capture_failure: None,
    at: Utc::now(),
  };

  let confirmed = orders
    .transition(order_id, OrderState::CLAIMED, change)
    .await?
    .ok_or_else(|| {
      AppError::Internal(format!(
        "Order {order_id} left the processing state before it could be confirmed"
      ))
    })?;

  info!(%order_id, payment_id = ?confirmed.payment_id, "Payment verified and order confirmed.");
  ctx.update(|c| {
    c.order = Some(confirmed.clone());
    c.outcome = Some(CaptureOutcome::Confirmed(confirmed));
  });
  Ok(PipelineControl::Continue)
}

#[instrument(name = "capture_order::notify_order_confirmed", skip_all, err(Display))]
async fn notify_order_confirmed(ctx: ContextData<CaptureOrderCtx>) -> Result<PipelineControl, AppError> {
  let order = required_order(&ctx)?;
  let (customers, notifier) = ctx.with(|c| (c.deps.customers.clone(), c.deps.notifier.clone()));
  send_order_notifications(customers.as_ref(), notifier.as_ref(), &order).await?;
  Ok(PipelineControl::Continue)
}
