// storefront/src/pipelines/create_order_pipeline.rs

//! Checkout: validate, snapshot prices, persist a pending order, then open a
//! Khalti payment session for it. The pending order is deleted again if the
//! payment session cannot be opened.

use crate::errors::AppError;
use crate::models::{CheckoutRequest, Order, OrderLineItem};
use crate::pipelines::contexts::CreateOrderCtx;
use crate::services::khalti::{CustomerInfo, InitiatePayment};
use crate::store::aggregate_stock_deltas;
use chrono::Utc;
use orderflow::{ContextData, Pipeline, PipelineControl};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{error, info, instrument, warn};

pub const SUPPORTED_PAYMENT_METHOD: &str = "khalti";

pub fn build_create_order_pipeline() -> Pipeline<CreateOrderCtx, AppError> {
  let mut p = Pipeline::<CreateOrderCtx, AppError>::new(&[
    ("validate_request", false, None),
    ("snapshot_line_items", false, None),
    ("resolve_customer", false, None),
    ("persist_pending_order", false, None),
    ("initiate_payment", false, None),
    ("record_payment_token", false, None),
  ]);

  p.on("validate_request", validate_request);
  p.on("snapshot_line_items", snapshot_line_items);
  p.on("resolve_customer", resolve_customer);
  p.on("persist_pending_order", persist_pending_order);
  p.compensate("persist_pending_order", delete_pending_order);
  p.on("initiate_payment", initiate_payment);
  p.on("record_payment_token", record_payment_token);

  p
}

fn has_more_than_two_decimals(amount: Decimal) -> bool {
  amount.normalize().scale() > 2
}

/// Shape checks that need no collaborator.
pub fn validate_checkout_request(request: &CheckoutRequest) -> Result<(), AppError> {
  if request.payment_method != SUPPORTED_PAYMENT_METHOD {
    return Err(AppError::Validation(format!(
      "Unsupported payment method '{}'",
      request.payment_method
    )));
  }
  if request.line_items.is_empty() {
    return Err(AppError::Validation("Order must contain at least one item".to_string()));
  }
  if let Some(item) = request.line_items.iter().find(|item| item.quantity < 1) {
    return Err(AppError::Validation(format!(
      "Quantity for product {} must be at least 1",
      item.product_id
    )));
  }
  if request.total_amount <= Decimal::ZERO {
    return Err(AppError::Validation("Total amount must be positive".to_string()));
  }
  if has_more_than_two_decimals(request.total_amount) {
    return Err(AppError::Validation(
      "Total amount cannot have more than two decimal places".to_string(),
    ));
  }

  let address = &request.address_info;
  for (field, value) in [("address", &address.address), ("city", &address.city), ("phone", &address.phone)] {
    if value.trim().is_empty() {
      return Err(AppError::Validation(format!("Shipping {field} is required")));
    }
  }
  Ok(())
}

#[instrument(name = "create_order::validate_request", skip_all, err(Display))]
async fn validate_request(ctx: ContextData<CreateOrderCtx>) -> Result<PipelineControl, AppError> {
  ctx.with(|c| validate_checkout_request(&c.request))?;
  Ok(PipelineControl::Continue)
}

fn not_enough_stock(title: &str, requested: i32, available: i32) -> AppError {
  AppError::Validation(format!(
    "Not enough stock for {title}: requested {requested}, available {available}"
  ))
}

#[instrument(name = "create_order::snapshot_line_items", skip_all, err(Display))]
async fn snapshot_line_items(ctx: ContextData<CreateOrderCtx>) -> Result<PipelineControl, AppError> {
  let (catalog, request) = ctx.with(|c| (c.deps.catalog.clone(), c.request.clone()));

  let mut ids: Vec<_> = request.line_items.iter().map(|item| item.product_id).collect();
  ids.sort();
  ids.dedup();
  let products: HashMap<_, _> = catalog
    .find_products(&ids)
    .await?
    .into_iter()
    .map(|p| (p.id, p))
    .collect();

  let mut line_items = Vec::with_capacity(request.line_items.len());
  for item in &request.line_items {
    let product = products
      .get(&item.product_id)
      .ok_or_else(|| AppError::Validation(format!("Product {} not found", item.product_id)))?;
    if item.quantity > product.total_stock {
      return Err(not_enough_stock(&product.title, item.quantity, product.total_stock));
    }
    line_items.push(OrderLineItem {
      product_id: product.id,
      title: product.title.clone(),
      image: product.image.clone(),
      price: product.effective_price(),
      quantity: item.quantity,
      selected_color: item.selected_color.clone(),
      selected_size: item.selected_size.clone(),
    });
  }

  // Early rejection only; the capture decrement is the authoritative check.
  let deltas = aggregate_stock_deltas(&line_items).map_err(|e| {
    warn!(error = %e, "Checkout quantities cannot be combined.");
    AppError::Validation(format!("Requested quantity is too large: {e}"))
  })?;
  for delta in deltas {
    if let Some(product) = products.get(&delta.product_id) {
      if product.total_stock < delta.quantity {
        return Err(not_enough_stock(&product.title, delta.quantity, product.total_stock));
      }
    }
  }

  let computed: Decimal = line_items.iter().map(OrderLineItem::line_total).sum();
  if computed != request.total_amount {
    warn!(requested = %request.total_amount, %computed, "Checkout total does not match catalog prices.");
    return Err(AppError::Validation(format!(
      "Total amount {} does not match current prices ({})",
      request.total_amount, computed
    )));
  }

  ctx.update(|c| c.line_items = line_items);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "create_order::resolve_customer", skip_all, err(Display))]
async fn resolve_customer(ctx: ContextData<CreateOrderCtx>) -> Result<PipelineControl, AppError> {
  let (customers, user_id) = ctx.with(|c| (c.deps.customers.clone(), c.request.user_id));
  let customer = customers
    .find_customer(user_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;
  ctx.update(|c| c.customer = Some(customer));
  Ok(PipelineControl::Continue)
}

#[instrument(name = "create_order::persist_pending_order", skip_all, err(Display))]
async fn persist_pending_order(ctx: ContextData<CreateOrderCtx>) -> Result<PipelineControl, AppError> {
  let (orders, order) = ctx.with(|c| {
    let order = Order::new_pending(
      c.request.user_id,
      c.line_items.clone(),
      c.request.address_info.clone(),
      c.request.total_amount,
      &c.request.payment_method,
      Utc::now(),
    );
    (c.deps.orders.clone(), order)
  });

  orders.insert(&order).await?;
  info!(order_id = %order.id, user_id = %order.user_id, total = %order.total_amount, "Pending order created.");
  ctx.update(|c| c.order = Some(order));
  Ok(PipelineControl::Continue)
}

#[instrument(name = "create_order::delete_pending_order", skip_all)]
async fn delete_pending_order(ctx: ContextData<CreateOrderCtx>) -> Result<(), AppError> {
  let (orders, order_id) = ctx.with(|c| (c.deps.orders.clone(), c.order.as_ref().map(|o| o.id)));
  let Some(order_id) = order_id else {
    return Ok(());
  };
  let deleted = orders.delete(order_id).await?;
  warn!(%order_id, deleted, "Pending order removed after failed payment initiation.");
  Ok(())
}

#[instrument(name = "create_order::initiate_payment", skip_all, err(Display))]
async fn initiate_payment(ctx: ContextData<CreateOrderCtx>) -> Result<PipelineControl, AppError> {
  let (gateway, request) = ctx.with(|c| {
    let request = match (&c.order, &c.customer) {
      (Some(order), Some(customer)) => Some(InitiatePayment {
        amount: order.total_amount,
        order_id: order.id.to_string(),
        line_items: order.cart_items.clone(),
        customer: CustomerInfo {
          name: customer.name.clone(),
          email: customer.email.clone(),
          phone: order.address_info.phone.clone(),
        },
      }),
      _ => None,
    };
    (c.deps.gateway.clone(), request)
  });
  let request =
    request.ok_or_else(|| AppError::Internal("initiate_payment ran without an order or customer".to_string()))?;

  let session = gateway.initiate(&request).await.map_err(|e| {
    error!(order_id = %request.order_id, error = %e, gateway_payload = ?e.payload(), "Payment initiation failed.");
    AppError::PaymentInitiation(format!("Failed to initialize payment: {e}"))
  })?;

  ctx.update(|c| c.session = Some(session));
  Ok(PipelineControl::Continue)
}

#[instrument(name = "create_order::record_payment_token", skip_all, err(Display))]
async fn record_payment_token(ctx: ContextData<CreateOrderCtx>) -> Result<PipelineControl, AppError> {
  let (orders, order_id, token) = ctx.with(|c| {
    (
      c.deps.orders.clone(),
      c.order.as_ref().map(|o| o.id),
      c.session.as_ref().map(|s| s.transaction_token.clone()),
    )
  });
  let (Some(order_id), Some(token)) = (order_id, token) else {
    return Err(AppError::Internal("record_payment_token ran without an order or session".to_string()));
  };

  let now = Utc::now();
  if !orders.attach_payment_token(order_id, &token, now).await? {
    return Err(AppError::PaymentInitiation(format!(
      "Failed to initialize payment: order {order_id} is no longer pending"
    )));
  }

  ctx.update(|c| {
    if let Some(order) = c.order.as_mut() {
      order.payment_token = Some(token);
      order.order_update_date = now;
    }
  });
  Ok(PipelineControl::Continue)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{AddressInfo, CheckoutLineItem};
  use std::str::FromStr;
  use uuid::Uuid;

  fn request(total: &str) -> CheckoutRequest {
    CheckoutRequest {
      user_id: Uuid::new_v4(),
      line_items: vec![CheckoutLineItem {
        product_id: Uuid::new_v4(),
        quantity: 1,
        selected_color: "default".to_string(),
        selected_size: "default".to_string(),
      }],
      address_info: AddressInfo {
        address: "Lakeside".to_string(),
        city: "Pokhara".to_string(),
        postal_code: None,
        phone: "9811111111".to_string(),
        notes: None,
      },
      total_amount: Decimal::from_str(total).unwrap(),
      payment_method: SUPPORTED_PAYMENT_METHOD.to_string(),
    }
  }

  #[test]
  fn accepts_a_well_formed_request() {
    assert!(validate_checkout_request(&request("1200.50")).is_ok());
    assert!(validate_checkout_request(&request("1200.500")).is_ok());
  }

  #[test]
  fn rejects_sub_paisa_totals_and_non_positive_totals() {
    assert!(validate_checkout_request(&request("10.005")).is_err());
    assert!(validate_checkout_request(&request("0")).is_err());
    assert!(validate_checkout_request(&request("-5")).is_err());
  }

  #[test]
  fn rejects_other_payment_methods_and_blank_addresses() {
    let mut cod = request("100");
    cod.payment_method = "cod".to_string();
    assert!(matches!(validate_checkout_request(&cod), Err(AppError::Validation(_))));

    let mut blank_city = request("100");
    blank_city.address_info.city = "  ".to_string();
    let err = validate_checkout_request(&blank_city).unwrap_err();
    assert!(err.to_string().contains("city"));

    let mut zero_qty = request("100");
    zero_qty.line_items[0].quantity = 0;
    assert!(validate_checkout_request(&zero_qty).is_err());
  }
}
