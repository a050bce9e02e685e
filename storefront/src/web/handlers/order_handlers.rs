// storefront/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{CaptureRequest, CheckoutRequest};
use crate::state::AppState;

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
  Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation(format!("Invalid {what} '{raw}'")))
}

#[instrument(name = "handler::create_order", skip_all, fields(user_id = %body.user_id))]
pub async fn create_order_handler(
  app_state: web::Data<AppState>,
  body: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, AppError> {
  let session = app_state.workflow.create_order(body.into_inner()).await?;
  info!(order_id = %session.order_id, "Order created; buyer redirected to the payment page.");

  Ok(HttpResponse::Created().json(json!({
    "success": true,
    "orderId": session.order_id,
    "paymentUrl": session.payment_url,
    "transactionToken": session.transaction_token,
  })))
}

#[instrument(name = "handler::capture_order", skip_all, fields(order_id = %body.order_id))]
pub async fn capture_order_handler(
  app_state: web::Data<AppState>,
  body: web::Json<CaptureRequest>,
) -> Result<HttpResponse, AppError> {
  let outcome = app_state.workflow.capture_order(body.into_inner()).await?;

  Ok(HttpResponse::Ok().json(json!({
    "success": true,
    "message": outcome.message(),
    "order": outcome.order(),
  })))
}

#[instrument(name = "handler::get_order", skip(app_state))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let order_id = parse_id(&path, "order id")?;
  let order = app_state.workflow.find_order(order_id).await?;
  Ok(HttpResponse::Ok().json(json!({ "success": true, "data": order })))
}

#[instrument(name = "handler::list_user_orders", skip(app_state))]
pub async fn list_user_orders_handler(
  app_state: web::Data<AppState>,
  path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
  let user_id = parse_id(&path, "user id")?;
  let orders = app_state.workflow.orders_for_user(user_id).await?;
  Ok(HttpResponse::Ok().json(json!({ "success": true, "data": orders })))
}
