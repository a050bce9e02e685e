// storefront/src/errors.rs

use crate::services::khalti::GatewayError;
use crate::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use orderflow::FlowError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  /// Payment was taken but stock ran out. Needs a refund.
  #[error("Insufficient stock for product {product_id}: requested {requested}, available {available:?}")]
  StockConflict {
    product_id: Uuid,
    requested: i32,
    available: Option<i32>,
  },

  #[error("Order {0} is closed; its payment failed or was cancelled")]
  OrderClosed(Uuid),

  #[error("Order {0} is already being captured; retry shortly")]
  CaptureInProgress(Uuid),

  #[error("{0}")]
  PaymentInitiation(String),

  #[error("Payment Gateway Error: {0}")]
  Gateway(#[from] GatewayError),

  #[error("Store Error: {0}")]
  Store(StoreError),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: FlowError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<StoreError> for AppError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::StockConflict {
        product_id,
        requested,
        available,
      } => AppError::StockConflict {
        product_id,
        requested,
        available,
      },
      other => AppError::Store(other),
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<AppError>() {
      Ok(app_err) => app_err,
      Err(other) => AppError::Internal(other.to_string()),
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::StockConflict { .. } | AppError::OrderClosed(_) | AppError::CaptureInProgress(_) => {
        StatusCode::CONFLICT
      }
      AppError::PaymentInitiation(_)
      | AppError::Gateway(_)
      | AppError::Store(_)
      | AppError::Config(_)
      | AppError::Workflow { .. }
      | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, "Responding with error");
    } else {
      tracing::warn!(application_error = %self, %status, "Rejecting request");
    }

    // Store and engine internals stay in the logs.
    let message = match self {
      AppError::Store(_) => "Database operation failed".to_string(),
      AppError::Workflow { .. } | AppError::Internal(_) => "An internal error occurred".to_string(),
      AppError::Validation(m) | AppError::NotFound(m) | AppError::Config(m) | AppError::PaymentInitiation(m) => {
        m.clone()
      }
      other => other.to_string(),
    };
    HttpResponse::build(status).json(json!({ "success": false, "message": message }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
