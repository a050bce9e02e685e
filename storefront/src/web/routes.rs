// storefront/src/web/routes.rs

use crate::errors::AppError;
use crate::web::handlers::order_handlers;
use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};

async fn health_check_handler() -> HttpResponse {
  HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Malformed or unknown-field bodies answer like any other validation failure.
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
  AppError::Validation(format!("Invalid request body: {err}")).into()
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler));
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/orders")
          .route("", web::post().to(order_handlers::create_order_handler))
          .route("/capture", web::post().to(order_handlers::capture_order_handler))
          .route("/user/{user_id}", web::get().to(order_handlers::list_user_orders_handler))
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler)),
      ),
  );
}
