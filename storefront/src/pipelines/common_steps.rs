// storefront/src/pipelines/common_steps.rs

use crate::errors::AppError;
use crate::models::Order;
use crate::services::notifier::Notifier;
use crate::store::CustomerDirectory;
use futures_util::future::join;
use tracing::{info, instrument, warn};

/// Sends the buyer confirmation and the operator notice concurrently.
///
/// Delivery failures are logged and not returned: a confirmed order stays
/// confirmed whether or not anyone was told about it.
#[instrument(name = "common_step::send_order_notifications", skip_all, fields(order_id = %order.id))]
pub async fn send_order_notifications(
  customers: &dyn CustomerDirectory,
  notifier: &dyn Notifier,
  order: &Order,
) -> Result<(), AppError> {
  let Some(customer) = customers.find_customer(order.user_id).await? else {
    warn!(user_id = %order.user_id, "No customer record; order notifications skipped.");
    return Ok(());
  };

  let (buyer, operator) = join(
    notifier.notify_buyer(order, &customer),
    notifier.notify_operator(order, &customer),
  )
  .await;

  match &buyer {
    Ok(()) => info!(to = %customer.email, "Buyer confirmation sent."),
    Err(e) => warn!(error = %e, to = %customer.email, "Failed to send buyer confirmation."),
  }
  if let Err(e) = &operator {
    warn!(error = %e, "Failed to send operator notification.");
  }
  Ok(())
}
