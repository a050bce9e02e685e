// storefront/src/models/customer.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Read-only view of a registered user, used for gateway customer info and emails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Customer {
  pub id: Uuid,
  pub name: String,
  pub email: String,
}
