// storefront/src/state.rs

use crate::pipelines::OrderWorkflow;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub workflow: Arc<OrderWorkflow>,
}

impl AppState {
  pub fn new(workflow: Arc<OrderWorkflow>) -> Self {
    Self { workflow }
  }
}
