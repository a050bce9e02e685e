// core/src/pipeline/definition.rs

//! The `Pipeline<TData, Err>` struct and its structural operations.

use crate::core::context::{Compensator, Handler};
use crate::core::step::{SkipCondition, StepDef};
use crate::error::FlowError;
use std::collections::HashMap;

/// An ordered set of named steps over shared context data `TData`.
///
/// `Err` is the error type returned by handlers and by [`Pipeline::run`]. It
/// must be constructible from [`FlowError`] so engine-level failures (such as a
/// missing handler) surface through the same type.
pub struct Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  pub(crate) steps: Vec<StepDef<TData>>,

  pub(crate) before_handlers: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) on_handlers: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) after_handlers: HashMap<String, Vec<Handler<TData, Err>>>,

  // At most one undo action per step.
  pub(crate) compensators: HashMap<String, Compensator<TData, Err>>,
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Creates a pipeline from `(name, optional, skip_if)` triples.
  pub fn new(step_defs: &[(&str, bool, Option<SkipCondition<TData>>)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(name, optional, skip_cond_opt)| StepDef {
        name: (*name).to_string(),
        optional: *optional,
        skip_if: skip_cond_opt.clone(),
      })
      .collect();

    Self {
      steps,
      before_handlers: HashMap::new(),
      on_handlers: HashMap::new(),
      after_handlers: HashMap::new(),
      compensators: HashMap::new(),
    }
  }

  /// Step names in execution order.
  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  pub(crate) fn step_index(&self, step_name: &str) -> Option<usize> {
    self.steps.iter().position(|s| s.name == step_name)
  }

  /// Panics when `step_name` is not declared. Wiring a handler to an unknown
  /// step is a programming error, caught at startup.
  pub(crate) fn ensure_step_exists(&self, step_name: &str) -> usize {
    match self.step_index(step_name) {
      Some(idx) => idx,
      None => panic!("orderflow setup error: step '{}' not found in pipeline definition.", step_name),
    }
  }

  fn ensure_step_not_exists(&self, step_name: &str) {
    if self.step_index(step_name).is_some() {
      panic!("orderflow setup error: step '{}' already exists in pipeline definition.", step_name);
    }
  }

  pub fn insert_after_step<S: Into<String>>(
    &mut self,
    existing_step_name: &str,
    new_step_name: S,
    optional: bool,
    skip_if: Option<SkipCondition<TData>>,
  ) {
    let idx = self.ensure_step_exists(existing_step_name);
    let name: String = new_step_name.into();
    self.ensure_step_not_exists(&name);
    self.steps.insert(idx + 1, StepDef { name, optional, skip_if });
  }

  /// Removes a step with all of its handlers and its compensator.
  /// Returns `Err(FlowError::StepNotFound)` if no such step exists.
  pub fn remove_step(&mut self, step_name: &str) -> Result<(), FlowError> {
    let idx = self.step_index(step_name).ok_or_else(|| FlowError::StepNotFound {
      step_name: step_name.to_string(),
    })?;
    self.steps.remove(idx);
    self.before_handlers.remove(step_name);
    self.on_handlers.remove(step_name);
    self.after_handlers.remove(step_name);
    self.compensators.remove(step_name);
    Ok(())
  }

  pub fn set_optional(&mut self, step_name: &str, optional: bool) {
    let idx = self.ensure_step_exists(step_name);
    if let Some(step) = self.steps.get_mut(idx) {
      step.optional = optional;
    }
  }

  pub fn set_skip_condition(&mut self, step_name: &str, skip_if: Option<SkipCondition<TData>>) {
    let idx = self.ensure_step_exists(step_name);
    if let Some(step) = self.steps.get_mut(idx) {
      step.skip_if = skip_if;
    }
  }
}

impl<TData, Err> std::fmt::Debug for Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("steps", &self.steps)
      .field("compensated_steps", &self.compensators.keys().collect::<Vec<_>>())
      .finish()
  }
}
