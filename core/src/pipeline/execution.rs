// core/src/pipeline/execution.rs

//! `Pipeline::run()`: step execution, optional-step recovery and compensation.

use crate::core::context::Handler;
use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::error::FlowError;
use crate::pipeline::definition::Pipeline;
use tracing::{event, info_span, instrument, Instrument, Level};

enum StepOutcome<Err> {
  Continue,
  Stop,
  Failed(Err),
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Executes the pipeline against the shared context `ctx_data`.
  ///
  /// For every step, in order: the `skip_if` predicate is checked, then the
  /// `before`, `on` and `after` handlers run in registration order.
  ///
  /// - A handler returning `Stop` ends the run with `PipelineResult::Stopped`.
  /// - A failing optional step is logged at WARN and the run moves on.
  /// - A failing non-optional step runs the compensators of every completed
  ///   step in reverse order, then returns the step's error unchanged.
  #[instrument(
    name = "Pipeline::run",
    skip_all,
    fields(
      pipeline_context_data_type = %std::any::type_name::<TData>(),
      num_steps = self.steps.len(),
    ),
    err(Display)
  )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(Level::DEBUG, "Pipeline execution starting.");
    let mut completed: Vec<&str> = Vec::with_capacity(self.steps.len());

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();

      if let Some(skip_cond_fn) = &step_def.skip_if {
        if skip_cond_fn(ctx_data.clone()) {
          event!(Level::INFO, %step_name, "Step skipped due to 'skip_if' condition.");
          continue;
        }
      }

      let step_span = info_span!(
        "pipeline_step",
        step_name,
        step_index = step_idx,
        optional = step_def.optional
      );

      let outcome = if self.has_handlers(step_name) {
        self.run_step(step_name, &ctx_data).instrument(step_span).await
      } else if step_def.optional {
        event!(Level::DEBUG, %step_name, "Optional step has no handlers, skipping.");
        continue;
      } else {
        event!(Level::ERROR, %step_name, "Non-optional step has no handlers.");
        StepOutcome::Failed(Err::from(FlowError::HandlerMissing {
          step_name: step_name.to_string(),
        }))
      };

      match outcome {
        StepOutcome::Continue => completed.push(step_name),
        StepOutcome::Stop => {
          event!(Level::INFO, %step_name, "Pipeline stopped by handler.");
          return Ok(PipelineResult::Stopped);
        }
        StepOutcome::Failed(e) if step_def.optional => {
          event!(Level::WARN, %step_name, error = %e, "Optional step failed, continuing.");
        }
        StepOutcome::Failed(e) => {
          event!(Level::ERROR, %step_name, error = %e, "Step failed.");
          self.compensate_completed(&completed, &ctx_data).await;
          return Err(e);
        }
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed successfully.");
    Ok(PipelineResult::Completed)
  }

  fn has_handlers(&self, step_name: &str) -> bool {
    [&self.before_handlers, &self.on_handlers, &self.after_handlers]
      .iter()
      .any(|map| map.get(step_name).is_some_and(|v| !v.is_empty()))
  }

  async fn run_step(&self, step_name: &str, ctx_data: &ContextData<TData>) -> StepOutcome<Err> {
    let phases = [
      ("before", self.before_handlers.get(step_name)),
      ("on", self.on_handlers.get(step_name)),
      ("after", self.after_handlers.get(step_name)),
    ];

    for (phase, handlers) in phases {
      let Some(handlers) = handlers else { continue };
      match run_phase(phase, handlers, ctx_data).await {
        StepOutcome::Continue => {}
        other => return other,
      }
    }
    StepOutcome::Continue
  }

  /// Runs compensators of `completed` steps, last first. Failures are logged
  /// and do not stop the remaining compensators.
  async fn compensate_completed(&self, completed: &[&str], ctx_data: &ContextData<TData>) {
    for step_name in completed.iter().rev() {
      let Some(compensator) = self.compensators.get(*step_name) else {
        continue;
      };
      event!(Level::INFO, %step_name, "Running compensator.");
      let span = info_span!("compensation", step_name = *step_name);
      if let Err(e) = compensator(ctx_data.clone()).instrument(span).await {
        let wrapped = FlowError::CompensationFailed {
          step_name: step_name.to_string(),
          message: e.to_string(),
        };
        event!(Level::ERROR, error = %wrapped, "Compensator failed.");
      }
    }
  }
}

async fn run_phase<TData, Err>(
  phase: &'static str,
  handlers: &[Handler<TData, Err>],
  ctx_data: &ContextData<TData>,
) -> StepOutcome<Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error,
{
  for (handler_idx, handler_fn) in handlers.iter().enumerate() {
    event!(Level::TRACE, phase, handler_index = handler_idx, "Executing handler.");
    match handler_fn(ctx_data.clone()).await {
      Ok(PipelineControl::Continue) => {}
      Ok(PipelineControl::Stop) => return StepOutcome::Stop,
      Err(e) => {
        event!(Level::DEBUG, phase, handler_index = handler_idx, error = %e, "Handler failed.");
        return StepOutcome::Failed(e);
      }
    }
  }
  StepOutcome::Continue
}
