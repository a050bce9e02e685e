// src/lib.rs

//! orderflow: an async step pipeline for sequencing order and payment workflows.
//!
//! A pipeline is an ordered list of named steps. Each step can carry:
//!  - `before`, `on` and `after` handlers, run in that order.
//!  - A skip condition evaluated against the shared context.
//!  - An optional flag: failures of optional steps are logged and swallowed.
//!  - A compensation handler that undoes the step if a later step fails.
//!
//! Handlers share state through [`ContextData`], a cloneable handle around an
//! `Arc<RwLock<T>>`. Lock guards must be dropped before any `.await`.

pub mod core;
pub mod error;
pub mod pipeline;

pub use crate::core::context::{Compensator, Handler};
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, PipelineResult};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::pipeline::definition::Pipeline;

pub use crate::error::{FlowError, FlowResult};

/*
    Typical wiring:
    1. Define a context struct `MyCtx` holding the inputs, the collaborators a
       step needs, and the fields later steps read back.
    2. Create a `Pipeline<MyCtx, MyError>` listing its steps.
    3. Register async handlers with `.on()`, `.before()`, `.after()`.
    4. Register undo actions with `.compensate()` for steps whose side effects
       must be reverted when a later step fails.
    5. Build `ContextData::new(ctx)` per request and `pipeline.run(ctx).await`.
*/
