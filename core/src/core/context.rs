// core/src/core/context.rs

//! Boxed handler types stored by a `Pipeline<TData, Err>`.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use std::future::Future;
use std::pin::Pin;

/// A step handler.
///
/// Receives a clone of the shared `ContextData<TData>` handle and resolves to
/// either a flow signal or the pipeline's error type.
///
/// Handlers must:
/// 1. Take `.read()` / `.write()` guards only for as long as they copy data in or out.
/// 2. Drop every guard BEFORE the next `.await`.
/// 3. Return `PipelineControl::Stop` for business outcomes that end the flow early,
///    and `Err` only for failures that should trigger compensation.
pub type Handler<TData, Err> = Box<
  dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = Result<PipelineControl, Err>> + Send>>
    + Send
    + Sync,
>;

/// An undo action for a completed step.
///
/// Compensators run in reverse completion order after a non-optional step fails.
/// Their own failures are logged and never replace the original error.
pub type Compensator<TData, Err> =
  Box<dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = Result<(), Err>> + Send>> + Send + Sync>;
