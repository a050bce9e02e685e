// core/src/core/context_data.rs
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Shared, lockable workflow state handed to every step handler.
///
/// Cloning is cheap and yields another handle to the same state, so the caller
/// that starts a pipeline can inspect the final state after `run` returns.
///
/// Guards returned here are blocking locks. Never hold one across `.await`.
#[derive(Debug)]
pub struct ContextData<T: Send + Sync + 'static>(Arc<RwLock<T>>);

impl<T: Send + Sync + 'static> ContextData<T> {
  pub fn new(data: T) -> Self {
    ContextData(Arc::new(RwLock::new(data)))
  }

  pub fn read(&self) -> RwLockReadGuard<'_, T> {
    self.0.read()
  }

  pub fn write(&self) -> RwLockWriteGuard<'_, T> {
    self.0.write()
  }

  /// Copies a value out under a short read lock.
  ///
  /// `let order_id = ctx.with(|c| c.order_id);`
  pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
    let guard = self.0.read();
    f(&guard)
  }

  /// Mutates the state under a short write lock.
  pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    let mut guard = self.0.write();
    f(&mut guard)
  }
}

impl<T: Send + Sync + Clone + 'static> ContextData<T> {
  /// Returns a copy of the whole state.
  pub fn snapshot(&self) -> T {
    self.0.read().clone()
  }
}

impl<T: Send + Sync + 'static> Clone for ContextData<T> {
  fn clone(&self) -> Self {
    ContextData(Arc::clone(&self.0))
  }
}

impl<T: Send + Sync + 'static + Default> Default for ContextData<T> {
  fn default() -> Self {
    Self::new(Default::default())
  }
}
