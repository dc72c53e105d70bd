//! A single run-scoped cooperative cancellation signal (§5). Cheap to clone
//! and share across every task; checked, never blocked on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self(Arc::new(AtomicBool::new(false)))
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_canceled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}
