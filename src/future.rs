//! One-shot completion future for a chunk's overall processing.
//!
//! The worker that settles a chunk and the collaborator reading the result
//! run on different threads, so the slot is a mutex + condvar pair. Handles
//! are cheaply cloneable; every clone observes the same terminal value.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PipelineError;

/// Terminal result of processing one chunk.
///
/// The payload is shared so that every requester of the same coordinate can
/// observe the same value.
pub type ChunkResult<P> = Result<Arc<P>, PipelineError>;

struct Shared<P> {
  slot: Mutex<Option<ChunkResult<P>>>,
  cond: Condvar,
}

/// Cloneable handle to a one-shot chunk result.
///
/// Resolved exactly once by the pipeline; later resolution attempts are
/// ignored.
pub struct ChunkFuture<P> {
  shared: Arc<Shared<P>>,
}

impl<P> Clone for ChunkFuture<P> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<P> ChunkFuture<P> {
  pub(crate) fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        slot: Mutex::new(None),
        cond: Condvar::new(),
      }),
    }
  }

  /// A future that is already settled (used when a request is rejected).
  pub(crate) fn resolved(result: ChunkResult<P>) -> Self {
    let future = Self::new();
    future.resolve(result);
    future
  }

  /// Settle the future. First resolution wins; returns whether this call
  /// was the one that settled it.
  pub(crate) fn resolve(&self, result: ChunkResult<P>) -> bool {
    let mut slot = self.shared.slot.lock();
    if slot.is_some() {
      return false;
    }
    *slot = Some(result);
    self.shared.cond.notify_all();
    true
  }

  /// Whether a terminal value has been set.
  pub fn is_settled(&self) -> bool {
    self.shared.slot.lock().is_some()
  }

  /// Non-blocking poll for the terminal value.
  pub fn try_get(&self) -> Option<ChunkResult<P>> {
    self.shared.slot.lock().clone()
  }

  /// Block the calling thread until the future settles.
  pub fn wait(&self) -> ChunkResult<P> {
    let mut slot = self.shared.slot.lock();
    loop {
      if let Some(result) = slot.as_ref() {
        return result.clone();
      }
      self.shared.cond.wait(&mut slot);
    }
  }

  /// Block until the future settles or the timeout elapses.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<ChunkResult<P>> {
    let deadline = Instant::now() + timeout;
    let mut slot = self.shared.slot.lock();
    loop {
      if let Some(result) = slot.as_ref() {
        return Some(result.clone());
      }
      if self.shared.cond.wait_until(&mut slot, deadline).timed_out() {
        return slot.clone();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::position::ChunkPos;

  #[test]
  fn unsettled_future_polls_none() {
    let future: ChunkFuture<u32> = ChunkFuture::new();
    assert!(!future.is_settled());
    assert!(future.try_get().is_none());
  }

  #[test]
  fn first_resolution_wins() {
    let future: ChunkFuture<u32> = ChunkFuture::new();
    assert!(future.resolve(Ok(Arc::new(1))));
    assert!(!future.resolve(Ok(Arc::new(2))));
    assert!(!future.resolve(Err(PipelineError::ShutDown)));

    let result = future.wait().unwrap();
    assert_eq!(*result, 1);
  }

  #[test]
  fn clones_observe_the_same_value() {
    let future: ChunkFuture<u32> = ChunkFuture::new();
    let other = future.clone();
    future.resolve(Err(PipelineError::Cancelled {
      position: ChunkPos::new(0, 0, 0),
    }));

    assert_eq!(future.wait(), other.wait());
  }

  #[test]
  fn wait_blocks_until_resolved_from_another_thread() {
    let future: ChunkFuture<u32> = ChunkFuture::new();
    let resolver = future.clone();

    let handle = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(10));
      resolver.resolve(Ok(Arc::new(7)));
    });

    let result = future.wait().unwrap();
    assert_eq!(*result, 7);
    handle.join().unwrap();
  }

  #[test]
  fn wait_timeout_expires_when_unresolved() {
    let future: ChunkFuture<u32> = ChunkFuture::new();
    assert!(future.wait_timeout(Duration::from_millis(10)).is_none());
  }
}
