//! Per-chunk scheduling state.
//!
//! Each entry embeds its own mutex; workers acquire it with a try-lock so
//! contention on one hot chunk never stalls the pool. All mutation goes
//! through the guard, which is how lock-holder-only access is enforced.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::future::ChunkFuture;
use crate::position::ChunkPos;
use crate::stage::ChunkTask;

/// Stage index meaning "no stage has committed yet".
pub const STAGE_NONE: i32 = -1;

/// Mutable state only reachable through the entry's lock.
pub(crate) struct EntryState<P: 'static> {
  /// Output of the last committed stage; absent before the first `Advance`.
  pub(crate) payload: Option<Arc<P>>,
  /// Outstanding task, reused across requeues rather than recreated.
  pub(crate) task: Option<Box<dyn ChunkTask<P>>>,
}

/// Scheduling record for one chunk coordinate.
pub(crate) struct ChunkEntry<P: 'static> {
  position: ChunkPos,
  /// Index of the last committed stage, starting at [`STAGE_NONE`].
  /// Monotonically non-decreasing. Atomic so neighbor readiness checks can
  /// sample it without taking the entry lock.
  stage_index: AtomicI32,
  cancelled: AtomicBool,
  state: Mutex<EntryState<P>>,
  future: ChunkFuture<P>,
}

impl<P> ChunkEntry<P> {
  pub(crate) fn new(position: ChunkPos) -> Self {
    Self {
      position,
      stage_index: AtomicI32::new(STAGE_NONE),
      cancelled: AtomicBool::new(false),
      state: Mutex::new(EntryState {
        payload: None,
        task: None,
      }),
      future: ChunkFuture::new(),
    }
  }

  pub(crate) fn position(&self) -> ChunkPos {
    self.position
  }

  pub(crate) fn stage_index(&self) -> i32 {
    self.stage_index.load(Ordering::Acquire)
  }

  /// Whether any stage remains, given the length of the stage list.
  pub(crate) fn has_more_stages(&self, stage_count: usize) -> bool {
    self.stage_index() + 1 < stage_count as i32
  }

  pub(crate) fn cancel(&self) {
    self.cancelled.store(true, Ordering::Release);
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Acquire)
  }

  pub(crate) fn future(&self) -> &ChunkFuture<P> {
    &self.future
  }

  /// Non-blocking lock acquisition; `None` means another worker holds it.
  pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, EntryState<P>>> {
    self.state.try_lock()
  }

  /// Commit a finished stage: store the payload, clear the pending task,
  /// bump the stage index. Requires the entry lock.
  pub(crate) fn advance(&self, state: &mut EntryState<P>, payload: P) {
    state.payload = Some(Arc::new(payload));
    state.task = None;
    self.stage_index.fetch_add(1, Ordering::AcqRel);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_entry_has_no_progress() {
    let entry: ChunkEntry<u32> = ChunkEntry::new(ChunkPos::new(0, 0, 0));
    assert_eq!(entry.stage_index(), STAGE_NONE);
    assert!(!entry.is_cancelled());
    assert!(entry.has_more_stages(1));
    assert!(!entry.has_more_stages(0));
  }

  #[test]
  fn advance_bumps_stage_index() {
    let entry: ChunkEntry<u32> = ChunkEntry::new(ChunkPos::new(1, 2, 3));

    let mut state = entry.try_lock().unwrap();
    entry.advance(&mut state, 10);
    assert_eq!(entry.stage_index(), 0);
    assert_eq!(state.payload.as_deref(), Some(&10));
    assert!(state.task.is_none());

    entry.advance(&mut state, 11);
    assert_eq!(entry.stage_index(), 1);
    assert!(!entry.has_more_stages(2));
  }

  #[test]
  fn try_lock_is_exclusive() {
    let entry: ChunkEntry<u32> = ChunkEntry::new(ChunkPos::new(0, 0, 0));

    let guard = entry.try_lock();
    assert!(guard.is_some());
    assert!(entry.try_lock().is_none());

    drop(guard);
    assert!(entry.try_lock().is_some());
  }
}
