//! Worker loop: the per-dequeue scheduling step.
//!
//! A fixed number of workers pull coordinates from one shared FIFO and
//! drive each chunk's entry through the stage list. Every step is
//! synchronous; a task runs to completion on the worker that dequeued it.
//!
//! ```text
//!   dequeue ─► try-lock ─► settled/cancelled? ─► stages left? ─► ready?
//!                 │ busy          │ resolve          │ resolve      │ no: requeue (backoff)
//!                 ▼               ▼ + remove         ▼ Ok(payload)  ▼ yes: run task
//!              requeue                                        Advance | Requeue | Fail
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::entry::ChunkEntry;
use crate::error::PipelineError;
use crate::position::ChunkPos;
use crate::stage::{StageDesc, TaskOutcome};
use crate::table::{EntryTable, NeighborView, TopologyFn};

/// State shared between the pipeline façade and its workers.
pub(crate) struct Shared<P: 'static> {
  pub(crate) stages: Arc<[StageDesc<P>]>,
  pub(crate) table: EntryTable<P>,
  pub(crate) topology: TopologyFn,
  /// Work queue sender. Taken at shutdown so the channel closes and blocked
  /// workers wake up.
  queue: Mutex<Option<Sender<ChunkPos>>>,
  pub(crate) shutting_down: AtomicBool,
  backoff: Duration,
}

impl<P> Shared<P> {
  pub(crate) fn new(
    stages: Arc<[StageDesc<P>]>,
    topology: TopologyFn,
    queue: Sender<ChunkPos>,
    backoff: Duration,
  ) -> Self {
    Self {
      stages,
      table: EntryTable::new(),
      topology,
      queue: Mutex::new(Some(queue)),
      shutting_down: AtomicBool::new(false),
      backoff,
    }
  }

  /// Put a coordinate at the queue tail. Returns false once the queue is
  /// closed for shutdown.
  pub(crate) fn enqueue(&self, pos: ChunkPos) -> bool {
    match self.queue.lock().as_ref() {
      Some(tx) => tx.send(pos).is_ok(),
      None => false,
    }
  }

  pub(crate) fn close_queue(&self) {
    self.queue.lock().take();
  }

  /// Requeue after unmet readiness or a task-requested retry. Pauses only
  /// when nothing else is waiting, so a queue of blocked chunks doesn't
  /// spin the pool.
  fn requeue_backoff(&self, pos: ChunkPos) {
    let pause = {
      let queue = self.queue.lock();
      let Some(tx) = queue.as_ref() else { return };
      let idle = tx.is_empty();
      let _ = tx.send(pos);
      idle
    };
    if pause {
      std::thread::sleep(self.backoff);
    }
  }
}

/// Body of one worker thread.
pub(crate) fn worker_loop<P>(shared: Arc<Shared<P>>, rx: Receiver<ChunkPos>) {
  for pos in rx.iter() {
    if shared.shutting_down.load(Ordering::Acquire) {
      break;
    }
    step(&shared, pos);
  }
  trace!("pipeline worker exiting");
}

/// Process one dequeued coordinate.
fn step<P>(shared: &Shared<P>, pos: ChunkPos) {
  // Entry may have been removed by a terminal resolution on another worker.
  let Some(entry) = shared.table.get(pos) else {
    return;
  };

  // Busy chunk: push to the tail and take the next item instead of
  // blocking. Backs off when the queue holds nothing else, so workers
  // don't spin on a single long-running chunk.
  let Some(mut state) = entry.try_lock() else {
    trace!(%pos, "entry busy, requeueing");
    shared.requeue_backoff(pos);
    return;
  };

  // Settled entries stay cached in the table (their stage index keeps
  // answering neighbor readiness checks); stale queue slots drop here.
  // A cancel flag on a settled entry means invalidation lost the race
  // against final resolution; its queue slot finishes the eviction.
  if entry.future().is_settled() {
    if entry.is_cancelled() {
      debug!(%pos, "evicting cancelled chunk");
      shared.table.remove(pos);
    }
    return;
  }
  if entry.is_cancelled() {
    settle_cancelled(shared, &entry);
    return;
  }

  // Stage list exhausted: hand the payload to the future. Requests reject
  // empty stage lists and every commit stores a payload, so one is present.
  if !entry.has_more_stages(shared.stages.len()) {
    debug_assert!(state.payload.is_some(), "exhausted entry has no payload");
    if let Some(payload) = state.payload.clone() {
      entry.future().resolve(Ok(payload));
      debug!(%pos, "chunk completed");
    }
    return;
  }

  let stage_index = (entry.stage_index() + 1) as usize;
  let stage = &shared.stages[stage_index];

  let view = NeighborView::new(&shared.table, &shared.topology, stage_index);
  if !stage.is_ready(pos, &view) {
    trace!(%pos, stage = stage.name(), "stage not ready, requeueing");
    drop(state);
    shared.requeue_backoff(pos);
    return;
  }

  // Reuse the outstanding task across requeues; create it on first need.
  let mut task = match state.task.take() {
    Some(task) => task,
    None => {
      let task = stage.create_task(pos);
      if task.position() != pos {
        warn!(%pos, actual = %task.position(), stage = stage.name(), "task factory returned a task for the wrong chunk");
        entry.future().resolve(Err(PipelineError::TaskPositionMismatch {
          expected: pos,
          actual: task.position(),
        }));
        shared.table.remove(pos);
        return;
      }
      task
    }
  };

  // A panicking task must not corrupt other chunks' processing; contain it
  // as a stage failure for this chunk.
  let outcome = match catch_unwind(AssertUnwindSafe(|| task.run(state.payload.as_deref()))) {
    Ok(outcome) => outcome,
    Err(panic) => TaskOutcome::Fail(panic_message(&*panic)),
  };

  // Invalidated while the task ran: the outcome is discarded.
  if entry.is_cancelled() {
    settle_cancelled(shared, &entry);
    return;
  }

  match outcome {
    TaskOutcome::Advance(payload) => {
      entry.advance(&mut state, payload);
      trace!(%pos, stage = stage.name(), "stage committed");
      drop(state);
      shared.enqueue(pos);
    }
    TaskOutcome::Requeue(reason) => {
      trace!(%pos, stage = stage.name(), reason, "task requeued");
      state.task = Some(task);
      drop(state);
      shared.requeue_backoff(pos);
    }
    TaskOutcome::Fail(message) => {
      debug!(%pos, stage = stage.name(), %message, "stage failed");
      entry.future().resolve(Err(PipelineError::StageFailed {
        stage: stage.name(),
        position: pos,
        message,
      }));
      shared.table.remove(pos);
    }
  }
}

fn settle_cancelled<P>(shared: &Shared<P>, entry: &ChunkEntry<P>) {
  let pos = entry.position();
  entry.future().resolve(Err(PipelineError::Cancelled { position: pos }));
  debug!(%pos, "chunk cancelled");
  shared.table.remove(pos);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    format!("task panicked: {message}")
  } else if let Some(message) = panic.downcast_ref::<String>() {
    format!("task panicked: {message}")
  } else {
    "task panicked".to_string()
  }
}
