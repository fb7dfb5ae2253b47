//! Pipeline façade: stage registration, requests, invalidation, shutdown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::PipelineError;
use crate::future::ChunkFuture;
use crate::position::ChunkPos;
use crate::scheduler::{worker_loop, Shared};
use crate::stage::StageDesc;
use crate::table::TopologyFn;

/// Pipeline construction parameters.
#[derive(Clone)]
pub struct PipelineConfig {
  /// Worker thread count; 0 means one per logical CPU.
  pub workers: usize,

  /// Pause before an unready chunk comes around again, applied only when
  /// the queue is otherwise empty.
  pub backoff: Duration,

  /// Required neighbors per coordinate and stage. Defaults to the six face
  /// neighbors for every stage.
  pub topology: TopologyFn,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      workers: 0,
      backoff: Duration::from_micros(200),
      topology: Arc::new(|pos, _stage| pos.face_neighbors()),
    }
  }
}

/// Concurrent chunk processing pipeline.
///
/// Drives every requested coordinate through a fixed, ordered stage list on
/// a shared worker pool and reports completion through a one-shot
/// [`ChunkFuture`]. The stage list is immutable once the pipeline exists.
pub struct ChunkPipeline<P: 'static> {
  shared: Arc<Shared<P>>,
  /// Dropped at shutdown; rayon winds the threads down once the worker
  /// loops return.
  pool: Mutex<Option<rayon::ThreadPool>>,
  workers: usize,
}

impl<P: Send + Sync + 'static> ChunkPipeline<P> {
  /// Build a pipeline with default configuration.
  pub fn new(stages: Vec<StageDesc<P>>) -> Self {
    Self::with_config(stages, PipelineConfig::default())
  }

  /// Build a pipeline with explicit configuration and start its workers.
  pub fn with_config(stages: Vec<StageDesc<P>>, config: PipelineConfig) -> Self {
    let workers = if config.workers == 0 {
      num_cpus::get().max(1)
    } else {
      config.workers
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(Shared::new(
      stages.into(),
      config.topology,
      tx,
      config.backoff,
    ));

    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(workers)
      .thread_name(|i| format!("chunk-worker-{i}"))
      .build()
      .expect("failed to build chunk worker pool");

    for _ in 0..workers {
      let shared = Arc::clone(&shared);
      let rx = rx.clone();
      pool.spawn(move || worker_loop(shared, rx));
    }

    debug!(workers, stages = shared.stages.len(), "pipeline started");
    Self {
      shared,
      pool: Mutex::new(Some(pool)),
      workers,
    }
  }

  /// Request processing of `pos`.
  ///
  /// Idempotent while the chunk is pending or resolved-and-cached:
  /// concurrent requests for the same coordinate observe one entry and one
  /// eventual resolution. Completed chunks stay cached (their progress
  /// keeps answering neighbor readiness checks) until [`Self::invalidate`]
  /// evicts them; after a failure or invalidation a new request starts
  /// fresh.
  pub fn request(&self, pos: ChunkPos) -> ChunkFuture<P> {
    if self.shared.shutting_down.load(Ordering::Acquire) {
      return ChunkFuture::resolved(Err(PipelineError::ShutDown));
    }
    if self.shared.stages.is_empty() {
      return ChunkFuture::resolved(Err(PipelineError::NoStages));
    }

    let (entry, created) = self.shared.table.get_or_insert(pos);
    if created {
      debug!(%pos, "chunk requested");
      if !self.shared.enqueue(pos) {
        // Lost the race against shutdown.
        entry.future().resolve(Err(PipelineError::ShutDown));
        self.shared.table.remove(pos);
      }
    }
    entry.future().clone()
  }

  /// Discard work for `pos`: evict a completed chunk, or cancel a pending
  /// one.
  ///
  /// Cooperative: a worker currently running this chunk's task finishes it,
  /// but the outcome is discarded and the future resolves cancelled.
  pub fn invalidate(&self, pos: ChunkPos) {
    if let Some(entry) = self.shared.table.get(pos) {
      debug!(%pos, "chunk invalidated");
      if entry.future().is_settled() {
        self.shared.table.remove(pos);
        return;
      }
      entry.cancel();
      // Extra queue slot so a worker comes around to settle it promptly.
      self.shared.enqueue(pos);
    }
  }
}

impl<P> ChunkPipeline<P> {
  /// Stop accepting requests, let in-flight tasks drain, release the
  /// workers and resolve every pending future as cancelled. Idempotent;
  /// also runs on drop.
  pub fn shutdown(&self) {
    if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
      return;
    }
    debug!("pipeline shutting down");

    self.shared.close_queue();
    drop(self.pool.lock().take());

    for entry in self.shared.table.drain() {
      entry.cancel();
      entry.future().resolve(Err(PipelineError::Cancelled {
        position: entry.position(),
      }));
    }
  }

  /// Last committed stage index for `pos`, if it is in flight.
  /// [`crate::STAGE_NONE`] before the first stage commits.
  pub fn stage_of(&self, pos: ChunkPos) -> Option<i32> {
    self.shared.table.get(pos).map(|e| e.stage_index())
  }

  /// Whether `pos` has an unsettled entry.
  pub fn is_in_flight(&self, pos: ChunkPos) -> bool {
    self
      .shared
      .table
      .get(pos)
      .is_some_and(|e| !e.future().is_settled())
  }

  /// Number of tracked chunks, including completed-and-cached ones.
  pub fn tracked_count(&self) -> usize {
    self.shared.table.len()
  }

  /// Number of registered stages.
  pub fn stage_count(&self) -> usize {
    self.shared.stages.len()
  }

  /// Number of worker threads.
  pub fn worker_count(&self) -> usize {
    self.workers
  }
}

impl<P> Drop for ChunkPipeline<P> {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
