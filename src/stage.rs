//! Stage descriptors and chunk tasks.
//!
//! A stage is supplied by an external collaborator (terrain generator,
//! lighting pass, ...) when the pipeline is built, and is immutable after
//! that. Its readiness predicate must be side-effect free and fast; its
//! task factory may be expensive and is called from any worker.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::position::ChunkPos;
use crate::table::NeighborView;

/// Outcome of running a stage task.
pub enum TaskOutcome<P> {
  /// Stage finished; commit the new payload and move on to the next stage.
  Advance(P),

  /// Preconditions changed underfoot; run again later. The pending task is
  /// kept and re-run as-is on the next attempt.
  Requeue(&'static str),

  /// Unrecoverable stage failure; settles the chunk's future as failed.
  Fail(String),
}

/// A unit of executable work for one chunk at one stage.
///
/// Runs to completion on the worker thread; there is no suspension inside
/// the scheduling loop. Heavy stages simply occupy their worker.
pub trait ChunkTask<P>: Send {
  /// Coordinate this task was created for.
  fn position(&self) -> ChunkPos;

  /// Execute the stage work. `payload` is the output of the previous stage,
  /// `None` before the first `Advance`.
  fn run(&mut self, payload: Option<&P>) -> TaskOutcome<P>;
}

/// Closure-backed task for stages that don't need their own struct.
pub struct FnTask<P, F> {
  position: ChunkPos,
  work: F,
  _payload: PhantomData<fn() -> P>,
}

impl<P, F> FnTask<P, F>
where
  F: FnMut(ChunkPos, Option<&P>) -> TaskOutcome<P> + Send,
{
  pub fn new(position: ChunkPos, work: F) -> Self {
    Self {
      position,
      work,
      _payload: PhantomData,
    }
  }
}

impl<P, F> ChunkTask<P> for FnTask<P, F>
where
  F: FnMut(ChunkPos, Option<&P>) -> TaskOutcome<P> + Send,
{
  fn position(&self) -> ChunkPos {
    self.position
  }

  fn run(&mut self, payload: Option<&P>) -> TaskOutcome<P> {
    (self.work)(self.position, payload)
  }
}

/// Readiness predicate, evaluated against a snapshot of neighbor progress.
pub type ReadyFn<P> = Arc<dyn Fn(ChunkPos, &NeighborView<'_, P>) -> bool + Send + Sync>;

/// Factory producing the task that performs a stage's work for one chunk.
pub type TaskFactory<P> = Arc<dyn Fn(ChunkPos) -> Box<dyn ChunkTask<P>> + Send + Sync>;

/// One pipeline stage: a name, a readiness predicate and a task factory.
///
/// The pipeline's stage list is an ordered, append-only sequence of these;
/// an entry's progress is an index into that list.
pub struct StageDesc<P: 'static> {
  name: &'static str,
  ready: ReadyFn<P>,
  make_task: TaskFactory<P>,
}

impl<P> Clone for StageDesc<P> {
  fn clone(&self) -> Self {
    Self {
      name: self.name,
      ready: Arc::clone(&self.ready),
      make_task: Arc::clone(&self.make_task),
    }
  }
}

impl<P> StageDesc<P> {
  /// Stage that is always ready to run.
  pub fn new<M>(name: &'static str, make_task: M) -> Self
  where
    M: Fn(ChunkPos) -> Box<dyn ChunkTask<P>> + Send + Sync + 'static,
  {
    Self {
      name,
      ready: Arc::new(|_, _| true),
      make_task: Arc::new(make_task),
    }
  }

  /// Stage gated by a readiness predicate over neighbor progress.
  pub fn with_readiness<R, M>(name: &'static str, ready: R, make_task: M) -> Self
  where
    R: Fn(ChunkPos, &NeighborView<'_, P>) -> bool + Send + Sync + 'static,
    M: Fn(ChunkPos) -> Box<dyn ChunkTask<P>> + Send + Sync + 'static,
  {
    Self {
      name,
      ready: Arc::new(ready),
      make_task: Arc::new(make_task),
    }
  }

  /// Always-ready stage whose work is a plain function.
  ///
  /// The closure is cloned into each created task.
  pub fn from_fn<F>(name: &'static str, work: F) -> Self
  where
    F: FnMut(ChunkPos, Option<&P>) -> TaskOutcome<P> + Clone + Send + Sync + 'static,
  {
    Self::new(name, move |pos| Box::new(FnTask::new(pos, work.clone())))
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub(crate) fn is_ready(&self, pos: ChunkPos, view: &NeighborView<'_, P>) -> bool {
    (self.ready)(pos, view)
  }

  pub(crate) fn create_task(&self, pos: ChunkPos) -> Box<dyn ChunkTask<P>> {
    (self.make_task)(pos)
  }
}

/// Readiness predicate requiring every required neighbor of the chunk to
/// have committed the stage at `threshold` (see
/// [`NeighborView::neighbors_at_least`]).
pub fn neighbors_at_least<P: 'static>(
  threshold: i32,
) -> impl Fn(ChunkPos, &NeighborView<'_, P>) -> bool + Send + Sync + 'static {
  move |pos, view| view.neighbors_at_least(pos, threshold)
}
