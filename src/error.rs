//! Terminal errors reported through a chunk's future.
//!
//! Transient conditions (lock contention, unmet readiness) are handled by
//! requeueing and never appear here.

use thiserror::Error;

use crate::position::ChunkPos;

/// Terminal failure for one chunk's processing.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
  /// A stage task reported an unrecoverable failure.
  #[error("stage `{stage}` failed for chunk {position}: {message}")]
  StageFailed {
    stage: &'static str,
    position: ChunkPos,
    message: String,
  },

  /// The chunk was invalidated, or the pipeline shut down while it was
  /// still in flight.
  #[error("chunk {position} was cancelled")]
  Cancelled { position: ChunkPos },

  /// The pipeline no longer accepts requests.
  #[error("pipeline is shut down")]
  ShutDown,

  /// The pipeline was built with an empty stage list.
  #[error("pipeline has no registered stages")]
  NoStages,

  /// A stage's task factory produced a task for a different coordinate
  /// than the one dispatched. Fatal for this chunk only.
  #[error("task for chunk {expected} reported position {actual}")]
  TaskPositionMismatch {
    expected: ChunkPos,
    actual: ChunkPos,
  },
}
