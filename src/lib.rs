//! chunk_pipeline - concurrent chunk stage scheduling
//!
//! Drives every requested chunk coordinate through a fixed, ordered list of
//! generation stages (terrain, lighting, decoration, ...) on a shared worker
//! pool. A stage may gate itself on neighboring chunks' progress; unready or
//! contended chunks are requeued rather than blocked on. Completion is
//! reported through a one-shot, thread-safe future per coordinate.
//!
//! ```text
//!                        CHUNK PROCESSING PIPELINE
//!                        =========================
//!
//!  request(pos) ──► entry table ──► work queue (FIFO) ──► workers (N)
//!                 (pos → entry,       coordinates          per dequeue:
//!                  one-shot future)   ready for progress   try-lock entry
//!                                         ▲                check readiness
//!                                         │                run stage task
//!                                         └── requeue ◄── Advance / Requeue
//!                                                          │
//!                               future resolves ◄── last stage committed
//!                                                    (or Fail / Cancelled)
//! ```
//!
//! Strict per-chunk stage ordering; no ordering across distinct chunks.
//! Stage work is CPU-bound and runs to completion on its worker.
//!
//! # Example
//!
//! ```ignore
//! use chunk_pipeline::{neighbors_at_least, ChunkPipeline, ChunkPos, StageDesc, TaskOutcome};
//!
//! let stages = vec![
//!   StageDesc::from_fn("terrain", |pos, _prev| TaskOutcome::Advance(generate_terrain(pos))),
//!   StageDesc::with_readiness("lighting", neighbors_at_least(0), make_lighting_task),
//! ];
//!
//! let pipeline = ChunkPipeline::new(stages);
//! let chunk = pipeline.request(ChunkPos::new(0, 0, 0)).wait()?;
//! ```

pub mod error;
pub mod future;
pub mod pipeline;
pub mod position;
pub mod stage;

mod entry;
mod scheduler;
mod table;

pub use entry::STAGE_NONE;
pub use error::PipelineError;
pub use future::{ChunkFuture, ChunkResult};
pub use pipeline::{ChunkPipeline, PipelineConfig};
pub use position::{ChunkPos, FACE_OFFSETS};
pub use stage::{neighbors_at_least, ChunkTask, FnTask, StageDesc, TaskOutcome};
pub use table::{NeighborView, TopologyFn};
