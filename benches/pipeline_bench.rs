//! Pipeline throughput benchmarks.
//!
//! Measures end-to-end scheduling cost: request a grid of chunks through a
//! short stage list and wait for every future. Stage work is trivial, so
//! the numbers reflect queueing, locking and requeue overhead rather than
//! generation math.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use chunk_pipeline::{
  neighbors_at_least, ChunkPipeline, ChunkPos, FnTask, PipelineConfig, StageDesc, TaskOutcome,
  TopologyFn,
};

const GRID_SIDE: i32 = 8;

/// Payload: per-stage accumulator.
struct Chunk {
  steps: u32,
}

fn trivial_stage(name: &'static str) -> StageDesc<Chunk> {
  StageDesc::from_fn(name, |_pos, prev: Option<&Chunk>| {
    TaskOutcome::Advance(Chunk {
      steps: prev.map_or(1, |c| c.steps + 1),
    })
  })
}

fn grid() -> Vec<ChunkPos> {
  let mut coords = Vec::new();
  for x in 0..GRID_SIDE {
    for z in 0..GRID_SIDE {
      coords.push(ChunkPos::new(x, 0, z));
    }
  }
  coords
}

fn in_grid(pos: ChunkPos) -> bool {
  pos.0.y == 0 && (0..GRID_SIDE).contains(&pos.0.x) && (0..GRID_SIDE).contains(&pos.0.z)
}

/// Neighbors clipped to the requested grid, so edge chunks don't wait on
/// coordinates nobody will ever request.
fn grid_topology() -> TopologyFn {
  Arc::new(|pos, _stage| {
    pos
      .face_neighbors()
      .into_iter()
      .filter(|&n| in_grid(n))
      .collect()
  })
}

fn run_to_completion(config: PipelineConfig, stages: Vec<StageDesc<Chunk>>, coords: &[ChunkPos]) {
  let pipeline = ChunkPipeline::with_config(stages, config);

  let futures: Vec<_> = coords.iter().map(|&pos| pipeline.request(pos)).collect();
  for future in futures {
    future
      .wait_timeout(Duration::from_secs(30))
      .expect("bench pipeline stalled")
      .expect("bench stage failed");
  }
}

fn bench_always_ready(c: &mut Criterion) {
  let coords = grid();
  let mut group = c.benchmark_group("always_ready_3_stages_64_chunks");

  for workers in [1usize, 4, 8] {
    group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
      b.iter(|| {
        let stages = vec![
          trivial_stage("terrain"),
          trivial_stage("lighting"),
          trivial_stage("decoration"),
        ];
        let config = PipelineConfig {
          workers,
          ..PipelineConfig::default()
        };
        run_to_completion(config, stages, &coords);
      });
    });
  }
  group.finish();
}

fn bench_neighbor_gated(c: &mut Criterion) {
  let coords = grid();

  c.bench_function("neighbor_gated_2_stages_64_chunks", |b| {
    b.iter(|| {
      let stages = vec![
        trivial_stage("terrain"),
        StageDesc::with_readiness("lighting", neighbors_at_least(0), |pos| {
          Box::new(FnTask::new(pos, |_pos, prev: Option<&Chunk>| {
            TaskOutcome::Advance(Chunk {
              steps: prev.map_or(1, |c| c.steps + 1),
            })
          }))
        }),
      ];
      let config = PipelineConfig {
        workers: 8,
        topology: grid_topology(),
        ..PipelineConfig::default()
      };
      run_to_completion(config, stages, &coords);
    });
  });
}

criterion_group!(benches, bench_always_ready, bench_neighbor_gated);
criterion_main!(benches);
