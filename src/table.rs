//! Coordinate → entry table and the neighbor progress view.
//!
//! The table is the only structure besides entry fields that workers mutate
//! concurrently; DashMap gives sharded insert/remove/lookup so table
//! contention stays decoupled from per-chunk work contention. Per-entry
//! locks live inside the entries and are reclaimed with them.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::SmallVec;

use crate::entry::ChunkEntry;
use crate::position::ChunkPos;

/// Topology function: the neighbors `pos` requires for the stage at
/// `stage_index`. Supplied by the world/terrain module.
pub type TopologyFn = Arc<dyn Fn(ChunkPos, usize) -> SmallVec<[ChunkPos; 6]> + Send + Sync>;

pub(crate) struct EntryTable<P: 'static> {
  entries: DashMap<ChunkPos, Arc<ChunkEntry<P>>>,
}

impl<P> EntryTable<P> {
  pub(crate) fn new() -> Self {
    Self {
      entries: DashMap::new(),
    }
  }

  /// Existing entry for `pos`, or a freshly inserted one. The flag reports
  /// whether this call created it; racing callers observe exactly one entry.
  pub(crate) fn get_or_insert(&self, pos: ChunkPos) -> (Arc<ChunkEntry<P>>, bool) {
    match self.entries.entry(pos) {
      Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
      Entry::Vacant(vacant) => {
        let entry = Arc::new(ChunkEntry::new(pos));
        vacant.insert(Arc::clone(&entry));
        (entry, true)
      }
    }
  }

  pub(crate) fn get(&self, pos: ChunkPos) -> Option<Arc<ChunkEntry<P>>> {
    self.entries.get(&pos).map(|r| Arc::clone(r.value()))
  }

  pub(crate) fn remove(&self, pos: ChunkPos) {
    self.entries.remove(&pos);
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  /// Take every live entry out of the table (shutdown path).
  pub(crate) fn drain(&self) -> Vec<Arc<ChunkEntry<P>>> {
    let all: Vec<_> = self
      .entries
      .iter()
      .map(|r| Arc::clone(r.value()))
      .collect();
    self.entries.clear();
    all
  }
}

/// Read-only view of neighbor progress, handed to readiness predicates.
///
/// Advisory, not transactional: each neighbor's stage index is sampled
/// atomically without taking its lock. Stage indices only increase, so a
/// satisfied threshold stays satisfied.
pub struct NeighborView<'a, P: 'static> {
  table: &'a EntryTable<P>,
  topology: &'a TopologyFn,
  stage_index: usize,
}

impl<'a, P> NeighborView<'a, P> {
  pub(crate) fn new(table: &'a EntryTable<P>, topology: &'a TopologyFn, stage_index: usize) -> Self {
    Self {
      table,
      topology,
      stage_index,
    }
  }

  /// Index of the stage whose readiness is being evaluated.
  pub fn stage_index(&self) -> usize {
    self.stage_index
  }

  /// Last committed stage for `pos`, if it has an entry.
  /// [`crate::STAGE_NONE`] before the first commit.
  pub fn stage_of(&self, pos: ChunkPos) -> Option<i32> {
    self.table.get(pos).map(|e| e.stage_index())
  }

  /// Required neighbors of `pos` for the stage under evaluation.
  pub fn required_neighbors(&self, pos: ChunkPos) -> SmallVec<[ChunkPos; 6]> {
    (self.topology)(pos, self.stage_index)
  }

  /// True when every required neighbor has an entry whose stage index is at
  /// least `threshold`.
  pub fn neighbors_at_least(&self, pos: ChunkPos, threshold: i32) -> bool {
    self
      .required_neighbors(pos)
      .iter()
      .all(|n| self.stage_of(*n).is_some_and(|stage| stage >= threshold))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entry::STAGE_NONE;
  use smallvec::smallvec;

  fn face_topology() -> TopologyFn {
    Arc::new(|pos, _stage| pos.face_neighbors())
  }

  #[test]
  fn get_or_insert_is_idempotent() {
    let table: EntryTable<u32> = EntryTable::new();
    let pos = ChunkPos::new(0, 0, 0);

    let (first, created) = table.get_or_insert(pos);
    assert!(created);
    let (second, created) = table.get_or_insert(pos);
    assert!(!created);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(table.len(), 1);
  }

  #[test]
  fn neighbor_view_samples_stage_indices() {
    let table: EntryTable<u32> = EntryTable::new();
    let topology = face_topology();
    let pos = ChunkPos::new(0, 0, 0);
    let neighbor = ChunkPos::new(1, 0, 0);

    let view = NeighborView::new(&table, &topology, 1);
    assert_eq!(view.stage_of(neighbor), None);
    assert!(!view.neighbors_at_least(pos, 0));

    let (entry, _) = table.get_or_insert(neighbor);
    assert_eq!(view.stage_of(neighbor), Some(STAGE_NONE));

    let mut state = entry.try_lock().unwrap();
    entry.advance(&mut state, 5);
    assert_eq!(view.stage_of(neighbor), Some(0));
  }

  #[test]
  fn neighbors_at_least_requires_all_neighbors() {
    let table: EntryTable<u32> = EntryTable::new();
    let topology: TopologyFn = {
      let a = ChunkPos::new(1, 0, 0);
      let b = ChunkPos::new(-1, 0, 0);
      Arc::new(move |_pos, _stage| smallvec![a, b])
    };
    let pos = ChunkPos::new(0, 0, 0);
    let view = NeighborView::new(&table, &topology, 0);

    for neighbor in [ChunkPos::new(1, 0, 0), ChunkPos::new(-1, 0, 0)] {
      assert!(!view.neighbors_at_least(pos, 0));
      let (entry, _) = table.get_or_insert(neighbor);
      let mut state = entry.try_lock().unwrap();
      entry.advance(&mut state, 1);
    }
    assert!(view.neighbors_at_least(pos, 0));
    assert!(!view.neighbors_at_least(pos, 1));
  }
}
