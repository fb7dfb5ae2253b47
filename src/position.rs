//! Chunk coordinates and neighbor topology.

use std::fmt;

use glam::IVec3;
use smallvec::SmallVec;

/// Unit offsets to the six face-adjacent neighbors.
pub const FACE_OFFSETS: [IVec3; 6] = [
  IVec3::new(1, 0, 0),
  IVec3::new(-1, 0, 0),
  IVec3::new(0, 1, 0),
  IVec3::new(0, -1, 0),
  IVec3::new(0, 0, 1),
  IVec3::new(0, 0, -1),
];

/// Integer coordinate identifying one chunk.
///
/// Sole key for entries, locks and neighbor lookups. Value equality and
/// hashing only; no ordering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ChunkPos(pub IVec3);

impl ChunkPos {
  pub const fn new(x: i32, y: i32, z: i32) -> Self {
    Self(IVec3::new(x, y, z))
  }

  /// The six face-adjacent coordinates.
  pub fn face_neighbors(&self) -> SmallVec<[ChunkPos; 6]> {
    FACE_OFFSETS.iter().map(|o| Self(self.0 + *o)).collect()
  }
}

impl From<IVec3> for ChunkPos {
  fn from(v: IVec3) -> Self {
    Self(v)
  }
}

impl fmt::Display for ChunkPos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
  }
}
