//! Atom record: one immutable entry per alphabet symbol.

use crate::geometry::{SpatialIndex, SphereCoord};
use crate::model::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// Immutable record for one symbol of the sealed alphabet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomRecord {
    /// Alphabet code point.
    pub symbol_id: u32,
    pub content_hash: ContentHash,
    /// Lattice point on S³ chosen by hash rank.
    pub sphere_coord: SphereCoord,
    pub spatial_index: SpatialIndex,
}
