//! Interned sequence records shared by the composition and relation layers.
//!
//! # Invariants
//! - `content_hash == ContentHash::of_sequence(layer.hash_domain(), children)`.
//! - `length == children.len() == trajectory.len()` and is never zero.
//! - `centroid_coord` is the spherical mean of `trajectory`.

use crate::geometry::{SpatialIndex, SphereCoord};
use crate::model::hash::{ContentHash, HashDomain};
use serde::{Deserialize, Serialize};

/// Layer that an interned sequence lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Layer 1: ordered atoms.
    Composition,
    /// Layer 2: ordered compositions.
    Relation,
}

impl LayerKind {
    /// Maps the external layer number (`1` or `2`).
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Composition),
            2 => Some(Self::Relation),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Self::Composition => 1,
            Self::Relation => 2,
        }
    }

    pub fn hash_domain(self) -> HashDomain {
        match self {
            Self::Composition => HashDomain::Composition,
            Self::Relation => HashDomain::Relation,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Composition => "composition",
            Self::Relation => "relation",
        }
    }
}

/// Stored composition or relation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub layer: LayerKind,
    pub content_hash: ContentHash,
    pub length: usize,
    /// Number of times this exact sequence has been interned.
    pub occurrence_count: u64,
    /// Ordered child hashes (atoms or compositions).
    pub children: Vec<ContentHash>,
    pub centroid_coord: SphereCoord,
    /// Ordered child coordinates: the sequence's path through S³.
    pub trajectory: Vec<SphereCoord>,
    pub spatial_index: SpatialIndex,
    /// Epoch milliseconds of first observation.
    pub created_at: i64,
}

/// Result of one `intern` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternOutcome {
    pub content_hash: ContentHash,
    pub occurrence_count: u64,
    /// `true` when this call created the row.
    pub is_new: bool,
}

const COORD_BYTES: usize = 4 * 8;

/// Serializes a trajectory as little-endian `f64` quadruples.
pub fn encode_trajectory(points: &[SphereCoord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * COORD_BYTES);
    for point in points {
        for value in point.components() {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Inverse of [`encode_trajectory`]. Returns `None` on a truncated blob.
pub fn decode_trajectory(bytes: &[u8]) -> Option<Vec<SphereCoord>> {
    if bytes.len() % COORD_BYTES != 0 {
        return None;
    }
    let points = bytes
        .chunks_exact(COORD_BYTES)
        .map(|chunk| {
            let mut components = [0.0_f64; 4];
            for (value, raw) in components.iter_mut().zip(chunk.chunks_exact(8)) {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                *value = f64::from_le_bytes(buf);
            }
            SphereCoord::from_components(components)
        })
        .collect();
    Some(points)
}

#[cfg(test)]
mod tests {
    use super::{decode_trajectory, encode_trajectory, LayerKind};
    use crate::geometry::lattice_point;

    #[test]
    fn layer_levels_match_external_numbering() {
        assert_eq!(LayerKind::from_level(1), Some(LayerKind::Composition));
        assert_eq!(LayerKind::from_level(2), Some(LayerKind::Relation));
        assert_eq!(LayerKind::from_level(0), None);
        assert_eq!(LayerKind::from_level(3), None);
        assert_eq!(LayerKind::Relation.level(), 2);
    }

    #[test]
    fn trajectory_blob_rejects_truncation() {
        let points = vec![lattice_point(0, 3), lattice_point(2, 3)];
        let blob = encode_trajectory(&points);
        assert_eq!(decode_trajectory(&blob), Some(points));
        assert_eq!(decode_trajectory(&blob[..blob.len() - 1]), None);
    }
}
