//! Geometric foundation: fixed alphabet → S³ coordinates → spatial keys.
//!
//! # Responsibility
//! - Place every atom deterministically on the unit 3-sphere.
//! - Quantize coordinates into one-way, locality-preserving Hilbert keys.
//!
//! # Invariants
//! - Pure and read-only: no function here touches storage or needs locks.
//! - Spatial keys identify cells, not coordinates.

pub mod alphabet;
pub mod hilbert;
pub mod sphere;

pub use alphabet::{
    unicode_scalar_alphabet, Alphabet, GeometryError, GeometryResult, MAX_ALPHABET_SIZE,
};
pub use hilbert::{
    ranges_for_ball, DecompositionLimits, IndexCell, IndexRange, SpatialIndex, MAX_INDEX,
};
pub use sphere::{lattice_point, spherical_mean, SphereCoord, SPHERE_DIAMETER};
