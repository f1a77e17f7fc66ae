//! Points on the unit 3-sphere and the deterministic lattice that places
//! atoms on it.
//!
//! # Invariants
//! - Every stored coordinate has unit Euclidean norm (within float error).
//! - Lattice point `i` of `n` is a pure function of `(i, n)`.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Plastic number: the 2D generalization of the golden ratio.
const PLASTIC: f64 = 1.324_717_957_244_746;
const ALPHA_1: f64 = 1.0 / PLASTIC;
const ALPHA_2: f64 = 1.0 / (PLASTIC * PLASTIC);

const NORM_EPSILON: f64 = 1e-12;

/// Maximum chordal distance between two points of S³.
pub const SPHERE_DIAMETER: f64 = 2.0;

/// A point of R⁴, normally on the unit 3-sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphereCoord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl SphereCoord {
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub const fn from_components(components: [f64; 4]) -> Self {
        Self::new(components[0], components[1], components[2], components[3])
    }

    pub fn components(&self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Chordal (straight-line) distance in R⁴.
    pub fn distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        let dw = self.w - other.w;
        (dx * dx + dy * dy + dz * dz + dw * dw).sqrt()
    }

    /// Projects onto S³. Returns `None` for (near-)zero vectors.
    pub fn normalized(&self) -> Option<Self> {
        let norm = self.norm();
        if !norm.is_finite() || norm < NORM_EPSILON {
            return None;
        }
        Some(Self::new(
            self.x / norm,
            self.y / norm,
            self.z / norm,
            self.w / norm,
        ))
    }

    pub fn is_finite(&self) -> bool {
        self.components().iter().all(|value| value.is_finite())
    }

    /// Spherical midpoint of two points, `a` when they are antipodal.
    pub fn midpoint(a: &Self, b: &Self) -> Self {
        Self::new(a.x + b.x, a.y + b.y, a.z + b.z, a.w + b.w)
            .normalized()
            .unwrap_or(*a)
    }
}

/// Spherical mean of an ordered point set, renormalized onto S³.
///
/// Falls back to the first point when the vector sum vanishes (e.g. a
/// sequence of antipodal pairs). Returns `None` for an empty set.
pub fn spherical_mean(points: &[SphereCoord]) -> Option<SphereCoord> {
    let first = points.first()?;
    let mut sum = [0.0_f64; 4];
    for point in points {
        for (acc, value) in sum.iter_mut().zip(point.components()) {
            *acc += value;
        }
    }
    Some(SphereCoord::from_components(sum).normalized().unwrap_or(*first))
}

/// Point `rank` of an `count`-point generalized Fibonacci lattice on S³.
///
/// The first parameter is stratified over `rank`, the two angles follow the
/// plastic-number Weyl sequence, and Shoemake's parametrization lifts the
/// triple onto the sphere uniformly. Distinct ranks give distinct points.
pub fn lattice_point(rank: u64, count: u64) -> SphereCoord {
    debug_assert!(rank < count);
    let index = rank as f64;
    let u1 = (index + 0.5) / count as f64;
    let u2 = (0.5 + index * ALPHA_1).fract();
    let u3 = (0.5 + index * ALPHA_2).fract();

    let outer = (1.0 - u1).sqrt();
    let inner = u1.sqrt();
    let (sin2, cos2) = (TAU * u2).sin_cos();
    let (sin3, cos3) = (TAU * u3).sin_cos();

    SphereCoord::new(outer * sin2, outer * cos2, inner * sin3, inner * cos3)
}

#[cfg(test)]
mod tests {
    use super::{lattice_point, spherical_mean, SphereCoord};

    #[test]
    fn lattice_points_are_unit_and_distinct() {
        let count = 512;
        let points: Vec<_> = (0..count).map(|rank| lattice_point(rank, count)).collect();
        for point in &points {
            assert!((point.norm() - 1.0).abs() < 1e-9);
        }
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                assert!(a.distance(b) > 1e-6);
            }
        }
    }

    #[test]
    fn lattice_spreads_over_all_orthants() {
        let count = 4096;
        let mut orthants = [0usize; 16];
        for rank in 0..count {
            let point = lattice_point(rank, count);
            let mut slot = 0;
            for (bit, value) in point.components().iter().enumerate() {
                if *value >= 0.0 {
                    slot |= 1 << bit;
                }
            }
            orthants[slot] += 1;
        }
        let expected = count as usize / 16;
        for hits in orthants {
            assert!(hits > expected / 2, "orthant underpopulated: {hits}");
            assert!(hits < expected * 2, "orthant overpopulated: {hits}");
        }
    }

    #[test]
    fn spherical_mean_of_antipodes_falls_back_to_first() {
        let a = SphereCoord::new(1.0, 0.0, 0.0, 0.0);
        let b = SphereCoord::new(-1.0, 0.0, 0.0, 0.0);
        assert_eq!(spherical_mean(&[a, b]), Some(a));
        assert_eq!(spherical_mean(&[]), None);
    }

    #[test]
    fn spherical_mean_is_normalized() {
        let a = SphereCoord::new(1.0, 0.0, 0.0, 0.0);
        let b = SphereCoord::new(0.0, 1.0, 0.0, 0.0);
        let mean = spherical_mean(&[a, b]).unwrap();
        assert!((mean.norm() - 1.0).abs() < 1e-12);
        assert!((mean.x - mean.y).abs() < 1e-12);
    }
}
