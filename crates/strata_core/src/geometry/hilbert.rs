//! One-way spatial index: 4D Hilbert curve over quantized S³ coordinates.
//!
//! # Responsibility
//! - Quantize a coordinate into a fixed-width, locality-preserving key.
//! - Translate a query ball into a small set of contiguous key ranges.
//!
//! # Invariants
//! - Keys use `AXIS_BITS` bits per axis (60 bits total) and always fit in a
//!   non-negative `i64` column.
//! - A key decodes to its cell only, never to the exact coordinate.
//! - Every aligned block of `16^k` keys covers one aligned sub-cube of side
//!   `2^k` cells, which is what range decomposition relies on.

use super::sphere::SphereCoord;
use serde::{Deserialize, Serialize};

/// Quantization depth per axis.
pub const AXIS_BITS: u32 = 15;
pub const DIMENSIONS: usize = 4;
/// Total key width.
pub const INDEX_BITS: u32 = AXIS_BITS * DIMENSIONS as u32;

const AXIS_CELLS: u32 = 1 << AXIS_BITS;
/// Largest valid key.
pub const MAX_INDEX: u64 = (1u64 << INDEX_BITS) - 1;

/// Hilbert key of a quantized S³ coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpatialIndex(u64);

impl SpatialIndex {
    /// Quantizes a coordinate. Components are clamped to `[-1, 1]`.
    pub fn from_coord(coord: &SphereCoord) -> Self {
        let components = coord.components();
        let mut axes = [0u32; DIMENSIONS];
        for (axis, value) in axes.iter_mut().zip(components) {
            *axis = quantize(value);
        }
        Self(encode_axes(axes))
    }

    /// Wraps a raw key read from storage. Returns `None` when out of range.
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw <= MAX_INDEX).then_some(Self(raw))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Storage form; keys never exceed `2^60 - 1`.
    pub fn to_sql_value(&self) -> i64 {
        self.0 as i64
    }

    /// Approximate region addressed by this key.
    pub fn decode_cell(&self) -> IndexCell {
        let axes = decode_axes(self.0);
        let width = leaf_cell_width();
        let mut center = [0.0_f64; DIMENSIONS];
        for (value, axis) in center.iter_mut().zip(axes) {
            *value = -1.0 + (f64::from(axis) + 0.5) * width;
        }
        IndexCell {
            center: SphereCoord::from_components(center),
            half_width: width / 2.0,
        }
    }
}

/// Axis-aligned cell recovered from a key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexCell {
    /// Cell center in R⁴ (not projected onto the sphere).
    pub center: SphereCoord,
    /// Half of the cell side length, per axis.
    pub half_width: f64,
}

impl IndexCell {
    pub fn contains(&self, coord: &SphereCoord) -> bool {
        self.center
            .components()
            .iter()
            .zip(coord.components())
            .all(|(center, value)| (value - center).abs() <= self.half_width + f64::EPSILON)
    }
}

/// Inclusive key range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexRange {
    pub start: u64,
    pub end: u64,
}

impl IndexRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: SpatialIndex) -> bool {
        (self.start..=self.end).contains(&index.0)
    }

    /// Number of keys covered; saturates at `u64::MAX` for the full key space.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (self.end - self.start).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Limits for [`ranges_for_ball`].
#[derive(Debug, Clone, Copy)]
pub struct DecompositionLimits {
    /// Deepest curve level that is subdivided (1..=AXIS_BITS).
    pub max_depth: u32,
    /// Upper bound on returned ranges; extra ranges are bridged.
    pub max_ranges: usize,
}

/// Covers every key whose cell may intersect the ball `(center, radius)`.
///
/// The result is sorted, non-overlapping and over-approximate: callers must
/// filter candidates by true distance.
pub fn ranges_for_ball(
    center: &SphereCoord,
    radius: f64,
    limits: DecompositionLimits,
) -> Vec<IndexRange> {
    if !radius.is_finite() || radius < 0.0 || !center.is_finite() {
        return Vec::new();
    }

    let mut lo = [0u32; DIMENSIONS];
    let mut hi = [0u32; DIMENSIONS];
    for (axis, value) in center.components().iter().enumerate() {
        lo[axis] = quantize(value - radius);
        hi[axis] = quantize(value + radius);
    }

    // Stop subdividing once cells are about half the query width.
    let query_width = (2.0 * radius).clamp(leaf_cell_width(), 2.0);
    let natural_depth = (4.0 / query_width).log2().ceil().max(1.0) as u32;
    let depth = natural_depth
        .min(limits.max_depth.clamp(1, AXIS_BITS))
        .min(AXIS_BITS);

    let mut ranges = Vec::new();
    collect_ranges(0, 0, depth, &lo, &hi, &mut ranges);
    let merged = merge_adjacent(ranges);
    bridge_to_limit(merged, limits.max_ranges.max(1))
}

fn collect_ranges(
    level: u32,
    prefix: u64,
    max_level: u32,
    lo: &[u32; DIMENSIONS],
    hi: &[u32; DIMENSIONS],
    out: &mut Vec<IndexRange>,
) {
    let shift = AXIS_BITS - level;
    let block_bits = shift * DIMENSIONS as u32;
    let start = prefix << block_bits;
    let end = start + ((1u64 << block_bits) - 1);

    let side_mask = !((1u32 << shift) - 1);
    let origin = decode_axes(start);
    let mut contained = true;
    for axis in 0..DIMENSIONS {
        let cell_lo = origin[axis] & side_mask;
        let cell_hi = cell_lo + ((1u32 << shift) - 1);
        if cell_hi < lo[axis] || cell_lo > hi[axis] {
            return;
        }
        if cell_lo < lo[axis] || cell_hi > hi[axis] {
            contained = false;
        }
    }

    if contained || level >= max_level {
        out.push(IndexRange::new(start, end));
        return;
    }

    for child in 0..(1u64 << DIMENSIONS) {
        collect_ranges(level + 1, (prefix << DIMENSIONS) | child, max_level, lo, hi, out);
    }
}

fn merge_adjacent(mut ranges: Vec<IndexRange>) -> Vec<IndexRange> {
    ranges.sort();
    let mut merged: Vec<IndexRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Bridges the smallest holes until at most `max_ranges` ranges remain.
fn bridge_to_limit(ranges: Vec<IndexRange>, max_ranges: usize) -> Vec<IndexRange> {
    if ranges.len() <= max_ranges {
        return ranges;
    }

    let mut holes: Vec<(u64, usize)> = ranges
        .windows(2)
        .enumerate()
        .map(|(index, pair)| (pair[1].start - pair[0].end, index))
        .collect();
    holes.sort();
    let mut bridged = vec![false; ranges.len()];
    for (_, index) in holes.into_iter().take(ranges.len() - max_ranges) {
        bridged[index] = true;
    }

    let mut out: Vec<IndexRange> = Vec::with_capacity(max_ranges);
    let mut current = ranges[0];
    for (index, next) in ranges.iter().enumerate().skip(1) {
        if bridged[index - 1] {
            current.end = next.end;
        } else {
            out.push(current);
            current = *next;
        }
    }
    out.push(current);
    out
}

fn leaf_cell_width() -> f64 {
    2.0 / f64::from(AXIS_CELLS)
}

fn quantize(component: f64) -> u32 {
    let scaled = ((component + 1.0) * 0.5 * f64::from(AXIS_CELLS)).floor();
    scaled.clamp(0.0, f64::from(AXIS_CELLS - 1)) as u32
}

/// Hilbert key for quantized axes (Skilling's transpose algorithm).
pub fn encode_axes(mut axes: [u32; DIMENSIONS]) -> u64 {
    axes_to_transpose(&mut axes);
    let mut index = 0u64;
    for bit in (0..AXIS_BITS).rev() {
        for axis in axes {
            index = (index << 1) | u64::from((axis >> bit) & 1);
        }
    }
    index
}

/// Quantized axes addressed by a Hilbert key.
pub fn decode_axes(index: u64) -> [u32; DIMENSIONS] {
    let mut axes = [0u32; DIMENSIONS];
    for bit in (0..AXIS_BITS).rev() {
        for (position, axis) in axes.iter_mut().enumerate() {
            let source = bit * DIMENSIONS as u32 + (DIMENSIONS - 1 - position) as u32;
            *axis |= (((index >> source) & 1) as u32) << bit;
        }
    }
    transpose_to_axes(&mut axes);
    axes
}

fn axes_to_transpose(x: &mut [u32; DIMENSIONS]) {
    let top = 1u32 << (AXIS_BITS - 1);

    let mut q = top;
    while q > 1 {
        let p = q - 1;
        for i in 0..DIMENSIONS {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    for i in 1..DIMENSIONS {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    let mut q = top;
    while q > 1 {
        if x[DIMENSIONS - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for value in x.iter_mut() {
        *value ^= t;
    }
}

fn transpose_to_axes(x: &mut [u32; DIMENSIONS]) {
    let limit = 2u32 << (AXIS_BITS - 1);

    let t = x[DIMENSIONS - 1] >> 1;
    for i in (1..DIMENSIONS).rev() {
        x[i] ^= x[i - 1];
    }
    x[0] ^= t;

    let mut q = 2u32;
    while q != limit {
        let p = q - 1;
        for i in (0..DIMENSIONS).rev() {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q <<= 1;
    }
}
