//! Spatial queries over the Hilbert index of compositions and relations.
//!
//! # Responsibility
//! - Answer ball, k-nearest and index-gap queries from `spatial_index`
//!   range scans.
//! - Return typed hits ordered by true chordal distance.
//!
//! # Invariants
//! - Index ranges only prefilter candidates; every hit is checked against
//!   its stored coordinate.
//! - Queries are read-only and never fail because the store is empty.

use crate::config::SpatialConfig;
use crate::db::DbError;
use crate::geometry::{
    ranges_for_ball, DecompositionLimits, IndexRange, SpatialIndex, SphereCoord, MAX_INDEX,
    SPHERE_DIAMETER,
};
use crate::model::hash::ContentHash;
use crate::model::sequence::LayerKind;
use crate::repo::sequence_repo::layer_table;
use crate::repo::{coord_from_row, spatial_index_from_row};
use log::debug;
use rusqlite::{Connection, Row};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Result type for spatial query APIs.
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Spatial-layer error for argument checks, DB interaction and row decoding.
#[derive(Debug)]
pub enum SpatialError {
    /// Query arguments are not usable (non-finite center, negative radius).
    InvalidQuery(String),
    Db(DbError),
    InvalidData(String),
}

impl Display for SpatialError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery(message) => write!(f, "invalid spatial query: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid spatial row: {message}"),
        }
    }
}

impl Error for SpatialError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidQuery(_) => None,
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SpatialError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SpatialError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Which layers a query scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialTarget {
    Compositions,
    Relations,
    Both,
}

impl SpatialTarget {
    pub fn layers(self) -> &'static [LayerKind] {
        match self {
            Self::Compositions => &[LayerKind::Composition],
            Self::Relations => &[LayerKind::Relation],
            Self::Both => &[LayerKind::Composition, LayerKind::Relation],
        }
    }
}

/// One stored row matched by a spatial query.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialHit {
    pub layer: LayerKind,
    pub content_hash: ContentHash,
    pub coord: SphereCoord,
    pub spatial_index: SpatialIndex,
    /// Chordal distance to the query point.
    pub distance: f64,
}

/// Caller-imposed limits on iterative queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryBudget {
    /// Wall-clock point after which no new round starts.
    pub deadline: Option<Instant>,
    /// Maximum radius rounds; the configured cap applies as well.
    pub max_rounds: Option<u32>,
}

impl QueryBudget {
    /// Budget bounded only by configuration.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Result of [`nearest`].
#[derive(Debug, Clone, PartialEq)]
pub struct NearestHits {
    /// Up to `k` hits, closest first.
    pub hits: Vec<SpatialHit>,
    /// `true` when the budget ran out before the answer was proven complete.
    pub budget_exhausted: bool,
    /// Radius of the last completed round.
    pub searched_radius: f64,
}

/// Run of unoccupied keys between two stored neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGap {
    /// Missing keys, inclusive.
    pub missing: IndexRange,
    /// Normalized midpoint of the two neighbours' coordinates.
    pub midpoint: SphereCoord,
}

/// Returns every stored row within `radius` of `center`, closest first.
pub fn range_query(
    conn: &Connection,
    target: SpatialTarget,
    center: &SphereCoord,
    radius: f64,
    config: &SpatialConfig,
) -> SpatialResult<Vec<SpatialHit>> {
    if !center.is_finite() {
        return Err(SpatialError::InvalidQuery(
            "center must have finite components".to_string(),
        ));
    }
    if !radius.is_finite() || radius < 0.0 {
        return Err(SpatialError::InvalidQuery(format!(
            "radius must be finite and non-negative, got {radius}"
        )));
    }

    let limits = DecompositionLimits {
        max_depth: config.max_descent_depth,
        max_ranges: config.max_ranges,
    };
    let ranges = ranges_for_ball(center, radius, limits);
    let mut hits = Vec::new();
    let mut candidates = 0usize;
    for layer in target.layers() {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT content_hash, coord_x, coord_y, coord_z, coord_w, spatial_index
             FROM {}
             WHERE spatial_index BETWEEN ?1 AND ?2;",
            layer_table(*layer)
        ))?;
        for range in &ranges {
            let mut rows = stmt.query([range.start as i64, range.end as i64])?;
            while let Some(row) = rows.next()? {
                candidates += 1;
                let hit = parse_hit_row(*layer, row, center)?;
                if hit.distance <= radius {
                    hits.push(hit);
                }
            }
        }
    }

    hits.sort_by(compare_hits);
    debug!(
        "event=range_query module=search status=ok ranges={} candidates={} hits={}",
        ranges.len(),
        candidates,
        hits.len()
    );
    Ok(hits)
}

/// Finds the `k` closest rows by growing a ball from the configured radius.
///
/// Each round doubles the radius until `k` hits exist or the ball covers the
/// whole sphere. Hits inside a completed ball are exact, so once `k` are found
/// they are the true nearest neighbours.
pub fn nearest(
    conn: &Connection,
    target: SpatialTarget,
    coord: &SphereCoord,
    k: usize,
    budget: &QueryBudget,
    config: &SpatialConfig,
) -> SpatialResult<NearestHits> {
    if k == 0 {
        return Ok(NearestHits {
            hits: Vec::new(),
            budget_exhausted: false,
            searched_radius: 0.0,
        });
    }

    let max_rounds = budget
        .max_rounds
        .map_or(config.nearest_max_rounds, |rounds| {
            rounds.min(config.nearest_max_rounds)
        })
        .max(1);
    // Farthest any point of S³ can be from `coord`.
    let full_radius = SPHERE_DIAMETER.max(coord.norm() + 1.0);
    let mut radius = config.initial_radius.min(full_radius);
    let mut round = 0;
    loop {
        round += 1;
        let mut hits = range_query(conn, target, coord, radius, config)?;
        let complete = hits.len() >= k || radius >= full_radius;
        let exhausted = !complete && (round >= max_rounds || budget.is_expired());
        if complete || exhausted {
            hits.truncate(k);
            debug!(
                "event=nearest module=search status=ok k={} rounds={} hits={} budget_exhausted={}",
                k,
                round,
                hits.len(),
                exhausted
            );
            return Ok(NearestHits {
                hits,
                budget_exhausted: exhausted,
                searched_radius: radius,
            });
        }
        radius = (radius * 2.0).min(full_radius);
    }
}

/// Reports runs of unoccupied keys inside `range`.
///
/// Gaps are measured only between stored neighbours; keys before the first
/// or after the last stored index are not reported.
pub fn detect_index_gaps(
    conn: &Connection,
    target: SpatialTarget,
    range: IndexRange,
    tolerance: u64,
) -> SpatialResult<Vec<IndexGap>> {
    // Stored keys never exceed MAX_INDEX; clamping keeps both bounds in i64.
    if range.is_empty() || range.start > MAX_INDEX {
        return Ok(Vec::new());
    }
    let scan = IndexRange::new(range.start, range.end.min(MAX_INDEX));

    let mut occupied: Vec<(u64, ContentHash, SphereCoord)> = Vec::new();
    for layer in target.layers() {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT content_hash, coord_x, coord_y, coord_z, coord_w, spatial_index
             FROM {}
             WHERE spatial_index BETWEEN ?1 AND ?2
             ORDER BY spatial_index ASC;",
            layer_table(*layer)
        ))?;
        let mut rows = stmt.query([scan.start as i64, scan.end as i64])?;
        while let Some(row) = rows.next()? {
            let index = spatial_index_from_row(row).map_err(SpatialError::InvalidData)?;
            occupied.push((index.value(), row.get("content_hash")?, coord_from_row(row)?));
        }
    }

    occupied.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    occupied.dedup_by_key(|entry| entry.0);
    let points: Vec<(u64, SphereCoord)> = occupied
        .into_iter()
        .map(|(index, _, coord)| (index, coord))
        .collect();
    let gaps = find_gaps(&points, tolerance);
    debug!(
        "event=detect_index_gaps module=search status=ok occupied={} gaps={}",
        points.len(),
        gaps.len()
    );
    Ok(gaps)
}

/// Gap scan over distinct occupied keys sorted ascending.
pub fn find_gaps(occupied: &[(u64, SphereCoord)], tolerance: u64) -> Vec<IndexGap> {
    occupied
        .windows(2)
        .filter_map(|pair| {
            let (prev, prev_coord) = pair[0];
            let (next, next_coord) = pair[1];
            let missing = next.checked_sub(prev)?.checked_sub(1)?;
            (missing > tolerance).then(|| IndexGap {
                missing: IndexRange::new(prev + 1, next - 1),
                midpoint: SphereCoord::midpoint(&prev_coord, &next_coord),
            })
        })
        .collect()
}

fn parse_hit_row(
    layer: LayerKind,
    row: &Row<'_>,
    center: &SphereCoord,
) -> SpatialResult<SpatialHit> {
    let coord = coord_from_row(row)?;
    Ok(SpatialHit {
        layer,
        content_hash: row.get("content_hash")?,
        coord,
        spatial_index: spatial_index_from_row(row).map_err(SpatialError::InvalidData)?,
        distance: coord.distance(center),
    })
}

fn compare_hits(a: &SpatialHit, b: &SpatialHit) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.content_hash.cmp(&b.content_hash))
}

#[cfg(test)]
mod tests {
    use super::{find_gaps, QueryBudget};
    use crate::geometry::{IndexRange, SphereCoord};
    use std::time::{Duration, Instant};

    fn axis_point(index: u64) -> (u64, SphereCoord) {
        let angle = index as f64 * 0.01;
        (index, SphereCoord::new(angle.cos(), angle.sin(), 0.0, 0.0))
    }

    #[test]
    fn single_run_of_missing_keys_is_one_gap() {
        let occupied: Vec<_> = [10, 11, 12, 20, 21].into_iter().map(axis_point).collect();
        let gaps = find_gaps(&occupied, 0);

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].missing, IndexRange::new(13, 19));
        assert_eq!(gaps[0].missing.len(), 7);
        assert!((gaps[0].midpoint.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tolerance_hides_small_gaps() {
        let occupied: Vec<_> = [1, 3, 10].into_iter().map(axis_point).collect();
        assert_eq!(find_gaps(&occupied, 0).len(), 2);
        let tolerant = find_gaps(&occupied, 1);
        assert_eq!(tolerant.len(), 1);
        assert_eq!(tolerant[0].missing, IndexRange::new(4, 9));
    }

    #[test]
    fn dense_or_tiny_inputs_have_no_gaps() {
        let dense: Vec<_> = (0..8).map(axis_point).collect();
        assert!(find_gaps(&dense, 0).is_empty());
        assert!(find_gaps(&[axis_point(5)], 0).is_empty());
        assert!(find_gaps(&[], 0).is_empty());
    }

    #[test]
    fn budget_expires_at_deadline() {
        let now = Instant::now();
        assert!(QueryBudget::unbounded().with_deadline(now).is_expired());
        let later = now + Duration::from_secs(3600);
        assert!(!QueryBudget::unbounded().with_deadline(later).is_expired());
        assert!(!QueryBudget::unbounded().is_expired());
    }
}
