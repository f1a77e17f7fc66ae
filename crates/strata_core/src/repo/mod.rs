//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts per substrate layer.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Every mutating call runs in one immediate transaction: it either fully
//!   commits or leaves prior state unchanged.
//! - Transient lock conflicts are retried here and never reach callers
//!   unless the retry budget is exhausted.
//! - Lookups return `Option::None` for unknown keys instead of errors.

pub mod atom_repo;
pub mod content_repo;
pub mod rating_repo;
pub mod sequence_repo;

use crate::db::{is_lock_conflict, DbError, DbResult};
use crate::geometry::{SpatialIndex, SphereCoord};
use log::debug;
use rusqlite::{Connection, Row};
use std::thread;
use std::time::Duration;

const MAX_WRITE_ATTEMPTS: u32 = 6;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(4);

/// Errors that may wrap a transient SQLite lock conflict.
pub(crate) trait LockConflict {
    fn is_lock_conflict(&self) -> bool;
}

impl LockConflict for DbError {
    fn is_lock_conflict(&self) -> bool {
        match self {
            DbError::Sqlite(err) => is_lock_conflict(err),
            _ => false,
        }
    }
}

/// Runs `op`, retrying with backoff while it fails on lock conflicts.
pub(crate) fn with_conflict_retry<T, E: LockConflict>(
    operation: &'static str,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_lock_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                debug!(
                    "event=write_retry module=repo status=retry operation={} attempt={}",
                    operation, attempt
                );
                thread::sleep(RETRY_BASE_DELAY * attempt);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Reads `coord_x..coord_w` from a row.
pub(crate) fn coord_from_row(row: &Row<'_>) -> rusqlite::Result<SphereCoord> {
    Ok(SphereCoord::new(
        row.get("coord_x")?,
        row.get("coord_y")?,
        row.get("coord_z")?,
        row.get("coord_w")?,
    ))
}

/// Reads and range-checks the `spatial_index` column.
pub(crate) fn spatial_index_from_row(row: &Row<'_>) -> Result<SpatialIndex, String> {
    let raw: i64 = row
        .get("spatial_index")
        .map_err(|err| format!("unreadable spatial_index: {err}"))?;
    u64::try_from(raw)
        .ok()
        .and_then(SpatialIndex::from_raw)
        .ok_or_else(|| format!("spatial_index `{raw}` out of range"))
}

/// Reads a non-negative counter column.
pub(crate) fn counter_from_row(row: &Row<'_>, column: &str) -> Result<u64, String> {
    let raw: i64 = row
        .get(column)
        .map_err(|err| format!("unreadable {column}: {err}"))?;
    u64::try_from(raw).map_err(|_| format!("negative {column} value `{raw}`"))
}

/// Row count of one substrate table.
pub(crate) fn count_rows(conn: &Connection, table: &'static str) -> DbResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })?;
    Ok(count.max(0) as u64)
}
