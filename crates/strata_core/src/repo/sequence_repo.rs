//! Interned sequence repository shared by compositions and relations.
//!
//! # Responsibility
//! - Store every distinct ordered child sequence exactly once per layer.
//! - Derive centroid, trajectory and spatial index on first observation.
//!
//! # Invariants
//! - Row identity is the content hash of the ordered children.
//! - Re-interning an existing sequence only increments `occurrence_count`.
//! - Every child must already exist in the layer below.
//! - A stored row whose children disagree with its hash is never returned
//!   as a successful intern; the transaction rolls back instead.

use crate::db::{ensure_connection_ready, DbError};
use crate::geometry::{spherical_mean, SpatialIndex, SphereCoord};
use crate::model::hash::{decode_hashes, encode_hashes, ContentHash};
use crate::model::sequence::{
    decode_trajectory, encode_trajectory, InternOutcome, LayerKind, SequenceRecord,
};
use crate::repo::{
    coord_from_row, count_rows, counter_from_row, spatial_index_from_row, with_conflict_retry,
    LockConflict,
};
use log::error;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type SequenceRepoResult<T> = Result<T, SequenceRepoError>;

/// Errors from sequence repository operations.
#[derive(Debug)]
pub enum SequenceRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Sequences must contain at least one child.
    EmptySequence(LayerKind),
    /// A child hash is not present in the layer below.
    UnknownChild {
        layer: LayerKind,
        child: ContentHash,
    },
    /// Stored children do not match the content hash.
    IntegrityViolation {
        layer: LayerKind,
        content_hash: ContentHash,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for SequenceRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::EmptySequence(layer) => write!(f, "{} must not be empty", layer.as_str()),
            Self::UnknownChild { layer, child } => write!(
                f,
                "{} references unknown child {child}",
                layer.as_str()
            ),
            Self::IntegrityViolation {
                layer,
                content_hash,
            } => write!(
                f,
                "integrity violation: stored {} {content_hash} does not match its children",
                layer.as_str()
            ),
            Self::InvalidData(message) => write!(f, "invalid sequence data: {message}"),
        }
    }
}

impl Error for SequenceRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::EmptySequence(_) => None,
            Self::UnknownChild { .. } => None,
            Self::IntegrityViolation { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SequenceRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SequenceRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl LockConflict for SequenceRepoError {
    fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_lock_conflict())
    }
}

/// Static description of one interned layer.
pub trait SequenceLayer {
    const KIND: LayerKind;
    /// Table holding this layer's rows.
    const TABLE: &'static str;
    /// Table holding the children (`atoms` or `compositions`).
    const CHILD_TABLE: &'static str;
}

/// Layer 1: sequences of atoms.
#[derive(Debug, Clone, Copy)]
pub struct CompositionLayer;

impl SequenceLayer for CompositionLayer {
    const KIND: LayerKind = LayerKind::Composition;
    const TABLE: &'static str = "compositions";
    const CHILD_TABLE: &'static str = "atoms";
}

/// Layer 2: sequences of compositions.
#[derive(Debug, Clone, Copy)]
pub struct RelationLayer;

impl SequenceLayer for RelationLayer {
    const KIND: LayerKind = LayerKind::Relation;
    const TABLE: &'static str = "relations";
    const CHILD_TABLE: &'static str = "compositions";
}

/// Table name for a runtime layer value.
pub(crate) fn layer_table(layer: LayerKind) -> &'static str {
    match layer {
        LayerKind::Composition => CompositionLayer::TABLE,
        LayerKind::Relation => RelationLayer::TABLE,
    }
}

/// Repository interface for one interned layer.
pub trait SequenceRepository {
    /// Interns `children`, returning the row hash and its updated counter.
    fn intern(&self, children: &[ContentHash]) -> SequenceRepoResult<InternOutcome>;
    fn get(&self, content_hash: &ContentHash) -> SequenceRepoResult<Option<SequenceRecord>>;
    fn count(&self) -> SequenceRepoResult<u64>;
}

/// SQLite-backed interned sequence repository for layer `L`.
pub struct SqliteSequenceRepository<'conn, L: SequenceLayer> {
    conn: &'conn Connection,
    layer: PhantomData<L>,
}

pub type SqliteCompositionRepository<'conn> = SqliteSequenceRepository<'conn, CompositionLayer>;
pub type SqliteRelationRepository<'conn> = SqliteSequenceRepository<'conn, RelationLayer>;

/// Derived geometry for a first observation.
struct Placement {
    trajectory: Vec<SphereCoord>,
    centroid: SphereCoord,
    spatial_index: SpatialIndex,
}

impl<'conn, L: SequenceLayer> SqliteSequenceRepository<'conn, L> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> SequenceRepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            layer: PhantomData,
        })
    }

    fn intern_once(
        &self,
        content_hash: ContentHash,
        children: &[ContentHash],
        children_blob: &[u8],
    ) -> SequenceRepoResult<InternOutcome> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let stored_children: Option<Vec<u8>> = tx
            .query_row(
                &format!("SELECT children FROM {} WHERE content_hash = ?1;", L::TABLE),
                [content_hash],
                |row| row.get(0),
            )
            .optional()?;

        let occurrence_count = match stored_children {
            Some(stored) => {
                if stored != children_blob {
                    return Err(integrity_violation::<L>(content_hash, children));
                }
                let count: i64 = tx.query_row(
                    &format!(
                        "UPDATE {}
                         SET occurrence_count = occurrence_count + 1
                         WHERE content_hash = ?1
                         RETURNING occurrence_count;",
                        L::TABLE
                    ),
                    [content_hash],
                    |row| row.get(0),
                )?;
                count
            }
            None => {
                let placement = place_children::<L>(&tx, children)?;
                let (count, stored): (i64, Vec<u8>) = tx.query_row(
                    &format!(
                        "INSERT INTO {} (
                            content_hash,
                            length,
                            occurrence_count,
                            children,
                            trajectory,
                            coord_x,
                            coord_y,
                            coord_z,
                            coord_w,
                            spatial_index
                        ) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                        ON CONFLICT(content_hash) DO UPDATE
                            SET occurrence_count = occurrence_count + 1
                        RETURNING occurrence_count, children;",
                        L::TABLE
                    ),
                    params![
                        content_hash,
                        children.len() as i64,
                        children_blob,
                        encode_trajectory(&placement.trajectory),
                        placement.centroid.x,
                        placement.centroid.y,
                        placement.centroid.z,
                        placement.centroid.w,
                        placement.spatial_index.to_sql_value(),
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let reconstructed = decode_hashes(&stored)
                    .map(|hashes| ContentHash::of_sequence(L::KIND.hash_domain(), &hashes));
                if reconstructed.ok() != Some(content_hash) {
                    return Err(integrity_violation::<L>(content_hash, children));
                }
                count
            }
        };

        tx.commit()?;
        let occurrence_count = u64::try_from(occurrence_count).map_err(|_| {
            SequenceRepoError::InvalidData(format!(
                "negative occurrence_count `{occurrence_count}`"
            ))
        })?;
        Ok(InternOutcome {
            content_hash,
            occurrence_count,
            is_new: occurrence_count == 1,
        })
    }
}

impl<L: SequenceLayer> SequenceRepository for SqliteSequenceRepository<'_, L> {
    fn intern(&self, children: &[ContentHash]) -> SequenceRepoResult<InternOutcome> {
        if children.is_empty() {
            return Err(SequenceRepoError::EmptySequence(L::KIND));
        }
        let content_hash = ContentHash::of_sequence(L::KIND.hash_domain(), children);
        let children_blob = encode_hashes(children);
        with_conflict_retry("intern", || {
            self.intern_once(content_hash, children, &children_blob)
        })
    }

    fn get(&self, content_hash: &ContentHash) -> SequenceRepoResult<Option<SequenceRecord>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT
                        content_hash,
                        length,
                        occurrence_count,
                        children,
                        trajectory,
                        coord_x,
                        coord_y,
                        coord_z,
                        coord_w,
                        spatial_index,
                        created_at
                     FROM {}
                     WHERE content_hash = ?1;",
                    L::TABLE
                ),
                [content_hash],
                |row| Ok(parse_sequence_row(L::KIND, row)),
            )
            .optional()?;
        row.transpose()
    }

    fn count(&self) -> SequenceRepoResult<u64> {
        Ok(count_rows(self.conn, L::TABLE)?)
    }
}

fn place_children<L: SequenceLayer>(
    conn: &Connection,
    children: &[ContentHash],
) -> SequenceRepoResult<Placement> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT coord_x, coord_y, coord_z, coord_w FROM {} WHERE content_hash = ?1;",
        L::CHILD_TABLE
    ))?;
    let mut trajectory = Vec::with_capacity(children.len());
    for child in children {
        let coord = stmt
            .query_row([child], coord_from_row)
            .optional()?
            .ok_or(SequenceRepoError::UnknownChild {
                layer: L::KIND,
                child: *child,
            })?;
        trajectory.push(coord);
    }

    let centroid = spherical_mean(&trajectory).ok_or_else(|| {
        SequenceRepoError::InvalidData("child coordinates are not finite".to_string())
    })?;
    Ok(Placement {
        spatial_index: SpatialIndex::from_coord(&centroid),
        trajectory,
        centroid,
    })
}

fn integrity_violation<L: SequenceLayer>(
    content_hash: ContentHash,
    children: &[ContentHash],
) -> SequenceRepoError {
    let payload = children
        .iter()
        .map(ContentHash::to_hex)
        .collect::<Vec<_>>()
        .join(",");
    error!(
        "event=intern module=repo status=error error_code=integrity_violation layer={} content_hash={} children={}",
        L::KIND.as_str(),
        content_hash.to_hex(),
        payload
    );
    SequenceRepoError::IntegrityViolation {
        layer: L::KIND,
        content_hash,
    }
}

fn parse_sequence_row(layer: LayerKind, row: &Row<'_>) -> SequenceRepoResult<SequenceRecord> {
    let content_hash: ContentHash = row.get("content_hash")?;
    let length: i64 = row.get("length")?;
    let children_blob: Vec<u8> = row.get("children")?;
    let trajectory_blob: Vec<u8> = row.get("trajectory")?;

    let children = decode_hashes(&children_blob).map_err(|err| {
        SequenceRepoError::InvalidData(format!("children of {content_hash}: {err}"))
    })?;
    let trajectory = decode_trajectory(&trajectory_blob).ok_or_else(|| {
        SequenceRepoError::InvalidData(format!("malformed trajectory of {content_hash}"))
    })?;
    let length = usize::try_from(length)
        .ok()
        .filter(|length| *length == children.len() && *length == trajectory.len())
        .ok_or_else(|| {
            SequenceRepoError::InvalidData(format!("inconsistent length of {content_hash}"))
        })?;

    Ok(SequenceRecord {
        layer,
        content_hash,
        length,
        occurrence_count: counter_from_row(row, "occurrence_count")
            .map_err(SequenceRepoError::InvalidData)?,
        children,
        centroid_coord: coord_from_row(row)?,
        trajectory,
        spatial_index: spatial_index_from_row(row).map_err(SequenceRepoError::InvalidData)?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        SequenceRepoError, SequenceRepository, SqliteCompositionRepository,
        SqliteRelationRepository,
    };
    use crate::db::open_db_in_memory;
    use crate::geometry::Alphabet;
    use crate::model::hash::{encode_hashes, ContentHash};
    use crate::model::sequence::LayerKind;
    use crate::repo::atom_repo::{AtomRepository, SqliteAtomRepository};
    use rusqlite::Connection;

    fn seeded() -> Connection {
        let conn = open_db_in_memory().expect("open db");
        let alphabet = Alphabet::build("abc".chars().map(u32::from)).expect("alphabet");
        SqliteAtomRepository::try_new(&conn)
            .expect("atom repo")
            .seed_alphabet(&alphabet)
            .expect("seed");
        conn
    }

    fn atom(symbol: char) -> ContentHash {
        ContentHash::of_symbol(symbol as u32)
    }

    #[test]
    fn reinterning_bumps_occurrence_count() {
        let conn = seeded();
        let repo = SqliteCompositionRepository::try_new(&conn).expect("repo");

        let first = repo.intern(&[atom('a'), atom('b')]).expect("intern");
        let second = repo.intern(&[atom('a'), atom('b')]).expect("intern");

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(second.occurrence_count, 2);
        assert_eq!(repo.count().expect("count"), 1);
    }

    #[test]
    fn stored_record_carries_trajectory_and_centroid() {
        let conn = seeded();
        let repo = SqliteCompositionRepository::try_new(&conn).expect("repo");
        let outcome = repo
            .intern(&[atom('c'), atom('a'), atom('c')])
            .expect("intern");

        let record = repo
            .get(&outcome.content_hash)
            .expect("query")
            .expect("row");
        assert_eq!(record.layer, LayerKind::Composition);
        assert_eq!(record.length, 3);
        assert_eq!(record.trajectory.len(), 3);
        assert_eq!(record.trajectory[0], record.trajectory[2]);
        assert!((record.centroid_coord.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_and_unknown_children_are_rejected() {
        let conn = seeded();
        let compositions = SqliteCompositionRepository::try_new(&conn).expect("repo");
        let relations = SqliteRelationRepository::try_new(&conn).expect("repo");

        assert!(matches!(
            compositions.intern(&[]),
            Err(SequenceRepoError::EmptySequence(LayerKind::Composition))
        ));
        assert!(matches!(
            compositions.intern(&[atom('a'), atom('z')]),
            Err(SequenceRepoError::UnknownChild { child, .. }) if child == atom('z')
        ));
        // Atoms are not valid relation children.
        assert!(matches!(
            relations.intern(&[atom('a')]),
            Err(SequenceRepoError::UnknownChild { .. })
        ));
        assert_eq!(compositions.count().expect("count"), 0);
    }

    #[test]
    fn mismatched_stored_children_raise_integrity_violation() {
        let conn = seeded();
        let repo = SqliteCompositionRepository::try_new(&conn).expect("repo");
        let outcome = repo.intern(&[atom('a'), atom('b')]).expect("intern");
        conn.execute(
            "UPDATE compositions SET children = ?1 WHERE content_hash = ?2;",
            rusqlite::params![encode_hashes(&[atom('b'), atom('a')]), outcome.content_hash],
        )
        .expect("corrupt row");

        let err = repo
            .intern(&[atom('a'), atom('b')])
            .expect_err("collision must fail");
        assert!(matches!(err, SequenceRepoError::IntegrityViolation { .. }));

        let count: i64 = conn
            .query_row(
                "SELECT occurrence_count FROM compositions WHERE content_hash = ?1;",
                [outcome.content_hash],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(count, 1);
    }
}
