//! Evidence log and rating projection persistence.
//!
//! # Responsibility
//! - Append evidence and keep each relation's rating in sync with its log.
//! - Retract a content record surgically: its evidence, affected ratings and
//!   orphaned relations, nothing else.
//!
//! # Invariants
//! - A rating row always equals `project(evidence ordered by evidence_id)`.
//! - A relation with zero evidence after recompute is pruned together with
//!   its rating. Compositions and atoms are never touched.
//! - Every mutation (append + recompute, retraction + recomputes) is one
//!   immediate transaction, which serializes writers on the same relation.

use crate::config::RatingConfig;
use crate::db::{ensure_connection_ready, DbError};
use crate::model::hash::ContentHash;
use crate::model::provenance::{
    ContentRecordId, Evidence, NewEvidence, ProvenanceValidationError,
};
use crate::model::rating::{project, Rating};
use crate::repo::{counter_from_row, with_conflict_retry, LockConflict};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RatingRepoResult<T> = Result<T, RatingRepoError>;

/// Errors from evidence and rating operations.
#[derive(Debug)]
pub enum RatingRepoError {
    /// Input failed provenance validation.
    Validation(ProvenanceValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Evidence targets a relation that is not stored.
    UnknownRelation(ContentHash),
    /// Evidence cites a content record that is not stored.
    UnknownContentRecord(ContentRecordId),
    /// Relation cannot be deleted while evidence still supports it.
    RelationHasEvidence {
        relation_hash: ContentHash,
        evidence_count: u64,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RatingRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UnknownRelation(hash) => write!(f, "relation not found: {hash}"),
            Self::UnknownContentRecord(id) => write!(f, "content record not found: {id}"),
            Self::RelationHasEvidence {
                relation_hash,
                evidence_count,
            } => write!(
                f,
                "relation {relation_hash} still has {evidence_count} evidence rows"
            ),
            Self::InvalidData(message) => write!(f, "invalid rating data: {message}"),
        }
    }
}

impl Error for RatingRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::UnknownRelation(_) => None,
            Self::UnknownContentRecord(_) => None,
            Self::RelationHasEvidence { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ProvenanceValidationError> for RatingRepoError {
    fn from(value: ProvenanceValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RatingRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RatingRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl LockConflict for RatingRepoError {
    fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_lock_conflict())
    }
}

/// Outcome of recomputing one relation.
#[derive(Debug, Clone, PartialEq)]
pub enum RatingUpdate {
    /// Evidence remains; the stored rating was rewritten.
    Rated(Rating),
    /// No evidence remains; relation and rating were deleted.
    Pruned(ContentHash),
}

/// Summary of one content retraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RetractionReport {
    pub content_record_id: ContentRecordId,
    pub evidence_removed: u64,
    /// Relations that kept evidence, with their recomputed ratings.
    pub recomputed: Vec<Rating>,
    /// Relations deleted because no evidence remained.
    pub pruned: Vec<ContentHash>,
}

/// Repository interface for evidence and ratings.
pub trait RatingRepository {
    /// Appends one evidence row and recomputes the relation's rating.
    fn record_evidence(&self, evidence: &NewEvidence) -> RatingRepoResult<Rating>;
    /// Replays the relation's evidence. `None` when the relation is unknown.
    fn recompute_rating(&self, relation_hash: &ContentHash)
        -> RatingRepoResult<Option<RatingUpdate>>;
    /// Removes a content record and everything derived only from it.
    ///
    /// Returns `None` when the record does not exist.
    fn retract_content(&self, id: ContentRecordId) -> RatingRepoResult<Option<RetractionReport>>;
    fn get_rating(&self, relation_hash: &ContentHash) -> RatingRepoResult<Option<Rating>>;
    /// Evidence for one relation in insertion order.
    fn list_evidence(&self, relation_hash: &ContentHash) -> RatingRepoResult<Vec<Evidence>>;
    /// Deletes a relation that has no evidence. `false` when it was absent.
    fn delete_relation(&self, relation_hash: &ContentHash) -> RatingRepoResult<bool>;
}

/// SQLite-backed evidence and rating repository.
pub struct SqliteRatingRepository<'conn> {
    conn: &'conn Connection,
    config: RatingConfig,
}

impl<'conn> SqliteRatingRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection, config: RatingConfig) -> RatingRepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn, config })
    }

    fn record_evidence_once(&self, evidence: &NewEvidence) -> RatingRepoResult<Rating> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !relation_exists(&tx, &evidence.relation_hash)? {
            return Err(RatingRepoError::UnknownRelation(evidence.relation_hash));
        }
        if !content_record_exists(&tx, evidence.content_record_id)? {
            return Err(RatingRepoError::UnknownContentRecord(
                evidence.content_record_id,
            ));
        }

        tx.execute(
            "INSERT INTO evidence (
                relation_hash,
                content_record_uuid,
                weight,
                position
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                evidence.relation_hash,
                evidence.content_record_id.to_string(),
                evidence.weight,
                evidence.position,
            ],
        )?;

        let rating = match recompute_in(&tx, &evidence.relation_hash, &self.config)? {
            RatingUpdate::Rated(rating) => rating,
            RatingUpdate::Pruned(hash) => {
                return Err(RatingRepoError::InvalidData(format!(
                    "relation {hash} lost its evidence during append"
                )))
            }
        };
        tx.commit()?;
        Ok(rating)
    }

    fn recompute_once(&self, relation_hash: &ContentHash) -> RatingRepoResult<Option<RatingUpdate>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !relation_exists(&tx, relation_hash)? {
            return Ok(None);
        }
        let update = recompute_in(&tx, relation_hash, &self.config)?;
        tx.commit()?;
        Ok(Some(update))
    }

    fn retract_once(&self, id: ContentRecordId) -> RatingRepoResult<Option<RetractionReport>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !content_record_exists(&tx, id)? {
            return Ok(None);
        }

        let affected: Vec<ContentHash> = {
            let mut stmt = tx.prepare(
                "SELECT DISTINCT relation_hash
                 FROM evidence
                 WHERE content_record_uuid = ?1
                 ORDER BY relation_hash ASC;",
            )?;
            let rows = stmt.query_map([id.to_string()], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let evidence_removed = tx.execute(
            "DELETE FROM evidence WHERE content_record_uuid = ?1;",
            [id.to_string()],
        )? as u64;

        let mut report = RetractionReport {
            content_record_id: id,
            evidence_removed,
            recomputed: Vec::new(),
            pruned: Vec::new(),
        };
        for relation_hash in &affected {
            match recompute_in(&tx, relation_hash, &self.config)? {
                RatingUpdate::Rated(rating) => report.recomputed.push(rating),
                RatingUpdate::Pruned(hash) => report.pruned.push(hash),
            }
        }

        tx.execute(
            "DELETE FROM content_records WHERE record_uuid = ?1;",
            [id.to_string()],
        )?;
        tx.commit()?;
        Ok(Some(report))
    }

    fn delete_relation_once(&self, relation_hash: &ContentHash) -> RatingRepoResult<bool> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !relation_exists(&tx, relation_hash)? {
            return Ok(false);
        }
        let evidence_count = evidence_count_in(&tx, relation_hash)?;
        if evidence_count > 0 {
            return Err(RatingRepoError::RelationHasEvidence {
                relation_hash: *relation_hash,
                evidence_count,
            });
        }
        prune_relation(&tx, relation_hash)?;
        tx.commit()?;
        Ok(true)
    }
}

impl RatingRepository for SqliteRatingRepository<'_> {
    fn record_evidence(&self, evidence: &NewEvidence) -> RatingRepoResult<Rating> {
        evidence.validate()?;
        let rating = with_conflict_retry("record_evidence", || {
            self.record_evidence_once(evidence)
        })?;
        debug!(
            "event=record_evidence module=repo status=ok relation={} evidence_count={}",
            rating.relation_hash.to_hex(),
            rating.evidence_count
        );
        Ok(rating)
    }

    fn recompute_rating(
        &self,
        relation_hash: &ContentHash,
    ) -> RatingRepoResult<Option<RatingUpdate>> {
        with_conflict_retry("recompute_rating", || self.recompute_once(relation_hash))
    }

    fn retract_content(&self, id: ContentRecordId) -> RatingRepoResult<Option<RetractionReport>> {
        let report = with_conflict_retry("retract_content", || self.retract_once(id))?;
        match &report {
            Some(report) => info!(
                "event=retract_content module=repo status=ok record={} evidence_removed={} recomputed={} pruned={}",
                id,
                report.evidence_removed,
                report.recomputed.len(),
                report.pruned.len()
            ),
            None => info!(
                "event=retract_content module=repo status=not_found record={}",
                id
            ),
        }
        Ok(report)
    }

    fn get_rating(&self, relation_hash: &ContentHash) -> RatingRepoResult<Option<Rating>> {
        let row = self
            .conn
            .query_row(
                "SELECT relation_hash, score, evidence_count, last_updated
                 FROM ratings
                 WHERE relation_hash = ?1;",
                [relation_hash],
                |row| Ok(parse_rating_row(row)),
            )
            .optional()?;
        row.transpose()
    }

    fn list_evidence(&self, relation_hash: &ContentHash) -> RatingRepoResult<Vec<Evidence>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                evidence_id,
                relation_hash,
                content_record_uuid,
                weight,
                position,
                timestamp
             FROM evidence
             WHERE relation_hash = ?1
             ORDER BY evidence_id ASC;",
        )?;
        let mut rows = stmt.query([relation_hash])?;
        let mut evidence = Vec::new();
        while let Some(row) = rows.next()? {
            evidence.push(parse_evidence_row(row)?);
        }
        Ok(evidence)
    }

    fn delete_relation(&self, relation_hash: &ContentHash) -> RatingRepoResult<bool> {
        with_conflict_retry("delete_relation", || {
            self.delete_relation_once(relation_hash)
        })
    }
}

/// Replays the relation's evidence inside an open transaction.
fn recompute_in(
    conn: &Connection,
    relation_hash: &ContentHash,
    config: &RatingConfig,
) -> RatingRepoResult<RatingUpdate> {
    let weights: Vec<f64> = {
        let mut stmt = conn.prepare_cached(
            "SELECT weight
             FROM evidence
             WHERE relation_hash = ?1
             ORDER BY evidence_id ASC;",
        )?;
        let rows = stmt.query_map([relation_hash], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let projection = project(weights, config);
    if projection.evidence_count == 0 {
        prune_relation(conn, relation_hash)?;
        return Ok(RatingUpdate::Pruned(*relation_hash));
    }

    let row = conn.query_row(
        "INSERT INTO ratings (relation_hash, score, evidence_count, last_updated)
         VALUES (?1, ?2, ?3, strftime('%s', 'now') * 1000)
         ON CONFLICT(relation_hash) DO UPDATE SET
            score = excluded.score,
            evidence_count = excluded.evidence_count,
            last_updated = excluded.last_updated
         RETURNING relation_hash, score, evidence_count, last_updated;",
        params![
            relation_hash,
            projection.score,
            projection.evidence_count as i64
        ],
        |row| Ok(parse_rating_row(row)),
    )?;
    Ok(RatingUpdate::Rated(row?))
}

fn prune_relation(conn: &Connection, relation_hash: &ContentHash) -> RatingRepoResult<()> {
    conn.execute(
        "DELETE FROM ratings WHERE relation_hash = ?1;",
        [relation_hash],
    )?;
    conn.execute(
        "DELETE FROM relations WHERE content_hash = ?1;",
        [relation_hash],
    )?;
    debug!(
        "event=prune_relation module=repo status=ok relation={}",
        relation_hash.to_hex()
    );
    Ok(())
}

fn relation_exists(conn: &Connection, relation_hash: &ContentHash) -> RatingRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM relations WHERE content_hash = ?1);",
        [relation_hash],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn content_record_exists(conn: &Connection, id: ContentRecordId) -> RatingRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM content_records WHERE record_uuid = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn evidence_count_in(conn: &Connection, relation_hash: &ContentHash) -> RatingRepoResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM evidence WHERE relation_hash = ?1;",
        [relation_hash],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

fn parse_rating_row(row: &Row<'_>) -> RatingRepoResult<Rating> {
    Ok(Rating {
        relation_hash: row.get("relation_hash")?,
        score: row.get("score")?,
        evidence_count: counter_from_row(row, "evidence_count")
            .map_err(RatingRepoError::InvalidData)?,
        last_updated: row.get("last_updated")?,
    })
}

fn parse_evidence_row(row: &Row<'_>) -> RatingRepoResult<Evidence> {
    let raw_id: String = row.get("content_record_uuid")?;
    let content_record_id = Uuid::parse_str(&raw_id).map_err(|err| {
        RatingRepoError::InvalidData(format!("invalid content_record_uuid `{raw_id}`: {err}"))
    })?;
    Ok(Evidence {
        evidence_id: row.get("evidence_id")?,
        relation_hash: row.get("relation_hash")?,
        content_record_id,
        weight: row.get("weight")?,
        position: row.get("position")?,
        timestamp: row.get("timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{RatingRepoError, RatingRepository, RatingUpdate, SqliteRatingRepository};
    use crate::config::RatingConfig;
    use crate::db::open_db_in_memory;
    use crate::geometry::Alphabet;
    use crate::model::hash::ContentHash;
    use crate::model::provenance::{NewContentRecord, NewEvidence};
    use crate::repo::atom_repo::{AtomRepository, SqliteAtomRepository};
    use crate::repo::content_repo::{ContentRepository, SqliteContentRepository};
    use crate::repo::sequence_repo::{
        SequenceRepository, SqliteCompositionRepository, SqliteRelationRepository,
    };
    use rusqlite::Connection;
    use uuid::Uuid;

    fn seeded_with_relation() -> (Connection, ContentHash) {
        let conn = open_db_in_memory().expect("open db");
        let alphabet = Alphabet::build("xy".chars().map(u32::from)).expect("alphabet");
        SqliteAtomRepository::try_new(&conn)
            .expect("atom repo")
            .seed_alphabet(&alphabet)
            .expect("seed");
        let composition = SqliteCompositionRepository::try_new(&conn)
            .expect("composition repo")
            .intern(&[ContentHash::of_symbol('x' as u32)])
            .expect("intern composition")
            .content_hash;
        let relation = SqliteRelationRepository::try_new(&conn)
            .expect("relation repo")
            .intern(&[composition, composition])
            .expect("intern relation")
            .content_hash;
        (conn, relation)
    }

    fn record(conn: &Connection, name: &str) -> Uuid {
        SqliteContentRepository::try_new(conn)
            .expect("content repo")
            .create_content_record(&NewContentRecord::new(
                "text",
                name,
                ContentHash::of_payload(name.as_bytes()),
            ))
            .expect("record")
            .id
    }

    fn evidence(relation: ContentHash, record: Uuid, weight: f64) -> NewEvidence {
        NewEvidence {
            relation_hash: relation,
            content_record_id: record,
            weight,
            position: "0".to_string(),
        }
    }

    #[test]
    fn single_full_weight_evidence_moves_score_by_half_k0() {
        let (conn, relation) = seeded_with_relation();
        let doc = record(&conn, "doc");
        let repo = SqliteRatingRepository::try_new(&conn, RatingConfig::default()).expect("repo");

        let rating = repo
            .record_evidence(&evidence(relation, doc, 1.0))
            .expect("evidence");
        assert_eq!(rating.evidence_count, 1);
        assert!((rating.score - 1516.0).abs() < 1e-9);
        assert_eq!(repo.get_rating(&relation).expect("query"), Some(rating));
    }

    #[test]
    fn evidence_for_unknown_targets_is_rejected() {
        let (conn, relation) = seeded_with_relation();
        let repo = SqliteRatingRepository::try_new(&conn, RatingConfig::default()).expect("repo");
        let missing_record = Uuid::new_v4();

        assert!(matches!(
            repo.record_evidence(&evidence(relation, missing_record, 1.0)),
            Err(RatingRepoError::UnknownContentRecord(id)) if id == missing_record
        ));
        let doc = record(&conn, "doc");
        let stray = ContentHash::of_payload(b"not a relation");
        assert!(matches!(
            repo.record_evidence(&evidence(stray, doc, 1.0)),
            Err(RatingRepoError::UnknownRelation(_))
        ));
        assert!(repo.list_evidence(&relation).expect("list").is_empty());
    }

    #[test]
    fn recompute_without_evidence_prunes_relation() {
        let (conn, relation) = seeded_with_relation();
        let repo = SqliteRatingRepository::try_new(&conn, RatingConfig::default()).expect("repo");

        assert_eq!(
            repo.recompute_rating(&relation).expect("recompute"),
            Some(RatingUpdate::Pruned(relation))
        );
        assert_eq!(repo.recompute_rating(&relation).expect("recompute"), None);
        let compositions: i64 = conn
            .query_row("SELECT COUNT(*) FROM compositions;", [], |row| row.get(0))
            .expect("count");
        assert_eq!(compositions, 1);
    }

    #[test]
    fn retraction_recomputes_from_remaining_evidence() {
        let (conn, relation) = seeded_with_relation();
        let doc_a = record(&conn, "a");
        let doc_b = record(&conn, "b");
        let repo = SqliteRatingRepository::try_new(&conn, RatingConfig::default()).expect("repo");
        repo.record_evidence(&evidence(relation, doc_a, 1.0))
            .expect("evidence a");
        repo.record_evidence(&evidence(relation, doc_b, 0.25))
            .expect("evidence b");

        let report = repo
            .retract_content(doc_a)
            .expect("retract")
            .expect("record existed");
        assert_eq!(report.evidence_removed, 1);
        assert!(report.pruned.is_empty());

        let only_b = crate::model::rating::project([0.25], &RatingConfig::default());
        let rating = repo.get_rating(&relation).expect("query").expect("rating");
        assert_eq!(rating.evidence_count, 1);
        assert!((rating.score - only_b.score).abs() < 1e-9);

        let report = repo
            .retract_content(doc_b)
            .expect("retract")
            .expect("record existed");
        assert_eq!(report.pruned, vec![relation]);
        assert!(repo.get_rating(&relation).expect("query").is_none());
        assert!(repo.retract_content(doc_b).expect("retract").is_none());
    }

    #[test]
    fn relation_with_evidence_cannot_be_deleted() {
        let (conn, relation) = seeded_with_relation();
        let doc = record(&conn, "doc");
        let repo = SqliteRatingRepository::try_new(&conn, RatingConfig::default()).expect("repo");
        repo.record_evidence(&evidence(relation, doc, 1.0))
            .expect("evidence");

        assert!(matches!(
            repo.delete_relation(&relation),
            Err(RatingRepoError::RelationHasEvidence {
                evidence_count: 1,
                ..
            })
        ));
        repo.retract_content(doc).expect("retract");
        assert!(!repo.delete_relation(&relation).expect("delete"));
    }
}
