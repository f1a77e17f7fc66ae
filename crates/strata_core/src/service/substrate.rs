//! Substrate facade: the external surface of the knowledge store.
//!
//! # Responsibility
//! - Own one migrated connection plus validated configuration.
//! - Expose seeding, interning, provenance, rating and spatial operations.
//! - Map repository errors onto one caller-facing taxonomy.
//!
//! # Invariants
//! - One `Substrate` per producer; concurrent producers open their own
//!   connection to the same file.
//! - Atoms and compositions are never deleted through this API.
//! - Lookups of unknown keys return `None`, never an error.

use crate::config::{ConfigError, SubstrateConfig};
use crate::db::{ensure_connection_ready, open_db, open_db_in_memory, DbError};
use crate::geometry::{Alphabet, GeometryError, IndexRange, SphereCoord};
use crate::model::atom::AtomRecord;
use crate::model::hash::ContentHash;
use crate::model::provenance::{ContentRecord, ContentRecordId, Evidence, NewContentRecord};
use crate::model::rating::Rating;
use crate::model::sequence::{InternOutcome, LayerKind, SequenceRecord};
use crate::repo::atom_repo::{AtomRepoError, AtomRepository, SqliteAtomRepository};
use crate::repo::content_repo::{ContentRepoError, ContentRepository, SqliteContentRepository};
use crate::repo::count_rows;
use crate::repo::rating_repo::{
    RatingRepoError, RatingUpdate, RetractionReport, SqliteRatingRepository,
};
use crate::repo::sequence_repo::{
    SequenceRepoError, SequenceRepository, SqliteCompositionRepository, SqliteRelationRepository,
};
use crate::search::spatial::{
    self, IndexGap, NearestHits, QueryBudget, SpatialError, SpatialHit, SpatialTarget,
};
use crate::service::rating_service::RatingService;
use log::{info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub type SubstrateResult<T> = Result<T, SubstrateError>;

/// Caller-facing error taxonomy.
#[derive(Debug)]
pub enum SubstrateError {
    /// Configuration failed validation.
    Config(ConfigError),
    /// Alphabet construction or re-seeding failed.
    Construction(GeometryError),
    /// Stored row does not match its content hash.
    IntegrityViolation {
        layer: LayerKind,
        content_hash: ContentHash,
    },
    /// Operation would break a structural invariant (e.g. deleting atoms).
    InvariantViolation(String),
    /// Caller input was rejected before anything was written.
    InvalidInput(String),
    Db(DbError),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for SubstrateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Construction(err) => write!(f, "construction error: {err}"),
            Self::IntegrityViolation {
                layer,
                content_hash,
            } => write!(
                f,
                "integrity violation in {} {content_hash}",
                layer.as_str()
            ),
            Self::InvariantViolation(message) => write!(f, "invariant violation: {message}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
        }
    }
}

impl Error for SubstrateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Construction(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::IntegrityViolation { .. } => None,
            Self::InvariantViolation(_) => None,
            Self::InvalidInput(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ConfigError> for SubstrateError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<GeometryError> for SubstrateError {
    fn from(value: GeometryError) -> Self {
        Self::Construction(value)
    }
}

impl From<DbError> for SubstrateError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<AtomRepoError> for SubstrateError {
    fn from(value: AtomRepoError) -> Self {
        match value {
            AtomRepoError::Db(err) => Self::Db(err),
            AtomRepoError::Construction(err) => Self::Construction(err),
            AtomRepoError::InvalidData(message) => Self::InvalidData(message),
        }
    }
}

impl From<SequenceRepoError> for SubstrateError {
    fn from(value: SequenceRepoError) -> Self {
        match value {
            SequenceRepoError::Db(err) => Self::Db(err),
            SequenceRepoError::IntegrityViolation {
                layer,
                content_hash,
            } => Self::IntegrityViolation {
                layer,
                content_hash,
            },
            SequenceRepoError::InvalidData(message) => Self::InvalidData(message),
            err @ (SequenceRepoError::EmptySequence(_)
            | SequenceRepoError::UnknownChild { .. }) => Self::InvalidInput(err.to_string()),
        }
    }
}

impl From<ContentRepoError> for SubstrateError {
    fn from(value: ContentRepoError) -> Self {
        match value {
            ContentRepoError::Validation(err) => Self::InvalidInput(err.to_string()),
            ContentRepoError::Db(err) => Self::Db(err),
            ContentRepoError::InvalidData(message) => Self::InvalidData(message),
        }
    }
}

impl From<RatingRepoError> for SubstrateError {
    fn from(value: RatingRepoError) -> Self {
        match value {
            RatingRepoError::Db(err) => Self::Db(err),
            RatingRepoError::InvalidData(message) => Self::InvalidData(message),
            err @ RatingRepoError::RelationHasEvidence { .. } => {
                Self::InvariantViolation(err.to_string())
            }
            err @ (RatingRepoError::Validation(_)
            | RatingRepoError::UnknownRelation(_)
            | RatingRepoError::UnknownContentRecord(_)) => Self::InvalidInput(err.to_string()),
        }
    }
}

impl From<SpatialError> for SubstrateError {
    fn from(value: SpatialError) -> Self {
        match value {
            SpatialError::Db(err) => Self::Db(err),
            SpatialError::InvalidData(message) => Self::InvalidData(message),
            err @ SpatialError::InvalidQuery(_) => Self::InvalidInput(err.to_string()),
        }
    }
}

/// Any row addressable by content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRow {
    Atom(AtomRecord),
    Sequence(SequenceRecord),
}

impl StoredRow {
    pub fn content_hash(&self) -> ContentHash {
        match self {
            Self::Atom(atom) => atom.content_hash,
            Self::Sequence(record) => record.content_hash,
        }
    }
}

/// Row kinds accepted by [`Substrate::delete_row`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Atom,
    Composition,
    Relation,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateStats {
    pub atoms: u64,
    pub compositions: u64,
    pub relations: u64,
    pub content_records: u64,
    pub evidence: u64,
    pub ratings: u64,
}

/// Knowledge substrate over one SQLite connection.
pub struct Substrate {
    conn: Connection,
    config: SubstrateConfig,
}

impl Substrate {
    /// Opens (and migrates) a file-backed store.
    pub fn open(path: impl AsRef<Path>, config: SubstrateConfig) -> SubstrateResult<Self> {
        config.validate()?;
        let conn = open_db(path)?;
        Ok(Self { conn, config })
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory(config: SubstrateConfig) -> SubstrateResult<Self> {
        config.validate()?;
        let conn = open_db_in_memory()?;
        Ok(Self { conn, config })
    }

    /// Wraps a connection that was opened through `open_db*`.
    pub fn from_connection(conn: Connection, config: SubstrateConfig) -> SubstrateResult<Self> {
        config.validate()?;
        ensure_connection_ready(&conn)?;
        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // Geometric foundation.

    /// Builds atom geometry for `symbols` and seals the store.
    ///
    /// # Errors
    /// - `Construction` when the store is already sealed or the alphabet is
    ///   empty, unbounded or contains duplicates.
    pub fn seed_alphabet(&self, symbols: impl IntoIterator<Item = u32>) -> SubstrateResult<u64> {
        let atoms = self.atoms()?;
        if let Some(atom_count) = atoms.sealed_atom_count()? {
            warn!(
                "event=alphabet_seed module=service status=rejected atom_count={}",
                atom_count
            );
            return Err(SubstrateError::Construction(GeometryError::AlreadySealed {
                atom_count,
            }));
        }
        let alphabet = Alphabet::build(symbols)?;
        Ok(atoms.seed_alphabet(&alphabet)?)
    }

    pub fn is_sealed(&self) -> SubstrateResult<bool> {
        Ok(self.atoms()?.sealed_atom_count()?.is_some())
    }

    pub fn atom_for_symbol(&self, symbol_id: u32) -> SubstrateResult<Option<AtomRecord>> {
        Ok(self.atoms()?.get_by_symbol(symbol_id)?)
    }

    /// Maps symbols to atom hashes, rejecting symbols outside the alphabet.
    pub fn atom_hashes_for(
        &self,
        symbols: impl IntoIterator<Item = u32>,
    ) -> SubstrateResult<Vec<ContentHash>> {
        let atoms = self.atoms()?;
        symbols
            .into_iter()
            .map(|symbol| {
                atoms
                    .get_by_symbol(symbol)?
                    .map(|atom| atom.content_hash)
                    .ok_or_else(|| {
                        SubstrateError::InvalidInput(format!(
                            "symbol {symbol:#x} is not in the alphabet"
                        ))
                    })
            })
            .collect()
    }

    // Deduplication store.

    /// Interns into layer `1` (compositions) or `2` (relations).
    ///
    /// Returns the row hash and whether this call created it.
    pub fn intern_sequence(
        &self,
        layer: u8,
        children: &[ContentHash],
    ) -> SubstrateResult<(ContentHash, bool)> {
        let layer = LayerKind::from_level(layer).ok_or_else(|| {
            SubstrateError::InvalidInput(format!("layer must be 1 or 2, got {layer}"))
        })?;
        let outcome = self.intern(layer, children)?;
        Ok((outcome.content_hash, outcome.is_new))
    }

    pub fn intern(
        &self,
        layer: LayerKind,
        children: &[ContentHash],
    ) -> SubstrateResult<InternOutcome> {
        let outcome = match layer {
            LayerKind::Composition => {
                SqliteCompositionRepository::try_new(&self.conn)?.intern(children)?
            }
            LayerKind::Relation => {
                SqliteRelationRepository::try_new(&self.conn)?.intern(children)?
            }
        };
        Ok(outcome)
    }

    /// Looks a hash up across atoms, compositions and relations.
    pub fn query_by_hash(&self, content_hash: &ContentHash) -> SubstrateResult<Option<StoredRow>> {
        if let Some(atom) = self.atoms()?.get_by_hash(content_hash)? {
            return Ok(Some(StoredRow::Atom(atom)));
        }
        if let Some(record) = SqliteCompositionRepository::try_new(&self.conn)?.get(content_hash)? {
            return Ok(Some(StoredRow::Sequence(record)));
        }
        let relation = SqliteRelationRepository::try_new(&self.conn)?.get(content_hash)?;
        Ok(relation.map(StoredRow::Sequence))
    }

    /// Deletes one row by hash.
    ///
    /// # Errors
    /// - `InvariantViolation` for atoms and compositions, and for relations
    ///   that still have evidence.
    ///
    /// Returns `false` when the relation does not exist.
    pub fn delete_row(&self, kind: RowKind, content_hash: &ContentHash) -> SubstrateResult<bool> {
        match kind {
            RowKind::Atom => Err(SubstrateError::InvariantViolation(
                "atoms are sealed and cannot be deleted".to_string(),
            )),
            RowKind::Composition => Err(SubstrateError::InvariantViolation(
                "compositions are permanent and cannot be deleted".to_string(),
            )),
            RowKind::Relation => Ok(self.ratings()?.delete_relation(content_hash)?),
        }
    }

    // Provenance and ratings.

    /// Registers one ingestion event.
    pub fn create_content_record(
        &self,
        source_kind: &str,
        source_identifier: &str,
        content_hash: ContentHash,
    ) -> SubstrateResult<ContentRecordId> {
        let record = SqliteContentRepository::try_new(&self.conn)?.create_content_record(
            &NewContentRecord::new(source_kind, source_identifier, content_hash),
        )?;
        Ok(record.id)
    }

    pub fn get_content_record(&self, id: ContentRecordId) -> SubstrateResult<Option<ContentRecord>> {
        Ok(SqliteContentRepository::try_new(&self.conn)?.get_content_record(id)?)
    }

    /// Checks `payload` against the hash stored at ingestion.
    ///
    /// Returns `None` when the record does not exist.
    pub fn verify_content(
        &self,
        id: ContentRecordId,
        payload: &[u8],
    ) -> SubstrateResult<Option<bool>> {
        Ok(self
            .get_content_record(id)?
            .map(|record| record.content_hash == ContentHash::of_payload(payload)))
    }

    /// Appends evidence and returns the recomputed rating.
    pub fn ingest_evidence(
        &self,
        relation_hash: ContentHash,
        content_record_id: ContentRecordId,
        weight: f64,
        position: &str,
    ) -> SubstrateResult<Rating> {
        Ok(self
            .ratings()?
            .ingest_evidence(relation_hash, content_record_id, weight, position)?)
    }

    /// Replays one relation's evidence. `None` when the relation is unknown.
    pub fn recompute_rating(
        &self,
        relation_hash: &ContentHash,
    ) -> SubstrateResult<Option<RatingUpdate>> {
        Ok(self.ratings()?.recompute_rating(relation_hash)?)
    }

    /// Removes a content record with its evidence; `None` when unknown.
    pub fn retract_content(
        &self,
        id: ContentRecordId,
    ) -> SubstrateResult<Option<RetractionReport>> {
        Ok(self.ratings()?.retract_content(id)?)
    }

    pub fn evidence_for(&self, relation_hash: &ContentHash) -> SubstrateResult<Vec<Evidence>> {
        Ok(self.ratings()?.evidence_for(relation_hash)?)
    }

    pub fn rating_for(&self, relation_hash: &ContentHash) -> SubstrateResult<Option<Rating>> {
        Ok(self.ratings()?.rating_for(relation_hash)?)
    }

    // Spatial queries.

    pub fn range_query(
        &self,
        target: SpatialTarget,
        center: &SphereCoord,
        radius: f64,
    ) -> SubstrateResult<Vec<SpatialHit>> {
        Ok(spatial::range_query(
            &self.conn,
            target,
            center,
            radius,
            &self.config.spatial,
        )?)
    }

    pub fn nearest(
        &self,
        target: SpatialTarget,
        coord: &SphereCoord,
        k: usize,
        budget: &QueryBudget,
    ) -> SubstrateResult<NearestHits> {
        Ok(spatial::nearest(
            &self.conn,
            target,
            coord,
            k,
            budget,
            &self.config.spatial,
        )?)
    }

    /// Gap scan using the configured tolerance.
    pub fn detect_index_gaps(
        &self,
        target: SpatialTarget,
        range: IndexRange,
    ) -> SubstrateResult<Vec<IndexGap>> {
        Ok(spatial::detect_index_gaps(
            &self.conn,
            target,
            range,
            self.config.spatial.gap_tolerance,
        )?)
    }

    pub fn stats(&self) -> SubstrateResult<SubstrateStats> {
        let stats = SubstrateStats {
            atoms: count_rows(&self.conn, "atoms")?,
            compositions: count_rows(&self.conn, "compositions")?,
            relations: count_rows(&self.conn, "relations")?,
            content_records: count_rows(&self.conn, "content_records")?,
            evidence: count_rows(&self.conn, "evidence")?,
            ratings: count_rows(&self.conn, "ratings")?,
        };
        info!(
            "event=substrate_stats module=service status=ok atoms={} compositions={} relations={} evidence={}",
            stats.atoms, stats.compositions, stats.relations, stats.evidence
        );
        Ok(stats)
    }

    fn atoms(&self) -> SubstrateResult<SqliteAtomRepository<'_>> {
        Ok(SqliteAtomRepository::try_new(&self.conn)?)
    }

    fn ratings(&self) -> SubstrateResult<RatingService<SqliteRatingRepository<'_>>> {
        let repo = SqliteRatingRepository::try_new(&self.conn, self.config.rating)?;
        Ok(RatingService::new(repo))
    }
}

#[cfg(test)]
mod tests {
    use super::{RowKind, StoredRow, Substrate, SubstrateError};
    use crate::config::SubstrateConfig;
    use crate::geometry::GeometryError;
    use crate::model::hash::ContentHash;

    fn seeded() -> Substrate {
        let substrate = Substrate::open_in_memory(SubstrateConfig::default()).expect("open");
        substrate
            .seed_alphabet("abc".chars().map(u32::from))
            .expect("seed");
        substrate
    }

    #[test]
    fn intern_sequence_rejects_unknown_layers() {
        let substrate = seeded();
        let a = substrate.atom_hashes_for(['a' as u32]).expect("atoms");

        assert!(matches!(
            substrate.intern_sequence(0, &a),
            Err(SubstrateError::InvalidInput(_))
        ));
        assert!(matches!(
            substrate.intern_sequence(3, &a),
            Err(SubstrateError::InvalidInput(_))
        ));
        let (hash, is_new) = substrate.intern_sequence(1, &a).expect("intern");
        assert!(is_new);
        assert!(matches!(
            substrate.query_by_hash(&hash).expect("query"),
            Some(StoredRow::Sequence(_))
        ));
    }

    #[test]
    fn second_seed_is_a_construction_error() {
        let substrate = seeded();
        assert!(substrate.is_sealed().expect("sealed"));
        assert!(matches!(
            substrate.seed_alphabet([1u32]),
            Err(SubstrateError::Construction(GeometryError::AlreadySealed {
                atom_count: 3
            }))
        ));
    }

    #[test]
    fn atoms_and_compositions_cannot_be_deleted() {
        let substrate = seeded();
        let atoms = substrate.atom_hashes_for(['a' as u32, 'b' as u32]).expect("atoms");
        let (composition, _) = substrate.intern_sequence(1, &atoms).expect("intern");

        assert!(matches!(
            substrate.delete_row(RowKind::Atom, &atoms[0]),
            Err(SubstrateError::InvariantViolation(_))
        ));
        assert!(matches!(
            substrate.delete_row(RowKind::Composition, &composition),
            Err(SubstrateError::InvariantViolation(_))
        ));
        assert!(!substrate
            .delete_row(RowKind::Relation, &ContentHash::of_payload(b"none"))
            .expect("delete"));
    }

    #[test]
    fn symbols_outside_alphabet_are_rejected() {
        let substrate = seeded();
        assert!(matches!(
            substrate.atom_hashes_for("az".chars().map(u32::from)),
            Err(SubstrateError::InvalidInput(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected_on_open() {
        let mut config = SubstrateConfig::default();
        config.rating.k0 = -1.0;
        assert!(matches!(
            Substrate::open_in_memory(config),
            Err(SubstrateError::Config(_))
        ));
    }
}
