//! Content record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Create and load ingestion events (content records).
//!
//! # Invariants
//! - Records are immutable once created; removal happens only through
//!   retraction, which cascades to their evidence.
//! - Input is validated before any SQL runs.

use crate::db::{ensure_connection_ready, DbError};
use crate::model::hash::ContentHash;
use crate::model::provenance::{
    ContentRecord, ContentRecordId, NewContentRecord, ProvenanceValidationError,
};
use crate::repo::{count_rows, with_conflict_retry, LockConflict};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type ContentRepoResult<T> = Result<T, ContentRepoError>;

/// Errors from content record repository operations.
#[derive(Debug)]
pub enum ContentRepoError {
    /// Input failed provenance validation.
    Validation(ProvenanceValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for ContentRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid content record data: {message}"),
        }
    }
}

impl Error for ContentRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<ProvenanceValidationError> for ContentRepoError {
    fn from(value: ProvenanceValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for ContentRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ContentRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl LockConflict for ContentRepoError {
    fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_lock_conflict())
    }
}

/// Repository interface for content records.
pub trait ContentRepository {
    fn create_content_record(&self, record: &NewContentRecord)
        -> ContentRepoResult<ContentRecord>;
    fn get_content_record(&self, id: ContentRecordId) -> ContentRepoResult<Option<ContentRecord>>;
    fn count(&self) -> ContentRepoResult<u64>;
}

/// SQLite-backed content record repository.
pub struct SqliteContentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContentRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> ContentRepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl ContentRepository for SqliteContentRepository<'_> {
    fn create_content_record(
        &self,
        record: &NewContentRecord,
    ) -> ContentRepoResult<ContentRecord> {
        record.validate()?;
        let id = Uuid::new_v4();
        with_conflict_retry("create_content_record", || {
            self.conn
                .execute(
                    "INSERT INTO content_records (
                        record_uuid,
                        source_kind,
                        source_identifier,
                        content_hash
                    ) VALUES (?1, ?2, ?3, ?4);",
                    params![
                        id.to_string(),
                        record.source_kind,
                        record.source_identifier.trim(),
                        record.content_hash,
                    ],
                )
                .map_err(ContentRepoError::from)
        })?;

        self.get_content_record(id)?.ok_or_else(|| {
            ContentRepoError::InvalidData(format!("content record {id} vanished after insert"))
        })
    }

    fn get_content_record(&self, id: ContentRecordId) -> ContentRepoResult<Option<ContentRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT
                    record_uuid,
                    source_kind,
                    source_identifier,
                    content_hash,
                    ingestion_timestamp
                 FROM content_records
                 WHERE record_uuid = ?1;",
                [id.to_string()],
                |row| Ok(parse_content_record_row(row)),
            )
            .optional()?;
        row.transpose()
    }

    fn count(&self) -> ContentRepoResult<u64> {
        Ok(count_rows(self.conn, "content_records")?)
    }
}

fn parse_content_record_row(row: &Row<'_>) -> ContentRepoResult<ContentRecord> {
    let raw_id: String = row.get("record_uuid")?;
    let id = Uuid::parse_str(&raw_id).map_err(|err| {
        ContentRepoError::InvalidData(format!("invalid record_uuid `{raw_id}`: {err}"))
    })?;
    let content_hash: ContentHash = row.get("content_hash")?;
    Ok(ContentRecord {
        id,
        source_kind: row.get("source_kind")?,
        source_identifier: row.get("source_identifier")?,
        content_hash,
        ingestion_timestamp: row.get("ingestion_timestamp")?,
    })
}

#[cfg(test)]
mod tests {
    use super::{ContentRepoError, ContentRepository, SqliteContentRepository};
    use crate::db::open_db_in_memory;
    use crate::model::hash::ContentHash;
    use crate::model::provenance::{NewContentRecord, ProvenanceValidationError};
    use uuid::Uuid;

    #[test]
    fn create_and_load_content_record() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteContentRepository::try_new(&conn).expect("repo");
        let payload_hash = ContentHash::of_payload(b"Call me Ishmael.");

        let created = repo
            .create_content_record(&NewContentRecord::new("text", " moby-dick/ch1 ", payload_hash))
            .expect("create");
        assert_eq!(created.source_identifier, "moby-dick/ch1");
        assert_eq!(created.content_hash, payload_hash);
        assert!(created.ingestion_timestamp > 0);

        let loaded = repo
            .get_content_record(created.id)
            .expect("query")
            .expect("row");
        assert_eq!(loaded, created);
        assert!(repo
            .get_content_record(Uuid::new_v4())
            .expect("query")
            .is_none());
    }

    #[test]
    fn invalid_source_kind_is_rejected_before_insert() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteContentRepository::try_new(&conn).expect("repo");

        let err = repo
            .create_content_record(&NewContentRecord::new(
                "Text File",
                "doc",
                ContentHash::of_payload(b"x"),
            ))
            .expect_err("must reject");
        assert!(matches!(
            err,
            ContentRepoError::Validation(ProvenanceValidationError::InvalidSourceKind(_))
        ));
        assert_eq!(repo.count().expect("count"), 0);
    }
}
