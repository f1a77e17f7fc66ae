//! Atom repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the alphabet exactly once and mark the store sealed.
//! - Resolve atoms by symbol or content hash.
//!
//! # Invariants
//! - Seeding is all-or-nothing: either every atom plus the seal marker
//!   commits, or nothing does.
//! - A sealed store rejects any further seeding attempt.
//! - Atom rows are never updated or deleted (enforced by SQL triggers).

use crate::db::{ensure_connection_ready, DbError};
use crate::geometry::{Alphabet, GeometryError};
use crate::model::atom::AtomRecord;
use crate::model::hash::ContentHash;
use crate::repo::{coord_from_row, spatial_index_from_row, with_conflict_retry, LockConflict};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const SEAL_KEY: &str = "alphabet_sealed_atoms";

pub type AtomRepoResult<T> = Result<T, AtomRepoError>;

/// Errors from atom repository operations.
#[derive(Debug)]
pub enum AtomRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Alphabet could not be seeded (e.g. already sealed).
    Construction(GeometryError),
    /// Persisted data cannot be converted to a valid atom.
    InvalidData(String),
}

impl Display for AtomRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Construction(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid atom data: {message}"),
        }
    }
}

impl Error for AtomRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Construction(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for AtomRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for AtomRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl LockConflict for AtomRepoError {
    fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_lock_conflict())
    }
}

/// Repository interface for the sealed alphabet.
pub trait AtomRepository {
    /// Writes every atom of `alphabet` and seals the store.
    ///
    /// Returns the number of atoms written.
    fn seed_alphabet(&self, alphabet: &Alphabet) -> AtomRepoResult<u64>;
    /// Atom count recorded at sealing time, `None` while unsealed.
    fn sealed_atom_count(&self) -> AtomRepoResult<Option<u64>>;
    fn get_by_symbol(&self, symbol_id: u32) -> AtomRepoResult<Option<AtomRecord>>;
    fn get_by_hash(&self, content_hash: &ContentHash) -> AtomRepoResult<Option<AtomRecord>>;
}

/// SQLite-backed atom repository.
pub struct SqliteAtomRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAtomRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> AtomRepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn seed_once(&self, alphabet: &Alphabet) -> AtomRepoResult<u64> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if let Some(atom_count) = read_seal(&tx)? {
            return Err(AtomRepoError::Construction(GeometryError::AlreadySealed {
                atom_count,
            }));
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO atoms (
                    symbol_id,
                    content_hash,
                    coord_x,
                    coord_y,
                    coord_z,
                    coord_w,
                    spatial_index
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )?;
            for atom in alphabet.atoms() {
                let coord = atom.sphere_coord;
                stmt.execute(params![
                    atom.symbol_id,
                    atom.content_hash,
                    coord.x,
                    coord.y,
                    coord.z,
                    coord.w,
                    atom.spatial_index.to_sql_value(),
                ])?;
            }
        }

        let atom_count = alphabet.len() as u64;
        tx.execute(
            "INSERT INTO substrate_meta (key, value) VALUES (?1, ?2);",
            params![SEAL_KEY, atom_count.to_string()],
        )?;
        tx.commit()?;
        Ok(atom_count)
    }
}

impl AtomRepository for SqliteAtomRepository<'_> {
    fn seed_alphabet(&self, alphabet: &Alphabet) -> AtomRepoResult<u64> {
        let started_at = Instant::now();
        let result = with_conflict_retry("seed_alphabet", || self.seed_once(alphabet));
        match &result {
            Ok(atom_count) => info!(
                "event=alphabet_seed module=repo status=ok atom_count={} duration_ms={}",
                atom_count,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!("event=alphabet_seed module=repo status=error error={}", err),
        }
        result
    }

    fn sealed_atom_count(&self) -> AtomRepoResult<Option<u64>> {
        read_seal(self.conn)
    }

    fn get_by_symbol(&self, symbol_id: u32) -> AtomRepoResult<Option<AtomRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT symbol_id, content_hash, coord_x, coord_y, coord_z, coord_w, spatial_index
                 FROM atoms
                 WHERE symbol_id = ?1;",
                [symbol_id],
                |row| Ok(parse_atom_row(row)),
            )
            .optional()?;
        row.transpose()
    }

    fn get_by_hash(&self, content_hash: &ContentHash) -> AtomRepoResult<Option<AtomRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT symbol_id, content_hash, coord_x, coord_y, coord_z, coord_w, spatial_index
                 FROM atoms
                 WHERE content_hash = ?1;",
                [content_hash],
                |row| Ok(parse_atom_row(row)),
            )
            .optional()?;
        row.transpose()
    }
}

fn read_seal(conn: &Connection) -> AtomRepoResult<Option<u64>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM substrate_meta WHERE key = ?1;",
            [SEAL_KEY],
            |row| row.get(0),
        )
        .optional()?;
    value
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| AtomRepoError::InvalidData(format!("invalid seal marker `{raw}`")))
        })
        .transpose()
}

fn parse_atom_row(row: &Row<'_>) -> AtomRepoResult<AtomRecord> {
    let symbol_id: u32 = row.get("symbol_id")?;
    let content_hash: ContentHash = row.get("content_hash")?;
    let sphere_coord = coord_from_row(row)?;
    let spatial_index = spatial_index_from_row(row).map_err(AtomRepoError::InvalidData)?;
    Ok(AtomRecord {
        symbol_id,
        content_hash,
        sphere_coord,
        spatial_index,
    })
}

#[cfg(test)]
mod tests {
    use super::{AtomRepoError, AtomRepository, SqliteAtomRepository};
    use crate::db::open_db_in_memory;
    use crate::geometry::{Alphabet, GeometryError};
    use crate::model::hash::ContentHash;

    #[test]
    fn seed_then_lookup_by_symbol_and_hash() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteAtomRepository::try_new(&conn).expect("repo");
        let alphabet = Alphabet::build("abc".chars().map(u32::from)).expect("alphabet");

        assert_eq!(repo.sealed_atom_count().expect("seal"), None);
        assert_eq!(repo.seed_alphabet(&alphabet).expect("seed"), 3);
        assert_eq!(repo.sealed_atom_count().expect("seal"), Some(3));

        let by_symbol = repo.get_by_symbol('b' as u32).expect("query").expect("atom");
        let by_hash = repo
            .get_by_hash(&ContentHash::of_symbol('b' as u32))
            .expect("query")
            .expect("atom");
        assert_eq!(by_symbol, by_hash);
        assert!(alphabet.atoms().contains(&by_symbol));
        assert!(repo.get_by_symbol('z' as u32).expect("query").is_none());
    }

    #[test]
    fn reseeding_is_rejected_and_keeps_atoms() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteAtomRepository::try_new(&conn).expect("repo");
        let first = Alphabet::build([1u32, 2]).expect("alphabet");
        let second = Alphabet::build([3u32]).expect("alphabet");
        repo.seed_alphabet(&first).expect("seed");

        let err = repo.seed_alphabet(&second).expect_err("must reject");
        assert!(matches!(
            err,
            AtomRepoError::Construction(GeometryError::AlreadySealed { atom_count: 2 })
        ));
        assert!(repo.get_by_symbol(3).expect("query").is_none());
    }

    #[test]
    fn atom_rows_cannot_be_modified() {
        let conn = open_db_in_memory().expect("open db");
        let repo = SqliteAtomRepository::try_new(&conn).expect("repo");
        let alphabet = Alphabet::build([7u32]).expect("alphabet");
        repo.seed_alphabet(&alphabet).expect("seed");

        assert!(conn.execute("DELETE FROM atoms;", []).is_err());
        assert!(conn.execute("UPDATE atoms SET coord_x = 0.0;", []).is_err());
    }
}
