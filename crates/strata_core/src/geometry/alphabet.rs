//! Alphabet enumeration and one-time atom construction.
//!
//! # Responsibility
//! - Validate that an alphabet is finite, non-empty and duplicate-free.
//! - Assign every symbol its hash, lattice coordinate and spatial index.
//!
//! # Invariants
//! - Coordinates depend on the whole alphabet (hash rank), so an alphabet is
//!   built exactly once and never extended.
//! - Two distinct symbols never share a lattice point.

use super::hilbert::SpatialIndex;
use super::sphere::lattice_point;
use crate::model::atom::AtomRecord;
use crate::model::hash::ContentHash;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Upper bound on alphabet size. Anything larger is treated as unbounded.
pub const MAX_ALPHABET_SIZE: usize = 1 << 21;

/// Number of Unicode scalar values (code points minus surrogates).
pub const UNICODE_SCALAR_COUNT: usize = 0x11_0000 - 0x800;

pub type GeometryResult<T> = Result<T, GeometryError>;

/// Fatal construction errors for the geometric foundation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// No symbols were supplied.
    EmptyAlphabet,
    /// The symbol source did not terminate within `MAX_ALPHABET_SIZE`.
    NotFinite { limit: usize },
    /// A symbol appeared more than once.
    DuplicateSymbol(u32),
    /// The store already holds a sealed alphabet.
    AlreadySealed { atom_count: u64 },
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyAlphabet => write!(f, "alphabet is empty"),
            Self::NotFinite { limit } => {
                write!(f, "alphabet is not finite: more than {limit} symbols")
            }
            Self::DuplicateSymbol(symbol) => write!(f, "duplicate alphabet symbol {symbol:#x}"),
            Self::AlreadySealed { atom_count } => write!(
                f,
                "alphabet already sealed with {atom_count} atoms; re-seeding is not allowed"
            ),
        }
    }
}

impl Error for GeometryError {}

/// Every Unicode scalar value, in code point order.
pub fn unicode_scalar_alphabet() -> impl Iterator<Item = u32> {
    (0u32..0xD800).chain(0xE000..0x11_0000)
}

/// A validated, immutable alphabet with derived atom geometry.
#[derive(Debug, Clone)]
pub struct Alphabet {
    atoms: Vec<AtomRecord>,
}

impl Alphabet {
    /// Builds atom geometry for the given symbols.
    ///
    /// # Errors
    /// - `EmptyAlphabet` when `symbols` yields nothing.
    /// - `NotFinite` when `symbols` yields more than `MAX_ALPHABET_SIZE`.
    /// - `DuplicateSymbol` when a symbol repeats.
    pub fn build(symbols: impl IntoIterator<Item = u32>) -> GeometryResult<Self> {
        let symbols: Vec<u32> = symbols.into_iter().take(MAX_ALPHABET_SIZE + 1).collect();
        if symbols.len() > MAX_ALPHABET_SIZE {
            return Err(GeometryError::NotFinite {
                limit: MAX_ALPHABET_SIZE,
            });
        }
        if symbols.is_empty() {
            return Err(GeometryError::EmptyAlphabet);
        }

        let mut seen = HashSet::with_capacity(symbols.len());
        let mut hashed = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if !seen.insert(symbol) {
                return Err(GeometryError::DuplicateSymbol(symbol));
            }
            hashed.push((ContentHash::of_symbol(symbol), symbol));
        }

        hashed.sort_unstable();
        let count = hashed.len() as u64;
        let atoms = hashed
            .into_iter()
            .enumerate()
            .map(|(rank, (content_hash, symbol_id))| {
                let sphere_coord = lattice_point(rank as u64, count);
                AtomRecord {
                    symbol_id,
                    content_hash,
                    sphere_coord,
                    spatial_index: SpatialIndex::from_coord(&sphere_coord),
                }
            })
            .collect();

        Ok(Self { atoms })
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Atoms ordered by content hash (lattice rank).
    pub fn atoms(&self) -> &[AtomRecord] {
        &self.atoms
    }
}
