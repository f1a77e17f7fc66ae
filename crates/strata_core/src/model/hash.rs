//! Content-addressed identity shared by every substrate layer.
//!
//! # Responsibility
//! - Derive stable BLAKE3 identities for atoms, sequences and raw payloads.
//! - Keep each layer in its own hash domain.
//!
//! # Invariants
//! - The same ordered child sequence always yields the same hash, within a
//!   layer, independent of call order or concurrency.
//! - Hashes are exactly 32 bytes on disk.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Byte width of every content hash.
pub const HASH_LEN: usize = 32;

const ATOM_CONTEXT: &str = "strata substrate 2026-01 atom v1";
const COMPOSITION_CONTEXT: &str = "strata substrate 2026-01 composition v1";
const RELATION_CONTEXT: &str = "strata substrate 2026-01 relation v1";

/// Hash domains. Identical child bytes hashed in different domains never
/// collide with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashDomain {
    Atom,
    Composition,
    Relation,
}

impl HashDomain {
    fn context(self) -> &'static str {
        match self {
            Self::Atom => ATOM_CONTEXT,
            Self::Composition => COMPOSITION_CONTEXT,
            Self::Relation => RELATION_CONTEXT,
        }
    }
}

/// 256-bit BLAKE3 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash of one alphabet symbol.
    pub fn of_symbol(symbol_id: u32) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(HashDomain::Atom.context());
        hasher.update(&symbol_id.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Hash of an ordered child-hash sequence in the given layer domain.
    pub fn of_sequence(domain: HashDomain, children: &[ContentHash]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(domain.context());
        hasher.update(&(children.len() as u64).to_le_bytes());
        for child in children {
            hasher.update(&child.0);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Plain hash of a raw ingested payload, used for verification only.
    pub fn of_payload(payload: &[u8]) -> Self {
        Self(*blake3::hash(payload).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, HashParseError> {
        let bytes = hex::decode(value.trim()).map_err(|_| HashParseError::InvalidHex)?;
        Self::try_from_slice(&bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, HashParseError> {
        let array: [u8; HASH_LEN] = bytes
            .try_into()
            .map_err(|_| HashParseError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Errors when parsing a [`ContentHash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashParseError {
    InvalidHex,
    InvalidLength(usize),
}

impl Display for HashParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidHex => write!(f, "invalid hex encoding"),
            Self::InvalidLength(len) => write!(f, "expected {HASH_LEN} bytes, got {len}"),
        }
    }
}

impl Error for HashParseError {}

impl ToSql for ContentHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for ContentHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = value.as_blob()?;
        Self::try_from_slice(bytes).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// Concatenates hashes into the on-disk `children` blob layout.
pub fn encode_hashes(hashes: &[ContentHash]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hashes.len() * HASH_LEN);
    for hash in hashes {
        out.extend_from_slice(&hash.0);
    }
    out
}

/// Splits a `children` blob back into hashes.
pub fn decode_hashes(bytes: &[u8]) -> Result<Vec<ContentHash>, HashParseError> {
    if bytes.len() % HASH_LEN != 0 {
        return Err(HashParseError::InvalidLength(bytes.len()));
    }
    bytes
        .chunks_exact(HASH_LEN)
        .map(ContentHash::try_from_slice)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{decode_hashes, encode_hashes, ContentHash, HashDomain, HashParseError};

    #[test]
    fn sequence_hash_depends_on_order_and_domain() {
        let a = ContentHash::of_symbol('a' as u32);
        let b = ContentHash::of_symbol('b' as u32);

        let ab = ContentHash::of_sequence(HashDomain::Composition, &[a, b]);
        let ba = ContentHash::of_sequence(HashDomain::Composition, &[b, a]);
        let ab_relation = ContentHash::of_sequence(HashDomain::Relation, &[a, b]);

        assert_ne!(ab, ba);
        assert_ne!(ab, ab_relation);
        assert_eq!(ab, ContentHash::of_sequence(HashDomain::Composition, &[a, b]));
    }

    #[test]
    fn hex_parse_rejects_wrong_length() {
        let err = ContentHash::from_hex("abcd").expect_err("short hash must fail");
        assert_eq!(err, HashParseError::InvalidLength(2));

        let hash = ContentHash::of_payload(b"payload");
        assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn children_blob_layout_is_concatenated_hashes() {
        let hashes = vec![ContentHash::of_symbol(1), ContentHash::of_symbol(2)];
        let blob = encode_hashes(&hashes);
        assert_eq!(blob.len(), 64);
        assert_eq!(decode_hashes(&blob).unwrap(), hashes);
        assert!(decode_hashes(&blob[..40]).is_err());
    }
}
