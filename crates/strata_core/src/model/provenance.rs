//! Provenance records: ingestion events and the evidence they produced.
//!
//! # Responsibility
//! - Define content records (retraction roots) and evidence rows.
//! - Validate caller-supplied provenance metadata before persistence.
//!
//! # Invariants
//! - `ContentRecord` rows are immutable after creation.
//! - `source_kind` is a lowercase identifier (`[a-z][a-z0-9_.-]*`).
//! - Evidence weights are finite.

use crate::model::hash::ContentHash;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of one ingestion event.
pub type ContentRecordId = Uuid;

const MAX_SOURCE_KIND_CHARS: usize = 64;
const MAX_SOURCE_IDENTIFIER_CHARS: usize = 1024;
const MAX_POSITION_CHARS: usize = 512;

static SOURCE_KIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.\-]*$").expect("valid source kind regex"));

/// One ingestion event (a document, a model file, a prompt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentRecordId,
    /// Category of source, e.g. `text`, `model.weights`.
    pub source_kind: String,
    /// Caller-defined locator for the source (path, URL, prompt id).
    pub source_identifier: String,
    /// Hash of the raw ingested payload.
    pub content_hash: ContentHash,
    /// Epoch milliseconds.
    pub ingestion_timestamp: i64,
}

/// Input for creating a content record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContentRecord {
    pub source_kind: String,
    pub source_identifier: String,
    pub content_hash: ContentHash,
}

impl NewContentRecord {
    pub fn new(
        source_kind: impl Into<String>,
        source_identifier: impl Into<String>,
        content_hash: ContentHash,
    ) -> Self {
        Self {
            source_kind: source_kind.into(),
            source_identifier: source_identifier.into(),
            content_hash,
        }
    }

    pub fn validate(&self) -> Result<(), ProvenanceValidationError> {
        let kind = self.source_kind.as_str();
        if kind.chars().count() > MAX_SOURCE_KIND_CHARS || !SOURCE_KIND_RE.is_match(kind) {
            return Err(ProvenanceValidationError::InvalidSourceKind(
                self.source_kind.clone(),
            ));
        }
        let identifier = self.source_identifier.trim();
        if identifier.is_empty() {
            return Err(ProvenanceValidationError::EmptySourceIdentifier);
        }
        if identifier.chars().count() > MAX_SOURCE_IDENTIFIER_CHARS {
            return Err(ProvenanceValidationError::FieldTooLong {
                field: "source_identifier",
                max_chars: MAX_SOURCE_IDENTIFIER_CHARS,
            });
        }
        Ok(())
    }
}

/// One observation of a relation inside one content record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Insertion order key.
    pub evidence_id: i64,
    pub relation_hash: ContentHash,
    pub content_record_id: ContentRecordId,
    /// Source confidence or occurrence count within the source.
    pub weight: f64,
    /// Locator within the source, for auditability.
    pub position: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Input for recording evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvidence {
    pub relation_hash: ContentHash,
    pub content_record_id: ContentRecordId,
    pub weight: f64,
    pub position: String,
}

impl NewEvidence {
    pub fn validate(&self) -> Result<(), ProvenanceValidationError> {
        if !self.weight.is_finite() {
            return Err(ProvenanceValidationError::NonFiniteWeight);
        }
        if self.position.chars().count() > MAX_POSITION_CHARS {
            return Err(ProvenanceValidationError::FieldTooLong {
                field: "position",
                max_chars: MAX_POSITION_CHARS,
            });
        }
        Ok(())
    }
}

/// Rejected provenance input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvenanceValidationError {
    InvalidSourceKind(String),
    EmptySourceIdentifier,
    NonFiniteWeight,
    FieldTooLong {
        field: &'static str,
        max_chars: usize,
    },
}

impl Display for ProvenanceValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSourceKind(value) => write!(
                f,
                "invalid source_kind `{value}`; expected lowercase identifier [a-z][a-z0-9_.-]*"
            ),
            Self::EmptySourceIdentifier => write!(f, "source_identifier cannot be empty"),
            Self::NonFiniteWeight => write!(f, "evidence weight must be finite"),
            Self::FieldTooLong { field, max_chars } => {
                write!(f, "`{field}` exceeds {max_chars} characters")
            }
        }
    }
}

impl Error for ProvenanceValidationError {}
