//! Content-addressable hierarchical knowledge substrate.
//!
//! Symbols of a fixed alphabet become atoms with fixed positions on the unit
//! 3-sphere; ordered atom sequences are interned as compositions, ordered
//! composition sequences as relations. Relations collect weighted evidence
//! per ingestion event and carry a rating replayed from that evidence. Every
//! interned row is indexed by a Hilbert key for spatial queries.

pub mod config;
pub mod db;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use config::{ConfigError, RatingConfig, SpatialConfig, SubstrateConfig};
pub use geometry::{
    unicode_scalar_alphabet, Alphabet, GeometryError, IndexCell, IndexRange, SpatialIndex,
    SphereCoord,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::atom::AtomRecord;
pub use model::hash::{ContentHash, HashDomain};
pub use model::provenance::{ContentRecord, ContentRecordId, Evidence};
pub use model::rating::Rating;
pub use model::sequence::{InternOutcome, LayerKind, SequenceRecord};
pub use repo::rating_repo::{RatingUpdate, RetractionReport};
pub use search::spatial::{IndexGap, NearestHits, QueryBudget, SpatialHit, SpatialTarget};
pub use service::substrate::{
    RowKind, StoredRow, Substrate, SubstrateError, SubstrateResult, SubstrateStats,
};

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
