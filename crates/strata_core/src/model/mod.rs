//! Substrate domain model.
//!
//! # Responsibility
//! - Define the records stored by each layer (atoms, sequences, provenance).
//! - Keep pure derivations (hashing, rating projection) next to the data.
//!
//! # Invariants
//! - Every atom, composition and relation is identified by a `ContentHash`.
//! - Ratings are projections of evidence and are never edited directly.

pub mod atom;
pub mod hash;
pub mod provenance;
pub mod rating;
pub mod sequence;
