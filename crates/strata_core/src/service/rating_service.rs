//! Evidence and rating use-case service.
//!
//! # Responsibility
//! - Provide evidence ingestion, recompute and retraction entry points.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository validation/persistence contracts.
//! - Service layer remains storage-agnostic.

use crate::model::hash::ContentHash;
use crate::model::provenance::{ContentRecordId, Evidence, NewEvidence};
use crate::model::rating::Rating;
use crate::repo::rating_repo::{RatingRepoResult, RatingRepository, RatingUpdate, RetractionReport};

/// Use-case service wrapper for the evidence log and its ratings.
pub struct RatingService<R: RatingRepository> {
    repo: R,
}

impl<R: RatingRepository> RatingService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Records that `content_record_id` observed `relation_hash` once.
    ///
    /// # Contract
    /// - Relation and content record must already exist.
    /// - Returns the rating after the append.
    pub fn ingest_evidence(
        &self,
        relation_hash: ContentHash,
        content_record_id: ContentRecordId,
        weight: f64,
        position: impl Into<String>,
    ) -> RatingRepoResult<Rating> {
        self.repo.record_evidence(&NewEvidence {
            relation_hash,
            content_record_id,
            weight,
            position: position.into(),
        })
    }

    pub fn recompute_rating(
        &self,
        relation_hash: &ContentHash,
    ) -> RatingRepoResult<Option<RatingUpdate>> {
        self.repo.recompute_rating(relation_hash)
    }

    /// Retracts one content record. `None` when it does not exist.
    pub fn retract_content(
        &self,
        content_record_id: ContentRecordId,
    ) -> RatingRepoResult<Option<RetractionReport>> {
        self.repo.retract_content(content_record_id)
    }

    pub fn rating_for(&self, relation_hash: &ContentHash) -> RatingRepoResult<Option<Rating>> {
        self.repo.get_rating(relation_hash)
    }

    pub fn evidence_for(&self, relation_hash: &ContentHash) -> RatingRepoResult<Vec<Evidence>> {
        self.repo.list_evidence(relation_hash)
    }

    /// Deletes a relation without evidence. `false` when absent.
    pub fn delete_relation(&self, relation_hash: &ContentHash) -> RatingRepoResult<bool> {
        self.repo.delete_relation(relation_hash)
    }
}
