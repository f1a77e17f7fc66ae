//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Keep host callers decoupled from storage details.

pub mod rating_service;
pub mod substrate;
