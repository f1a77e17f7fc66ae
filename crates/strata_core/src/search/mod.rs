//! Spatial query entry points.
//!
//! # Responsibility
//! - Expose range, nearest-neighbour and gap queries over stored layers.
//! - Keep hit shaping and ordering inside core.

pub mod spatial;
