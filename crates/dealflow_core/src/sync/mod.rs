//! Backend synchronization for pipeline moves.
//!
//! # Responsibility
//! - Define the persistence collaborator contract (`GET`/`PUT /deals`).
//! - Coordinate optimistic moves against that collaborator.
//!
//! # Invariants
//! - The local store never stays in an optimistic state after a failure.

pub mod backend;
pub mod move_sync;
