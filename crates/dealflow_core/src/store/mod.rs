//! Local deal state.
//!
//! # Responsibility
//! - Own the in-memory deal collection read by board and dashboards.
//! - Expose one patch-based mutation path with rollback support.

pub mod deal_store;
