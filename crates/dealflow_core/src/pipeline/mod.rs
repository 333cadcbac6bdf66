//! Pipeline rules and derived figures.
//!
//! # Responsibility
//! - Validate stage transitions and derive their patches.
//! - Aggregate deal collections into board and dashboard statistics.
//!
//! # Invariants
//! - Everything in this module is pure; no store or backend access.

pub mod aggregate;
pub mod transition;
