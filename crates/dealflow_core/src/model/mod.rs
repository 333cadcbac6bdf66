//! Pipeline domain model.
//!
//! # Responsibility
//! - Define the stage registry and the canonical deal record.
//! - Keep stage-owned invariants next to the data they constrain.
//!
//! # Invariants
//! - Every deal is identified by a stable `DealId`.
//! - A deal's stage is always a registry stage.

pub mod deal;
pub mod stage;
