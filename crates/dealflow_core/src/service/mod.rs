//! Pipeline use-case services.
//!
//! # Responsibility
//! - Orchestrate store, validator and synchronizer into use-case APIs.
//! - Keep board/dashboard callers decoupled from transport details.

pub mod deal_service;
