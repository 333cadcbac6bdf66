//! Deal pipeline engine for the ISP CRM.
//! This crate is the single source of truth for pipeline business invariants.

pub mod config;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod sync;

pub use config::{ConfigError, EngineConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
pub use model::deal::{
    normalize_tags, Deal, DealDraft, DealId, DealValidationError, MAX_DEAL_VALUE,
};
pub use model::stage::{default_probability, descriptors, Stage, StageDescriptor, UnknownStage};
pub use pipeline::aggregate::{
    aggregate, aggregate_filtered, board_columns, BoardColumn, DealFilter, PipelineStats,
    PipelineTotals, StageTotals,
};
pub use pipeline::transition::{
    validate_stage_transition, validate_transition, DealPatch, TransitionError,
    TransitionOverrides,
};
pub use service::deal_service::{DealService, DealServiceError, ServiceResult};
pub use store::deal_store::{DealStore, SnapshotId, StageChange, StoreError, StoreResult};
pub use sync::backend::{
    deal_path, decode_deal, decode_deal_list, encode_patch, DealBackend, DealQuery,
    PersistenceError, PersistenceResult, DEALS_PATH,
};
pub use sync::move_sync::{
    CommittedMove, MoveError, MoveState, MoveSynchronizer, MoveTicket, PendingMove,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
