//! Deal pipeline use-case service.
//!
//! # Responsibility
//! - Provide stable entry points for board and dashboard callers.
//! - Wire store, move synchronizer and backend behind one facade.
//!
//! # Invariants
//! - Service APIs never bypass the transition validator for stage changes.
//! - The service stays transport-agnostic; it only sees `DealBackend`.

use crate::config::EngineConfig;
use crate::model::deal::{Deal, DealDraft, DealId, DealValidationError};
use crate::pipeline::aggregate::{
    aggregate_filtered, board_columns, BoardColumn, DealFilter, PipelineStats,
};
use crate::pipeline::transition::TransitionOverrides;
use crate::store::deal_store::{DealStore, StageChange, StoreError};
use crate::sync::backend::{DealBackend, DealQuery, PersistenceError};
use crate::sync::move_sync::{
    CommittedMove, MoveError, MoveState, MoveSynchronizer, MoveTicket, PendingMove,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, DealServiceError>;

/// Service error for pipeline use-cases.
#[derive(Debug)]
pub enum DealServiceError {
    Validation(DealValidationError),
    Store(StoreError),
    Move(MoveError),
    /// Listing deals from the backend failed; local state unchanged.
    Refresh(PersistenceError),
}

impl Display for DealServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Move(err) => write!(f, "{err}"),
            Self::Refresh(err) => write!(f, "failed to load deals: {err}"),
        }
    }
}

impl Error for DealServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Move(err) => Some(err),
            Self::Refresh(err) => Some(err),
        }
    }
}

impl From<DealValidationError> for DealServiceError {
    fn from(value: DealValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for DealServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Validation(err) => Self::Validation(err),
            other => Self::Store(other),
        }
    }
}

impl From<MoveError> for DealServiceError {
    fn from(value: MoveError) -> Self {
        Self::Move(value)
    }
}

/// Pipeline facade over a backend implementation.
pub struct DealService<B: DealBackend> {
    backend: B,
    config: EngineConfig,
    store: DealStore,
    moves: MoveSynchronizer,
}

impl<B: DealBackend> DealService<B> {
    /// Creates a service with an empty store.
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            store: DealStore::new(),
            moves: MoveSynchronizer::new(),
        }
    }

    /// Reloads the store from `GET /deals`.
    ///
    /// Returns the number of loaded deals.
    pub fn refresh(&mut self, query: &DealQuery) -> ServiceResult<usize> {
        let deals = self
            .backend
            .fetch_deals(query)
            .map_err(DealServiceError::Refresh)?;
        self.store.replace_all(deals)?;
        info!(
            "event=deals_refreshed module=service status=ok count={}",
            self.store.len()
        );
        Ok(self.store.len())
    }

    /// Opens a new deal in `prospecting`.
    ///
    /// # Contract
    /// - Expected close date must not be before `today` unless the config
    ///   allows historical imports.
    pub fn create_deal(&mut self, draft: DealDraft, today: NaiveDate) -> ServiceResult<Deal> {
        let deal = Deal::new(draft)?;
        if !self.config.allow_past_expected_close {
            deal.ensure_expected_close_not_past(today)?;
        }
        self.store.insert(deal.clone())?;
        info!(
            "event=deal_created module=service status=ok deal_id={} stage={}",
            deal.id, deal.stage
        );
        Ok(deal)
    }

    pub fn deal(&self, id: DealId) -> Option<&Deal> {
        self.store.get(id)
    }

    /// All deals in board order.
    pub fn deals(&self) -> Vec<&Deal> {
        self.store.list()
    }

    /// Board columns for deals matching `filter`.
    pub fn board(&self, filter: &DealFilter) -> Vec<BoardColumn<'_>> {
        board_columns(self.store.list().into_iter().filter(|deal| filter.matches(deal)))
    }

    /// Pipeline statistics for deals matching `filter`.
    pub fn stats(&self, filter: &DealFilter) -> PipelineStats {
        aggregate_filtered(self.store.list(), filter)
    }

    pub fn history(&self, id: DealId) -> Vec<&StageChange> {
        self.store.history(id)
    }

    /// Moves a deal and waits for the backend, stamping terminal moves with
    /// the current time.
    pub fn move_deal(
        &mut self,
        id: DealId,
        target_key: &str,
        overrides: &TransitionOverrides,
    ) -> ServiceResult<CommittedMove> {
        self.move_deal_at(id, target_key, overrides, Utc::now())
    }

    /// Same as [`DealService::move_deal`] with an explicit clock reading.
    pub fn move_deal_at(
        &mut self,
        id: DealId,
        target_key: &str,
        overrides: &TransitionOverrides,
        now: DateTime<Utc>,
    ) -> ServiceResult<CommittedMove> {
        Ok(self
            .moves
            .move_deal(&mut self.store, &self.backend, id, target_key, overrides, now)?)
    }

    /// First half of an asynchronous move: validate and apply locally.
    ///
    /// The caller sends `PendingMove::patch` upstream and reports back via
    /// [`DealService::resolve_move`].
    pub fn begin_move(
        &mut self,
        id: DealId,
        target_key: &str,
        overrides: &TransitionOverrides,
        now: DateTime<Utc>,
    ) -> ServiceResult<PendingMove> {
        Ok(self
            .moves
            .begin_move(&mut self.store, id, target_key, overrides, now)?)
    }

    /// Second half of an asynchronous move: commit or roll back.
    pub fn resolve_move(
        &mut self,
        ticket: MoveTicket,
        result: Result<Deal, PersistenceError>,
    ) -> ServiceResult<CommittedMove> {
        Ok(self.moves.resolve(&mut self.store, ticket, result)?)
    }

    pub fn move_state(&self, id: DealId) -> MoveState {
        self.moves.state(id)
    }

    /// Free-form probability edit; bypasses the stage default.
    pub fn set_probability(&mut self, id: DealId, probability: u8) -> ServiceResult<Deal> {
        Ok(self.store.set_probability(id, probability)?.clone())
    }

    /// Saves non-stage field edits (title, value, dates, owner, tags, notes).
    pub fn update_details(&mut self, deal: Deal) -> ServiceResult<()> {
        Ok(self.store.update_details(deal)?)
    }

    pub fn store(&self) -> &DealStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
