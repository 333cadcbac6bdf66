//! Optimistic move synchronizer.
//!
//! # Responsibility
//! - Turn a board drop into a validated, optimistically applied patch.
//! - Reconcile each pending move with the backend result.
//!
//! # Invariants
//! - Per move: `Idle -> Pending -> {Committed, RolledBack}`.
//! - At most one pending move per deal; overlapping requests are rejected,
//!   never queued.
//! - A failed persistence call always rolls the store back to the snapshot.
//! - Failed moves are never retried automatically.
//! - Pending moves belong to the synchronizer, not to the caller, so a
//!   resolution can run after the requesting view is gone.

use crate::model::deal::{Deal, DealId};
use crate::pipeline::transition::{
    validate_transition, DealPatch, TransitionError, TransitionOverrides,
};
use crate::store::deal_store::{DealStore, SnapshotId, StageChange, StoreError};
use crate::sync::backend::{DealBackend, PersistenceError, PersistenceResult};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Lifecycle state of the latest move for one deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

/// Handle identifying one pending move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoveTicket(u64);

impl Display for MoveTicket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "move#{}", self.0)
    }
}

/// Errors from move requests and resolutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    /// Transition validator rejected the move; store unchanged.
    Rejected(TransitionError),
    /// Another move on this deal is still pending.
    MoveInProgress(DealId),
    NotFound(DealId),
    UnknownTicket(MoveTicket),
    /// Backend rejected or failed; the store has been rolled back.
    PersistenceFailure(PersistenceError),
    Store(StoreError),
}

impl Display for MoveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(err) => write!(f, "{err}"),
            Self::MoveInProgress(id) => write!(f, "deal {id} already has a move in progress"),
            Self::NotFound(id) => write!(f, "deal not found: {id}"),
            Self::UnknownTicket(ticket) => write!(f, "unknown or already resolved {ticket}"),
            Self::PersistenceFailure(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MoveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rejected(err) => Some(err),
            Self::PersistenceFailure(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransitionError> for MoveError {
    fn from(value: TransitionError) -> Self {
        Self::Rejected(value)
    }
}

impl From<StoreError> for MoveError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::SnapshotPending(id) => Self::MoveInProgress(id),
            other => Self::Store(other),
        }
    }
}

/// A move applied locally and awaiting backend confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub ticket: MoveTicket,
    /// Body for `PUT /deals/:id`.
    pub patch: DealPatch,
}

/// Result of a committed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedMove {
    pub ticket: MoveTicket,
    pub change: StageChange,
}

#[derive(Debug, Clone)]
struct InFlight {
    ticket: MoveTicket,
    snapshot: SnapshotId,
    requested_at: DateTime<Utc>,
}

/// Per-deal single-writer coordinator for board moves.
#[derive(Debug, Default)]
pub struct MoveSynchronizer {
    in_flight: HashMap<DealId, InFlight>,
    last_state: HashMap<DealId, MoveState>,
    next_ticket: u64,
}

impl MoveSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and optimistically applies a move.
    ///
    /// # Errors
    /// - `MoveInProgress` when the deal already has a pending move.
    /// - `NotFound` when the deal is not in the store.
    /// - `Rejected` when the transition validator refuses; store unchanged.
    pub fn begin_move(
        &mut self,
        store: &mut DealStore,
        deal_id: DealId,
        target_key: &str,
        overrides: &TransitionOverrides,
        now: DateTime<Utc>,
    ) -> Result<PendingMove, MoveError> {
        if self.in_flight.contains_key(&deal_id) {
            warn!(
                "event=move_rejected module=sync status=in_progress deal_id={}",
                deal_id
            );
            return Err(MoveError::MoveInProgress(deal_id));
        }

        let deal = store.get(deal_id).ok_or(MoveError::NotFound(deal_id))?;
        let patch = match validate_transition(deal, target_key, overrides, now) {
            Ok(patch) => patch,
            Err(err) => {
                info!(
                    "event=move_rejected module=sync status=invalid deal_id={} from={} reason={:?}",
                    deal_id, deal.stage, err
                );
                return Err(err.into());
            }
        };

        let snapshot = store.apply(&patch)?;
        let ticket = MoveTicket(self.next_ticket);
        self.next_ticket += 1;
        self.in_flight.insert(
            deal_id,
            InFlight {
                ticket,
                snapshot,
                requested_at: now,
            },
        );
        self.last_state.insert(deal_id, MoveState::Pending);

        info!(
            "event=move_pending module=sync status=ok deal_id={} ticket={} from={} to={}",
            deal_id, ticket, patch.from_stage, patch.stage
        );
        Ok(PendingMove { ticket, patch })
    }

    /// Reconciles a pending move with the backend result.
    ///
    /// Success keeps the optimistic state and records history. Failure
    /// restores the snapshot and returns `PersistenceFailure` with the
    /// backend error unchanged.
    pub fn resolve(
        &mut self,
        store: &mut DealStore,
        ticket: MoveTicket,
        result: PersistenceResult<Deal>,
    ) -> Result<CommittedMove, MoveError> {
        let deal_id = self
            .in_flight
            .iter()
            .find(|(_, in_flight)| in_flight.ticket == ticket)
            .map(|(deal_id, _)| *deal_id)
            .ok_or(MoveError::UnknownTicket(ticket))?;
        let in_flight = self
            .in_flight
            .remove(&deal_id)
            .ok_or(MoveError::UnknownTicket(ticket))?;

        match result {
            Ok(persisted) => {
                if store.get(deal_id) != Some(&persisted) {
                    // Local state stays authoritative until the next refresh.
                    warn!(
                        "event=move_commit_mismatch module=sync status=warn deal_id={} ticket={}",
                        deal_id, ticket
                    );
                }
                // The backend accepted the move; a missing snapshot only loses history.
                self.last_state.insert(deal_id, MoveState::Committed);
                let change = store.release(in_flight.snapshot, in_flight.requested_at)?;
                info!(
                    "event=move_committed module=sync status=ok deal_id={} ticket={} to={}",
                    deal_id, ticket, change.to_stage
                );
                Ok(CommittedMove { ticket, change })
            }
            Err(err) => {
                self.last_state.insert(deal_id, MoveState::RolledBack);
                match store.rollback(in_flight.snapshot) {
                    Ok(restored) => warn!(
                        "event=move_rolled_back module=sync status=error deal_id={} ticket={} stage={} http_status={:?}",
                        deal_id, ticket, restored.stage, err.status
                    ),
                    Err(store_err) => warn!(
                        "event=move_rolled_back module=sync status=error deal_id={} ticket={} http_status={:?} rollback_error={}",
                        deal_id, ticket, err.status, store_err
                    ),
                }
                Err(MoveError::PersistenceFailure(err))
            }
        }
    }

    /// Runs a full move cycle against `backend`: validate, apply, persist,
    /// reconcile.
    pub fn move_deal<B: DealBackend>(
        &mut self,
        store: &mut DealStore,
        backend: &B,
        deal_id: DealId,
        target_key: &str,
        overrides: &TransitionOverrides,
        now: DateTime<Utc>,
    ) -> Result<CommittedMove, MoveError> {
        let pending = self.begin_move(store, deal_id, target_key, overrides, now)?;
        let result = backend.put_deal(&pending.patch);
        self.resolve(store, pending.ticket, result)
    }

    /// State of the latest move for `deal_id`.
    pub fn state(&self, deal_id: DealId) -> MoveState {
        self.last_state
            .get(&deal_id)
            .copied()
            .unwrap_or(MoveState::Idle)
    }

    pub fn is_pending(&self, deal_id: DealId) -> bool {
        self.in_flight.contains_key(&deal_id)
    }

    /// Tickets still awaiting resolution, oldest first.
    pub fn pending_tickets(&self) -> Vec<MoveTicket> {
        let mut tickets: Vec<MoveTicket> = self
            .in_flight
            .values()
            .map(|in_flight| in_flight.ticket)
            .collect();
        tickets.sort();
        tickets
    }
}
