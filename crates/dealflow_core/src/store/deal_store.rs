//! In-memory deal store.
//!
//! # Responsibility
//! - Hold the authoritative local copy of all deals keyed by id.
//! - Apply transition patches with a restorable snapshot.
//! - Keep the committed stage-change history per deal.
//!
//! # Invariants
//! - Every stored deal satisfies `Deal::validate()`.
//! - `apply` is the only path that changes stage-owned fields.
//! - A patch derived from a stage other than the stored one is rejected.
//! - While a snapshot is outstanding for a deal, no other edit touches it,
//!   so rollback restores exactly the pre-patch record.

use crate::model::deal::{Deal, DealId, DealValidationError};
use crate::model::stage::Stage;
use crate::pipeline::transition::DealPatch;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle for one pre-patch snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(u64);

impl Display for SnapshotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// Deal store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(DealId),
    DuplicateId(DealId),
    StalePatch {
        deal_id: DealId,
        expected: Stage,
        actual: Stage,
    },
    UnknownSnapshot(SnapshotId),
    /// Deal has an unresolved optimistic patch.
    SnapshotPending(DealId),
    /// Seeding was attempted while optimistic patches are unresolved.
    SnapshotsOutstanding(usize),
    /// A detail edit tried to change stage-owned fields.
    StageFieldChanged(DealId),
    /// Probability edits are not allowed on terminal deals.
    StageLocked {
        deal_id: DealId,
        stage: Stage,
    },
    Validation(DealValidationError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "deal not found: {id}"),
            Self::DuplicateId(id) => write!(f, "deal already exists: {id}"),
            Self::StalePatch {
                deal_id,
                expected,
                actual,
            } => write!(
                f,
                "stale patch for deal {deal_id}: derived from `{expected}`, store has `{actual}`"
            ),
            Self::UnknownSnapshot(id) => write!(f, "unknown {id}"),
            Self::SnapshotPending(id) => write!(f, "deal {id} has an unresolved move"),
            Self::SnapshotsOutstanding(count) => {
                write!(f, "{count} unresolved moves block reseeding the store")
            }
            Self::StageFieldChanged(id) => write!(
                f,
                "deal {id}: stage, probability, close date and lost reason change only via moves"
            ),
            Self::StageLocked { deal_id, stage } => {
                write!(f, "deal {deal_id} is in terminal stage `{stage}`")
            }
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DealValidationError> for StoreError {
    fn from(value: DealValidationError) -> Self {
        Self::Validation(value)
    }
}

/// One committed stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageChange {
    pub deal_id: DealId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub changed_at: DateTime<Utc>,
    /// Lost reason for `closed-lost`, otherwise `None`.
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    deal_id: DealId,
    previous: Deal,
}

/// Keyed in-memory deal collection.
#[derive(Debug, Default)]
pub struct DealStore {
    deals: HashMap<DealId, Deal>,
    snapshots: HashMap<SnapshotId, Snapshot>,
    next_snapshot: u64,
    history: Vec<StageChange>,
}

impl DealStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a fetched deal list.
    pub fn from_deals(deals: impl IntoIterator<Item = Deal>) -> StoreResult<Self> {
        let mut store = Self::new();
        store.replace_all(deals)?;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }

    pub fn get(&self, id: DealId) -> Option<&Deal> {
        self.deals.get(&id)
    }

    /// Lists deals in board order: stage display order, expected close, id.
    pub fn list(&self) -> Vec<&Deal> {
        let mut deals: Vec<&Deal> = self.deals.values().collect();
        deals.sort_by(|a, b| {
            (a.stage, a.expected_close_date, a.id).cmp(&(b.stage, b.expected_close_date, b.id))
        });
        deals
    }

    /// Adds one new deal.
    pub fn insert(&mut self, deal: Deal) -> StoreResult<()> {
        deal.validate()?;
        if self.deals.contains_key(&deal.id) {
            return Err(StoreError::DuplicateId(deal.id));
        }
        self.deals.insert(deal.id, deal);
        Ok(())
    }

    /// Replaces the whole collection with a fresh server listing.
    ///
    /// History is kept; it describes moves made through this store.
    pub fn replace_all(&mut self, deals: impl IntoIterator<Item = Deal>) -> StoreResult<()> {
        if !self.snapshots.is_empty() {
            return Err(StoreError::SnapshotsOutstanding(self.snapshots.len()));
        }

        let mut next = HashMap::new();
        for deal in deals {
            deal.validate()?;
            if next.contains_key(&deal.id) {
                return Err(StoreError::DuplicateId(deal.id));
            }
            next.insert(deal.id, deal);
        }
        self.deals = next;
        Ok(())
    }

    /// Applies a transition patch and returns the snapshot to undo it.
    ///
    /// # Errors
    /// - `NotFound` when the deal is unknown.
    /// - `SnapshotPending` when another patch on the deal is unresolved.
    /// - `StalePatch` when the stored stage differs from `patch.from_stage`.
    /// - `Validation` when the patched deal would break an invariant.
    pub fn apply(&mut self, patch: &DealPatch) -> StoreResult<SnapshotId> {
        self.ensure_no_snapshot(patch.deal_id)?;
        let current = self
            .deals
            .get(&patch.deal_id)
            .ok_or(StoreError::NotFound(patch.deal_id))?;
        if current.stage != patch.from_stage {
            return Err(StoreError::StalePatch {
                deal_id: patch.deal_id,
                expected: patch.from_stage,
                actual: current.stage,
            });
        }

        let next = patch.applied_to(current);
        next.validate()?;

        let snapshot_id = SnapshotId(self.next_snapshot);
        self.next_snapshot += 1;
        let previous = std::mem::replace(
            self.deals
                .get_mut(&patch.deal_id)
                .ok_or(StoreError::NotFound(patch.deal_id))?,
            next,
        );
        self.snapshots.insert(
            snapshot_id,
            Snapshot {
                deal_id: patch.deal_id,
                previous,
            },
        );
        Ok(snapshot_id)
    }

    /// Restores the pre-patch record captured by `snapshot_id`.
    pub fn rollback(&mut self, snapshot_id: SnapshotId) -> StoreResult<&Deal> {
        let snapshot = self
            .snapshots
            .remove(&snapshot_id)
            .ok_or(StoreError::UnknownSnapshot(snapshot_id))?;
        let deal_id = snapshot.deal_id;
        self.deals.insert(deal_id, snapshot.previous);
        self.deals.get(&deal_id).ok_or(StoreError::NotFound(deal_id))
    }

    /// Drops a snapshot once its patch is confirmed and records the change.
    pub fn release(
        &mut self,
        snapshot_id: SnapshotId,
        changed_at: DateTime<Utc>,
    ) -> StoreResult<StageChange> {
        let snapshot = self
            .snapshots
            .remove(&snapshot_id)
            .ok_or(StoreError::UnknownSnapshot(snapshot_id))?;
        let current = self
            .deals
            .get(&snapshot.deal_id)
            .ok_or(StoreError::NotFound(snapshot.deal_id))?;

        let change = StageChange {
            deal_id: snapshot.deal_id,
            from_stage: snapshot.previous.stage,
            to_stage: current.stage,
            changed_at,
            note: current.lost_reason.clone(),
        };
        self.history.push(change.clone());
        Ok(change)
    }

    /// Full-record edit for non-stage fields (title, value, dates, owner...).
    pub fn update_details(&mut self, deal: Deal) -> StoreResult<()> {
        self.ensure_no_snapshot(deal.id)?;
        let current = self.deals.get(&deal.id).ok_or(StoreError::NotFound(deal.id))?;
        let stage_fields_equal = current.stage == deal.stage
            && current.probability == deal.probability
            && current.probability_overridden == deal.probability_overridden
            && current.actual_close_date == deal.actual_close_date
            && current.lost_reason == deal.lost_reason;
        if !stage_fields_equal {
            return Err(StoreError::StageFieldChanged(deal.id));
        }
        deal.validate()?;
        self.deals.insert(deal.id, deal);
        Ok(())
    }

    /// Sets an operator-chosen probability on an open deal.
    pub fn set_probability(&mut self, id: DealId, probability: u8) -> StoreResult<&Deal> {
        self.ensure_no_snapshot(id)?;
        let current = self.deals.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.stage.is_terminal() {
            return Err(StoreError::StageLocked {
                deal_id: id,
                stage: current.stage,
            });
        }

        let next = Deal {
            probability,
            probability_overridden: true,
            ..current.clone()
        };
        next.validate()?;
        self.deals.insert(id, next);
        self.deals.get(&id).ok_or(StoreError::NotFound(id))
    }

    /// Committed stage changes for one deal, oldest first.
    pub fn history(&self, id: DealId) -> Vec<&StageChange> {
        self.history
            .iter()
            .filter(|change| change.deal_id == id)
            .collect()
    }

    pub fn pending_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    fn ensure_no_snapshot(&self, id: DealId) -> StoreResult<()> {
        if self.snapshots.values().any(|snapshot| snapshot.deal_id == id) {
            return Err(StoreError::SnapshotPending(id));
        }
        Ok(())
    }
}
