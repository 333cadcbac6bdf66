//! Deal domain model.
//!
//! # Responsibility
//! - Define the canonical deal record shared by board, dashboards and API.
//! - Enforce stage-owned field invariants on construction and decode.
//!
//! # Invariants
//! - `id` is stable, never nil, and never reused for another deal.
//! - `closed-won` implies probability 100 and a close timestamp.
//! - `closed-lost` implies probability 0, a close timestamp and a reason.
//! - Open stages carry neither a close timestamp nor a lost reason.
//! - Without a recorded override, probability equals the stage default.

use crate::model::stage::{default_probability, Stage};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a deal.
pub type DealId = Uuid;

/// Largest accepted deal value, in whole currency units.
pub const MAX_DEAL_VALUE: i64 = 1_000_000_000_000_000;

/// Validation errors for deal invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DealValidationError {
    NilId,
    NegativeValue(Decimal),
    ValueTooLarge(Decimal),
    ProbabilityOutOfRange(u8),
    ProbabilityMismatch {
        stage: Stage,
        expected: u8,
        actual: u8,
    },
    MissingActualCloseDate(Stage),
    UnexpectedActualCloseDate(Stage),
    MissingLostReason,
    UnexpectedLostReason(Stage),
    ExpectedCloseInPast {
        expected: NaiveDate,
        today: NaiveDate,
    },
}

impl Display for DealValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "deal id must not be nil"),
            Self::NegativeValue(value) => write!(f, "deal value must be >= 0, got {value}"),
            Self::ValueTooLarge(value) => {
                write!(f, "deal value must be <= {MAX_DEAL_VALUE}, got {value}")
            }
            Self::ProbabilityOutOfRange(value) => {
                write!(f, "probability must be within 0..=100, got {value}")
            }
            Self::ProbabilityMismatch {
                stage,
                expected,
                actual,
            } => write!(
                f,
                "probability {actual} does not match {expected} required for stage `{stage}`"
            ),
            Self::MissingActualCloseDate(stage) => {
                write!(f, "stage `{stage}` requires an actual close date")
            }
            Self::UnexpectedActualCloseDate(stage) => {
                write!(f, "open stage `{stage}` must not carry an actual close date")
            }
            Self::MissingLostReason => write!(f, "closed-lost deals require a lost reason"),
            Self::UnexpectedLostReason(stage) => {
                write!(f, "stage `{stage}` must not carry a lost reason")
            }
            Self::ExpectedCloseInPast { expected, today } => write!(
                f,
                "expected close date {expected} is before today ({today})"
            ),
        }
    }
}

impl Error for DealValidationError {}

/// Caller-supplied fields for opening a new deal.
///
/// Stage-owned fields are absent on purpose: new deals always start in
/// `prospecting` with the registry default probability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealDraft {
    pub title: String,
    pub customer: Option<String>,
    pub value: Decimal,
    pub expected_close_date: NaiveDate,
    pub assigned_to: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl DealDraft {
    pub fn new(title: impl Into<String>, value: Decimal, expected_close_date: NaiveDate) -> Self {
        Self {
            title: title.into(),
            customer: None,
            value,
            expected_close_date,
            assigned_to: None,
            tags: Vec::new(),
            notes: None,
        }
    }
}

/// Canonical deal record.
///
/// Wire shape is camelCase to match the deals REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "DealWire")]
pub struct Deal {
    pub id: DealId,
    pub title: String,
    pub stage: Stage,
    pub probability: u8,
    /// Set when an operator chose `probability` instead of the stage default.
    pub probability_overridden: bool,
    pub value: Decimal,
    pub expected_close_date: NaiveDate,
    pub actual_close_date: Option<DateTime<Utc>>,
    pub lost_reason: Option<String>,
    pub customer: Option<String>,
    /// Owner reference; never touched by stage transitions.
    pub assigned_to: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealWire {
    id: DealId,
    #[serde(default)]
    title: String,
    stage: Stage,
    probability: u8,
    #[serde(default)]
    probability_overridden: bool,
    value: Decimal,
    expected_close_date: NaiveDate,
    actual_close_date: Option<DateTime<Utc>>,
    lost_reason: Option<String>,
    customer: Option<String>,
    assigned_to: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    notes: Option<String>,
}

impl TryFrom<DealWire> for Deal {
    type Error = DealValidationError;

    fn try_from(wire: DealWire) -> Result<Self, Self::Error> {
        let deal = Self {
            id: wire.id,
            title: wire.title,
            stage: wire.stage,
            probability: wire.probability,
            probability_overridden: wire.probability_overridden,
            value: wire.value,
            expected_close_date: wire.expected_close_date,
            actual_close_date: wire.actual_close_date,
            lost_reason: wire.lost_reason,
            customer: wire.customer,
            assigned_to: wire.assigned_to,
            tags: wire.tags,
            notes: wire.notes,
        };
        deal.validate()?;
        Ok(deal)
    }
}

impl Deal {
    /// Opens a new deal in `prospecting` with a generated stable ID.
    pub fn new(draft: DealDraft) -> Result<Self, DealValidationError> {
        Self::with_id(Uuid::new_v4(), draft)
    }

    /// Opens a new deal with a caller-provided stable ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(id: DealId, draft: DealDraft) -> Result<Self, DealValidationError> {
        let deal = Self {
            id,
            title: draft.title.trim().to_string(),
            stage: Stage::Prospecting,
            probability: default_probability(Stage::Prospecting),
            probability_overridden: false,
            value: draft.value,
            expected_close_date: draft.expected_close_date,
            actual_close_date: None,
            lost_reason: None,
            customer: draft.customer,
            assigned_to: draft.assigned_to,
            tags: normalize_tags(&draft.tags),
            notes: draft.notes,
        };
        deal.validate()?;
        Ok(deal)
    }

    /// Checks all stage-owned and value invariants.
    ///
    /// The creation-time "not in the past" rule is separate, see
    /// [`Deal::ensure_expected_close_not_past`].
    pub fn validate(&self) -> Result<(), DealValidationError> {
        if self.id.is_nil() {
            return Err(DealValidationError::NilId);
        }
        if self.value < Decimal::ZERO {
            return Err(DealValidationError::NegativeValue(self.value));
        }
        if self.value > Decimal::from(MAX_DEAL_VALUE) {
            return Err(DealValidationError::ValueTooLarge(self.value));
        }
        if self.probability > 100 {
            return Err(DealValidationError::ProbabilityOutOfRange(self.probability));
        }

        let stage_default = default_probability(self.stage);
        if (self.stage.is_terminal() || !self.probability_overridden)
            && self.probability != stage_default
        {
            return Err(DealValidationError::ProbabilityMismatch {
                stage: self.stage,
                expected: stage_default,
                actual: self.probability,
            });
        }

        match self.stage {
            Stage::ClosedWon => {
                if self.actual_close_date.is_none() {
                    return Err(DealValidationError::MissingActualCloseDate(self.stage));
                }
                if self.lost_reason.is_some() {
                    return Err(DealValidationError::UnexpectedLostReason(self.stage));
                }
            }
            Stage::ClosedLost => {
                if self.actual_close_date.is_none() {
                    return Err(DealValidationError::MissingActualCloseDate(self.stage));
                }
                let has_reason = self
                    .lost_reason
                    .as_deref()
                    .is_some_and(|reason| !reason.trim().is_empty());
                if !has_reason {
                    return Err(DealValidationError::MissingLostReason);
                }
            }
            open => {
                if self.actual_close_date.is_some() {
                    return Err(DealValidationError::UnexpectedActualCloseDate(open));
                }
                if self.lost_reason.is_some() {
                    return Err(DealValidationError::UnexpectedLostReason(open));
                }
            }
        }

        Ok(())
    }

    /// Rejects an expected close date earlier than `today`.
    pub fn ensure_expected_close_not_past(
        &self,
        today: NaiveDate,
    ) -> Result<(), DealValidationError> {
        if self.expected_close_date < today {
            return Err(DealValidationError::ExpectedCloseInPast {
                expected: self.expected_close_date,
                today,
            });
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.stage.is_terminal()
    }

    /// `value * probability / 100`.
    pub fn weighted_value(&self) -> Decimal {
        self.value.saturating_mul(Decimal::from(self.probability)) / Decimal::ONE_HUNDRED
    }
}

/// Lowercases, trims and deduplicates tags, preserving sorted order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
