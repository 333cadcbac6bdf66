//! Stage transition validator.
//!
//! # Responsibility
//! - Decide whether a proposed stage change is allowed.
//! - Produce the full stage-owned patch for approved changes.
//!
//! # Invariants
//! - Validation is pure: identical `(deal, target, overrides, now)` input
//!   yields an identical result.
//! - Terminal stages can never be left.
//! - Approved patches always satisfy `Deal::validate()` once applied.
//! - `value`, `expected_close_date` and owner are never part of a patch.

use crate::model::deal::{Deal, DealId};
use crate::model::stage::{default_probability, Stage};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Rejection reasons for a proposed stage change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Current stage is terminal and cannot be left.
    TerminalStageLocked(Stage),
    /// Target key is not a registry stage.
    InvalidStage(String),
    /// Target equals the current stage.
    SameStage(Stage),
    /// `closed-lost` requested without a non-blank reason.
    MissingLostReason,
    /// Terminal target requested without caller confirmation.
    ConfirmationRequired(Stage),
    /// Explicit probability outside `0..=100`.
    InvalidProbability(u8),
    /// Explicit probability contradicts the fixed terminal probability.
    ProbabilityConflict {
        stage: Stage,
        required: u8,
        given: u8,
    },
}

impl Display for TransitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TerminalStageLocked(stage) => {
                write!(f, "deal is in terminal stage `{stage}` and cannot be moved")
            }
            Self::InvalidStage(key) => write!(f, "unknown pipeline stage: `{key}`"),
            Self::SameStage(stage) => write!(f, "deal is already in stage `{stage}`"),
            Self::MissingLostReason => write!(f, "closing a deal as lost requires a reason"),
            Self::ConfirmationRequired(stage) => {
                write!(f, "moving a deal to `{stage}` requires confirmation")
            }
            Self::InvalidProbability(value) => {
                write!(f, "probability must be within 0..=100, got {value}")
            }
            Self::ProbabilityConflict {
                stage,
                required,
                given,
            } => write!(
                f,
                "stage `{stage}` requires probability {required}, got {given}"
            ),
        }
    }
}

impl Error for TransitionError {}

/// Optional caller inputs accompanying a move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionOverrides {
    /// Operator-chosen probability; the stage default applies when `None`.
    pub probability: Option<u8>,
    /// Required for `closed-lost`, ignored otherwise.
    pub lost_reason: Option<String>,
    /// Caller obtained user confirmation for a terminal move.
    pub confirmed: bool,
}

impl TransitionOverrides {
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            ..Self::default()
        }
    }

    pub fn lost(reason: impl Into<String>) -> Self {
        Self {
            lost_reason: Some(reason.into()),
            confirmed: true,
            ..Self::default()
        }
    }

    pub fn with_probability(mut self, probability: u8) -> Self {
        self.probability = Some(probability);
        self
    }
}

/// Stage-owned field changes produced by an approved transition.
///
/// This is also the body sent to `PUT /deals/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealPatch {
    pub deal_id: DealId,
    /// Stage the patch was derived from; stores reject stale patches.
    pub from_stage: Stage,
    pub stage: Stage,
    pub probability: u8,
    pub probability_overridden: bool,
    pub actual_close_date: Option<DateTime<Utc>>,
    pub lost_reason: Option<String>,
}

impl DealPatch {
    /// Returns `deal` with the patch fields applied; other fields unchanged.
    pub fn applied_to(&self, deal: &Deal) -> Deal {
        Deal {
            stage: self.stage,
            probability: self.probability,
            probability_overridden: self.probability_overridden,
            actual_close_date: self.actual_close_date,
            lost_reason: self.lost_reason.clone(),
            ..deal.clone()
        }
    }
}

/// Validates a move to a raw stage key, as received from board drop events.
///
/// # Errors
/// Rules are checked in order: terminal lock, unknown stage, then the typed
/// rules of [`validate_stage_transition`].
pub fn validate_transition(
    deal: &Deal,
    target_key: &str,
    overrides: &TransitionOverrides,
    now: DateTime<Utc>,
) -> Result<DealPatch, TransitionError> {
    if deal.stage.is_terminal() {
        return Err(TransitionError::TerminalStageLocked(deal.stage));
    }
    let target =
        Stage::from_key(target_key).map_err(|err| TransitionError::InvalidStage(err.0))?;
    validate_stage_transition(deal, target, overrides, now)
}

/// Validates a move to a registry stage and derives the resulting patch.
pub fn validate_stage_transition(
    deal: &Deal,
    target: Stage,
    overrides: &TransitionOverrides,
    now: DateTime<Utc>,
) -> Result<DealPatch, TransitionError> {
    if deal.stage.is_terminal() {
        return Err(TransitionError::TerminalStageLocked(deal.stage));
    }
    if deal.stage == target {
        return Err(TransitionError::SameStage(target));
    }

    let lost_reason = if target == Stage::ClosedLost {
        let reason = overrides
            .lost_reason
            .as_deref()
            .and_then(normalize_reason)
            .ok_or(TransitionError::MissingLostReason)?;
        Some(reason)
    } else {
        None
    };

    if target.is_terminal() && !overrides.confirmed {
        return Err(TransitionError::ConfirmationRequired(target));
    }

    let stage_default = default_probability(target);
    let (probability, probability_overridden) = match overrides.probability {
        Some(value) if value > 100 => return Err(TransitionError::InvalidProbability(value)),
        Some(value) if target.is_terminal() && value != stage_default => {
            return Err(TransitionError::ProbabilityConflict {
                stage: target,
                required: stage_default,
                given: value,
            });
        }
        Some(value) if !target.is_terminal() => (value, true),
        _ => (stage_default, false),
    };

    Ok(DealPatch {
        deal_id: deal.id,
        from_stage: deal.stage,
        stage: target,
        probability,
        probability_overridden,
        actual_close_date: target.is_terminal().then_some(now),
        lost_reason,
    })
}

/// Trims and collapses inner whitespace; blank input yields `None`.
pub fn normalize_reason(reason: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(reason.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}
