//! Pipeline statistics and board projections.
//!
//! # Responsibility
//! - Compute per-stage and whole-pipeline figures from a deal list.
//! - Filter deals by free-text search before aggregation.
//! - Group deals into board columns in registry order.
//!
//! # Invariants
//! - Aggregation is pure and side-effect free; safe to call on every update.
//! - Sum of per-stage `total_value` equals overall `total_value`.
//! - Zero denominators produce 0, never a panic.
//! - Money sums saturate at `Decimal::MAX` instead of overflowing.

use crate::model::deal::Deal;
use crate::model::stage::{descriptors, Stage, StageDescriptor};
use rust_decimal::Decimal;
use serde::Serialize;

/// Pre-aggregation filter used by board search and dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealFilter {
    /// Case-insensitive text matched against title, customer, owner, tags
    /// and notes. Blank text matches everything.
    pub query: Option<String>,
    pub assigned_to: Option<String>,
}

impl DealFilter {
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, deal: &Deal) -> bool {
        if let Some(owner) = self.assigned_to.as_deref() {
            if deal.assigned_to.as_deref() != Some(owner) {
                return false;
            }
        }

        let needle = match self.query.as_deref().map(normalize_query) {
            Some(needle) if !needle.is_empty() => needle,
            _ => return true,
        };

        let contains = |text: &str| text.to_lowercase().contains(needle.as_str());
        contains(&deal.title)
            || deal.customer.as_deref().is_some_and(contains)
            || deal.assigned_to.as_deref().is_some_and(contains)
            || deal.notes.as_deref().is_some_and(contains)
            || deal.tags.iter().any(|tag| contains(tag.as_str()))
    }
}

/// Figures for one stage column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTotals {
    pub stage: Stage,
    pub count: usize,
    pub total_value: Decimal,
    /// Sum of `value * probability / 100`.
    pub weighted_value: Decimal,
}

/// Whole-pipeline figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTotals {
    pub total_value: Decimal,
    pub total_count: usize,
    pub won_value: Decimal,
    pub won_count: usize,
    pub lost_value: Decimal,
    pub lost_count: usize,
    pub open_value: Decimal,
    pub open_count: usize,
    pub weighted_value: Decimal,
    /// `won_count / total_count`.
    pub conversion_rate: f64,
    /// `won_count / (won_count + lost_count)`, closed deals only.
    pub win_rate: f64,
    /// `total_value / total_count`, rounded to cents.
    pub average_value: Decimal,
}

/// Aggregation output consumed by the board header and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    /// One row per registry stage, in display order, including empty stages.
    pub stages: Vec<StageTotals>,
    pub overall: PipelineTotals,
}

impl PipelineStats {
    pub fn stage(&self, stage: Stage) -> Option<&StageTotals> {
        self.stages.iter().find(|row| row.stage == stage)
    }
}

/// One Kanban column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardColumn<'a> {
    pub descriptor: &'static StageDescriptor,
    /// Sorted by expected close date, then id.
    pub deals: Vec<&'a Deal>,
}

/// Aggregates `deals` into per-stage and overall figures.
pub fn aggregate<'a>(deals: impl IntoIterator<Item = &'a Deal>) -> PipelineStats {
    let mut stages: Vec<StageTotals> = Stage::ALL
        .iter()
        .map(|stage| StageTotals {
            stage: *stage,
            count: 0,
            total_value: Decimal::ZERO,
            weighted_value: Decimal::ZERO,
        })
        .collect();

    for deal in deals {
        let row = &mut stages[deal.stage as usize];
        row.count += 1;
        row.total_value = row.total_value.saturating_add(deal.value);
        row.weighted_value = row.weighted_value.saturating_add(deal.weighted_value());
    }

    let won = &stages[Stage::ClosedWon as usize];
    let lost = &stages[Stage::ClosedLost as usize];
    let total_count: usize = stages.iter().map(|row| row.count).sum();
    let total_value = saturating_sum(stages.iter().map(|row| row.total_value));
    let weighted_value = saturating_sum(stages.iter().map(|row| row.weighted_value));

    let overall = PipelineTotals {
        total_value,
        total_count,
        won_value: won.total_value,
        won_count: won.count,
        lost_value: lost.total_value,
        lost_count: lost.count,
        open_value: saturating_sum(
            stages
                .iter()
                .filter(|row| !row.stage.is_terminal())
                .map(|row| row.total_value),
        ),
        open_count: total_count - won.count - lost.count,
        weighted_value,
        conversion_rate: ratio(won.count, total_count),
        win_rate: ratio(won.count, won.count + lost.count),
        average_value: average(total_value, total_count),
    };

    PipelineStats { stages, overall }
}

/// Filters then aggregates, the usual dashboard entry point.
pub fn aggregate_filtered<'a>(
    deals: impl IntoIterator<Item = &'a Deal>,
    filter: &DealFilter,
) -> PipelineStats {
    aggregate(deals.into_iter().filter(|deal| filter.matches(deal)))
}

/// Groups deals into board columns in stage display order.
pub fn board_columns<'a>(deals: impl IntoIterator<Item = &'a Deal>) -> Vec<BoardColumn<'a>> {
    let mut columns: Vec<BoardColumn<'a>> = descriptors()
        .iter()
        .map(|descriptor| BoardColumn {
            descriptor,
            deals: Vec::new(),
        })
        .collect();

    for deal in deals {
        columns[deal.stage as usize].deals.push(deal);
    }
    for column in &mut columns {
        column
            .deals
            .sort_by(|a, b| (a.expected_close_date, a.id).cmp(&(b.expected_close_date, b.id)));
    }
    columns
}

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn saturating_sum(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, |acc, value| acc.saturating_add(value))
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64
}

fn average(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count)).round_dp(2)
}
