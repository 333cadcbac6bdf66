//! Pipeline stage registry and probability deriver.
//!
//! # Responsibility
//! - Define the closed, ordered set of pipeline stages and their metadata.
//! - Provide the default probability lookup used by stage transitions.
//!
//! # Invariants
//! - Exactly six stages exist; no ad-hoc stage values are representable.
//! - Display order is for board layout only and does not constrain moves.
//! - `closed-won` and `closed-lost` are terminal.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One stage of the sales funnel.
///
/// Serialized using the kebab-case keys used by the deals API
/// (`prospecting`, `closed-won`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Prospecting,
    Qualification,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

/// Static metadata for one registry stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub stage: Stage,
    /// Wire key, e.g. `closed-won`.
    pub key: &'static str,
    pub display_name: &'static str,
    /// Zero-based column position on the board.
    pub display_order: u8,
    pub default_probability: u8,
    pub is_terminal: bool,
}

const REGISTRY: [StageDescriptor; 6] = [
    StageDescriptor {
        stage: Stage::Prospecting,
        key: "prospecting",
        display_name: "Prospecting",
        display_order: 0,
        default_probability: 10,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::Qualification,
        key: "qualification",
        display_name: "Qualification",
        display_order: 1,
        default_probability: 25,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::Proposal,
        key: "proposal",
        display_name: "Proposal",
        display_order: 2,
        default_probability: 50,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::Negotiation,
        key: "negotiation",
        display_name: "Negotiation",
        display_order: 3,
        default_probability: 75,
        is_terminal: false,
    },
    StageDescriptor {
        stage: Stage::ClosedWon,
        key: "closed-won",
        display_name: "Closed Won",
        display_order: 4,
        default_probability: 100,
        is_terminal: true,
    },
    StageDescriptor {
        stage: Stage::ClosedLost,
        key: "closed-lost",
        display_name: "Closed Lost",
        display_order: 5,
        default_probability: 0,
        is_terminal: true,
    },
];

/// Raised when a raw stage key is not part of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl Display for UnknownStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown pipeline stage: `{}`", self.0)
    }
}

impl Error for UnknownStage {}

/// Returns all stage descriptors in display order.
pub fn descriptors() -> &'static [StageDescriptor] {
    &REGISTRY
}

/// Returns the registry default probability for `stage`.
///
/// Pure lookup; repeated calls for one stage always agree.
pub fn default_probability(stage: Stage) -> u8 {
    stage.descriptor().default_probability
}

impl Stage {
    /// All stages in display order.
    pub const ALL: [Stage; 6] = [
        Stage::Prospecting,
        Stage::Qualification,
        Stage::Proposal,
        Stage::Negotiation,
        Stage::ClosedWon,
        Stage::ClosedLost,
    ];

    pub fn descriptor(self) -> &'static StageDescriptor {
        // Registry rows are declared in enum order.
        &REGISTRY[self as usize]
    }

    pub fn key(self) -> &'static str {
        self.descriptor().key
    }

    pub fn display_name(self) -> &'static str {
        self.descriptor().display_name
    }

    pub fn is_terminal(self) -> bool {
        self.descriptor().is_terminal
    }

    /// Parses a wire key. Surrounding whitespace is ignored; case is not.
    pub fn from_key(key: &str) -> Result<Self, UnknownStage> {
        let trimmed = key.trim();
        REGISTRY
            .iter()
            .find(|descriptor| descriptor.key == trimmed)
            .map(|descriptor| descriptor.stage)
            .ok_or_else(|| UnknownStage(trimmed.to_string()))
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
