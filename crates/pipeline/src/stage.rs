//! Stage identifiers and the canonical stage order.
//!
//! Every step of the research pipeline is a [`Stage`] variant rather than an
//! ad hoc string, so every reachable transition is enumerable and testable.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One named step in the research pipeline.
///
/// The five research stages run in the canonical order returned by
/// [`Stage::successor`]. [`Stage::Coordinator`] sits outside that order: it is
/// entered only through an escalation or a configured fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    LiteratureSearch,
    Analysis,
    DataAnalysis,
    HypothesisGeneration,
    Publication,
    Coordinator,
}

impl Stage {
    /// The research stages in execution order.
    pub const CANONICAL_ORDER: [Stage; 5] = [
        Stage::LiteratureSearch,
        Stage::Analysis,
        Stage::DataAnalysis,
        Stage::HypothesisGeneration,
        Stage::Publication,
    ];

    /// Every stage, including the coordinator.
    pub const ALL: [Stage; 6] = [
        Stage::LiteratureSearch,
        Stage::Analysis,
        Stage::DataAnalysis,
        Stage::HypothesisGeneration,
        Stage::Publication,
        Stage::Coordinator,
    ];

    /// The stage every run starts at.
    pub const fn entry() -> Stage {
        Stage::LiteratureSearch
    }

    /// The next stage in canonical order; `None` after publication and for
    /// the coordinator.
    pub fn successor(self) -> Option<Stage> {
        match self {
            Stage::LiteratureSearch => Some(Stage::Analysis),
            Stage::Analysis => Some(Stage::DataAnalysis),
            Stage::DataAnalysis => Some(Stage::HypothesisGeneration),
            Stage::HypothesisGeneration => Some(Stage::Publication),
            Stage::Publication | Stage::Coordinator => None,
        }
    }

    /// Stable snake_case name used in logs, config files and the run log.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::LiteratureSearch => "literature_search",
            Stage::Analysis => "analysis",
            Stage::DataAnalysis => "data_analysis",
            Stage::HypothesisGeneration => "hypothesis_generation",
            Stage::Publication => "publication",
            Stage::Coordinator => "coordinator",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a [`Stage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.trim())
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}
