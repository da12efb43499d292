//! Shared value types for the scholarflow domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. quality scores are in `[0.0, 1.0]`)
//! and are the payload the workers produce and the engine merges.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PaperId;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// A heuristic quality score in the range `[0.0, 1.0]`.
///
/// Produced by [`crate::quality::score`] for every completed stage and compared
/// by the router against the configured quality threshold.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct QualityScore(f64);

impl QualityScore {
    /// Creates a [`QualityScore`], returning `None` if `value` is outside
    /// the valid range `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`QualityScore`] by clamping `value` into `[0.0, 1.0]`.
    ///
    /// Non-finite input maps to `0.0`.
    pub fn clamped(value: f64) -> Self {
        if value.is_finite() {
            Self(value.clamp(0.0, 1.0))
        } else {
            Self(0.0)
        }
    }

    /// Returns the score as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for QualityScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Literature
// ---------------------------------------------------------------------------

/// One paper returned by the literature provider.
///
/// Immutable once appended to `papers_found`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Provider-assigned identity; used for de-duplication.
    pub id: PaperId,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub url: String,
    /// Originating database (e.g. `"arxiv"`).
    #[serde(default = "default_source")]
    pub source: String,
    /// Publication date as reported by the provider (`YYYY-MM-DD`), if known.
    #[serde(default)]
    pub published: Option<String>,
    pub retrieved_at: Timestamp,
}

fn default_source() -> String {
    "unknown".to_string()
}

impl PaperRecord {
    /// Publication year, when the provider reported a date.
    pub fn published_year(&self) -> Option<&str> {
        self.published
            .as_deref()
            .filter(|date| date.len() >= 4)
            .map(|date| &date[..4])
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Coarse three-level rating used for gap impact and hypothesis testability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    High,
    #[default]
    Medium,
    Low,
}

impl Level {
    /// Lenient parse of model output (`"High priority"`, `"low"`, ...).
    ///
    /// Anything unrecognised is [`Level::Medium`].
    pub fn parse_lenient(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("high") {
            Level::High
        } else if lower.starts_with("low") {
            Level::Low
        } else {
            Level::Medium
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Level::High => "High",
            Level::Medium => "Medium",
            Level::Low => "Low",
        };
        f.write_str(label)
    }
}

/// Where a finding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by a worker from model or provider output.
    #[default]
    Worker,
    /// Rule-based placeholder produced by the coordinator during recovery.
    Recovery,
}

fn default_confidence() -> f64 {
    0.7
}

/// A recurring theme in the surveyed literature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTheme {
    pub theme: String,
    /// Development trajectory (e.g. `"Growing"`, `"Stable development"`).
    #[serde(default)]
    pub trajectory: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub provenance: Provenance,
}

/// An under-explored area identified by the analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchGap {
    pub description: String,
    #[serde(default)]
    pub impact: Level,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub provenance: Provenance,
}

/// Conflicting findings between papers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub description: String,
    #[serde(default)]
    pub resolution: Option<String>,
}

/// A testable research hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub statement: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub testability: Level,
    #[serde(default)]
    pub provenance: Provenance,
}

/// Quantitative overview computed by the data-analysis stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuantitativeInsights {
    pub paper_count: usize,
    /// Distinct author names across all papers.
    pub total_authors: usize,
    /// Mean abstract length in words (0 when no paper has an abstract).
    pub average_abstract_words: f64,
    /// Papers per originating database.
    pub source_distribution: BTreeMap<String, usize>,
    /// Papers per publication year.
    pub publication_years: BTreeMap<String, usize>,
    /// Attached documents successfully extracted.
    pub documents_processed: usize,
    /// Section headings found across extracted documents, with counts.
    pub sections_found: BTreeMap<String, usize>,
    pub research_patterns: Vec<String>,
}

/// One phase of a research plan timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub phase: String,
    pub activity: String,
}

/// Structured research plan produced alongside the hypotheses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub title: String,
    pub objectives: Vec<String>,
    pub methodology: Vec<String>,
    pub timeline: Vec<Milestone>,
    pub expected_outcomes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A document supplied with the run, handed to the document extractor by the
/// data-analysis stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Display name (usually the file name).
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}
