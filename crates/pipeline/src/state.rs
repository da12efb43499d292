//! The shared workflow state and the slices workers return.
//!
//! [`WorkflowState`] is owned by the engine for the whole run. Workers only see
//! it through a read-only view and hand back a [`StageOutput`]; the engine then
//! applies the contained [`StateSlice`] with [`WorkflowState::apply`], which is
//! the single place where stage output is merged.
//!
//! ## Merge rules
//!
//! - `papers_found`, `messages`, `errors`, `notes` and `transitions` are
//!   append-only. Papers are de-duplicated by [`crate::PaperId`], so a retried
//!   literature search never repeats a paper it already contributed.
//! - Every other stage field is replaced wholesale by the stage's latest
//!   output, so a retried stage never duplicates its own findings.
//! - A degraded slice produced by the coordinator only fills fields that are
//!   still empty; it never overwrites real worker output.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::message::{AgentMessage, Priority};
use crate::router::{RouteReason, RouteTarget};
use crate::{
    Contradiction, Hypothesis, PaperRecord, QualityScore, QuantitativeInsights, ResearchGap,
    ResearchPlan, ResearchTheme, RunId, Stage, Timestamp,
};

// ---------------------------------------------------------------------------
// Run status and bookkeeping records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// The run is being handled by the coordinator, or finished with an
    /// escalation nobody could handle.
    Escalated,
}

/// One entry of the append-only failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub reason: String,
    pub timestamp: Timestamp,
}

/// One logged stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: RouteTarget,
    pub reason: RouteReason,
    pub at: Timestamp,
    /// Wall time spent in `from` before this transition, including backoff.
    pub duration_ms: u64,
}

/// How the most recent attempt at a stage ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    Succeeded { stage: Stage },
    /// Failure retries are used up (or the failure was not retryable).
    Exhausted { stage: Stage, reason: String },
}

impl AttemptOutcome {
    pub fn stage(&self) -> Stage {
        match self {
            AttemptOutcome::Succeeded { stage } | AttemptOutcome::Exhausted { stage, .. } => *stage,
        }
    }
}

/// An escalation posted by a worker and not yet routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub from: Stage,
    pub reason: String,
    pub priority: Priority,
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// The single mutable record threaded through every step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    query: String,
    pub started_at: Timestamp,
    pub status: RunStatus,
    pub current_stage: Stage,

    pub papers_found: Vec<PaperRecord>,

    pub key_themes: Vec<ResearchTheme>,
    pub research_gaps: Vec<ResearchGap>,
    pub contradictions: Vec<Contradiction>,
    pub analysis_summary: Option<String>,

    pub quantitative_insights: Option<QuantitativeInsights>,
    pub data_analysis_summary: Option<String>,

    pub hypotheses: Vec<Hypothesis>,
    pub research_plan: Option<ResearchPlan>,

    pub executive_summary: Option<String>,
    pub detailed_research_plan: Option<String>,
    pub report: Option<String>,

    /// One entry per stage that has completed at least once.
    pub quality_scores: BTreeMap<Stage, QualityScore>,
    /// Failure-driven retries. Monotonic within a run.
    pub retry_counts: BTreeMap<Stage, u32>,
    /// Quality-driven retries. Same budget as `retry_counts`, separate counter.
    pub quality_retry_counts: BTreeMap<Stage, u32>,
    /// Stages whose output was accepted below the quality threshold.
    pub quality_flags: BTreeSet<Stage>,
    pub failed_stages: BTreeSet<Stage>,

    pub notes: Vec<String>,
    pub messages: Vec<AgentMessage>,
    pub errors: Vec<ErrorRecord>,
    pub transitions: Vec<StageTransition>,

    pub last_attempt: Option<AttemptOutcome>,
    pub pending_escalation: Option<Escalation>,
    /// Stage the coordinator is currently recovering on behalf of.
    pub recovery_target: Option<Stage>,
    /// Escalations that could not be handed to a coordinator.
    pub unhandled_escalations: Vec<Escalation>,
}

impl WorkflowState {
    /// A fresh `pending` state positioned at the entry stage.
    pub fn new(run_id: RunId, query: impl Into<String>) -> Self {
        Self {
            run_id,
            query: query.into(),
            started_at: Timestamp::now(),
            status: RunStatus::Pending,
            current_stage: Stage::entry(),
            papers_found: Vec::new(),
            key_themes: Vec::new(),
            research_gaps: Vec::new(),
            contradictions: Vec::new(),
            analysis_summary: None,
            quantitative_insights: None,
            data_analysis_summary: None,
            hypotheses: Vec::new(),
            research_plan: None,
            executive_summary: None,
            detailed_research_plan: None,
            report: None,
            quality_scores: BTreeMap::new(),
            retry_counts: BTreeMap::new(),
            quality_retry_counts: BTreeMap::new(),
            quality_flags: BTreeSet::new(),
            failed_stages: BTreeSet::new(),
            notes: Vec::new(),
            messages: Vec::new(),
            errors: Vec::new(),
            transitions: Vec::new(),
            last_attempt: None,
            pending_escalation: None,
            recovery_target: None,
            unhandled_escalations: Vec::new(),
        }
    }

    /// The research question. Immutable after creation.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn retry_count(&self, stage: Stage) -> u32 {
        self.retry_counts.get(&stage).copied().unwrap_or(0)
    }

    pub fn quality_retry_count(&self, stage: Stage) -> u32 {
        self.quality_retry_counts.get(&stage).copied().unwrap_or(0)
    }

    pub fn record_error(&mut self, stage: Stage, reason: impl Into<String>) {
        self.errors.push(ErrorRecord {
            stage,
            reason: reason.into(),
            timestamp: Timestamp::now(),
        });
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// Merges a stage's output slice into the state.
    pub fn apply(&mut self, slice: StateSlice) {
        match slice {
            StateSlice::Literature { papers } => self.append_papers(papers),
            StateSlice::Analysis {
                themes,
                gaps,
                contradictions,
                summary,
            } => {
                self.key_themes = themes;
                self.research_gaps = gaps;
                self.contradictions = contradictions;
                self.analysis_summary = Some(summary);
            }
            StateSlice::DataAnalysis { insights, summary } => {
                self.quantitative_insights = Some(insights);
                self.data_analysis_summary = Some(summary);
            }
            StateSlice::Hypotheses { hypotheses, plan } => {
                self.hypotheses = hypotheses;
                self.research_plan = plan;
            }
            StateSlice::Publication {
                executive_summary,
                detailed_research_plan,
                report,
            } => {
                self.executive_summary = Some(executive_summary);
                self.detailed_research_plan = Some(detailed_research_plan);
                self.report = Some(report);
            }
            StateSlice::Recovery { degraded, note, .. } => {
                if let Some(degraded) = degraded {
                    self.fill_empty(*degraded);
                }
                self.notes.push(note);
            }
        }
    }

    fn append_papers(&mut self, papers: Vec<PaperRecord>) {
        let mut seen: HashSet<_> = self.papers_found.iter().map(|p| p.id.clone()).collect();
        for paper in papers {
            if seen.insert(paper.id.clone()) {
                self.papers_found.push(paper);
            }
        }
    }

    /// Like [`apply`](Self::apply), but each field is only written if empty.
    fn fill_empty(&mut self, slice: StateSlice) {
        match slice {
            StateSlice::Literature { papers } => self.append_papers(papers),
            StateSlice::Analysis {
                themes,
                gaps,
                contradictions,
                summary,
            } => {
                if self.key_themes.is_empty() {
                    self.key_themes = themes;
                }
                if self.research_gaps.is_empty() {
                    self.research_gaps = gaps;
                }
                if self.contradictions.is_empty() {
                    self.contradictions = contradictions;
                }
                self.analysis_summary.get_or_insert(summary);
            }
            StateSlice::DataAnalysis { insights, summary } => {
                self.quantitative_insights.get_or_insert(insights);
                self.data_analysis_summary.get_or_insert(summary);
            }
            StateSlice::Hypotheses { hypotheses, plan } => {
                if self.hypotheses.is_empty() {
                    self.hypotheses = hypotheses;
                }
                if self.research_plan.is_none() {
                    self.research_plan = plan;
                }
            }
            StateSlice::Publication {
                executive_summary,
                detailed_research_plan,
                report,
            } => {
                self.executive_summary.get_or_insert(executive_summary);
                self.detailed_research_plan
                    .get_or_insert(detailed_research_plan);
                self.report.get_or_insert(report);
            }
            StateSlice::Recovery { note, .. } => self.notes.push(note),
        }
    }

    /// The text the quality assessor scores for `stage`.
    pub fn assessment_text(&self, stage: Stage) -> String {
        match stage {
            Stage::LiteratureSearch => self
                .papers_found
                .iter()
                .map(|p| format!("{}\n{}", p.title, p.abstract_text))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Stage::Analysis => {
                let mut parts: Vec<String> = Vec::new();
                parts.extend(self.key_themes.iter().map(|t| format!("theme: {}", t.theme)));
                parts.extend(
                    self.research_gaps
                        .iter()
                        .map(|g| format!("gap: {}", g.description)),
                );
                parts.extend(
                    self.contradictions
                        .iter()
                        .map(|c| format!("contradiction: {}", c.description)),
                );
                parts.extend(self.analysis_summary.clone());
                parts.join("\n")
            }
            Stage::DataAnalysis => {
                let mut parts: Vec<String> = Vec::new();
                if let Some(insights) = &self.quantitative_insights {
                    parts.extend(insights.research_patterns.iter().cloned());
                }
                parts.extend(self.data_analysis_summary.clone());
                parts.join("\n")
            }
            Stage::HypothesisGeneration => {
                let mut parts: Vec<String> = self
                    .hypotheses
                    .iter()
                    .map(|h| format!("{}\n{}", h.statement, h.rationale))
                    .collect();
                if let Some(plan) = &self.research_plan {
                    parts.extend(plan.methodology.iter().cloned());
                }
                parts.join("\n")
            }
            Stage::Publication => [
                self.executive_summary.as_deref(),
                self.detailed_research_plan.as_deref(),
                self.report.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n"),
            Stage::Coordinator => self.notes.last().cloned().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage output
// ---------------------------------------------------------------------------

/// The fields one stage is allowed to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "slice")]
pub enum StateSlice {
    Literature {
        papers: Vec<PaperRecord>,
    },
    Analysis {
        themes: Vec<ResearchTheme>,
        gaps: Vec<ResearchGap>,
        contradictions: Vec<Contradiction>,
        summary: String,
    },
    DataAnalysis {
        insights: QuantitativeInsights,
        summary: String,
    },
    Hypotheses {
        hypotheses: Vec<Hypothesis>,
        plan: Option<ResearchPlan>,
    },
    Publication {
        executive_summary: String,
        detailed_research_plan: String,
        report: String,
    },
    /// Coordinator output: an optional degraded slice for the stage it
    /// recovered, plus a note describing what was done.
    Recovery {
        target: Option<Stage>,
        degraded: Option<Box<StateSlice>>,
        note: String,
    },
}

impl StateSlice {
    /// The stage allowed to produce this slice.
    pub fn stage(&self) -> Stage {
        match self {
            StateSlice::Literature { .. } => Stage::LiteratureSearch,
            StateSlice::Analysis { .. } => Stage::Analysis,
            StateSlice::DataAnalysis { .. } => Stage::DataAnalysis,
            StateSlice::Hypotheses { .. } => Stage::HypothesisGeneration,
            StateSlice::Publication { .. } => Stage::Publication,
            StateSlice::Recovery { .. } => Stage::Coordinator,
        }
    }
}

/// Everything a worker returns from one successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub slice: StateSlice,
    /// Messages to post to the bus once the output is merged.
    pub outbox: Vec<AgentMessage>,
    /// Worker-local failures that did not fail the stage.
    pub absorbed_errors: Vec<String>,
}

impl StageOutput {
    pub fn new(slice: StateSlice) -> Self {
        Self {
            slice,
            outbox: Vec::new(),
            absorbed_errors: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: AgentMessage) -> Self {
        self.outbox.push(message);
        self
    }

    pub fn with_absorbed_error(mut self, reason: impl Into<String>) -> Self {
        self.absorbed_errors.push(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Level, PaperId, Provenance};

    fn paper(id: &str) -> PaperRecord {
        PaperRecord {
            id: PaperId::new(id).unwrap(),
            title: format!("Paper {id}"),
            authors: vec!["A. Author".into()],
            abstract_text: "abstract".into(),
            url: String::new(),
            source: "arxiv".into(),
            published: None,
            retrieved_at: Timestamp::now(),
        }
    }

    fn gap(description: &str, provenance: Provenance) -> ResearchGap {
        ResearchGap {
            description: description.into(),
            impact: Level::High,
            confidence: 0.7,
            provenance,
        }
    }

    #[test]
    fn test_new_state_is_pending_at_entry() {
        let state = WorkflowState::new(RunId::new_random(), "graphene batteries");
        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(state.current_stage, Stage::LiteratureSearch);
        assert_eq!(state.query(), "graphene batteries");
        assert!(state.quality_scores.is_empty());
    }

    #[test]
    fn test_paper_merge_skips_duplicates() {
        let mut state = WorkflowState::new(RunId::new_random(), "q");
        state.apply(StateSlice::Literature {
            papers: vec![paper("a"), paper("b")],
        });
        state.apply(StateSlice::Literature {
            papers: vec![paper("b"), paper("c")],
        });
        let ids: Vec<_> = state.papers_found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_retried_hypotheses_replace_rather_than_append() {
        let mut state = WorkflowState::new(RunId::new_random(), "q");
        let h = Hypothesis {
            statement: "X improves Y".into(),
            rationale: String::new(),
            testability: Level::High,
            provenance: Provenance::Worker,
        };
        for _ in 0..2 {
            state.apply(StateSlice::Hypotheses {
                hypotheses: vec![h.clone()],
                plan: None,
            });
        }
        assert_eq!(state.hypotheses.len(), 1);
    }

    #[test]
    fn test_recovery_slice_only_fills_empty_fields() {
        let mut state = WorkflowState::new(RunId::new_random(), "q");
        state.research_gaps = vec![gap("real gap", Provenance::Worker)];

        state.apply(StateSlice::Recovery {
            target: Some(Stage::Analysis),
            degraded: Some(Box::new(StateSlice::Analysis {
                themes: vec![ResearchTheme {
                    theme: "placeholder".into(),
                    trajectory: None,
                    confidence: 0.4,
                    provenance: Provenance::Recovery,
                }],
                gaps: vec![gap("placeholder gap", Provenance::Recovery)],
                contradictions: Vec::new(),
                summary: "recovered".into(),
            })),
            note: "analysis recovered".into(),
        });

        assert_eq!(state.research_gaps[0].description, "real gap");
        assert_eq!(state.key_themes[0].theme, "placeholder");
        assert_eq!(state.notes, ["analysis recovered"]);
    }

    #[test]
    fn test_slice_stage_mapping() {
        let slice = StateSlice::DataAnalysis {
            insights: QuantitativeInsights::default(),
            summary: String::new(),
        };
        assert_eq!(slice.stage(), Stage::DataAnalysis);
    }
}
