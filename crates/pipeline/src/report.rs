//! The run invocation result, as handed back to callers.
//!
//! [`RunReport`] flattens `Result<WorkflowState, WorkflowError>` into one
//! serialisable record. A failed run still reports everything it accumulated.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::state::{ErrorRecord, RunStatus, StageTransition};
use crate::{
    Hypothesis, PaperRecord, QualityScore, ResearchGap, ResearchTheme, RunId, Stage,
    WorkflowError, WorkflowState,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Option<RunId>,
    pub query: String,
    pub status: RunStatus,
    /// Why the run ended early; `None` for runs the router terminated.
    pub failure: Option<String>,
    pub papers_found: Vec<PaperRecord>,
    pub key_themes: Vec<ResearchTheme>,
    pub research_gaps: Vec<ResearchGap>,
    pub hypotheses: Vec<Hypothesis>,
    pub executive_summary: Option<String>,
    pub detailed_research_plan: Option<String>,
    pub report: Option<String>,
    pub errors: Vec<ErrorRecord>,
    pub quality_scores: BTreeMap<Stage, QualityScore>,
    pub quality_flags: BTreeSet<Stage>,
    pub failed_stages: BTreeSet<Stage>,
    pub notes: Vec<String>,
    pub transitions: Vec<StageTransition>,
}

impl RunReport {
    /// Builds the report for a finished `run` call.
    ///
    /// `query` is only used when the run was rejected before a state existed.
    pub fn from_result(query: &str, result: Result<WorkflowState, WorkflowError>) -> Self {
        match result {
            Ok(state) => Self::from_state(state, None),
            Err(err) => {
                let failure = err.to_string();
                match err.into_partial_state() {
                    Some(state) => Self::from_state(state, Some(failure)),
                    None => Self::rejected(query, failure),
                }
            }
        }
    }

    pub fn from_state(state: WorkflowState, failure: Option<String>) -> Self {
        Self {
            run_id: Some(state.run_id),
            query: state.query().to_string(),
            status: state.status,
            failure,
            papers_found: state.papers_found,
            key_themes: state.key_themes,
            research_gaps: state.research_gaps,
            hypotheses: state.hypotheses,
            executive_summary: state.executive_summary,
            detailed_research_plan: state.detailed_research_plan,
            report: state.report,
            errors: state.errors,
            quality_scores: state.quality_scores,
            quality_flags: state.quality_flags,
            failed_stages: state.failed_stages,
            notes: state.notes,
            transitions: state.transitions,
        }
    }

    fn rejected(query: &str, failure: String) -> Self {
        Self {
            run_id: None,
            query: query.to_string(),
            status: RunStatus::Failed,
            failure: Some(failure),
            papers_found: Vec::new(),
            key_themes: Vec::new(),
            research_gaps: Vec::new(),
            hypotheses: Vec::new(),
            executive_summary: None,
            detailed_research_plan: None,
            report: None,
            errors: Vec::new(),
            quality_scores: BTreeMap::new(),
            quality_flags: BTreeSet::new(),
            failed_stages: BTreeSet::new(),
            notes: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Transitions and errors merged into one log, ordered by time.
    pub fn run_log(&self) -> Vec<RunLogEntry<'_>> {
        let mut entries: Vec<RunLogEntry<'_>> = self
            .transitions
            .iter()
            .map(RunLogEntry::Transition)
            .chain(self.errors.iter().map(RunLogEntry::Error))
            .collect();
        entries.sort_by_key(|entry| match entry {
            RunLogEntry::Transition(t) => t.at,
            RunLogEntry::Error(e) => e.timestamp,
        });
        entries
    }
}

/// One line of the observability run log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunLogEntry<'a> {
    Transition(&'a StageTransition),
    Error(&'a ErrorRecord),
}
