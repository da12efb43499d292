use std::fmt::Write as _;

use async_trait::async_trait;
use pipeline::{
    PaperRecord, ProviderName, ResearchPlan, Stage, StageError, StageOutput, StageView,
    StageWorker, StateSlice, WorkflowState,
};
use tracing::info;

use super::parsing::truncate_chars;
use crate::gateway::{CachePolicy, LlmGateway};

/// Writes the executive summary, the detailed plan and the markdown report.
///
/// Only the executive summary needs the model; the plan and report are
/// rendered from state so they are present even when upstream stages degraded.
pub struct PublicationWorker {
    llm: LlmGateway,
    provider_hint: Option<ProviderName>,
}

impl PublicationWorker {
    pub fn new(llm: LlmGateway) -> Self {
        Self {
            llm,
            provider_hint: None,
        }
    }

    pub fn with_provider_hint(mut self, hint: Option<ProviderName>) -> Self {
        self.provider_hint = hint;
        self
    }
}

fn summary_prompt(state: &WorkflowState) -> String {
    let themes: Vec<&str> = state.key_themes.iter().take(5).map(|t| t.theme.as_str()).collect();
    let gaps: Vec<&str> = state
        .research_gaps
        .iter()
        .take(4)
        .map(|g| g.description.as_str())
        .collect();
    let hypotheses: Vec<&str> = state
        .hypotheses
        .iter()
        .take(4)
        .map(|h| h.statement.as_str())
        .collect();
    format!(
        "Write an executive summary (150-250 words) of a literature review on \"{}\" covering \
         {} papers. Summarise the main findings, the research gaps and the proposed hypotheses, \
         and close with recommendations.\n\nTHEMES: {}\nGAPS: {}\nHYPOTHESES: {}",
        state.query(),
        state.papers_found.len(),
        themes.join("; "),
        gaps.join("; "),
        hypotheses.join("; "),
    )
}

/// Markdown rendering of a research plan.
pub fn render_plan(plan: &ResearchPlan) -> String {
    let mut out = format!("# {}\n", plan.title);
    section(&mut out, "Objectives", plan.objectives.iter().map(String::as_str));
    section(&mut out, "Methodology", plan.methodology.iter().map(String::as_str));
    out.push_str("\n## Timeline\n");
    for milestone in &plan.timeline {
        let _ = writeln!(out, "- **{}**: {}", milestone.phase, milestone.activity);
    }
    section(
        &mut out,
        "Expected outcomes",
        plan.expected_outcomes.iter().map(String::as_str),
    );
    out
}

fn section<'a>(out: &mut String, heading: &str, items: impl Iterator<Item = &'a str>) {
    let _ = writeln!(out, "\n## {heading}");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

/// `Authors (Year). Title. Source. URL`
pub fn citation(paper: &PaperRecord) -> String {
    let authors = match paper.authors.as_slice() {
        [] => "Unknown".to_string(),
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [first, ..] => format!("{first} et al."),
    };
    let year = paper.published_year().unwrap_or("n.d.");
    let mut citation = format!("{authors} ({year}). {}. {}.", paper.title.trim(), paper.source);
    if !paper.url.is_empty() {
        citation.push(' ');
        citation.push_str(&paper.url);
    }
    citation
}

/// The full markdown report.
pub fn render_report(state: &WorkflowState, executive_summary: &str) -> String {
    let mut out = format!("# Research report: {}\n\n", state.query());
    let _ = writeln!(out, "## Executive summary\n\n{}", executive_summary.trim());

    if !state.key_themes.is_empty() {
        out.push_str("\n## Key findings\n");
        for theme in &state.key_themes {
            let _ = writeln!(out, "- {}", theme.theme);
        }
    }
    if !state.research_gaps.is_empty() {
        out.push_str("\n## Research gaps\n");
        for gap in &state.research_gaps {
            let _ = writeln!(out, "- {} (impact: {})", gap.description, gap.impact);
        }
    }
    if !state.contradictions.is_empty() {
        out.push_str("\n## Contradictory findings\n");
        for contradiction in &state.contradictions {
            let _ = writeln!(out, "- {}", contradiction.description);
        }
    }
    if let Some(summary) = &state.data_analysis_summary {
        let _ = writeln!(out, "\n## Quantitative overview\n\n{summary}");
    }
    if !state.hypotheses.is_empty() {
        out.push_str("\n## Hypotheses\n");
        for (i, hypothesis) in state.hypotheses.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. {} (testability: {})",
                i + 1,
                hypothesis.statement,
                hypothesis.testability
            );
            if !hypothesis.rationale.is_empty() {
                let _ = writeln!(out, "   Rationale: {}", truncate_chars(&hypothesis.rationale, 300));
            }
        }
    }

    let caveats = caveats(state);
    if !caveats.is_empty() {
        out.push_str("\n## Limitations\n");
        for caveat in caveats {
            let _ = writeln!(out, "- {caveat}");
        }
    }

    if !state.papers_found.is_empty() {
        out.push_str("\n## References\n");
        for (i, paper) in state.papers_found.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, citation(paper));
        }
    }
    out
}

fn caveats(state: &WorkflowState) -> Vec<String> {
    let mut caveats: Vec<String> = state
        .failed_stages
        .iter()
        .map(|stage| format!("Stage {stage} failed; its results are missing or recovered"))
        .collect();
    caveats.extend(
        state
            .quality_flags
            .iter()
            .map(|stage| format!("Stage {stage} was accepted below the quality threshold")),
    );
    if state.quantitative_insights.is_none() {
        caveats.push("Quantitative analysis unavailable".to_string());
    }
    caveats.extend(state.notes.iter().cloned());
    caveats
}

#[async_trait]
impl StageWorker for PublicationWorker {
    fn stage(&self) -> Stage {
        Stage::Publication
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let state = view.state;
        let executive_summary = self
            .llm
            .complete_with_policy(
                &summary_prompt(state),
                self.provider_hint.as_ref(),
                CachePolicy::for_view(&view),
            )
            .await?;
        if executive_summary.trim().is_empty() {
            return Err(StageError::EmptyOutput {
                stage: Stage::Publication,
                detail: "empty executive summary".to_string(),
            });
        }

        let detailed_research_plan = match &state.research_plan {
            Some(plan) => render_plan(plan),
            None => format!(
                "# Research plan: {}\n\nNo research plan is available for this run.\n",
                state.query()
            ),
        };
        let report = render_report(state, &executive_summary);
        info!(report_chars = report.len(), "publication complete");

        Ok(StageOutput::new(StateSlice::Publication {
            executive_summary: executive_summary.trim().to_string(),
            detailed_research_plan,
            report,
        }))
    }
}
