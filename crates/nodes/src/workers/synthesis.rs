use async_trait::async_trait;
use pipeline::{
    Hypothesis, Level, MessageType, Milestone, ProviderName, ResearchPlan, Stage, StageError,
    StageOutput, StageView, StageWorker, StateSlice,
};
use tracing::info;

use super::parsing::{parse_hypotheses, truncate_chars};
use crate::gateway::{CachePolicy, LlmGateway};

/// Generates testable hypotheses and a research plan from the analysis.
pub struct SynthesisWorker {
    llm: LlmGateway,
    provider_hint: Option<ProviderName>,
}

impl SynthesisWorker {
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

fn prompt(view: &StageView<'_>) -> String {
    let state = view.state;
    let themes = if state.key_themes.is_empty() {
        "unknown themes".to_string()
    } else {
        state
            .key_themes
            .iter()
            .take(3)
            .map(|t| t.theme.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let gaps = state
        .research_gaps
        .iter()
        .take(3)
        .map(|g| format!("- {} (impact: {})", g.description, g.impact))
        .collect::<Vec<_>>()
        .join("\n");
    let shared: Vec<&str> = view
        .inbox
        .iter()
        .filter(|m| m.message_type == MessageType::ShareResource)
        .filter_map(|m| m.content.get("data_summary").and_then(|s| s.as_str()))
        .collect();

    let mut prompt = format!(
        "You are a research scientist generating testable hypotheses from a literature \
         analysis.\n\nRESEARCH QUERY: {}\nKEY THEMES: {themes}\nRESEARCH GAPS:\n{gaps}\n",
        state.query()
    );
    if let Some(data) = shared.last() {
        prompt.push_str(&format!("QUANTITATIVE CONTEXT:\n{}\n", truncate_chars(data, 800)));
    }
    prompt.push_str(
        "\nGenerate 2-4 hypotheses that address the gaps, are specific and testable, and have \
         practical implications. Respond with a JSON array of objects with \"statement\", \
         \"rationale\" and \"testability\" (High/Medium/Low) fields.",
    );
    prompt
}

/// Deterministic plan scaffold around the generated hypotheses.
pub fn research_plan(query: &str, hypotheses: &[Hypothesis]) -> ResearchPlan {
    let objectives = hypotheses
        .iter()
        .map(|h| format!("Test whether {}", lowercase_first(&h.statement)))
        .collect();

    let mut methodology = vec![
        "Systematic review to consolidate baseline results".to_string(),
        "Controlled experiments with predefined success metrics".to_string(),
    ];
    if hypotheses.iter().any(|h| h.testability == Level::Low) {
        methodology.push("Exploratory qualitative study for hard-to-measure hypotheses".to_string());
    }
    methodology.push("Statistical analysis with replication across datasets".to_string());

    ResearchPlan {
        title: format!("Research plan: {query}"),
        objectives,
        methodology,
        timeline: vec![
            milestone("Months 1-3", "Literature consolidation and study design"),
            milestone("Months 4-9", "Data collection and experiments"),
            milestone("Months 10-12", "Analysis, write-up and dissemination"),
        ],
        expected_outcomes: vec![
            format!("Evidence for or against {} hypotheses", hypotheses.len()),
            "A reusable evaluation protocol".to_string(),
        ],
    }
}

fn milestone(phase: &str, activity: &str) -> Milestone {
    Milestone {
        phase: phase.to_string(),
        activity: activity.to_string(),
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl StageWorker for SynthesisWorker {
    fn stage(&self) -> Stage {
        Stage::HypothesisGeneration
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let text = self
            .llm
            .complete_with_policy(
                &prompt(&view),
                self.provider_hint.as_ref(),
                CachePolicy::for_view(&view),
            )
            .await?;
        let hypotheses = parse_hypotheses(&text);
        if hypotheses.is_empty() {
            return Err(StageError::EmptyOutput {
                stage: Stage::HypothesisGeneration,
                detail: "model output contained no hypotheses".to_string(),
            });
        }

        let plan = research_plan(view.state.query(), &hypotheses);
        info!(hypotheses = hypotheses.len(), "synthesis complete");
        Ok(StageOutput::new(StateSlice::Hypotheses {
            hypotheses,
            plan: Some(plan),
        }))
    }
}
