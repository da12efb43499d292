use async_trait::async_trait;
use pipeline::{
    Contradiction, Hypothesis, Level, Provenance, ResearchGap, ResearchPlan, ResearchTheme,
    Stage, StageError, StageOutput, StageView, StageWorker, StateSlice, WorkflowState,
};
use tracing::{info, warn};

use super::data_analysis::paper_insights;
use super::synthesis::research_plan;

const RECOVERY_CONFIDENCE: f64 = 0.3;
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "for", "from", "in", "into", "is", "of", "on",
    "or", "the", "to", "using", "via", "with",
];

/// Rule-based recovery for failed or escalated stages.
///
/// Never calls a model. Whatever it produces is marked
/// [`Provenance::Recovery`] and only fills fields that are still empty.
#[derive(Debug, Default)]
pub struct CoordinatorWorker;

impl CoordinatorWorker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageWorker for CoordinatorWorker {
    fn stage(&self) -> Stage {
        Stage::Coordinator
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let state = view.state;
        let target = state.recovery_target;
        let reasons: Vec<String> = view
            .inbox
            .iter()
            .filter(|m| m.is_escalation())
            .map(|m| format!("{}: {}", m.sender, m.reason()))
            .collect();

        let degraded = target.and_then(|stage| degraded_slice(stage, state));
        let note = match (target, &degraded) {
            (Some(stage), Some(_)) => {
                format!("coordinator recovered stage {stage} with rule-based placeholders")
            }
            (Some(stage), None) => {
                format!("coordinator could not recover stage {stage}; continuing without it")
            }
            (None, _) => "coordinator had no stage to recover".to_string(),
        };
        let note = if reasons.is_empty() {
            note
        } else {
            format!("{note} (escalations: {})", reasons.join("; "))
        };

        match target {
            Some(stage) if degraded.is_some() => info!(%stage, "recovery applied"),
            _ => warn!(recovery_target = ?target, "nothing to recover"),
        }

        Ok(StageOutput::new(StateSlice::Recovery {
            target,
            degraded: degraded.map(Box::new),
            note,
        }))
    }
}

fn degraded_slice(stage: Stage, state: &WorkflowState) -> Option<StateSlice> {
    match stage {
        // Papers cannot be invented.
        Stage::LiteratureSearch | Stage::Coordinator => None,
        Stage::Analysis => Some(recover_analysis(state)),
        Stage::DataAnalysis => {
            let insights = paper_insights(&state.papers_found);
            let summary = format!(
                "Recovered quantitative overview: {} papers, {} distinct authors.",
                insights.paper_count, insights.total_authors
            );
            Some(StateSlice::DataAnalysis { insights, summary })
        }
        Stage::HypothesisGeneration => {
            let hypotheses = recover_hypotheses(state);
            let plan = research_plan(state.query(), &hypotheses);
            Some(StateSlice::Hypotheses {
                hypotheses,
                plan: Some(plan),
            })
        }
        Stage::Publication => Some(recover_publication(state)),
    }
}

/// Salient words of the query and paper titles, most frequent first.
fn keywords(state: &WorkflowState, limit: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let titles = state.papers_found.iter().map(|p| p.title.as_str());
    for text in std::iter::once(state.query()).chain(titles) {
        for word in text.split(|c: char| !c.is_alphanumeric() && c != '-') {
            let word = word.to_lowercase();
            if word.chars().count() < 4 || STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            match counts.iter_mut().find(|(w, _)| *w == word) {
                Some((_, n)) => *n += 1,
                None => counts.push((word, 1)),
            }
        }
    }
    // Stable sort keeps first-seen order among ties.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(limit).map(|(w, _)| w).collect()
}

fn recover_analysis(state: &WorkflowState) -> StateSlice {
    let query = state.query();
    let themes: Vec<ResearchTheme> = keywords(state, 3)
        .into_iter()
        .map(|word| ResearchTheme {
            theme: format!("Research on {word}"),
            trajectory: None,
            confidence: RECOVERY_CONFIDENCE,
            provenance: Provenance::Recovery,
        })
        .collect();
    let gaps = vec![
        ResearchGap {
            description: format!("Limited long-term evaluation of {query}"),
            impact: Level::Medium,
            confidence: RECOVERY_CONFIDENCE,
            provenance: Provenance::Recovery,
        },
        ResearchGap {
            description: format!("Few comparative studies across approaches to {query}"),
            impact: Level::Medium,
            confidence: RECOVERY_CONFIDENCE,
            provenance: Provenance::Recovery,
        },
    ];
    let summary = format!(
        "Recovered analysis of {} papers: findings are rule-based placeholders, not model output.",
        state.papers_found.len()
    );
    StateSlice::Analysis {
        themes,
        gaps,
        contradictions: Vec::<Contradiction>::new(),
        summary,
    }
}

fn recover_hypotheses(state: &WorkflowState) -> Vec<Hypothesis> {
    let topic = state
        .research_gaps
        .first()
        .map(|g| g.description.clone())
        .unwrap_or_else(|| state.query().to_string());
    vec![
        Hypothesis {
            statement: format!("Addressing \"{topic}\" yields measurable improvement over current baselines"),
            rationale: "Derived from the first identified research gap".to_string(),
            testability: Level::Medium,
            provenance: Provenance::Recovery,
        },
        Hypothesis {
            statement: format!(
                "Results on {} generalise across independent datasets",
                state.query()
            ),
            rationale: "Replication is a common gap in surveyed literature".to_string(),
            testability: Level::Medium,
            provenance: Provenance::Recovery,
        },
    ]
}

fn recover_publication(state: &WorkflowState) -> StateSlice {
    let executive_summary = format!(
        "Recovered summary for \"{}\": {} papers, {} themes, {} research gaps and {} hypotheses \
         were collected before publication failed.",
        state.query(),
        state.papers_found.len(),
        state.key_themes.len(),
        state.research_gaps.len(),
        state.hypotheses.len()
    );
    let plan = state.research_plan.clone().unwrap_or_else(|| ResearchPlan {
        title: format!("Research plan: {}", state.query()),
        ..ResearchPlan::default()
    });
    let detailed_research_plan = super::publication::render_plan(&plan);
    let report = super::publication::render_report(state, &executive_summary);
    StateSlice::Publication {
        executive_summary,
        detailed_research_plan,
        report,
    }
}
