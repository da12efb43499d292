use async_trait::async_trait;
use pipeline::{
    AgentMessage, Contradiction, ProviderName, ResearchGap, ResearchTheme, Stage,
    StageError, StageOutput, StageView, StageWorker, StateSlice,
};
use tracing::{info, warn};

use super::parsing::{
    parse_contradictions, parse_gaps, parse_themes, paper_context, truncate_chars,
};
use crate::gateway::{CachePolicy, LlmGateway};

/// Below this many papers the summary notes that the evidence base is limited.
const MIN_PAPERS: usize = 3;
const CONTEXT_PAPERS: usize = 5;

/// Extracts themes, gaps and (with deep analysis) contradictions.
///
/// The three model calls are independent and run concurrently; the worker
/// still returns a single slice, and a failure in any call fails the attempt.
pub struct AnalysisWorker {
    llm: LlmGateway,
    provider_hint: Option<ProviderName>,
}

impl AnalysisWorker {
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

    async fn ask(&self, prompt: &str, policy: CachePolicy) -> Result<String, StageError> {
        Ok(self
            .llm
            .complete_with_policy(prompt, self.provider_hint.as_ref(), policy)
            .await?)
    }

    async fn themes(
        &self,
        query: &str,
        context: &str,
        policy: CachePolicy,
    ) -> Result<Vec<ResearchTheme>, StageError> {
        let prompt = format!(
            "You are a research analyst identifying key themes across scientific literature.\n\
             Based on the following papers and the query \"{query}\", identify the 3-5 most \
             important research themes.\n\nPAPERS:\n{context}\n\n\
             Respond with a JSON array of theme strings."
        );
        let text = self.ask(&prompt, policy).await?;
        Ok(parse_themes(&text))
    }

    async fn gaps(
        &self,
        query: &str,
        context: &str,
        policy: CachePolicy,
    ) -> Result<Vec<ResearchGap>, StageError> {
        let prompt = format!(
            "You are a research analyst identifying gaps in scientific literature.\n\
             Based on the following papers and the query \"{query}\", identify 2-4 significant \
             research gaps.\n\nPAPERS:\n{context}\n\n\
             Respond with a JSON array of objects with \"description\" and \"impact\" \
             (High/Medium/Low) fields."
        );
        let text = self.ask(&prompt, policy).await?;
        Ok(parse_gaps(&text))
    }

    async fn contradictions(
        &self,
        context: &str,
        policy: CachePolicy,
    ) -> Result<Vec<Contradiction>, StageError> {
        let prompt = format!(
            "You are a research analyst. Identify 1-3 contradictions or conflicting findings \
             between the following papers.\n\nPAPERS:\n{context}\n\n\
             Respond with a JSON array of contradiction descriptions."
        );
        let text = self.ask(&prompt, policy).await?;
        Ok(parse_contradictions(&text)
            .into_iter()
            .map(|description| Contradiction {
                description,
                resolution: None,
            })
            .collect())
    }
}

#[async_trait]
impl StageWorker for AnalysisWorker {
    fn stage(&self) -> Stage {
        Stage::Analysis
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let papers = &view.state.papers_found;
        if papers.is_empty() {
            return Err(StageError::EmptyOutput {
                stage: Stage::Analysis,
                detail: "no papers to analyse".to_string(),
            });
        }

        let query = view.state.query();
        let context = paper_context(papers, CONTEXT_PAPERS);
        let deep = view.config.enable_deep_analysis;
        let policy = CachePolicy::for_view(&view);

        let (themes, gaps, contradictions) = tokio::try_join!(
            self.themes(query, &context, policy),
            self.gaps(query, &context, policy),
            async {
                if deep {
                    self.contradictions(&context, policy).await
                } else {
                    Ok(Vec::new())
                }
            }
        )?;

        let summary = summarize(papers.len(), &themes, &gaps, &contradictions);
        info!(
            themes = themes.len(),
            gaps = gaps.len(),
            contradictions = contradictions.len(),
            "analysis complete"
        );

        let nothing_found = themes.is_empty() && gaps.is_empty();
        let mut output = StageOutput::new(StateSlice::Analysis {
            themes,
            gaps,
            contradictions,
            summary,
        });

        if nothing_found {
            warn!("model output contained neither themes nor gaps");
            output = output.with_message(AgentMessage::escalate(
                Stage::Analysis,
                "model output contained neither themes nor research gaps",
            ));
        }
        Ok(output)
    }
}

fn summarize(
    paper_count: usize,
    themes: &[ResearchTheme],
    gaps: &[ResearchGap],
    contradictions: &[Contradiction],
) -> String {
    let mut lines = vec![format!(
        "Analysis of {paper_count} papers found {} themes and {} research gaps.",
        themes.len(),
        gaps.len()
    )];
    if paper_count < MIN_PAPERS {
        lines.push(format!(
            "Evidence base is limited: only {paper_count} papers were available."
        ));
    }
    if !themes.is_empty() {
        lines.push("Key themes:".to_string());
        lines.extend(
            themes
                .iter()
                .take(5)
                .enumerate()
                .map(|(i, t)| format!("  {}. {}", i + 1, t.theme)),
        );
    }
    if !gaps.is_empty() {
        lines.push("Research gaps:".to_string());
        lines.extend(gaps.iter().take(4).enumerate().map(|(i, g)| {
            format!(
                "  {}. {} (impact: {})",
                i + 1,
                truncate_chars(&g.description, 100),
                g.impact
            )
        }));
    }
    if !contradictions.is_empty() {
        lines.push("Contradictory findings:".to_string());
        lines.extend(
            contradictions
                .iter()
                .take(3)
                .enumerate()
                .map(|(i, c)| format!("  {}. {}", i + 1, truncate_chars(&c.description, 120))),
        );
    }
    lines.join("\n")
}
