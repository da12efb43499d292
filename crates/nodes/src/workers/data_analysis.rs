use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    AgentMessage, DocumentExtractor, MessageType, PaperRecord, ProviderName,
    QuantitativeInsights, Stage, StageError, StageOutput, StageView, StageWorker, StateSlice,
};
use tracing::{info, warn};

use crate::gateway::{CachePolicy, LlmGateway};

/// Quantitative overview of the collected papers and attached documents.
///
/// Extraction failures are absorbed into the run's error log. The stage only
/// fails when it has neither papers nor a single readable document.
pub struct DataAnalysisWorker {
    extractor: Arc<dyn DocumentExtractor>,
    llm: Option<LlmGateway>,
    provider_hint: Option<ProviderName>,
}

impl DataAnalysisWorker {
    pub fn new(extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self {
            extractor,
            llm: None,
            provider_hint: None,
        }
    }

    /// Enables the statistical narrative when deep analysis is on.
    pub fn with_llm(mut self, llm: LlmGateway, provider_hint: Option<ProviderName>) -> Self {
        self.llm = Some(llm);
        self.provider_hint = provider_hint;
        self
    }
}

#[async_trait]
impl StageWorker for DataAnalysisWorker {
    fn stage(&self) -> Stage {
        Stage::DataAnalysis
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let papers = &view.state.papers_found;
        let mut insights = paper_insights(papers);
        let mut absorbed = Vec::new();

        for attachment in view.attachments {
            match self.extractor.extract(&attachment.bytes) {
                Ok(text) => {
                    insights.documents_processed += 1;
                    for section in self.extractor.outline(&text) {
                        *insights.sections_found.entry(section).or_insert(0) += 1;
                    }
                }
                Err(err) => {
                    warn!(document = %attachment.name, error = %err, "document extraction failed");
                    absorbed.push(format!("{}: {err}", attachment.name));
                }
            }
        }

        if papers.is_empty() && insights.documents_processed == 0 {
            return Err(StageError::EmptyOutput {
                stage: Stage::DataAnalysis,
                detail: "no papers and no readable documents".to_string(),
            });
        }

        let mut summary = summarize(&insights);
        if view.config.enable_deep_analysis {
            if let Some(llm) = &self.llm {
                let prompt = format!(
                    "Write a short statistical narrative (3-4 sentences) for a literature survey \
                     on \"{}\" using these figures:\n{summary}",
                    view.state.query()
                );
                let policy = CachePolicy::for_view(&view);
                match llm
                    .complete_with_policy(&prompt, self.provider_hint.as_ref(), policy)
                    .await
                {
                    Ok(narrative) => {
                        summary.push_str("\n\nNarrative:\n");
                        summary.push_str(narrative.trim());
                    }
                    Err(err) => absorbed.push(format!("statistical narrative unavailable: {err}")),
                }
            }
        }

        info!(
            papers = insights.paper_count,
            authors = insights.total_authors,
            documents = insights.documents_processed,
            "data analysis complete"
        );

        let all_documents_failed =
            !view.attachments.is_empty() && insights.documents_processed == 0;
        let mut output = StageOutput::new(StateSlice::DataAnalysis {
            insights,
            summary: summary.clone(),
        })
        .with_message(AgentMessage::new(
            Stage::DataAnalysis,
            Stage::HypothesisGeneration,
            MessageType::ShareResource,
            serde_json::json!({ "data_summary": summary }),
        ));
        for reason in absorbed {
            output = output.with_absorbed_error(reason);
        }
        if all_documents_failed {
            output = output.with_message(AgentMessage::escalate(
                Stage::DataAnalysis,
                format!("all {} attached documents failed extraction", view.attachments.len()),
            ));
        }
        Ok(output)
    }
}

/// Paper statistics. Pure.
pub fn paper_insights(papers: &[PaperRecord]) -> QuantitativeInsights {
    let authors: HashSet<&str> = papers
        .iter()
        .flat_map(|p| p.authors.iter().map(String::as_str))
        .collect();

    let abstract_words: Vec<usize> = papers
        .iter()
        .map(|p| p.abstract_text.split_whitespace().count())
        .filter(|&words| words > 0)
        .collect();
    let average_abstract_words = if abstract_words.is_empty() {
        0.0
    } else {
        abstract_words.iter().sum::<usize>() as f64 / abstract_words.len() as f64
    };

    let mut source_distribution = BTreeMap::new();
    let mut publication_years = BTreeMap::new();
    for paper in papers {
        *source_distribution.entry(paper.source.clone()).or_insert(0) += 1;
        if let Some(year) = paper.published_year() {
            *publication_years.entry(year.to_string()).or_insert(0) += 1;
        }
    }

    let mut insights = QuantitativeInsights {
        paper_count: papers.len(),
        total_authors: authors.len(),
        average_abstract_words,
        source_distribution,
        publication_years,
        ..QuantitativeInsights::default()
    };
    insights.research_patterns = research_patterns(&insights, papers);
    insights
}

fn research_patterns(insights: &QuantitativeInsights, papers: &[PaperRecord]) -> Vec<String> {
    let mut patterns = Vec::new();
    if insights.paper_count == 0 {
        return patterns;
    }
    patterns.push(format!(
        "Found {} papers indicating active research on the topic",
        insights.paper_count
    ));

    let author_slots: usize = papers.iter().map(|p| p.authors.len()).sum();
    let per_paper = author_slots as f64 / insights.paper_count as f64;
    if per_paper >= 4.0 {
        patterns.push(format!(
            "Highly collaborative field: {per_paper:.1} authors per paper on average"
        ));
    } else if per_paper > 0.0 {
        patterns.push(format!("Small research teams: {per_paper:.1} authors per paper on average"));
    }

    if let Some((year, count)) = insights.publication_years.iter().max_by_key(|(_, c)| **c) {
        patterns.push(format!("Publication activity peaks in {year} ({count} papers)"));
    }
    if let Some((source, count)) = insights.source_distribution.iter().max_by_key(|(_, c)| **c) {
        patterns.push(format!("Most papers come from {source} ({count})"));
    }
    patterns
}

fn summarize(insights: &QuantitativeInsights) -> String {
    let mut lines = vec![
        "Quantitative overview:".to_string(),
        format!("- Papers analysed: {}", insights.paper_count),
        format!("- Distinct authors: {}", insights.total_authors),
        format!(
            "- Average abstract length: {:.0} words",
            insights.average_abstract_words
        ),
    ];
    if !insights.source_distribution.is_empty() {
        let sources: Vec<String> = insights
            .source_distribution
            .iter()
            .map(|(source, count)| format!("{source}: {count}"))
            .collect();
        lines.push(format!("- Source distribution: {}", sources.join(", ")));
    }
    if insights.documents_processed > 0 {
        lines.push(format!(
            "- Documents processed: {} ({} distinct sections)",
            insights.documents_processed,
            insights.sections_found.len()
        ));
    }
    if !insights.research_patterns.is_empty() {
        lines.push("Research patterns:".to_string());
        lines.extend(insights.research_patterns.iter().map(|p| format!("- {p}")));
    }
    lines.join("\n")
}
