//! End-to-end runs of the workflow engine over scripted providers and workers.
//!
//! All tests run on a paused tokio clock, so backoff sleeps and slow workers
//! complete instantly while still advancing `tokio::time::Instant`.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use nodes::CoordinatorWorker;
use pipeline::{
    AgentMessage, Attachment, ProviderError, RouteReason, RouteTarget, RunConfig, RunStatus,
    Stage, StageError, StageOutput, WorkflowError, WorkflowState,
};

fn transitions_with(state: &WorkflowState, reason: RouteReason) -> Vec<(Stage, RouteTarget)> {
    state
        .transitions
        .iter()
        .filter(|t| t.reason == reason)
        .map(|t| (t.from, t.to))
        .collect()
}

// ---------------------------------------------------------------------------
// Happy path and failure retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_empty_searches_are_retried_until_papers_arrive() {
    let literature = Arc::new(ScriptedLiterature::new(vec![
        Ok(Vec::new()),
        Ok(Vec::new()),
        Ok(papers(3)),
    ]));
    let llm = Arc::new(ScriptedLlm::research("groq"));
    let engine = research_engine(literature.clone(), llm.clone(), Arc::new(MarkdownExtractor));
    let config = RunConfig {
        max_retries: 3,
        ..lenient_config()
    };

    let state = engine.run("graphene batteries", &config).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(literature.calls(), 3);
    assert_eq!(literature.requested(), [8, 8, 8]);
    assert_eq!(state.retry_count(Stage::LiteratureSearch), 2);
    assert_eq!(state.papers_found.len(), 3);
    assert_eq!(
        transitions_with(&state, RouteReason::FailureRetry),
        [
            (Stage::LiteratureSearch, RouteTarget::Stage(Stage::LiteratureSearch)),
            (Stage::LiteratureSearch, RouteTarget::Stage(Stage::LiteratureSearch)),
        ]
    );
    assert!(state.failed_stages.is_empty());
    assert!(state.errors.is_empty());

    assert_eq!(state.key_themes.len(), 2);
    assert_eq!(state.research_gaps.len(), 2);
    assert_eq!(state.hypotheses.len(), 2);
    let report = state.report.as_deref().unwrap();
    assert!(report.contains("## References"));
    assert!(report.contains("Graphene coatings reduce capacity fade"));
    assert!(state.detailed_research_plan.as_deref().unwrap().contains("## Objectives"));
    assert_eq!(engine.bus().pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_receives_data_summary_from_data_analysis() {
    let literature = Arc::new(ScriptedLiterature::always(papers(4)));
    let llm = Arc::new(ScriptedLlm::research("groq"));
    let engine = research_engine(literature, llm.clone(), Arc::new(MarkdownExtractor));

    let state = engine.run("graphene batteries", &lenient_config()).await.unwrap();

    let insights = state.quantitative_insights.as_ref().unwrap();
    assert_eq!(insights.paper_count, 4);
    assert_eq!(insights.total_authors, 5);
    let synthesis_prompt = llm
        .prompts()
        .into_iter()
        .find(|p| p.contains("testable hypotheses"))
        .unwrap();
    assert!(synthesis_prompt.contains("QUANTITATIVE CONTEXT"));
    assert!(synthesis_prompt.contains("Distinct authors: 5"));
}

#[tokio::test(start_paused = true)]
async fn test_stage_timeout_counts_as_a_retryable_failure() {
    let analysis = Arc::new(
        ScriptedWorker::succeeding(Stage::Analysis).with_delay(Duration::from_secs(5)),
    );
    let engine = scripted_engine(vec![analysis.clone()]);
    let config = RunConfig {
        stage_timeout_seconds: 1,
        ..lenient_config()
    };

    let state = engine.run("q", &config).await.unwrap();

    assert_eq!(analysis.calls(), 3);
    assert!(state.failed_stages.contains(&Stage::Analysis));
    let error = state.errors.iter().find(|e| e.stage == Stage::Analysis).unwrap();
    assert!(error.reason.contains("timed out"));
    assert!(error.reason.contains("after 3 attempt(s)"));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_is_not_retried() {
    let provider = provider_name("arxiv");
    let literature = Arc::new(ScriptedLiterature::new(vec![Err(
        ProviderError::Configuration {
            provider,
            message: "missing API key".to_string(),
        },
    )]));
    let llm = Arc::new(ScriptedLlm::research("groq"));
    let engine = research_engine(literature.clone(), llm, Arc::new(MarkdownExtractor));

    let state = engine.run("graphene batteries", &lenient_config()).await.unwrap();

    // Literature degrades; analysis is gated off; data analysis has nothing to
    // work with and falls back to the coordinator; hypotheses are gated off.
    assert_eq!(literature.calls(), 1);
    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.failed_stages.contains(&Stage::LiteratureSearch));
    assert!(state.failed_stages.contains(&Stage::DataAnalysis));
    assert!(state.notes.iter().any(|n| n.starts_with("analysis skipped")));
    assert!(state.notes.iter().any(|n| n.starts_with("hypothesis generation skipped")));
    assert_eq!(
        state.analysis_summary.as_deref(),
        Some("Analysis unavailable: no papers were found.")
    );
    assert!(state.hypotheses.is_empty());
    assert_eq!(state.quantitative_insights.as_ref().unwrap().paper_count, 0);
    assert!(state.report.as_deref().unwrap().contains("## Limitations"));
    assert_eq!(
        transitions_with(&state, RouteReason::Fallback),
        [(Stage::DataAnalysis, RouteTarget::Stage(Stage::Coordinator))]
    );
}

// ---------------------------------------------------------------------------
// Quality gate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_low_quality_output_is_retried_then_accepted_with_flag() {
    let analysis = Arc::new(ScriptedWorker::succeeding(Stage::Analysis));
    let engine = scripted_engine(vec![analysis.clone()]);
    let config = RunConfig {
        quality_threshold: 0.9,
        max_retries: 2,
        ..RunConfig::default()
    };

    let state = engine.run("graphene batteries", &config).await.unwrap();

    assert_eq!(analysis.calls(), 3);
    assert_eq!(state.quality_retry_count(Stage::Analysis), 2);
    assert_eq!(state.retry_count(Stage::Analysis), 0);
    assert!(state.quality_flags.contains(&Stage::Analysis));
    assert!(state
        .notes
        .iter()
        .any(|n| n.starts_with("analysis accepted below quality threshold")));
    // Re-running literature search must not duplicate papers.
    assert_eq!(state.papers_found.len(), 3);
    assert_eq!(state.status, RunStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_quality_retry_asks_the_model_again() {
    let theme_calls = Arc::new(AtomicU32::new(0));
    let counter = theme_calls.clone();
    let llm = Arc::new(ScriptedLlm::new("groq", move |prompt| {
        if prompt.contains("key themes") {
            let answer = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                r#"["Graphene"]"#
            } else {
                r#"["A rising trend in capacity retention", "A repeated pattern of SEI growth", "A dose relationship as the central finding"]"#
            };
            return Ok(answer.to_string());
        }
        Ok(research_answer(prompt).to_string())
    }));
    let literature = Arc::new(ScriptedLiterature::always(papers(3)));
    let engine = research_engine(literature, llm, Arc::new(MarkdownExtractor));
    let config = RunConfig {
        quality_threshold: 0.6,
        max_retries: 2,
        ..RunConfig::default()
    };

    let state = engine.run("graphene batteries", &config).await.unwrap();

    assert_eq!(theme_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.quality_retry_count(Stage::Analysis), 1);
    assert!(!state.quality_flags.contains(&Stage::Analysis));
    assert_eq!(state.key_themes.len(), 3);
    assert!(state.key_themes[0].theme.contains("rising trend"));
}

#[tokio::test(start_paused = true)]
async fn test_small_corpus_is_noted_without_messaging_literature_search() {
    let literature = Arc::new(ScriptedLiterature::always(papers(2)));
    let llm = Arc::new(ScriptedLlm::research("groq"));
    let engine = research_engine(literature.clone(), llm, Arc::new(MarkdownExtractor));

    let state = engine.run("graphene batteries", &lenient_config()).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(literature.calls(), 1);
    assert_eq!(literature.requested(), [8]);
    assert!(state
        .messages
        .iter()
        .all(|m| m.recipient != Stage::LiteratureSearch));
    assert!(state
        .analysis_summary
        .as_deref()
        .unwrap()
        .contains("Evidence base is limited: only 2 papers were available."));
}

// ---------------------------------------------------------------------------
// Escalation and recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_escalation_routes_to_coordinator_and_resumes() {
    let literature = Arc::new(ScriptedLiterature::always(papers(3)));
    let llm = Arc::new(ScriptedLlm::research("groq"));
    let engine = research_engine(literature, llm, Arc::new(MarkdownExtractor));
    let attachments = [Attachment::new("scan.pdf", vec![0xff, 0xfe, 0x00])];

    let state = engine
        .run_with_attachments("graphene batteries", &lenient_config(), &attachments)
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(
        transitions_with(&state, RouteReason::Escalation),
        [(Stage::DataAnalysis, RouteTarget::Stage(Stage::Coordinator))]
    );
    assert_eq!(
        transitions_with(&state, RouteReason::Resume),
        [(Stage::Coordinator, RouteTarget::Stage(Stage::HypothesisGeneration))]
    );
    assert!(state.messages.iter().any(AgentMessage::is_escalation));
    assert!(state
        .errors
        .iter()
        .any(|e| e.stage == Stage::DataAnalysis && e.reason.starts_with("scan.pdf")));
    assert!(state
        .notes
        .iter()
        .any(|n| n.contains("recovered stage data_analysis") && n.contains("failed extraction")));
    assert!(state.pending_escalation.is_none());
    assert!(state.recovery_target.is_none());
    assert_eq!(state.hypotheses.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_readable_attachments_are_outlined() {
    let literature = Arc::new(ScriptedLiterature::always(papers(3)));
    let llm = Arc::new(ScriptedLlm::research("groq"));
    let engine = research_engine(literature, llm, Arc::new(MarkdownExtractor));
    let attachments = [
        Attachment::new("a.md", "# Methods\ntext\n# Results\nmore"),
        Attachment::new("b.md", "# Methods\nother"),
    ];

    let state = engine
        .run_with_attachments("graphene batteries", &lenient_config(), &attachments)
        .await
        .unwrap();

    let insights = state.quantitative_insights.as_ref().unwrap();
    assert_eq!(insights.documents_processed, 2);
    assert_eq!(insights.sections_found.get("Methods"), Some(&2));
    assert_eq!(insights.sections_found.get("Results"), Some(&1));
    assert!(transitions_with(&state, RouteReason::Escalation).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_escalation_without_coordinator_is_recorded_as_unhandled() {
    let data = Arc::new(ScriptedWorker::new(Stage::DataAnalysis, |_, _| {
        Ok(StageOutput::new(standard_slice(Stage::DataAnalysis))
            .with_message(AgentMessage::escalate(Stage::DataAnalysis, "need a human")))
    }));
    let engine = scripted_engine(vec![data]);

    let state = engine.run("q", &lenient_config()).await.unwrap();

    assert_eq!(state.status, RunStatus::Escalated);
    assert_eq!(state.unhandled_escalations.len(), 1);
    assert_eq!(state.unhandled_escalations[0].from, Stage::DataAnalysis);
    assert!(!state.hypotheses.is_empty());
    assert!(state.report.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failing_mandatory_coordinator_aborts_with_partial_state() {
    let provider = provider_name("groq");
    let analysis = Arc::new(ScriptedWorker::failing(
        Stage::Analysis,
        StageError::Provider(ProviderError::Configuration {
            provider: provider.clone(),
            message: "bad key".to_string(),
        }),
    ));
    let coordinator = Arc::new(ScriptedWorker::failing(
        Stage::Coordinator,
        StageError::Provider(ProviderError::Configuration {
            provider,
            message: "bad key".to_string(),
        }),
    ));
    let engine = scripted_engine(vec![analysis, coordinator]);

    let err = engine.run("q", &lenient_config()).await.unwrap_err();

    let (stage, reason, state) = match err {
        WorkflowError::Fatal { stage, reason, state } => (stage, reason, state),
        other => panic!("expected a fatal error, got {other:?}"),
    };
    assert_eq!(stage, Stage::Coordinator);
    assert!(reason.contains("misconfigured"));
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.papers_found.len(), 3);
    assert!(state.failed_stages.contains(&Stage::Analysis));
    assert!(state.failed_stages.contains(&Stage::Coordinator));
}

#[tokio::test(start_paused = true)]
async fn test_real_coordinator_recovers_failed_analysis() {
    let analysis = Arc::new(ScriptedWorker::failing(
        Stage::Analysis,
        StageError::Provider(ProviderError::Configuration {
            provider: provider_name("groq"),
            message: "bad key".to_string(),
        }),
    ));
    let engine = scripted_engine(vec![analysis, Arc::new(CoordinatorWorker::new())]);

    let state = engine.run("graphene batteries", &lenient_config()).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.research_gaps.len(), 2);
    assert!(state
        .research_gaps
        .iter()
        .all(|g| g.provenance == pipeline::Provenance::Recovery));
    // Gaps exist again, so hypothesis generation is not gated off.
    assert!(!state.hypotheses.is_empty());
}

// ---------------------------------------------------------------------------
// Global budgets
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_global_timeout_returns_partial_state() {
    let literature = Arc::new(
        ScriptedWorker::succeeding(Stage::LiteratureSearch).with_delay(Duration::from_secs(5)),
    );
    let engine = scripted_engine(vec![literature]);
    let config = RunConfig {
        timeout_seconds: 1,
        ..lenient_config()
    };

    let err = engine.run("q", &config).await.unwrap_err();

    let (elapsed, limit, state) = match err {
        WorkflowError::Timeout { elapsed, limit, state } => (elapsed, limit, state),
        other => panic!("expected a timeout, got {other:?}"),
    };
    assert_eq!(limit, Duration::from_secs(1));
    assert!(elapsed >= Duration::from_secs(5));
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.papers_found.len(), 3);
    assert!(state
        .errors
        .last()
        .unwrap()
        .reason
        .starts_with("global timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_abandoned_when_backoff_would_cross_the_deadline() {
    let analysis = Arc::new(ScriptedWorker::failing(
        Stage::Analysis,
        StageError::Provider(ProviderError::Unavailable {
            provider: provider_name("groq"),
            message: "503".to_string(),
        }),
    ));
    let engine = scripted_engine(vec![analysis.clone()]);
    let config = RunConfig {
        timeout_seconds: 3,
        ..lenient_config()
    };

    let err = engine.run("q", &config).await.unwrap_err();

    // First retry waits 2s, the second would wait 4s and end past the deadline.
    assert!(matches!(err, WorkflowError::Timeout { .. }));
    assert_eq!(analysis.calls(), 2);
    let state = err.into_partial_state().unwrap();
    assert!(state
        .errors
        .iter()
        .any(|e| e.reason.contains("retry abandoned at global timeout")));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_configuration_is_rejected_before_running() {
    let literature = Arc::new(ScriptedWorker::succeeding(Stage::LiteratureSearch));
    let engine = scripted_engine(vec![literature.clone()]);
    let config = RunConfig {
        quality_threshold: 1.5,
        ..RunConfig::default()
    };

    let err = engine.run("q", &config).await.unwrap_err();

    assert!(matches!(err, WorkflowError::InvalidConfiguration(_)));
    assert!(err.partial_state().is_none());
    assert_eq!(literature.calls(), 0);
}
