//! Scripted providers and workers shared by the engine and gateway tests.
//!
//! Nothing here touches the network. Providers answer from a script or a
//! prompt-matching responder and record every call so tests can assert on
//! how often the engine went back to them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodes::workers::{
    AnalysisWorker, CoordinatorWorker, DataAnalysisWorker, LiteratureScanWorker,
    PublicationWorker, SynthesisWorker,
};
use nodes::{LiteratureGateway, LlmGateway, WorkflowEngine};
use parking_lot::Mutex;
use pipeline::{
    DocumentExtractor, ExtractionError, Hypothesis, InMemoryCache, LiteratureProvider, Level,
    LlmProvider, PaperId, PaperRecord, ProviderError, ProviderName, Provenance,
    QuantitativeInsights, ResearchGap, ResearchTheme, RunConfig, Stage, StageError, StageOutput,
    StageView, StageWorker, StateSlice, Timestamp,
};

pub fn provider_name(name: &str) -> ProviderName {
    ProviderName::new(name).unwrap()
}

pub fn paper(n: usize) -> PaperRecord {
    PaperRecord {
        id: PaperId::new(format!("arxiv:{n}")).unwrap(),
        title: format!("Graphene anode study {n}"),
        authors: vec![format!("Author {n}"), "Shared Author".to_string()],
        abstract_text: "We propose a method and report results from a study of graphene anodes."
            .to_string(),
        url: format!("https://arxiv.org/abs/{n}"),
        source: "arxiv".to_string(),
        published: Some("2023-04-01".to_string()),
        retrieved_at: Timestamp::now(),
    }
}

pub fn papers(count: usize) -> Vec<PaperRecord> {
    (1..=count).map(paper).collect()
}

/// Quality checks off, so only failures and escalations change the route.
pub fn lenient_config() -> RunConfig {
    RunConfig {
        quality_threshold: 0.0,
        ..RunConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Literature provider answering from a script, then repeating its last answer.
pub struct ScriptedLiterature {
    name: ProviderName,
    script: Mutex<VecDeque<Result<Vec<PaperRecord>, ProviderError>>>,
    last: Mutex<Result<Vec<PaperRecord>, ProviderError>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedLiterature {
    pub fn new(script: Vec<Result<Vec<PaperRecord>, ProviderError>>) -> Self {
        Self {
            name: provider_name("arxiv"),
            script: Mutex::new(script.into()),
            last: Mutex::new(Ok(Vec::new())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(papers: Vec<PaperRecord>) -> Self {
        Self::new(vec![Ok(papers)])
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// `max_results` of every call, in order.
    pub fn requested(&self) -> Vec<usize> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LiteratureProvider for ScriptedLiterature {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn search(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<PaperRecord>, ProviderError> {
        self.calls.lock().push(max_results);
        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => {
                *self.last.lock() = outcome.clone();
                outcome
            }
            None => self.last.lock().clone(),
        }
    }
}

type Responder = Box<dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync>;

/// Language model answering through a prompt-matching closure.
pub struct ScriptedLlm {
    name: ProviderName,
    responder: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(
        name: &str,
        responder: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: provider_name(name),
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Plausible answers for every prompt the research workers send.
    pub fn research(name: &str) -> Self {
        Self::new(name, |prompt| Ok(research_answer(prompt).to_string()))
    }

    pub fn rate_limited(name: &str) -> Self {
        let provider = provider_name(name);
        Self::new(name, move |_| {
            Err(ProviderError::RateLimited {
                provider: provider.clone(),
                retry_after: None,
            })
        })
    }

    pub fn unavailable(name: &str) -> Self {
        let provider = provider_name(name);
        Self::new(name, move |_| {
            Err(ProviderError::Unavailable {
                provider: provider.clone(),
                message: "connection refused".to_string(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

pub fn research_answer(prompt: &str) -> &'static str {
    if prompt.contains("executive summary") {
        "Graphene anodes show consistent capacity gains; long-cycle evidence remains thin."
    } else if prompt.contains("testable hypotheses") {
        r#"[{"statement": "Graphene coatings reduce capacity fade", "rationale": "SEI stabilisation", "testability": "High"},
            {"statement": "Fast charging accelerates anode cracking", "rationale": "Strain data", "testability": "Medium"}]"#
    } else if prompt.contains("contradictions") {
        r#"["Reported cycle life differs by an order of magnitude between labs"]"#
    } else if prompt.contains("research gaps") {
        r#"[{"description": "Few long-cycle field studies", "impact": "High"},
            {"description": "No standard fast-charge protocol", "impact": "Medium"}]"#
    } else if prompt.contains("key themes") {
        r#"["Solid-state electrolyte stability", "Graphene anode capacity"]"#
    } else {
        "Narrative: the corpus is small but consistent."
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().push(prompt.to_string());
        (self.responder)(prompt)
    }
}

/// UTF-8 text in, markdown `#` headings as the outline.
pub struct MarkdownExtractor;

impl DocumentExtractor for MarkdownExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError> {
        match std::str::from_utf8(bytes) {
            Ok(text) if !text.trim().is_empty() => Ok(text.to_string()),
            Ok(_) => Err(ExtractionError::CorruptDocument {
                reason: "empty document".to_string(),
            }),
            Err(err) => Err(ExtractionError::CorruptDocument {
                reason: err.to_string(),
            }),
        }
    }

    fn outline(&self, text: &str) -> Vec<String> {
        text.lines()
            .filter_map(|line| line.strip_prefix('#'))
            .map(|heading| heading.trim_start_matches('#').trim().to_string())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

type Script = Box<dyn Fn(u32, &StageView<'_>) -> Result<StageOutput, StageError> + Send + Sync>;

/// A worker whose behaviour is a function of its 1-based call number.
pub struct ScriptedWorker {
    stage: Stage,
    calls: AtomicU32,
    delay: Option<Duration>,
    script: Script,
}

impl ScriptedWorker {
    pub fn new(
        stage: Stage,
        script: impl Fn(u32, &StageView<'_>) -> Result<StageOutput, StageError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            stage,
            calls: AtomicU32::new(0),
            delay: None,
            script: Box::new(script),
        }
    }

    pub fn succeeding(stage: Stage) -> Self {
        Self::new(stage, move |_, _| Ok(StageOutput::new(standard_slice(stage))))
    }

    pub fn failing(stage: Stage, error: StageError) -> Self {
        Self::new(stage, move |_, _| Err(error.clone()))
    }

    /// Sleeps (on the tokio clock) before every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageWorker for ScriptedWorker {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(call, &view)
    }
}

/// A small, valid slice for `stage`.
pub fn standard_slice(stage: Stage) -> StateSlice {
    match stage {
        Stage::LiteratureSearch => StateSlice::Literature { papers: papers(3) },
        Stage::Analysis => StateSlice::Analysis {
            themes: vec![ResearchTheme {
                theme: "Graphene anode capacity".to_string(),
                trajectory: None,
                confidence: 0.7,
                provenance: Provenance::Worker,
            }],
            gaps: vec![ResearchGap {
                description: "Few long-cycle studies".to_string(),
                impact: Level::High,
                confidence: 0.7,
                provenance: Provenance::Worker,
            }],
            contradictions: Vec::new(),
            summary: "One theme, one gap.".to_string(),
        },
        Stage::DataAnalysis => StateSlice::DataAnalysis {
            insights: QuantitativeInsights {
                paper_count: 3,
                ..QuantitativeInsights::default()
            },
            summary: "3 papers".to_string(),
        },
        Stage::HypothesisGeneration => StateSlice::Hypotheses {
            hypotheses: vec![Hypothesis {
                statement: "Coatings reduce fade".to_string(),
                rationale: String::new(),
                testability: Level::High,
                provenance: Provenance::Worker,
            }],
            plan: None,
        },
        Stage::Publication => StateSlice::Publication {
            executive_summary: "summary".to_string(),
            detailed_research_plan: "plan".to_string(),
            report: "report".to_string(),
        },
        Stage::Coordinator => StateSlice::Recovery {
            target: None,
            degraded: None,
            note: "coordinator recovered stage".to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// Engine made of `workers` plus a succeeding scripted worker for every other
/// canonical stage. No coordinator unless one is passed in.
pub fn scripted_engine(workers: Vec<Arc<dyn StageWorker>>) -> WorkflowEngine {
    let mut builder = WorkflowEngine::builder();
    for stage in Stage::CANONICAL_ORDER {
        if !workers.iter().any(|w| w.stage() == stage) {
            builder = builder.worker(Arc::new(ScriptedWorker::succeeding(stage)));
        }
    }
    for worker in workers {
        builder = builder.worker(worker);
    }
    builder.build().unwrap()
}

/// The production worker set over scripted providers.
pub fn research_engine(
    literature: Arc<dyn LiteratureProvider>,
    llm: Arc<dyn LlmProvider>,
    extractor: Arc<dyn DocumentExtractor>,
) -> WorkflowEngine {
    let cache = Arc::new(InMemoryCache::new());
    let ttl = Duration::from_secs(60);
    let search = LiteratureGateway::new(literature, cache.clone(), ttl);
    let llm = LlmGateway::new(llm, cache, ttl);

    WorkflowEngine::builder()
        .worker(Arc::new(LiteratureScanWorker::new(search)))
        .worker(Arc::new(AnalysisWorker::new(llm.clone())))
        .worker(Arc::new(
            DataAnalysisWorker::new(extractor).with_llm(llm.clone(), None),
        ))
        .worker(Arc::new(SynthesisWorker::new(llm.clone())))
        .worker(Arc::new(PublicationWorker::new(llm)))
        .worker(Arc::new(CoordinatorWorker::new()))
        .build()
        .unwrap()
}
