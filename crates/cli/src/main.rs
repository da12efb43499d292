//! scholarflow CLI entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration**: command-line flags over an optional TOML file,
//!    validated into a [`pipeline::RunConfig`].
//! 2. **Wire observability**: `tracing-subscriber` with a human or JSON layer,
//!    plus an OpenTelemetry OTLP exporter when a collector endpoint is set.
//! 3. **Construct infrastructure**: arXiv search, the configured language
//!    models (primary first, the other as rate-limit fallback), the text
//!    extractor and a shared response cache, injected into the six workers.
//! 4. **Run and report**: execute one run, print the [`pipeline::RunReport`]
//!    as JSON and optionally write the run log as JSON lines.

mod config;
mod telemetry;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use extract::TextExtractor;
use literature::ArxivProvider;
use llm::{GeminiProvider, OpenAiCompatibleProvider};
use nodes::{
    AnalysisWorker, CoordinatorWorker, DataAnalysisWorker, LiteratureGateway, LlmGateway,
    LiteratureScanWorker, PublicationWorker, SynthesisWorker, WorkflowEngine,
};
use pipeline::{
    Attachment, InMemoryCache, LlmProvider, ProviderName, ResponseCache, RunReport, RunStatus,
};
use tracing::{info, warn};

use crate::config::{Cli, LlmChoice, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(cli.log_format)?;

    let outcome = run(cli).await;
    telemetry.shutdown();

    let status = outcome?;
    if status == RunStatus::Failed {
        std::process::exit(2);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<RunStatus> {
    let settings = Settings::resolve(cli)?;
    let engine = build_engine(&settings)?;
    let attachments = load_attachments(&settings.documents)?;

    info!(
        query = %settings.query,
        max_papers = settings.run.max_papers,
        attachments = attachments.len(),
        "starting research run"
    );
    let result = engine
        .run_with_attachments(&settings.query, &settings.run, &attachments)
        .await;
    let report = RunReport::from_result(&settings.query, result);
    info!(status = ?report.status, papers = report.papers_found.len(), "research run finished");

    if let Some(path) = &settings.run_log {
        write_run_log(path, &report)?;
    }
    let json = serde_json::to_string_pretty(&report).context("cannot serialise run report")?;
    match &settings.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("cannot write report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(report.status)
}

fn build_engine(settings: &Settings) -> Result<WorkflowEngine> {
    let cache: Arc<dyn ResponseCache> = match settings.providers.cache_max_entries {
        Some(bound) => Arc::new(InMemoryCache::with_max_entries(bound)),
        None => Arc::new(InMemoryCache::new()),
    };
    let ttl = settings.run.cache_ttl();
    let request_timeout = Duration::from_secs(settings.providers.request_timeout_seconds);

    let arxiv = ArxivProvider::new(provider_name("arxiv")?, &settings.providers.arxiv_base_url)
        .and_then(|provider| provider.with_timeout(request_timeout))?;
    let search = LiteratureGateway::new(Arc::new(arxiv), cache.clone(), ttl);

    let mut models = settings
        .llm_order()
        .into_iter()
        .map(|choice| llm_provider(settings, choice, request_timeout));
    let primary = models
        .next()
        .ok_or_else(|| anyhow!("no language model configured: set GROQ_API_KEY or GOOGLE_API_KEY"))??;
    let mut llm = LlmGateway::new(primary, cache, ttl);
    for fallback in models {
        llm = llm.with_fallback(fallback?);
    }

    let extractor = TextExtractor::new().context("cannot build document extractor")?;

    WorkflowEngine::builder()
        .worker(Arc::new(LiteratureScanWorker::new(search)))
        .worker(Arc::new(AnalysisWorker::new(llm.clone())))
        .worker(Arc::new(
            DataAnalysisWorker::new(Arc::new(extractor)).with_llm(llm.clone(), None),
        ))
        .worker(Arc::new(SynthesisWorker::new(llm.clone())))
        .worker(Arc::new(PublicationWorker::new(llm)))
        .worker(Arc::new(CoordinatorWorker::new()))
        .build()
        .context("cannot assemble workflow engine")
}

fn llm_provider(
    settings: &Settings,
    choice: LlmChoice,
    timeout: Duration,
) -> Result<Arc<dyn LlmProvider>> {
    let name = provider_name(choice.as_str())?;
    let key = settings
        .api_key(choice)
        .ok_or_else(|| anyhow!("no API key for {}", choice.as_str()))?;
    let providers = &settings.providers;

    let provider: Arc<dyn LlmProvider> = match choice {
        LlmChoice::Groq => Arc::new(
            OpenAiCompatibleProvider::new(
                name,
                &providers.groq_base_url,
                key,
                &providers.groq_model,
            )?
            .with_timeout(timeout)?,
        ),
        LlmChoice::Gemini => Arc::new(
            GeminiProvider::new(
                name,
                &providers.gemini_base_url,
                key,
                &providers.gemini_model,
            )?
            .with_timeout(timeout)?,
        ),
    };
    Ok(provider)
}

fn provider_name(value: &str) -> Result<ProviderName> {
    ProviderName::new(value).ok_or_else(|| anyhow!("invalid provider name '{value}'"))
}

fn load_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("cannot read document {}", path.display()))?;
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(Attachment::new(name, bytes))
        })
        .collect()
}

fn write_run_log(path: &Path, report: &RunReport) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("cannot create run log {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let entries = report.run_log();
    for entry in &entries {
        serde_json::to_writer(&mut writer, entry).context("cannot serialise run log entry")?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    if entries.is_empty() {
        warn!(path = %path.display(), "run log is empty");
    }
    Ok(())
}
