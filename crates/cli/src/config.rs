//! Command-line arguments and the optional TOML configuration file.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables (API keys and `PRIMARY_LLM` only), command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use pipeline::RunConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmChoice {
    Groq,
    Gemini,
}

impl LlmChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmChoice::Groq => "groq",
            LlmChoice::Gemini => "gemini",
        }
    }
}

/// Run the scholarflow research pipeline for one query.
#[derive(Debug, Parser)]
#[command(name = "scholarflow", version, about)]
pub struct Cli {
    /// Research question to investigate
    pub query: String,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Papers requested from the literature provider
    #[arg(long)]
    pub max_papers: Option<usize>,

    /// Global run budget in seconds
    #[arg(long)]
    pub timeout_seconds: Option<u64>,

    /// Minimum quality score accepted without a retry (0.0 - 1.0)
    #[arg(long)]
    pub quality_threshold: Option<f64>,

    /// Enable contradiction detection and the statistical narrative
    #[arg(long)]
    pub deep_analysis: bool,

    /// Retry budget per stage
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Attach a document for the data-analysis stage (repeatable)
    #[arg(short, long = "document", value_name = "PATH")]
    pub documents: Vec<PathBuf>,

    /// Write the transition and error log as JSON lines
    #[arg(long, value_name = "PATH")]
    pub run_log: Option<PathBuf>,

    /// Write the JSON report to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,

    /// Language model tried first; the other configured provider is the
    /// rate-limit fallback
    #[arg(long, value_enum, env = "PRIMARY_LLM")]
    pub primary_llm: Option<LlmChoice>,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,
}

/// `[providers]` table of the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub primary: LlmChoice,
    pub groq_base_url: String,
    pub groq_model: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub arxiv_base_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout_seconds: u64,
    /// Entry bound for the in-memory response cache; unbounded when absent.
    pub cache_max_entries: Option<usize>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            primary: LlmChoice::Groq,
            groq_base_url: llm::GROQ_BASE_URL.to_string(),
            groq_model: llm::GROQ_DEFAULT_MODEL.to_string(),
            gemini_base_url: llm::GEMINI_BASE_URL.to_string(),
            gemini_model: llm::GEMINI_DEFAULT_MODEL.to_string(),
            arxiv_base_url: literature::ARXIV_BASE_URL.to_string(),
            request_timeout_seconds: 60,
            cache_max_entries: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    run: RunConfig,
    providers: ProvidersConfig,
}

/// Everything the composition root needs, fully resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub query: String,
    pub run: RunConfig,
    pub providers: ProvidersConfig,
    pub groq_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub documents: Vec<PathBuf>,
    pub run_log: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        let mut run = file.run;
        if let Some(max_papers) = cli.max_papers {
            run.max_papers = max_papers;
        }
        if let Some(timeout) = cli.timeout_seconds {
            run.timeout_seconds = timeout;
        }
        if let Some(threshold) = cli.quality_threshold {
            run.quality_threshold = threshold;
        }
        if let Some(retries) = cli.max_retries {
            run.max_retries = retries;
        }
        if cli.deep_analysis {
            run.enable_deep_analysis = true;
        }
        run.validate().context("invalid run configuration")?;

        let mut providers = file.providers;
        if let Some(primary) = cli.primary_llm {
            providers.primary = primary;
        }

        let query = cli.query.trim().to_string();
        if query.is_empty() {
            bail!("the research query must not be empty");
        }

        Ok(Self {
            query,
            run,
            providers,
            groq_api_key: non_blank(cli.groq_api_key),
            google_api_key: non_blank(cli.google_api_key),
            documents: cli.documents,
            run_log: cli.run_log,
            output: cli.output,
        })
    }

    /// Configured language models, primary first.
    pub fn llm_order(&self) -> Vec<LlmChoice> {
        let mut order = vec![self.providers.primary];
        order.extend(
            [LlmChoice::Groq, LlmChoice::Gemini]
                .into_iter()
                .filter(|choice| *choice != self.providers.primary),
        );
        order
            .into_iter()
            .filter(|choice| self.api_key(*choice).is_some())
            .collect()
    }

    pub fn api_key(&self, choice: LlmChoice) -> Option<&str> {
        match choice {
            LlmChoice::Groq => self.groq_api_key.as_deref(),
            LlmChoice::Gemini => self.google_api_key.as_deref(),
        }
    }
}

fn load_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("cannot parse config file {}", path.display()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
