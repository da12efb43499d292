//! Port traits: what the orchestration core needs from the outside world.
//!
//! Infrastructure crates implement the provider traits (`llm`, `literature`,
//! `extract`); the `nodes` crate implements [`StageWorker`] once per stage.
//! Nothing in this module performs I/O.

use async_trait::async_trait;

use crate::message::AgentMessage;
use crate::state::StageOutput;
use crate::{
    Attachment, ExtractionError, PaperRecord, ProviderError, ProviderName, RunConfig, Stage,
    StageError, WorkflowState,
};

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// A searchable literature database.
#[async_trait]
pub trait LiteratureProvider: Send + Sync {
    fn name(&self) -> &ProviderName;

    /// Up to `max_results` papers matching `query`, in provider relevance order.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PaperRecord>, ProviderError>;
}

/// One language-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &ProviderName;

    /// Model identifier, part of the completion cache key.
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Converts an uploaded document to plain text.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError>;

    /// Section headings found in extracted text, in document order.
    fn outline(&self, _text: &str) -> Vec<String> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Stage workers
// ---------------------------------------------------------------------------

/// The read-only view a worker receives for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageView<'a> {
    pub state: &'a WorkflowState,
    /// Messages drained from the bus for this stage, oldest first.
    pub inbox: &'a [AgentMessage],
    pub config: &'a RunConfig,
    /// 1-based attempt number within the current failure-retry loop.
    pub attempt: u32,
    /// Quality retries already granted to this stage. Non-zero means the
    /// previous accepted output scored below the threshold and the worker
    /// should not reuse cached model output.
    pub quality_retry: u32,
    pub attachments: &'a [Attachment],
}

/// Executes one stage.
///
/// A worker never mutates the workflow state. It returns the slice it produced
/// (plus any outgoing messages) and the engine merges it.
#[async_trait]
pub trait StageWorker: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError>;
}
