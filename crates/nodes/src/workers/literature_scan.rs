use async_trait::async_trait;
use pipeline::{Stage, StageError, StageOutput, StageView, StageWorker, StateSlice};
use tracing::info;

use crate::gateway::LiteratureGateway;

/// Searches the literature provider for the run's query.
pub struct LiteratureScanWorker {
    gateway: LiteratureGateway,
}

impl LiteratureScanWorker {
    pub fn new(gateway: LiteratureGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl StageWorker for LiteratureScanWorker {
    fn stage(&self) -> Stage {
        Stage::LiteratureSearch
    }

    async fn execute(&self, view: StageView<'_>) -> Result<StageOutput, StageError> {
        let max_results = view.config.max_papers;
        let papers = self
            .gateway
            .search(view.state.query(), max_results)
            .await?;

        if papers.is_empty() {
            return Err(StageError::EmptyOutput {
                stage: Stage::LiteratureSearch,
                detail: format!("no papers found for '{}'", view.state.query()),
            });
        }

        info!(papers = papers.len(), requested = max_results, "literature scan complete");
        Ok(StageOutput::new(StateSlice::Literature { papers }))
    }
}
