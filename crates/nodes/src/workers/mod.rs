//! One [`StageWorker`](pipeline::StageWorker) per stage.
//!
//! | Worker | Stage | Collaborators |
//! |--------|-------|---------------|
//! | [`LiteratureScanWorker`] | `literature_search` | [`LiteratureGateway`](crate::gateway::LiteratureGateway) |
//! | [`AnalysisWorker`] | `analysis` | [`LlmGateway`](crate::gateway::LlmGateway) |
//! | [`DataAnalysisWorker`] | `data_analysis` | document extractor, optional LLM |
//! | [`SynthesisWorker`] | `hypothesis_generation` | LLM |
//! | [`PublicationWorker`] | `publication` | LLM |
//! | [`CoordinatorWorker`] | `coordinator` | none (rule-based) |

pub mod analysis;
pub mod coordinator;
pub mod data_analysis;
pub mod literature_scan;
pub mod parsing;
pub mod publication;
pub mod synthesis;

pub use analysis::AnalysisWorker;
pub use coordinator::CoordinatorWorker;
pub use data_analysis::DataAnalysisWorker;
pub use literature_scan::LiteratureScanWorker;
pub use publication::PublicationWorker;
pub use synthesis::SynthesisWorker;
