//! scholarflow workflow engine, stage workers and provider gateways.
//!
//! This crate provides the [`WorkflowEngine`] step loop, the six default stage
//! workers (literature scan through publication, plus the rule-based
//! coordinator) and the gateways that put caching and provider substitution in
//! front of every external call.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences calls between the domain
//! rules in the [`pipeline`] crate (routing, merging, quality) and the provider
//! traits implemented by infrastructure crates. Nothing here talks to the
//! network directly.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`engine`] | `WorkflowEngine`, its builder, the run loop |
//! | [`gateway`] | `LlmGateway`, `LiteratureGateway` |
//! | [`workers`] | The stage workers and model-output parsing |

pub mod engine;
pub mod gateway;
pub mod workers;

pub use engine::{EngineBuildError, WorkflowEngine, WorkflowEngineBuilder};
pub use gateway::{CachePolicy, LiteratureGateway, LlmGateway};
pub use workers::{
    AnalysisWorker, CoordinatorWorker, DataAnalysisWorker, LiteratureScanWorker,
    PublicationWorker, SynthesisWorker,
};
