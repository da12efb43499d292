//! Core orchestration domain for scholarflow.
//!
//! This crate contains every domain concept of the research pipeline: the
//! shared workflow state, the stage set, the router, the quality assessor, the
//! response cache, the communication bus and the error taxonomy. Infrastructure
//! crates implement the port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`RunId`, `PaperId`, `ProviderName`) |
//! | [`types`] | Shared value types (`QualityScore`, `PaperRecord`, findings, `Attachment`) |
//! | [`stage`] | The `Stage` enumeration and canonical order |
//! | [`state`] | `WorkflowState`, `StateSlice`, `StageOutput` and the merge rules |
//! | [`message`] | `AgentMessage` and its kinds |
//! | [`bus`] | The per-run `CommunicationBus` |
//! | [`cache`] | `ResponseCache`, `InMemoryCache`, call fingerprints |
//! | [`quality`] | The heuristic quality assessor |
//! | [`router`] | The pure routing policy |
//! | [`config`] | `RunConfig` |
//! | [`ports`] | Provider and stage-worker traits |
//! | [`report`] | `RunReport`, the run invocation result |
//! | [`errors`] | Error and retry-policy types |

pub mod bus;
pub mod cache;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod message;
pub mod ports;
pub mod quality;
pub mod report;
pub mod router;
pub mod stage;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use bus::{CommunicationBus, RunMailbox};
pub use cache::{CacheKey, CacheStats, Fingerprint, InMemoryCache, ResponseCache};
pub use config::RunConfig;
pub use errors::{
    ConfigError, ExtractionError, ProviderError, RetryPolicy, StageError, WorkflowError,
};
pub use identifiers::{PaperId, ProviderName, RunId};
pub use message::{AgentMessage, MessageType, Priority};
pub use ports::{DocumentExtractor, LiteratureProvider, LlmProvider, StageView, StageWorker};
pub use quality::ContentType;
pub use report::{RunLogEntry, RunReport};
pub use router::{RouteDecision, RouteReason, RouteTarget, Router, Skip};
pub use stage::{Stage, UnknownStage};
pub use state::{
    AttemptOutcome, ErrorRecord, Escalation, RunStatus, StageOutput, StageTransition, StateSlice,
    WorkflowState,
};
pub use types::{
    Attachment, Contradiction, Hypothesis, Level, Milestone, PaperRecord, Provenance,
    QualityScore, QuantitativeInsights, ResearchGap, ResearchPlan, ResearchTheme, Timestamp,
};
