//! Error and retry-policy types for the scholarflow domain.
//!
//! [`WorkflowError`] covers the conditions that end a run early. Everything
//! below it ([`StageError`], [`ProviderError`], [`ExtractionError`]) is handled
//! inside the engine: stage failures feed the retry policy and the router,
//! never the caller.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ProviderName, Stage, WorkflowState};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by stage and provider error types to let the engine decide
/// whether to re-invoke a stage or treat it as exhausted.
///
/// ## Rules
///
/// - `Retryable` errors: provider outages, rate limits, timeouts, empty or
///   malformed provider output.
/// - `NonRetryable` errors: missing credentials, a worker returning a slice
///   for the wrong stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// engine's own exponential schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the stage is exhausted immediately.
    NonRetryable,
}

impl RetryPolicy {
    /// Shorthand for `Retryable { after: None }`.
    pub const fn retryable() -> Self {
        RetryPolicy::Retryable { after: None }
    }

    /// Returns `true` for any `Retryable` variant.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// External collaborator errors
// ---------------------------------------------------------------------------

/// Failures reported by the literature and language-model providers.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// The provider could not be reached or answered with a server error.
    #[error("provider '{provider}' unavailable: {message}")]
    Unavailable {
        provider: ProviderName,
        message: String,
    },

    /// The provider rejected the call because of rate limiting.
    ///
    /// The LLM gateway substitutes the next provider on this error before it
    /// ever reaches the engine.
    #[error("provider '{provider}' rate limited the request")]
    RateLimited {
        provider: ProviderName,
        /// Delay requested by the provider, if it sent one.
        retry_after: Option<Duration>,
    },

    /// The provider answered, but the payload could not be interpreted.
    #[error("provider '{provider}' returned an unusable response: {message}")]
    InvalidResponse {
        provider: ProviderName,
        message: String,
    },

    /// The provider is misconfigured (missing key, bad model name).
    #[error("provider '{provider}' is misconfigured: {message}")]
    Configuration {
        provider: ProviderName,
        message: String,
    },
}

impl ProviderError {
    /// Retry classification of this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ProviderError::Unavailable { .. } | ProviderError::InvalidResponse { .. } => {
                RetryPolicy::retryable()
            }
            ProviderError::RateLimited { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            ProviderError::Configuration { .. } => RetryPolicy::NonRetryable,
        }
    }

    /// The provider this error is attributed to.
    pub fn provider(&self) -> &ProviderName {
        match self {
            ProviderError::Unavailable { provider, .. }
            | ProviderError::RateLimited { provider, .. }
            | ProviderError::InvalidResponse { provider, .. }
            | ProviderError::Configuration { provider, .. } => provider,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

/// Failures reported by the document extractor.
///
/// These are always absorbed by the worker that triggered them and recorded in
/// the run's error log; they never fail a stage on their own.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ExtractionError {
    #[error("unsupported document format: {format}")]
    UnsupportedFormat { format: String },

    #[error("corrupt document: {reason}")]
    CorruptDocument { reason: String },
}

// ---------------------------------------------------------------------------
// Stage-level errors
// ---------------------------------------------------------------------------

/// Why a single stage attempt failed.
///
/// A stage error never reaches the caller. The engine counts it against the
/// stage's retry budget and, once that is exhausted, hands the decision to the
/// router.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum StageError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The stage ran but produced none of its required output.
    #[error("stage '{stage}' produced no output: {detail}")]
    EmptyOutput { stage: Stage, detail: String },

    /// The worker did not return within the per-stage timeout.
    #[error("stage '{stage}' timed out after {limit:?}")]
    TimedOut { stage: Stage, limit: Duration },

    /// The worker returned a slice belonging to another stage.
    #[error("stage '{stage}' returned output for '{produced}'")]
    ContractViolation { stage: Stage, produced: Stage },
}

impl StageError {
    /// Retry classification of this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StageError::Provider(err) => err.retry_policy(),
            StageError::EmptyOutput { .. } | StageError::TimedOut { .. } => {
                RetryPolicy::retryable()
            }
            StageError::ContractViolation { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// A [`crate::RunConfig`] value is out of range or inconsistent.
///
/// Produced before a run starts; the engine never starts with an invalid config.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid configuration field '{field}': {message}")]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Conditions that end a run before the router terminates it.
///
/// The two runtime variants carry the partial [`WorkflowState`] accumulated so
/// far: the caller always receives a state object, annotated with which stages
/// failed and why.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The global time budget was exceeded (checked between stages).
    #[error("workflow exceeded its {limit:?} budget after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        limit: Duration,
        state: Box<WorkflowState>,
    },

    /// A mandatory stage failed with no fallback, or the step budget ran out.
    #[error("workflow failed at stage '{stage}': {reason}")]
    Fatal {
        stage: Stage,
        reason: String,
        state: Box<WorkflowState>,
    },

    /// The run was rejected before it started.
    #[error("run rejected: {0}")]
    InvalidConfiguration(#[from] ConfigError),
}

impl WorkflowError {
    /// The partial state, if the run got far enough to have one.
    pub fn partial_state(&self) -> Option<&WorkflowState> {
        match self {
            WorkflowError::Timeout { state, .. } | WorkflowError::Fatal { state, .. } => {
                Some(state)
            }
            WorkflowError::InvalidConfiguration(_) => None,
        }
    }

    /// Consumes the error, returning the partial state if there is one.
    pub fn into_partial_state(self) -> Option<WorkflowState> {
        match self {
            WorkflowError::Timeout { state, .. } | WorkflowError::Fatal { state, .. } => {
                Some(*state)
            }
            WorkflowError::InvalidConfiguration(_) => None,
        }
    }
}
