//! Per-run configuration.
//!
//! [`RunConfig`] is plain data: the CLI deserialises it from TOML and applies
//! command-line overrides, the engine validates it before a run starts. Every
//! field has a default so a partial file (or none at all) is valid.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Papers requested from the literature provider per search.
    pub max_papers: usize,
    /// Global run budget, checked between stages.
    pub timeout_seconds: u64,
    /// Minimum quality score accepted without a quality-driven retry.
    pub quality_threshold: f64,
    /// Enables contradiction detection and the statistical narrative.
    pub enable_deep_analysis: bool,
    /// Retry budget per stage, shared by failure and quality retries.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Per-attempt worker timeout.
    pub stage_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    /// Hard cap on engine loop iterations.
    pub max_steps: u32,
    /// Stage to route to when a stage exhausts its retries.
    pub fallbacks: BTreeMap<Stage, Stage>,
    /// Stages whose exhaustion without a fallback aborts the run.
    pub mandatory_stages: BTreeSet<Stage>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_papers: 8,
            timeout_seconds: 1800,
            quality_threshold: 0.6,
            enable_deep_analysis: false,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_cap_ms: 10_000,
            stage_timeout_seconds: 300,
            cache_ttl_seconds: 86_400,
            max_steps: 64,
            fallbacks: [
                Stage::Analysis,
                Stage::DataAnalysis,
                Stage::HypothesisGeneration,
                Stage::Publication,
            ]
            .into_iter()
            .map(|stage| (stage, Stage::Coordinator))
            .collect(),
            mandatory_stages: BTreeSet::from([Stage::Coordinator]),
        }
    }
}

impl RunConfig {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_papers == 0 {
            return Err(ConfigError::new("max_papers", "must be at least 1"));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::new("timeout_seconds", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::new(
                "quality_threshold",
                format!("{} is outside [0, 1]", self.quality_threshold),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::new("max_retries", "must be at least 1"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::new(
                "backoff_cap_ms",
                "must not be smaller than backoff_base_ms",
            ));
        }
        if self.stage_timeout_seconds == 0 {
            return Err(ConfigError::new("stage_timeout_seconds", "must be at least 1"));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::new("max_steps", "must be at least 1"));
        }
        for (from, to) in &self.fallbacks {
            if from == to {
                return Err(ConfigError::new(
                    "fallbacks",
                    format!("stage '{from}' cannot fall back to itself"),
                ));
            }
            if *from == Stage::Coordinator {
                return Err(ConfigError::new(
                    "fallbacks",
                    "the coordinator cannot have a fallback",
                ));
            }
        }
        Ok(())
    }

    /// Delay before failure retry number `retry_count`:
    /// `min(base * 2^retry_count, cap)`.
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        let millis = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_cap_ms);
        Duration::from_millis(millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn fallback_for(&self, stage: Stage) -> Option<Stage> {
        self.fallbacks.get(&stage).copied()
    }

    pub fn is_mandatory(&self, stage: Stage) -> bool {
        self.mandatory_stages.contains(&stage)
    }
}
