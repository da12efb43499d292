//! The router: decides the next stage after every engine step.
//!
//! [`Router::next_stage`] is a pure, total function of the workflow state and
//! the run configuration. It has no side effects; the engine applies the
//! returned [`RouteDecision`] (notes, counters, recovery target).
//!
//! ## Policy, in order
//!
//! 1. The current stage's latest attempt was exhausted: route to its fallback
//!    if one is configured; abort if the stage is mandatory; otherwise advance
//!    past it in degraded mode.
//! 2. A worker posted an escalation: route to the coordinator.
//! 3. The current stage scored below the quality threshold and still has
//!    quality-retry budget: run it again. With no budget left the output is
//!    accepted and flagged.
//! 4. Advance in canonical order (after the coordinator: from the stage it
//!    recovered), applying the stage gates:
//!    - `analysis` is skipped while `papers_found` is empty;
//!    - `hypothesis_generation` is skipped while `research_gaps` is empty.
//!
//! Gates only apply to forward moves. Exhaustion returns before
//! `quality_scores` is read at all: a failed attempt does not clear the score
//! an earlier successful attempt left there, and that stale score must never
//! trigger a quality retry. Failure handling and input gates therefore always
//! take precedence over quality retries.

use serde::{Deserialize, Serialize};

use crate::state::AttemptOutcome;
use crate::{RunConfig, Stage, WorkflowState};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Where the run goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stage")]
pub enum RouteTarget {
    Stage(Stage),
    /// Normal end of the run.
    Terminate,
    /// A mandatory stage failed with no fallback.
    Abort,
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteTarget::Stage(stage) => write!(f, "{stage}"),
            RouteTarget::Terminate => f.write_str("terminate"),
            RouteTarget::Abort => f.write_str("abort"),
        }
    }
}

/// Why a transition was taken. Logged with every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    Forward,
    QualityRetry,
    /// Engine-level re-invocation after a retryable failure.
    FailureRetry,
    Fallback,
    Escalation,
    /// The stage was exhausted with no fallback; the run continues without it.
    Degraded,
    /// Forward progression after the coordinator finished a recovery.
    Resume,
    Aborted,
}

/// A stage bypassed by a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skip {
    pub stage: Stage,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub target: RouteTarget,
    pub reason: RouteReason,
    /// For fallback and escalation: the stage the coordinator recovers.
    pub recover: Option<Stage>,
    /// Stages bypassed on the way to `target`.
    pub skipped: Vec<Skip>,
    /// The current stage was accepted below the quality threshold.
    pub accepted_below_threshold: bool,
}

impl RouteDecision {
    fn to(target: RouteTarget, reason: RouteReason) -> Self {
        Self {
            target,
            reason,
            recover: None,
            skipped: Vec::new(),
            accepted_below_threshold: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Router<'a> {
    config: &'a RunConfig,
}

impl<'a> Router<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Decides where the run goes after `state.current_stage`.
    pub fn next_stage(&self, state: &WorkflowState) -> RouteDecision {
        let current = state.current_stage;

        if let Some(AttemptOutcome::Exhausted { stage, .. }) = &state.last_attempt {
            if *stage == current {
                return self.after_exhaustion(state, current);
            }
        }

        if current != Stage::Coordinator {
            if let Some(escalation) = &state.pending_escalation {
                let mut decision =
                    RouteDecision::to(RouteTarget::Stage(Stage::Coordinator), RouteReason::Escalation);
                decision.recover = Some(escalation.from);
                return decision;
            }
        }

        let mut accepted_below_threshold = false;
        if current != Stage::Coordinator {
            if let Some(score) = state.quality_scores.get(&current) {
                if score.as_f64() < self.config.quality_threshold {
                    if state.quality_retry_count(current) < self.config.max_retries {
                        return RouteDecision::to(
                            RouteTarget::Stage(current),
                            RouteReason::QualityRetry,
                        );
                    }
                    accepted_below_threshold = true;
                }
            }
        }

        let mut decision = if current == Stage::Coordinator {
            match state.recovery_target {
                Some(recovered) => self.advance(state, recovered, RouteReason::Resume),
                None => RouteDecision::to(RouteTarget::Terminate, RouteReason::Resume),
            }
        } else {
            self.advance(state, current, RouteReason::Forward)
        };
        decision.accepted_below_threshold = accepted_below_threshold;
        decision
    }

    fn after_exhaustion(&self, state: &WorkflowState, current: Stage) -> RouteDecision {
        if let Some(fallback) = self.config.fallback_for(current) {
            let mut decision = RouteDecision::to(RouteTarget::Stage(fallback), RouteReason::Fallback);
            decision.recover = Some(current);
            return decision;
        }
        if self.config.is_mandatory(current) {
            return RouteDecision::to(RouteTarget::Abort, RouteReason::Aborted);
        }
        let from = if current == Stage::Coordinator {
            state.recovery_target.unwrap_or(current)
        } else {
            current
        };
        self.advance(state, from, RouteReason::Degraded)
    }

    /// The first gate-passing successor of `from`, or termination.
    fn advance(&self, state: &WorkflowState, from: Stage, reason: RouteReason) -> RouteDecision {
        let mut skipped = Vec::new();
        let mut candidate = from.successor();
        while let Some(stage) = candidate {
            match gate(state, stage) {
                Some(note) => {
                    skipped.push(Skip { stage, note });
                    candidate = stage.successor();
                }
                None => break,
            }
        }
        let target = candidate.map_or(RouteTarget::Terminate, RouteTarget::Stage);
        RouteDecision {
            skipped,
            ..RouteDecision::to(target, reason)
        }
    }
}

/// Why `stage` cannot run on the current state, if it cannot.
fn gate(state: &WorkflowState, stage: Stage) -> Option<String> {
    match stage {
        Stage::Analysis if state.papers_found.is_empty() => {
            Some("analysis skipped: no papers found; degraded placeholder recorded".to_string())
        }
        Stage::HypothesisGeneration if state.research_gaps.is_empty() => {
            Some("hypothesis generation skipped: no research gaps; hypotheses unavailable".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Priority;
    use crate::state::Escalation;
    use crate::{Level, PaperId, PaperRecord, Provenance, QualityScore, ResearchGap, RunId, Timestamp};

    fn state_at(stage: Stage) -> WorkflowState {
        let mut state = WorkflowState::new(RunId::new_random(), "graphene batteries");
        state.current_stage = stage;
        state.last_attempt = Some(AttemptOutcome::Succeeded { stage });
        state.quality_scores.insert(stage, QualityScore::clamped(0.95));
        state
    }

    fn with_paper(mut state: WorkflowState) -> WorkflowState {
        state.papers_found.push(PaperRecord {
            id: PaperId::new("p1").unwrap(),
            title: "t".into(),
            authors: Vec::new(),
            abstract_text: String::new(),
            url: String::new(),
            source: "arxiv".into(),
            published: None,
            retrieved_at: Timestamp::now(),
        });
        state
    }

    fn with_gap(mut state: WorkflowState) -> WorkflowState {
        state.research_gaps.push(ResearchGap {
            description: "g".into(),
            impact: Level::High,
            confidence: 0.7,
            provenance: Provenance::Worker,
        });
        state
    }

    fn exhausted(mut state: WorkflowState) -> WorkflowState {
        let stage = state.current_stage;
        state.quality_scores.remove(&stage);
        state.last_attempt = Some(AttemptOutcome::Exhausted {
            stage,
            reason: "provider down".into(),
        });
        state
    }

    #[test]
    fn test_forward_in_canonical_order() {
        let config = RunConfig::default();
        let router = Router::new(&config);

        let state = with_gap(with_paper(state_at(Stage::LiteratureSearch)));
        assert_eq!(router.next_stage(&state).target, RouteTarget::Stage(Stage::Analysis));

        let state = with_gap(with_paper(state_at(Stage::DataAnalysis)));
        assert_eq!(
            router.next_stage(&state).target,
            RouteTarget::Stage(Stage::HypothesisGeneration)
        );

        let state = state_at(Stage::Publication);
        let decision = router.next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Terminate);
        assert_eq!(decision.reason, RouteReason::Forward);
    }

    #[test]
    fn test_exhausted_stage_uses_fallback() {
        let config = RunConfig::default();
        let decision = Router::new(&config).next_stage(&exhausted(state_at(Stage::Analysis)));
        assert_eq!(decision.target, RouteTarget::Stage(Stage::Coordinator));
        assert_eq!(decision.reason, RouteReason::Fallback);
        assert_eq!(decision.recover, Some(Stage::Analysis));
    }

    #[test]
    fn test_exhausted_search_without_fallback_degrades_past_analysis() {
        let config = RunConfig::default();
        let decision =
            Router::new(&config).next_stage(&exhausted(state_at(Stage::LiteratureSearch)));
        assert_eq!(decision.target, RouteTarget::Stage(Stage::DataAnalysis));
        assert_eq!(decision.reason, RouteReason::Degraded);
        assert_eq!(decision.skipped.len(), 1);
        assert_eq!(decision.skipped[0].stage, Stage::Analysis);
    }

    #[test]
    fn test_exhausted_mandatory_stage_aborts() {
        let config = RunConfig::default();
        let mut state = exhausted(state_at(Stage::Coordinator));
        state.recovery_target = Some(Stage::Analysis);
        let decision = Router::new(&config).next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Abort);
    }

    #[test]
    fn test_stale_low_score_does_not_retry_an_exhausted_stage() {
        let config = RunConfig::default();
        let mut state = exhausted(with_gap(with_paper(state_at(Stage::Analysis))));
        state.quality_scores.insert(Stage::Analysis, QualityScore::clamped(0.1));

        let decision = Router::new(&config).next_stage(&state);

        assert_eq!(decision.target, RouteTarget::Stage(Stage::Coordinator));
        assert_eq!(decision.reason, RouteReason::Fallback);
        assert!(!decision.accepted_below_threshold);
    }

    #[test]
    fn test_escalation_overrides_forward_and_quality() {
        let config = RunConfig::default();
        let mut state = with_gap(with_paper(state_at(Stage::DataAnalysis)));
        state.quality_scores.insert(Stage::DataAnalysis, QualityScore::clamped(0.1));
        state.pending_escalation = Some(Escalation {
            from: Stage::DataAnalysis,
            reason: "documents unreadable".into(),
            priority: Priority::High,
        });
        let decision = Router::new(&config).next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Stage(Stage::Coordinator));
        assert_eq!(decision.reason, RouteReason::Escalation);
        assert_eq!(decision.recover, Some(Stage::DataAnalysis));
    }

    #[test]
    fn test_fallback_wins_over_escalation() {
        let config = RunConfig::default();
        let mut state = exhausted(state_at(Stage::HypothesisGeneration));
        state.pending_escalation = Some(Escalation {
            from: Stage::Analysis,
            reason: "x".into(),
            priority: Priority::High,
        });
        let decision = Router::new(&config).next_stage(&state);
        assert_eq!(decision.reason, RouteReason::Fallback);
        assert_eq!(decision.recover, Some(Stage::HypothesisGeneration));
    }

    #[test]
    fn test_quality_retry_until_budget_spent_then_flag() {
        let config = RunConfig {
            quality_threshold: 0.9,
            max_retries: 2,
            ..RunConfig::default()
        };
        let router = Router::new(&config);
        let mut state = with_gap(with_paper(state_at(Stage::Analysis)));
        state.quality_scores.insert(Stage::Analysis, QualityScore::clamped(0.5));

        let decision = router.next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Stage(Stage::Analysis));
        assert_eq!(decision.reason, RouteReason::QualityRetry);

        state.quality_retry_counts.insert(Stage::Analysis, 2);
        let decision = router.next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Stage(Stage::DataAnalysis));
        assert!(decision.accepted_below_threshold);
    }

    #[test]
    fn test_hypothesis_gate_skips_to_publication() {
        let config = RunConfig::default();
        let state = with_paper(state_at(Stage::DataAnalysis));
        let decision = Router::new(&config).next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Stage(Stage::Publication));
        assert!(decision.skipped[0].note.contains("hypotheses unavailable"));
    }

    #[test]
    fn test_coordinator_resumes_after_recovered_stage() {
        let config = RunConfig::default();
        let mut state = with_gap(with_paper(state_at(Stage::Coordinator)));
        state.recovery_target = Some(Stage::Analysis);
        let decision = Router::new(&config).next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Stage(Stage::DataAnalysis));
        assert_eq!(decision.reason, RouteReason::Resume);
    }

    #[test]
    fn test_coordinator_is_never_quality_retried() {
        let config = RunConfig::default();
        let mut state = with_paper(state_at(Stage::Coordinator));
        state.quality_scores.insert(Stage::Coordinator, QualityScore::clamped(0.0));
        state.recovery_target = Some(Stage::Publication);
        let decision = Router::new(&config).next_stage(&state);
        assert_eq!(decision.target, RouteTarget::Terminate);
    }

    #[test]
    fn test_decision_is_deterministic() {
        let config = RunConfig::default();
        let router = Router::new(&config);
        let state = exhausted(state_at(Stage::LiteratureSearch));
        let first = router.next_stage(&state);
        for _ in 0..10 {
            assert_eq!(router.next_stage(&state), first);
        }
    }
}
