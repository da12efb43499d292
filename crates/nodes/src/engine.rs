//! The workflow engine: the step loop that drives a run.
//!
//! One [`WorkflowEngine`] holds the stage workers and a (possibly shared)
//! [`CommunicationBus`]. Each call to [`WorkflowEngine::run`] owns a fresh
//! [`WorkflowState`] and executes exactly one worker at a time:
//!
//! ```text
//! loop {
//!     check global budget (time, steps)
//!     drain inbox -> invoke worker (per-attempt timeout, failure retries with backoff)
//!     merge slice, post outbox, score quality
//!     Router::next_stage -> apply decision, log transition
//! }
//! ```
//!
//! The global timeout is checked between stages and between failure-retry
//! attempts, never inside a running worker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pipeline::quality::{self, ContentType};
use pipeline::{
    Attachment, AttemptOutcome, CommunicationBus, Escalation, RetryPolicy, RouteDecision,
    RouteReason, RouteTarget, Router, RunConfig, RunId, RunMailbox, RunStatus, Stage, StageError,
    StageOutput, StageTransition, StageView, StageWorker, Timestamp, WorkflowError, WorkflowState,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Returned by [`WorkflowEngineBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineBuildError {
    #[error("no worker registered for stage '{0}'")]
    MissingWorker(Stage),

    #[error("more than one worker registered for stage '{0}'")]
    DuplicateWorker(Stage),
}

/// Assembles a [`WorkflowEngine`].
///
/// Every canonical stage needs a worker. The coordinator is optional: without
/// one, escalations and coordinator fallbacks are recorded as unhandled and the
/// run continues in degraded mode.
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    workers: Vec<Arc<dyn StageWorker>>,
    bus: Option<CommunicationBus>,
}

impl WorkflowEngineBuilder {
    pub fn worker(mut self, worker: Arc<dyn StageWorker>) -> Self {
        self.workers.push(worker);
        self
    }

    /// Shares an existing bus (e.g. one process-wide instance for many runs).
    pub fn bus(mut self, bus: CommunicationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, EngineBuildError> {
        let mut workers = BTreeMap::new();
        for worker in self.workers {
            let stage = worker.stage();
            if workers.insert(stage, worker).is_some() {
                return Err(EngineBuildError::DuplicateWorker(stage));
            }
        }
        if let Some(missing) = Stage::CANONICAL_ORDER
            .into_iter()
            .find(|stage| !workers.contains_key(stage))
        {
            return Err(EngineBuildError::MissingWorker(missing));
        }
        Ok(WorkflowEngine {
            workers,
            bus: self.bus.unwrap_or_default(),
        })
    }
}

/// How a stage's attempt loop ended.
enum AttemptLoop {
    Finished,
    /// The next retry would start after the global deadline.
    OutOfTime,
}

pub struct WorkflowEngine {
    workers: BTreeMap<Stage, Arc<dyn StageWorker>>,
    bus: CommunicationBus,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn bus(&self) -> &CommunicationBus {
        &self.bus
    }

    /// Runs the pipeline for `query` with no attached documents.
    pub async fn run(
        &self,
        query: &str,
        config: &RunConfig,
    ) -> Result<WorkflowState, WorkflowError> {
        self.run_with_attachments(query, config, &[]).await
    }

    /// Runs the pipeline for `query`.
    ///
    /// Returns the final state when the router terminates the run. On
    /// [`WorkflowError::Timeout`] and [`WorkflowError::Fatal`] the partial
    /// state travels inside the error.
    pub async fn run_with_attachments(
        &self,
        query: &str,
        config: &RunConfig,
        attachments: &[Attachment],
    ) -> Result<WorkflowState, WorkflowError> {
        config.validate()?;

        let run_id = RunId::new_random();
        let span = info_span!("workflow_run", run_id = %run_id, query = %query);
        self.drive(run_id, query, config, attachments)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        run_id: RunId,
        query: &str,
        config: &RunConfig,
        attachments: &[Attachment],
    ) -> Result<WorkflowState, WorkflowError> {
        let mut state = WorkflowState::new(run_id, query);
        let mailbox = self.bus.scoped(run_id);
        let router = Router::new(config);
        let started = Instant::now();
        let deadline = started + config.timeout();
        let mut steps = 0u32;

        state.status = RunStatus::Running;
        info!(stage = %state.current_stage, "workflow started");

        loop {
            let elapsed = started.elapsed();
            if elapsed >= config.timeout() {
                return Err(timeout(state, elapsed, config.timeout()));
            }
            if steps >= config.max_steps {
                let stage = state.current_stage;
                state.status = RunStatus::Failed;
                let reason = format!("step budget of {} exhausted", config.max_steps);
                state.record_error(stage, reason.clone());
                return Err(WorkflowError::Fatal {
                    stage,
                    reason,
                    state: Box::new(state),
                });
            }
            steps += 1;

            let stage = state.current_stage;
            let stage_started = Instant::now();
            match self.workers.get(&stage) {
                Some(worker) => {
                    let outcome = self
                        .execute_stage(
                            worker.as_ref(),
                            &mut state,
                            &mailbox,
                            config,
                            attachments,
                            deadline,
                        )
                        .await;
                    if let AttemptLoop::OutOfTime = outcome {
                        return Err(timeout(state, started.elapsed(), config.timeout()));
                    }
                }
                None => skip_missing_worker(&mut state, stage),
            }

            let decision = router.next_stage(&state);
            let duration = stage_started.elapsed();
            match apply_decision(&mut state, stage, decision, duration) {
                RouteTarget::Stage(_) => {}
                RouteTarget::Terminate => {
                    state.status = if state.unhandled_escalations.is_empty() {
                        RunStatus::Completed
                    } else {
                        RunStatus::Escalated
                    };
                    info!(
                        status = ?state.status,
                        papers = state.papers_found.len(),
                        hypotheses = state.hypotheses.len(),
                        errors = state.errors.len(),
                        "workflow finished"
                    );
                    return Ok(state);
                }
                RouteTarget::Abort => {
                    state.status = RunStatus::Failed;
                    let reason = match &state.last_attempt {
                        Some(AttemptOutcome::Exhausted { reason, .. }) => reason.clone(),
                        _ => format!("mandatory stage '{stage}' failed"),
                    };
                    warn!(%stage, %reason, "workflow aborted");
                    return Err(WorkflowError::Fatal {
                        stage,
                        reason,
                        state: Box::new(state),
                    });
                }
            }
        }
    }

    /// Invokes `worker` until it succeeds, its failure is not retryable, or its
    /// retry budget is spent.
    async fn execute_stage(
        &self,
        worker: &dyn StageWorker,
        state: &mut WorkflowState,
        mailbox: &RunMailbox,
        config: &RunConfig,
        attachments: &[Attachment],
        deadline: Instant,
    ) -> AttemptLoop {
        let stage = worker.stage();
        let inbox = mailbox.drain(stage);
        if !inbox.is_empty() {
            debug!(%stage, messages = inbox.len(), "delivered inbox");
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let attempt_started = Instant::now();
            let view = StageView {
                state: &*state,
                inbox: &inbox,
                config,
                attempt,
                quality_retry: state.quality_retry_count(stage),
                attachments,
            };
            let span = info_span!("stage", %stage, attempt);
            let result = match tokio::time::timeout(config.stage_timeout(), worker.execute(view))
                .instrument(span)
                .await
            {
                Ok(result) => result,
                Err(_) => Err(StageError::TimedOut {
                    stage,
                    limit: config.stage_timeout(),
                }),
            };
            let result = result.and_then(|output| {
                let produced = output.slice.stage();
                if produced == stage {
                    Ok(output)
                } else {
                    Err(StageError::ContractViolation { stage, produced })
                }
            });

            let err = match result {
                Ok(output) => {
                    merge_output(state, stage, output, mailbox);
                    info!(
                        %stage,
                        attempt,
                        score = state.quality_scores.get(&stage).map(|s| s.as_f64()),
                        elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                        "stage completed"
                    );
                    return AttemptLoop::Finished;
                }
                Err(err) => err,
            };

            let count = state.retry_counts.entry(stage).or_insert(0);
            if *count < config.max_retries {
                *count += 1;
            }
            let count = *count;

            match err.retry_policy() {
                RetryPolicy::Retryable { after } if count < config.max_retries => {
                    let delay = config.backoff_for(count).max(after.unwrap_or(Duration::ZERO));
                    if Instant::now() + delay >= deadline {
                        warn!(%stage, error = %err, "no time left to retry stage");
                        state.record_error(stage, format!("{err}; retry abandoned at global timeout"));
                        return AttemptLoop::OutOfTime;
                    }
                    warn!(
                        %stage,
                        attempt,
                        retry_count = count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "stage failed, retrying after backoff"
                    );
                    state.transitions.push(StageTransition {
                        from: stage,
                        to: RouteTarget::Stage(stage),
                        reason: RouteReason::FailureRetry,
                        at: Timestamp::now(),
                        duration_ms: attempt_started.elapsed().as_millis() as u64,
                    });
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    let reason = format!("{err} (after {attempt} attempt(s))");
                    warn!(%stage, %reason, "stage exhausted");
                    state.failed_stages.insert(stage);
                    state.record_error(stage, reason.clone());
                    state.last_attempt = Some(AttemptOutcome::Exhausted { stage, reason });
                    return AttemptLoop::Finished;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// State updates
// ---------------------------------------------------------------------------

fn merge_output(state: &mut WorkflowState, stage: Stage, output: StageOutput, mailbox: &RunMailbox) {
    state.apply(output.slice);
    for reason in output.absorbed_errors {
        state.record_error(stage, reason);
    }
    for message in output.outbox {
        if message.is_escalation() && stage != Stage::Coordinator && state.pending_escalation.is_none() {
            info!(from = %stage, reason = %message.reason(), "escalation posted");
            state.pending_escalation = Some(Escalation {
                from: stage,
                reason: message.reason(),
                priority: message.priority,
            });
        }
        state.messages.push(message.clone());
        mailbox.send(message);
    }

    let score = quality::score(&state.assessment_text(stage), ContentType::for_stage(stage));
    state.quality_scores.insert(stage, score);
    state.last_attempt = Some(AttemptOutcome::Succeeded { stage });
}

/// Only the coordinator may be absent; the builder guarantees the rest.
fn skip_missing_worker(state: &mut WorkflowState, stage: Stage) {
    let from = state.recovery_target.unwrap_or(stage);
    warn!(%stage, %from, "no worker registered, continuing without recovery");
    state.unhandled_escalations.push(Escalation {
        from,
        reason: format!("no '{stage}' worker registered"),
        priority: pipeline::Priority::High,
    });
    state.note(format!("{stage} unavailable; {from} was not recovered"));
    state.last_attempt = Some(AttemptOutcome::Succeeded { stage });
}

/// Applies a router decision and logs the transition. Returns the target.
fn apply_decision(
    state: &mut WorkflowState,
    stage: Stage,
    decision: RouteDecision,
    duration: Duration,
) -> RouteTarget {
    for skip in &decision.skipped {
        info!(skipped = %skip.stage, note = %skip.note, "stage skipped");
        if skip.stage == Stage::Analysis {
            state
                .analysis_summary
                .get_or_insert_with(|| "Analysis unavailable: no papers were found.".to_string());
        }
        state.note(skip.note.clone());
    }
    if decision.accepted_below_threshold {
        let score = state.quality_scores.get(&stage).map(|s| s.as_f64()).unwrap_or(0.0);
        warn!(%stage, score, "accepting output below quality threshold");
        state.quality_flags.insert(stage);
        state.note(format!("{stage} accepted below quality threshold (score {score:.2})"));
    }
    if decision.reason == RouteReason::Degraded {
        state.note(format!("{stage} failed; continuing without it"));
    }

    match decision.target {
        RouteTarget::Stage(next) => {
            match decision.reason {
                RouteReason::QualityRetry => {
                    *state.quality_retry_counts.entry(stage).or_insert(0) += 1;
                }
                RouteReason::Escalation | RouteReason::Fallback => {
                    state.recovery_target = decision.recover;
                    state.status = RunStatus::Escalated;
                    if let Some(escalation) = state.pending_escalation.take() {
                        debug!(from = %escalation.from, "escalation routed to coordinator");
                    }
                }
                _ => {}
            }
            if stage == Stage::Coordinator && next != Stage::Coordinator {
                state.recovery_target = None;
                state.status = RunStatus::Running;
            }
            info!(from = %stage, to = %next, reason = ?decision.reason, "transition");
            state.current_stage = next;
        }
        RouteTarget::Terminate | RouteTarget::Abort => {
            info!(from = %stage, to = %decision.target, reason = ?decision.reason, "transition");
        }
    }

    state.transitions.push(StageTransition {
        from: stage,
        to: decision.target,
        reason: decision.reason,
        at: Timestamp::now(),
        duration_ms: duration.as_millis() as u64,
    });
    decision.target
}

fn timeout(mut state: WorkflowState, elapsed: Duration, limit: Duration) -> WorkflowError {
    let stage = state.current_stage;
    warn!(%stage, elapsed_ms = elapsed.as_millis() as u64, "workflow timed out");
    state.status = RunStatus::Failed;
    state.record_error(stage, format!("global timeout of {limit:?} exceeded"));
    WorkflowError::Timeout {
        elapsed,
        limit,
        state: Box::new(state),
    }
}
