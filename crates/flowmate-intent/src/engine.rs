//! Workflow execution engine.
//!
//! The engine drives one [`WorkflowExecution`] from `Running` to a terminal
//! state.  Work proceeds in *waves*: every pending step whose dependencies
//! have all reached a terminal status is dispatched at once, the wave is
//! joined, and its results are folded into the shared context in plan order
//! before the next wave is formed.  A dependent therefore never observes a
//! partially populated context.
//!
//! Between waves the engine checks the execution's cancellation token and
//! deadline.  In-flight executor calls are never interrupted; steps that
//! have not started yet are skipped.
//!
//! Step failures are data.  [`WorkflowEngine::run`] always returns the final
//! record and never an error.  An executor that panics fails its step
//! terminally; the rest of the run carries on.
//!
//! # Blocking rules
//!
//! - A required step that fails or is skipped blocks all of its dependents.
//! - A step skipped because it was blocked also blocks its dependents.
//! - An optional step's own failure is tolerated: its dependents still run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use flowmate_kernel::{Event, EventBus, StepError, StepExecutorRegistry, StepParams};
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::RegisteredWorkflow;
use crate::config::EngineConfig;
use crate::placeholder::resolve_template;
use crate::store::ExecutionStore;
use crate::template::{
    Context, ExecutionState, StepErrorKind, StepExecution, StepStatus, StepTemplate,
    WorkflowExecution,
};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of driving one step through its attempts.
#[derive(Debug, Clone)]
struct StepOutcome {
    status: StepStatus,
    attempts: u32,
    result: Option<String>,
    error: Option<String>,
    error_kind: Option<StepErrorKind>,
    retry_delays_ms: Vec<u64>,
}

impl StepOutcome {
    fn failed(attempts: u32, kind: StepErrorKind, error: String, delays: Vec<u64>) -> Self {
        Self {
            status: StepStatus::Failed,
            attempts,
            result: None,
            error: Some(error),
            error_kind: Some(kind),
            retry_delays_ms: delays,
        }
    }
}

/// Drives workflow executions against the step executor registry.
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: StepExecutorRegistry,
    store: ExecutionStore,
    events: EventBus,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        registry: StepExecutorRegistry,
        store: ExecutionStore,
        events: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            events,
            config,
        }
    }

    /// Run `execution` of `workflow` to a terminal state.
    ///
    /// The record is saved to the store when the run starts, around every
    /// wave, and when it finishes.  Cancellation requested through the
    /// store before or during the run is honoured between waves.
    pub async fn run(
        &self,
        workflow: &RegisteredWorkflow,
        mut execution: WorkflowExecution,
    ) -> WorkflowExecution {
        let template = &workflow.template;
        let order = workflow.plan.order();
        let n = order.len();

        if execution.steps.len() != n {
            execution.steps = order
                .iter()
                .map(|&i| StepExecution::pending(&template.steps[i]))
                .collect();
        }

        // position[template index] = index into `execution.steps`.
        let mut position = vec![0; template.steps.len()];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }
        let deps: Vec<Vec<usize>> = order
            .iter()
            .map(|&i| {
                workflow
                    .plan
                    .dependencies(i)
                    .iter()
                    .map(|&d| position[d])
                    .collect()
            })
            .collect();

        execution.state = ExecutionState::Running;
        execution.started_at.get_or_insert_with(Utc::now);
        self.store.save(&execution).await;
        let cancel = self
            .store
            .cancellation_token(&execution.id)
            .unwrap_or_default();

        self.events.publish(Event::ExecutionStarted {
            execution_id: execution.id,
            template_id: execution.template_id.clone(),
            user_id: execution.user_id.clone(),
            timestamp: Utc::now(),
        });
        info!(
            execution_id = %execution.id,
            template_id = %execution.template_id,
            user_id = %execution.user_id,
            steps = n,
            "workflow execution started"
        );

        let deadline = self.config.execution_deadline().map(|d| Instant::now() + d);
        // Per position: the error kind a blocked dependent inherits.
        let mut blocks: Vec<Option<StepErrorKind>> = vec![None; n];
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                self.skip_pending(
                    &mut execution,
                    StepErrorKind::ExecutionCancelled,
                    "execution was cancelled",
                );
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(execution_id = %execution.id, "execution deadline exceeded");
                self.skip_pending(
                    &mut execution,
                    StepErrorKind::DeadlineExceeded,
                    "execution deadline exceeded",
                );
                break;
            }

            // Plan order is topological, so one pass propagates transitively.
            for pos in 0..n {
                if execution.steps[pos].status != StepStatus::Pending {
                    continue;
                }
                let Some((upstream, kind)) = deps[pos]
                    .iter()
                    .find_map(|&d| blocks[d].map(|k| (d, k)))
                else {
                    continue;
                };
                let upstream_id = &execution.steps[upstream].step_id;
                let reason = match kind {
                    StepErrorKind::MissingPrecondition => {
                        format!("upstream step `{upstream_id}` did not provide its output")
                    }
                    _ => format!("required step `{upstream_id}` did not succeed"),
                };
                self.skip_step(&mut execution, pos, kind, reason);
                blocks[pos] = Some(kind);
            }

            let ready: Vec<usize> = (0..n)
                .filter(|&pos| {
                    execution.steps[pos].status == StepStatus::Pending
                        && deps[pos]
                            .iter()
                            .all(|&d| execution.steps[d].status.is_terminal())
                })
                .collect();
            if ready.is_empty() {
                break;
            }

            let mut dispatch: Vec<(usize, StepParams)> = Vec::with_capacity(ready.len());
            for pos in ready {
                let step = &template.steps[order[pos]];
                match resolve_params(step, &execution.context) {
                    Ok(params) => {
                        let record = &mut execution.steps[pos];
                        record.status = StepStatus::Running;
                        record.started_at = Some(Utc::now());
                        record.resolved_params = params.clone();
                        dispatch.push((pos, params));
                    }
                    Err(missing) => {
                        let reason =
                            format!("missing required parameter(s): {}", missing.join(", "));
                        let kind = StepErrorKind::MissingPrecondition;
                        self.skip_step(&mut execution, pos, kind, reason);
                        if !step.optional {
                            blocks[pos] = Some(StepErrorKind::MissingPrecondition);
                        }
                    }
                }
            }
            if dispatch.is_empty() {
                continue;
            }

            let wave: Vec<&str> = dispatch
                .iter()
                .map(|(p, _)| execution.steps[*p].step_id.as_str())
                .collect();
            debug!(execution_id = %execution.id, wave = ?wave, "dispatching wave");
            self.store.save(&execution).await;

            let execution_id = execution.id;
            let outcomes = join_all(dispatch.iter().map(|(pos, params)| {
                self.run_step(execution_id, &template.steps[order[*pos]], params)
            }))
            .await;

            for ((pos, _), outcome) in dispatch.iter().zip(outcomes) {
                let pos = *pos;
                let step = &template.steps[order[pos]];
                if outcome.status == StepStatus::Succeeded {
                    if let Some(result) = &outcome.result {
                        apply_outputs(step, result, &mut execution.context);
                    }
                } else if !step.optional {
                    blocks[pos] = Some(match outcome.error_kind {
                        Some(StepErrorKind::MissingPrecondition) => {
                            StepErrorKind::MissingPrecondition
                        }
                        _ => StepErrorKind::DependencyFailed,
                    });
                }

                let record = &mut execution.steps[pos];
                record.status = outcome.status;
                record.attempts = outcome.attempts;
                record.result = outcome.result;
                record.error = outcome.error;
                record.error_kind = outcome.error_kind;
                record.retry_delays_ms = outcome.retry_delays_ms;
                record.ended_at = Some(Utc::now());
                self.publish_step_finished(execution_id, record);
            }
            self.store.save(&execution).await;
        }

        execution.state = aggregate_state(&execution.steps, cancelled);
        execution.ended_at = Some(Utc::now());
        self.store.save(&execution).await;

        self.events.publish(Event::ExecutionFinished {
            execution_id: execution.id,
            status: execution.state.as_str().to_string(),
            timestamp: Utc::now(),
        });
        info!(
            execution_id = %execution.id,
            state = %execution.state,
            succeeded = execution.count(StepStatus::Succeeded),
            failed = execution.count(StepStatus::Failed),
            skipped = execution.count(StepStatus::Skipped),
            "workflow execution finished"
        );
        execution
    }

    /// Invoke one step with timeout, retry and exponential backoff.
    async fn run_step(
        &self,
        execution_id: Uuid,
        step: &StepTemplate,
        params: &StepParams,
    ) -> StepOutcome {
        let max_attempts = step.max_retries + 1;
        let mut delays: Vec<u64> = Vec::new();

        for attempt in 1..=max_attempts {
            self.events.publish(Event::StepStarted {
                execution_id,
                step_id: step.id.clone(),
                attempt,
                timestamp: Utc::now(),
            });
            debug!(
                execution_id = %execution_id,
                step_id = %step.id,
                target = %step.target,
                attempt,
                max_attempts,
                "step attempt"
            );

            let call = async {
                AssertUnwindSafe(self.registry.invoke(
                    &step.target.plugin,
                    &step.target.function,
                    params,
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(&*panic);
                    Err(StepError::terminal(format!("executor panicked: {message}")))
                })
            };
            let result = match self.config.step_timeout() {
                Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                    Err(StepError::transient(format!("timed out after {limit:?}")))
                }),
                None => call.await,
            };

            match result {
                Ok(output) => {
                    let empty = output.trim().is_empty();
                    if empty && !step.outputs.is_empty() && !step.allow_empty_result {
                        warn!(
                            execution_id = %execution_id,
                            step_id = %step.id,
                            "step returned an empty result"
                        );
                        return StepOutcome::failed(
                            attempt,
                            StepErrorKind::MissingPrecondition,
                            "step returned an empty result".into(),
                            delays,
                        );
                    }
                    debug!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        "step succeeded"
                    );
                    return StepOutcome {
                        status: StepStatus::Succeeded,
                        attempts: attempt,
                        result: Some(output),
                        error: None,
                        error_kind: None,
                        retry_delays_ms: delays,
                    };
                }
                Err(StepError::Terminal(message)) => {
                    warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        error = %message,
                        "step failed terminally"
                    );
                    let kind = StepErrorKind::TerminalStepFailure;
                    return StepOutcome::failed(attempt, kind, message, delays);
                }
                Err(StepError::Transient(message)) => {
                    warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        attempt,
                        error = %message,
                        "step attempt failed"
                    );
                    if attempt == max_attempts {
                        let error = if attempt > 1 {
                            format!("failed after {attempt} attempts: {message}")
                        } else {
                            message
                        };
                        let kind = StepErrorKind::TransientStepFailure;
                        return StepOutcome::failed(attempt, kind, error, delays);
                    }
                    let delay = backoff_delay(&self.config, attempt);
                    debug!(step_id = %step.id, delay = ?delay, "retrying after delay");
                    delays.push(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // max_attempts is at least 1, so the loop always returns.
        StepOutcome::failed(
            max_attempts,
            StepErrorKind::TransientStepFailure,
            "retry budget exhausted".into(),
            delays,
        )
    }

    /// Settle an execution whose run task died before it reached a terminal
    /// state.  Running steps fail, pending steps are skipped and the
    /// execution ends `Failed`.  Returns `None` when the record is gone.
    pub async fn abort(&self, execution_id: &Uuid, reason: &str) -> Option<WorkflowExecution> {
        let mut execution = self.store.get(execution_id).await?;
        if execution.state.is_terminal() {
            return Some(execution);
        }

        for pos in 0..execution.steps.len() {
            match execution.steps[pos].status {
                StepStatus::Running => {
                    let record = &mut execution.steps[pos];
                    record.status = StepStatus::Failed;
                    record.error_kind = Some(StepErrorKind::TerminalStepFailure);
                    record.error = Some(reason.to_string());
                    record.ended_at = Some(Utc::now());
                    self.publish_step_finished(execution.id, &execution.steps[pos]);
                }
                StepStatus::Pending => {
                    let kind = StepErrorKind::TerminalStepFailure;
                    self.skip_step(&mut execution, pos, kind, reason);
                }
                _ => {}
            }
        }
        execution.state = ExecutionState::Failed;
        execution.ended_at = Some(Utc::now());
        self.store.save(&execution).await;

        self.events.publish(Event::ExecutionFinished {
            execution_id: execution.id,
            status: execution.state.as_str().to_string(),
            timestamp: Utc::now(),
        });
        warn!(execution_id = %execution.id, reason, "workflow execution aborted");
        Some(execution)
    }

    fn skip_step(
        &self,
        execution: &mut WorkflowExecution,
        pos: usize,
        kind: StepErrorKind,
        reason: impl Into<String>,
    ) {
        let execution_id = execution.id;
        let record = &mut execution.steps[pos];
        record.status = StepStatus::Skipped;
        record.error_kind = Some(kind);
        record.error = Some(reason.into());
        record.ended_at = Some(Utc::now());
        debug!(
            execution_id = %execution_id,
            step_id = %record.step_id,
            kind = %kind,
            "step skipped"
        );
        self.publish_step_finished(execution_id, record);
    }

    fn skip_pending(&self, execution: &mut WorkflowExecution, kind: StepErrorKind, reason: &str) {
        for pos in 0..execution.steps.len() {
            if execution.steps[pos].status == StepStatus::Pending {
                self.skip_step(execution, pos, kind, reason);
            }
        }
    }

    fn publish_step_finished(&self, execution_id: Uuid, record: &StepExecution) {
        self.events.publish(Event::StepFinished {
            execution_id,
            step_id: record.step_id.clone(),
            status: record.status.as_str().to_string(),
            attempts: record.attempts,
            timestamp: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Step helpers
// ---------------------------------------------------------------------------

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Delay before retry number `retry` (1-based): the base delay doubled for
/// each earlier retry, capped at the configured maximum.
pub fn backoff_delay(config: &EngineConfig, retry: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry.saturating_sub(1));
    let millis = config
        .base_retry_delay_ms
        .saturating_mul(factor)
        .min(config.max_retry_delay_ms);
    Duration::from_millis(millis)
}

/// Resolve a step's parameters against the context.
///
/// Blank optional parameters are omitted.  Returns the names of required
/// parameters that resolved blank as the error.
pub fn resolve_params(step: &StepTemplate, context: &Context) -> Result<StepParams, Vec<String>> {
    let mut params = StepParams::new();
    let mut missing = Vec::new();
    for (name, param) in &step.params {
        let value = resolve_template(&param.template, context);
        if value.trim().is_empty() {
            if param.required {
                missing.push(name.clone());
            }
            continue;
        }
        params.insert(name.clone(), Value::String(value));
    }
    if missing.is_empty() {
        Ok(params)
    } else {
        Err(missing)
    }
}

/// Copy a successful step's outputs into the context.
///
/// The output key `result` stores the raw result text.  Any other key selects
/// the same-named field of a JSON-object result; absent fields are left out.
pub fn apply_outputs(step: &StepTemplate, result: &str, context: &mut Context) {
    let object = if step.outputs.keys().any(|k| k != "result") {
        match serde_json::from_str::<Value>(result) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    } else {
        None
    };

    for (output, key) in &step.outputs {
        let value = if output == "result" {
            Some(Value::String(result.to_string()))
        } else {
            object.as_ref().and_then(|m| m.get(output)).cloned()
        };
        match value {
            Some(value) => {
                context.insert(key.clone(), value);
            }
            None => {
                debug!(step_id = %step.id, output = %output, "output field not present in result");
            }
        }
    }
}

/// Overall state from the final step records.
pub fn aggregate_state(steps: &[StepExecution], cancelled: bool) -> ExecutionState {
    if cancelled {
        return ExecutionState::Cancelled;
    }
    if !steps.iter().any(|s| s.status == StepStatus::Succeeded) {
        return ExecutionState::Failed;
    }
    let clean = steps.iter().all(|s| {
        if s.optional {
            s.status != StepStatus::Failed
        } else {
            s.status == StepStatus::Succeeded
        }
    });
    if clean {
        ExecutionState::Completed
    } else {
        ExecutionState::PartiallyCompleted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
