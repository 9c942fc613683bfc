//! Step execution.
//!
//! `StepExecutor` runs the steps of one job:
//! 1. Steps run strictly in order; each sees the results recorded by the
//!    steps before it.
//! 2. A step whose `if:` gate is false (or cannot be evaluated) is skipped.
//! 3. Commands go to the `CommandRunner`, `uses:` references to the
//!    `ActionRegistry`; a non-zero exit or an error fails the job and the
//!    remaining steps never start.
//! 4. `RunnerError::Transient` is retried (up to `max_retries`) with
//!    exponential back-off.
//! 5. Step and job time budgets are enforced; running out is a step failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use runners::{ActionRegistry, CommandRunner, GateEvaluator, RunnerError};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::context::JobScope;
use crate::models::{JobDefinition, StepAction, StepDefinition};
use crate::notify::{LifecycleEvent, Notifier};
use crate::run::{JobRunState, JobSummary, StepState, StepSummary};
use crate::StepError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of times a transient step failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// Budget for steps without their own `timeout-secs`.
    pub step_timeout: Option<Duration>,
    /// Budget for jobs without their own `timeout-secs`.
    pub job_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            step_timeout: None,
            job_timeout: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a completed job
// ---------------------------------------------------------------------------

/// What running one job produced.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub summary: JobSummary,
    /// Results of steps that have an `id`, in execution order.
    pub step_outputs: Vec<(String, Value)>,
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Runs jobs step by step against the configured collaborators.
///
/// Holds no per-run state; one executor serves every run of an engine.
pub struct StepExecutor {
    commands: Arc<dyn CommandRunner>,
    actions: Arc<dyn ActionRegistry>,
    gates: Arc<dyn GateEvaluator>,
    notifier: Notifier,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(
        commands: Arc<dyn CommandRunner>,
        actions: Arc<dyn ActionRegistry>,
        gates: Arc<dyn GateEvaluator>,
        notifier: Notifier,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            commands,
            actions,
            gates,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Evaluate a gate. Evaluation failures count as `false`.
    pub async fn gate_passes(&self, expression: &str, view: &Value) -> bool {
        match self.gates.evaluate(expression, view).await {
            Ok(passes) => passes,
            Err(e) => {
                warn!(error = %e, "gate evaluation failed, treating as false");
                false
            }
        }
    }

    /// Run every step of `job`, in order, against `scope`.
    ///
    /// Never returns an error: a failing step yields a `Failed` summary.
    #[instrument(skip_all, fields(run_id = %run_id, job = %job_id))]
    pub async fn run_job(
        &self,
        run_id: Uuid,
        job_id: &str,
        job: &JobDefinition,
        mut scope: JobScope,
    ) -> JobOutcome {
        let deadline = job
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.config.job_timeout)
            .map(|limit| (Instant::now() + limit, limit));

        let mut steps = Vec::with_capacity(job.steps.len());
        let mut step_outputs = Vec::new();

        for (index, step) in job.steps.iter().enumerate() {
            let name = step.display_name(index);

            if let Some(condition) = &step.condition {
                if !self.gate_passes(condition, scope.view()).await {
                    debug!(step = %name, "step gate is false, skipping");
                    steps.push(StepSummary {
                        name: name.clone(),
                        id: step.id.clone(),
                        state: StepState::Skipped,
                        error: None,
                    });
                    self.notifier.emit(LifecycleEvent::StepComplete {
                        run_id,
                        job: job_id.to_string(),
                        step: name,
                        state: StepState::Skipped,
                    });
                    continue;
                }
            }

            self.notifier.emit(LifecycleEvent::StepStart {
                run_id,
                job: job_id.to_string(),
                step: name.clone(),
            });

            let result = match self.step_budget(step, deadline) {
                Ok(budget) => self.run_step(step, &scope, budget).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(output) => {
                    if let Some(id) = &step.id {
                        scope.record_step(id, output.clone());
                        step_outputs.push((id.clone(), output));
                    }
                    steps.push(StepSummary {
                        name: name.clone(),
                        id: step.id.clone(),
                        state: StepState::Succeeded,
                        error: None,
                    });
                    self.notifier.emit(LifecycleEvent::StepComplete {
                        run_id,
                        job: job_id.to_string(),
                        step: name,
                        state: StepState::Succeeded,
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(step = %name, error = %message, "step failed");
                    self.notifier.emit(LifecycleEvent::StepError {
                        run_id,
                        job: job_id.to_string(),
                        step: name.clone(),
                        error: message.clone(),
                    });
                    let error = format!("step '{name}' failed: {message}");
                    steps.push(StepSummary {
                        name,
                        id: step.id.clone(),
                        state: StepState::Failed,
                        error: Some(message),
                    });
                    return JobOutcome {
                        summary: JobSummary {
                            state: JobRunState::Failed,
                            outputs: Map::new(),
                            steps,
                            error: Some(error),
                            reason: None,
                        },
                        step_outputs,
                    };
                }
            }
        }

        let outputs: Map<String, Value> = job
            .outputs
            .iter()
            .map(|(key, expression)| (key.clone(), scope.interpolate(expression)))
            .collect();

        JobOutcome {
            summary: JobSummary {
                state: JobRunState::Succeeded,
                outputs,
                steps,
                error: None,
                reason: None,
            },
            step_outputs,
        }
    }

    /// Time a step may take: its own limit (or the default), capped by what is
    /// left of the job's budget.
    fn step_budget(
        &self,
        step: &StepDefinition,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<Option<Duration>, StepError> {
        let step_limit = step
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.config.step_timeout);

        let Some((at, job_limit)) = deadline else {
            return Ok(step_limit);
        };

        let remaining = at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StepError::Timeout(job_limit));
        }
        Ok(Some(step_limit.map_or(remaining, |limit| limit.min(remaining))))
    }

    async fn run_step(
        &self,
        step: &StepDefinition,
        scope: &JobScope,
        budget: Option<Duration>,
    ) -> Result<Value, StepError> {
        let attempt = self.execute_with_retry(step, scope);
        match budget {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .map_err(|_| StepError::Timeout(limit))?,
            None => attempt.await,
        }
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single step with retry logic.
    // -----------------------------------------------------------------------

    async fn execute_with_retry(
        &self,
        step: &StepDefinition,
        scope: &JobScope,
    ) -> Result<Value, StepError> {
        let mut attempts = 0u32;

        loop {
            match self.dispatch(step, scope).await {
                Err(StepError::Runner(RunnerError::Transient(msg))) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(StepError::RetryExhausted(msg));
                    }

                    let delay = self
                        .config
                        .retry_base_delay
                        .saturating_mul(2u32.saturating_pow(attempts - 1));

                    warn!(
                        "transient step error (attempt {}/{}), retrying in {:?}: {}",
                        attempts, self.config.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn dispatch(&self, step: &StepDefinition, scope: &JobScope) -> Result<Value, StepError> {
        match step.dispatch() {
            Some(StepAction::Command(run)) => {
                let command = scope.render(run);
                let env: BTreeMap<String, String> = step
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), scope.render(v)))
                    .collect();

                debug!(%command, "running command");
                let output = self.commands.run(&command, &env).await?;
                if !output.success() {
                    return Err(StepError::NonZeroExit {
                        exit_code: output.exit_code,
                    });
                }
                Ok(Value::String(output.stdout.trim_end().to_string()))
            }
            Some(StepAction::Action { name, inputs }) => {
                let inputs = scope.resolve_inputs(inputs);
                debug!(action = name, "invoking action");
                Ok(self.actions.invoke(name, &inputs).await?)
            }
            // Rejected when the workflow was registered.
            None => Err(StepError::Runner(RunnerError::Fatal(
                "step must set exactly one of `run` or `uses`".into(),
            ))),
        }
    }
}
