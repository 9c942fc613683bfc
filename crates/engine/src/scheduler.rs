//! Job graph scheduling for a single run.
//!
//! The scheduling loop owns every piece of per-run state: job states, the
//! remaining-prerequisite counters, the ready queue and the [`RunContext`].
//! Jobs execute as tasks on a [`JoinSet`]. A task evaluates its job gate,
//! reports back once steps begin, and returns the outcome; the loop is the
//! only place a job changes state.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::dag::JobGraph;
use crate::executor::{JobOutcome, StepExecutor};
use crate::models::{Event, JobId, WorkflowDefinition};
use crate::notify::{LifecycleEvent, Notifier};
use crate::run::{JobRunState, JobSummary, RunStatus, RunSummary};

/// Scheduling policy shared by every run of an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Upper bound on jobs running at once; `None` (or zero) means unbounded.
    pub max_concurrent_jobs: Option<usize>,
    /// Treat a `Skipped` prerequisite like a `Failed` one.
    pub skipped_blocks_dependents: bool,
}

/// Drives the jobs of one workflow run from `Pending` to a terminal state.
pub struct Scheduler {
    executor: Arc<StepExecutor>,
    notifier: Notifier,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(executor: Arc<StepExecutor>, notifier: Notifier, options: SchedulerOptions) -> Self {
        Self {
            executor,
            notifier,
            options,
        }
    }

    /// Run `workflow` to completion for `event`.
    ///
    /// `graph` must be the graph produced by validating `workflow`.
    pub async fn run(
        &self,
        workflow: Arc<WorkflowDefinition>,
        graph: Arc<JobGraph>,
        event: &Event,
        context: RunContext,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(%run_id, workflow = %workflow.name, event = %event.name, "workflow run started");
        self.notifier.emit(LifecycleEvent::WorkflowStart {
            run_id,
            workflow: workflow.name.clone(),
            event: event.name.clone(),
        });

        let mut run = RunState::new(run_id, &graph, &self.notifier, &self.options, context);
        let mut tasks: JoinSet<(JobId, JobOutcome)> = JoinSet::new();
        let mut task_jobs: HashMap<task::Id, JobId> = HashMap::new();
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<JobId>();
        let limit = self.options.max_concurrent_jobs.filter(|n| *n > 0);
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                info!(%run_id, "cancellation requested, no further jobs will start");
                cancelled = true;
            }

            if cancelled {
                run.skip_ready("run cancelled");
            } else {
                while limit.map_or(true, |max| tasks.len() < max) && !cancel.is_cancelled() {
                    let Some(job_id) = run.ready.pop_front() else {
                        break;
                    };
                    let Some(job) = workflow.jobs.get(&job_id) else {
                        run.settle(job_id, JobSummary::failed("job is not part of the workflow"));
                        continue;
                    };

                    let scope = run.context.scope(&job_id, job);
                    let job = job.clone();
                    let executor = Arc::clone(&self.executor);
                    let started = started_tx.clone();
                    let task_job = job_id.clone();
                    let handle = tasks.spawn(async move {
                        if let Some(condition) = &job.condition {
                            if !executor.gate_passes(condition, scope.view()).await {
                                debug!(%run_id, job = %job_id, "job gate is false");
                                let outcome = JobOutcome {
                                    summary: JobSummary::skipped("condition evaluated to false"),
                                    step_outputs: Vec::new(),
                                };
                                return (job_id, outcome);
                            }
                        }
                        // The loop owns the receiver for the whole run.
                        let _ = started.send(job_id.clone());
                        let outcome = executor.run_job(run_id, &job_id, &job, scope).await;
                        (job_id, outcome)
                    });
                    task_jobs.insert(handle.id(), task_job);
                }
            }

            if tasks.is_empty() {
                break;
            }

            // `biased` drains start notices before completions, so a job's
            // JobStart always precedes its JobComplete.
            tokio::select! {
                biased;
                Some(job_id) = started_rx.recv() => run.start(job_id),
                joined = tasks.join_next_with_id() => match joined {
                    Some(Ok((id, (job_id, outcome)))) => {
                        task_jobs.remove(&id);
                        run.complete(job_id, outcome);
                    }
                    Some(Err(e)) => {
                        error!(%run_id, error = %e, "job task terminated unexpectedly");
                        if let Some(job_id) = task_jobs.remove(&e.id()) {
                            run.settle(job_id, JobSummary::failed(format!("job task terminated unexpectedly: {e}")));
                        }
                    }
                    None => {}
                },
                _ = cancel.cancelled(), if !cancelled => {}
            }
        }

        run.sweep();

        let status = if run.any_failed() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        info!(%run_id, workflow = %workflow.name, ?status, cancelled, "workflow run finished");
        self.notifier.emit(LifecycleEvent::WorkflowComplete {
            run_id,
            workflow: workflow.name.clone(),
            status,
        });

        RunSummary {
            run_id,
            workflow: workflow.name.clone(),
            event: event.name.clone(),
            status,
            cancelled,
            jobs: run.summaries,
            error: run.first_error,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-run bookkeeping
// ---------------------------------------------------------------------------

struct RunState<'a> {
    run_id: Uuid,
    graph: &'a JobGraph,
    notifier: &'a Notifier,
    options: &'a SchedulerOptions,
    context: RunContext,
    states: BTreeMap<JobId, JobRunState>,
    remaining: BTreeMap<JobId, usize>,
    summaries: BTreeMap<JobId, JobSummary>,
    ready: VecDeque<JobId>,
    /// Jobs skipped because something upstream failed; they block in turn.
    blocked: BTreeSet<JobId>,
    first_error: Option<String>,
}

impl<'a> RunState<'a> {
    fn new(
        run_id: Uuid,
        graph: &'a JobGraph,
        notifier: &'a Notifier,
        options: &'a SchedulerOptions,
        context: RunContext,
    ) -> Self {
        let mut states = BTreeMap::new();
        let mut remaining = BTreeMap::new();
        let mut ready = VecDeque::new();

        for job in graph.order() {
            let count = graph.prerequisite_count(job);
            remaining.insert(job.clone(), count);
            if count == 0 {
                states.insert(job.clone(), JobRunState::Ready);
                ready.push_back(job.clone());
            } else {
                states.insert(job.clone(), JobRunState::Pending);
            }
        }

        Self {
            run_id,
            graph,
            notifier,
            options,
            context,
            states,
            remaining,
            summaries: BTreeMap::new(),
            ready,
            blocked: BTreeSet::new(),
            first_error: None,
        }
    }

    /// A dispatched job passed its gate and is running steps.
    fn start(&mut self, job_id: JobId) {
        info!(run_id = %self.run_id, job = %job_id, "job started");
        self.states.insert(job_id.clone(), JobRunState::Running);
        self.notifier.emit(LifecycleEvent::JobStart {
            run_id: self.run_id,
            job: job_id,
        });
    }

    /// Fold a finished job's outcome into the run.
    fn complete(&mut self, job_id: JobId, outcome: JobOutcome) {
        for (step, output) in outcome.step_outputs {
            self.context.record_step(&job_id, &step, output);
        }
        self.settle(job_id, outcome.summary);
    }

    /// Record a terminal state and release (or skip) dependents whose last
    /// prerequisite this was.
    fn settle(&mut self, job_id: JobId, summary: JobSummary) {
        let graph = self.graph;
        let mut pending = vec![(job_id, summary)];

        while let Some((job_id, summary)) = pending.pop() {
            let state = summary.state;
            debug_assert!(state.is_terminal());

            match state {
                JobRunState::Failed => {
                    let message = summary.error.clone().unwrap_or_else(|| "job failed".into());
                    error!(run_id = %self.run_id, job = %job_id, error = %message, "job failed");
                    if self.first_error.is_none() {
                        self.first_error = Some(format!("job '{job_id}': {message}"));
                    }
                }
                JobRunState::Skipped => {
                    info!(
                        run_id = %self.run_id,
                        job = %job_id,
                        reason = summary.reason.as_deref().unwrap_or_default(),
                        "job skipped"
                    );
                }
                _ => info!(run_id = %self.run_id, job = %job_id, "job succeeded"),
            }

            self.context.record_job(&job_id, state, summary.outputs.clone());
            self.states.insert(job_id.clone(), state);
            self.summaries.insert(job_id.clone(), summary);
            self.notifier.emit(LifecycleEvent::JobComplete {
                run_id: self.run_id,
                job: job_id.clone(),
                state,
            });

            for dependent in graph.dependents(&job_id) {
                let Some(left) = self.remaining.get_mut(dependent) else {
                    continue;
                };
                *left = left.saturating_sub(1);
                if *left > 0 {
                    continue;
                }

                match self.blocker(dependent) {
                    Some(reason) => {
                        self.blocked.insert(dependent.clone());
                        pending.push((dependent.clone(), JobSummary::skipped(reason)));
                    }
                    None => {
                        self.states.insert(dependent.clone(), JobRunState::Ready);
                        self.ready.push_back(dependent.clone());
                    }
                }
            }
        }
    }

    /// Why `job` must not run, judged once all its prerequisites are terminal.
    fn blocker(&self, job: &str) -> Option<String> {
        self.graph.prerequisites(job).find_map(|prereq| {
            match self.states.get(prereq) {
                Some(JobRunState::Failed) => Some(format!("prerequisite '{prereq}' failed")),
                Some(JobRunState::Skipped) if self.blocked.contains(prereq) => {
                    Some(format!("prerequisite '{prereq}' was skipped after a failure"))
                }
                Some(JobRunState::Skipped) if self.options.skipped_blocks_dependents => {
                    Some(format!("prerequisite '{prereq}' was skipped"))
                }
                _ => None,
            }
        })
    }

    fn skip_ready(&mut self, reason: &str) {
        while let Some(job_id) = self.ready.pop_front() {
            self.settle(job_id, JobSummary::skipped(reason));
        }
    }

    /// Give every job a terminal state, whatever happened to its task.
    fn sweep(&mut self) {
        for job in self.graph.order() {
            let summary = match self.states.get(job) {
                Some(state) if state.is_terminal() => continue,
                Some(JobRunState::Running) => JobSummary::failed("job task terminated unexpectedly"),
                _ => JobSummary::skipped("run ended before the job could start"),
            };
            warn!(run_id = %self.run_id, job = %job, state = ?summary.state, "job settled at run end");
            self.states.insert(job.clone(), summary.state);
            if summary.state == JobRunState::Failed && self.first_error.is_none() {
                self.first_error = Some(format!("job '{job}': job task terminated unexpectedly"));
            }
            self.summaries.insert(job.clone(), summary);
        }
    }

    fn any_failed(&self) -> bool {
        self.states.values().any(|s| *s == JobRunState::Failed)
    }
}
