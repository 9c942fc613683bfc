//! Workflow validation and the job dependency graph. Run this before
//! registering a workflow.
//!
//! Rules enforced:
//! 1. The workflow has a name and at least one job.
//! 2. Every job has at least one step; every step sets exactly one of `run`
//!    and `uses`; step ids are unique within their job; timeouts are non-zero.
//! 3. Every `needs` entry references a job of the same workflow.
//! 4. The `needs` graph is acyclic (topological sort must succeed).
//!
//! Returns a [`JobGraph`] on success; the scheduler reuses it for every run of
//! the workflow, so cycles are only ever checked here.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::models::{JobId, WorkflowDefinition};
use crate::DefinitionError;

/// Dependency structure of a validated workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobGraph {
    order: Vec<JobId>,
    prerequisites: BTreeMap<JobId, BTreeSet<JobId>>,
    dependents: BTreeMap<JobId, Vec<JobId>>,
}

impl JobGraph {
    /// Jobs in a topological order (ties broken by job id).
    pub fn order(&self) -> &[JobId] {
        &self.order
    }

    /// Distinct prerequisites of `job`.
    pub fn prerequisites(&self, job: &str) -> impl Iterator<Item = &JobId> {
        self.prerequisites.get(job).into_iter().flatten()
    }

    /// Number of distinct prerequisites of `job`.
    pub fn prerequisite_count(&self, job: &str) -> usize {
        self.prerequisites.get(job).map_or(0, BTreeSet::len)
    }

    /// Jobs that list `job` in their `needs`.
    pub fn dependents(&self, job: &str) -> &[JobId] {
        self.dependents.get(job).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Validate `workflow` and build its job graph.
///
/// # Errors
/// Any [`DefinitionError`] other than `Parse` / `NameMismatch`.
pub fn validate_workflow(workflow: &WorkflowDefinition) -> Result<JobGraph, DefinitionError> {
    // -----------------------------------------------------------------------
    // 1. Workflow shape
    // -----------------------------------------------------------------------
    if workflow.name.trim().is_empty() {
        return Err(DefinitionError::MissingName);
    }
    if workflow.jobs.is_empty() {
        return Err(DefinitionError::NoJobs(workflow.name.clone()));
    }

    // -----------------------------------------------------------------------
    // 2. Jobs and steps
    // -----------------------------------------------------------------------
    for (job_id, job) in &workflow.jobs {
        if job.steps.is_empty() {
            return Err(DefinitionError::NoSteps(job_id.clone()));
        }
        if job.timeout_secs == Some(0) {
            return Err(DefinitionError::ZeroTimeout {
                scope: format!("job '{job_id}'"),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (index, step) in job.steps.iter().enumerate() {
            if step.dispatch().is_none() {
                return Err(DefinitionError::StepTarget {
                    job: job_id.clone(),
                    index,
                });
            }
            if step.timeout_secs == Some(0) {
                return Err(DefinitionError::ZeroTimeout {
                    scope: format!("step {index} of job '{job_id}'"),
                });
            }
            if let Some(id) = &step.id {
                if !seen_ids.insert(id.as_str()) {
                    return Err(DefinitionError::DuplicateStepId {
                        job: job_id.clone(),
                        id: id.clone(),
                    });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. `needs` references
    // -----------------------------------------------------------------------
    let mut prerequisites: BTreeMap<JobId, BTreeSet<JobId>> = BTreeMap::new();
    let mut dependents: BTreeMap<JobId, Vec<JobId>> = BTreeMap::new();

    for (job_id, job) in &workflow.jobs {
        let prereqs = prerequisites.entry(job_id.clone()).or_default();
        for need in &job.needs {
            if !workflow.jobs.contains_key(need) {
                return Err(DefinitionError::UnknownNeed {
                    job: job_id.clone(),
                    need: need.clone(),
                });
            }
            // Listing the same prerequisite twice still counts once.
            if prereqs.insert(need.clone()) {
                dependents.entry(need.clone()).or_default().push(job_id.clone());
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut in_degree: BTreeMap<&str, usize> = prerequisites
        .iter()
        .map(|(id, prereqs)| (id.as_str(), prereqs.len()))
        .collect();

    // Seed the queue with jobs that need nothing.
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut order: Vec<JobId> = Vec::with_capacity(workflow.jobs.len());

    while let Some(job_id) = queue.pop_front() {
        order.push(job_id.to_owned());

        for dependent in dependents.get(job_id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(dependent.as_str());
                }
            }
        }
    }

    // Whatever was never released sits on, or behind, a cycle.
    if order.len() != workflow.jobs.len() {
        let jobs = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_owned())
            .collect();
        return Err(DefinitionError::CycleDetected { jobs });
    }

    Ok(JobGraph {
        order,
        prerequisites,
        dependents,
    })
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDefinition, StepDefinition, Trigger};

    fn job(needs: &[&str]) -> JobDefinition {
        JobDefinition::new(vec![StepDefinition::command("true")]).needs(needs.iter().copied())
    }

    fn make_workflow(jobs: Vec<(&str, JobDefinition)>) -> WorkflowDefinition {
        jobs.into_iter()
            .fold(WorkflowDefinition::new("test", Trigger::Event("push".into())), |wf, (id, j)| {
                wf.job(id, j)
            })
    }

    #[test]
    fn valid_linear_graph_returns_sorted_order() {
        // a → b → c
        let workflow = make_workflow(vec![
            ("c", job(&["b"])),
            ("a", job(&[])),
            ("b", job(&["a"])),
        ]);

        let graph = validate_workflow(&workflow).expect("should be valid");
        assert_eq!(graph.order(), ["a", "b", "c"]);
        assert_eq!(graph.dependents("a"), ["b"]);
        assert_eq!(graph.prerequisite_count("c"), 1);
    }

    #[test]
    fn valid_diamond_graph() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let workflow = make_workflow(vec![
            ("a", job(&[])),
            ("b", job(&["a"])),
            ("c", job(&["a"])),
            ("d", job(&["b", "c"])),
        ]);

        let graph = validate_workflow(&workflow).expect("should be valid");
        assert_eq!(graph.order().first().unwrap(), "a");
        assert_eq!(graph.order().last().unwrap(), "d");
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.prerequisites("d").collect::<Vec<_>>(), ["b", "c"]);
    }

    #[test]
    fn duplicate_needs_count_once() {
        let workflow = make_workflow(vec![("a", job(&[])), ("b", job(&["a", "a"]))]);
        let graph = validate_workflow(&workflow).unwrap();
        assert_eq!(graph.prerequisite_count("b"), 1);
        assert_eq!(graph.dependents("a"), ["b"]);
    }

    #[test]
    fn unknown_need_is_rejected() {
        let workflow = make_workflow(vec![("a", job(&["ghost"]))]);
        assert!(matches!(
            validate_workflow(&workflow),
            Err(DefinitionError::UnknownNeed { need, .. }) if need == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // a → b → c → a, d hangs off the cycle
        let workflow = make_workflow(vec![
            ("a", job(&["c"])),
            ("b", job(&["a"])),
            ("c", job(&["b"])),
            ("d", job(&["c"])),
            ("free", job(&[])),
        ]);
        match validate_workflow(&workflow) {
            Err(DefinitionError::CycleDetected { jobs }) => {
                assert_eq!(jobs, ["a", "b", "c", "d"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let workflow = make_workflow(vec![("a", job(&["a"]))]);
        assert!(matches!(
            validate_workflow(&workflow),
            Err(DefinitionError::CycleDetected { .. })
        ));
    }

    #[test]
    fn step_must_have_exactly_one_target() {
        let mut bad = job(&[]);
        bad.steps.push(StepDefinition::default());
        let workflow = make_workflow(vec![("a", bad)]);
        assert_eq!(
            validate_workflow(&workflow),
            Err(DefinitionError::StepTarget { job: "a".into(), index: 1 })
        );
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let dup = JobDefinition::new(vec![
            StepDefinition::command("one").with_id("x"),
            StepDefinition::command("two").with_id("x"),
        ]);
        let workflow = make_workflow(vec![("a", dup)]);
        assert!(matches!(
            validate_workflow(&workflow),
            Err(DefinitionError::DuplicateStepId { id, .. }) if id == "x"
        ));
    }

    #[test]
    fn empty_shapes_are_rejected() {
        let unnamed = WorkflowDefinition::new("  ", Trigger::Event("push".into())).job("a", job(&[]));
        assert_eq!(validate_workflow(&unnamed), Err(DefinitionError::MissingName));

        let no_jobs = WorkflowDefinition::new("empty", Trigger::Event("push".into()));
        assert!(matches!(validate_workflow(&no_jobs), Err(DefinitionError::NoJobs(_))));

        let no_steps = make_workflow(vec![("a", JobDefinition::default())]);
        assert!(matches!(validate_workflow(&no_steps), Err(DefinitionError::NoSteps(_))));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut timed = job(&[]);
        timed.timeout_secs = Some(0);
        let workflow = make_workflow(vec![("a", timed)]);
        assert!(matches!(
            validate_workflow(&workflow),
            Err(DefinitionError::ZeroTimeout { .. })
        ));
    }
}
