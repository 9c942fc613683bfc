//! Run-time states and the summaries a triggered run produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::JobId;

/// Where a job is within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobRunState {
    /// `Succeeded`, `Failed` and `Skipped` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// How a single step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Succeeded,
    Failed,
    Skipped,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No job failed.
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub state: JobRunState,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why a skipped job did not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobSummary {
    /// A job that finished without running any step.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            state: JobRunState::Skipped,
            outputs: Map::new(),
            steps: Vec::new(),
            error: None,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobRunState::Failed,
            outputs: Map::new(),
            steps: Vec::new(),
            error: Some(error.into()),
            reason: None,
        }
    }
}

/// The result of one triggered run of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub workflow: String,
    pub event: String,
    pub status: RunStatus,
    /// Dispatch was stopped early by a cancellation request.
    pub cancelled: bool,
    pub jobs: BTreeMap<JobId, JobSummary>,
    /// Error of the first job to fail, in completion order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn job_state(&self, job: &str) -> Option<JobRunState> {
        self.jobs.get(job).map(|j| j.state)
    }

    pub fn job_output(&self, job: &str, name: &str) -> Option<&Value> {
        self.jobs.get(job).and_then(|j| j.outputs.get(name))
    }
}
