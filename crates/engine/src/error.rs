//! Engine-level error types.

use std::path::PathBuf;
use std::time::Duration;

use runners::RunnerError;
use thiserror::Error;

use crate::models::JobId;

/// A workflow definition that cannot be registered.
///
/// Detected when a definition is loaded or created, never while it runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The document is not valid YAML or does not match the schema.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("workflow name must not be empty")]
    MissingName,

    #[error("workflow '{0}' does not define any jobs")]
    NoJobs(String),

    #[error("job '{0}' does not define any steps")]
    NoSteps(JobId),

    /// A step sets both or neither of `run` and `uses`.
    #[error("step {index} of job '{job}' must set exactly one of `run` or `uses`")]
    StepTarget { job: JobId, index: usize },

    #[error("duplicate step id '{id}' in job '{job}'")]
    DuplicateStepId { job: JobId, id: String },

    /// A `needs` entry names a job that does not exist.
    #[error("job '{job}' needs unknown job '{need}'")]
    UnknownNeed { job: JobId, need: JobId },

    /// The `needs` graph is not acyclic.
    #[error("job graph contains a cycle through: {}", jobs.join(", "))]
    CycleDetected { jobs: Vec<JobId> },

    #[error("timeout of {scope} must be greater than zero")]
    ZeroTimeout { scope: String },

    /// `create(name, def)` was called with a definition named differently.
    #[error("definition named '{found}' cannot be stored as '{expected}'")]
    NameMismatch { expected: String, found: String },
}

/// Errors surfaced by the engine's definition management API.
///
/// Running a workflow never produces one of these; run failures are reported
/// in the [`RunSummary`](crate::RunSummary).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialise workflow '{name}': {message}")]
    Serialize { name: String, message: String },

    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("workflow suggestion failed: {0}")]
    Suggest(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a step failed. A step failure fails its job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("command exited with status {exit_code}")]
    NonZeroExit { exit_code: i32 },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// A transient runner error persisted through every retry.
    #[error("exceeded retry limit: {0}")]
    RetryExhausted(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}
