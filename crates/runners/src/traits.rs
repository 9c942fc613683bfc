//! The collaborator traits every runner implements.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GateError, RunnerError};

/// Inputs passed to a named action (`with:` in a step definition).
pub type ActionInputs = BTreeMap<String, Value>;

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code,
        }
    }

    /// Exit code 0 with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(stdout, 0)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes the `run:` string of a step.
///
/// A non-zero exit code is *not* an error at this level; the executor decides
/// what it means. `Err` is reserved for failing to run the command at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Resolves and invokes the `uses:` reference of a step.
#[async_trait]
pub trait ActionRegistry: Send + Sync {
    async fn invoke(&self, name: &str, inputs: &ActionInputs) -> Result<Value, RunnerError>;
}

/// Decides a job or step `if:` gate.
///
/// `view` is a read-only JSON snapshot of the run context as seen by the
/// gated job or step (`event`, `env`, `jobs`, `steps`, `job`).
#[async_trait]
pub trait GateEvaluator: Send + Sync {
    async fn evaluate(&self, expression: &str, view: &Value) -> Result<bool, GateError>;
}
