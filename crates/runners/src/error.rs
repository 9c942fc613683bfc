//! Runner-level error types.

use thiserror::Error;

/// Errors returned by a [`CommandRunner`](crate::CommandRunner) or an
/// [`ActionRegistry`](crate::ActionRegistry).
///
/// The step executor uses the variant to decide retry behaviour:
/// - `Transient`: the step is retried with exponential back-off.
/// - `Fatal`: the step fails immediately.
/// - `UnknownAction`: no action is registered under the requested name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// Temporary failure; the executor may retry the step.
    #[error("transient runner error: {0}")]
    Transient(String),

    /// Permanent failure; no retry is attempted.
    #[error("runner error: {0}")]
    Fatal(String),

    /// `uses:` referenced an action nobody registered.
    #[error("no action registered for '{0}'")]
    UnknownAction(String),
}

/// Failure to evaluate a gating expression.
///
/// The engine treats this as `false` and skips the gated job or step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot evaluate gate '{expression}': {reason}")]
pub struct GateError {
    pub expression: String,
    pub reason: String,
}

impl GateError {
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}
