//! `runners` crate: the collaborator traits the engine delegates to, plus
//! built-in implementations.
//!
//! The engine never executes a command, an action, or a gate expression
//! itself; it dispatches through [`CommandRunner`], [`ActionRegistry`], and
//! [`GateEvaluator`] trait objects.

pub mod actions;
pub mod error;
pub mod gate;
pub mod mock;
pub mod path;
pub mod shell;
pub mod traits;

pub use actions::{Action, ActionTable, EchoAction};
pub use error::{GateError, RunnerError};
pub use gate::{CommandGateEvaluator, ContextGateEvaluator};
pub use path::{lookup, truthy};
pub use shell::ShellCommandRunner;
pub use traits::{ActionInputs, ActionRegistry, CommandOutput, CommandRunner, GateEvaluator};
