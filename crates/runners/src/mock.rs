//! Test doubles for [`CommandRunner`] and [`ActionRegistry`].
//!
//! Useful in unit and integration tests where real processes or actions are
//! either unavailable or irrelevant. Both mocks record every call they
//! receive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ActionInputs, ActionRegistry, CommandOutput, CommandRunner, RunnerError};

/// A command the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub command: String,
    pub env: BTreeMap<String, String>,
}

type Scripted<T> = Result<T, RunnerError>;

/// Per-key response queues: each call pops the front entry until a single
/// entry is left, which then answers every later call.
struct Script<T: Clone> {
    queues: Mutex<HashMap<String, VecDeque<Scripted<T>>>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn push(&self, key: String, responses: Vec<Scripted<T>>) {
        self.queues.lock().unwrap().insert(key, responses.into());
    }

    fn next(&self, key: &str) -> Option<Scripted<T>> {
        let mut queues = self.queues.lock().unwrap();
        let queue = queues.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// A mock command runner returning programmer-specified results.
///
/// Unscripted commands succeed with empty stdout.
pub struct MockCommandRunner {
    script: Script<CommandOutput>,
    delays: HashMap<String, Duration>,
    /// All commands seen by this runner (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl Default for MockCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self {
            script: Script::new(),
            delays: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always answer `command` with `output`.
    pub fn respond(self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.script.push(command.into(), vec![Ok(output)]);
        self
    }

    /// Always fail `command` with `error`.
    pub fn fail(self, command: impl Into<String>, error: RunnerError) -> Self {
        self.script.push(command.into(), vec![Err(error)]);
        self
    }

    /// Answer successive calls of `command` from `responses`; the last entry
    /// repeats.
    pub fn respond_sequence(
        self,
        command: impl Into<String>,
        responses: Vec<Result<CommandOutput, RunnerError>>,
    ) -> Self {
        self.script.push(command.into(), responses);
        self
    }

    /// Sleep for `delay` before answering `command`.
    pub fn delay(mut self, command: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(command.into(), delay);
        self
    }

    /// Number of commands executed so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of times `command` was executed.
    pub fn count_of(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// Executed commands in call order.
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().unwrap().push(MockCall {
            command: command.to_string(),
            env: env.clone(),
        });

        if let Some(delay) = self.delays.get(command) {
            tokio::time::sleep(*delay).await;
        }

        self.script
            .next(command)
            .unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }
}

/// A mock action registry.
///
/// Unscripted actions succeed with `{"action": <name>}`.
pub struct MockActions {
    script: Script<Value>,
    /// All invocations seen (in call order).
    pub calls: Arc<Mutex<Vec<(String, ActionInputs)>>>,
}

impl Default for MockActions {
    fn default() -> Self {
        Self::new()
    }
}

impl MockActions {
    pub fn new() -> Self {
        Self {
            script: Script::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn returning(self, name: impl Into<String>, value: Value) -> Self {
        self.script.push(name.into(), vec![Ok(value)]);
        self
    }

    pub fn failing(self, name: impl Into<String>, error: RunnerError) -> Self {
        self.script.push(name.into(), vec![Err(error)]);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs passed on the most recent invocation of `name`.
    pub fn last_inputs(&self, name: &str) -> Option<ActionInputs> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, inputs)| inputs.clone())
    }
}

#[async_trait]
impl ActionRegistry for MockActions {
    async fn invoke(&self, name: &str, inputs: &ActionInputs) -> Result<Value, RunnerError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), inputs.clone()));

        self.script
            .next(name)
            .unwrap_or_else(|| Ok(json!({ "action": name })))
    }
}
