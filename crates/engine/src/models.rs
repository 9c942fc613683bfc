//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They serialise to and from the YAML documents kept in the
//! workflows directory, one workflow per file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of a job inside its workflow's `jobs` mapping.
pub type JobId = String;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// The `on:` section of a workflow: which events start it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// `on: push`
    Event(String),
    /// `on: [push, pull_request]`
    Events(Vec<String>),
    /// `on: { push: { branches: [main] } }`; the per-event options are kept
    /// but not interpreted.
    Filtered(BTreeMap<String, Value>),
}

impl Trigger {
    /// Whether an event named `event` starts this workflow.
    pub fn matches(&self, event: &str) -> bool {
        match self {
            Trigger::Event(name) => name == event,
            Trigger::Events(names) => names.iter().any(|n| n == event),
            Trigger::Filtered(map) => map.contains_key(event),
        }
    }

    /// Event names in declaration order (map keys are sorted).
    pub fn event_names(&self) -> Vec<&str> {
        match self {
            Trigger::Event(name) => vec![name.as_str()],
            Trigger::Events(names) => names.iter().map(String::as_str).collect(),
            Trigger::Filtered(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// A single step of a job: either a command (`run`) or an action (`uses`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Needed only when a later step or a job output reads this step's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, rename = "with", skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// What a step dispatches to, borrowed from its definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepAction<'a> {
    Command(&'a str),
    Action {
        name: &'a str,
        inputs: &'a BTreeMap<String, Value>,
    },
}

impl StepDefinition {
    /// A `run:` step.
    pub fn command(run: impl Into<String>) -> Self {
        Self {
            run: Some(run.into()),
            ..Self::default()
        }
    }

    /// A `uses:` step.
    pub fn action(uses: impl Into<String>) -> Self {
        Self {
            uses: Some(uses.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// `None` unless exactly one of `run` / `uses` is set.
    pub fn dispatch(&self) -> Option<StepAction<'_>> {
        match (&self.run, &self.uses) {
            (Some(run), None) => Some(StepAction::Command(run)),
            (None, Some(uses)) => Some(StepAction::Action {
                name: uses,
                inputs: &self.inputs,
            }),
            _ => None,
        }
    }

    /// Name shown in logs and summaries.
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.id.clone())
            .or_else(|| self.run.clone())
            .or_else(|| self.uses.clone())
            .unwrap_or_else(|| format!("step {}", index + 1))
    }
}

// ---------------------------------------------------------------------------
// JobDefinition
// ---------------------------------------------------------------------------

/// A unit of work with prerequisites and an ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<JobId>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Output name → expression, resolved after the last step succeeds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn needs<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = jobs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), expression.into());
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(rename = "on")]
    pub trigger: Trigger,
    #[serde(default)]
    pub jobs: BTreeMap<JobId, JobDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            trigger,
            jobs: BTreeMap::new(),
        }
    }

    pub fn job(mut self, id: impl Into<JobId>, job: JobDefinition) -> Self {
        self.jobs.insert(id.into(), job);
        self
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A named occurrence that may start workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_forms_deserialize() {
        let single: Trigger = serde_yaml_ng::from_str("push").unwrap();
        assert_eq!(single, Trigger::Event("push".into()));

        let list: Trigger = serde_yaml_ng::from_str("[push, pull_request]").unwrap();
        assert_eq!(list.event_names(), vec!["push", "pull_request"]);

        let map: Trigger = serde_yaml_ng::from_str("push:\n  branches: [main]\nrelease:\n").unwrap();
        assert!(map.matches("push"));
        assert!(map.matches("release"));
        assert!(!map.matches("pull_request"));
    }

    #[test]
    fn step_dispatch_requires_exactly_one_target() {
        assert!(matches!(
            StepDefinition::command("make").dispatch(),
            Some(StepAction::Command("make"))
        ));
        assert!(matches!(
            StepDefinition::action("actions/checkout@v3").dispatch(),
            Some(StepAction::Action { name: "actions/checkout@v3", .. })
        ));

        let both = StepDefinition {
            uses: Some("x".into()),
            ..StepDefinition::command("y")
        };
        assert!(both.dispatch().is_none());
        assert!(StepDefinition::default().dispatch().is_none());
    }

    #[test]
    fn step_document_keys() {
        let yaml = r#"
name: Setup
id: node
uses: actions/setup-node@v3
with:
  node-version: "18"
env:
  CI: "true"
if: event.ref == 'main'
timeout-secs: 30
"#;
        let step: StepDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.id.as_deref(), Some("node"));
        assert_eq!(step.inputs["node-version"], json!("18"));
        assert_eq!(step.env["CI"], "true");
        assert_eq!(step.condition.as_deref(), Some("event.ref == 'main'"));
        assert_eq!(step.timeout_secs, Some(30));
    }

    #[test]
    fn display_name_falls_back() {
        assert_eq!(StepDefinition::command("npm ci").display_name(0), "npm ci");
        assert_eq!(
            StepDefinition::command("npm ci").with_name("Install").display_name(0),
            "Install"
        );
        assert_eq!(StepDefinition::default().display_name(2), "step 3");
    }
}
