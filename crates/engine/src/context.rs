//! Per-run execution context and `${{ ... }}` interpolation.
//!
//! A [`RunContext`] is created for every triggered run and dropped when the
//! run ends. It is a JSON document shaped as
//!
//! ```text
//! { event_name, event: <payload>, env: {..},
//!   jobs: { <job>: { result, outputs: {..}, steps: { <step>: { output } } } } }
//! ```
//!
//! Only the scheduler writes to it. A running job works on a [`JobScope`]: an
//! owned snapshot taken at dispatch, with the job's own step results exposed
//! under `steps` and its metadata under `job`.

use std::collections::BTreeMap;

use runners::lookup;
use serde_json::{json, Map, Value};

use crate::models::{Event, JobDefinition};
use crate::run::JobRunState;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Mutable state of one run: event payload, environment, and every output
/// recorded so far. Grows monotonically.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    root: Value,
}

impl RunContext {
    pub fn new(event: &Event, env: BTreeMap<String, String>) -> Self {
        Self {
            root: json!({
                "event_name": event.name,
                "event": event.payload,
                "env": env,
                "jobs": {},
            }),
        }
    }

    /// Context whose `env` is a copy of the current process environment.
    pub fn from_process_env(event: &Event) -> Self {
        Self::new(event, std::env::vars().collect())
    }

    /// Deep-merge `partial` into the context. Objects merge key by key; any
    /// other value replaces what was there.
    pub fn merge(&mut self, partial: Value) {
        merge_values(&mut self.root, partial);
    }

    /// Read a dotted path such as `jobs.build.outputs.version`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// Store a step result as `jobs.<job>.steps.<step>.output`, replacing any
    /// earlier value under that id.
    pub fn record_step(&mut self, job: &str, step: &str, output: Value) {
        set_path(&mut self.root, &["jobs", job, "steps", step, "output"], output);
    }

    /// Store a finished job's terminal state and outputs.
    pub fn record_job(&mut self, job: &str, state: JobRunState, outputs: Map<String, Value>) {
        set_path(&mut self.root, &["jobs", job, "result"], json!(state));
        set_path(&mut self.root, &["jobs", job, "outputs"], Value::Object(outputs));
    }

    /// Snapshot of the context as seen from inside `job_id`.
    pub fn scope(&self, job_id: &str, job: &JobDefinition) -> JobScope {
        let mut view = self.root.clone();
        let steps = self
            .get(&format!("jobs.{job_id}.steps"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut view {
            map.insert("steps".into(), steps);
            map.insert(
                "job".into(),
                json!({
                    "id": job_id,
                    "name": job.name,
                    "environment": job.environment,
                }),
            );
        }
        JobScope {
            job: job_id.to_string(),
            view,
        }
    }
}

// ---------------------------------------------------------------------------
// JobScope
// ---------------------------------------------------------------------------

/// Read view handed to gates and interpolation while a job runs; the step
/// executor records each step result into it before the next step starts.
#[derive(Debug, Clone, PartialEq)]
pub struct JobScope {
    job: String,
    view: Value,
}

impl JobScope {
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn view(&self) -> &Value {
        &self.view
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.view, path)
    }

    pub fn record_step(&mut self, step: &str, output: Value) {
        set_path(&mut self.view, &["steps", step, "output"], output);
    }

    /// See [`interpolate`].
    pub fn interpolate(&self, template: &str) -> Value {
        interpolate(template, &self.view)
    }

    /// See [`render`].
    pub fn render(&self, template: &str) -> String {
        render(template, &self.view)
    }

    /// Interpolate every string inside `inputs`, recursing into arrays and
    /// objects.
    pub fn resolve_inputs(&self, inputs: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        inputs
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v)))
            .collect()
    }

    fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.interpolate(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpolation
// ---------------------------------------------------------------------------

/// Resolve `template` against `view`.
///
/// A template that is exactly one placeholder (`${{ steps.meta.output }}`)
/// yields the referenced JSON value itself, `null` when missing. Anything else
/// yields a string, see [`render`].
pub fn interpolate(template: &str, view: &Value) -> Value {
    match sole_placeholder(template.trim()) {
        Some(path) => lookup(view, path).cloned().unwrap_or(Value::Null),
        None => Value::String(render(template, view)),
    }
}

/// Replace every `${{ path }}` in `template`. Strings are inserted verbatim,
/// other values as JSON; missing paths render as nothing. An unterminated
/// placeholder is left untouched.
pub fn render(template: &str, view: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find(CLOSE) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let path = after[..end].trim();
        if !path.is_empty() {
            if let Some(value) = lookup(view, path) {
                out.push_str(&value_to_string(value));
            }
        }
        rest = &after[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

fn sole_placeholder(template: &str) -> Option<&str> {
    let inner = template.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    Some(inner.trim()).filter(|p| !p.is_empty())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn merge_values(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *root = value;
        return;
    };

    if !root.is_object() {
        *root = Value::Object(Map::new());
    }
    if let Value::Object(map) = root {
        let slot = map.entry(first.to_string()).or_insert(Value::Null);
        set_path(slot, rest, value);
    }
}
