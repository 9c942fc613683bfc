//! Named actions and the table that resolves `uses:` references to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{ActionInputs, ActionRegistry, RunnerError};

/// A single named action implementation.
#[async_trait]
pub trait Action: Send + Sync {
    /// `name` is the reference as written in the step, version suffix included.
    async fn invoke(&self, name: &str, inputs: &ActionInputs) -> Result<Value, RunnerError>;
}

/// Maps action names to [`Action`] implementations.
///
/// Lookup tries the exact reference first (`actions/checkout@v3`), then the
/// reference without its `@version` suffix (`actions/checkout`), then the
/// fallback action if one is set.
#[derive(Clone, Default)]
pub struct ActionTable {
    actions: HashMap<String, Arc<dyn Action>>,
    fallback: Option<Arc<dyn Action>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Action used for any name without a registration.
    pub fn with_fallback(mut self, action: Arc<dyn Action>) -> Self {
        self.fallback = Some(action);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions
            .get(name)
            .or_else(|| {
                name.split_once('@')
                    .and_then(|(base, _)| self.actions.get(base))
            })
            .or(self.fallback.as_ref())
    }
}

#[async_trait]
impl ActionRegistry for ActionTable {
    async fn invoke(&self, name: &str, inputs: &ActionInputs) -> Result<Value, RunnerError> {
        let action = self
            .resolve(name)
            .ok_or_else(|| RunnerError::UnknownAction(name.to_string()))?;
        debug!(action = name, "invoking action");
        action.invoke(name, inputs).await
    }
}

/// Succeeds without doing anything, echoing its name and inputs back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    async fn invoke(&self, name: &str, inputs: &ActionInputs) -> Result<Value, RunnerError> {
        Ok(json!({
            "success": true,
            "action": name,
            "inputs": inputs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Action for Upper {
        async fn invoke(&self, _name: &str, inputs: &ActionInputs) -> Result<Value, RunnerError> {
            let text = inputs
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| RunnerError::Fatal("missing input 'text'".into()))?;
            Ok(Value::String(text.to_uppercase()))
        }
    }

    fn inputs(text: &str) -> ActionInputs {
        ActionInputs::from([("text".to_string(), json!(text))])
    }

    #[tokio::test]
    async fn resolves_exact_then_unversioned_name() {
        let table = ActionTable::new().register("text/upper", Arc::new(Upper));

        let out = table.invoke("text/upper", &inputs("abc")).await.unwrap();
        assert_eq!(out, json!("ABC"));

        let out = table.invoke("text/upper@v2", &inputs("x")).await.unwrap();
        assert_eq!(out, json!("X"));
    }

    #[tokio::test]
    async fn unknown_action_without_fallback_errors() {
        let err = ActionTable::new()
            .invoke("actions/checkout@v3", &ActionInputs::new())
            .await
            .unwrap_err();
        assert_eq!(err, RunnerError::UnknownAction("actions/checkout@v3".into()));
    }

    #[tokio::test]
    async fn fallback_echoes_inputs() {
        let table = ActionTable::new().with_fallback(Arc::new(EchoAction));
        let with = ActionInputs::from([("node-version".to_string(), json!("18"))]);

        let out = table.invoke("actions/setup-node@v3", &with).await.unwrap();
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["action"], json!("actions/setup-node@v3"));
        assert_eq!(out["inputs"]["node-version"], json!("18"));
    }

    #[tokio::test]
    async fn action_errors_propagate() {
        let table = ActionTable::new().register("text/upper", Arc::new(Upper));
        let err = table.invoke("text/upper", &ActionInputs::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Fatal(_)));
    }
}
