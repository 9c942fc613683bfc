//! The engine facade: definition management plus event-triggered runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use runners::{
    ActionRegistry, ActionTable, CommandRunner, ContextGateEvaluator, GateEvaluator,
    ShellCommandRunner,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::executor::StepExecutor;
use crate::models::{Event, WorkflowDefinition};
use crate::notify::{Notifier, Observer};
use crate::router::route;
use crate::run::RunSummary;
use crate::scheduler::Scheduler;
use crate::store::{DefinitionStore, Registered, WorkflowInfo};
use crate::suggest::{TemplateSuggester, WorkflowSuggester};
use crate::EngineError;

/// Event name used for runs started with [`WorkflowEngine::dispatch`].
pub const WORKFLOW_DISPATCH: &str = "workflow_dispatch";

/// Assembles a [`WorkflowEngine`]. Unset collaborators get the built-ins:
/// [`ShellCommandRunner`], an empty [`ActionTable`], [`ContextGateEvaluator`]
/// and [`TemplateSuggester`].
pub struct EngineBuilder {
    config: EngineConfig,
    commands: Option<Arc<dyn CommandRunner>>,
    actions: Option<Arc<dyn ActionRegistry>>,
    gates: Option<Arc<dyn GateEvaluator>>,
    suggester: Option<Arc<dyn WorkflowSuggester>>,
    notifier: Notifier,
}

impl EngineBuilder {
    pub fn command_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.commands = Some(runner);
        self
    }

    pub fn action_registry(mut self, registry: Arc<dyn ActionRegistry>) -> Self {
        self.actions = Some(registry);
        self
    }

    pub fn gate_evaluator(mut self, evaluator: Arc<dyn GateEvaluator>) -> Self {
        self.gates = Some(evaluator);
        self
    }

    pub fn suggester(mut self, suggester: Arc<dyn WorkflowSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    /// Add an observer; every observer sees every lifecycle event.
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.notifier.subscribe(observer);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let commands = self
            .commands
            .unwrap_or_else(|| Arc::new(ShellCommandRunner::new()));
        let actions = self
            .actions
            .unwrap_or_else(|| Arc::new(ActionTable::new()));
        let gates = self
            .gates
            .unwrap_or_else(|| Arc::new(ContextGateEvaluator::new()));
        let suggester = self
            .suggester
            .unwrap_or_else(|| Arc::new(TemplateSuggester::new()));

        let executor = StepExecutor::new(
            commands,
            actions,
            gates,
            self.notifier.clone(),
            self.config.executor_config(),
        );
        let scheduler = Scheduler::new(
            Arc::new(executor),
            self.notifier,
            self.config.scheduler_options(),
        );

        WorkflowEngine {
            store: DefinitionStore::new(self.config.workflows_dir.clone()),
            config: self.config,
            scheduler,
            suggester,
        }
    }
}

/// Owns one definition store, its collaborators and its observers.
pub struct WorkflowEngine {
    config: EngineConfig,
    store: DefinitionStore,
    scheduler: Scheduler,
    suggester: Arc<dyn WorkflowSuggester>,
}

impl WorkflowEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            commands: None,
            actions: None,
            gates: None,
            suggester: None,
            notifier: Notifier::new(),
        }
    }

    /// An engine with the built-in collaborators.
    pub fn new(config: EngineConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &DefinitionStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// (Re)load every definition from the workflows directory.
    pub async fn load(&self) -> Result<usize, EngineError> {
        self.store.load().await
    }

    pub async fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.store.get(name).await
    }

    pub async fn list(&self) -> Vec<WorkflowInfo> {
        self.store.list().await
    }

    /// Register `def` under `name`, replacing any previous definition.
    pub async fn create(&self, name: &str, def: WorkflowDefinition) -> Result<(), EngineError> {
        let path = self.store.create(name, def).await?;
        info!(workflow = %name, path = %path.display(), "workflow saved");
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<bool, EngineError> {
        self.store.delete(name).await
    }

    pub async fn suggest(&self, framework: &str, language: &str) -> Result<WorkflowDefinition, EngineError> {
        self.suggester.suggest(framework, language).await
    }

    /// Suggest a workflow and register it, optionally under another name.
    pub async fn seed(
        &self,
        framework: &str,
        language: &str,
        name: Option<&str>,
    ) -> Result<WorkflowDefinition, EngineError> {
        let mut def = self.suggest(framework, language).await?;
        if let Some(name) = name {
            def.name = name.to_string();
        }
        let name = def.name.clone();
        self.create(&name, def.clone()).await?;
        Ok(def)
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Run every workflow whose trigger matches `event`, one after another.
    pub async fn trigger(&self, event: &Event) -> Vec<RunSummary> {
        self.trigger_with_cancel(event, &CancellationToken::new()).await
    }

    #[instrument(skip_all, fields(event = %event.name))]
    pub async fn trigger_with_cancel(&self, event: &Event, cancel: &CancellationToken) -> Vec<RunSummary> {
        let matched = route(&event.name, self.store.snapshot().await);
        if matched.is_empty() {
            warn!("no workflow is triggered by this event");
            return Vec::new();
        }

        info!(workflows = matched.len(), "event matched workflows");
        let mut runs = Vec::with_capacity(matched.len());
        for entry in matched {
            runs.push(self.execute(entry, event, cancel).await);
        }
        runs
    }

    /// Run the workflow called `name` regardless of its trigger. `None` when
    /// no such workflow is registered.
    pub async fn dispatch(&self, name: &str, payload: Map<String, Value>) -> Option<RunSummary> {
        self.dispatch_with_cancel(name, payload, &CancellationToken::new())
            .await
    }

    pub async fn dispatch_with_cancel(
        &self,
        name: &str,
        payload: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Option<RunSummary> {
        let Some(entry) = self.store.entry(name).await else {
            warn!(workflow = %name, "no such workflow");
            return None;
        };
        let event = Event::new(WORKFLOW_DISPATCH).with_payload(payload);
        Some(self.execute(entry, &event, cancel).await)
    }

    async fn execute(&self, entry: Registered, event: &Event, cancel: &CancellationToken) -> RunSummary {
        let context = if self.config.inherit_env {
            RunContext::from_process_env(event)
        } else {
            RunContext::new(event, BTreeMap::new())
        };
        self.scheduler
            .run(entry.definition, entry.graph, event, context, cancel)
            .await
    }
}
