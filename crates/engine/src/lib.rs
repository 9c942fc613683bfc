//! `engine` crate: workflow models, validation, the definition store, and
//! the event-triggered execution engine.

pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod notify;
pub mod router;
pub mod run;
pub mod scheduler;
pub mod store;
pub mod suggest;

pub use config::EngineConfig;
pub use context::{interpolate, render, JobScope, RunContext};
pub use dag::{validate_workflow, JobGraph};
pub use engine::{EngineBuilder, WorkflowEngine, WORKFLOW_DISPATCH};
pub use error::{DefinitionError, EngineError, StepError};
pub use executor::{ExecutorConfig, JobOutcome, StepExecutor};
pub use models::{Event, JobDefinition, JobId, StepDefinition, Trigger, WorkflowDefinition};
pub use notify::{BroadcastObserver, LifecycleEvent, LogObserver, Notifier, Observer};
pub use router::route;
pub use run::{JobRunState, JobSummary, RunStatus, RunSummary, StepState, StepSummary};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use store::{parse_workflow_yaml, serialize_workflow_yaml, DefinitionStore, WorkflowInfo};
pub use suggest::{FallbackSuggester, TemplateSuggester, WorkflowSuggester};
