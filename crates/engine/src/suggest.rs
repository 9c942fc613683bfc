//! Workflow suggestion: produce a starting definition for a project.
//!
//! [`TemplateSuggester`] knows a fixed set of JavaScript framework pipelines.
//! [`FallbackSuggester`] puts any other suggester in front of it and falls
//! back to the templates when that suggester fails.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::models::{JobDefinition, StepDefinition, Trigger, WorkflowDefinition};
use crate::EngineError;

/// Shell gate: does `file` exist and mention `needle`?
fn file_mentions(file: &str, needle: &str) -> String {
    format!("test -f \"{file}\" && grep -q \"{needle}\" \"{file}\"")
}

fn script_gate(script: &str) -> String {
    file_mentions("package.json", script)
}

#[async_trait]
pub trait WorkflowSuggester: Send + Sync {
    async fn suggest(&self, framework: &str, language: &str) -> Result<WorkflowDefinition, EngineError>;
}

// ---------------------------------------------------------------------------
// TemplateSuggester
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    Generic,
    React,
    NextJs,
    Vue,
    Angular,
    Node,
    NestJs,
}

impl Template {
    fn for_framework(framework: &str) -> Self {
        match framework.trim().to_ascii_lowercase().as_str() {
            "react" => Self::React,
            "nextjs" | "next" => Self::NextJs,
            "vue" => Self::Vue,
            "angular" => Self::Angular,
            "node" | "express" => Self::Node,
            "nestjs" => Self::NestJs,
            _ => Self::Generic,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Generic => "Generic Build Workflow",
            Self::React => "React Build Workflow",
            Self::NextJs => "Next.js Build Workflow",
            Self::Vue => "Vue Build Workflow",
            Self::Angular => "Angular Build Workflow",
            Self::Node => "Node.js Build Workflow",
            Self::NestJs => "NestJS Build Workflow",
        }
    }

    /// Steps after checkout, toolchain setup and install.
    fn project_steps(self) -> Vec<StepDefinition> {
        let step = |name: &str, run: &str| StepDefinition::command(run).with_name(name);
        let gated = |name: &str, run: &str, gate: String| step(name, run).with_condition(gate);

        match self {
            Self::Generic | Self::Node => vec![
                gated("Lint", "npm run lint", script_gate("lint")),
                gated("Build", "npm run build", script_gate("build")),
                gated("Test", "npm test", script_gate("test")),
            ],
            Self::React => vec![
                gated("Lint", "npm run lint", script_gate("lint")),
                gated("Test", "npm test", script_gate("test")),
                step("Build", "npm run build"),
                gated(
                    "Analyze bundle",
                    "npx source-map-explorer \"build/static/js/*.js\"",
                    "test -d \"build/static/js\"".into(),
                ),
            ],
            Self::NextJs => vec![
                step("Lint", "npm run lint"),
                gated("Test", "npm test", script_gate("test")),
                step("Build", "npm run build"),
                gated(
                    "Analyze bundle",
                    "npx cross-env ANALYZE=true npm run build",
                    file_mentions("next.config.js", "withBundleAnalyzer"),
                ),
            ],
            Self::Vue => vec![
                gated("Lint", "npm run lint", script_gate("lint")),
                gated("Test", "npm run test:unit", script_gate("test:unit")),
                step("Build", "npm run build"),
            ],
            Self::Angular => vec![
                gated("Lint", "ng lint", file_mentions("angular.json", "lint")),
                step("Test", "ng test --watch=false --browsers=ChromeHeadless"),
                step("Build", "ng build --configuration production"),
            ],
            Self::NestJs => vec![
                step("Lint", "npm run lint"),
                step("Test", "npm run test"),
                gated("Test e2e", "npm run test:e2e", script_gate("test:e2e")),
                step("Build", "npm run build"),
            ],
        }
    }

    fn workflow(self, language: &str) -> WorkflowDefinition {
        let mut steps = vec![
            StepDefinition::action("actions/checkout@v3").with_name("Checkout code"),
            StepDefinition::action("actions/setup-node@v3")
                .with_name("Setup Node.js")
                .with_input("node-version", json!("18")),
            StepDefinition::command("npm ci").with_name("Install dependencies"),
        ];
        if is_typescript(language) {
            steps.push(
                StepDefinition::command("npx tsc --noEmit")
                    .with_name("Type check")
                    .with_condition("test -f \"tsconfig.json\""),
            );
        }
        steps.extend(self.project_steps());

        let job_name = match self {
            Self::Generic => "Build",
            _ => "Build and Test",
        };

        WorkflowDefinition::new(
            self.title(),
            Trigger::Events(vec!["push".into(), "workflow_dispatch".into()]),
        )
        .job("build", JobDefinition::new(steps).with_name(job_name))
    }
}

fn is_typescript(language: &str) -> bool {
    matches!(
        language.trim().to_ascii_lowercase().as_str(),
        "typescript" | "ts"
    )
}

/// Built-in templates keyed by framework; unknown frameworks get the generic
/// Node pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSuggester;

impl TemplateSuggester {
    pub fn new() -> Self {
        Self
    }

    pub fn template(&self, framework: &str, language: &str) -> WorkflowDefinition {
        Template::for_framework(framework).workflow(language)
    }
}

#[async_trait]
impl WorkflowSuggester for TemplateSuggester {
    async fn suggest(&self, framework: &str, language: &str) -> Result<WorkflowDefinition, EngineError> {
        Ok(self.template(framework, language))
    }
}

// ---------------------------------------------------------------------------
// FallbackSuggester
// ---------------------------------------------------------------------------

/// Ask `primary` first; on error, log it and use the templates.
pub struct FallbackSuggester {
    primary: Arc<dyn WorkflowSuggester>,
    templates: TemplateSuggester,
}

impl FallbackSuggester {
    pub fn new(primary: Arc<dyn WorkflowSuggester>) -> Self {
        Self {
            primary,
            templates: TemplateSuggester::new(),
        }
    }
}

#[async_trait]
impl WorkflowSuggester for FallbackSuggester {
    async fn suggest(&self, framework: &str, language: &str) -> Result<WorkflowDefinition, EngineError> {
        match self.primary.suggest(framework, language).await {
            Ok(def) => Ok(def),
            Err(e) => {
                warn!(error = %e, framework, "workflow suggestion failed, using template");
                Ok(self.templates.template(framework, language))
            }
        }
    }
}
