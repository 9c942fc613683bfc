//! `pipewright` CLI entry-point.
//!
//! Available sub-commands:
//! - `list`: list registered workflows.
//! - `validate`: validate a workflow YAML file.
//! - `trigger`: emit an event and run every workflow it triggers.
//! - `run`: run one workflow by name, whatever its trigger.
//! - `create`: generate a workflow from a framework template.
//! - `delete`: remove a workflow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use engine::{
    parse_workflow_yaml, validate_workflow, EngineConfig, Event, LogObserver, RunSummary,
    WorkflowEngine,
};
use runners::{
    ActionTable, CommandGateEvaluator, ContextGateEvaluator, EchoAction, GateEvaluator,
    ShellCommandRunner,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Looked up in the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "pipewright.toml";

#[derive(Parser)]
#[command(
    name = "pipewright",
    about = "Event-triggered workflow orchestration engine",
    version
)]
struct Cli {
    /// Workflows directory (overrides the config file).
    #[arg(long, global = true, env = "PIPEWRIGHT_DIR")]
    dir: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true, env = "PIPEWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "PIPEWRIGHT_MAX_CONCURRENT_JOBS")]
    max_concurrent_jobs: Option<usize>,

    /// Evaluate `if:` gates as shell commands (exit 0 is true).
    #[arg(long, global = true)]
    shell_gates: bool,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered workflows.
    List,
    /// Validate a workflow definition YAML file.
    Validate {
        /// Path to the workflow YAML file.
        path: PathBuf,
    },
    /// Emit an event and run every workflow it triggers.
    Trigger {
        event: String,
        /// Event payload as a JSON object.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Run a workflow by name regardless of its trigger.
    Run {
        workflow: String,
        #[arg(long)]
        payload: Option<String>,
    },
    /// Create a workflow from a framework template.
    Create {
        name: String,
        #[arg(long, default_value = "generic")]
        framework: String,
        #[arg(long, default_value = "javascript")]
        language: String,
    },
    /// Delete a workflow and its file.
    Delete { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Validate { path } => validate(path)?,
        Command::List => {
            let engine = open(&cli).await?;
            let workflows = engine.list().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&workflows)?);
            } else if workflows.is_empty() {
                println!("No workflows registered.");
            } else {
                for wf in workflows {
                    println!("{}  on: {}  jobs: {}", wf.name, wf.events.join(", "), wf.jobs);
                }
            }
        }
        Command::Trigger { event, payload } => {
            let engine = open(&cli).await?;
            let event = Event::new(event.as_str()).with_payload(parse_payload(payload.as_deref())?);
            let cancel = cancel_on_ctrl_c();
            let runs = engine.trigger_with_cancel(&event, &cancel).await;
            if runs.is_empty() && !cli.json {
                println!("No workflow is triggered by '{}'.", event.name);
            }
            report(&runs, cli.json)?;
        }
        Command::Run { workflow, payload } => {
            let engine = open(&cli).await?;
            let payload = parse_payload(payload.as_deref())?;
            let cancel = cancel_on_ctrl_c();
            let Some(run) = engine.dispatch_with_cancel(workflow, payload, &cancel).await else {
                bail!("no workflow named '{workflow}'");
            };
            report(std::slice::from_ref(&run), cli.json)?;
        }
        Command::Create {
            name,
            framework,
            language,
        } => {
            let engine = open(&cli).await?;
            let def = engine
                .seed(framework, language, Some(name.as_str()))
                .await
                .with_context(|| format!("failed to create workflow '{name}'"))?;
            println!("✅ Created workflow '{}' ({} job(s)).", def.name, def.jobs.len());
        }
        Command::Delete { name } => {
            let engine = open(&cli).await?;
            if engine.delete(name).await? {
                println!("Deleted workflow '{name}'.");
            } else {
                eprintln!("❌ No workflow named '{name}'.");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Build the engine from config and flags, then load the workflows directory.
async fn open(cli: &Cli) -> Result<WorkflowEngine> {
    let engine = build_engine(cli)?;
    let loaded = engine.load().await.context("failed to load workflows")?;
    info!("Loaded {loaded} workflow(s) from {}", engine.config().workflows_dir.display());
    Ok(engine)
}

fn build_engine(cli: &Cli) -> Result<WorkflowEngine> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            EngineConfig::from_toml_file(DEFAULT_CONFIG_FILE)?
        }
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.dir {
        config.workflows_dir = dir.clone();
    }
    if let Some(max) = cli.max_concurrent_jobs {
        config.max_concurrent_jobs = Some(max);
    }

    let commands = Arc::new(ShellCommandRunner::new());
    let gates: Arc<dyn GateEvaluator> = if cli.shell_gates {
        Arc::new(CommandGateEvaluator::new(commands.clone()))
    } else {
        Arc::new(ContextGateEvaluator::new())
    };
    let actions = ActionTable::new().with_fallback(Arc::new(EchoAction));

    Ok(WorkflowEngine::builder(config)
        .command_runner(commands)
        .action_registry(Arc::new(actions))
        .gate_evaluator(gates)
        .observer(Arc::new(LogObserver))
        .build())
}

fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let workflow = parse_workflow_yaml(&content, path)?;

    match validate_workflow(&workflow) {
        Ok(graph) => {
            println!(
                "✅ Workflow '{}' is valid. Job order: {:?}",
                workflow.name,
                graph.order()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Validation failed: {e}");
            std::process::exit(1);
        }
    }
}

fn parse_payload(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => serde_json::from_str(raw).context("--payload must be a JSON object"),
    }
}

/// Token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting running steps finish");
            token.cancel();
        }
    });
    cancel
}

/// Print run summaries; exits with status 1 when any run failed.
fn report(runs: &[RunSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(runs)?);
    } else {
        for run in runs {
            let mark = if run.succeeded() { "✅" } else { "❌" };
            let suffix = if run.cancelled { " (cancelled)" } else { "" };
            println!("{mark} {} [{}] {:?}{suffix}", run.workflow, run.run_id, run.status);
            for (job, summary) in &run.jobs {
                println!("    {job}: {:?}", summary.state);
                if let Some(error) = summary.error.as_deref().or(summary.reason.as_deref()) {
                    println!("        {error}");
                }
            }
        }
    }

    if runs.iter().any(|r| !r.succeeded()) {
        std::process::exit(1);
    }
    Ok(())
}
