//! Definition store: named workflows backed by a directory of YAML documents.
//!
//! One document per workflow, named `<slug(name)>.yml`. The in-memory registry
//! holds each definition together with its validated [`JobGraph`], so runs
//! never re-validate.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::dag::{validate_workflow, JobGraph};
use crate::models::WorkflowDefinition;
use crate::{DefinitionError, EngineError};

// ---------------------------------------------------------------------------
// YAML helpers
// ---------------------------------------------------------------------------

/// Parse one workflow document. `path` is only used in the error.
pub fn parse_workflow_yaml(yaml: &str, path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, EngineError> {
    serde_yaml_ng::to_string(def).map_err(|e| EngineError::Serialize {
        name: def.name.clone(),
        message: e.to_string(),
    })
}

/// File stem for a workflow name: lowercase ASCII alphanumerics separated by
/// single hyphens.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("workflow");
    }
    out
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

/// A validated definition and where it lives on disk.
#[derive(Debug, Clone)]
pub struct Registered {
    pub definition: Arc<WorkflowDefinition>,
    pub graph: Arc<JobGraph>,
    pub path: PathBuf,
}

impl AsRef<WorkflowDefinition> for Registered {
    fn as_ref(&self) -> &WorkflowDefinition {
        &self.definition
    }
}

/// One line of [`DefinitionStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub events: Vec<String>,
    pub jobs: usize,
}

// ---------------------------------------------------------------------------
// DefinitionStore
// ---------------------------------------------------------------------------

pub struct DefinitionStore {
    dir: PathBuf,
    registry: RwLock<BTreeMap<String, Registered>>,
    /// Serializes `load`, `create` and `delete`; readers only take `registry`.
    writes: Mutex<()>,
}

impl DefinitionStore {
    /// An empty store over `dir`. Nothing is read until [`load`](Self::load).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            registry: RwLock::new(BTreeMap::new()),
            writes: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Re-read the directory and replace the registry with what it holds.
    ///
    /// Invalid documents are logged and skipped. When two documents declare
    /// the same name, the one whose path sorts last wins.
    pub async fn load(&self) -> Result<usize, EngineError> {
        let _writes = self.writes.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?;

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && is_yaml(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = BTreeMap::new();
        for path in paths {
            match read_definition(&path).await {
                Ok(entry) => {
                    let name = entry.definition.name.clone();
                    if let Some(previous) = loaded.insert(name.clone(), entry) {
                        warn!(
                            workflow = %name,
                            replaced = %previous.path.display(),
                            by = %path.display(),
                            "duplicate workflow name, keeping the later file"
                        );
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping workflow file"),
            }
        }

        let count = loaded.len();
        *self.registry.write().await = loaded;
        info!(count, dir = %self.dir.display(), "workflow definitions loaded");
        Ok(count)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.registry
            .read()
            .await
            .get(name)
            .map(|e| Arc::clone(&e.definition))
    }

    /// The registry entry for `name`, graph included.
    pub async fn entry(&self, name: &str) -> Option<Registered> {
        self.registry.read().await.get(name).cloned()
    }

    /// Every registered workflow, sorted by name.
    pub async fn snapshot(&self) -> Vec<Registered> {
        self.registry.read().await.values().cloned().collect()
    }

    pub async fn list(&self) -> Vec<WorkflowInfo> {
        self.registry
            .read()
            .await
            .values()
            .map(|e| WorkflowInfo {
                name: e.definition.name.clone(),
                events: e
                    .definition
                    .trigger
                    .event_names()
                    .into_iter()
                    .map(str::to_owned)
                    .collect(),
                jobs: e.definition.jobs.len(),
            })
            .collect()
    }

    /// Validate, persist and register `def` under `name`, replacing any
    /// definition of that name. Returns the file written.
    ///
    /// When the definition moves to a new file and the old one cannot be
    /// removed, the new definition is still registered and the removal
    /// failure is returned.
    pub async fn create(&self, name: &str, def: WorkflowDefinition) -> Result<PathBuf, EngineError> {
        if def.name != name {
            return Err(DefinitionError::NameMismatch {
                expected: name.to_string(),
                found: def.name,
            }
            .into());
        }

        let graph = validate_workflow(&def)?;
        let yaml = serialize_workflow_yaml(&def)?;

        let _writes = self.writes.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::io(&self.dir, e))?;

        let mut registry = self.registry.write().await;
        let path = self.file_for(&registry, name);

        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| EngineError::io(&path, e))?;

        debug!(workflow = %name, path = %path.display(), "workflow definition written");
        let previous = registry.insert(
            name.to_string(),
            Registered {
                definition: Arc::new(def),
                graph: Arc::new(graph),
                path: path.clone(),
            },
        );

        if let Some(previous) = previous.filter(|p| p.path != path) {
            remove_if_present(&previous.path).await?;
        }
        Ok(path)
    }

    /// Remove `name` and its file. `Ok(false)` when no such workflow exists.
    pub async fn delete(&self, name: &str) -> Result<bool, EngineError> {
        let _writes = self.writes.lock().await;
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get(name) else {
            return Ok(false);
        };

        remove_if_present(&entry.path).await?;
        registry.remove(name);
        info!(workflow = %name, "workflow deleted");
        Ok(true)
    }

    /// `<slug>.yml`, or `<slug>-<n>.yml` when a different workflow already
    /// owns that file.
    fn file_for(&self, registry: &BTreeMap<String, Registered>, name: &str) -> PathBuf {
        let stem = slug(name);
        let taken = |path: &Path| {
            registry
                .iter()
                .any(|(other, e)| other != name && e.path == path)
        };

        let mut path = self.dir.join(format!("{stem}.yml"));
        let mut n = 2;
        while taken(&path) {
            path = self.dir.join(format!("{stem}-{n}.yml"));
            n += 1;
        }
        path
    }
}

async fn read_definition(path: &Path) -> Result<Registered, EngineError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::io(path, e))?;
    let definition = parse_workflow_yaml(&raw, path)?;
    let graph = validate_workflow(&definition)?;
    Ok(Registered {
        definition: Arc::new(definition),
        graph: Arc::new(graph),
        path: path.to_path_buf(),
    })
}

async fn remove_if_present(path: &Path) -> Result<(), EngineError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "workflow file already gone");
            Ok(())
        }
        Err(e) => Err(EngineError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDefinition, StepDefinition, Trigger};
    use serde_json::json;

    fn sample(name: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(name, Trigger::Events(vec!["push".into(), "pull_request".into()]))
            .job(
                "build",
                JobDefinition::new(vec![
                    StepDefinition::action("actions/setup-node@v3").with_input("node-version", json!("18")),
                    StepDefinition::command("npm ci").with_id("install"),
                ])
                .with_output("log", "${{ steps.install.output }}"),
            )
            .job(
                "test",
                JobDefinition::new(vec![StepDefinition::command("npm test")
                    .with_condition("event.ref == 'main'")])
                .needs(["build"]),
            )
    }

    #[test]
    fn slug_normalises_names() {
        assert_eq!(slug("CI Pipeline"), "ci-pipeline");
        assert_eq!(slug("  deploy / prod!! "), "deploy-prod");
        assert_eq!(slug("react_app"), "react-app");
        assert_eq!(slug("???"), "workflow");
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        let path = store.create("CI Pipeline", sample("CI Pipeline")).await.unwrap();
        assert_eq!(path, dir.path().join("ci-pipeline.yml"));

        let fresh = DefinitionStore::new(dir.path());
        assert_eq!(fresh.load().await.unwrap(), 1);
        assert_eq!(*fresh.get("CI Pipeline").await.unwrap(), sample("CI Pipeline"));
    }

    #[tokio::test]
    async fn load_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path().join("nested/.workflows"));
        assert_eq!(store.load().await.unwrap(), 0);
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn load_skips_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.yml"), "name: [unclosed").unwrap();
        std::fs::write(
            dir.path().join("cycle.yaml"),
            "name: cyc\non: push\njobs:\n  a:\n    needs: [b]\n    steps: [{run: x}]\n  b:\n    needs: [a]\n    steps: [{run: y}]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a workflow").unwrap();
        std::fs::write(
            dir.path().join("ok.yml"),
            "name: ok\non: push\njobs:\n  only:\n    steps:\n      - run: echo hi\n",
        )
        .unwrap();

        let store = DefinitionStore::new(dir.path());
        assert_eq!(store.load().await.unwrap(), 1);
        assert!(store.get("ok").await.is_some());
        assert!(store.get("cyc").await.is_none());
    }

    #[tokio::test]
    async fn later_path_wins_on_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let doc = |cmd: &str| format!("name: dup\non: push\njobs:\n  j:\n    steps:\n      - run: {cmd}\n");
        std::fs::write(dir.path().join("a.yml"), doc("first")).unwrap();
        std::fs::write(dir.path().join("b.yml"), doc("second")).unwrap();

        let store = DefinitionStore::new(dir.path());
        assert_eq!(store.load().await.unwrap(), 1);
        let def = store.get("dup").await.unwrap();
        assert_eq!(def.jobs["j"].steps[0].run.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn load_replaces_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        let path = store.create("gone", sample("gone")).await.unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(store.load().await.unwrap(), 0);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_invalid_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());

        let mut cyclic = sample("cyc");
        cyclic.jobs.get_mut("build").unwrap().needs = vec!["test".into()];
        let err = store.create("cyc", cyclic).await.unwrap_err();
        assert!(matches!(err, EngineError::Definition(DefinitionError::CycleDetected { .. })));

        let err = store.create("other", sample("ci")).await.unwrap_err();
        assert!(matches!(err, EngineError::Definition(DefinitionError::NameMismatch { .. })));

        assert!(store.list().await.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn create_overwrites_and_moves_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("legacy.yaml"),
            "name: ci\non: push\njobs:\n  j:\n    steps:\n      - run: old\n",
        )
        .unwrap();
        let store = DefinitionStore::new(dir.path());
        store.load().await.unwrap();

        store.create("ci", sample("ci")).await.unwrap();

        assert!(!dir.path().join("legacy.yaml").exists());
        assert!(dir.path().join("ci.yml").exists());
        assert_eq!(store.get("ci").await.unwrap().jobs.len(), 2);
    }

    #[tokio::test]
    async fn slug_collisions_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        let first = store.create("my app", sample("my app")).await.unwrap();
        let second = store.create("My-App", sample("My-App")).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(second, dir.path().join("my-app-2.yml"));
        assert_eq!(store.list().await.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_file_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        let path = store.create("ci", sample("ci")).await.unwrap();

        assert!(store.delete("ci").await.unwrap());
        assert!(!path.exists());
        assert!(store.get("ci").await.is_none());
        assert!(!store.delete("ci").await.unwrap());
    }

    #[tokio::test]
    async fn delete_tolerates_vanished_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        let path = store.create("ci", sample("ci")).await.unwrap();
        std::fs::remove_file(path).unwrap();

        assert!(store.delete("ci").await.unwrap());
        assert!(store.get("ci").await.is_none());
    }

    #[tokio::test]
    async fn list_is_sorted_with_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        store.create("zeta", sample("zeta")).await.unwrap();
        store.create("alpha", sample("alpha")).await.unwrap();

        let list = store.list().await;
        assert_eq!(list[0].name, "alpha");
        assert_eq!(list[1].name, "zeta");
        assert_eq!(list[0].events, ["push", "pull_request"]);
        assert_eq!(list[0].jobs, 2);
    }

    #[tokio::test]
    async fn stale_file_removal_failure_still_registers_new_definition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("legacy.yaml"),
            "name: ci\non: push\njobs:\n  j:\n    steps:\n      - run: old\n",
        )
        .unwrap();
        let store = DefinitionStore::new(dir.path());
        store.load().await.unwrap();

        // A directory in place of the old file makes its removal fail.
        std::fs::remove_file(dir.path().join("legacy.yaml")).unwrap();
        std::fs::create_dir(dir.path().join("legacy.yaml")).unwrap();

        let err = store.create("ci", sample("ci")).await.unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
        assert!(dir.path().join("ci.yml").exists());
        let entry = store.entry("ci").await.unwrap();
        assert_eq!(entry.path, dir.path().join("ci.yml"));
        assert_eq!(entry.definition.jobs.len(), 2);
    }

    #[test]
    fn reload_racing_create_keeps_the_new_workflow() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            for trial in 0..20 {
                let dir = tempfile::tempdir().unwrap();
                let seed = DefinitionStore::new(dir.path());
                for i in 0..30 {
                    let name = format!("existing{i}");
                    seed.create(&name, sample(&name)).await.unwrap();
                }

                let store = Arc::new(DefinitionStore::new(dir.path()));
                store.load().await.unwrap();

                let reload = tokio::spawn({
                    let store = Arc::clone(&store);
                    async move { store.load().await }
                });
                let name = format!("new{trial}");
                store.create(&name, sample(&name)).await.unwrap();
                reload.await.unwrap().unwrap();

                assert!(store.get(&name).await.is_some(), "trial {trial} lost '{name}'");
                assert_eq!(store.list().await.len(), 31);
            }
        });
    }
}
