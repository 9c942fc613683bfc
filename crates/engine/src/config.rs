//! Engine configuration.
//!
//! Every field has a default, so an empty TOML file is a valid configuration:
//!
//! ```toml
//! workflows_dir = ".workflows"
//! max_concurrent_jobs = 4
//! step_timeout_secs = 600
//! skipped_blocks_dependents = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::ExecutorConfig;
use crate::scheduler::SchedulerOptions;
use crate::EngineError;

/// Directory name used by [`EngineConfig::for_project`].
pub const DEFAULT_WORKFLOWS_DIR: &str = ".workflows";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one YAML document per workflow.
    pub workflows_dir: PathBuf,
    pub max_concurrent_jobs: Option<usize>,
    pub step_timeout_secs: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    /// When set, a skipped prerequisite skips its dependents like a failed one.
    pub skipped_blocks_dependents: bool,
    /// Seed each run's `env` with the process environment.
    pub inherit_env: bool,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflows_dir: PathBuf::from(DEFAULT_WORKFLOWS_DIR),
            max_concurrent_jobs: None,
            step_timeout_secs: None,
            job_timeout_secs: None,
            skipped_blocks_dependents: false,
            inherit_env: true,
            max_retries: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl EngineConfig {
    /// Defaults with the store at `<root>/.workflows`.
    pub fn for_project(root: impl AsRef<Path>) -> Self {
        Self {
            workflows_dir: root.as_ref().join(DEFAULT_WORKFLOWS_DIR),
            ..Self::default()
        }
    }

    /// Read a TOML file. A relative `workflows_dir` is resolved against the
    /// file's directory.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let mut config = Self::from_toml_str(&raw).map_err(|message| EngineError::Config {
            path: path.to_path_buf(),
            message,
        })?;

        if config.workflows_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.workflows_dir = parent.join(&config.workflows_dir);
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_concurrent_jobs: self.max_concurrent_jobs,
            skipped_blocks_dependents: self.skipped_blocks_dependents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = EngineConfig::from_toml_str(
            "max_concurrent_jobs = 2\nstep_timeout_secs = 30\ninherit_env = false\n",
        )
        .unwrap();

        assert_eq!(config.max_concurrent_jobs, Some(2));
        assert!(!config.inherit_env);
        assert_eq!(config.executor_config().step_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.executor_config().max_retries, 3);
        assert_eq!(config.scheduler_options().max_concurrent_jobs, Some(2));
    }

    #[test]
    fn unknown_types_are_reported() {
        let err = EngineConfig::from_toml_str("max_retries = \"many\"").unwrap_err();
        assert!(err.contains("max_retries"), "got: {err}");
    }

    #[test]
    fn file_paths_resolve_against_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipewright.toml");
        std::fs::write(&path, "workflows_dir = \"flows\"\n").unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.workflows_dir, dir.path().join("flows"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn for_project_uses_dot_workflows() {
        let config = EngineConfig::for_project("/srv/app");
        assert_eq!(config.workflows_dir, Path::new("/srv/app/.workflows"));
    }
}
