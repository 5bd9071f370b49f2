//! Resolves the on-disk workspace a CLI invocation operates in: where the
//! SQLite store lives, and the `sagacore-runtime::RuntimeConfig` to run
//! against.

use anyhow::{Context, Result};
use sagacore_runtime::RuntimeConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub workspace_dir: PathBuf,
    pub db_path: PathBuf,
}

impl CliConfig {
    pub fn new(project_dir: &Path, db_override: Option<PathBuf>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("failed to resolve project directory")?;
        let workspace_dir = project_dir.join(".sagacore");
        std::fs::create_dir_all(&workspace_dir)
            .with_context(|| format!("failed to create workspace dir {}", workspace_dir.display()))?;

        let db_path = db_override.unwrap_or_else(|| workspace_dir.join("state.db"));
        Ok(Self { workspace_dir, db_path })
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
    }
}
