//! Stage execution boundary
//!
//! The orchestrator hands every task to a [`StageExecutor`] as an opaque unit
//! and only looks at the success/failure signal and the produced artifacts.
//! Backends:
//! - [`ShellExecutor`]: renders configured command templates and runs them
//! - [`DryRunExecutor`]: logs each task and succeeds without doing work

mod dry_run;
mod shell;

pub use dry_run::DryRunExecutor;
pub use shell::ShellExecutor;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::design::Sample;
use crate::reference::{Organism, OrganismMode, ReferenceSet};
use crate::workflow::{RunParameters, StageKind};
use crate::{Config, Result};

/// Everything a stage needs to run one task
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Task id, `<stage>.<sample|organism|run>`
    pub task_id: String,
    pub stage: StageKind,
    /// Run working directory
    pub workdir: PathBuf,
    /// Sample for per-sample groups
    pub sample: Option<Arc<Sample>>,
    /// Organism for per-organism groups
    pub organism: Option<Organism>,
    pub mode: OrganismMode,
    pub references: Arc<ReferenceSet>,
    /// Every sample of the run, for groups merging cross-sample artifacts
    pub samples: Arc<[Arc<Sample>]>,
    /// CPU threads the task may use
    pub threads: usize,
    pub params: Arc<RunParameters>,
}

impl StageRequest {
    /// Organism tag for paths: the task's organism, the mode's only
    /// organism, or `both`
    pub fn organism_tag(&self) -> &'static str {
        match (self.organism, self.mode.organisms()) {
            (Some(organism), _) => organism.as_str(),
            (None, [only]) => only.as_str(),
            (None, _) => self.mode.as_str(),
        }
    }

    /// Per-sample output directory
    pub fn sample_dir(&self) -> Option<PathBuf> {
        self.sample
            .as_ref()
            .map(|s| sample_dir(&self.workdir, &s.name))
    }

    /// Output directory of a Once task
    pub fn stage_dir(&self) -> PathBuf {
        self.workdir
            .join(self.stage.as_str())
            .join(self.organism_tag())
    }

    /// Where the task's output is written
    pub fn output_dir(&self) -> PathBuf {
        self.sample_dir().unwrap_or_else(|| self.stage_dir())
    }
}

/// `<workdir>/samples/<name>`
pub fn sample_dir(workdir: &std::path::Path, name: &str) -> PathBuf {
    workdir.join("samples").join(name)
}

/// What a successful task produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    pub artifacts: Vec<PathBuf>,
}

impl StageOutcome {
    pub fn new(artifacts: Vec<PathBuf>) -> Self {
        Self { artifacts }
    }
}

/// Backend running the external work of a stage
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Name of this executor
    fn name(&self) -> &str;

    /// Run one task. `Err` is the task's failure signal.
    async fn execute(&self, request: StageRequest) -> Result<StageOutcome>;
}

/// Create an executor based on configuration
pub fn create_executor(config: &Config, dry_run: bool) -> Arc<dyn StageExecutor> {
    if dry_run {
        Arc::new(DryRunExecutor::new())
    } else {
        Arc::new(ShellExecutor::new(config.executor.clone()))
    }
}
