//! Run lifecycle and reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::catalog::{StageCatalog, StagePlan};
use super::stage::StageKind;
use super::task::{Task, TaskStatus};
use super::StageFailure;
use crate::design::{validate_design, Sample};
use crate::method::DeMethod;
use crate::preflight::run_preflight;
use crate::reference::{OrganismMode, ReferenceInputs, ReferenceSet};
use crate::{Config, Error, Result};

/// Where stage tasks are launched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// Subprocesses on this machine
    #[default]
    Local,
    /// Subprocesses wrapped in the configured cluster launcher
    Cluster,
}

impl std::str::FromStr for SchedulerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SchedulerMode::Local),
            "cluster" | "slurm" => Ok(SchedulerMode::Cluster),
            _ => Err(Error::Config(format!("Unknown scheduler mode: {}", s))),
        }
    }
}

/// Run-wide parameters passed through to every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParameters {
    pub methods: Vec<DeMethod>,
    /// Significance threshold for differential expression
    pub p_value: f64,
    pub index_dir: PathBuf,
    pub design: PathBuf,
    pub scheduler: SchedulerMode,
    pub queue: Option<String>,
}

/// Already-parsed command surface of a run
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub workdir: PathBuf,
    pub design: PathBuf,
    pub mode: OrganismMode,
    pub references: ReferenceInputs,
    pub methods: Vec<DeMethod>,
    pub p_value: f64,
    /// Defaults to `<workdir>/index`
    pub index_dir: Option<PathBuf>,
    /// Overrides the configured thread count
    pub threads: Option<usize>,
    pub scheduler: SchedulerMode,
    pub queue: Option<String>,
}

/// Run lifecycle: Created → Validating → Running → Completed | Aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Validating,
    Running,
    Completed,
    Aborted,
}

/// A validated run, ready for the orchestrator
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub mode: OrganismMode,
    pub samples: Arc<[Arc<Sample>]>,
    pub references: Arc<ReferenceSet>,
    pub plan: StagePlan,
    pub workdir: PathBuf,
    pub threads: usize,
    pub params: Arc<RunParameters>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Validate the design, run preflight and resolve the stage plan.
    /// Any failure is returned before a single task exists.
    pub fn prepare(inputs: RunInputs, config: &Config) -> Result<Self> {
        let id = Uuid::new_v4();
        let mut status = RunStatus::Created;
        info!("Run {} created ({} mode)", id, inputs.mode);

        if inputs.scheduler == SchedulerMode::Cluster && inputs.queue.is_none() {
            return Err(Error::Config(
                "A queue is required with the cluster scheduler".to_string(),
            ));
        }

        status = transition(id, status, RunStatus::Validating);
        let samples = validate_design(&inputs.design)?;
        info!("Design {:?}: {} sample(s)", inputs.design, samples.len());

        let references =
            run_preflight(&inputs.methods, &samples, inputs.mode, &inputs.references)?;

        let plan = StageCatalog::plan(inputs.mode);
        plan.validate()?;

        let index_dir = inputs
            .index_dir
            .unwrap_or_else(|| inputs.workdir.join("index"));

        Ok(Self {
            id,
            status,
            mode: inputs.mode,
            samples: samples.into_iter().map(Arc::new).collect(),
            references: Arc::new(references),
            plan,
            workdir: inputs.workdir,
            threads: inputs.threads.unwrap_or(config.threads),
            params: Arc::new(RunParameters {
                methods: inputs.methods,
                p_value: inputs.p_value,
                index_dir,
                design: inputs.design,
                scheduler: inputs.scheduler,
                queue: inputs.queue,
            }),
            created_at: Utc::now(),
        })
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = transition(self.id, self.status, status);
    }

    pub fn sample_names(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.name.clone()).collect()
    }
}

fn transition(id: Uuid, from: RunStatus, to: RunStatus) -> RunStatus {
    info!("Run {}: {:?} -> {:?}", id, from, to);
    to
}

/// Outcome of one run, saved after the run finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: OrganismMode,
    pub samples: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub planned_groups: usize,
    pub completed_groups: Vec<StageKind>,
    pub tasks: Vec<Task>,
    pub failure: Option<StageFailure>,
}

impl RunReport {
    pub fn new(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.id,
            mode: run.mode,
            samples: run.sample_names(),
            status: run.status,
            started_at: Utc::now(),
            finished_at: None,
            planned_groups: run.plan.groups().count(),
            completed_groups: Vec::new(),
            tasks: Vec::new(),
            failure: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Tasks of one stage group
    pub fn tasks_of(&self, stage: StageKind) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.stage == stage)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// The failure of an aborted run as an error
    pub fn result(&self) -> Result<()> {
        match &self.failure {
            Some(failure) => Err(Error::StageExecution(failure.clone())),
            None => Ok(()),
        }
    }

    /// Get a summary of the run
    pub fn summary(&self) -> String {
        let elapsed = self
            .finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
            .map(|d| {
                humantime::format_duration(std::time::Duration::from_secs(d.as_secs())).to_string()
            })
            .unwrap_or_else(|| "-".to_string());

        let mut lines = vec![
            format!("Run: {}", self.run_id),
            format!("Mode: {}", self.mode),
            format!("Samples: {}", self.samples.join(", ")),
            format!("Status: {:?}", self.status),
            format!("Elapsed: {}", elapsed),
            format!(
                "Groups: {}/{} completed",
                self.completed_groups.len(),
                self.planned_groups
            ),
            format!(
                "Tasks: {} succeeded, {} failed, {} cancelled",
                self.count(TaskStatus::Succeeded),
                self.count(TaskStatus::Failed),
                self.count(TaskStatus::Cancelled)
            ),
        ];

        if let Some(failure) = &self.failure {
            lines.push(format!("Failure: {}", failure));
        }

        lines.join("\n")
    }

    /// `<state_dir>/runs/<run-id>.yaml`
    pub fn report_path(state_dir: &Path, run_id: &Uuid) -> PathBuf {
        state_dir.join("runs").join(format!("{}.yaml", run_id))
    }

    /// Save the report under a state directory
    pub fn save(&self, state_dir: &Path) -> Result<PathBuf> {
        let path = Self::report_path(state_dir, &self.run_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}
