use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::stage::StageKind;
use crate::design::Sample;
use crate::reference::Organism;

/// Lifecycle of a task: Pending → Running → Succeeded | Failed.
/// Siblings still queued or running when another task of their group fails
/// end as Cancelled and their results are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the task's output is usable downstream
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }
}

/// What a task is fanned out over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTarget {
    pub sample: Option<Arc<Sample>>,
    pub organism: Option<Organism>,
}

impl TaskTarget {
    pub fn label(&self) -> String {
        match (&self.sample, self.organism) {
            (Some(sample), _) => sample.name.clone(),
            (None, Some(organism)) => organism.to_string(),
            (None, None) => "run".to_string(),
        }
    }
}

/// One concrete unit of work instantiated from a stage group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub stage: StageKind,
    pub sample: Option<String>,
    pub organism: Option<Organism>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(stage: StageKind, target: &TaskTarget) -> Self {
        Self {
            id: format!("{}.{}", stage.as_str(), target.label()),
            stage,
            sample: target.sample.as_ref().map(|s| s.name.clone()),
            organism: target.organism,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifacts: Vec::new(),
            error: None,
        }
    }

    /// Mark the task running since `at`, the moment it got a worker slot
    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(at);
    }

    pub fn succeed(&mut self, artifacts: Vec<PathBuf>) {
        self.status = TaskStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        self.artifacts = artifacts;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn failure(&self) -> Option<StageFailure> {
        match self.status {
            TaskStatus::Failed => Some(StageFailure {
                stage: self.stage,
                sample: self.sample.clone(),
                organism: self.organism,
                message: self.error.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// A task of a stage group reported failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub sample: Option<String>,
    pub organism: Option<Organism>,
    pub message: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage {} failed", self.stage)?;
        if let Some(sample) = &self.sample {
            write!(f, " for sample {}", sample)?;
        }
        if let Some(organism) = self.organism {
            write!(f, " ({})", organism)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for StageFailure {}
