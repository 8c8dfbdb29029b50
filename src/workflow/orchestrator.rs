//! Workflow orchestrator
//!
//! Executes a validated run phase by phase:
//! - every group of a phase fans out into tasks, bounded by its worker budget
//! - all tasks of a phase reach a terminal state before the next phase starts
//! - the first failed task aborts the run; running siblings are cancelled

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use super::catalog::Phase;
use super::run::{RunReport, RunStatus, WorkflowRun};
use super::stage::{FanOut, StageGroup, StageKind};
use super::task::{StageFailure, Task, TaskStatus, TaskTarget};
use crate::executor::{StageExecutor, StageOutcome, StageRequest};
use crate::{Error, Result};

type Finished = (usize, DateTime<Utc>, Result<StageOutcome>);

/// Drives a [`WorkflowRun`] through its stage plan
pub struct WorkflowOrchestrator {
    executor: Arc<dyn StageExecutor>,
}

impl WorkflowOrchestrator {
    pub fn new(executor: Arc<dyn StageExecutor>) -> Self {
        Self { executor }
    }

    /// Execute every phase of the run. The report carries the failure of an
    /// aborted run.
    pub async fn execute(&self, mut run: WorkflowRun) -> RunReport {
        run.set_status(RunStatus::Running);
        let mut report = RunReport::new(&run);
        let mut succeeded: HashSet<StageKind> = HashSet::new();
        let total = run.plan.phases.len();

        info!(
            "Executing {} phase(s) for {} sample(s) with {}",
            total,
            run.samples.len(),
            self.executor.name()
        );

        for (i, phase) in run.plan.phases.iter().enumerate() {
            if let Some(failure) = unmet_dependency(phase, &succeeded) {
                error!("{}", failure);
                report.failure = Some(failure);
                break;
            }

            info!("Phase {}/{}: {}", i + 1, total, phase.names().join(" + "));
            let (tasks, failure) = self.run_phase(&run, phase).await;
            report.tasks.extend(tasks);

            if let Some(failure) = failure {
                error!("{}", failure);
                report.failure = Some(failure);
                break;
            }

            for group in &phase.groups {
                succeeded.insert(group.kind);
                report.completed_groups.push(group.kind);
            }
        }

        let status = if report.failure.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        run.set_status(status);
        report.status = status;
        report.finished_at = Some(Utc::now());
        report
    }

    /// Run one barrier level. Returns its tasks, all terminal, and the first
    /// failure if any.
    async fn run_phase(
        &self,
        run: &WorkflowRun,
        phase: &Phase,
    ) -> (Vec<Task>, Option<StageFailure>) {
        let mut tasks: Vec<Task> = Vec::new();
        let mut set: JoinSet<Finished> = JoinSet::new();
        let mut spawned: HashMap<Id, usize> = HashMap::new();

        for group in &phase.groups {
            let targets = targets(group, run);
            let budget = group.worker_budget(run.samples.len()).max(1);
            let semaphore = Arc::new(Semaphore::new(budget));
            debug!(
                "{}: {} task(s), {} worker slot(s)",
                group.name(),
                targets.len(),
                budget
            );

            for target in targets {
                let task = Task::new(group.kind, &target);
                let request = StageRequest {
                    task_id: task.id.clone(),
                    stage: group.kind,
                    workdir: run.workdir.clone(),
                    sample: target.sample,
                    organism: target.organism,
                    mode: run.mode,
                    references: Arc::clone(&run.references),
                    samples: Arc::clone(&run.samples),
                    threads: run.threads,
                    params: Arc::clone(&run.params),
                };
                let index = tasks.len();
                tasks.push(task);

                let executor = Arc::clone(&self.executor);
                let semaphore = Arc::clone(&semaphore);
                let handle = set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return (index, Utc::now(), Err(Error::Command(e.to_string()))),
                    };
                    let started = Utc::now();
                    debug!("{} started", request.task_id);

                    // also catches a panic raised before the first await
                    let result = AssertUnwindSafe(async move { executor.execute(request).await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::Command("stage executor panicked".to_string()))
                        });
                    (index, started, result)
                });
                spawned.insert(handle.id(), index);
            }
        }

        let mut failure: Option<StageFailure> = None;
        while let Some(joined) = set.join_next().await {
            let (index, started, result) = match joined {
                Ok(finished) => finished,
                Err(_) if failure.is_some() => continue,
                Err(e) => {
                    let Some(&index) = spawned.get(&e.id()) else {
                        // left non-terminal, failed below
                        continue;
                    };
                    let message = if e.is_panic() {
                        "stage executor panicked"
                    } else {
                        "stage task ended without a result"
                    };
                    let task = &mut tasks[index];
                    task.fail(message);
                    failure = task.failure();
                    set.abort_all();
                    continue;
                }
            };

            let task = &mut tasks[index];
            task.start(started);

            if failure.is_some() {
                debug!("{} finished after abort, result discarded", task.id);
                task.cancel();
                continue;
            }

            match result {
                Ok(outcome) => {
                    debug!("{} succeeded", task.id);
                    task.succeed(outcome.artifacts);
                }
                Err(e) => {
                    task.fail(e.to_string());
                    failure = task.failure();
                    set.abort_all();
                }
            }
        }

        for task in tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
            if failure.is_none() {
                task.fail("stage task ended without a result");
                failure = task.failure();
            } else {
                task.cancel();
            }
        }
        let cancelled = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Cancelled)
            .count();
        if cancelled > 0 {
            warn!("Cancelled {} task(s) after failure", cancelled);
        }

        (tasks, failure)
    }
}

/// One target per fan-out slot of a group
fn targets(group: &StageGroup, run: &WorkflowRun) -> Vec<TaskTarget> {
    match group.fan_out {
        FanOut::PerSample => run
            .samples
            .iter()
            .map(|sample| TaskTarget {
                sample: Some(Arc::clone(sample)),
                organism: None,
            })
            .collect(),
        FanOut::Once => vec![TaskTarget {
            sample: None,
            organism: None,
        }],
        FanOut::OncePerOrganism => run
            .mode
            .organisms()
            .iter()
            .map(|&organism| TaskTarget {
                sample: None,
                organism: Some(organism),
            })
            .collect(),
    }
}

/// A group whose declared dependencies have not all succeeded
fn unmet_dependency(phase: &Phase, succeeded: &HashSet<StageKind>) -> Option<StageFailure> {
    phase.groups.iter().find_map(|group| {
        group
            .depends_on
            .iter()
            .find(|dep| !succeeded.contains(dep))
            .map(|dep| StageFailure {
                stage: group.kind,
                sample: None,
                organism: None,
                message: format!("dependency {} has not succeeded", dep),
            })
    })
}
