//! Staged workflow orchestration
//!
//! - **Stages**: categories of work (align, sort, assemble, ...) and their fan-out
//! - **Catalog**: the ordered phases run for each organism mode
//! - **Tasks**: one unit of work per sample, per organism or per run
//! - **Runs**: validated inputs, lifecycle and the saved report
//! - **Orchestrator**: phase barriers, bounded fan-out, fail-fast
//!
//! ## Configuring a stage
//!
//! ```toml
//! # differential expression has no default command
//! [executor.stages.differential-expression]
//! command = "Rscript de.R -e {design} -p {p_value} -o {stage_dir}"
//! outputs = ["{stage_dir}/results.csv"]
//! ```
//!
//! ## Running
//!
//! ```bash
//! # Validate the design and references only
//! rnaflow check --design design.txt --mode prokarya --fasta-prok genome.fa --gff-prok genes.gff
//!
//! # Full run on a cluster queue
//! rnaflow run --workdir out --design design.txt --mode both \
//!     --fasta-prok p.fa --gff-prok p.gff --fasta-euk e.fa --gff-euk e.gff \
//!     --scheduler cluster --queue long
//! ```

mod catalog;
mod orchestrator;
mod run;
mod stage;
mod task;

pub use catalog::{Phase, StageCatalog, StagePlan};
pub use orchestrator::WorkflowOrchestrator;
pub use run::{RunInputs, RunParameters, RunReport, RunStatus, SchedulerMode, WorkflowRun};
pub use stage::{FanOut, StageGroup, StageKind, ONCE_WORKER_BUDGET};
pub use task::{StageFailure, Task, TaskStatus, TaskTarget};
