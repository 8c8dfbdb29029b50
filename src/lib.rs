//! rnaflow: staged RNA-seq workflow orchestration
//!
//! Drives quality control, alignment, transcript assembly, quantification and
//! differential-expression input preparation across every sample of an
//! experiment, for a prokaryotic, a eukaryotic or a dual-organism reference.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  DesignValidator → PreflightChecker     │
//! │  (all-or-nothing gates, no tasks yet)   │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  StageCatalog: mode → ordered phases    │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  WorkflowOrchestrator                   │
//! │  phase barrier, bounded fan-out,        │
//! │  fail-fast on the first failed task     │
//! └────────────────────┬────────────────────┘
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  StageExecutor (shell / dry run)        │
//! └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod design;
pub mod executor;
pub mod method;
pub mod preflight;
pub mod reference;
pub mod workflow;

pub use config::Config;
pub use design::{DesignError, DesignProblem, Sample};
pub use executor::{StageExecutor, StageOutcome, StageRequest};
pub use method::DeMethod;
pub use reference::{Organism, OrganismMode, ReferenceInputs, ReferenceSet};
pub use workflow::{
    RunInputs, RunReport, RunStatus, StageCatalog, StageFailure, WorkflowOrchestrator,
    WorkflowRun,
};

use std::path::PathBuf;

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Design(#[from] DesignError),

    #[error(
        "Insufficient replicates for {method}: group '{group}' has {found} sample(s), at least {required} required"
    )]
    InsufficientReplicates {
        method: DeMethod,
        group: String,
        found: usize,
        required: usize,
    },

    #[error("Missing reference file: {organism} {role} {path:?} does not exist")]
    MissingReference {
        organism: Organism,
        role: &'static str,
        path: PathBuf,
    },

    #[error("Missing reference file: no {organism} {role} given (required in {mode} mode)")]
    ReferenceNotProvided {
        organism: Organism,
        role: &'static str,
        mode: OrganismMode,
    },

    #[error(transparent)]
    StageExecution(#[from] StageFailure),

    #[error("Stage catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether the error was raised before any task was instantiated
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::Design(_)
                | Error::InsufficientReplicates { .. }
                | Error::MissingReference { .. }
                | Error::ReferenceNotProvided { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
