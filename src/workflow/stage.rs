use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Fixed worker budget for groups that run once per run
pub const ONCE_WORKER_BUDGET: usize = 2;

/// A category of work in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    QualityControl,
    BuildIndex,
    ConvertAnnotation,
    BuildSpliceSites,
    Align,
    ConvertToBinary,
    Sort,
    AssembleTranscripts,
    Quantify,
    MergeAssemblies,
    #[serde(rename = "re-assemble-with-merged-model")]
    ReassembleWithMergedModel,
    BuildCombinedIndex,
    ExtractChromosomeNames,
    AlignCombined,
    ExtractReferenceNames,
    SplitBinaryByOrganism,
    SplitAndRouteByOrganism,
    MergePerOrganismBinaries,
    AssembleTranscriptsCombined,
    QuantifyCombined,
    DifferentialExpression,
}

impl StageKind {
    pub fn all() -> &'static [StageKind] {
        &[
            StageKind::QualityControl,
            StageKind::BuildIndex,
            StageKind::ConvertAnnotation,
            StageKind::BuildSpliceSites,
            StageKind::Align,
            StageKind::ConvertToBinary,
            StageKind::Sort,
            StageKind::AssembleTranscripts,
            StageKind::Quantify,
            StageKind::MergeAssemblies,
            StageKind::ReassembleWithMergedModel,
            StageKind::BuildCombinedIndex,
            StageKind::ExtractChromosomeNames,
            StageKind::AlignCombined,
            StageKind::ExtractReferenceNames,
            StageKind::SplitBinaryByOrganism,
            StageKind::SplitAndRouteByOrganism,
            StageKind::MergePerOrganismBinaries,
            StageKind::AssembleTranscriptsCombined,
            StageKind::QuantifyCombined,
            StageKind::DifferentialExpression,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::QualityControl => "quality-control",
            StageKind::BuildIndex => "build-index",
            StageKind::ConvertAnnotation => "convert-annotation",
            StageKind::BuildSpliceSites => "build-splice-sites",
            StageKind::Align => "align",
            StageKind::ConvertToBinary => "convert-to-binary",
            StageKind::Sort => "sort",
            StageKind::AssembleTranscripts => "assemble-transcripts",
            StageKind::Quantify => "quantify",
            StageKind::MergeAssemblies => "merge-assemblies",
            StageKind::ReassembleWithMergedModel => "re-assemble-with-merged-model",
            StageKind::BuildCombinedIndex => "build-combined-index",
            StageKind::ExtractChromosomeNames => "extract-chromosome-names",
            StageKind::AlignCombined => "align-combined",
            StageKind::ExtractReferenceNames => "extract-reference-names",
            StageKind::SplitBinaryByOrganism => "split-binary-by-organism",
            StageKind::SplitAndRouteByOrganism => "split-and-route-by-organism",
            StageKind::MergePerOrganismBinaries => "merge-per-organism-binaries",
            StageKind::AssembleTranscriptsCombined => "assemble-transcripts-combined",
            StageKind::QuantifyCombined => "quantify-combined",
            StageKind::DifferentialExpression => "differential-expression",
        }
    }

    /// Whether the stage separates or recombines reads by organism
    pub fn is_organism_split(&self) -> bool {
        matches!(
            self,
            StageKind::SplitBinaryByOrganism
                | StageKind::SplitAndRouteByOrganism
                | StageKind::MergePerOrganismBinaries
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StageKind::all()
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| Error::Config(format!("Unknown stage: {}", s)))
    }
}

/// How many tasks a stage group instantiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOut {
    /// One task per sample
    PerSample,
    /// A single task for the whole run
    Once,
    /// One task per organism of the run's mode, all in the same barrier level
    OncePerOrganism,
}

impl FanOut {
    pub fn is_once(&self) -> bool {
        !matches!(self, FanOut::PerSample)
    }
}

/// A named phase of the workflow with its fan-out policy and the groups
/// whose output it consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageGroup {
    pub kind: StageKind,
    pub fan_out: FanOut,
    pub depends_on: Vec<StageKind>,
}

impl StageGroup {
    pub fn per_sample(kind: StageKind) -> Self {
        Self {
            kind,
            fan_out: FanOut::PerSample,
            depends_on: Vec::new(),
        }
    }

    pub fn once(kind: StageKind) -> Self {
        Self {
            kind,
            fan_out: FanOut::Once,
            depends_on: Vec::new(),
        }
    }

    pub fn once_per_organism(kind: StageKind) -> Self {
        Self {
            kind,
            fan_out: FanOut::OncePerOrganism,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, deps: &[StageKind]) -> Self {
        self.depends_on = deps.to_vec();
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    /// Concurrent task slots offered to this group: one per sample for
    /// per-sample groups, a fixed small budget otherwise.
    pub fn worker_budget(&self, sample_count: usize) -> usize {
        match self.fan_out {
            FanOut::PerSample => sample_count,
            FanOut::Once | FanOut::OncePerOrganism => ONCE_WORKER_BUDGET,
        }
    }
}
