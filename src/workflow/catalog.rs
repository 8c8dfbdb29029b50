//! Stage catalog: the workflow's dependency graph, declared as data
//!
//! Each organism mode maps to an ordered list of phases. A phase is one
//! barrier level: its groups run concurrently, and every task of every group
//! in the phase must finish before the next phase is instantiated. Each group
//! also declares the groups whose output it consumes, which lets the plan be
//! checked for completeness and acyclicity before a run starts.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::stage::{StageGroup, StageKind};
use crate::reference::OrganismMode;
use crate::{Error, Result};

/// One barrier level of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub groups: Vec<StageGroup>,
}

impl Phase {
    fn of(groups: Vec<StageGroup>) -> Self {
        Self { groups }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.groups.iter().map(StageGroup::name).collect()
    }
}

/// Ordered phases for one organism mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub mode: OrganismMode,
    pub phases: Vec<Phase>,
}

impl StagePlan {
    /// All groups in their total order
    pub fn groups(&self) -> impl Iterator<Item = &StageGroup> {
        self.phases.iter().flat_map(|p| p.groups.iter())
    }

    pub fn group(&self, kind: StageKind) -> Option<&StageGroup> {
        self.groups().find(|g| g.kind == kind)
    }

    /// Index of the phase containing a group
    pub fn phase_of(&self, kind: StageKind) -> Option<usize> {
        self.phases
            .iter()
            .position(|p| p.groups.iter().any(|g| g.kind == kind))
    }

    /// Every group a group depends on, directly or transitively
    pub fn transitive_deps(&self, kind: StageKind) -> HashSet<StageKind> {
        let mut seen = HashSet::new();
        let mut stack: Vec<StageKind> = self
            .group(kind)
            .map(|g| g.depends_on.clone())
            .unwrap_or_default();

        while let Some(dep) = stack.pop() {
            if seen.insert(dep) {
                if let Some(g) = self.group(dep) {
                    stack.extend(g.depends_on.iter().copied());
                }
            }
        }
        seen
    }

    /// Check the plan is complete and acyclic: groups are unique, no phase
    /// is empty, and every dependency sits in a strictly earlier phase.
    /// Organism split/merge groups must come after every reference
    /// preparation group of the plan.
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(Error::Catalog(format!("No phases for {} mode", self.mode)));
        }

        let mut phase_index: HashMap<StageKind, usize> = HashMap::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.groups.is_empty() {
                return Err(Error::Catalog(format!("Phase {} is empty", i)));
            }
            for group in &phase.groups {
                if phase_index.insert(group.kind, i).is_some() {
                    return Err(Error::Catalog(format!("Duplicate stage group: {}", group.kind)));
                }
            }
        }

        for (i, phase) in self.phases.iter().enumerate() {
            for group in &phase.groups {
                for dep in &group.depends_on {
                    match phase_index.get(dep) {
                        None => {
                            return Err(Error::Catalog(format!(
                                "{} depends on {}, which is not in the {} plan",
                                group.kind, dep, self.mode
                            )))
                        }
                        Some(&j) if j >= i => {
                            return Err(Error::Catalog(format!(
                                "{} depends on {}, which does not run in an earlier phase",
                                group.kind, dep
                            )))
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        let preparation: Vec<StageKind> = self
            .groups()
            .map(|g| g.kind)
            .filter(|k| is_reference_preparation(*k))
            .collect();
        for group in self.groups().filter(|g| g.kind.is_organism_split()) {
            let deps = self.transitive_deps(group.kind);
            if let Some(missing) = preparation.iter().find(|p| !deps.contains(p)) {
                return Err(Error::Catalog(format!(
                    "{} must run after {}",
                    group.kind, missing
                )));
            }
        }

        Ok(())
    }
}

fn is_reference_preparation(kind: StageKind) -> bool {
    matches!(
        kind,
        StageKind::BuildIndex
            | StageKind::BuildCombinedIndex
            | StageKind::ConvertAnnotation
            | StageKind::BuildSpliceSites
    )
}

impl fmt::Display for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stage plan for {} mode:", self.mode)?;
        for (i, phase) in self.phases.iter().enumerate() {
            let groups: Vec<String> = phase
                .groups
                .iter()
                .map(|g| format!("{} ({:?})", g.name(), g.fan_out))
                .collect();
            writeln!(f, "  {:>2}. {}", i + 1, groups.join(" + "))?;
        }
        Ok(())
    }
}

/// Declarative mapping from organism mode to stage plan
pub struct StageCatalog;

impl StageCatalog {
    pub fn plan(mode: OrganismMode) -> StagePlan {
        let phases = match mode {
            OrganismMode::Prokaryote | OrganismMode::Eukaryote => single_organism_phases(),
            OrganismMode::Dual => dual_organism_phases(),
        };
        StagePlan { mode, phases }
    }
}

fn single_organism_phases() -> Vec<Phase> {
    use StageKind::*;

    vec![
        Phase::of(vec![StageGroup::per_sample(QualityControl)]),
        Phase::of(vec![
            StageGroup::once(BuildIndex),
            StageGroup::once(ConvertAnnotation),
            StageGroup::once(BuildSpliceSites),
        ]),
        Phase::of(vec![
            StageGroup::per_sample(Align).after(&[QualityControl, BuildIndex, BuildSpliceSites])
        ]),
        Phase::of(vec![StageGroup::per_sample(ConvertToBinary).after(&[Align])]),
        Phase::of(vec![StageGroup::per_sample(Sort).after(&[ConvertToBinary])]),
        Phase::of(vec![
            StageGroup::per_sample(AssembleTranscripts).after(&[Sort, ConvertAnnotation])
        ]),
        Phase::of(vec![
            StageGroup::once(Quantify).after(&[AssembleTranscripts, ConvertAnnotation]),
            StageGroup::once(MergeAssemblies).after(&[AssembleTranscripts, ConvertAnnotation]),
        ]),
        Phase::of(vec![
            StageGroup::per_sample(ReassembleWithMergedModel).after(&[MergeAssemblies, Sort])
        ]),
        Phase::of(vec![
            StageGroup::once(DifferentialExpression).after(&[Quantify, ReassembleWithMergedModel])
        ]),
    ]
}

fn dual_organism_phases() -> Vec<Phase> {
    use StageKind::*;

    vec![
        Phase::of(vec![StageGroup::per_sample(QualityControl)]),
        Phase::of(vec![
            StageGroup::once(BuildCombinedIndex),
            StageGroup::once_per_organism(ConvertAnnotation),
            StageGroup::once_per_organism(BuildSpliceSites),
            StageGroup::once(ExtractChromosomeNames),
        ]),
        Phase::of(vec![StageGroup::per_sample(AlignCombined).after(&[
            QualityControl,
            BuildCombinedIndex,
            BuildSpliceSites,
        ])]),
        Phase::of(vec![StageGroup::per_sample(ConvertToBinary).after(&[AlignCombined])]),
        Phase::of(vec![StageGroup::per_sample(Sort).after(&[ConvertToBinary])]),
        Phase::of(vec![
            StageGroup::per_sample(ExtractReferenceNames).after(&[Sort, ExtractChromosomeNames])
        ]),
        Phase::of(vec![StageGroup::per_sample(SplitBinaryByOrganism).after(&[
            ExtractReferenceNames,
            BuildCombinedIndex,
            ConvertAnnotation,
        ])]),
        Phase::of(vec![
            StageGroup::per_sample(SplitAndRouteByOrganism).after(&[SplitBinaryByOrganism])
        ]),
        Phase::of(vec![
            StageGroup::per_sample(MergePerOrganismBinaries).after(&[SplitAndRouteByOrganism])
        ]),
        Phase::of(vec![StageGroup::per_sample(AssembleTranscriptsCombined)
            .after(&[MergePerOrganismBinaries, ConvertAnnotation])]),
        Phase::of(vec![
            StageGroup::per_sample(QuantifyCombined).after(&[AssembleTranscriptsCombined])
        ]),
        Phase::of(vec![
            StageGroup::once_per_organism(DifferentialExpression).after(&[QuantifyCombined])
        ]),
    ]
}
