//! Organisms, organism modes and reference inputs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// An organism whose reference genome a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Organism {
    #[serde(rename = "prokarya")]
    Prokaryote,
    #[serde(rename = "eukarya")]
    Eukaryote,
}

impl Organism {
    /// Short tag used in paths and templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Organism::Prokaryote => "prokarya",
            Organism::Eukaryote => "eukarya",
        }
    }
}

impl fmt::Display for Organism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which reference genome(s) a run targets. Fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrganismMode {
    /// Single organism, prokaryotic reference
    #[serde(rename = "prokarya")]
    Prokaryote,
    /// Single organism, eukaryotic reference
    #[serde(rename = "eukarya")]
    Eukaryote,
    /// Reads mapped against a combined reference of both organisms
    #[serde(rename = "both")]
    Dual,
}

impl OrganismMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganismMode::Prokaryote => "prokarya",
            OrganismMode::Eukaryote => "eukarya",
            OrganismMode::Dual => "both",
        }
    }

    /// Organisms whose references are mandatory in this mode, in the fixed
    /// order used for per-organism fan-out.
    pub fn organisms(&self) -> &'static [Organism] {
        match self {
            OrganismMode::Prokaryote => &[Organism::Prokaryote],
            OrganismMode::Eukaryote => &[Organism::Eukaryote],
            OrganismMode::Dual => &[Organism::Prokaryote, Organism::Eukaryote],
        }
    }

    pub fn is_dual(&self) -> bool {
        matches!(self, OrganismMode::Dual)
    }
}

impl fmt::Display for OrganismMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganismMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "prokarya" | "prokaryote" | "prok" => Ok(OrganismMode::Prokaryote),
            "eukarya" | "eukaryote" | "euk" => Ok(OrganismMode::Eukaryote),
            "both" | "dual" => Ok(OrganismMode::Dual),
            _ => Err(Error::Config(format!(
                "Unknown organism mode: {} (expected prokarya, eukarya or both)",
                s
            ))),
        }
    }
}

/// Reference paths as supplied on the command line. Each field may hold a
/// comma-joined list of paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceInputs {
    pub prokaryote_fasta: Option<String>,
    pub prokaryote_annotation: Option<String>,
    pub eukaryote_fasta: Option<String>,
    pub eukaryote_annotation: Option<String>,
}

impl ReferenceInputs {
    /// Raw (fasta, annotation) fields for an organism
    pub fn fields(&self, organism: Organism) -> (Option<&str>, Option<&str>) {
        match organism {
            Organism::Prokaryote => (
                self.prokaryote_fasta.as_deref(),
                self.prokaryote_annotation.as_deref(),
            ),
            Organism::Eukaryote => (
                self.eukaryote_fasta.as_deref(),
                self.eukaryote_annotation.as_deref(),
            ),
        }
    }
}

/// Split a comma-joined reference field into paths, expanding `~`
pub fn split_paths(field: &str) -> Vec<PathBuf> {
    field
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .collect()
}

/// Sequence and annotation files for one organism
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePair {
    pub organism: Organism,
    pub fasta: Vec<PathBuf>,
    pub annotation: Vec<PathBuf>,
}

impl ReferencePair {
    pub fn new(organism: Organism, fasta: Vec<PathBuf>, annotation: Vec<PathBuf>) -> Self {
        Self {
            organism,
            fasta,
            annotation,
        }
    }

    /// Every path of the pair, tagged with its role
    pub fn paths(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        self.fasta
            .iter()
            .map(|p| ("fasta", p.as_path()))
            .chain(self.annotation.iter().map(|p| ("annotation", p.as_path())))
    }
}

/// Validated references for a run: one pair per organism of the mode.
/// Created once by the preflight check and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSet {
    pairs: Vec<ReferencePair>,
}

impl ReferenceSet {
    pub fn new(pairs: Vec<ReferencePair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[ReferencePair] {
        &self.pairs
    }

    pub fn get(&self, organism: Organism) -> Option<&ReferencePair> {
        self.pairs.iter().find(|p| p.organism == organism)
    }

    /// All fasta files, in organism order
    pub fn all_fasta(&self) -> Vec<&Path> {
        self.pairs
            .iter()
            .flat_map(|p| p.fasta.iter().map(PathBuf::as_path))
            .collect()
    }

    /// All annotation files, in organism order
    pub fn all_annotation(&self) -> Vec<&Path> {
        self.pairs
            .iter()
            .flat_map(|p| p.annotation.iter().map(PathBuf::as_path))
            .collect()
    }
}
