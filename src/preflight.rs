//! Preflight checks run before any stage is instantiated
//!
//! Two independent gates, both of which must pass:
//! - method feasibility: replicate-sensitive methods need enough samples per group
//! - reference existence: every fasta/annotation path required by the mode exists

use std::path::Path;
use tracing::{debug, info};

use crate::design::{group_sizes, Sample};
use crate::method::{DeMethod, MIN_REPLICATES};
use crate::reference::{
    split_paths, Organism, OrganismMode, ReferenceInputs, ReferencePair, ReferenceSet,
};
use crate::{Error, Result};

/// Fail if any replicate-sensitive method is paired with an undersized group
pub fn check_replicates(methods: &[DeMethod], samples: &[Sample]) -> Result<()> {
    let sizes = group_sizes(samples);

    for method in methods.iter().filter(|m| m.is_replicate_sensitive()) {
        for (group, found) in &sizes {
            if *found < MIN_REPLICATES {
                return Err(Error::InsufficientReplicates {
                    method: *method,
                    group: group.to_string(),
                    found: *found,
                    required: MIN_REPLICATES,
                });
            }
        }
        debug!("{}: every group has at least {} replicates", method, MIN_REPLICATES);
    }

    Ok(())
}

/// Resolve and check every reference path the mode requires.
/// Comma-joined fields are checked element-wise.
pub fn check_references(mode: OrganismMode, inputs: &ReferenceInputs) -> Result<ReferenceSet> {
    let mut pairs = Vec::new();

    for &organism in mode.organisms() {
        let (fasta, annotation) = inputs.fields(organism);

        let fasta = split_paths(fasta.unwrap_or_default());
        if fasta.is_empty() {
            return Err(Error::ReferenceNotProvided {
                organism,
                role: "fasta",
                mode,
            });
        }
        let annotation = split_paths(annotation.unwrap_or_default());
        if annotation.is_empty() {
            return Err(Error::ReferenceNotProvided {
                organism,
                role: "annotation",
                mode,
            });
        }

        let pair = ReferencePair::new(organism, fasta, annotation);
        for (role, path) in pair.paths() {
            ensure_exists(organism, role, path)?;
        }
        pairs.push(pair);
    }

    Ok(ReferenceSet::new(pairs))
}

fn ensure_exists(organism: Organism, role: &'static str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingReference {
            organism,
            role,
            path: path.to_path_buf(),
        })
    }
}

/// Run both preflight gates, returning the validated references
pub fn run_preflight(
    methods: &[DeMethod],
    samples: &[Sample],
    mode: OrganismMode,
    inputs: &ReferenceInputs,
) -> Result<ReferenceSet> {
    info!("Preflight: checking method feasibility");
    check_replicates(methods, samples)?;

    info!("Preflight: checking {} mode references", mode);
    let references = check_references(mode, inputs)?;

    info!("Preflight passed");
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(groups: &[(&str, usize)]) -> Vec<Sample> {
        let mut out = Vec::new();
        for (group, n) in groups {
            for i in 0..*n {
                out.push(Sample {
                    name: format!("{}_{}", group, i),
                    fastq: vec![],
                    group: group.to_string(),
                });
            }
        }
        out
    }

    #[test]
    fn test_sensitive_method_needs_three_replicates() {
        let err = check_replicates(&[DeMethod::DESeq2], &samples(&[("a", 2), ("b", 2)]))
            .unwrap_err();
        match err {
            Error::InsufficientReplicates {
                method,
                group,
                found,
                required,
            } => {
                assert_eq!(method, DeMethod::DESeq2);
                assert_eq!(group, "a");
                assert_eq!(found, 2);
                assert_eq!(required, 3);
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(check_replicates(&[DeMethod::EdgeR], &samples(&[("a", 3), ("b", 1)])).is_err());
        assert!(check_replicates(&[DeMethod::EdgeR], &samples(&[("a", 3), ("b", 4)])).is_ok());
    }

    #[test]
    fn test_ballgown_accepts_any_group_size() {
        assert!(check_replicates(&[DeMethod::Ballgown], &samples(&[("a", 1), ("b", 2)])).is_ok());
        assert!(check_replicates(
            &[DeMethod::Ballgown, DeMethod::EdgeR],
            &samples(&[("a", 1)])
        )
        .is_err());
    }

    fn touch(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, ">chr\nACGT\n").unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_single_mode_references() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = ReferenceInputs {
            prokaryote_fasta: Some(touch(dir.path(), "p.fa")),
            prokaryote_annotation: Some(touch(dir.path(), "p.gff")),
            ..Default::default()
        };

        let set = check_references(OrganismMode::Prokaryote, &inputs).unwrap();
        assert_eq!(set.pairs().len(), 1);
        assert!(set.get(Organism::Eukaryote).is_none());

        let err = check_references(OrganismMode::Eukaryote, &inputs).unwrap_err();
        assert!(matches!(
            err,
            Error::ReferenceNotProvided {
                organism: Organism::Eukaryote,
                role: "fasta",
                ..
            }
        ));
    }

    #[test]
    fn test_comma_joined_field_checked_element_wise() {
        let dir = tempfile::tempdir().unwrap();
        let present = touch(dir.path(), "chr1.fa");
        let absent = dir.path().join("plasmid.fa");
        let inputs = ReferenceInputs {
            prokaryote_fasta: Some(format!("{},{}", present, absent.display())),
            prokaryote_annotation: Some(touch(dir.path(), "p.gff")),
            ..Default::default()
        };

        match check_references(OrganismMode::Prokaryote, &inputs).unwrap_err() {
            Error::MissingReference {
                organism,
                role,
                path,
            } => {
                assert_eq!(organism, Organism::Prokaryote);
                assert_eq!(role, "fasta");
                assert_eq!(path, absent);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_dual_mode_names_missing_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("e.gff");
        let inputs = ReferenceInputs {
            prokaryote_fasta: Some(touch(dir.path(), "p.fa")),
            prokaryote_annotation: Some(touch(dir.path(), "p.gff")),
            eukaryote_fasta: Some(touch(dir.path(), "e.fa")),
            eukaryote_annotation: Some(missing.display().to_string()),
        };

        let err = check_references(OrganismMode::Dual, &inputs).unwrap_err();
        assert!(err.to_string().contains("e.gff"));
        assert!(matches!(
            err,
            Error::MissingReference { ref path, .. } if *path == missing
        ));
    }

    #[test]
    fn test_run_preflight_checks_method_first() {
        let inputs = ReferenceInputs::default();
        let err = run_preflight(
            &[DeMethod::DESeq2],
            &samples(&[("a", 2)]),
            OrganismMode::Prokaryote,
            &inputs,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InsufficientReplicates { .. }));
        assert!(err.is_precondition());
    }
}
