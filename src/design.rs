//! Experiment design validation
//!
//! The design is a tab-delimited table with a header row naming a sample
//! column (`#SampleID`), a `Group` column and one or more file columns
//! (`Files`, `Files2`, ...). A file cell may hold several FASTQ paths joined
//! by `:` (paired-end reads). Relative paths are resolved against the
//! directory holding the design file.
//!
//! Validation is all-or-nothing: every check runs, every problem is
//! reported, and no sample is returned unless the whole table is valid.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One biological sample from the design table. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub fastq: Vec<PathBuf>,
    pub group: String,
}

/// A single problem found in the design table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DesignProblem {
    #[error("cannot read design file: {0}")]
    Unreadable(String),

    #[error("design table is empty")]
    EmptyTable,

    #[error("header is not tab-delimited")]
    NotTabDelimited,

    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("line {line}: expected {expected} tab-separated fields, found {found}")]
    Malformed {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: empty sample name")]
    EmptySampleName { line: usize },

    #[error("duplicate sample name '{0}'")]
    DuplicateSample(String),

    #[error("sample '{0}' has no group")]
    MissingGroup(String),

    #[error("sample '{0}' has no FASTQ file")]
    EmptyFileName(String),

    #[error("file '{0}' is listed more than once")]
    DuplicateFile(String),

    #[error("sample '{sample}': FASTQ file {path:?} does not exist")]
    MissingFastq { sample: String, path: PathBuf },

    #[error("design table has no samples")]
    NoSamples,
}

/// The experiment design failed validation
#[derive(Debug, thiserror::Error)]
#[error("Invalid experiment design {path:?}: {}", join_problems(.problems))]
pub struct DesignError {
    pub path: PathBuf,
    pub problems: Vec<DesignProblem>,
}

impl DesignError {
    pub fn has(&self, problem: &DesignProblem) -> bool {
        self.problems.contains(problem)
    }
}

fn join_problems(problems: &[DesignProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Recognized header columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Sample,
    Group,
    Files,
    Other,
}

impl Column {
    fn classify(name: &str) -> Self {
        let name = name.trim().trim_start_matches('#').to_lowercase();
        match name.as_str() {
            "sampleid" | "sample_id" | "sample" => Column::Sample,
            "group" => Column::Group,
            n if n.starts_with("file") => Column::Files,
            _ => Column::Other,
        }
    }
}

/// Read and validate a design file
pub fn validate_design(path: &Path) -> Result<Vec<Sample>, DesignError> {
    info!("Validating experiment design {:?}", path);

    let content = std::fs::read_to_string(path).map_err(|e| DesignError {
        path: path.to_path_buf(),
        problems: vec![DesignProblem::Unreadable(e.to_string())],
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_design(&content, base_dir, path)
}

/// Validate design table content; `source` is used only for error reporting
pub fn parse_design(
    content: &str,
    base_dir: &Path,
    source: &Path,
) -> Result<Vec<Sample>, DesignError> {
    let mut problems = Vec::new();
    let samples = collect_samples(content, base_dir, &mut problems);

    if problems.is_empty() {
        info!("Experiment design valid: {} samples", samples.len());
        Ok(samples)
    } else {
        Err(DesignError {
            path: source.to_path_buf(),
            problems,
        })
    }
}

fn collect_samples(
    content: &str,
    base_dir: &Path,
    problems: &mut Vec<DesignProblem>,
) -> Vec<Sample> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        problems.push(DesignProblem::EmptyTable);
        return Vec::new();
    };

    let columns: Vec<Column> = header.split('\t').map(Column::classify).collect();
    if columns.len() < 2 {
        problems.push(DesignProblem::NotTabDelimited);
    }

    let sample_idx = columns.iter().position(|c| *c == Column::Sample);
    let group_idx = columns.iter().position(|c| *c == Column::Group);
    let file_idx: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == Column::Files)
        .map(|(i, _)| i)
        .collect();

    if sample_idx.is_none() {
        problems.push(DesignProblem::MissingColumn("#SampleID"));
    }
    if group_idx.is_none() {
        problems.push(DesignProblem::MissingColumn("Group"));
    }
    if file_idx.is_empty() {
        problems.push(DesignProblem::MissingColumn("Files"));
    }

    let (Some(sample_idx), Some(group_idx)) = (sample_idx, group_idx) else {
        return Vec::new();
    };
    if file_idx.is_empty() {
        return Vec::new();
    }

    let mut samples = Vec::new();
    let mut seen_samples = HashSet::new();
    let mut seen_files = HashSet::new();

    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != columns.len() {
            problems.push(DesignProblem::Malformed {
                line: line_no,
                expected: columns.len(),
                found: fields.len(),
            });
            continue;
        }

        let name = fields[sample_idx];
        if name.is_empty() {
            problems.push(DesignProblem::EmptySampleName { line: line_no });
        } else if !seen_samples.insert(name.to_string()) {
            problems.push(DesignProblem::DuplicateSample(name.to_string()));
        }

        let group = fields[group_idx];
        if group.is_empty() {
            problems.push(DesignProblem::MissingGroup(name.to_string()));
        }

        let mut fastq = Vec::new();
        for &idx in &file_idx {
            for file in fields[idx].split(':').map(str::trim).filter(|f| !f.is_empty()) {
                let path = resolve(base_dir, file);
                let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !seen_files.insert(key) {
                    problems.push(DesignProblem::DuplicateFile(file.to_string()));
                    continue;
                }
                if !path.exists() {
                    problems.push(DesignProblem::MissingFastq {
                        sample: name.to_string(),
                        path: path.clone(),
                    });
                }
                fastq.push(path);
            }
        }
        if fastq.is_empty() {
            problems.push(DesignProblem::EmptyFileName(name.to_string()));
        }

        debug!(
            "Design row {}: sample={} group={} files={}",
            line_no,
            name,
            group,
            fastq.len()
        );

        samples.push(Sample {
            name: name.to_string(),
            fastq,
            group: group.to_string(),
        });
    }

    if samples.is_empty() && problems.is_empty() {
        problems.push(DesignProblem::NoSamples);
    }

    samples
}

fn resolve(base_dir: &Path, file: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(file).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

/// Number of samples per group, ordered by group label
pub fn group_sizes(samples: &[Sample]) -> BTreeMap<&str, usize> {
    let mut sizes = BTreeMap::new();
    for sample in samples {
        *sizes.entry(sample.group.as_str()).or_insert(0) += 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fastq_dir(names: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), "@r1\nACGT\n+\nIIII\n").unwrap();
        }
        dir
    }

    fn parse(dir: &TempDir, content: &str) -> Result<Vec<Sample>, DesignError> {
        parse_design(content, dir.path(), &dir.path().join("design.txt"))
    }

    #[test]
    fn test_valid_design() {
        let dir = fastq_dir(&["a_R1.fq", "a_R2.fq", "b.fq"]);
        let content = "#SampleID\tFiles\tGroup\nA\ta_R1.fq:a_R2.fq\tcontrol\nB\tb.fq\ttreated\n";

        let samples = parse(&dir, content).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "A");
        assert_eq!(samples[0].fastq.len(), 2);
        assert_eq!(samples[0].fastq[1], dir.path().join("a_R2.fq"));
        assert_eq!(samples[1].group, "treated");
    }

    #[test]
    fn test_multiple_file_columns() {
        let dir = fastq_dir(&["a1.fq", "a2.fq"]);
        let content = "SampleID\tFile1\tFile2\tGroup\nA\ta1.fq\ta2.fq\tg\n";

        let samples = parse(&dir, content).unwrap();
        assert_eq!(samples[0].fastq.len(), 2);
    }

    #[test]
    fn test_missing_columns() {
        let dir = fastq_dir(&["a.fq"]);
        let err = parse(&dir, "#SampleID\tFiles\nA\ta.fq\n").unwrap_err();
        assert!(err.has(&DesignProblem::MissingColumn("Group")));

        let err = parse(&dir, "Name\tFiles\tGroup\nA\ta.fq\tg\n").unwrap_err();
        assert!(err.has(&DesignProblem::MissingColumn("#SampleID")));

        let err = parse(&dir, "#SampleID\tGroup\nA\tg\n").unwrap_err();
        assert!(err.has(&DesignProblem::MissingColumn("Files")));
    }

    #[test]
    fn test_not_tab_delimited() {
        let dir = fastq_dir(&["a.fq"]);
        let err = parse(&dir, "#SampleID,Files,Group\nA,a.fq,g\n").unwrap_err();
        assert!(err.has(&DesignProblem::NotTabDelimited));
    }

    #[test]
    fn test_every_problem_is_reported() {
        let dir = fastq_dir(&["a.fq", "b.fq"]);
        let content = "#SampleID\tFiles\tGroup\n\
                       A\ta.fq\tg1\n\
                       A\tb.fq\tg1\n\
                       C\ta.fq\t\n\
                       D\tmissing.fq\tg2\n\
                       E\tonly-two-fields\n";

        let err = parse(&dir, content).unwrap_err();
        assert!(err.has(&DesignProblem::DuplicateSample("A".to_string())));
        assert!(err.has(&DesignProblem::DuplicateFile("a.fq".to_string())));
        assert!(err.has(&DesignProblem::MissingGroup("C".to_string())));
        assert!(err.has(&DesignProblem::MissingFastq {
            sample: "D".to_string(),
            path: dir.path().join("missing.fq"),
        }));
        assert!(err.has(&DesignProblem::Malformed {
            line: 6,
            expected: 3,
            found: 2
        }));
    }

    #[test]
    fn test_duplicate_file_under_another_spelling() {
        let dir = fastq_dir(&["a.fq"]);
        let absolute = dir.path().join("a.fq");
        let content = format!(
            "#SampleID\tFiles\tGroup\nA\ta.fq\tg\nB\t./a.fq\tg\nC\t{}\tg\n",
            absolute.display()
        );

        let err = parse(&dir, &content).unwrap_err();
        assert!(err.has(&DesignProblem::DuplicateFile("./a.fq".to_string())));
        assert!(err.has(&DesignProblem::DuplicateFile(absolute.display().to_string())));
    }

    #[test]
    fn test_empty_names() {
        let dir = fastq_dir(&["a.fq"]);
        let err = parse(&dir, "#SampleID\tFiles\tGroup\n\ta.fq\tg\nB\t\tg\n").unwrap_err();
        assert!(err.has(&DesignProblem::EmptySampleName { line: 2 }));
        assert!(err.has(&DesignProblem::EmptyFileName("B".to_string())));
    }

    #[test]
    fn test_empty_table() {
        let dir = fastq_dir(&[]);
        let err = parse(&dir, "\n\n").unwrap_err();
        assert!(err.has(&DesignProblem::EmptyTable));

        let err = parse(&dir, "#SampleID\tFiles\tGroup\n").unwrap_err();
        assert!(err.has(&DesignProblem::NoSamples));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = fastq_dir(&[]);
        let err = validate_design(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err.problems[0], DesignProblem::Unreadable(_)));
    }

    #[test]
    fn test_group_sizes() {
        let sample = |name: &str, group: &str| Sample {
            name: name.to_string(),
            fastq: vec![],
            group: group.to_string(),
        };
        let samples = vec![sample("a", "x"), sample("b", "y"), sample("c", "x")];
        let sizes = group_sizes(&samples);
        assert_eq!(sizes["x"], 2);
        assert_eq!(sizes["y"], 1);
    }
}
