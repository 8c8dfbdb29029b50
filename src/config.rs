//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::workflow::StageKind;
use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// CPU threads handed to each task
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Directory under the working directory receiving run reports
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Stage execution settings
    #[serde(default)]
    pub executor: ExecutorConfig,
}

fn default_threads() -> usize {
    4
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".rnaflow")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            state_dir: default_state_dir(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            let local = PathBuf::from(".rnaflow/config.toml");
            if local.exists() {
                return Some(local);
            }

            dirs::home_dir().map(|h| h.join(".rnaflow/config.toml"))
        });

        let config = match config_path {
            Some(p) if p.exists() => {
                debug!("Loading configuration from {:?}", p);
                let content = std::fs::read_to_string(&p)?;
                Self::parse(&content)?
            }
            Some(p) if path.is_some() => {
                return Err(Error::Config(format!("Config file {:?} does not exist", p)));
            }
            _ => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("threads must be at least 1".to_string()));
        }
        for (name, stage) in &self.executor.stages {
            name.parse::<StageKind>()?;
            if stage.command.trim().is_empty() {
                return Err(Error::Config(format!("Empty command for stage {}", name)));
            }
        }
        Ok(())
    }

    /// Command template configured for a stage
    pub fn stage_command(&self, stage: StageKind) -> Option<&StageCommand> {
        self.executor.stages.get(stage.as_str())
    }
}

/// Stage execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Command prefix used in cluster scheduler mode, e.g. `srun -p {queue}`
    #[serde(default)]
    pub launcher: Option<String>,

    /// Command templates keyed by stage name
    #[serde(default)]
    pub stages: BTreeMap<String, StageCommand>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            launcher: Some("srun --partition {queue} --cpus-per-task {threads}".to_string()),
            stages: default_stage_commands(),
        }
    }
}

/// How one stage is run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCommand {
    /// Command template
    pub command: String,

    /// Artifact path templates that must exist after the command succeeds
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Redirect stdout into this file instead of the task log
    #[serde(default)]
    pub stdout: Option<String>,

    /// Per-sample path template, rendered for every sample into `{inputs}`
    #[serde(default)]
    pub inputs: Option<String>,
}

impl StageCommand {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            outputs: Vec::new(),
            stdout: None,
            inputs: None,
        }
    }

    pub fn output(mut self, path: &str) -> Self {
        self.outputs.push(path.to_string());
        self
    }

    pub fn stdout(mut self, path: &str) -> Self {
        self.stdout = Some(path.to_string());
        self
    }

    pub fn inputs(mut self, template: &str) -> Self {
        self.inputs = Some(template.to_string());
        self
    }
}

/// Templates for the stages that standard tools cover. The organism
/// separation stages of dual mode and differential expression have no
/// default and must be configured.
fn default_stage_commands() -> BTreeMap<String, StageCommand> {
    let mut stages = BTreeMap::new();
    let mut add = |kind: StageKind, command: StageCommand| {
        stages.insert(kind.as_str().to_string(), command);
    };

    add(
        StageKind::QualityControl,
        StageCommand::new("fastqc --quiet --threads {threads} --outdir {sample_dir} {fastq}"),
    );
    add(
        StageKind::BuildIndex,
        StageCommand::new("hisat2-build -p {threads} {fasta} {index_dir}/{organism}"),
    );
    add(
        StageKind::BuildCombinedIndex,
        StageCommand::new("hisat2-build -p {threads} {fasta} {index_dir}/combined"),
    );
    add(
        StageKind::ConvertAnnotation,
        StageCommand::new("gffread {annotation_files} -T -o {stage_dir}/annotation.gtf")
            .output("{stage_dir}/annotation.gtf"),
    );
    add(
        StageKind::BuildSpliceSites,
        StageCommand::new("hisat2_extract_splice_sites.py {annotation_files}")
            .stdout("{stage_dir}/splice_sites.txt"),
    );
    add(
        StageKind::ExtractChromosomeNames,
        StageCommand::new(
            r#"sh -c 'grep -h "^>" "$@" | cut -c2- | cut -d" " -f1' rnaflow {fasta_files}"#,
        )
        .stdout("{stage_dir}/chromosomes.txt"),
    );
    add(
        StageKind::Align,
        StageCommand::new(
            "hisat2 -p {threads} -x {index_dir}/{organism} -U {fastq_csv} \
             -S {sample_dir}/{sample}.sam",
        )
        .output("{sample_dir}/{sample}.sam"),
    );
    add(
        StageKind::AlignCombined,
        StageCommand::new(
            "hisat2 -p {threads} -x {index_dir}/combined -U {fastq_csv} \
             -S {sample_dir}/{sample}.sam",
        )
        .output("{sample_dir}/{sample}.sam"),
    );
    add(
        StageKind::ConvertToBinary,
        StageCommand::new(
            "samtools view -@ {threads} -b -o {sample_dir}/{sample}.bam \
             {sample_dir}/{sample}.sam",
        )
        .output("{sample_dir}/{sample}.bam"),
    );
    add(
        StageKind::Sort,
        StageCommand::new(
            "samtools sort -@ {threads} -o {sample_dir}/{sample}.sorted.bam \
             {sample_dir}/{sample}.bam",
        )
        .output("{sample_dir}/{sample}.sorted.bam"),
    );
    add(
        StageKind::ExtractReferenceNames,
        StageCommand::new("samtools view -H {sample_dir}/{sample}.sorted.bam")
            .stdout("{sample_dir}/{sample}.header.sam"),
    );
    add(
        StageKind::AssembleTranscripts,
        StageCommand::new(
            "stringtie {sample_dir}/{sample}.sorted.bam -p {threads} \
             -G {workdir}/convert-annotation/{organism}/annotation.gtf \
             -o {sample_dir}/{sample}.gtf",
        )
        .output("{sample_dir}/{sample}.gtf"),
    );
    add(
        StageKind::Quantify,
        StageCommand::new(
            "featureCounts -T {threads} -a {workdir}/convert-annotation/{organism}/annotation.gtf \
             -o {stage_dir}/counts.txt {inputs}",
        )
        .inputs("{sample_dir}/{sample}.sorted.bam")
        .output("{stage_dir}/counts.txt"),
    );
    add(
        StageKind::MergeAssemblies,
        StageCommand::new(
            "stringtie --merge -p {threads} \
             -G {workdir}/convert-annotation/{organism}/annotation.gtf \
             -o {stage_dir}/merged.gtf {inputs}",
        )
        .inputs("{sample_dir}/{sample}.gtf")
        .output("{stage_dir}/merged.gtf"),
    );
    add(
        StageKind::ReassembleWithMergedModel,
        StageCommand::new(
            "stringtie -e -B -p {threads} -G {workdir}/merge-assemblies/{organism}/merged.gtf \
             -o {sample_dir}/ballgown/{sample}.gtf {sample_dir}/{sample}.sorted.bam",
        )
        .output("{sample_dir}/ballgown/{sample}.gtf"),
    );

    stages
}

/// Write the default configuration to `.rnaflow/config.toml`
pub fn init(force: bool) -> Result<PathBuf> {
    let path = PathBuf::from(".rnaflow/config.toml");

    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{:?} already exists (use --force to overwrite)",
            path
        )));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(&Config::default())
        .map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(&path, content)?;

    Ok(path)
}
