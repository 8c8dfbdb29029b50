//! Shell executor: runs configured command templates as subprocesses

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{sample_dir, StageExecutor, StageOutcome, StageRequest};
use crate::config::{ExecutorConfig, StageCommand};
use crate::design::Sample;
use crate::workflow::{SchedulerMode, StagePlan};
use crate::{Error, Result};

const PLACEHOLDER: &str = r"\{([a-z0-9_]+)\}";

/// Every placeholder a template may use
const KNOWN_PLACEHOLDERS: &[&str] = &[
    "workdir",
    "stage",
    "task",
    "mode",
    "threads",
    "index_dir",
    "methods",
    "p_value",
    "design",
    "samples",
    "stage_dir",
    "queue",
    "inputs",
    "organism",
    "fasta",
    "fasta_files",
    "annotation",
    "annotation_files",
    "sample",
    "sample_dir",
    "group",
    "fastq",
    "fastq_csv",
    "fastq1",
    "fastq2",
];

/// A template value: one word, or a list expanded to one word per element
#[derive(Debug, Clone, PartialEq)]
enum Value {
    One(String),
    Many(Vec<String>),
}

impl Value {
    fn path(path: &Path) -> Self {
        Value::One(path.display().to_string())
    }

    fn paths<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Self {
        Value::Many(paths.into_iter().map(|p| p.display().to_string()).collect())
    }

    fn render(&self, quote: bool) -> String {
        let word = |s: &str| {
            if quote {
                shell_words::quote(s).into_owned()
            } else {
                s.to_string()
            }
        };
        match self {
            Value::One(s) => word(s),
            Value::Many(items) => items.iter().map(|s| word(s)).collect::<Vec<_>>().join(" "),
        }
    }
}

type Vars = BTreeMap<&'static str, Value>;

/// Substitute `{name}` placeholders. With `quote`, values are shell-quoted
/// so the result can be split back into argv.
fn render(template: &str, vars: &Vars, quote: bool, task: &str) -> Result<String> {
    let re = Regex::new(PLACEHOLDER).map_err(|e| Error::Config(e.to_string()))?;

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let name = &caps[1];

        let value = match vars.get(name) {
            Some(value) => value,
            None if KNOWN_PLACEHOLDERS.contains(&name) => {
                return Err(Error::Config(format!(
                    "Placeholder {{{}}} has no value for task {}",
                    name, task
                )))
            }
            None => {
                return Err(Error::Config(format!(
                    "Unknown placeholder {{{}}} in template: {}",
                    name, template
                )))
            }
        };

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value.render(quote));
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn render_path(template: &str, vars: &Vars, task: &str) -> Result<PathBuf> {
    let rendered = render(template, vars, false, task)?;
    Ok(PathBuf::from(shellexpand::tilde(&rendered).as_ref()))
}

fn insert_sample(vars: &mut Vars, workdir: &Path, sample: &Sample) {
    vars.insert("sample", Value::One(sample.name.clone()));
    vars.insert("sample_dir", Value::path(&sample_dir(workdir, &sample.name)));
    vars.insert("group", Value::One(sample.group.clone()));
    vars.insert("fastq", Value::paths(sample.fastq.iter().map(PathBuf::as_path)));
    vars.insert(
        "fastq_csv",
        Value::One(
            sample
                .fastq
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(","),
        ),
    );
    if let Some(first) = sample.fastq.first() {
        vars.insert("fastq1", Value::path(first));
    }
    if let Some(second) = sample.fastq.get(1) {
        vars.insert("fastq2", Value::path(second));
    }
}

fn comma_joined(paths: &[&Path]) -> Value {
    Value::One(
        paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Executes stages by running their configured command templates
pub struct ShellExecutor {
    config: ExecutorConfig,
}

impl ShellExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Fail unless every group of the plan has a command template
    pub fn check_plan(&self, plan: &StagePlan) -> Result<()> {
        let missing: Vec<&str> = plan
            .groups()
            .map(|g| g.name())
            .filter(|name| !self.config.stages.contains_key(*name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "No command configured for {} in {} mode (add [executor.stages.<name>] tables)",
                missing.join(", "),
                plan.mode
            )))
        }
    }

    fn stage_command(&self, request: &StageRequest) -> Result<&StageCommand> {
        self.config
            .stages
            .get(request.stage.as_str())
            .ok_or_else(|| Error::Config(format!("No command configured for {}", request.stage)))
    }

    fn variables(&self, request: &StageRequest, command: &StageCommand) -> Result<Vars> {
        let params = &request.params;
        let mut vars = Vars::new();

        vars.insert("workdir", Value::path(&request.workdir));
        vars.insert("stage", Value::One(request.stage.to_string()));
        vars.insert("task", Value::One(request.task_id.clone()));
        vars.insert("mode", Value::One(request.mode.to_string()));
        vars.insert("threads", Value::One(request.threads.to_string()));
        vars.insert("index_dir", Value::path(&params.index_dir));
        vars.insert(
            "methods",
            Value::One(
                params
                    .methods
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        );
        vars.insert("p_value", Value::One(params.p_value.to_string()));
        vars.insert("design", Value::path(&params.design));
        vars.insert(
            "samples",
            Value::Many(request.samples.iter().map(|s| s.name.clone()).collect()),
        );
        vars.insert("stage_dir", Value::path(&request.stage_dir()));
        vars.insert("organism", Value::One(request.organism_tag().to_string()));
        if let Some(queue) = &params.queue {
            vars.insert("queue", Value::One(queue.clone()));
        }

        let (fasta, annotation): (Vec<&Path>, Vec<&Path>) =
            match request.organism.and_then(|o| request.references.get(o)) {
                Some(pair) => (
                    pair.fasta.iter().map(PathBuf::as_path).collect(),
                    pair.annotation.iter().map(PathBuf::as_path).collect(),
                ),
                None => (
                    request.references.all_fasta(),
                    request.references.all_annotation(),
                ),
            };
        vars.insert("fasta", comma_joined(&fasta));
        vars.insert("fasta_files", Value::paths(fasta));
        vars.insert("annotation", comma_joined(&annotation));
        vars.insert("annotation_files", Value::paths(annotation));

        if let Some(template) = &command.inputs {
            let mut inputs = Vec::with_capacity(request.samples.len());
            for sample in request.samples.iter() {
                let mut per_sample = vars.clone();
                insert_sample(&mut per_sample, &request.workdir, sample);
                inputs.push(render(template, &per_sample, false, &request.task_id)?);
            }
            vars.insert("inputs", Value::Many(inputs));
        }

        if let Some(sample) = &request.sample {
            insert_sample(&mut vars, &request.workdir, sample);
        }

        Ok(vars)
    }

    /// Rendered argv for a task, launcher prefix included
    fn command_line(
        &self,
        request: &StageRequest,
        command: &StageCommand,
        vars: &Vars,
    ) -> Result<Vec<String>> {
        let mut argv = Vec::new();

        if request.params.scheduler == SchedulerMode::Cluster {
            let launcher = self.config.launcher.as_deref().ok_or_else(|| {
                Error::Config("Cluster scheduler mode requires [executor] launcher".to_string())
            })?;
            argv.extend(split(&render(launcher, vars, true, &request.task_id)?)?);
        }

        argv.extend(split(&render(&command.command, vars, true, &request.task_id)?)?);
        Ok(argv
            .into_iter()
            .map(|arg| shellexpand::tilde(&arg).into_owned())
            .collect())
    }
}

fn split(line: &str) -> Result<Vec<String>> {
    shell_words::split(line).map_err(|e| Error::Command(format!("{}: {}", e, line)))
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

#[async_trait]
impl StageExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, request: StageRequest) -> Result<StageOutcome> {
        let command = self.stage_command(&request)?;
        let vars = self.variables(&request, command)?;
        let argv = self.command_line(&request, command, &vars)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Command(format!("Empty command for {}", request.stage)))?;

        std::fs::create_dir_all(request.output_dir())?;

        let log_path = request
            .workdir
            .join("logs")
            .join(request.stage.as_str())
            .join(format!("{}.log", request.task_id));
        let mut log = open_log(&log_path)?;
        writeln!(log, "$ {}", shell_words::join(&argv))?;

        let stdout_path = command
            .stdout
            .as_deref()
            .map(|t| render_path(t, &vars, &request.task_id))
            .transpose()?;
        let stdout = match &stdout_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Stdio::from(File::create(path)?)
            }
            None => Stdio::from(log.try_clone()?),
        };

        debug!("{}: {}", request.task_id, shell_words::join(&argv));

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::from(log.try_clone()?))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Command(format!("Failed to start {}: {}", program, e)))?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::Command(format!(
                "{} exited with {} (see {})",
                program,
                status,
                log_path.display()
            )));
        }

        let mut artifacts = Vec::with_capacity(command.outputs.len() + 1);
        for template in &command.outputs {
            let path = render_path(template, &vars, &request.task_id)?;
            let path = if path.is_relative() {
                request.workdir.join(path)
            } else {
                path
            };
            if !path.exists() {
                return Err(Error::Command(format!(
                    "{} did not produce {}",
                    program,
                    path.display()
                )));
            }
            artifacts.push(path);
        }
        artifacts.extend(stdout_path);

        info!("{} finished ({} artifact(s))", request.task_id, artifacts.len());
        Ok(StageOutcome::new(artifacts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{request, sample};
    use crate::reference::OrganismMode;
    use crate::workflow::{StageCatalog, StageKind};
    use std::sync::Arc;

    fn executor(stages: &[(StageKind, StageCommand)]) -> ShellExecutor {
        ShellExecutor::new(ExecutorConfig {
            launcher: Some("nice -n {threads}".to_string()),
            stages: stages
                .iter()
                .map(|(k, c)| (k.as_str().to_string(), c.clone()))
                .collect(),
        })
    }

    #[test]
    fn test_render_quotes_values() {
        let mut vars = Vars::new();
        vars.insert("sample_dir", Value::One("/work dir/S1".to_string()));
        vars.insert("fastq", Value::Many(vec!["a.fq".into(), "b c.fq".into()]));

        let line = render("tool -o {sample_dir}/out.bam {fastq}", &vars, true, "t").unwrap();
        assert_eq!(
            split(&line).unwrap(),
            vec!["tool", "-o", "/work dir/S1/out.bam", "a.fq", "b c.fq"]
        );

        let raw = render("{sample_dir}/out.bam", &vars, false, "t").unwrap();
        assert_eq!(raw, "/work dir/S1/out.bam");
    }

    #[test]
    fn test_render_rejects_bad_placeholders() {
        let vars = Vars::new();
        let err = render("tool {sample}", &vars, true, "merge-assemblies.run").unwrap_err();
        assert!(err.to_string().contains("no value for task merge-assemblies.run"));

        let err = render("tool {reads}", &vars, true, "t").unwrap_err();
        assert!(err.to_string().contains("Unknown placeholder {reads}"));
    }

    #[test]
    fn test_variables_for_sample_task() {
        let dir = tempfile::tempdir().unwrap();
        let command = StageCommand::new("hisat2");
        let exec = executor(&[(StageKind::Align, command.clone())]);
        let req = request(dir.path(), StageKind::Align, Some(sample("S1", "ctl")));

        let vars = exec.variables(&req, &command).unwrap();
        assert_eq!(vars["sample"], Value::One("S1".into()));
        assert_eq!(vars["group"], Value::One("ctl".into()));
        assert_eq!(vars["organism"], Value::One("prokarya".into()));
        assert_eq!(
            vars["fastq_csv"],
            Value::One("/data/S1_R1.fq.gz,/data/S1_R2.fq.gz".into())
        );
        assert_eq!(vars["fastq2"], Value::One("/data/S1_R2.fq.gz".into()));
        assert_eq!(
            vars["fasta"],
            Value::One("/ref/genome.fa,/ref/plasmid.fa".into())
        );
        assert_eq!(vars["methods"], Value::One("ballgown".into()));
        assert!(!vars.contains_key("queue"));
        assert!(!vars.contains_key("inputs"));
    }

    #[test]
    fn test_inputs_rendered_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let command =
            StageCommand::new("stringtie --merge {inputs}").inputs("{sample_dir}/{sample}.gtf");
        let exec = executor(&[(StageKind::MergeAssemblies, command.clone())]);
        let req = request(dir.path(), StageKind::MergeAssemblies, None);

        let vars = exec.variables(&req, &command).unwrap();
        let expected: Vec<String> = ["S1", "S2"]
            .iter()
            .map(|s| {
                dir.path()
                    .join("samples")
                    .join(s)
                    .join(format!("{}.gtf", s))
                    .display()
                    .to_string()
            })
            .collect();
        assert_eq!(vars["inputs"], Value::Many(expected));
        assert!(!vars.contains_key("sample"));
    }

    #[test]
    fn test_cluster_mode_prefixes_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let command = StageCommand::new("samtools sort {sample}");
        let exec = executor(&[(StageKind::Sort, command.clone())]);
        let mut req = request(dir.path(), StageKind::Sort, Some(sample("S2", "trt")));

        let vars = exec.variables(&req, &command).unwrap();
        assert_eq!(
            exec.command_line(&req, &command, &vars).unwrap(),
            vec!["samtools", "sort", "S2"]
        );

        let mut params = (*req.params).clone();
        params.scheduler = SchedulerMode::Cluster;
        req.params = Arc::new(params);
        assert_eq!(
            exec.command_line(&req, &command, &vars).unwrap(),
            vec!["nice", "-n", "4", "samtools", "sort", "S2"]
        );
    }

    #[test]
    fn test_check_plan_names_unconfigured_stages() {
        let exec = ShellExecutor::new(ExecutorConfig::default());
        let err = exec
            .check_plan(&StageCatalog::plan(OrganismMode::Dual))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("split-binary-by-organism"));
        assert!(message.contains("quantify-combined"));
        assert!(message.contains("differential-expression"));
        assert!(!message.contains("align-combined"));
    }

    #[test]
    fn test_check_plan_requires_differential_expression() {
        let mut config = ExecutorConfig::default();
        let err = ShellExecutor::new(config.clone())
            .check_plan(&StageCatalog::plan(OrganismMode::Eukaryote))
            .unwrap_err();
        assert!(err.to_string().contains("No command configured for differential-expression"));

        config.stages.insert(
            StageKind::DifferentialExpression.as_str().to_string(),
            StageCommand::new("Rscript de.R -e {design} -p {p_value} -o {stage_dir}"),
        );
        ShellExecutor::new(config)
            .check_plan(&StageCatalog::plan(OrganismMode::Eukaryote))
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_checks_declared_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&[
            (
                StageKind::ConvertToBinary,
                StageCommand::new("touch {sample_dir}/{sample}.bam")
                    .output("{sample_dir}/{sample}.bam"),
            ),
            (
                StageKind::Sort,
                StageCommand::new("true").output("{sample_dir}/{sample}.sorted.bam"),
            ),
        ]);

        let outcome = exec
            .execute(request(dir.path(), StageKind::ConvertToBinary, Some(sample("S1", "ctl"))))
            .await
            .unwrap();
        assert_eq!(
            outcome.artifacts,
            vec![dir.path().join("samples/S1/S1.bam")]
        );
        assert!(dir.path().join("logs/convert-to-binary/convert-to-binary.S1.log").exists());

        let err = exec
            .execute(request(dir.path(), StageKind::Sort, Some(sample("S1", "ctl"))))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not produce"));
    }

    #[tokio::test]
    async fn test_execute_redirects_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&[(
            StageKind::ExtractChromosomeNames,
            StageCommand::new("echo {samples}").stdout("{stage_dir}/names.txt"),
        )]);

        let outcome = exec
            .execute(request(dir.path(), StageKind::ExtractChromosomeNames, None))
            .await
            .unwrap();
        let out = dir.path().join("extract-chromosome-names/prokarya/names.txt");
        assert_eq!(outcome.artifacts, vec![out.clone()]);
        assert_eq!(std::fs::read_to_string(out).unwrap(), "S1 S2\n");
    }

    #[tokio::test]
    async fn test_execute_reports_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&[(StageKind::Align, StageCommand::new("false"))]);

        let err = exec
            .execute(request(dir.path(), StageKind::Align, Some(sample("S2", "trt"))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command(_)));
        assert!(err.to_string().contains("false exited with"));
    }
}
