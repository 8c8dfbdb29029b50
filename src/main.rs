//! rnaflow CLI
//!
//! Staged RNA-seq workflow runs for prokaryotic, eukaryotic and dual-organism
//! experiments.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rnaflow::executor::{create_executor, ShellExecutor};
use rnaflow::workflow::{SchedulerMode, StageCatalog};
use rnaflow::{
    Config, DeMethod, OrganismMode, ReferenceInputs, RunInputs, WorkflowOrchestrator, WorkflowRun,
};

#[derive(Parser)]
#[command(name = "rnaflow")]
#[command(author, version, about = "Staged RNA-seq workflow orchestration")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate inputs and run every stage
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Log each task instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the design and references without running anything
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },

    /// Show the stage plan of an organism mode
    Plan {
        /// Organism mode: prokarya, eukarya or both
        #[arg(long, short)]
        mode: OrganismMode,
    },

    /// Show current configuration
    Config,

    /// Write the default configuration to .rnaflow/config.toml
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct InputArgs {
    /// Working directory receiving every output
    #[arg(long, short, default_value = ".")]
    workdir: PathBuf,

    /// Tab-delimited experiment design file
    #[arg(long, short)]
    design: PathBuf,

    /// Organism mode: prokarya, eukarya or both
    #[arg(long, short)]
    mode: OrganismMode,

    /// Directory holding the alignment index (default: <workdir>/index)
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// Prokaryotic reference fasta (comma-separated for several)
    #[arg(long)]
    fasta_prok: Option<String>,

    /// Prokaryotic annotation (comma-separated for several)
    #[arg(long)]
    gff_prok: Option<String>,

    /// Eukaryotic reference fasta (comma-separated for several)
    #[arg(long)]
    fasta_euk: Option<String>,

    /// Eukaryotic annotation (comma-separated for several)
    #[arg(long)]
    gff_euk: Option<String>,

    /// Differential expression methods: edgeR, DESeq2, ballgown
    #[arg(long, default_value = "ballgown")]
    method: String,

    /// Significance threshold for differential expression
    #[arg(long, default_value_t = 0.001)]
    p_value: f64,

    /// CPU threads per task (overrides the configuration)
    #[arg(long, short)]
    threads: Option<usize>,

    /// Where tasks run: local or cluster
    #[arg(long, default_value = "local")]
    scheduler: SchedulerMode,

    /// Cluster queue (required with --scheduler cluster)
    #[arg(long, env = "RNAFLOW_QUEUE")]
    queue: Option<String>,
}

impl InputArgs {
    fn into_run_inputs(self) -> rnaflow::Result<RunInputs> {
        Ok(RunInputs {
            workdir: self.workdir,
            design: self.design,
            mode: self.mode,
            references: ReferenceInputs {
                prokaryote_fasta: self.fasta_prok,
                prokaryote_annotation: self.gff_prok,
                eukaryote_fasta: self.fasta_euk,
                eukaryote_annotation: self.gff_euk,
            },
            methods: DeMethod::parse_list(&self.method)?,
            p_value: self.p_value,
            index_dir: self.index_dir,
            threads: self.threads,
            scheduler: self.scheduler,
            queue: self.queue,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { inputs, dry_run } => {
            run_workflow(inputs, &config, dry_run).await?;
        }

        Commands::Check { inputs } => {
            let run = WorkflowRun::prepare(inputs.into_run_inputs()?, &config)?;
            ShellExecutor::new(config.executor.clone()).check_plan(&run.plan)?;

            println!("Mode: {}", run.mode);
            println!("Samples:");
            for sample in run.samples.iter() {
                println!(
                    "  {} [{}] {} fastq file(s)",
                    sample.name,
                    sample.group,
                    sample.fastq.len()
                );
            }
            println!("References:");
            for pair in run.references.pairs() {
                for (role, path) in pair.paths() {
                    println!("  {} {}: {}", pair.organism, role, path.display());
                }
            }
            println!("Preflight passed");
        }

        Commands::Plan { mode } => {
            let plan = StageCatalog::plan(mode);
            plan.validate()?;
            print!("{}", plan);
        }

        Commands::Config => {
            let content = toml::to_string_pretty(&config)
                .map_err(|e| rnaflow::Error::Config(e.to_string()))?;
            println!("{}", content);
        }

        Commands::Init { force } => {
            let path = rnaflow::config::init(force)?;
            info!("Wrote default configuration to {:?}", path);
        }
    }

    Ok(())
}

async fn run_workflow(inputs: InputArgs, config: &Config, dry_run: bool) -> anyhow::Result<()> {
    let run = WorkflowRun::prepare(inputs.into_run_inputs()?, config)?;
    if !dry_run {
        ShellExecutor::new(config.executor.clone()).check_plan(&run.plan)?;
    }

    std::fs::create_dir_all(&run.workdir)
        .with_context(|| format!("Failed to create working directory {:?}", run.workdir))?;
    let state_dir = run.workdir.join(&config.state_dir);

    let orchestrator = WorkflowOrchestrator::new(create_executor(config, dry_run));
    let report = orchestrator.execute(run).await;

    let path = report
        .save(&state_dir)
        .context("Failed to save run report")?;
    println!("{}", report.summary());
    info!("Run report saved to {:?}", path);

    report.result()?;
    Ok(())
}
