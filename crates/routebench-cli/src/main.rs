//! routebench command line.
//!
//! ```text
//! routebench run sweep.yaml --iterations 5 --checkpoint progress.json
//! routebench report sweep.yaml --checkpoint progress.json --format json
//! routebench validate sweep.yaml
//! ```

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use routebench_core::{Checkpoint, MetricsReducer, Report};
use routebench_runtime::{PromptStore, ProviderRegistry, SweepControllerBuilder, SweepFile, SweepOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "routebench",
    version,
    about = "Measure how consistently LLM providers route the same request"
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sweep and print the report
    Run {
        /// Sweep file (YAML)
        sweep: PathBuf,

        /// Override iterations per (prompt version, provider)
        #[arg(long)]
        iterations: Option<u32>,

        /// Override the number of concurrent provider calls
        #[arg(long)]
        concurrency: Option<usize>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write the aggregator state here when the sweep ends
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Continue from a checkpoint written by an earlier run
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Print the report stored in a checkpoint
    Report {
        /// Sweep file the checkpoint was written for
        sweep: PathBuf,

        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Check a sweep file without calling any provider
    Validate {
        sweep: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = main_impl(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main_impl(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            sweep,
            iterations,
            concurrency,
            format,
            checkpoint,
            resume,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.block_on(run_sweep(
                &sweep,
                iterations,
                concurrency,
                format,
                checkpoint.as_deref(),
                resume.as_deref(),
            ))
        }
        Command::Report {
            sweep,
            checkpoint,
            format,
        } => report_checkpoint(&sweep, &checkpoint, format),
        Command::Validate { sweep } => validate_sweep(&sweep),
    }
}

fn load_sweep(path: &Path) -> Result<SweepFile> {
    SweepFile::from_file(path).with_context(|| format!("failed to load sweep {}", path.display()))
}

fn load_prompts(sweep: &SweepFile) -> Result<PromptStore> {
    match &sweep.prompts {
        Some(path) => PromptStore::from_yaml_file(path)
            .with_context(|| format!("failed to load prompts {}", path.display())),
        None => Ok(PromptStore::builtin()),
    }
}

async fn run_sweep(
    path: &Path,
    iterations: Option<u32>,
    concurrency: Option<usize>,
    format: OutputFormat,
    checkpoint: Option<&Path>,
    resume: Option<&Path>,
) -> Result<()> {
    let mut sweep = load_sweep(path)?;
    if let Some(n) = iterations {
        sweep = sweep.with_iterations(n).context("invalid --iterations")?;
    }
    if let Some(n) = concurrency {
        sweep = sweep.with_concurrency(n).context("invalid --concurrency")?;
    }

    let registry = ProviderRegistry::with_defaults();
    let prompts = load_prompts(&sweep)?;
    let mut builder = SweepControllerBuilder::from_sweep_file(&sweep, &registry, prompts)
        .context("failed to configure providers")?;

    if let Some(resume) = resume {
        let saved = Checkpoint::read_from(resume)
            .with_context(|| format!("failed to read checkpoint {}", resume.display()))?;
        builder = builder
            .resume_from(saved)
            .context("checkpoint does not match this sweep")?;
    }

    let controller = builder.build().context("invalid sweep")?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::warn!("Interrupted, reporting partial results"),
            Err(err) => {
                tracing::debug!(error = %err, "Ctrl-C handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    let outcome = controller.run_until(shutdown).await;

    if let Some(path) = checkpoint {
        controller
            .checkpoint()
            .write_to(path)
            .with_context(|| format!("failed to write checkpoint {}", path.display()))?;
        tracing::info!(path = %path.display(), "Checkpoint written");
    }

    print_outcome(&outcome, format)
}

fn print_outcome(outcome: &SweepOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", render::render_text(&outcome.report));
            print!("{}", render::render_run_footer(outcome));
        }
        OutputFormat::Json => {
            println!("{}", render::render_json_outcome(outcome)?);
        }
    }
    Ok(())
}

fn report_checkpoint(path: &Path, checkpoint: &Path, format: OutputFormat) -> Result<()> {
    let sweep = load_sweep(path)?;
    let saved = Checkpoint::read_from(checkpoint)
        .with_context(|| format!("failed to read checkpoint {}", checkpoint.display()))?;
    let aggregator = saved
        .into_aggregator(&sweep.scenario)
        .context("checkpoint does not match this sweep")?;

    let report = MetricsReducer::new(&sweep.scenario).reduce_all(&aggregator);
    print_report(&report, format)
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render::render_text(report)),
        OutputFormat::Json => println!("{}", render::render_json_report(report)?),
    }
    Ok(())
}

fn validate_sweep(path: &Path) -> Result<()> {
    let sweep = load_sweep(path)?;
    let registry = ProviderRegistry::with_defaults();

    for id in &sweep.scenario.providers {
        if let Some(spec) = sweep.providers.get(id) {
            registry
                .validate(&spec.provider_type, &spec.factory_config())
                .with_context(|| format!("provider '{}' is misconfigured", id))?;
            println!(
                "  {}: {} ({})",
                id,
                spec.provider_type,
                registry.description(&spec.provider_type).unwrap_or("")
            );
        }
    }

    let prompts = load_prompts(&sweep)?;
    prompts
        .ensure_versions(&sweep.scenario.prompt_versions)
        .context("scenario names a prompt version that is not defined")?;

    let scenario = &sweep.scenario;
    println!(
        "OK: {} ({} versions x {} providers x {} iterations = {} calls)",
        scenario.title(),
        scenario.prompt_versions.len(),
        scenario.providers.len(),
        scenario.iterations_per_config,
        scenario.total_iterations()
    );
    Ok(())
}
