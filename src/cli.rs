//! Command-line interface for storyforge.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::fs;
use tracing_subscriber::EnvFilter;

use crate::{Config, JobConfig, JobId, ResumeOutcome, Storyforge};

/// storyforge - resumable generation pipeline for personalized storybooks
#[derive(Parser)]
#[command(name = "storyforge", version)]
#[command(about = "Generate personalized illustrated storybooks through a resumable pipeline")]
#[command(long_about = r#"
storyforge turns a personalization request (child description, optional
reference photo, visual style) into a multi-page illustrated book. Every
stage persists its output before moving on, so a crashed or failed job is
resumed from where it left off, never restarted from scratch.

EXAMPLES:
  # Submit a job described in a TOML file and confirm payment right away
  storyforge submit job.toml --paid

  # Check on a job
  storyforge status 6f0d8f0a-9e1b-4c58-8b0a-1f2e3d4c5b6a

  # Push a specific job forward
  storyforge resume 6f0d8f0a-9e1b-4c58-8b0a-1f2e3d4c5b6a

  # Run the scheduler loop (picks up failed and interrupted jobs)
  storyforge run
"#)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "storyforge.toml")]
    config: Utf8PathBuf,

    /// Verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new job from a TOML job description
    Submit {
        /// Path to the job description (deserialized as a JobConfig).
        job_file: Utf8PathBuf,
        /// Confirm payment immediately after submission.
        #[arg(long)]
        paid: bool,
    },
    /// Print the persisted record of a job as JSON
    Status {
        job_id: String,
    },
    /// Resume one job through the scheduler
    Resume {
        job_id: String,
    },
    /// Run a single sweep pass and report what it did
    Sweep,
    /// Run the sweep loop until interrupted
    Run,
}

/// Parse arguments, set up logging, dispatch.
///
/// # Errors
/// Anything the invoked subcommand raises; the binary maps this to a
/// non-zero exit.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    match cli.command {
        Command::Submit { job_file, paid } => {
            let raw = fs::read_to_string(&job_file)
                .with_context(|| format!("reading job file {job_file}"))?;
            let job_config: JobConfig =
                toml::from_str(&raw).with_context(|| format!("parsing job file {job_file}"))?;

            let storyforge = Storyforge::open(config)?;
            let job_id = storyforge.submit(job_config)?;
            if paid {
                storyforge.confirm_payment(&job_id)?;
            }
            println!("{job_id}");
        }
        Command::Status { job_id } => {
            let job_id: JobId = job_id.parse().context("invalid job id")?;
            let storyforge = Storyforge::open(config)?;
            let record = storyforge.get_status(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Resume { job_id } => {
            let job_id: JobId = job_id.parse().context("invalid job id")?;
            let storyforge = Storyforge::open(config)?;
            let outcome = storyforge.resume(&job_id).await?;
            print_outcome(&job_id, &outcome);
        }
        Command::Sweep => {
            let storyforge = Storyforge::open(config)?;
            match storyforge.sweep_once().await? {
                Some((job_id, outcome)) => print_outcome(&job_id, &outcome),
                None => println!("nothing to do"),
            }
        }
        Command::Run => {
            let storyforge = Storyforge::open(config)?;
            storyforge.run().await
        }
    }

    Ok(())
}

fn print_outcome(job_id: &JobId, outcome: &ResumeOutcome) {
    match outcome {
        ResumeOutcome::Completed => println!("{job_id}: complete"),
        ResumeOutcome::Busy => println!("{job_id}: busy (another resume is running)"),
        ResumeOutcome::NotPaid => println!("{job_id}: waiting for payment confirmation"),
        ResumeOutcome::Terminal(status) => println!("{job_id}: already {status}"),
        ResumeOutcome::Failed { message } => println!("{job_id}: failed: {message}"),
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}
