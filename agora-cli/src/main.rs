//! # agora CLI
//!
//! Replays scripted stimuli against a ground network and prints what the
//! scripted actors observed.

mod config;
mod runner;
mod script;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{Config, OutputFormat};
use script::Script;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "agora")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "agora.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a script and print the events its actors observe
    Run {
        /// Script file (YAML)
        script: PathBuf,

        /// Output format (overrides the config file)
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Fixpoint bound per turn (overrides the config file)
        #[arg(long)]
        max_rounds: Option<usize>,
    },

    /// Validate a script without running it
    Check {
        /// Script file (YAML)
        script: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            script,
            format,
            max_rounds,
        } => run_script(config, &script, format, max_rounds),
        Commands::Check { script } => check_script(&script),
    }
}

fn load_script(path: &Path) -> anyhow::Result<script::Checked> {
    let script = Script::from_file(path).with_context(|| format!("reading {}", path.display()))?;
    script
        .check()
        .with_context(|| format!("checking {}", path.display()))
}

fn run_script(
    mut config: Config,
    path: &Path,
    format: Option<OutputFormat>,
    max_rounds: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(max_rounds) = max_rounds {
        config.network.max_rounds = max_rounds;
    }
    let checked = load_script(path)?;
    let report = runner::run(checked, config.network)
        .with_context(|| format!("running {}", path.display()))?;

    match format.unwrap_or(config.output) {
        OutputFormat::Text => print!("{}", report.to_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn check_script(path: &Path) -> anyhow::Result<()> {
    let checked = load_script(path)?;
    println!(
        "{}: {} actors, {} steps",
        path.display(),
        checked.actors.len(),
        checked.steps.len()
    );
    Ok(())
}
