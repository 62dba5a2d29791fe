//! stgp CLI - run and inspect strongly-typed genetic programming runs.

// Allow print in the CLI binary
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// stgp - A strongly-typed genetic programming engine
#[derive(Parser, Debug)]
#[command(name = "stgp")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Evolve a program for x^4 + x^3 + x^2 + x over [-5, 5]
    Regress {
        /// JSON file with a program configuration (missing fields use defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Population size
        #[arg(short, long)]
        population: Option<usize>,

        /// Number of generations
        #[arg(short, long)]
        generations: Option<usize>,

        /// Random seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Worker threads (0 = CPU count)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Write the final state to this file
        #[arg(long)]
        save: Option<PathBuf>,

        /// Continue from a saved state
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Also write the state to --save every N generations
        #[arg(long, requires = "save")]
        sync_every: Option<usize>,

        /// Number of best trees to print
        #[arg(short, long, default_value = "3")]
        top: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::OutputFormat,

        /// Show progress bar
        #[arg(long)]
        progress: bool,
    },

    /// Print the history and best trees of a saved regression state
    Inspect {
        /// State file written by `regress --save`
        #[arg(required = true)]
        state: PathBuf,

        /// Number of best trees to print
        #[arg(short, long, default_value = "5")]
        top: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::OutputFormat,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Commands::Regress {
            config,
            population,
            generations,
            seed,
            threads,
            save,
            resume,
            sync_every,
            top,
            format,
            progress,
        } => cli::regress::execute(&cli::regress::RegressArgs {
            config,
            population,
            generations,
            seed,
            threads,
            save,
            resume,
            sync_every,
            top,
            format,
            progress,
        }),

        Commands::Inspect { state, top, format } => cli::inspect::execute(&state, top, format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
