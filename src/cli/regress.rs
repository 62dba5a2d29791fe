//! Symbolic regression of `x^4 + x^3 + x^2 + x`.

// Case indices become sample coordinates
#![allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]

use super::{CliError, OutputFormat};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::Serialize;
use stgp::error::FitnessError;
use stgp::program::{SyncMode, SyncScheduler, SyncTarget, SyncTrigger};
use stgp::{Candidate, Fitness, Operator, OperatorBuilder, OperatorSet, Program, ProgramConfig, ProgramState};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

/// Training cases.
const CASES: usize = 200;

/// A case counts as a hit when the error is below this.
const HIT_TOLERANCE: f64 = 0.01;

/// Options of the `regress` command.
#[derive(Debug)]
pub(crate) struct RegressArgs {
    pub config: Option<PathBuf>,
    pub population: Option<usize>,
    pub generations: Option<usize>,
    pub seed: Option<u64>,
    pub threads: Option<usize>,
    pub save: Option<PathBuf>,
    pub resume: Option<PathBuf>,
    pub sync_every: Option<usize>,
    pub top: usize,
    pub format: OutputFormat,
    pub progress: bool,
}

/// Operators of the regression problem; the context is `x`.
pub(crate) fn palette() -> Result<OperatorSet<f32>, CliError> {
    OperatorBuilder::<f32>::new()
        .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
        .with(Operator::new(|a: f32, b: f32| a - b).named("sub"))
        .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
        .with(Operator::new(|a: f32, b: f32| if b.abs() < 1e-6 { 1.0 } else { a / b }).named("div"))
        .with(Operator::with_context(|x: &f32| *x).named("x"))
        .with(Operator::ephemeral(|rng| rng.gen_range(-1.0f32..=1.0)).named("lit"))
        .build()
        .map_err(|e| CliError::new(format!("building operators: {e}")))
}

/// `(x, y)` pairs evenly spread over `[-5, 5]`.
pub(crate) fn cases() -> Vec<(f32, f64)> {
    (0..CASES)
        .map(|i| {
            let x = -5.0 + 10.0 * i as f64 / (CASES - 1) as f64;
            (x as f32, x.powi(4) + x.powi(3) + x.powi(2) + x)
        })
        .collect()
}

/// Sum of absolute errors; solved when every case is a hit.
pub(crate) fn score(
    cases: &[(f32, f64)],
    candidate: &mut Candidate<'_, f32>,
    fitness: &mut Fitness,
) -> Result<bool, FitnessError> {
    let mut error = 0.0;
    let mut hits = 0i64;
    for (x, y) in cases {
        let value: f32 = candidate.evaluate(x)?;
        let diff = (f64::from(value) - y).abs();
        let diff = if diff.is_finite() { diff } else { 1e12 };
        if diff < HIT_TOLERANCE {
            hits += 1;
        }
        error += diff;
    }
    fitness.raw = error;
    fitness.standardized = error;
    fitness.hits = hits;
    Ok(hits == cases.len() as i64)
}

/// One row of the statistics history.
#[derive(Debug, Serialize)]
pub(crate) struct GenerationSummary {
    pub generation: usize,
    pub best: f64,
    pub average: f64,
    pub worst: f64,
}

/// One of the best individuals.
#[derive(Debug, Serialize)]
pub(crate) struct BestTree {
    pub adjusted: f64,
    pub standardized: f64,
    pub hits: i64,
    pub size: usize,
    pub depth: usize,
    pub expression: String,
}

/// Everything printed at the end of a command.
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    pub generation: usize,
    pub history: Vec<GenerationSummary>,
    pub best: Vec<BestTree>,
}

impl Report {
    pub(crate) fn from_program(program: &Program<f32>, top: usize) -> Self {
        Self {
            generation: program.generation(),
            history: program
                .history()
                .iter()
                .enumerate()
                .map(|(generation, s)| GenerationSummary {
                    generation,
                    best: s.best_fitness,
                    average: s.average_fitness,
                    worst: s.worst_fitness,
                })
                .collect(),
            best: program
                .best_individuals(top)
                .into_iter()
                .map(|i| BestTree {
                    adjusted: i.fitness.adjusted,
                    standardized: i.fitness.standardized,
                    hits: i.fitness.hits,
                    size: i.tree.size(),
                    depth: i.tree.depth(),
                    expression: i.tree.to_sexpr(),
                })
                .collect(),
        }
    }

    pub(crate) fn print(&self, format: OutputFormat) -> Result<(), CliError> {
        match format {
            OutputFormat::Text => {
                println!("{:>5}  {:>10}  {:>10}  {:>10}", "gen", "best", "average", "worst");
                for row in &self.history {
                    println!(
                        "{:>5}  {:>10.6}  {:>10.6}  {:>10.6}",
                        row.generation, row.best, row.average, row.worst
                    );
                }
                println!();
                for (rank, best) in self.best.iter().enumerate() {
                    println!(
                        "#{} adjusted={:.6} error={:.4} hits={} size={} depth={}",
                        rank + 1,
                        best.adjusted,
                        best.standardized,
                        best.hits,
                        best.size,
                        best.depth
                    );
                    println!("   {}", best.expression);
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(self)?),
        }
        Ok(())
    }
}

fn load_config(args: &RegressArgs) -> Result<ProgramConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| CliError::new(format!("Failed to read {}: {e}", path.display())))?;
            serde_json::from_str(&text)?
        }
        None => ProgramConfig::default(),
    };
    if let Some(population) = args.population {
        config.population_size = population;
    }
    if let Some(generations) = args.generations {
        config.max_generations = generations;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    Ok(config)
}

/// Execute the regress command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a state file cannot be
/// read or written, or the run fails.
pub(crate) fn execute(args: &RegressArgs) -> Result<(), CliError> {
    let config = load_config(args)?;
    let generations = config.max_generations;
    let mut program = Program::new(palette()?, config)?;

    if let Some(path) = &args.resume {
        let file = File::open(path).map_err(|e| CliError::new(format!("Failed to open {}: {e}", path.display())))?;
        program.load_state(&mut BufReader::new(file))?;
    }
    if let (Some(path), Some(every)) = (&args.save, args.sync_every) {
        program.set_sync(Some(
            SyncScheduler::new(path, SyncTrigger::EveryGenerations(every))
                .with_mode(SyncMode::Overwrite)
                .with_target(SyncTarget::State),
        ));
    }

    let bar = if args.progress {
        let bar = ProgressBar::new(generations as u64 + 1);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} generations {msg}")
                .map_err(|e| CliError::new(e.to_string()))?
                .progress_chars("=>-"),
        );
        bar.set_position(program.history().len() as u64);
        Some(bar)
    } else {
        None
    };

    let cases = cases();
    let objective = |candidate: &mut Candidate<'_, f32>, fitness: &mut Fitness, _: usize| score(&cases, candidate, fitness);
    loop {
        let state = program.step(&objective)?;
        if let Some(bar) = &bar {
            if state == ProgramState::SelectAndVary || state == ProgramState::Terminate {
                bar.set_position(program.history().len() as u64);
                bar.set_message(format!("best={:.6}", program.stats().best_fitness));
            }
        }
        if state == ProgramState::Terminate {
            break;
        }
    }
    if let Some(bar) = bar {
        bar.finish_with_message(format!("best={:.6}", program.stats().best_fitness));
    }

    if let Some(path) = &args.save {
        let mut w = BufWriter::new(File::create(path)?);
        program.save_state(&mut w)?;
        w.flush()?;
    }

    Report::from_program(&program, args.top).print(args.format)
}
