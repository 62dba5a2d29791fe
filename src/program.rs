//! The generational driver.
//!
//! A [`Program`] owns the operator set, the current and next population,
//! the statistics history and a worker pool. Each call to
//! [`Program::step`] advances one state:
//!
//! ```text
//! Initial ─▶ Evaluate ─▶ Report ─▶ SelectAndVary ─▶ Swap ─┐
//!               ▲           │                             │
//!               │           ▼                             │
//!               │       Terminate                         │
//!               └─────────────────────────────────────────┘
//! ```
//!
//! Every parallel task draws from its own generator seeded from
//! `(seed, generation, slot)`, so a run is reproducible regardless of how
//! work is scheduled across threads.

mod config;
mod sync;

pub use config::ProgramConfig;
pub use sync::{SyncMode, SyncScheduler, SyncTarget, SyncTrigger};

use crate::error::{ConfigError, FitnessError, GenerationError, ProgramError, ProgramResult, SerializationError};
use crate::eval::{Candidate, EvaluationContext};
use crate::gp::{Crossover, Fitness, Grow, Individual, Mutation, Population, PopulationStats, Selector};
use crate::operator::OperatorSet;
use crate::serialize;
use crate::tree::Tree;
use crate::types::TypeId;
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Where the driver is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    /// No population yet.
    Initial,
    /// The current population awaits scoring.
    Evaluate,
    /// Offspring are being produced into the next population.
    SelectAndVary,
    /// The next population replaces the current one.
    Swap,
    /// Statistics of the evaluated population are recorded.
    Report,
    /// The run is over.
    Terminate,
}

const CROSSOVER: usize = 0;
const MUTATION: usize = 1;

fn splitmix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn task_rng(seed: u64, generation: usize, slot: usize) -> SmallRng {
    SmallRng::seed_from_u64(splitmix(splitmix(splitmix(seed) ^ generation as u64) ^ slot as u64))
}

struct Selectors {
    crossover: Box<dyn Selector>,
    mutation: Box<dyn Selector>,
    reproduction: Box<dyn Selector>,
}

impl Selectors {
    fn pre_process(&mut self, population: &Population, stats: &PopulationStats) -> ProgramResult<()> {
        self.crossover.pre_process(population, stats)?;
        self.mutation.pre_process(population, stats)?;
        self.reproduction.pre_process(population, stats)?;
        Ok(())
    }
}

/// A genetic programming run over operators with context `Ctx`.
pub struct Program<Ctx> {
    operators: OperatorSet<Ctx>,
    config: ProgramConfig,
    pool: ThreadPool,
    root_type: TypeId,
    variation: WeightedIndex<f64>,
    crossover: Box<dyn Crossover>,
    mutation: Box<dyn Mutation>,
    selectors: Selectors,
    population: Population,
    next: Population,
    stats: PopulationStats,
    history: Vec<PopulationStats>,
    generation: usize,
    state: ProgramState,
    solved: bool,
    terminate: Arc<AtomicBool>,
    sync: Option<SyncScheduler>,
}

impl<Ctx> fmt::Debug for Program<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("population", &self.population.len())
            .field("root_type", &self.root_type)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<Ctx> Program<Ctx> {
    /// Create a program. No individual exists until the first [`step`](Self::step).
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Config`] if the configuration is invalid or
    /// no operator produces a usable root type, and
    /// [`ProgramError::ThreadPool`] if the workers cannot be started.
    pub fn new(operators: OperatorSet<Ctx>, config: ProgramConfig) -> ProgramResult<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("stgp-worker-{i}"))
            .build()
            .map_err(|e| ProgramError::ThreadPool(e.to_string()))?;
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let root_type = operators
            .pick_root_type(&mut rng)
            .map_err(|_| ConfigError::EmptyRootType)?;
        let variation = WeightedIndex::new(config.chances()).map_err(|_| ConfigError::InvalidChances)?;
        debug!(
            threads = pool.current_num_threads(),
            root = operators.types().info(root_type).name(),
            "program created"
        );
        Ok(Self {
            crossover: config.crossover.build(),
            mutation: config.mutation.build(),
            selectors: Selectors {
                crossover: config.crossover_selection.build(),
                mutation: config.mutation_selection.build(),
                reproduction: config.reproduction_selection.build(),
            },
            operators,
            pool,
            root_type,
            variation,
            population: Population::default(),
            next: Population::default(),
            stats: PopulationStats::default(),
            history: Vec::new(),
            generation: 0,
            state: ProgramState::Initial,
            solved: false,
            terminate: Arc::new(AtomicBool::new(false)),
            sync: None,
            config,
        })
    }

    /// Build the initial population with the configured initializer.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Generation`] if a tree cannot be generated.
    pub fn generate_initial_population(&mut self) -> ProgramResult<()> {
        let registry = self.operators.registry();
        let config = &self.config;
        let root = self.root_type;
        let grow = Grow {
            terminal_chance: config.grow_terminal_chance,
        };
        let individuals: Result<Vec<Individual>, GenerationError> = self.pool.install(|| {
            (0..config.population_size)
                .into_par_iter()
                .map(|index| {
                    let mut rng = task_rng(config.seed, 0, index);
                    let mut tree = Tree::new(Arc::clone(registry));
                    config.initializer.initialize(
                        index,
                        &mut tree,
                        root,
                        config.initial_min_tree_size,
                        config.initial_max_tree_size,
                        grow,
                        &mut rng,
                    )?;
                    Ok(Individual::new(tree))
                })
                .collect()
        });
        self.population = Population::new(individuals?);
        self.next.clear();
        self.history.clear();
        self.generation = 0;
        self.solved = false;
        self.state = ProgramState::Evaluate;
        Ok(())
    }

    /// Score every individual in parallel and recompute the statistics.
    ///
    /// Returns true if the fitness function reported a solution for any
    /// individual.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Fitness`] if the fitness function fails for
    /// any individual; the generation is then abandoned.
    pub fn evaluate_fitness<F>(&mut self, fitness: &F) -> ProgramResult<bool>
    where
        F: Fn(&mut Candidate<'_, Ctx>, &mut Fitness, usize) -> Result<bool, FitnessError> + Sync,
    {
        let operators = &self.operators;
        let min_len = self.config.evaluation_size.max(1);
        let population = self.population.as_mut_slice();
        let solved: Result<Vec<bool>, FitnessError> = self.pool.install(|| {
            population
                .par_iter_mut()
                .enumerate()
                .with_min_len(min_len)
                .map_init(EvaluationContext::new, |scratch, (index, individual)| {
                    let mut score = Fitness::unscored();
                    let mut candidate = Candidate::new(&individual.tree, operators, scratch);
                    let solved = fitness(&mut candidate, &mut score, index)?;
                    score.finalize();
                    individual.fitness = score;
                    Ok(solved)
                })
                .collect()
        });
        let solved = solved?.into_iter().any(|s| s);
        self.stats = PopulationStats::from_population(&self.population);
        Ok(solved)
    }

    fn capped(&self, child: Tree, parent: &Tree) -> Tree {
        let depth = child.depth();
        if depth > self.config.max_tree_depth {
            debug!(depth, max = self.config.max_tree_depth, "offspring too deep, keeping parent");
            parent.clone()
        } else {
            child
        }
    }

    fn mutated(&self, parent: &Tree, rng: &mut SmallRng) -> Tree {
        let mut child = parent.clone();
        match self.mutation.apply(&mut child, rng) {
            Ok(()) => self.capped(child, parent),
            Err(error) => {
                debug!(%error, "mutation failed, keeping parent");
                parent.clone()
            }
        }
    }

    /// Produce the two offspring of one pair slot.
    fn vary(&self, rng: &mut SmallRng) -> (Tree, Tree) {
        let population = &self.population;
        match self.variation.sample(rng) {
            CROSSOVER => {
                let p1 = self.selectors.crossover.select(population, rng);
                let p2 = self.selectors.crossover.select(population, rng);
                match self.crossover.apply(p1, p2, rng) {
                    Ok((c1, c2)) => (self.capped(c1, p1), self.capped(c2, p2)),
                    Err(error) if self.config.try_mutation_on_crossover_failure => {
                        debug!(%error, "crossover failed, mutating instead");
                        (self.mutated(p1, rng), self.mutated(p2, rng))
                    }
                    Err(error) => {
                        debug!(%error, "crossover failed, copying parents");
                        (p1.clone(), p2.clone())
                    }
                }
            }
            MUTATION => {
                let p1 = self.selectors.mutation.select(population, rng);
                let p2 = self.selectors.mutation.select(population, rng);
                (self.mutated(p1, rng), self.mutated(p2, rng))
            }
            _ => {
                let p1 = self.selectors.reproduction.select(population, rng);
                let p2 = self.selectors.reproduction.select(population, rng);
                (p1.clone(), p2.clone())
            }
        }
    }

    /// Fill the next population with elites and offspring of the current one.
    ///
    /// # Errors
    ///
    /// Returns [`ProgramError::Selection`] if a selector cannot work on the
    /// current population.
    pub fn create_next_generation(&mut self) -> ProgramResult<()> {
        self.selectors.pre_process(&self.population, &self.stats)?;
        let size = self.config.population_size;
        let elites = self.config.elites.min(self.population.len());
        let mut next: Vec<Individual> = Vec::with_capacity(size);
        next.extend(
            self.population
                .best_indexes(elites)
                .into_iter()
                .map(|i| Individual::new(self.population[i].tree.clone())),
        );

        let pairs = (size - next.len()).div_ceil(2);
        let generation = self.generation + 1;
        let this = &*self;
        let offspring: Vec<(Tree, Tree)> = self.pool.install(|| {
            (0..pairs)
                .into_par_iter()
                .map(|pair| this.vary(&mut task_rng(this.config.seed, generation, pair)))
                .collect()
        });
        for (a, b) in offspring {
            for tree in [a, b] {
                if next.len() < size {
                    next.push(Individual::new(tree));
                }
            }
        }
        self.next = Population::new(next);
        Ok(())
    }

    /// Make the next population current.
    pub fn next_generation(&mut self) {
        std::mem::swap(&mut self.population, &mut self.next);
        self.next.clear();
        self.generation += 1;
        self.solved = false;
    }

    fn report(&mut self) {
        self.history.push(self.stats.clone());
        info!(
            generation = self.generation,
            best = self.stats.best_fitness,
            average = self.stats.average_fitness,
            worst = self.stats.worst_fitness,
            "generation evaluated"
        );
        if let Some(mut sync) = self.sync.take() {
            if sync.due(self.generation) {
                match self.flush(&sync) {
                    Ok(()) => debug!(path = %sync.path().display(), "synced"),
                    Err(error) => warn!(%error, path = %sync.path().display(), "sync failed"),
                }
            }
            self.sync = Some(sync);
        }
    }

    fn flush(&self, sync: &SyncScheduler) -> Result<(), SerializationError> {
        let mut w = sync.open().map_err(SerializationError::Io)?;
        match sync.target() {
            SyncTarget::Generation => self.save_generation(&mut w)?,
            SyncTarget::State => self.save_state(&mut w)?,
        }
        w.flush().map_err(SerializationError::Io)
    }

    /// Advance one state and return the new one.
    ///
    /// The termination flag is honoured before anything else happens.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the phase that ran.
    pub fn step<F>(&mut self, fitness: &F) -> ProgramResult<ProgramState>
    where
        F: Fn(&mut Candidate<'_, Ctx>, &mut Fitness, usize) -> Result<bool, FitnessError> + Sync,
    {
        if self.terminate.load(Ordering::Relaxed) {
            self.state = ProgramState::Terminate;
        }
        self.state = match self.state {
            ProgramState::Initial => {
                self.generate_initial_population()?;
                ProgramState::Evaluate
            }
            ProgramState::Evaluate => {
                self.solved = self.evaluate_fitness(fitness)?;
                ProgramState::Report
            }
            ProgramState::Report => {
                self.report();
                if self.solved || self.generation >= self.config.max_generations {
                    ProgramState::Terminate
                } else {
                    ProgramState::SelectAndVary
                }
            }
            ProgramState::SelectAndVary => {
                self.create_next_generation()?;
                ProgramState::Swap
            }
            ProgramState::Swap => {
                self.next_generation();
                ProgramState::Evaluate
            }
            ProgramState::Terminate => ProgramState::Terminate,
        };
        Ok(self.state)
    }

    /// Step until the run terminates.
    ///
    /// # Errors
    ///
    /// As for [`step`](Self::step).
    pub fn run<F>(&mut self, fitness: &F) -> ProgramResult<()>
    where
        F: Fn(&mut Candidate<'_, Ctx>, &mut Fitness, usize) -> Result<bool, FitnessError> + Sync,
    {
        loop {
            if self.step(fitness)? == ProgramState::Terminate {
                return Ok(());
            }
        }
    }

    /// The `n` fittest individuals, best first.
    #[must_use]
    pub fn best_individuals(&self, n: usize) -> Vec<&Individual> {
        self.population
            .best_indexes(n)
            .into_iter()
            .map(|i| &self.population[i])
            .collect()
    }

    /// Trees of the `n` fittest individuals, best first.
    #[must_use]
    pub fn best_trees(&self, n: usize) -> Vec<&Tree> {
        self.best_individuals(n).into_iter().map(|i| &i.tree).collect()
    }

    /// Statistics of every reported generation.
    #[must_use]
    pub fn history(&self) -> &[PopulationStats] {
        &self.history
    }

    /// Statistics of the last evaluation.
    #[must_use]
    pub fn stats(&self) -> &PopulationStats {
        &self.stats
    }

    /// Index of the current generation.
    #[must_use]
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ProgramState {
        self.state
    }

    /// Current population.
    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Operators in use.
    #[must_use]
    pub fn operators(&self) -> &OperatorSet<Ctx> {
        &self.operators
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    /// Type every tree returns.
    #[must_use]
    pub fn root_type(&self) -> TypeId {
        self.root_type
    }

    /// Handle that stops the run at the next step when set.
    #[must_use]
    pub fn terminator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    /// Flush to disk on a schedule after every report.
    pub fn set_sync(&mut self, sync: Option<SyncScheduler>) {
        self.sync = sync;
    }

    /// Write the palette, statistics and population.
    ///
    /// # Errors
    ///
    /// See [`serialize::write_state`].
    pub fn save_state(&self, w: &mut impl Write) -> Result<(), SerializationError> {
        serialize::write_state(w, self.operators.registry(), &self.history, &self.stats, &self.population)
    }

    /// Replace statistics and population with a saved state.
    ///
    /// The program continues with selection, as if the saved run had just
    /// reported its last generation.
    ///
    /// # Errors
    ///
    /// See [`serialize::read_state`]. The program is unchanged on error.
    pub fn load_state(&mut self, r: &mut impl Read) -> Result<(), SerializationError> {
        let saved = serialize::read_state(r, self.operators.registry())?;
        self.generation = saved.history.len().saturating_sub(1);
        self.history = saved.history;
        self.stats = saved.stats;
        self.population = saved.population;
        self.next.clear();
        self.solved = false;
        self.state = if self.population.is_empty() {
            ProgramState::Initial
        } else {
            ProgramState::SelectAndVary
        };
        Ok(())
    }

    /// Write the current population with its fitness.
    ///
    /// # Errors
    ///
    /// See [`serialize::write_generation`].
    pub fn save_generation(&self, w: &mut impl Write) -> Result<(), SerializationError> {
        serialize::write_generation(w, &self.population)
    }

    /// Replace the population; it is re-evaluated at the next step.
    ///
    /// # Errors
    ///
    /// See [`serialize::read_generation`]. The program is unchanged on error.
    pub fn load_generation(&mut self, r: &mut impl Read) -> Result<(), SerializationError> {
        self.population = serialize::read_generation(r, self.operators.registry())?;
        self.next.clear();
        self.solved = false;
        self.state = ProgramState::Evaluate;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::arithmetic;

    fn small() -> ProgramConfig {
        ProgramConfig {
            population_size: 40,
            max_generations: 5,
            initial_min_tree_size: 1,
            initial_max_tree_size: 3,
            max_tree_depth: 8,
            threads: 2,
            evaluation_size: 4,
            ..ProgramConfig::default()
        }
    }

    fn target(candidate: &mut Candidate<'_, f32>, fitness: &mut Fitness, _: usize) -> Result<bool, FitnessError> {
        let mut error = 0.0f64;
        for i in 0..10u8 {
            let x = f32::from(i) / 5.0;
            let y: f32 = candidate.evaluate(&x)?;
            error += f64::from((y - (x * x + x)).abs());
        }
        fitness.raw = error;
        fitness.standardized = error;
        Ok(false)
    }

    #[test]
    fn test_state_machine_cycle() {
        let mut program = Program::new(arithmetic(), small()).unwrap();
        assert_eq!(program.state(), ProgramState::Initial);
        let expected = [
            ProgramState::Evaluate,
            ProgramState::Report,
            ProgramState::SelectAndVary,
            ProgramState::Swap,
            ProgramState::Evaluate,
        ];
        for state in expected {
            assert_eq!(program.step(&target).unwrap(), state);
        }
        assert_eq!(program.generation(), 1);
        assert_eq!(program.population().len(), 40);
    }

    #[test]
    fn test_run_records_history() {
        let mut program = Program::new(arithmetic(), small()).unwrap();
        program.run(&target).unwrap();
        assert_eq!(program.history().len(), 6);
        assert_eq!(program.generation(), 5);
        for individual in program.population().iter() {
            individual.tree.check().unwrap();
            assert!(individual.tree.depth() <= 8);
            assert!(individual.fitness.adjusted > 0.0);
        }
        // Elitism keeps the best fitness from getting worse.
        let best: Vec<f64> = program.history().iter().map(|s| s.best_fitness).collect();
        assert!(best.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_same_seed_same_run() {
        let mut a = Program::new(arithmetic(), small()).unwrap();
        let mut b = Program::new(
            arithmetic(),
            ProgramConfig {
                threads: 3,
                ..small()
            },
        )
        .unwrap();
        a.run(&target).unwrap();
        b.run(&target).unwrap();
        assert_eq!(a.history(), b.history());
    }

    #[test]
    fn test_solution_stops_run() {
        let mut program = Program::new(arithmetic(), small()).unwrap();
        let solved = |_: &mut Candidate<'_, f32>, f: &mut Fitness, index: usize| -> Result<bool, FitnessError> {
            f.standardized = 1.0;
            Ok(index == 3)
        };
        program.run(&solved).unwrap();
        assert_eq!(program.generation(), 0);
        assert_eq!(program.history().len(), 1);
    }

    #[test]
    fn test_fitness_error_aborts() {
        let mut program = Program::new(arithmetic(), small()).unwrap();
        let failing = |_: &mut Candidate<'_, f32>, _: &mut Fitness, _: usize| -> Result<bool, FitnessError> {
            Err(FitnessError::new("boom"))
        };
        program.step(&failing).unwrap();
        assert!(matches!(program.step(&failing), Err(ProgramError::Fitness(_))));
    }

    #[test]
    fn test_terminator() {
        let mut program = Program::new(arithmetic(), small()).unwrap();
        program.terminator().store(true, Ordering::Relaxed);
        assert_eq!(program.step(&target).unwrap(), ProgramState::Terminate);
    }

    #[test]
    fn test_invalid_config() {
        let config = ProgramConfig {
            elites: 100,
            ..small()
        };
        assert!(matches!(
            Program::new(arithmetic(), config),
            Err(ProgramError::Config(ConfigError::TooManyElites { .. }))
        ));
    }

    #[test]
    fn test_task_rng_streams_differ() {
        use rand::Rng;
        let a: u64 = task_rng(1, 0, 0).r#gen();
        let b: u64 = task_rng(1, 0, 1).r#gen();
        let c: u64 = task_rng(1, 1, 0).r#gen();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
