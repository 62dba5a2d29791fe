//! Selection operators.
//!
//! A selector is prepared once per generation with [`Selector::pre_process`]
//! and then queried concurrently from the variation workers.

use super::fitness::{Population, PopulationStats};
use crate::error::SelectionError;
use crate::tree::Tree;
use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks parents out of an evaluated population.
pub trait Selector: Send + Sync {
    /// Prepare for a generation. Called once, before any selection.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectionError`] if the population or its statistics
    /// cannot support this selector.
    fn pre_process(&mut self, population: &Population, stats: &PopulationStats) -> Result<(), SelectionError>;

    /// Index of the selected individual. Safe to call from many threads.
    fn select_index(&self, population: &Population, rng: &mut SmallRng) -> usize;

    /// The selected individual's tree.
    fn select<'p>(&self, population: &'p Population, rng: &mut SmallRng) -> &'p Tree {
        &population[self.select_index(population, rng)].tree
    }
}

fn non_empty(population: &Population) -> Result<(), SelectionError> {
    if population.is_empty() {
        Err(SelectionError::EmptyPopulation)
    } else {
        Ok(())
    }
}

/// Best of `size` distinct random individuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tournament {
    /// Number of competitors.
    pub size: usize,
}

impl Selector for Tournament {
    fn pre_process(&mut self, population: &Population, _stats: &PopulationStats) -> Result<(), SelectionError> {
        non_empty(population)
    }

    fn select_index(&self, population: &Population, rng: &mut SmallRng) -> usize {
        let k = self.size.clamp(1, population.len());
        rand::seq::index::sample(rng, population.len(), k)
            .into_iter()
            .reduce(|best, i| {
                if population[i].fitness.adjusted > population[best].fitness.adjusted {
                    i
                } else {
                    best
                }
            })
            .unwrap_or(0)
    }
}

/// Walks a ranking round-robin; concurrent callers get distinct entries
/// until the ranking wraps.
#[derive(Debug, Default)]
struct RankedCursor {
    order: Vec<usize>,
    cursor: AtomicUsize,
}

impl RankedCursor {
    fn reset(&mut self, order: Vec<usize>) {
        self.order = order;
        *self.cursor.get_mut() = 0;
    }

    fn next(&self) -> usize {
        if self.order.is_empty() {
            return 0;
        }
        let step = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.order[step % self.order.len()]
    }
}

/// Individuals in descending fitness order.
#[derive(Debug, Default)]
pub struct Best {
    ranking: RankedCursor,
}

impl Selector for Best {
    fn pre_process(&mut self, population: &Population, _stats: &PopulationStats) -> Result<(), SelectionError> {
        non_empty(population)?;
        self.ranking.reset(population.ranked_indexes());
        Ok(())
    }

    fn select_index(&self, _population: &Population, _rng: &mut SmallRng) -> usize {
        self.ranking.next()
    }
}

/// Individuals in ascending fitness order.
#[derive(Debug, Default)]
pub struct Worst {
    ranking: RankedCursor,
}

impl Selector for Worst {
    fn pre_process(&mut self, population: &Population, _stats: &PopulationStats) -> Result<(), SelectionError> {
        non_empty(population)?;
        let mut order = population.ranked_indexes();
        order.reverse();
        self.ranking.reset(order);
        Ok(())
    }

    fn select_index(&self, _population: &Population, _rng: &mut SmallRng) -> usize {
        self.ranking.next()
    }
}

/// Uniformly random individual.
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl Selector for Random {
    fn pre_process(&mut self, population: &Population, _stats: &PopulationStats) -> Result<(), SelectionError> {
        non_empty(population)
    }

    fn select_index(&self, population: &Population, rng: &mut SmallRng) -> usize {
        rng.gen_range(0..population.len())
    }
}

/// Roulette wheel over the normalized fitness of the statistics.
#[derive(Debug, Clone, Default)]
pub struct FitnessProportionate {
    cumulative: Vec<f64>,
}

impl Selector for FitnessProportionate {
    fn pre_process(&mut self, population: &Population, stats: &PopulationStats) -> Result<(), SelectionError> {
        non_empty(population)?;
        if stats.normalized_fitness.len() != population.len() {
            return Err(SelectionError::MissingNormalizedFitness);
        }
        self.cumulative = stats
            .normalized_fitness
            .iter()
            .scan(0.0, |sum, &f| {
                *sum += f;
                Some(*sum)
            })
            .collect();
        Ok(())
    }

    fn select_index(&self, population: &Population, rng: &mut SmallRng) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let draw = rng.r#gen::<f64>() * total;
        self.cumulative
            .partition_point(|&c| c <= draw)
            .min(population.len().saturating_sub(1))
    }
}

/// Serializable selector choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionKind {
    /// See [`Tournament`].
    Tournament {
        /// Number of competitors.
        size: usize,
    },
    /// See [`Best`].
    Best,
    /// See [`Worst`].
    Worst,
    /// See [`Random`].
    Random,
    /// See [`FitnessProportionate`].
    FitnessProportionate,
}

impl Default for SelectionKind {
    fn default() -> Self {
        Self::Tournament { size: 5 }
    }
}

impl SelectionKind {
    /// Instantiate the selector.
    #[must_use]
    pub fn build(self) -> Box<dyn Selector> {
        match self {
            Self::Tournament { size } => Box::new(Tournament { size }),
            Self::Best => Box::new(Best::default()),
            Self::Worst => Box::new(Worst::default()),
            Self::Random => Box::new(Random),
            Self::FitnessProportionate => Box::new(FitnessProportionate::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::fitness::{Fitness, Individual};
    use crate::tree::tests::{arithmetic, build};
    use rand::SeedableRng;

    fn population(adjusted: &[f64]) -> Population {
        let set = arithmetic();
        adjusted
            .iter()
            .map(|&a| Individual {
                tree: build(&set, &["x"]),
                fitness: Fitness {
                    adjusted: a,
                    ..Fitness::default()
                },
            })
            .collect()
    }

    fn prepared(kind: SelectionKind, pop: &Population) -> Box<dyn Selector> {
        let mut selector = kind.build();
        selector
            .pre_process(pop, &PopulationStats::from_population(pop))
            .unwrap();
        selector
    }

    #[test]
    fn test_tournament_selection_prefers_fitter() {
        let pop = population(&[0.1, 0.5, 0.9, 0.2, 0.8]);
        let selector = prepared(SelectionKind::Tournament { size: 3 }, &pop);
        let mut rng = SmallRng::seed_from_u64(42);

        let mut counts = [0usize; 5];
        for _ in 0..1000 {
            counts[selector.select_index(&pop, &mut rng)] += 1;
        }

        let max_idx = counts.iter().enumerate().max_by_key(|(_, c)| *c).unwrap().0;
        assert_eq!(max_idx, 2);
        // Distinct sampling: the worst can never win a three-way tournament.
        assert_eq!(counts[0], 0);
    }

    #[test]
    fn test_full_tournament_is_elite() {
        let pop = population(&[0.3, 0.9, 0.1, 0.8, 0.5]);
        let selector = prepared(SelectionKind::Tournament { size: 10 }, &pop);
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..20 {
            assert_eq!(selector.select_index(&pop, &mut rng), 1);
        }
    }

    #[test]
    fn test_best_and_worst_walk_ranking() {
        let pop = population(&[0.3, 0.9, 0.1, 0.8]);
        let mut rng = SmallRng::seed_from_u64(1);

        let best = prepared(SelectionKind::Best, &pop);
        let order: Vec<usize> = (0..5).map(|_| best.select_index(&pop, &mut rng)).collect();
        assert_eq!(order, vec![1, 3, 0, 2, 1]);

        let worst = prepared(SelectionKind::Worst, &pop);
        let order: Vec<usize> = (0..4).map(|_| worst.select_index(&pop, &mut rng)).collect();
        assert_eq!(order, vec![2, 0, 3, 1]);
    }

    #[test]
    fn test_fitness_proportionate_follows_weights() {
        let pop = population(&[0.0, 1.0, 3.0]);
        let selector = prepared(SelectionKind::FitnessProportionate, &pop);
        let mut rng = SmallRng::seed_from_u64(9);
        let mut counts = [0usize; 3];
        for _ in 0..4000 {
            counts[selector.select_index(&pop, &mut rng)] += 1;
        }
        assert_eq!(counts[0], 0);
        assert!(counts[2] > counts[1] * 2);
    }

    #[test]
    fn test_fitness_proportionate_requires_stats() {
        let pop = population(&[0.5, 0.5]);
        let mut selector = FitnessProportionate::default();
        assert_eq!(
            selector.pre_process(&pop, &PopulationStats::default()),
            Err(SelectionError::MissingNormalizedFitness)
        );
    }

    #[test]
    fn test_empty_population_rejected() {
        let pop = Population::default();
        let mut selector = Random;
        assert_eq!(
            selector.pre_process(&pop, &PopulationStats::default()),
            Err(SelectionError::EmptyPopulation)
        );
    }
}
