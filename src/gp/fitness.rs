//! Fitness records, individuals, populations and per-generation statistics.

// Population sizes convert to f64 for averages
#![allow(clippy::cast_precision_loss)]

use crate::tree::Tree;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

/// Fitness of one individual.
///
/// Selection reads `adjusted` (higher is better). If a fitness function
/// leaves `adjusted` untouched, the driver derives it as
/// `1 / (1 + standardized)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    /// Raw score in problem units.
    pub raw: f64,
    /// Score rescaled so that 0 is best.
    pub standardized: f64,
    /// Score in (0, 1], higher is better.
    pub adjusted: f64,
    /// Number of fitness cases solved.
    pub hits: i64,
}

impl Fitness {
    /// Fitness handed to a fitness function: everything zero and `adjusted`
    /// unset.
    pub(crate) fn unscored() -> Self {
        Self {
            adjusted: f64::NAN,
            ..Self::default()
        }
    }

    /// Fill `adjusted` from `standardized` if the fitness function did not.
    ///
    /// A score that is still NaN afterwards ranks below every other.
    pub(crate) fn finalize(&mut self) {
        if self.adjusted.is_nan() {
            self.adjusted = 1.0 / (1.0 + self.standardized);
        }
        self.adjusted = rank_key(self.adjusted);
    }
}

fn rank_key(adjusted: f64) -> f64 {
    if adjusted.is_nan() { f64::NEG_INFINITY } else { adjusted }
}

/// A tree and its fitness.
#[derive(Debug, Clone)]
pub struct Individual {
    /// The program.
    pub tree: Tree,
    /// Its last computed fitness; zero until evaluated.
    pub fitness: Fitness,
}

impl Individual {
    /// Wrap a freshly built tree with zero fitness.
    #[must_use]
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            fitness: Fitness::default(),
        }
    }
}

fn by_adjusted(a: &Individual, b: &Individual) -> Ordering {
    rank_key(a.fitness.adjusted).total_cmp(&rank_key(b.fitness.adjusted))
}

/// One generation of individuals.
#[derive(Debug, Clone, Default)]
pub struct Population {
    individuals: Vec<Individual>,
}

impl Population {
    /// Wrap a vector of individuals.
    #[must_use]
    pub fn new(individuals: Vec<Individual>) -> Self {
        Self { individuals }
    }

    /// Unwrap into the individuals.
    #[must_use]
    pub fn into_inner(self) -> Vec<Individual> {
        self.individuals
    }

    /// Indices sorted by adjusted fitness, best first. Ties keep index order.
    #[must_use]
    pub fn ranked_indexes(&self) -> Vec<usize> {
        let mut indexes: Vec<usize> = (0..self.individuals.len()).collect();
        indexes.sort_by(|&a, &b| by_adjusted(&self.individuals[b], &self.individuals[a]));
        indexes
    }

    /// Indices of the `n` fittest individuals, best first.
    #[must_use]
    pub fn best_indexes(&self, n: usize) -> Vec<usize> {
        let mut ranked = self.ranked_indexes();
        ranked.truncate(n);
        ranked
    }

    /// The fittest individual.
    #[must_use]
    pub fn best(&self) -> Option<&Individual> {
        self.best_indexes(1).first().map(|&i| &self.individuals[i])
    }
}

impl Deref for Population {
    type Target = Vec<Individual>;

    fn deref(&self) -> &Vec<Individual> {
        &self.individuals
    }
}

impl DerefMut for Population {
    fn deref_mut(&mut self) -> &mut Vec<Individual> {
        &mut self.individuals
    }
}

impl FromIterator<Individual> for Population {
    fn from_iter<I: IntoIterator<Item = Individual>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Summary of a population's adjusted fitness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    /// Highest adjusted fitness.
    pub best_fitness: f64,
    /// Lowest adjusted fitness.
    pub worst_fitness: f64,
    /// Mean adjusted fitness.
    pub average_fitness: f64,
    /// Sum of adjusted fitness.
    pub overall_fitness: f64,
    /// Each individual's share of `overall_fitness`, by index.
    pub normalized_fitness: Vec<f64>,
}

impl PopulationStats {
    /// Compute statistics from evaluated individuals.
    #[must_use]
    pub fn from_population(population: &[Individual]) -> Self {
        if population.is_empty() {
            return Self::default();
        }
        let adjusted: Vec<f64> = population.iter().map(|i| rank_key(i.fitness.adjusted)).collect();
        // Unscorable individuals get no share of the total.
        let share = |a: f64| if a.is_finite() { a } else { 0.0 };
        let overall: f64 = adjusted.iter().copied().map(share).sum();
        let best = adjusted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let worst = adjusted.iter().copied().fold(f64::INFINITY, f64::min);
        let normalized = if overall > 0.0 {
            adjusted.iter().map(|&a| share(a) / overall).collect()
        } else {
            vec![1.0 / population.len() as f64; population.len()]
        };
        Self {
            best_fitness: best,
            worst_fitness: worst,
            average_fitness: overall / population.len() as f64,
            overall_fitness: overall,
            normalized_fitness: normalized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{arithmetic, build};

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

    #[test]
    fn test_finalize_derives_adjusted() {
        let mut f = Fitness::unscored();
        f.standardized = 3.0;
        f.finalize();
        assert!((f.adjusted - 0.25).abs() < 1e-12);

        let mut f = Fitness::unscored();
        f.adjusted = 0.9;
        f.finalize();
        assert!((f.adjusted - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_best_indexes_ties_keep_order() {
        let pop = population(&[0.3, 0.9, 0.1, 0.9, 0.5]);
        assert_eq!(pop.best_indexes(3), vec![1, 3, 4]);
        assert_eq!(pop.ranked_indexes().last(), Some(&2));
    }

    #[test]
    fn test_stats() {
        let pop = population(&[0.25, 0.5, 0.25]);
        let stats = PopulationStats::from_population(&pop);
        assert!((stats.best_fitness - 0.5).abs() < 1e-12);
        assert!((stats.worst_fitness - 0.25).abs() < 1e-12);
        assert!((stats.overall_fitness - 1.0).abs() < 1e-12);
        assert!((stats.average_fitness - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.normalized_fitness.len(), 3);
        assert!((stats.normalized_fitness[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_nan_fitness_ranks_last() {
        let mut f = Fitness::unscored();
        f.standardized = f64::NAN;
        f.finalize();
        assert!(f.adjusted.is_infinite() && f.adjusted < 0.0);

        // Every third individual is unscorable.
        let adjusted: Vec<f64> = (0..2000)
            .map(|i| if i % 3 == 0 { f64::NAN } else { f64::from(i % 97) / 97.0 })
            .collect();
        let pop = population(&adjusted);
        let ranked = pop.ranked_indexes();
        let keys: Vec<f64> = ranked.iter().map(|&i| adjusted[i]).collect();
        let scored = keys.iter().take_while(|a| !a.is_nan()).count();
        assert_eq!(scored, adjusted.iter().filter(|a| !a.is_nan()).count());
        assert!(keys[..scored].windows(2).all(|w| w[0] >= w[1]));
        assert!(keys[scored..].iter().all(|a| a.is_nan()));
        assert!((keys[0] - 96.0 / 97.0).abs() < 1e-12);

        let stats = PopulationStats::from_population(&pop);
        assert!(stats.overall_fitness.is_finite());
        assert!(stats.worst_fitness.is_infinite() && stats.worst_fitness < 0.0);
        assert!(stats.normalized_fitness[0].abs() < 1e-12);
    }

    #[test]
    fn test_stats_empty() {
        let stats = PopulationStats::from_population(&[]);
        assert_eq!(stats, PopulationStats::default());
    }
}
