//! Driver configuration.

use crate::error::ConfigError;
use crate::gp::{CrossoverConfig, InitializerKind, MutationConfig, SelectionKind};
use serde::{Deserialize, Serialize};

/// Configuration of a [`Program`](super::Program).
///
/// Fields missing from a deserialized document take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Individuals per generation.
    pub population_size: usize,
    /// Stop after this many generations.
    pub max_generations: usize,
    /// Smallest initial tree depth.
    pub initial_min_tree_size: usize,
    /// Largest initial tree depth.
    pub initial_max_tree_size: usize,
    /// Offspring deeper than this are replaced by a copy of their parent.
    pub max_tree_depth: usize,
    /// Weight of crossover among the variation operators.
    pub crossover_chance: f64,
    /// Weight of mutation.
    pub mutation_chance: f64,
    /// Weight of reproduction.
    pub reproduction_chance: f64,
    /// Fittest individuals copied unchanged.
    pub elites: usize,
    /// Mutate the parents when crossover finds no compatible points.
    pub try_mutation_on_crossover_failure: bool,
    /// Worker threads; 0 uses the hardware concurrency.
    pub threads: usize,
    /// Minimum number of individuals evaluated per work item.
    pub evaluation_size: usize,
    /// Seed of every random stream.
    pub seed: u64,
    /// Terminal chance of the grow initializer.
    pub grow_terminal_chance: f64,
    /// Shape of the initial population.
    pub initializer: InitializerKind,
    /// Crossover settings.
    pub crossover: CrossoverConfig,
    /// Mutation settings.
    pub mutation: MutationConfig,
    /// Picks crossover parents.
    pub crossover_selection: SelectionKind,
    /// Picks mutation parents.
    pub mutation_selection: SelectionKind,
    /// Picks individuals to copy.
    pub reproduction_selection: SelectionKind,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            population_size: 500,
            max_generations: 50,
            initial_min_tree_size: 2,
            initial_max_tree_size: 6,
            max_tree_depth: 17,
            crossover_chance: 0.8,
            mutation_chance: 0.1,
            reproduction_chance: 0.1,
            elites: 2,
            try_mutation_on_crossover_failure: true,
            threads: 0,
            evaluation_size: 16,
            seed: 691,
            grow_terminal_chance: 0.3,
            initializer: InitializerKind::default(),
            crossover: CrossoverConfig::default(),
            mutation: MutationConfig::default(),
            crossover_selection: SelectionKind::default(),
            mutation_selection: SelectionKind::default(),
            reproduction_selection: SelectionKind::default(),
        }
    }
}

fn depth_window(min: usize, max: usize) -> Result<(), ConfigError> {
    if min > max {
        Err(ConfigError::InvalidDepth { min, max })
    } else {
        Ok(())
    }
}

impl ProgramConfig {
    /// Variation weights in crossover, mutation, reproduction order.
    #[must_use]
    pub fn chances(&self) -> [f64; 3] {
        [self.crossover_chance, self.mutation_chance, self.reproduction_chance]
    }

    /// Check the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an empty population, more elites than
    /// individuals, invalid variation weights or inverted depth bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::EmptyPopulation);
        }
        if self.elites > self.population_size {
            return Err(ConfigError::TooManyElites {
                elites: self.elites,
                population: self.population_size,
            });
        }
        let chances = self.chances();
        if chances.iter().any(|c| !c.is_finite() || *c < 0.0) || chances.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::InvalidChances);
        }
        depth_window(self.initial_min_tree_size, self.initial_max_tree_size)?;
        depth_window(self.initial_max_tree_size, self.max_tree_depth)?;
        depth_window(self.crossover.replacement_min_depth, self.crossover.replacement_max_depth)?;
        depth_window(self.mutation.replacement_min_depth, self.mutation.replacement_max_depth)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ProgramConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_contradictions() {
        let config = ProgramConfig {
            population_size: 0,
            ..ProgramConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyPopulation));

        let config = ProgramConfig {
            population_size: 4,
            elites: 5,
            ..ProgramConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManyElites {
                elites: 5,
                population: 4
            })
        );

        let config = ProgramConfig {
            crossover_chance: 0.0,
            mutation_chance: 0.0,
            reproduction_chance: 0.0,
            ..ProgramConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidChances));

        let config = ProgramConfig {
            initial_min_tree_size: 7,
            ..ProgramConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidDepth { min: 7, max: 6 }));
    }

    #[test]
    fn test_partial_json() {
        let config: ProgramConfig = serde_json::from_str(r#"{"population_size": 64, "seed": 7}"#).unwrap();
        assert_eq!(config.population_size, 64);
        assert_eq!(config.seed, 7);
        assert_eq!(config.elites, ProgramConfig::default().elites);
    }
}
