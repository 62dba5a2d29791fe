//! Genetic operators: generation, variation, selection and fitness.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Program (generation loop)     │
//! ├─────────────────────────────────────┤
//! │  Selection │ Crossover │ Mutation   │
//! ├─────────────────────────────────────┤
//! │   Generators │ Point selection      │
//! ├─────────────────────────────────────┤
//! │       Typed trees + operators       │
//! └─────────────────────────────────────┘
//! ```

mod crossover;
mod fitness;
mod generator;
mod mutation;
mod selection;
mod subtree;

pub use crossover::{
    AdvancedCrossover, Crossover, CrossoverConfig, CrossoverKind, OnePointCrossover, SubtreeCrossover,
};
pub use fitness::{Fitness, Individual, Population, PopulationStats};
pub use generator::{Full, Generator, GeneratorArgs, GeneratorKind, Grow, InitializerKind};
pub use mutation::{AdvancedMutation, Mutation, MutationChances, MutationConfig, MutationKind, PointMutation};
pub use selection::{Best, FitnessProportionate, Random, SelectionKind, Selector, Tournament, Worst};
pub use subtree::PointSelector;
