// Allow unwrap and unreadable literals in tests (test code is not production)
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::unreadable_literal))]
//! stgp: a strongly-typed genetic programming engine.
//!
//! Programs are expression trees over a palette of typed operators. Trees
//! are stored as flat pre-order records plus an inline byte stack holding
//! their literals, and are evaluated by a reverse walk over that layout.
//! Generation, crossover and mutation only ever connect a node to a child
//! of the type it expects, so every tree the engine produces type-checks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │   Program: evaluate → select/vary   │
//! ├─────────────────────────────────────┤
//! │  Generators │ Crossover │ Mutation  │
//! ├─────────────────────────────────────┤
//! │     Tree (records + value stack)    │
//! ├─────────────────────────────────────┤
//! │   Operator registry and dispatch    │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rand::Rng;
//! use stgp::operator::{Operator, OperatorBuilder};
//! use stgp::program::{Program, ProgramConfig};
//!
//! let operators = OperatorBuilder::<f32>::new()
//!     .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
//!     .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
//!     .with(Operator::with_context(|x: &f32| *x).named("x"))
//!     .with(Operator::ephemeral(|rng| rng.gen_range(-1.0f32..=1.0)).named("lit"))
//!     .build()
//!     .unwrap();
//!
//! let config = ProgramConfig {
//!     population_size: 50,
//!     max_generations: 3,
//!     ..ProgramConfig::default()
//! };
//! let mut program = Program::new(operators, config).unwrap();
//! program
//!     .run(&|candidate, fitness, _| {
//!         let mut error = 0.0;
//!         for x in [-1.0f32, 0.0, 1.0, 2.0] {
//!             let y: f32 = candidate.evaluate(&x)?;
//!             error += f64::from((y - (x * x + 1.0)).abs());
//!         }
//!         fitness.standardized = error;
//!         Ok(error < 1e-3)
//!     })
//!     .unwrap();
//! assert!(!program.history().is_empty());
//! ```

pub mod error;
pub mod eval;
pub mod gp;
pub mod operator;
pub mod program;
pub mod serialize;
pub mod stack;
pub mod tree;
pub mod types;

pub use error::{ProgramError, ProgramResult};
pub use eval::{Candidate, EvaluationContext};
pub use gp::{Fitness, Individual, Population, PopulationStats};
pub use operator::{Operator, OperatorBuilder, OperatorId, OperatorSet};
pub use program::{Program, ProgramConfig, ProgramState};
pub use tree::Tree;
pub use types::{TypeId, Value};
