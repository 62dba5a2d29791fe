//! Random tree generators and population initializers.
//!
//! Generators append one complete subtree of a requested type to a tree,
//! in pre-order. The root sits at depth 0. Nodes above `min_depth` are
//! forced to be non-terminals and nodes at `max_depth` are forced to be
//! terminals. When a type has no operator of the forced kind the other
//! kind is used; non-terminals are then chosen by smallest ground depth so
//! the tree still closes as soon as possible.

use crate::error::GenerationError;
use crate::operator::{OperatorId, OperatorRegistry};
use crate::tree::Tree;
use crate::types::TypeId;
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Target type and depth window of a generated subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorArgs {
    /// Type the subtree root must return.
    pub root_type: TypeId,
    /// Depth above which terminals are not placed.
    pub min_depth: usize,
    /// Depth at which terminals are forced.
    pub max_depth: usize,
}

/// Appends random subtrees to a tree.
pub trait Generator: Send + Sync {
    /// Append one subtree described by `args`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::NoValidType`] if some required type has no
    /// operator at all.
    fn generate(&self, tree: &mut Tree, args: &GeneratorArgs, rng: &mut SmallRng) -> Result<(), GenerationError>;
}

/// Terminals may appear anywhere between the depth bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grow {
    /// Chance of placing a terminal once `min_depth` is reached.
    pub terminal_chance: f64,
}

impl Default for Grow {
    fn default() -> Self {
        Self { terminal_chance: 0.3 }
    }
}

/// Every branch reaches `max_depth`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Full;

#[derive(Clone, Copy)]
enum Want {
    Terminal,
    NonTerminal,
}

fn choose(
    registry: &OperatorRegistry,
    ty: TypeId,
    depth: usize,
    max_depth: usize,
    want: Want,
    rng: &mut SmallRng,
) -> Result<OperatorId, GenerationError> {
    let terminals = registry.terminals(ty);
    let non_terminals = registry.non_terminals(ty);
    if let Want::Terminal = want {
        if let Some(&id) = terminals.choose(rng) {
            return Ok(id);
        }
    } else {
        let fitting: Vec<OperatorId> = non_terminals
            .iter()
            .copied()
            .filter(|&id| depth + registry.operator_ground_depth(id) <= max_depth)
            .collect();
        if let Some(&id) = fitting.choose(rng) {
            return Ok(id);
        }
        if let Some(&id) = terminals.choose(rng) {
            return Ok(id);
        }
    }
    let shallowest = non_terminals
        .iter()
        .map(|&id| registry.operator_ground_depth(id))
        .min()
        .ok_or(GenerationError::NoValidType(Some(ty)))?;
    let closing: Vec<OperatorId> = non_terminals
        .iter()
        .copied()
        .filter(|&id| registry.operator_ground_depth(id) == shallowest)
        .collect();
    closing.choose(rng).copied().ok_or(GenerationError::NoValidType(Some(ty)))
}

fn generate_with(
    tree: &mut Tree,
    args: &GeneratorArgs,
    rng: &mut SmallRng,
    mut want: impl FnMut(usize, &mut SmallRng) -> Want,
) -> Result<(), GenerationError> {
    let registry = std::sync::Arc::clone(tree.registry());
    let mut pending = vec![(args.root_type, 0usize)];
    while let Some((ty, depth)) = pending.pop() {
        let mode = if depth >= args.max_depth {
            Want::Terminal
        } else if depth < args.min_depth {
            Want::NonTerminal
        } else {
            want(depth, rng)
        };
        let id = choose(&registry, ty, depth, args.max_depth, mode, rng)?;
        tree.push_operator(id, rng);
        for &arg in registry.operator(id).argument_types().iter().rev() {
            pending.push((arg, depth + 1));
        }
    }
    Ok(())
}

impl Generator for Grow {
    fn generate(&self, tree: &mut Tree, args: &GeneratorArgs, rng: &mut SmallRng) -> Result<(), GenerationError> {
        let chance = self.terminal_chance.clamp(0.0, 1.0);
        generate_with(tree, args, rng, |_, rng| {
            if rng.gen_bool(chance) {
                Want::Terminal
            } else {
                Want::NonTerminal
            }
        })
    }
}

impl Generator for Full {
    fn generate(&self, tree: &mut Tree, args: &GeneratorArgs, rng: &mut SmallRng) -> Result<(), GenerationError> {
        generate_with(tree, args, rng, |_, _| Want::NonTerminal)
    }
}

/// Generator choice for replacement subtrees in crossover and mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// See [`Grow`].
    Grow(Grow),
    /// See [`Full`].
    Full,
}

impl Default for GeneratorKind {
    fn default() -> Self {
        Self::Grow(Grow::default())
    }
}

impl Generator for GeneratorKind {
    fn generate(&self, tree: &mut Tree, args: &GeneratorArgs, rng: &mut SmallRng) -> Result<(), GenerationError> {
        match self {
            Self::Grow(grow) => grow.generate(tree, args, rng),
            Self::Full => Full.generate(tree, args, rng),
        }
    }
}

/// How the initial population is shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitializerKind {
    /// Grow to the maximum depth.
    Grow,
    /// Full to the maximum depth.
    Full,
    /// Alternate grow and full at the maximum depth.
    HalfHalf,
    /// Cycle depths across the window; half of each depth grown, half full.
    #[default]
    RampedHalfHalf,
}

impl InitializerKind {
    /// Build the tree for population slot `index` into `tree`.
    ///
    /// Depths run over `min_depth..=max_depth`.
    ///
    /// # Errors
    ///
    /// As for [`Generator::generate`].
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        self,
        index: usize,
        tree: &mut Tree,
        root_type: TypeId,
        min_depth: usize,
        max_depth: usize,
        grow: Grow,
        rng: &mut SmallRng,
    ) -> Result<(), GenerationError> {
        let span = max_depth.saturating_sub(min_depth) + 1;
        let (depth, use_grow) = match self {
            Self::Grow => (max_depth, true),
            Self::Full => (max_depth, false),
            Self::HalfHalf => (max_depth, index % 2 == 0),
            Self::RampedHalfHalf => (min_depth + index % span, (index / span) % 2 == 0),
        };
        let args = GeneratorArgs {
            root_type,
            min_depth: min_depth.min(depth),
            max_depth: depth,
        };
        if use_grow {
            grow.generate(tree, &args, rng)
        } else {
            Full.generate(tree, &args, rng)
        }
    }
}
