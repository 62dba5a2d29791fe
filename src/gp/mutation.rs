//! Mutation operators for typed trees.
//!
//! Mutations introduce random variation while keeping every node's return
//! type, so a mutated tree always type-checks.

// Tree sizes convert to f64 for the per-node chance
#![allow(clippy::cast_precision_loss)]

use super::generator::{Generator, GeneratorArgs, GeneratorKind};
use super::subtree::{PointSelector, fill_arguments};
use crate::error::GenerationError;
use crate::tree::{Subtree, Tree};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which mutation operator to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Regrow one random subtree.
    #[default]
    Point,
    /// Visit every node with a small chance of one of five edits.
    Advanced,
}

/// Relative weights of the advanced mutation edits.
///
/// The weights are normalized before sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationChances {
    /// Regrow the subtree.
    pub expression: f64,
    /// Swap the node for another of the same type.
    pub adjust: f64,
    /// Wrap the subtree in a new operator.
    pub sub: f64,
    /// Replace an ancestor with this subtree.
    pub jump: f64,
    /// Overwrite the subtree with a copy of another.
    pub copy: f64,
}

impl Default for MutationChances {
    fn default() -> Self {
        Self {
            expression: 0.25,
            adjust: 0.25,
            sub: 0.2,
            jump: 0.15,
            copy: 0.15,
        }
    }
}

impl MutationChances {
    fn weights(&self) -> [f64; 5] {
        [self.expression, self.adjust, self.sub, self.jump, self.copy]
    }
}

/// Configuration for mutation operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Operator to apply.
    pub kind: MutationKind,
    /// Depth window of regrown subtrees.
    pub replacement_min_depth: usize,
    /// See `replacement_min_depth`.
    pub replacement_max_depth: usize,
    /// Generator for regrown subtrees.
    pub generator: GeneratorKind,
    /// Chance of picking a terminal point.
    pub terminal_chance: f64,
    /// Pick points by walking from the root.
    pub traverse: bool,
    /// Per-level increase of the chance to stop a traversal.
    pub depth_multiplier: f64,
    /// Expected number of edits per tree in advanced mutation.
    pub per_node_mutation_chance: f64,
    /// Edit weights for advanced mutation.
    pub chances: MutationChances,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            kind: MutationKind::Point,
            replacement_min_depth: 1,
            replacement_max_depth: 3,
            generator: GeneratorKind::default(),
            terminal_chance: 0.1,
            traverse: false,
            depth_multiplier: 0.25,
            per_node_mutation_chance: 1.0,
            chances: MutationChances::default(),
        }
    }
}

impl MutationConfig {
    fn points(&self) -> PointSelector {
        PointSelector {
            terminal_chance: self.terminal_chance,
            traverse: self.traverse,
            depth_multiplier: self.depth_multiplier,
        }
    }

    fn regrow(&self, tree: &Tree, point: Subtree, rng: &mut SmallRng) -> Result<Tree, GenerationError> {
        let mut fresh = Tree::new(Arc::clone(tree.registry()));
        let args = GeneratorArgs {
            root_type: point.return_type,
            min_depth: self.replacement_min_depth,
            max_depth: self.replacement_max_depth.max(self.replacement_min_depth),
        };
        self.generator.generate(&mut fresh, &args, rng)?;
        Ok(fresh)
    }

    /// Instantiate the configured operator.
    #[must_use]
    pub fn build(&self) -> Box<dyn Mutation> {
        match self.kind {
            MutationKind::Point => Box::new(PointMutation { config: *self }),
            MutationKind::Advanced => Box::new(AdvancedMutation { config: *self }),
        }
    }
}

/// Rewrites a tree in place.
pub trait Mutation: Send + Sync {
    /// Mutate `tree`.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationError`] if a replacement subtree could not be
    /// generated. The tree is left valid.
    fn apply(&self, tree: &mut Tree, rng: &mut SmallRng) -> Result<(), GenerationError>;
}

/// Replace one random subtree with a freshly generated one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointMutation {
    /// Settings.
    pub config: MutationConfig,
}

impl Mutation for PointMutation {
    fn apply(&self, tree: &mut Tree, rng: &mut SmallRng) -> Result<(), GenerationError> {
        if tree.is_empty() {
            return Ok(());
        }
        let point = tree.subtree_from_point(self.config.points().select(tree, rng));
        let fresh = self.config.regrow(tree, point, rng)?;
        tree.replace_subtree(point, &fresh);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Expression,
    Adjust,
    Sub,
    Jump,
    Copy,
}

const EDITS: [Edit; 5] = [Edit::Expression, Edit::Adjust, Edit::Sub, Edit::Jump, Edit::Copy];

/// Visits every node; each is edited with chance
/// `per_node_mutation_chance / size`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvancedMutation {
    /// Settings.
    pub config: MutationConfig,
}

impl AdvancedMutation {
    /// Apply `edit` at `index`, returning where the scan continues.
    fn edit(&self, tree: &mut Tree, index: usize, edit: Edit, rng: &mut SmallRng) -> Result<usize, GenerationError> {
        let point = tree.subtree_from_point(index);
        match edit {
            Edit::Expression => {
                let fresh = self.config.regrow(tree, point, rng)?;
                tree.replace_subtree(point, &fresh);
            }
            Edit::Adjust => self.adjust(tree, point, rng)?,
            Edit::Sub => self.sub(tree, point, rng)?,
            Edit::Jump => return Ok(self.jump(tree, point)),
            Edit::Copy => self.copy(tree, point, rng),
        }
        Ok(tree.endpoint(index))
    }

    /// Swap the node for another operator of the same return type.
    fn adjust(&self, tree: &mut Tree, point: Subtree, rng: &mut SmallRng) -> Result<(), GenerationError> {
        let registry = Arc::clone(tree.registry());
        if tree.argc(point.start) == 0 {
            if let Some(&id) = registry.terminals(point.return_type).choose(rng) {
                tree.modify_operator(point.start, id, rng);
            }
            return Ok(());
        }
        let Some(&id) = registry.non_terminals(point.return_type).choose(rng) else {
            return Ok(());
        };
        let mut rebuilt = Tree::new(Arc::clone(&registry));
        rebuilt.push_operator(id, rng);
        let children = tree.find_child_extents(point.start);
        fill_arguments(
            &mut rebuilt,
            registry.operator(id).argument_types(),
            tree,
            &children,
            &self.config.generator,
            self.config.replacement_min_depth,
            self.config.replacement_max_depth.max(self.config.replacement_min_depth),
            rng,
        )?;
        tree.replace_subtree(point, &rebuilt);
        Ok(())
    }

    /// Make the subtree one argument of a new operator returning its type.
    fn sub(&self, tree: &mut Tree, point: Subtree, rng: &mut SmallRng) -> Result<(), GenerationError> {
        let registry = Arc::clone(tree.registry());
        let wrappers: Vec<_> = registry
            .non_terminals(point.return_type)
            .iter()
            .copied()
            .filter(|&id| registry.operator(id).argument_types().contains(&point.return_type))
            .collect();
        let Some(&id) = wrappers.choose(rng) else {
            return Ok(());
        };
        let arguments = registry.operator(id).argument_types();
        let slots: Vec<usize> = (0..arguments.len())
            .filter(|&i| arguments[i] == point.return_type)
            .collect();
        let slot = slots.choose(rng).copied().unwrap_or(0);

        let mut wrapped = Tree::new(Arc::clone(&registry));
        wrapped.push_operator(id, rng);
        let depth = GeneratorArgs {
            root_type: point.return_type,
            min_depth: self.config.replacement_min_depth,
            max_depth: self.config.replacement_max_depth.max(self.config.replacement_min_depth),
        };
        for (i, &ty) in arguments.iter().enumerate() {
            if i == slot {
                tree.copy_subtree(point, &mut wrapped);
            } else {
                self.config.generator.generate(&mut wrapped, &GeneratorArgs { root_type: ty, ..depth }, rng)?;
            }
        }
        tree.replace_subtree(point, &wrapped);
        Ok(())
    }

    /// Replace the nearest ancestor of the same type with this subtree.
    fn jump(&self, tree: &mut Tree, point: Subtree) -> usize {
        let parents = tree.parents();
        let mut ancestor = parents[point.start];
        while let Some(a) = ancestor {
            let target = tree.subtree_from_point(a);
            if target.return_type == point.return_type {
                let source = tree.extract_subtree(point);
                tree.replace_subtree(target, &source);
                return tree.endpoint(a);
            }
            ancestor = parents[a];
        }
        point.end
    }

    /// Overwrite the subtree with a copy of a disjoint subtree of the same type.
    fn copy(&self, tree: &mut Tree, point: Subtree, rng: &mut SmallRng) {
        let sources: Vec<usize> = (0..tree.size())
            .filter(|&i| {
                let other = tree.subtree_from_point(i);
                other.return_type == point.return_type && (other.end <= point.start || other.start >= point.end)
            })
            .collect();
        if let Some(&i) = sources.choose(rng) {
            let source = tree.extract_subtree(tree.subtree_from_point(i));
            tree.replace_subtree(point, &source);
        }
    }
}

impl Mutation for AdvancedMutation {
    fn apply(&self, tree: &mut Tree, rng: &mut SmallRng) -> Result<(), GenerationError> {
        if tree.is_empty() {
            return Ok(());
        }
        let chance = (self.config.per_node_mutation_chance / tree.size() as f64).clamp(0.0, 1.0);
        let weights = WeightedIndex::new(self.config.chances.weights()).ok();
        let mut index = 0;
        while index < tree.size() {
            if !rng.gen_bool(chance) {
                index += 1;
                continue;
            }
            let edit = weights.as_ref().map_or(Edit::Expression, |w| EDITS[w.sample(rng)]);
            index = self.edit(tree, index, edit, rng)?.max(index + 1);
        }
        Ok(())
    }
}
