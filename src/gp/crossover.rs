//! Crossover operators for typed trees.
//!
//! Crossover combines genetic material from two parent trees to create two
//! offspring. Points are matched by return type so every child type-checks.

use super::generator::GeneratorKind;
use super::subtree::{PointSelector, copy_head, fill_arguments};
use crate::error::GenerationError;
use crate::tree::{Subtree, Tree};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which crossover operator to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossoverKind {
    /// Swap two subtrees of the same return type.
    #[default]
    Subtree,
    /// Swap subtrees whose roots also take the same argument types.
    OnePoint,
    /// Exchange root operators and rebuild their arguments.
    Advanced,
}

/// Configuration for crossover operations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossoverConfig {
    /// Operator to apply.
    pub kind: CrossoverKind,
    /// Random points tried in the second parent before giving up.
    pub max_crossover_tries: u32,
    /// Parents smaller than this are rejected.
    pub min_tree_size: usize,
    /// Per-level increase of the chance to stop a traversal.
    pub depth_multiplier: f64,
    /// Chance of picking a terminal point.
    pub terminal_chance: f64,
    /// Pick points by walking from the root.
    pub traverse: bool,
    /// Depth window for arguments synthesized by advanced crossover.
    pub replacement_min_depth: usize,
    /// See `replacement_min_depth`.
    pub replacement_max_depth: usize,
    /// Generator for synthesized arguments.
    pub generator: GeneratorKind,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self {
            kind: CrossoverKind::Subtree,
            max_crossover_tries: 5,
            min_tree_size: 3,
            depth_multiplier: 0.25,
            terminal_chance: 0.1,
            traverse: false,
            replacement_min_depth: 1,
            replacement_max_depth: 3,
            generator: GeneratorKind::default(),
        }
    }
}

impl CrossoverConfig {
    /// Point selection settings.
    #[must_use]
    pub fn points(&self) -> PointSelector {
        PointSelector {
            terminal_chance: self.terminal_chance,
            traverse: self.traverse,
            depth_multiplier: self.depth_multiplier,
        }
    }

    /// Instantiate the configured operator.
    #[must_use]
    pub fn build(&self) -> Box<dyn Crossover> {
        match self.kind {
            CrossoverKind::Subtree => Box::new(SubtreeCrossover { config: *self }),
            CrossoverKind::OnePoint => Box::new(OnePointCrossover { config: *self }),
            CrossoverKind::Advanced => Box::new(AdvancedCrossover { config: *self }),
        }
    }
}

/// Produces two children from two parents.
pub trait Crossover: Send + Sync {
    /// Build two children.
    ///
    /// # Errors
    ///
    /// [`GenerationError::TreeTooSmall`] if a parent is below the minimum
    /// size, [`GenerationError::NoValidType`] if no compatible pair of
    /// points was found.
    fn apply(&self, p1: &Tree, p2: &Tree, rng: &mut SmallRng) -> Result<(Tree, Tree), GenerationError>;
}

fn check_sizes(config: &CrossoverConfig, p1: &Tree, p2: &Tree) -> Result<(), GenerationError> {
    for parent in [p1, p2] {
        if parent.size() < config.min_tree_size.max(1) {
            return Err(GenerationError::TreeTooSmall {
                size: parent.size(),
                min: config.min_tree_size.max(1),
            });
        }
    }
    Ok(())
}

/// Pick a point in `p1`, then up to `max_crossover_tries` points in `p2`
/// accepted by `compatible`.
fn find_points(
    config: &CrossoverConfig,
    p1: &Tree,
    p2: &Tree,
    rng: &mut SmallRng,
    compatible: impl Fn(&Subtree, &Subtree) -> bool,
) -> Result<(Subtree, Subtree), GenerationError> {
    let points = config.points();
    let a = p1.subtree_from_point(points.select(p1, rng));
    for _ in 0..config.max_crossover_tries.max(1) {
        let b = p2.subtree_from_point(points.select(p2, rng));
        if a.return_type == b.return_type && compatible(&a, &b) {
            return Ok((a, b));
        }
    }
    Err(GenerationError::NoValidType(Some(a.return_type)))
}

/// Standard subtree crossover.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtreeCrossover {
    /// Settings.
    pub config: CrossoverConfig,
}

impl Crossover for SubtreeCrossover {
    fn apply(&self, p1: &Tree, p2: &Tree, rng: &mut SmallRng) -> Result<(Tree, Tree), GenerationError> {
        check_sizes(&self.config, p1, p2)?;
        let (a, b) = find_points(&self.config, p1, p2, rng, |_, _| true)?;
        let mut c1 = p1.clone();
        let mut c2 = p2.clone();
        c1.swap_subtrees(a, &mut c2, b);
        Ok((c1, c2))
    }
}

/// Subtree crossover restricted to roots with the same argument multiset.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePointCrossover {
    /// Settings.
    pub config: CrossoverConfig,
}

impl Crossover for OnePointCrossover {
    fn apply(&self, p1: &Tree, p2: &Tree, rng: &mut SmallRng) -> Result<(Tree, Tree), GenerationError> {
        check_sizes(&self.config, p1, p2)?;
        let registry = p1.registry();
        let (a, b) = find_points(&self.config, p1, p2, rng, |a, b| {
            let op_a = registry.operator(p1.operations()[a.start].id());
            let op_b = registry.operator(p2.operations()[b.start].id());
            op_a.argument_multiset() == op_b.argument_multiset()
        })?;
        let mut c1 = p1.clone();
        let mut c2 = p2.clone();
        c1.swap_subtrees(a, &mut c2, b);
        Ok((c1, c2))
    }
}

/// Type-aware crossover: each child gets the other parent's operator at the
/// crossover point, applied to its own arguments where the types allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvancedCrossover {
    /// Settings.
    pub config: CrossoverConfig,
}

impl AdvancedCrossover {
    /// `head`'s operator over the children of `body`'s point.
    fn rebuild(
        &self,
        head_tree: &Tree,
        head: Subtree,
        body_tree: &Tree,
        body: Subtree,
        rng: &mut SmallRng,
    ) -> Result<Tree, GenerationError> {
        let mut out = Tree::new(Arc::clone(head_tree.registry()));
        copy_head(head_tree, head.start, &mut out, rng);
        let info = head_tree.registry().operator(head_tree.operations()[head.start].id());
        let children = body_tree.find_child_extents(body.start);
        fill_arguments(
            &mut out,
            info.argument_types(),
            body_tree,
            &children,
            &self.config.generator,
            self.config.replacement_min_depth,
            self.config.replacement_max_depth.max(self.config.replacement_min_depth),
            rng,
        )?;
        Ok(out)
    }
}

impl Crossover for AdvancedCrossover {
    fn apply(&self, p1: &Tree, p2: &Tree, rng: &mut SmallRng) -> Result<(Tree, Tree), GenerationError> {
        check_sizes(&self.config, p1, p2)?;
        let (a, b) = find_points(&self.config, p1, p2, rng, |_, _| true)?;
        let into_c1 = self.rebuild(p2, b, p1, a, rng)?;
        let into_c2 = self.rebuild(p1, a, p2, b, rng)?;
        let mut c1 = p1.clone();
        let mut c2 = p2.clone();
        c1.replace_subtree(a, &into_c1);
        c2.replace_subtree(b, &into_c2);
        Ok((c1, c2))
    }
}
