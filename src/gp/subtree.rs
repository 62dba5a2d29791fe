//! Point selection and subtree rebuilding shared by crossover and mutation.

// Depths are small; f64 is exact for them
#![allow(clippy::cast_precision_loss)]

use super::generator::{Generator, GeneratorArgs};
use crate::error::GenerationError;
use crate::tree::{Subtree, Tree};
use crate::types::TypeId;
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// How a node is picked for variation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSelector {
    /// Chance of picking a terminal when picking uniformly.
    pub terminal_chance: f64,
    /// Walk down from the root instead of picking uniformly.
    pub traverse: bool,
    /// Per-level increase of the chance to stop a traversal.
    pub depth_multiplier: f64,
}

impl Default for PointSelector {
    fn default() -> Self {
        Self {
            terminal_chance: 0.1,
            traverse: false,
            depth_multiplier: 0.25,
        }
    }
}

impl PointSelector {
    /// Pick a node index of a non-empty tree.
    pub fn select(&self, tree: &Tree, rng: &mut SmallRng) -> usize {
        if tree.size() <= 1 {
            return 0;
        }
        if self.traverse {
            self.traverse(tree, rng)
        } else {
            self.uniform(tree, rng)
        }
    }

    fn uniform(&self, tree: &Tree, rng: &mut SmallRng) -> usize {
        let want_terminal = rng.gen_bool(self.terminal_chance.clamp(0.0, 1.0));
        let candidates: Vec<usize> = (0..tree.size())
            .filter(|&i| (tree.argc(i) == 0) == want_terminal)
            .collect();
        candidates
            .choose(rng)
            .copied()
            .unwrap_or_else(|| rng.gen_range(0..tree.size()))
    }

    fn traverse(&self, tree: &Tree, rng: &mut SmallRng) -> usize {
        let mut node = 0;
        let mut depth = 0usize;
        loop {
            let children = tree.find_child_extents(node);
            let exit = ((depth + 1) as f64 * self.depth_multiplier).clamp(0.0, 1.0);
            if children.is_empty() || rng.gen_bool(exit) {
                return node;
            }
            node = children[rng.gen_range(0..children.len())].start;
            depth += 1;
        }
    }

    /// Pick up to `tries` nodes and return the first returning `ty`.
    pub fn select_matching(&self, tree: &Tree, ty: TypeId, tries: u32, rng: &mut SmallRng) -> Option<usize> {
        (0..tries.max(1))
            .map(|_| self.select(tree, rng))
            .find(|&i| tree.subtree_from_point(i).return_type == ty)
    }
}

/// Append one argument subtree per entry of `argument_types` to `out`.
///
/// An argument reuses the first unused subtree of `donor` in `children`
/// with the same type; otherwise a new subtree is generated within
/// `min_depth..=max_depth`.
///
/// # Errors
///
/// Propagates generator failures.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fill_arguments(
    out: &mut Tree,
    argument_types: &[TypeId],
    donor: &Tree,
    children: &[Subtree],
    generator: &dyn Generator,
    min_depth: usize,
    max_depth: usize,
    rng: &mut SmallRng,
) -> Result<(), GenerationError> {
    let mut used = vec![false; children.len()];
    for &ty in argument_types {
        let reuse = children
            .iter()
            .enumerate()
            .position(|(i, child)| !used[i] && child.return_type == ty);
        if let Some(i) = reuse {
            used[i] = true;
            donor.copy_subtree(children[i], out);
        } else {
            let args = GeneratorArgs {
                root_type: ty,
                min_depth,
                max_depth,
            };
            generator.generate(out, &args, rng)?;
        }
    }
    Ok(())
}

/// Copy the single node at `index` of `source` (and its literal) onto `out`.
pub(crate) fn copy_head(source: &Tree, index: usize, out: &mut Tree, rng: &mut SmallRng) {
    let record = source.operations()[index];
    if record.is_value() {
        source.copy_subtree(source.subtree_from_point(index), out);
    } else {
        out.push_operator(record.id(), rng);
    }
}
