//! Property-based tests for tree construction and variation.
//!
//! Every generated, crossed-over or mutated tree must keep its literal
//! bytes in step with its records, balance its arity walk and type-check.
//! Run with: cargo test --release prop_tree

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::sync::Arc;
use stgp::gp::{
    CrossoverConfig, CrossoverKind, Full, Generator, GeneratorArgs, Grow, MutationConfig, MutationKind,
};
use stgp::{Operator, OperatorBuilder, OperatorSet, Tree};

fn palette() -> OperatorSet<f32> {
    OperatorBuilder::<f32>::new()
        .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
        .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
        .with(Operator::new(|a: f32| -a).named("neg"))
        .with(Operator::new(|c: bool, a: f32, b: f32| if c { a } else { b }).named("if"))
        .with(Operator::new(|a: f32, b: f32| a < b).named("lt"))
        .with(Operator::with_context(|x: &f32| *x).named("x"))
        .with(Operator::ephemeral(|_| 0.5f32).named("lit"))
        .with(Operator::ephemeral(|_| true).named("flag"))
        .build()
        .unwrap()
}

fn grown(set: &OperatorSet<f32>, max_depth: usize, rng: &mut SmallRng) -> Tree {
    let mut tree = Tree::new(Arc::clone(set.registry()));
    let args = GeneratorArgs {
        root_type: set.types().id_of::<f32>().unwrap(),
        min_depth: 1,
        max_depth,
    };
    Grow { terminal_chance: 0.3 }.generate(&mut tree, &args, rng).unwrap();
    tree
}

fn assert_invariants(set: &OperatorSet<f32>, tree: &Tree) {
    tree.check().unwrap();
    let literal_bytes: usize = tree
        .operations()
        .iter()
        .filter(|r| r.is_value())
        .map(|r| r.type_size())
        .sum();
    assert_eq!(literal_bytes, tree.values().size_bytes());
    for i in 0..tree.size() {
        assert_eq!(tree.subtree_from_point(i).end, tree.endpoint(i));
    }
    set.evaluate::<f32>(tree, &1.25).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Grow and full produce well-formed trees within their depth window.
    #[test]
    fn prop_generated_trees_hold_invariants(seed in any::<u64>(), depth in 1usize..7, full in any::<bool>()) {
        let set = palette();
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut tree = Tree::new(Arc::clone(set.registry()));
        let args = GeneratorArgs {
            root_type: set.types().id_of::<f32>().unwrap(),
            min_depth: 1,
            max_depth: depth,
        };
        if full {
            Full.generate(&mut tree, &args, &mut rng).unwrap();
        } else {
            Grow { terminal_chance: 0.3 }.generate(&mut tree, &args, &mut rng).unwrap();
        }
        prop_assert!(tree.depth() <= depth);
        assert_invariants(&set, &tree);
    }

    /// Children of every crossover operator are well-formed; parents are untouched.
    #[test]
    fn prop_crossover_children_hold_invariants(seed in any::<u64>(), kind in 0usize..3) {
        let set = palette();
        let mut rng = SmallRng::seed_from_u64(seed);
        let p1 = grown(&set, 4, &mut rng);
        let p2 = grown(&set, 4, &mut rng);
        let before = (p1.to_sexpr(), p2.to_sexpr());
        let config = CrossoverConfig {
            kind: [CrossoverKind::Subtree, CrossoverKind::OnePoint, CrossoverKind::Advanced][kind],
            min_tree_size: 1,
            ..CrossoverConfig::default()
        };
        if let Ok((c1, c2)) = config.build().apply(&p1, &p2, &mut rng) {
            assert_invariants(&set, &c1);
            assert_invariants(&set, &c2);
        }
        prop_assert_eq!((p1.to_sexpr(), p2.to_sexpr()), before);
    }

    /// Both mutation operators keep trees well-formed.
    #[test]
    fn prop_mutation_holds_invariants(seed in any::<u64>(), advanced in any::<bool>()) {
        let set = palette();
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut tree = grown(&set, 5, &mut rng);
        let config = MutationConfig {
            kind: if advanced { MutationKind::Advanced } else { MutationKind::Point },
            ..MutationConfig::default()
        };
        let mutation = config.build();
        for _ in 0..5 {
            if mutation.apply(&mut tree, &mut rng).is_ok() {
                assert_invariants(&set, &tree);
            }
        }
    }

    /// Swapping the same points twice restores both trees.
    #[test]
    fn prop_swap_twice_is_identity(seed in any::<u64>(), i in any::<prop::sample::Index>(), j in any::<prop::sample::Index>()) {
        let set = palette();
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut a = grown(&set, 4, &mut rng);
        let mut b = grown(&set, 4, &mut rng);
        let start = (a.operations().to_vec(), a.value_bytes(), b.operations().to_vec(), b.value_bytes());

        let pa = a.subtree_from_point(i.index(a.size()));
        let pb = b.subtree_from_point(j.index(b.size()));
        prop_assume!(pa.return_type == pb.return_type);
        a.swap_subtrees(pa, &mut b, pb);
        assert_invariants(&set, &a);
        assert_invariants(&set, &b);

        let back_a = a.subtree_from_point(pa.start);
        let back_b = b.subtree_from_point(pb.start);
        prop_assert_eq!(back_a.len(), pb.len());
        prop_assert_eq!(back_b.len(), pa.len());
        a.swap_subtrees(back_a, &mut b, back_b);

        prop_assert_eq!((a.operations().to_vec(), a.value_bytes(), b.operations().to_vec(), b.value_bytes()), start);
    }

    /// Copying a subtree into a destination and deleting it again restores
    /// the destination and leaves the source alone.
    #[test]
    fn prop_copy_then_delete_restores(seed in any::<u64>(), i in any::<prop::sample::Index>()) {
        let set = palette();
        let mut rng = SmallRng::seed_from_u64(seed);
        let source = grown(&set, 4, &mut rng);
        let mut dest = grown(&set, 3, &mut rng);
        let source_before = (source.operations().to_vec(), source.value_bytes());
        let dest_before = (dest.operations().to_vec(), dest.value_bytes());

        let point = source.subtree_from_point(i.index(source.size()));
        let start = dest.size();
        source.copy_subtree(point, &mut dest);
        let copied = dest.subtree_from_point(start);
        prop_assert_eq!(copied.len(), point.len());
        dest.delete_subtree(copied);

        prop_assert_eq!((source.operations().to_vec(), source.value_bytes()), source_before);
        prop_assert_eq!((dest.operations().to_vec(), dest.value_bytes()), dest_before);
    }
}
