//! Property-based tests for evaluation order.
//!
//! Random trees over a palette of non-commutative operators with mixed
//! argument types are evaluated and checked against a recursive walk of
//! the same trees that binds child `i` to argument `i`.
//! Run with: cargo test --release prop_eval

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_precision_loss)]

use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use stgp::gp::{Generator, GeneratorArgs, Grow};
use stgp::{Operator, OperatorBuilder, OperatorSet, Tree};

struct Case {
    x: f32,
    on: bool,
}

fn palette() -> OperatorSet<Case> {
    let mut builder = OperatorBuilder::<Case>::new()
        .with(Operator::new(|a: f32, b: f32| a - b).named("sub"))
        .with(Operator::new(|a: f32, b: f32| if b.abs() < 1e-3 { a } else { a / b }).named("div"))
        .with(Operator::new(|c: bool, a: f32, b: f32| if c { a } else { b }).named("pick"))
        .with(Operator::new(|a: f32, b: f32| a < b).named("lt"))
        .with(Operator::new(|a: bool, b: bool| !a || b).named("implies"))
        .with(Operator::new(|s: String, k: f32| s.len() as f32 * 10.0 - k).named("weigh"))
        .with(Operator::new(|a: String, b: String| format!("{a}|{b}")).named("join"))
        .with(Operator::new(|s: String, c: bool| if c { s.to_uppercase() } else { s }).named("shout"))
        .with(Operator::with_context(|c: &Case| c.x).named("x"))
        .with(Operator::with_context(|c: &Case| c.on).named("on"))
        .with(Operator::ephemeral(|rng| rng.gen_range(-2.0f32..2.0)).named("lit"))
        .with(Operator::ephemeral(|rng| "ab".repeat(rng.gen_range(0..3))).named("word"))
        .with(Operator::ephemeral(|rng| rng.gen_bool(0.5)).named("flag"));
    builder.set_root_type::<f32>();
    builder.build().unwrap()
}

#[derive(Debug, Clone, PartialEq)]
enum Val {
    F(f32),
    B(bool),
    S(String),
}

fn same(a: &Val, b: &Val) -> bool {
    match (a, b) {
        (Val::F(a), Val::F(b)) => a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()),
        _ => a == b,
    }
}

/// Walks the tree recursively, reading literals through single-node evaluation.
fn reference(set: &OperatorSet<Case>, tree: &Tree, index: usize, case: &Case) -> Val {
    let name = set.operator(tree.operations()[index].id()).name().unwrap();
    let literal = || tree.extract_subtree(tree.subtree_from_point(index));
    let args: Vec<Val> = tree
        .find_child_extents(index)
        .iter()
        .map(|child| reference(set, tree, child.start, case))
        .collect();
    match (name, args.as_slice()) {
        ("x", []) => Val::F(case.x),
        ("on", []) => Val::B(case.on),
        ("lit", []) => Val::F(set.evaluate(&literal(), case).unwrap()),
        ("word", []) => Val::S(set.evaluate(&literal(), case).unwrap()),
        ("flag", []) => Val::B(set.evaluate(&literal(), case).unwrap()),
        ("sub", [Val::F(a), Val::F(b)]) => Val::F(a - b),
        ("div", [Val::F(a), Val::F(b)]) => Val::F(if b.abs() < 1e-3 { *a } else { a / b }),
        ("pick", [Val::B(c), Val::F(a), Val::F(b)]) => Val::F(if *c { *a } else { *b }),
        ("lt", [Val::F(a), Val::F(b)]) => Val::B(a < b),
        ("implies", [Val::B(a), Val::B(b)]) => Val::B(!a || *b),
        ("weigh", [Val::S(s), Val::F(k)]) => Val::F(s.len() as f32 * 10.0 - k),
        ("join", [Val::S(a), Val::S(b)]) => Val::S(format!("{a}|{b}")),
        ("shout", [Val::S(s), Val::B(c)]) => Val::S(if *c { s.to_uppercase() } else { s.clone() }),
        (name, args) => panic!("{name} bound to {args:?}"),
    }
}

fn evaluated(set: &OperatorSet<Case>, tree: &Tree, case: &Case) -> Val {
    let root = tree.root_type().unwrap();
    let types = set.types();
    if Some(root) == types.id_of::<f32>() {
        Val::F(set.evaluate(tree, case).unwrap())
    } else if Some(root) == types.id_of::<bool>() {
        Val::B(set.evaluate(tree, case).unwrap())
    } else {
        Val::S(set.evaluate(tree, case).unwrap())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Every subtree of a grown tree evaluates to what the recursive walk computes.
    #[test]
    fn prop_evaluation_binds_children_in_order(
        seed in any::<u64>(),
        depth in 1usize..6,
        x in -3.0f32..3.0,
        on in any::<bool>(),
    ) {
        let set = palette();
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut tree = Tree::new(Arc::clone(set.registry()));
        let args = GeneratorArgs {
            root_type: set.types().id_of::<f32>().unwrap(),
            min_depth: 1,
            max_depth: depth,
        };
        Grow { terminal_chance: 0.3 }.generate(&mut tree, &args, &mut rng).unwrap();
        let case = Case { x, on };

        for i in 0..tree.size() {
            let sub = tree.extract_subtree(tree.subtree_from_point(i));
            let expected = reference(&set, &sub, 0, &case);
            let found = evaluated(&set, &sub, &case);
            prop_assert!(same(&expected, &found), "{}: expected {:?}, found {:?}", sub.to_sexpr(), expected, found);
        }
    }
}

#[test]
fn test_mixed_argument_order() {
    let set = palette();
    let op = |name: &str| set.find(name).unwrap();
    let mut rng = SmallRng::seed_from_u64(0);
    let mut tree = Tree::new(Arc::clone(set.registry()));
    // (weigh (join "abab" "ab") (sub x 0.5))
    tree.push_operator(op("weigh"), &mut rng);
    tree.push_operator(op("join"), &mut rng);
    tree.push_literal(op("word"), String::from("abab")).unwrap();
    tree.push_literal(op("word"), String::from("ab")).unwrap();
    tree.push_operator(op("sub"), &mut rng);
    tree.push_operator(op("x"), &mut rng);
    tree.push_literal(op("lit"), 0.5f32).unwrap();
    tree.check().unwrap();

    let case = Case { x: 3.0, on: false };
    let value: f32 = set.evaluate(&tree, &case).unwrap();
    // len("abab|ab") * 10 - (3 - 0.5)
    assert!((value - 67.5).abs() < 1e-4);

    let joined = tree.extract_subtree(tree.subtree_from_point(1));
    assert_eq!(set.evaluate::<String>(&joined, &case).unwrap(), "abab|ab");
}
