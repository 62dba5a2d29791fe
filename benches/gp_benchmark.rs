//! Benchmarks for tree evaluation, generation and crossover.

#![allow(missing_docs)] // Benchmark macros generate undocumented functions
#![allow(clippy::unwrap_used)]

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use stgp::gp::{CrossoverConfig, Full, Generator, GeneratorArgs, Grow};
use stgp::{EvaluationContext, Operator, OperatorBuilder, OperatorSet, Tree};

fn palette() -> OperatorSet<f32> {
    OperatorBuilder::<f32>::new()
        .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
        .with(Operator::new(|a: f32, b: f32| a - b).named("sub"))
        .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
        .with(Operator::with_context(|x: &f32| *x).named("x"))
        .with(Operator::ephemeral(|_| 0.5f32).named("lit"))
        .build()
        .unwrap()
}

fn full_tree(set: &OperatorSet<f32>, depth: usize, seed: u64) -> Tree {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut tree = Tree::new(Arc::clone(set.registry()));
    let args = GeneratorArgs {
        root_type: set.types().id_of::<f32>().unwrap(),
        min_depth: depth,
        max_depth: depth,
    };
    Full.generate(&mut tree, &args, &mut rng).unwrap();
    tree
}

fn bench_evaluate(c: &mut Criterion) {
    let set = palette();
    // 2^9 - 1 nodes
    let tree = full_tree(&set, 8, 1);
    let mut scratch = EvaluationContext::new();

    c.bench_function("evaluate_depth8", |b| {
        b.iter(|| {
            for i in 0..100u8 {
                let x = f32::from(i) / 10.0;
                let value: f32 = scratch
                    .evaluate(&set, &tree, black_box(&x))
                    .get_evaluation_value()
                    .unwrap();
                black_box(value);
            }
        });
    });
}

fn bench_generate(c: &mut Criterion) {
    let set = palette();
    let root = set.types().id_of::<f32>().unwrap();
    let grow = Grow::default();
    let mut rng = SmallRng::seed_from_u64(2);

    c.bench_function("grow_depth2_6", |b| {
        b.iter(|| {
            let mut tree = Tree::new(Arc::clone(set.registry()));
            let args = GeneratorArgs {
                root_type: root,
                min_depth: 2,
                max_depth: 6,
            };
            grow.generate(&mut tree, &args, &mut rng).unwrap();
            black_box(tree)
        });
    });
}

fn bench_crossover(c: &mut Criterion) {
    let set = palette();
    let p1 = full_tree(&set, 6, 3);
    let p2 = full_tree(&set, 6, 4);
    let crossover = CrossoverConfig::default().build();
    let mut rng = SmallRng::seed_from_u64(5);

    c.bench_function("subtree_crossover_depth6", |b| {
        b.iter(|| black_box(crossover.apply(&p1, &p2, &mut rng)));
    });
}

criterion_group!(benches, bench_evaluate, bench_generate, bench_crossover);
criterion_main!(benches);
