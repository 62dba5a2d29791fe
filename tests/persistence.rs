//! Saving, loading and resuming runs.
//!
//! Run with: cargo test --release persistence

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

use std::fs::File;
use std::io::BufReader;
use stgp::error::{FitnessError, SerializationError};
use stgp::program::{SyncMode, SyncScheduler, SyncTarget, SyncTrigger};
use stgp::serialize::{read_generation, read_schema, write_generation, write_schema};
use stgp::{Candidate, Fitness, Operator, OperatorBuilder, OperatorSet, Program, ProgramConfig, ProgramState};

fn arithmetic() -> OperatorSet<f32> {
    OperatorBuilder::<f32>::new()
        .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
        .with(Operator::new(|a: f32, b: f32| a - b).named("sub"))
        .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
        .with(Operator::with_context(|x: &f32| *x).named("x"))
        .with(Operator::ephemeral(|_| 0.5f32).named("half"))
        .build()
        .unwrap()
}

fn config(generations: usize, threads: usize) -> ProgramConfig {
    ProgramConfig {
        population_size: 80,
        max_generations: generations,
        initial_min_tree_size: 2,
        initial_max_tree_size: 4,
        max_tree_depth: 10,
        threads,
        evaluation_size: 8,
        ..ProgramConfig::default()
    }
}

fn quartic(candidate: &mut Candidate<'_, f32>, fitness: &mut Fitness, _: usize) -> Result<bool, FitnessError> {
    let mut error = 0.0f64;
    for i in 0..20u8 {
        let x = f64::from(i) / 4.0 - 2.5;
        let y: f32 = candidate.evaluate(&(x as f32))?;
        let diff = (f64::from(y) - (x.powi(4) + x.powi(3) + x.powi(2) + x)).abs();
        error += if diff.is_finite() { diff } else { 1e12 };
    }
    fitness.raw = error;
    fitness.standardized = error;
    Ok(false)
}

#[test]
fn test_resumed_run_matches_uninterrupted() {
    let mut whole = Program::new(arithmetic(), config(20, 2)).unwrap();
    whole.run(&quartic).unwrap();
    assert_eq!(whole.history().len(), 21);

    let mut first = Program::new(arithmetic(), config(10, 3)).unwrap();
    first.run(&quartic).unwrap();
    let mut saved = Vec::new();
    first.save_state(&mut saved).unwrap();

    let mut resumed = Program::new(arithmetic(), config(20, 4)).unwrap();
    resumed.load_state(&mut saved.as_slice()).unwrap();
    assert_eq!(resumed.generation(), 10);
    assert_eq!(resumed.state(), ProgramState::SelectAndVary);
    assert_eq!(resumed.history(), first.history());
    resumed.run(&quartic).unwrap();

    assert_eq!(resumed.history(), whole.history());
    let expected: Vec<String> = whole.best_trees(5).iter().map(|t| t.to_sexpr()).collect();
    let found: Vec<String> = resumed.best_trees(5).iter().map(|t| t.to_sexpr()).collect();
    assert_eq!(found, expected);
}

#[test]
fn test_generation_round_trip_is_byte_identical() {
    let mut program = Program::new(arithmetic(), config(2, 2)).unwrap();
    program.run(&quartic).unwrap();

    let mut bytes = Vec::new();
    write_generation(&mut bytes, program.population()).unwrap();
    let loaded = read_generation(&mut bytes.as_slice(), program.operators().registry()).unwrap();

    assert_eq!(loaded.len(), program.population().len());
    for (a, b) in loaded.iter().zip(program.population().iter()) {
        assert_eq!(a.tree.operations(), b.tree.operations());
        assert_eq!(a.tree.value_bytes(), b.tree.value_bytes());
        assert_eq!(a.fitness, b.fitness);
    }
}

#[test]
fn test_load_generation_reevaluates() {
    let mut source = Program::new(arithmetic(), config(3, 2)).unwrap();
    source.run(&quartic).unwrap();
    let mut bytes = Vec::new();
    source.save_generation(&mut bytes).unwrap();

    let mut target = Program::new(arithmetic(), config(3, 2)).unwrap();
    target.load_generation(&mut bytes.as_slice()).unwrap();
    assert_eq!(target.state(), ProgramState::Evaluate);
    assert_eq!(target.step(&quartic).unwrap(), ProgramState::Report);
    assert_eq!(target.stats(), source.stats());
}

#[test]
fn test_sync_writes_loadable_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.state");

    let mut program = Program::new(arithmetic(), config(6, 2)).unwrap();
    program.set_sync(Some(
        SyncScheduler::new(&path, SyncTrigger::EveryGenerations(3))
            .with_mode(SyncMode::Overwrite)
            .with_target(SyncTarget::State),
    ));
    program.run(&quartic).unwrap();

    let mut reloaded = Program::new(arithmetic(), config(6, 2)).unwrap();
    let file = File::open(&path).unwrap();
    reloaded.load_state(&mut BufReader::new(file)).unwrap();
    // The last flush happened when generation 6 was reported.
    assert_eq!(reloaded.generation(), 6);
    assert_eq!(reloaded.history(), program.history());
}

#[test]
fn test_truncated_state_leaves_program_untouched() {
    let mut program = Program::new(arithmetic(), config(2, 2)).unwrap();
    program.run(&quartic).unwrap();
    let mut saved = Vec::new();
    program.save_state(&mut saved).unwrap();

    let mut target = Program::new(arithmetic(), config(2, 2)).unwrap();
    let err = target.load_state(&mut &saved[..saved.len() - 3]).unwrap_err();
    assert!(matches!(err, SerializationError::InvalidRead(_)));
    assert_eq!(target.state(), ProgramState::Initial);
    assert!(target.history().is_empty());
}

/// Two value types so that return and argument types can disagree.
fn widening(build: impl FnOnce(OperatorBuilder<()>) -> OperatorBuilder<()>) -> OperatorSet<()> {
    let base = OperatorBuilder::<()>::new().with(Operator::new(|a: f32, b: f32| a + b).named("add"));
    let mut builder = build(base)
        .with(Operator::new(|| 1.0f64).named("one"))
        .with(Operator::ephemeral(|_| 0.5f32).named("half"));
    builder.set_root_type::<f32>();
    builder.build().unwrap()
}

fn reference() -> OperatorSet<()> {
    widening(|b| b.with(Operator::new(|a: f64| a as f32).named("narrow")))
}

fn check_against(other: &OperatorSet<()>) -> Result<(), SerializationError> {
    let mut bytes = Vec::new();
    write_schema(&mut bytes, reference().registry()).unwrap();
    read_schema(&mut bytes.as_slice(), other.registry())
}

#[test]
fn test_schema_accepts_same_palette() {
    check_against(&reference()).unwrap();
}

#[test]
fn test_schema_rejects_renamed_operator() {
    let other = widening(|b| b.with(Operator::new(|a: f64| a as f32).named("cast")));
    assert!(matches!(
        check_against(&other),
        Err(SerializationError::InvalidName { id: 1, .. })
    ));
}

#[test]
fn test_schema_rejects_argc_change() {
    let other = widening(|b| b.with(Operator::new(|a: f64, _b: f64| a as f32).named("narrow")));
    assert!(matches!(
        check_against(&other),
        Err(SerializationError::MismatchedArgc { id: 1 })
    ));
}

#[test]
fn test_schema_rejects_return_type_change() {
    let other = widening(|b| b.with(Operator::new(|a: f64| a).named("narrow")));
    assert!(matches!(
        check_against(&other),
        Err(SerializationError::MismatchedReturnType { id: 1 })
    ));
}

#[test]
fn test_schema_rejects_argument_type_change() {
    let other = widening(|b| b.with(Operator::new(|a: f32| a).named("narrow")));
    assert!(matches!(
        check_against(&other),
        Err(SerializationError::MismatchedArgType { id: 1, position: 0 })
    ));
}

#[test]
fn test_schema_rejects_extra_operator() {
    let other = widening(|b| {
        b.with(Operator::new(|a: f64| a as f32).named("narrow"))
            .with(Operator::new(|a: f32| -a).named("neg"))
    });
    assert!(matches!(
        check_against(&other),
        Err(SerializationError::UnexpectedSize { expected: 5, found: 4 })
    ));
}

#[test]
fn test_state_from_other_palette_rejected() {
    let mut program = Program::new(arithmetic(), config(1, 2)).unwrap();
    program.run(&quartic).unwrap();
    let mut saved = Vec::new();
    program.save_state(&mut saved).unwrap();

    let renamed = OperatorBuilder::<f32>::new()
        .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
        .with(Operator::new(|a: f32, b: f32| a - b).named("minus"))
        .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
        .with(Operator::with_context(|x: &f32| *x).named("x"))
        .with(Operator::ephemeral(|_| 0.5f32).named("half"))
        .build()
        .unwrap();
    let mut other = Program::new(renamed, config(1, 2)).unwrap();
    assert!(matches!(
        other.load_state(&mut saved.as_slice()),
        Err(SerializationError::InvalidName { id: 1, .. })
    ));
}
