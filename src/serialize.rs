//! Little-endian byte streams for trees, generations and program state.
//!
//! # Layout
//!
//! ```text
//! tree        u64 n; n × { u16 type_size; u64 op_id; u8 flags }; u64 bytes; bytes
//! fitness     f64 raw; f64 standardized; f64 adjusted; i64 hits
//! generation  u64 n; n × { fitness; tree }
//! stats       f64 best; f64 worst; f64 average; f64 overall; u64 n; n × f64
//! schema      u64 n; n × operator
//! operator    u64 index; u8 has_name; [u64 len; bytes]; u64 arg_bytes;
//!             u64 return_bytes; u16 argc; u16 argc_context; u64 return_type;
//!             u64 n; n × u64 argument_type
//! state       schema; u64 n; n × stats; stats; generation
//! ```
//!
//! Readers validate everything against the operator registry they are
//! given. Literals of types with destructors hold live pointers and are
//! rejected on both sides.

// Stream counts are u64; in-memory counts are usize
#![allow(clippy::cast_possible_truncation)]

use crate::error::SerializationError;
use crate::gp::{Fitness, Individual, Population, PopulationStats};
use crate::operator::{OperatorFlags, OperatorId, OperatorInfo, OperatorRegistry};
use crate::tree::{OpRecord, Tree};
use crate::types::TypeId;
use std::io::{Read, Write};
use std::sync::Arc;

/// Upper bound on capacity reserved from an untrusted count.
const MAX_PREALLOC: usize = 1 << 16;

/// Statistics history, current statistics and population of a saved program.
#[derive(Debug, Clone, Default)]
pub struct SavedState {
    /// One entry per reported generation.
    pub history: Vec<PopulationStats>,
    /// Statistics of `population`.
    pub stats: PopulationStats,
    /// The evaluated population.
    pub population: Population,
}

fn put(w: &mut impl Write, bytes: &[u8]) -> Result<(), SerializationError> {
    w.write_all(bytes).map_err(SerializationError::Io)
}

fn put_u64(w: &mut impl Write, v: u64) -> Result<(), SerializationError> {
    put(w, &v.to_le_bytes())
}

fn put_len(w: &mut impl Write, n: usize) -> Result<(), SerializationError> {
    put_u64(w, n as u64)
}

fn put_f64(w: &mut impl Write, v: f64) -> Result<(), SerializationError> {
    put(w, &v.to_le_bytes())
}

fn get<const N: usize>(r: &mut impl Read) -> Result<[u8; N], SerializationError> {
    let mut bytes = [0u8; N];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn get_u8(r: &mut impl Read) -> Result<u8, SerializationError> {
    Ok(get::<1>(r)?[0])
}

fn get_u16(r: &mut impl Read) -> Result<u16, SerializationError> {
    Ok(u16::from_le_bytes(get(r)?))
}

fn get_u64(r: &mut impl Read) -> Result<u64, SerializationError> {
    Ok(u64::from_le_bytes(get(r)?))
}

fn get_f64(r: &mut impl Read) -> Result<f64, SerializationError> {
    Ok(f64::from_le_bytes(get(r)?))
}

fn get_len(r: &mut impl Read) -> Result<usize, SerializationError> {
    let n = get_u64(r)?;
    usize::try_from(n).map_err(|_| SerializationError::UnexpectedSize {
        expected: usize::MAX as u64,
        found: n,
    })
}

fn type_bits(ty: TypeId) -> u64 {
    ty.index() as u64
}

/// Write one tree.
///
/// # Errors
///
/// Returns [`SerializationError::UnserializableValue`] if the tree holds a
/// literal with a destructor, or [`SerializationError::Io`] on write failure.
pub fn write_tree(w: &mut impl Write, tree: &Tree) -> Result<(), SerializationError> {
    if let Some(record) = tree.operations().iter().find(|r| r.flags().has_ephemeral_drop) {
        return Err(SerializationError::UnserializableValue(record.id().index() as u64));
    }
    put_len(w, tree.size())?;
    for record in tree.operations() {
        put(w, &record.type_size.to_le_bytes())?;
        put_u64(w, record.id().index() as u64)?;
        put(w, &[record.flags().to_bits()])?;
    }
    let bytes = tree.value_bytes();
    put_len(w, bytes.len())?;
    put(w, &bytes)
}

/// Read one tree over `registry`.
///
/// # Errors
///
/// Returns the first mismatch between the stream and the registry, or
/// [`SerializationError::MalformedTree`] if the records do not form a
/// well-typed tree.
pub fn read_tree(r: &mut impl Read, registry: &Arc<OperatorRegistry>) -> Result<Tree, SerializationError> {
    let count = get_len(r)?;
    let mut records = Vec::with_capacity(count.min(MAX_PREALLOC));
    for index in 0..count {
        let type_size = get_u16(r)?;
        let raw = get_u64(r)?;
        let flags = OperatorFlags::from_bits(get_u8(r)?);
        let id = u32::try_from(raw)
            .ok()
            .map(OperatorId::new)
            .filter(|&id| registry.get(id).is_some())
            .ok_or(SerializationError::InvalidOperatorId(raw))?;
        let info = registry.operator(id);
        if usize::from(type_size) != info.return_size_bytes() {
            return Err(SerializationError::MismatchedBytes {
                id: index as u64,
                expected: info.return_size_bytes() as u64,
                found: u64::from(type_size),
            });
        }
        if flags.has_ephemeral_drop || info.flags().has_ephemeral_drop {
            return Err(SerializationError::UnserializableValue(raw));
        }
        if flags != info.flags() {
            return Err(SerializationError::InvalidOperatorId(raw));
        }
        records.push(OpRecord {
            type_size,
            id,
            is_value: flags.is_ephemeral,
            flags,
        });
    }

    let expected: usize = records.iter().filter(|r| r.is_value).map(OpRecord::type_size).sum();
    let found = get_u64(r)?;
    if found != expected as u64 {
        return Err(SerializationError::UnexpectedSize {
            expected: expected as u64,
            found,
        });
    }
    let mut bytes = vec![0u8; expected];
    r.read_exact(&mut bytes)?;

    let mut tree = Tree::new(Arc::clone(registry));
    tree.operations = records;
    if !bytes.is_empty() {
        tree.values.copy_from(&bytes);
    }
    tree.check()?;
    Ok(tree)
}

/// Write a fitness record.
///
/// # Errors
///
/// Returns [`SerializationError::Io`] on write failure.
pub fn write_fitness(w: &mut impl Write, fitness: &Fitness) -> Result<(), SerializationError> {
    put_f64(w, fitness.raw)?;
    put_f64(w, fitness.standardized)?;
    put_f64(w, fitness.adjusted)?;
    put(w, &fitness.hits.to_le_bytes())
}

/// Read a fitness record.
///
/// # Errors
///
/// Returns [`SerializationError::InvalidRead`] if the stream ends early.
pub fn read_fitness(r: &mut impl Read) -> Result<Fitness, SerializationError> {
    Ok(Fitness {
        raw: get_f64(r)?,
        standardized: get_f64(r)?,
        adjusted: get_f64(r)?,
        hits: i64::from_le_bytes(get(r)?),
    })
}

/// Write every individual with its fitness.
///
/// # Errors
///
/// As for [`write_tree`].
pub fn write_generation(w: &mut impl Write, population: &[Individual]) -> Result<(), SerializationError> {
    put_len(w, population.len())?;
    for individual in population {
        write_fitness(w, &individual.fitness)?;
        write_tree(w, &individual.tree)?;
    }
    Ok(())
}

/// Read a generation written by [`write_generation`].
///
/// # Errors
///
/// As for [`read_tree`].
pub fn read_generation(r: &mut impl Read, registry: &Arc<OperatorRegistry>) -> Result<Population, SerializationError> {
    let count = get_len(r)?;
    let mut individuals = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        let fitness = read_fitness(r)?;
        let tree = read_tree(r, registry)?;
        individuals.push(Individual { tree, fitness });
    }
    Ok(Population::new(individuals))
}

/// Write a statistics record.
///
/// # Errors
///
/// Returns [`SerializationError::Io`] on write failure.
pub fn write_stats(w: &mut impl Write, stats: &PopulationStats) -> Result<(), SerializationError> {
    put_f64(w, stats.best_fitness)?;
    put_f64(w, stats.worst_fitness)?;
    put_f64(w, stats.average_fitness)?;
    put_f64(w, stats.overall_fitness)?;
    put_len(w, stats.normalized_fitness.len())?;
    for &f in &stats.normalized_fitness {
        put_f64(w, f)?;
    }
    Ok(())
}

/// Read a statistics record.
///
/// # Errors
///
/// Returns [`SerializationError::InvalidRead`] if the stream ends early.
pub fn read_stats(r: &mut impl Read) -> Result<PopulationStats, SerializationError> {
    let best_fitness = get_f64(r)?;
    let worst_fitness = get_f64(r)?;
    let average_fitness = get_f64(r)?;
    let overall_fitness = get_f64(r)?;
    let count = get_len(r)?;
    let mut normalized_fitness = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        normalized_fitness.push(get_f64(r)?);
    }
    Ok(PopulationStats {
        best_fitness,
        worst_fitness,
        average_fitness,
        overall_fitness,
        normalized_fitness,
    })
}

fn write_operator(w: &mut impl Write, info: &OperatorInfo) -> Result<(), SerializationError> {
    put_u64(w, info.id().index() as u64)?;
    match info.name() {
        Some(name) => {
            put(w, &[1])?;
            put_len(w, name.len())?;
            put(w, name.as_bytes())?;
        }
        None => put(w, &[0])?,
    }
    put_len(w, info.arg_size_bytes())?;
    put_len(w, info.return_size_bytes())?;
    put(w, &(info.argc() as u16).to_le_bytes())?;
    put(w, &info.argc_context().to_le_bytes())?;
    put_u64(w, type_bits(info.return_type()))?;
    put_len(w, info.argc())?;
    for &ty in info.argument_types() {
        put_u64(w, type_bits(ty))?;
    }
    Ok(())
}

/// Write the operator palette.
///
/// # Errors
///
/// Returns [`SerializationError::Io`] on write failure.
pub fn write_schema(w: &mut impl Write, registry: &OperatorRegistry) -> Result<(), SerializationError> {
    put_len(w, registry.len())?;
    for info in registry.operators() {
        write_operator(w, info)?;
    }
    Ok(())
}

struct StoredOperator {
    index: u64,
    name: Option<String>,
    arg_bytes: u64,
    return_bytes: u64,
    argc: u16,
    argc_context: u16,
    return_type: u64,
    argument_types: Vec<u64>,
}

fn read_operator(r: &mut impl Read) -> Result<StoredOperator, SerializationError> {
    let index = get_u64(r)?;
    let name = if get_u8(r)? == 0 {
        None
    } else {
        let len = get_len(r)?;
        let mut bytes = vec![0u8; len.min(MAX_PREALLOC)];
        if len > bytes.len() {
            return Err(SerializationError::InvalidName {
                id: index,
                expected: None,
                found: None,
            });
        }
        r.read_exact(&mut bytes)?;
        Some(String::from_utf8(bytes).map_err(|_| SerializationError::InvalidName {
            id: index,
            expected: None,
            found: None,
        })?)
    };
    let arg_bytes = get_u64(r)?;
    let return_bytes = get_u64(r)?;
    let argc = get_u16(r)?;
    let argc_context = get_u16(r)?;
    let return_type = get_u64(r)?;
    let count = get_len(r)?;
    let mut argument_types = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        argument_types.push(get_u64(r)?);
    }
    Ok(StoredOperator {
        index,
        name,
        arg_bytes,
        return_bytes,
        argc,
        argc_context,
        return_type,
        argument_types,
    })
}

fn check_operator(stored: &StoredOperator, position: usize, info: &OperatorInfo) -> Result<(), SerializationError> {
    let id = stored.index;
    if id != position as u64 {
        return Err(SerializationError::InvalidOperatorId(id));
    }
    if stored.name.as_deref() != info.name() {
        return Err(SerializationError::InvalidName {
            id,
            expected: info.name().map(str::to_string),
            found: stored.name.clone(),
        });
    }
    if usize::from(stored.argc) != info.argc() || stored.argc_context != info.argc_context() {
        return Err(SerializationError::MismatchedArgc { id });
    }
    if stored.return_type != type_bits(info.return_type()) {
        return Err(SerializationError::MismatchedReturnType { id });
    }
    if stored.argument_types.len() != info.argc() {
        return Err(SerializationError::MismatchedArgc { id });
    }
    for (arg, (&found, &expected)) in stored.argument_types.iter().zip(info.argument_types()).enumerate() {
        if found != type_bits(expected) {
            return Err(SerializationError::MismatchedArgType { id, position: arg });
        }
    }
    if stored.arg_bytes != info.arg_size_bytes() as u64 {
        return Err(SerializationError::MismatchedBytes {
            id,
            expected: info.arg_size_bytes() as u64,
            found: stored.arg_bytes,
        });
    }
    if stored.return_bytes != info.return_size_bytes() as u64 {
        return Err(SerializationError::MismatchedBytes {
            id,
            expected: info.return_size_bytes() as u64,
            found: stored.return_bytes,
        });
    }
    Ok(())
}

/// Read a palette and check it matches `registry` operator by operator.
///
/// # Errors
///
/// Returns [`SerializationError::UnexpectedSize`] if the operator counts
/// differ, otherwise the first field mismatch in the order index, name,
/// argument count, return type, argument types, byte sizes.
pub fn read_schema(r: &mut impl Read, registry: &OperatorRegistry) -> Result<(), SerializationError> {
    let count = get_u64(r)?;
    if count != registry.len() as u64 {
        return Err(SerializationError::UnexpectedSize {
            expected: registry.len() as u64,
            found: count,
        });
    }
    for (position, info) in registry.operators().enumerate() {
        let stored = read_operator(r)?;
        check_operator(&stored, position, info)?;
    }
    Ok(())
}

/// Write the palette, statistics and population.
///
/// # Errors
///
/// As for [`write_generation`].
pub fn write_state(
    w: &mut impl Write,
    registry: &OperatorRegistry,
    history: &[PopulationStats],
    stats: &PopulationStats,
    population: &[Individual],
) -> Result<(), SerializationError> {
    write_schema(w, registry)?;
    put_len(w, history.len())?;
    for entry in history {
        write_stats(w, entry)?;
    }
    write_stats(w, stats)?;
    write_generation(w, population)
}

/// Read a state written by [`write_state`] into `registry`.
///
/// # Errors
///
/// As for [`read_schema`] and [`read_generation`].
pub fn read_state(r: &mut impl Read, registry: &Arc<OperatorRegistry>) -> Result<SavedState, SerializationError> {
    read_schema(r, registry)?;
    let count = get_len(r)?;
    let mut history = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        history.push(read_stats(r)?);
    }
    let stats = read_stats(r)?;
    let population = read_generation(r, registry)?;
    Ok(SavedState {
        history,
        stats,
        population,
    })
}
