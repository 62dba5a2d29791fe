//! Error types for the genetic programming engine.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures a function can produce. [`ProgramError`] wraps them for the
//! generational driver.

use crate::types::TypeId;
use std::io;
use thiserror::Error;

/// Failure of a [`ValueStack`](crate::stack::ValueStack) access.
///
/// Inside evaluation these are invariant violations and abort the program;
/// they surface as values only through the raw stack API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackError {
    /// The head page holds fewer bytes than requested.
    #[error("stack underflow: requested {requested} bytes, {available} available")]
    Underflow {
        /// Bytes the caller asked for.
        requested: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// A positional access walked past the bottom of the stack.
    #[error("stack access out of range: offset {offset} + {size} bytes exceeds {total}")]
    OutOfRange {
        /// Offset of the access.
        offset: usize,
        /// Size of the accessed value.
        size: usize,
        /// Total bytes on the stack.
        total: usize,
    },
}

/// Failure while building an operator set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// No operators were registered.
    #[error("operator set is empty")]
    Empty,
    /// A value type needs more than 8-byte alignment.
    #[error("type `{0}` requires alignment above 8 bytes")]
    UnsupportedAlignment(String),
    /// A value type is wider than a tree record can describe.
    #[error("type `{0}` is too large to store inline")]
    UnsupportedSize(String),
    /// No finite tree can produce a value of this type.
    #[error("type `{0}` has no terminal path and can never be generated")]
    UngroundedType(String),
    /// The requested root type is produced by no operator.
    #[error("root type `{0}` is not produced by any operator")]
    UnknownRootType(String),
}

/// Structural invariant violation detected by [`Tree::check`](crate::tree::Tree::check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Literal bytes do not match the value records.
    #[error("value bytes mismatch: records describe {expected} bytes, stack holds {actual}")]
    ByteMismatch {
        /// Sum of `type_size` over value records.
        expected: usize,
        /// Bytes on the value stack.
        actual: usize,
    },
    /// The arity walk did not end exactly at the last record.
    #[error("arity walk ends at {end} but tree has {len} records")]
    UnbalancedArity {
        /// Where the walk stopped.
        end: usize,
        /// Number of records.
        len: usize,
    },
    /// A child returns a type its parent does not accept.
    #[error("child at {index} returns type {found} where {expected} is required")]
    TypeMismatch {
        /// Index of the offending child.
        index: usize,
        /// Type required by the parent.
        expected: TypeId,
        /// Type returned by the child.
        found: TypeId,
    },
    /// A literal was pushed for an operator that does not store one of that type.
    #[error("record {index} expects a literal of type `{expected}`")]
    LiteralMismatch {
        /// Index the record would have had.
        index: usize,
        /// Type the operator produces.
        expected: String,
    },
    /// A record references an operator the registry does not know.
    #[error("record {index} references unknown operator {id}")]
    UnknownOperator {
        /// Index of the record.
        index: usize,
        /// Raw operator id.
        id: u64,
    },
}

/// Failure of a tree generator or a crossover operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// No operator (or no crossover point) of a matching type exists.
    #[error("no valid type{}", .0.map(|t| format!(" for {t}")).unwrap_or_default())]
    NoValidType(Option<TypeId>),
    /// A parent is below the configured minimum size.
    #[error("tree too small: {size} < {min}")]
    TreeTooSmall {
        /// Size of the offending tree.
        size: usize,
        /// Configured minimum.
        min: usize,
    },
}

/// Failure reading an evaluation result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// No evaluation result is pending.
    #[error("no evaluation result on the stack")]
    Empty,
    /// The caller asked for a different type than the root returns.
    #[error("tree returns `{found}` but `{requested}` was requested")]
    TypeMismatch {
        /// Type the caller asked for.
        requested: &'static str,
        /// Type the tree root produces.
        found: String,
    },
}

/// Error raised by a user fitness function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fitness evaluation failed: {0}")]
pub struct FitnessError(pub String);

impl FitnessError {
    /// Create a fitness error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<EvaluationError> for FitnessError {
    fn from(e: EvaluationError) -> Self {
        Self(e.to_string())
    }
}

/// Failure preparing a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Fitness-proportionate selection ran before statistics were computed.
    #[error("normalized fitness has not been computed for this population")]
    MissingNormalizedFitness,
    /// Selection was asked to pick from an empty population.
    #[error("cannot select from an empty population")]
    EmptyPopulation,
}

/// Failure reading or writing a byte stream.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The stream ended early or the reader failed.
    #[error("invalid read: {0}")]
    InvalidRead(#[source] io::Error),
    /// The writer failed.
    #[error("write failed: {0}")]
    Io(#[source] io::Error),
    /// A count in the stream disagrees with the program.
    #[error("unexpected size: expected {expected}, found {found}")]
    UnexpectedSize {
        /// Count the program requires.
        expected: u64,
        /// Count found in the stream.
        found: u64,
    },
    /// An operator index is out of range or out of order.
    #[error("invalid operator id {0}")]
    InvalidOperatorId(u64),
    /// An operator name differs or is not valid UTF-8.
    #[error("operator {id} name mismatch: expected {expected:?}, found {found:?}")]
    InvalidName {
        /// Operator index.
        id: u64,
        /// Name in the program.
        expected: Option<String>,
        /// Name in the stream.
        found: Option<String>,
    },
    /// Byte sizes disagree with the registered types.
    #[error("mismatched bytes for operator {id}: expected {expected}, found {found}")]
    MismatchedBytes {
        /// Operator index (or record index for tree payloads).
        id: u64,
        /// Size the program requires.
        expected: u64,
        /// Size in the stream.
        found: u64,
    },
    /// Argument counts disagree.
    #[error("mismatched argc for operator {id}")]
    MismatchedArgc {
        /// Operator index.
        id: u64,
    },
    /// Return types disagree.
    #[error("mismatched return type for operator {id}")]
    MismatchedReturnType {
        /// Operator index.
        id: u64,
    },
    /// Argument types disagree.
    #[error("mismatched argument type {position} for operator {id}")]
    MismatchedArgType {
        /// Operator index.
        id: u64,
        /// Argument position.
        position: usize,
    },
    /// A loaded tree violates a structural invariant.
    #[error("malformed tree: {0}")]
    MalformedTree(#[from] TreeError),
    /// A tree holds a literal whose bytes are a live pointer.
    #[error("operator {0} produces values with destructors, which cannot be serialized")]
    UnserializableValue(u64),
}

impl From<io::Error> for SerializationError {
    fn from(e: io::Error) -> Self {
        Self::InvalidRead(e)
    }
}

/// Invalid program configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The population must hold at least one individual.
    #[error("population size must be positive")]
    EmptyPopulation,
    /// More elites than individuals.
    #[error("elites ({elites}) exceed population size ({population})")]
    TooManyElites {
        /// Configured elites.
        elites: usize,
        /// Configured population size.
        population: usize,
    },
    /// Variation weights are negative or all zero.
    #[error("variation chances must be non-negative and not all zero")]
    InvalidChances,
    /// Depth bounds are inverted.
    #[error("invalid depth bounds {min}..={max}")]
    InvalidDepth {
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },
    /// The root type has no operators.
    #[error("no operators produce the root type")]
    EmptyRootType,
}

/// Error surfaced by the generational driver.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A generator could not build a tree.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// A selector could not be prepared.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// The fitness function failed; the generation was aborted.
    #[error(transparent)]
    Fitness(#[from] FitnessError),
    /// Reading or writing state failed.
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    /// The worker pool could not be created.
    #[error("thread pool: {0}")]
    ThreadPool(String),
}

/// Result alias for driver operations.
pub type ProgramResult<T> = Result<T, ProgramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_display() {
        let e = GenerationError::NoValidType(None);
        assert_eq!(e.to_string(), "no valid type");
        let e = GenerationError::NoValidType(Some(TypeId::new(3)));
        assert!(e.to_string().contains('3'));
    }

    #[test]
    fn test_fitness_error_from_evaluation() {
        let e: FitnessError = EvaluationError::Empty.into();
        assert!(e.0.contains("no evaluation result"));
    }
}
