//! Typed operators and the registry that dispatches them.
//!
//! Operators are plain Rust closures. The builder derives each operator's
//! argument and return types from the closure signature, registers the
//! types, and produces an [`OperatorSet`]: the immutable metadata shared by
//! every tree plus the dispatch table used during evaluation.
//!
//! # Example
//!
//! ```
//! use rand::Rng;
//! use stgp::operator::{Operator, OperatorBuilder};
//!
//! struct Case {
//!     x: f32,
//! }
//!
//! let mut builder = OperatorBuilder::<Case>::new();
//! builder.add(Operator::new(|a: f32, b: f32| a + b).named("add"));
//! builder.add(Operator::with_context(|c: &Case| c.x).named("x"));
//! builder.add(Operator::ephemeral(|rng| rng.gen_range(-1.0f32..=1.0)).named("lit"));
//! let operators = builder.build().unwrap();
//! assert_eq!(operators.len(), 3);
//! ```

mod builder;
mod registry;
mod signature;

pub use builder::OperatorBuilder;
pub use registry::{DestroyRegion, OperatorInfo, OperatorRegistry, OperatorSet};
pub use signature::{ContextOperatorFn, Invoker, OperatorFn, Signature};

pub(crate) use signature::invariant_violation;

use crate::stack::ValueStack;
use crate::types::{TypeDescriptor, Value};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Creates the literal of an ephemeral terminal and pushes it.
pub type Producer = Box<dyn Fn(&mut SmallRng, &mut ValueStack) + Send + Sync>;

/// Dense identifier of a registered operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorId(u32);

impl OperatorId {
    /// Wrap a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index into the dispatch table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Per-operator flags copied into every tree record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperatorFlags {
    /// The operator is a terminal whose value is created at generation time.
    pub is_ephemeral: bool,
    /// The created value lives behind a refcount cell.
    pub has_ephemeral_drop: bool,
}

impl OperatorFlags {
    /// Pack into the low bits of a byte.
    #[must_use]
    pub fn to_bits(self) -> u8 {
        u8::from(self.is_ephemeral) | (u8::from(self.has_ephemeral_drop) << 1)
    }

    /// Unpack from [`OperatorFlags::to_bits`].
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self {
            is_ephemeral: bits & 1 != 0,
            has_ephemeral_drop: bits & 2 != 0,
        }
    }
}

pub(crate) enum OperatorKind<Ctx> {
    Function(Invoker<Ctx>),
    Ephemeral(Producer),
}

/// An operator waiting to be added to an [`OperatorBuilder`].
pub struct Operator<Ctx> {
    pub(crate) name: Option<String>,
    pub(crate) signature: Signature,
    pub(crate) uses_context: bool,
    pub(crate) kind: OperatorKind<Ctx>,
}

impl<Ctx: 'static> Operator<Ctx> {
    /// Wrap a plain function of up to six arguments.
    ///
    /// A function with no arguments is a terminal evaluated on every call.
    pub fn new<F, Args, Ret>(function: F) -> Self
    where
        F: OperatorFn<Args, Ret>,
    {
        Self {
            name: None,
            signature: F::signature(),
            uses_context: false,
            kind: OperatorKind::Function(function.into_invoker()),
        }
    }

    /// Wrap a function whose first parameter is the evaluation context.
    ///
    /// The context is supplied by the evaluator, not consumed from the stack.
    pub fn with_context<F, Args, Ret>(function: F) -> Self
    where
        F: ContextOperatorFn<Ctx, Args, Ret>,
    {
        Self {
            name: None,
            signature: F::signature(),
            uses_context: true,
            kind: OperatorKind::Function(function.into_invoker()),
        }
    }

    /// Create an ephemeral terminal: `produce` runs once per generated node
    /// and its value is stored in the tree.
    pub fn ephemeral<T, F>(produce: F) -> Self
    where
        T: Value,
        F: Fn(&mut SmallRng) -> T + Send + Sync + 'static,
    {
        Self {
            name: None,
            signature: Signature {
                arguments: Vec::new(),
                ret: TypeDescriptor::of::<T>(),
            },
            uses_context: false,
            kind: OperatorKind::Ephemeral(Box::new(move |rng: &mut SmallRng, stack: &mut ValueStack| {
                stack.push(produce(rng));
            })),
        }
    }

    /// Attach a printable name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl<Ctx> Operator<Ctx> {
    /// Printable name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of stack arguments.
    #[must_use]
    pub fn argc(&self) -> usize {
        self.signature.argc()
    }

    /// Whether this is an ephemeral terminal.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self.kind, OperatorKind::Ephemeral(_))
    }
}

impl<Ctx> fmt::Debug for Operator<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("argc", &self.argc())
            .field("returns", &self.signature.ret.name)
            .field("uses_context", &self.uses_context)
            .field("ephemeral", &self.is_ephemeral())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_bits() {
        for flags in [
            OperatorFlags::default(),
            OperatorFlags {
                is_ephemeral: true,
                has_ephemeral_drop: false,
            },
            OperatorFlags {
                is_ephemeral: true,
                has_ephemeral_drop: true,
            },
        ] {
            assert_eq!(OperatorFlags::from_bits(flags.to_bits()), flags);
        }
    }

    #[test]
    fn test_operator_shapes() {
        let add = Operator::<()>::new(|a: f64, b: f64| a + b).named("add");
        assert_eq!(add.argc(), 2);
        assert_eq!(add.name(), Some("add"));
        assert!(!add.is_ephemeral());

        let lit = Operator::<()>::ephemeral(|_| 1.0f64);
        assert_eq!(lit.argc(), 0);
        assert!(lit.is_ephemeral());
    }
}
