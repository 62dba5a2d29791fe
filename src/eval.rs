//! Tree evaluation.
//!
//! The evaluator walks a tree's records in reverse. A literal record copies
//! its bytes from the tree onto the scratch stack; any other record invokes
//! its operator, which consumes its arguments from the top of the scratch
//! stack and pushes its result. One value of the root type remains.

use crate::error::EvaluationError;
use crate::operator::{OperatorRegistry, OperatorSet, invariant_violation};
use crate::stack::ValueStack;
use crate::tree::Tree;
use crate::types::{TypeId, Value};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

struct Pending {
    registry: Arc<OperatorRegistry>,
    ty: TypeId,
}

/// Scratch arena for evaluating trees, one per worker.
#[derive(Default)]
pub struct EvaluationContext {
    values: ValueStack,
    pending: Option<Pending>,
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("values", &self.values)
            .field("pending", &self.pending.as_ref().map(|p| p.ty))
            .finish()
    }
}

impl EvaluationContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `tree` against `ctx`, leaving its result pending.
    ///
    /// Any result still pending from a previous call is destroyed first.
    ///
    /// # Panics
    ///
    /// Panics if the tree is structurally invalid (an evaluation stack
    /// invariant violation).
    pub fn evaluate<Ctx>(&mut self, operators: &OperatorSet<Ctx>, tree: &Tree, ctx: &Ctx) -> &mut Self {
        self.discard();
        self.values.reset();
        let Some(root) = tree.operations().first() else {
            return self;
        };
        self.values.reserve(tree.values().size_bytes() + tree.size() * crate::types::ALIGNMENT);

        let registry = tree.registry();
        let literals = tree.values();
        let mut cursor = 0;
        for record in tree.operations().iter().rev() {
            if record.is_value() {
                let size = record.type_size();
                let bytes = literals
                    .bytes_at(cursor, size)
                    .unwrap_or_else(|e| invariant_violation(e));
                cursor += size;
                self.values.copy_from(bytes);
                if record.flags().has_ephemeral_drop {
                    let ty = registry.operator(record.id()).return_type();
                    let ptr = self
                        .values
                        .access_pointer(0, size)
                        .unwrap_or_else(|e| invariant_violation(e));
                    // SAFETY: the bytes are a copy of a live literal; the copy
                    // now owns one reference, which the consuming operator takes.
                    unsafe { registry.retain(ty, ptr) };
                }
            } else {
                operators.invoke(record.id(), ctx, &mut self.values);
            }
        }

        let ty = registry.operator(root.id()).return_type();
        let expected = registry.types().info(ty).size();
        if self.values.size_bytes() != expected {
            invariant_violation(crate::error::StackError::OutOfRange {
                offset: 0,
                size: expected,
                total: self.values.size_bytes(),
            });
        }
        self.pending = Some(Pending {
            registry: Arc::clone(registry),
            ty,
        });
        self
    }

    fn check_type<T: Value>(&self) -> Result<&Pending, EvaluationError> {
        let pending = self.pending.as_ref().ok_or(EvaluationError::Empty)?;
        let info = pending.registry.types().info(pending.ty);
        if info.is::<T>() {
            Ok(pending)
        } else {
            Err(EvaluationError::TypeMismatch {
                requested: std::any::type_name::<T>(),
                found: info.name().to_string(),
            })
        }
    }

    /// Take the pending result by value.
    ///
    /// # Errors
    ///
    /// [`EvaluationError::Empty`] if nothing is pending,
    /// [`EvaluationError::TypeMismatch`] if the root returns another type.
    pub fn get_evaluation_value<T: Value>(&mut self) -> Result<T, EvaluationError> {
        self.check_type::<T>()?;
        self.pending = None;
        // SAFETY: the type check matched the root, whose value is on top.
        Ok(unsafe { self.values.pop::<T>() }.unwrap_or_else(|e| invariant_violation(e)))
    }

    /// Borrow the pending result; it is destroyed when the guard drops.
    ///
    /// # Errors
    ///
    /// As for [`EvaluationContext::get_evaluation_value`].
    pub fn get_evaluation_ref<T: Value>(&mut self) -> Result<EvaluationRef<'_, T>, EvaluationError> {
        self.check_type::<T>()?;
        Ok(EvaluationRef {
            context: self,
            marker: PhantomData,
        })
    }

    /// Destroy the pending result, if any.
    fn discard(&mut self) {
        if let Some(pending) = self.pending.take() {
            let size = pending.registry.types().info(pending.ty).size();
            let ptr = self
                .values
                .access_pointer(0, size)
                .unwrap_or_else(|e| invariant_violation(e));
            // SAFETY: the top of the stack is the pending root value.
            unsafe { pending.registry.release(pending.ty, ptr) };
            self.values
                .pop_bytes(size)
                .unwrap_or_else(|e| invariant_violation(e));
        }
    }
}

impl Drop for EvaluationContext {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Borrowed evaluation result.
pub struct EvaluationRef<'a, T> {
    context: &'a mut EvaluationContext,
    marker: PhantomData<T>,
}

impl<T: Value> Deref for EvaluationRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the type was checked when the guard was created and the
        // value stays on top until the guard drops.
        unsafe { self.context.values.from::<T>(0) }.unwrap_or_else(|e| invariant_violation(e))
    }
}

impl<T> Drop for EvaluationRef<'_, T> {
    fn drop(&mut self) {
        self.context.discard();
    }
}

impl<T: Value> fmt::Debug for EvaluationRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// An individual as seen by a fitness function: its tree plus the means to
/// evaluate it.
pub struct Candidate<'a, Ctx> {
    tree: &'a Tree,
    operators: &'a OperatorSet<Ctx>,
    scratch: &'a mut EvaluationContext,
}

impl<Ctx> fmt::Debug for Candidate<'_, Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate").field("tree", self.tree).finish_non_exhaustive()
    }
}

impl<'a, Ctx> Candidate<'a, Ctx> {
    /// Wrap a tree with a scratch arena.
    pub fn new(tree: &'a Tree, operators: &'a OperatorSet<Ctx>, scratch: &'a mut EvaluationContext) -> Self {
        Self {
            tree,
            operators,
            scratch,
        }
    }

    /// The tree being scored.
    #[must_use]
    pub fn tree(&self) -> &Tree {
        self.tree
    }

    /// Evaluate against one fitness case.
    ///
    /// # Errors
    ///
    /// Returns an [`EvaluationError`] if the tree is empty or returns another type.
    pub fn evaluate<T: Value>(&mut self, ctx: &Ctx) -> Result<T, EvaluationError> {
        self.scratch
            .evaluate(self.operators, self.tree, ctx)
            .get_evaluation_value()
    }

    /// Evaluate and borrow the result instead of moving it out.
    ///
    /// # Errors
    ///
    /// As for [`Candidate::evaluate`].
    pub fn evaluate_ref<T: Value>(&mut self, ctx: &Ctx) -> Result<EvaluationRef<'_, T>, EvaluationError> {
        self.scratch
            .evaluate(self.operators, self.tree, ctx)
            .get_evaluation_ref()
    }
}

thread_local! {
    static SCRATCH: RefCell<EvaluationContext> = RefCell::new(EvaluationContext::new());
}

impl<Ctx> OperatorSet<Ctx> {
    /// Evaluate `tree` using a scratch arena local to the calling thread.
    ///
    /// # Errors
    ///
    /// As for [`Candidate::evaluate`].
    pub fn evaluate<T: Value>(&self, tree: &Tree, ctx: &Ctx) -> Result<T, EvaluationError> {
        SCRATCH.with(|scratch| scratch.borrow_mut().evaluate(self, tree, ctx).get_evaluation_value())
    }
}
