//! Immutable operator metadata and the dispatch table.

use super::{Invoker, OperatorFlags, OperatorId, Producer, invariant_violation};
use crate::error::{GenerationError, StackError};
use crate::stack::ValueStack;
use crate::types::{TypeId, TypeRegistry};
use rand::Rng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Metadata of one registered operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorInfo {
    pub(crate) id: OperatorId,
    pub(crate) name: Option<String>,
    pub(crate) return_type: TypeId,
    pub(crate) argument_types: Vec<TypeId>,
    pub(crate) argc_context: u16,
    pub(crate) flags: OperatorFlags,
    pub(crate) arg_size_bytes: usize,
    pub(crate) return_size_bytes: usize,
}

impl OperatorInfo {
    /// Operator id.
    #[must_use]
    pub fn id(&self) -> OperatorId {
        self.id
    }

    /// Printable name, if one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Type of the produced value.
    #[must_use]
    pub fn return_type(&self) -> TypeId {
        self.return_type
    }

    /// Types of the stack arguments, in call order.
    #[must_use]
    pub fn argument_types(&self) -> &[TypeId] {
        &self.argument_types
    }

    /// Number of stack arguments.
    #[must_use]
    pub fn argc(&self) -> usize {
        self.argument_types.len()
    }

    /// 1 if the operator receives the evaluation context, else 0.
    #[must_use]
    pub fn argc_context(&self) -> u16 {
        self.argc_context
    }

    /// Whether the operator takes no stack arguments.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.argument_types.is_empty()
    }

    /// Ephemeral and drop flags.
    #[must_use]
    pub fn flags(&self) -> OperatorFlags {
        self.flags
    }

    /// Total stack bytes of the arguments.
    #[must_use]
    pub fn arg_size_bytes(&self) -> usize {
        self.arg_size_bytes
    }

    /// Stack bytes of the result.
    #[must_use]
    pub fn return_size_bytes(&self) -> usize {
        self.return_size_bytes
    }

    /// Argument types as a sorted multiset, for order-insensitive comparison.
    #[must_use]
    pub fn argument_multiset(&self) -> Vec<TypeId> {
        let mut types = self.argument_types.clone();
        types.sort_unstable();
        types
    }
}

/// Which end of an operator's stack footprint [`OperatorRegistry::destroy`] cleans up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyRegion {
    /// The argument values on top of the stack.
    Arguments,
    /// The single return value on top of the stack.
    Return,
}

/// Operator metadata shared by every tree built from one palette.
///
/// Nothing here depends on the evaluation context, so trees, generators and
/// variation operators only ever see this half of an [`OperatorSet`].
pub struct OperatorRegistry {
    pub(crate) types: TypeRegistry,
    pub(crate) operators: Vec<OperatorInfo>,
    pub(crate) producers: Vec<Option<Producer>>,
    pub(crate) terminals: Vec<Vec<OperatorId>>,
    pub(crate) non_terminals: Vec<Vec<OperatorId>>,
    pub(crate) type_ground_depth: Vec<usize>,
    pub(crate) operator_ground_depth: Vec<usize>,
    pub(crate) root_type: Option<TypeId>,
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("types", &self.types.len())
            .field("operators", &self.operators)
            .field("root_type", &self.root_type)
            .finish_non_exhaustive()
    }
}

impl OperatorRegistry {
    /// Registered value types.
    #[must_use]
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Number of operators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Whether no operator is registered (never true for a built set).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Metadata of one operator.
    ///
    /// # Panics
    ///
    /// Panics if `id` comes from another registry.
    #[must_use]
    pub fn operator(&self, id: OperatorId) -> &OperatorInfo {
        &self.operators[id.index()]
    }

    /// Metadata of one operator, or `None` for an unknown id.
    #[must_use]
    pub fn get(&self, id: OperatorId) -> Option<&OperatorInfo> {
        self.operators.get(id.index())
    }

    /// All operators in id order.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorInfo> {
        self.operators.iter()
    }

    /// Find an operator by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<OperatorId> {
        self.operators
            .iter()
            .find(|op| op.name.as_deref() == Some(name))
            .map(|op| op.id)
    }

    /// Name used when printing trees: the given name or the numeric id.
    #[must_use]
    pub fn display_name(&self, id: OperatorId) -> String {
        self.get(id)
            .and_then(|op| op.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Terminals producing `ty`.
    #[must_use]
    pub fn terminals(&self, ty: TypeId) -> &[OperatorId] {
        self.terminals.get(ty.index()).map_or(&[], Vec::as_slice)
    }

    /// Non-terminals producing `ty`.
    #[must_use]
    pub fn non_terminals(&self, ty: TypeId) -> &[OperatorId] {
        self.non_terminals.get(ty.index()).map_or(&[], Vec::as_slice)
    }

    /// Smallest depth of any finite tree producing `ty`.
    #[must_use]
    pub fn ground_depth(&self, ty: TypeId) -> usize {
        self.type_ground_depth[ty.index()]
    }

    /// Smallest depth of any finite tree rooted at `id`.
    #[must_use]
    pub fn operator_ground_depth(&self, id: OperatorId) -> usize {
        self.operator_ground_depth[id.index()]
    }

    /// Root type fixed by the builder, if any.
    #[must_use]
    pub fn root_type(&self) -> Option<TypeId> {
        self.root_type
    }

    /// Pick a root type: the configured one, else a random type with at
    /// least one non-terminal, else a random type with terminals.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::NoValidType`] if no type has operators.
    pub fn pick_root_type(&self, rng: &mut SmallRng) -> Result<TypeId, GenerationError> {
        if let Some(root) = self.root_type {
            return Ok(root);
        }
        let with_non_terminals: Vec<TypeId> = self
            .types
            .iter()
            .map(crate::types::TypeInfo::id)
            .filter(|&t| !self.non_terminals(t).is_empty())
            .collect();
        if let Some(&t) = with_non_terminals.choose(rng) {
            return Ok(t);
        }
        let with_terminals: Vec<TypeId> = self
            .types
            .iter()
            .map(crate::types::TypeInfo::id)
            .filter(|&t| !self.terminals(t).is_empty())
            .collect();
        with_terminals
            .choose(rng)
            .copied()
            .ok_or(GenerationError::NoValidType(None))
    }

    /// Pick a random operator producing `ty`, terminal or not.
    #[must_use]
    pub fn random_operator(&self, ty: TypeId, rng: &mut SmallRng) -> Option<OperatorId> {
        let terminals = self.terminals(ty);
        let non_terminals = self.non_terminals(ty);
        let total = terminals.len() + non_terminals.len();
        if total == 0 {
            return None;
        }
        let pick = rng.gen_range(0..total);
        Some(if pick < terminals.len() {
            terminals[pick]
        } else {
            non_terminals[pick - terminals.len()]
        })
    }

    /// Run an ephemeral terminal's producer, pushing the new literal.
    ///
    /// Returns `false` (and pushes nothing) for non-ephemeral operators.
    pub fn produce(&self, id: OperatorId, rng: &mut SmallRng, stack: &mut ValueStack) -> bool {
        match self.producers.get(id.index()) {
            Some(Some(producer)) => {
                producer(rng, stack);
                true
            }
            _ => false,
        }
    }

    /// Add a reference to the literal of type `ty` at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must address a live stored value of `ty`.
    pub(crate) unsafe fn retain(&self, ty: TypeId, ptr: *const u8) {
        let info = self.types.info(ty);
        if info.has_ephemeral_drop() {
            unsafe { (info.vtable().retain)(ptr) };
        }
    }

    /// Drop a reference to the literal of type `ty` at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must address a live stored value of `ty` whose reference the
    /// caller owns.
    pub(crate) unsafe fn release(&self, ty: TypeId, ptr: *const u8) {
        let info = self.types.info(ty);
        if info.has_ephemeral_drop() {
            unsafe { (info.vtable().release)(ptr) };
        }
    }

    /// Debug-format a stored value.
    ///
    /// # Safety
    ///
    /// `ptr` must address a live stored value of `ty`.
    pub(crate) unsafe fn format_value(&self, ty: TypeId, ptr: *const u8) -> String {
        unsafe { (self.types.info(ty).vtable().format)(ptr) }
    }

    /// Run destructors on the top of `stack` for one operator's arguments or
    /// result, then pop those bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`StackError`] if the region is not on the stack.
    ///
    /// # Safety
    ///
    /// The top of the stack must hold exactly the values described by the
    /// operator's signature for the chosen region.
    pub unsafe fn destroy(
        &self,
        id: OperatorId,
        stack: &mut ValueStack,
        region: DestroyRegion,
    ) -> Result<(), StackError> {
        let info = self.operator(id);
        let types: &[TypeId] = match region {
            DestroyRegion::Arguments => &info.argument_types,
            DestroyRegion::Return => std::slice::from_ref(&info.return_type),
        };
        // Argument 0 is on top.
        let mut offset = 0;
        for &ty in types {
            let size = self.types.info(ty).size();
            let ptr = stack.access_pointer(offset, size)?;
            // SAFETY: forwarded from the caller.
            unsafe { self.release(ty, ptr) };
            offset += size;
        }
        stack.pop_bytes(offset)
    }
}

/// A built palette: shared metadata plus the context-specific dispatch table.
pub struct OperatorSet<Ctx> {
    pub(crate) registry: Arc<OperatorRegistry>,
    pub(crate) dispatch: Vec<Option<Invoker<Ctx>>>,
}

impl<Ctx> fmt::Debug for OperatorSet<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorSet")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<Ctx> OperatorSet<Ctx> {
    /// The shared metadata, as held by trees.
    #[must_use]
    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Invoke a non-ephemeral operator on `stack`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is ephemeral (its value lives in the tree, not the
    /// dispatch table) or unknown.
    pub fn invoke(&self, id: OperatorId, ctx: &Ctx, stack: &mut ValueStack) {
        match self.dispatch.get(id.index()) {
            Some(Some(invoke)) => invoke(ctx, stack),
            _ => invariant_violation(StackError::OutOfRange {
                offset: id.index(),
                size: 0,
                total: self.dispatch.len(),
            }),
        }
    }
}

impl<Ctx> Deref for OperatorSet<Ctx> {
    type Target = OperatorRegistry;

    fn deref(&self) -> &OperatorRegistry {
        &self.registry
    }
}
