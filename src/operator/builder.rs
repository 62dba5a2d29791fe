//! Collects operators and freezes them into an [`OperatorSet`].

use super::registry::{OperatorInfo, OperatorRegistry, OperatorSet};
use super::{Invoker, Operator, OperatorFlags, OperatorId, OperatorKind, Producer};
use crate::error::BuildError;
use crate::types::{ALIGNMENT, TypeDescriptor, TypeId, TypeRegistry, Value};
use std::sync::Arc;

/// Mutable collection of operators for one evaluation context type.
pub struct OperatorBuilder<Ctx> {
    operators: Vec<Operator<Ctx>>,
    root: Option<TypeDescriptor>,
}

impl<Ctx> Default for OperatorBuilder<Ctx> {
    fn default() -> Self {
        Self {
            operators: Vec::new(),
            root: None,
        }
    }
}

impl<Ctx> std::fmt::Debug for OperatorBuilder<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorBuilder")
            .field("operators", &self.operators)
            .field("root", &self.root.as_ref().map(|r| r.name))
            .finish()
    }
}

// Operator and type counts are bounded by memory; u32 ids do not truncate.
#[allow(clippy::cast_possible_truncation)]
impl<Ctx: 'static> OperatorBuilder<Ctx> {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator, returning the id it will have in the built set.
    pub fn add(&mut self, operator: Operator<Ctx>) -> OperatorId {
        let id = OperatorId::new(self.operators.len() as u32);
        self.operators.push(operator);
        id
    }

    /// Chainable form of [`OperatorBuilder::add`].
    #[must_use]
    pub fn with(mut self, operator: Operator<Ctx>) -> Self {
        self.add(operator);
        self
    }

    /// Fix the return type of every generated tree.
    pub fn set_root_type<T: Value>(&mut self) -> &mut Self {
        self.root = Some(TypeDescriptor::of::<T>());
        self
    }

    /// Freeze the palette.
    ///
    /// # Errors
    ///
    /// - [`BuildError::Empty`] if no operator was added.
    /// - [`BuildError::UnsupportedAlignment`] / [`BuildError::UnsupportedSize`]
    ///   for a value type the stack cannot hold.
    /// - [`BuildError::UngroundedType`] if some type used by an operator has
    ///   no finite tree producing it.
    /// - [`BuildError::UnknownRootType`] if the root type is produced by no
    ///   operator.
    pub fn build(self) -> Result<OperatorSet<Ctx>, BuildError> {
        if self.operators.is_empty() {
            return Err(BuildError::Empty);
        }

        let mut types = TypeRegistry::new();
        let mut infos = Vec::with_capacity(self.operators.len());
        for (index, op) in self.operators.iter().enumerate() {
            let ret = register_checked(&mut types, &op.signature.ret)?;
            let argument_types = op
                .signature
                .arguments
                .iter()
                .map(|desc| register_checked(&mut types, desc))
                .collect::<Result<Vec<_>, _>>()?;
            let arg_size_bytes = op.signature.arguments.iter().map(|d| d.size).sum();
            let is_ephemeral = matches!(op.kind, OperatorKind::Ephemeral(_));
            infos.push(OperatorInfo {
                id: OperatorId::new(index as u32),
                name: op.name.clone(),
                return_type: ret,
                argument_types,
                argc_context: u16::from(op.uses_context),
                flags: OperatorFlags {
                    is_ephemeral,
                    has_ephemeral_drop: is_ephemeral && op.signature.ret.has_drop,
                },
                arg_size_bytes,
                return_size_bytes: op.signature.ret.size,
            });
        }

        let type_count = types.len();
        let mut terminals = vec![Vec::new(); type_count];
        let mut non_terminals = vec![Vec::new(); type_count];
        for info in &infos {
            if info.is_terminal() {
                terminals[info.return_type.index()].push(info.id);
            } else {
                non_terminals[info.return_type.index()].push(info.id);
            }
        }

        let (type_ground_depth, operator_ground_depth) = ground_depths(&infos, type_count);
        if let Some(ty) = (0..type_count).find(|&t| type_ground_depth[t] == usize::MAX) {
            return Err(BuildError::UngroundedType(types.info(TypeId::new(ty as u32)).name().to_string()));
        }

        let root_type = match &self.root {
            Some(desc) => {
                let id = types
                    .id_of_rust(desc.rust_id)
                    .ok_or_else(|| BuildError::UnknownRootType(desc.name.to_string()))?;
                if terminals[id.index()].is_empty() && non_terminals[id.index()].is_empty() {
                    return Err(BuildError::UnknownRootType(desc.name.to_string()));
                }
                Some(id)
            }
            None => None,
        };

        let mut dispatch: Vec<Option<Invoker<Ctx>>> = Vec::with_capacity(infos.len());
        let mut producers: Vec<Option<Producer>> = Vec::with_capacity(infos.len());
        for op in self.operators {
            match op.kind {
                OperatorKind::Function(invoke) => {
                    dispatch.push(Some(invoke));
                    producers.push(None);
                }
                OperatorKind::Ephemeral(produce) => {
                    dispatch.push(None);
                    producers.push(Some(produce));
                }
            }
        }

        tracing::debug!(
            operators = infos.len(),
            types = type_count,
            "built operator set"
        );

        Ok(OperatorSet {
            registry: Arc::new(OperatorRegistry {
                types,
                operators: infos,
                producers,
                terminals,
                non_terminals,
                type_ground_depth,
                operator_ground_depth,
                root_type,
            }),
            dispatch,
        })
    }
}

fn register_checked(types: &mut TypeRegistry, desc: &TypeDescriptor) -> Result<TypeId, BuildError> {
    if desc.align > ALIGNMENT {
        return Err(BuildError::UnsupportedAlignment(desc.name.to_string()));
    }
    if desc.size > usize::from(u16::MAX) {
        return Err(BuildError::UnsupportedSize(desc.name.to_string()));
    }
    Ok(types.register_descriptor(desc))
}

/// Least-fixpoint of tree depths: a terminal grounds at depth 0, a
/// non-terminal one level above its deepest-grounding argument.
///
/// Unreachable entries stay at `usize::MAX`.
fn ground_depths(infos: &[OperatorInfo], type_count: usize) -> (Vec<usize>, Vec<usize>) {
    let mut types = vec![usize::MAX; type_count];
    let mut operators = vec![usize::MAX; infos.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for info in infos {
            let depth = info
                .argument_types
                .iter()
                .map(|t| types[t.index()])
                .max()
                .map_or(Some(0), |deepest| deepest.checked_add(1));
            let Some(depth) = depth else { continue };
            let slot = &mut operators[info.id.index()];
            if depth < *slot {
                *slot = depth;
                changed = true;
            }
            let ty = &mut types[info.return_type.index()];
            if depth < *ty {
                *ty = depth;
                changed = true;
            }
        }
    }
    (types, operators)
}
