//! Linear typed expression trees.
//!
//! A [`Tree`] is its operator records in pre-order plus a [`ValueStack`]
//! with the literal of every ephemeral terminal. Literals are stored bottom
//! to top in the pre-order of their records, so the topmost bytes belong to
//! the last literal record. A reverse walk of the records therefore meets
//! literals in top-down stack order, which is what the evaluator relies on.
//!
//! Subtrees are contiguous ranges of records. The end of a subtree is found
//! by the arity-debt walk in [`Tree::endpoint`]. All edits live in
//! [`edit`](self::edit) and keep the literal bytes and the reference counts
//! of drop-capable literals in step with the records.

mod edit;

use crate::error::TreeError;
use crate::operator::{OperatorFlags, OperatorId, OperatorRegistry};
use crate::stack::ValueStack;
use crate::types::{TypeId, Value};
use rand::rngs::SmallRng;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// One node of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpRecord {
    pub(crate) type_size: u16,
    pub(crate) id: OperatorId,
    pub(crate) is_value: bool,
    pub(crate) flags: OperatorFlags,
}

impl OpRecord {
    /// Stack bytes of the value this node produces.
    #[must_use]
    pub fn type_size(&self) -> usize {
        usize::from(self.type_size)
    }

    /// Operator id.
    #[must_use]
    pub fn id(&self) -> OperatorId {
        self.id
    }

    /// Whether the node's value is stored in the tree.
    #[must_use]
    pub fn is_value(&self) -> bool {
        self.is_value
    }

    /// Flags copied from the operator.
    #[must_use]
    pub fn flags(&self) -> OperatorFlags {
        self.flags
    }
}

/// A contiguous subtree `[start, end)` and the type it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subtree {
    /// Index of the subtree root.
    pub start: usize,
    /// One past the last record.
    pub end: usize,
    /// Type produced by the subtree root.
    pub return_type: TypeId,
}

impl Subtree {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Record indices covered.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// A typed program tree.
pub struct Tree {
    pub(crate) operations: Vec<OpRecord>,
    pub(crate) values: ValueStack,
    pub(crate) registry: Arc<OperatorRegistry>,
}

impl Tree {
    /// Create an empty tree over `registry`.
    #[must_use]
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self {
            operations: Vec::new(),
            values: ValueStack::new(),
            registry,
        }
    }

    /// Operator metadata used by this tree.
    #[must_use]
    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Records in pre-order.
    #[must_use]
    pub fn operations(&self) -> &[OpRecord] {
        &self.operations
    }

    /// Literal bytes.
    #[must_use]
    pub fn values(&self) -> &ValueStack {
        &self.values
    }

    /// Copy of every literal byte, bottom to top.
    #[must_use]
    pub fn value_bytes(&self) -> Vec<u8> {
        self.values.to_bytes()
    }

    /// Number of nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.operations.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Type returned by the root, if any.
    #[must_use]
    pub fn root_type(&self) -> Option<TypeId> {
        self.operations.first().map(|r| self.return_type(r.id))
    }

    pub(crate) fn return_type(&self, id: OperatorId) -> TypeId {
        self.registry.operator(id).return_type()
    }

    pub(crate) fn argc(&self, index: usize) -> usize {
        self.registry.operator(self.operations[index].id).argc()
    }

    pub(crate) fn record_for(&self, id: OperatorId) -> OpRecord {
        let info = self.registry.operator(id);
        let flags = info.flags();
        OpRecord {
            // Sizes above u16::MAX are rejected when the set is built.
            type_size: u16::try_from(info.return_size_bytes()).unwrap_or(u16::MAX),
            id,
            is_value: flags.is_ephemeral,
            flags,
        }
    }

    /// Append a node in pre-order, creating its literal if it is ephemeral.
    pub fn push_operator(&mut self, id: OperatorId, rng: &mut SmallRng) {
        let record = self.record_for(id);
        if record.is_value {
            self.registry.produce(id, rng, &mut self.values);
        }
        self.operations.push(record);
    }

    /// Append an ephemeral terminal with a chosen literal.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LiteralMismatch`] if `id` is not ephemeral or does
    /// not produce `T`.
    pub fn push_literal<T: Value>(&mut self, id: OperatorId, value: T) -> Result<(), TreeError> {
        let record = self.record_for(id);
        let ty = self.registry.types().info(self.return_type(id));
        if !record.is_value || !ty.is::<T>() {
            return Err(TreeError::LiteralMismatch {
                index: self.operations.len(),
                expected: ty.name().to_string(),
            });
        }
        self.values.push(value);
        self.operations.push(record);
        Ok(())
    }

    /// Remove every node, releasing literals.
    pub fn clear(&mut self) {
        self.release_range(0..self.operations.len());
        self.operations.clear();
        self.values.reset();
    }

    /// One past the last record of the subtree rooted at `index`.
    ///
    /// Walks forward with an arity debt: start at 1, each node pays 1 and
    /// adds its argument count, stop at 0.
    #[must_use]
    pub fn endpoint(&self, index: usize) -> usize {
        let mut debt = 1usize;
        let mut i = index;
        while debt > 0 && i < self.operations.len() {
            debt = debt - 1 + self.argc(i);
            i += 1;
        }
        i
    }

    /// The subtree rooted at `index`.
    #[must_use]
    pub fn subtree_from_point(&self, index: usize) -> Subtree {
        Subtree {
            start: index,
            end: self.endpoint(index),
            return_type: self.return_type(self.operations[index].id),
        }
    }

    /// The argument subtrees of the node at `parent`, in argument order.
    #[must_use]
    pub fn find_child_extents(&self, parent: usize) -> Vec<Subtree> {
        let argc = self.argc(parent);
        let mut children = Vec::with_capacity(argc);
        let mut start = parent + 1;
        for _ in 0..argc {
            let child = self.subtree_from_point(start);
            start = child.end;
            children.push(child);
        }
        children
    }

    /// Parent index and depth of every node, root at depth 0.
    fn frames(&self) -> (Vec<Option<usize>>, Vec<usize>) {
        let n = self.operations.len();
        let mut parents = Vec::with_capacity(n);
        let mut depths = Vec::with_capacity(n);
        let mut open: Vec<(usize, usize)> = Vec::new();
        for i in 0..n {
            while open.last().is_some_and(|&(_, remaining)| remaining == 0) {
                open.pop();
            }
            depths.push(open.len());
            parents.push(open.last().map(|&(p, _)| p));
            if let Some(top) = open.last_mut() {
                top.1 -= 1;
            }
            let argc = self.argc(i);
            if argc > 0 {
                open.push((i, argc));
            }
        }
        (parents, depths)
    }

    /// Depth of every node, root at 0.
    #[must_use]
    pub fn node_depths(&self) -> Vec<usize> {
        self.frames().1
    }

    /// Parent of every node; `None` for the root.
    #[must_use]
    pub fn parents(&self) -> Vec<Option<usize>> {
        self.frames().0
    }

    /// Depth of the deepest node, 0 for a single terminal or an empty tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.node_depths().into_iter().max().unwrap_or(0)
    }

    /// Literal bytes belonging to records before `index`.
    pub(crate) fn bytes_before(&self, index: usize) -> usize {
        self.value_bytes_in(0..index)
    }

    /// Literal bytes belonging to the records in `range`.
    pub(crate) fn value_bytes_in(&self, range: Range<usize>) -> usize {
        self.operations[range]
            .iter()
            .filter(|r| r.is_value)
            .map(OpRecord::type_size)
            .sum()
    }

    fn for_each_drop_literal(&self, range: Range<usize>, mut f: impl FnMut(TypeId, *const u8)) {
        let mut offset = self.bytes_before(range.start);
        for record in &self.operations[range] {
            if !record.is_value {
                continue;
            }
            let size = record.type_size();
            if record.flags.has_ephemeral_drop {
                let ptr = self
                    .values
                    .access_pointer_forward(offset, size)
                    .unwrap_or_else(|e| crate::operator::invariant_violation(e));
                f(self.return_type(record.id), ptr);
            }
            offset += size;
        }
    }

    /// Take one more reference on every drop literal in `range`.
    pub(crate) fn retain_range(&self, range: Range<usize>) {
        let registry = &self.registry;
        // SAFETY: pointers come from this tree's own literal records.
        self.for_each_drop_literal(range, |ty, ptr| unsafe { registry.retain(ty, ptr) });
    }

    /// Give up this tree's reference on every drop literal in `range`.
    pub(crate) fn release_range(&self, range: Range<usize>) {
        let registry = &self.registry;
        // SAFETY: the tree owns one reference per literal record.
        self.for_each_drop_literal(range, |ty, ptr| unsafe { registry.release(ty, ptr) });
    }

    /// Verify the structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violation found: an unknown operator, literal bytes
    /// that disagree with the records, an arity walk that does not end at the
    /// last record, or a child whose type its parent does not accept.
    pub fn check(&self) -> Result<(), TreeError> {
        for (index, record) in self.operations.iter().enumerate() {
            if self.registry.get(record.id).is_none() {
                return Err(TreeError::UnknownOperator {
                    index,
                    id: record.id.index() as u64,
                });
            }
        }
        let expected = self.value_bytes_in(0..self.operations.len());
        if expected != self.values.size_bytes() {
            return Err(TreeError::ByteMismatch {
                expected,
                actual: self.values.size_bytes(),
            });
        }
        if self.operations.is_empty() {
            return Ok(());
        }
        let mut debt = 1usize;
        for (i, _) in self.operations.iter().enumerate() {
            if debt == 0 {
                return Err(TreeError::UnbalancedArity {
                    end: i,
                    len: self.operations.len(),
                });
            }
            debt = debt - 1 + self.argc(i);
        }
        if debt != 0 {
            return Err(TreeError::UnbalancedArity {
                end: self.operations.len(),
                len: self.operations.len(),
            });
        }
        for (index, record) in self.operations.iter().enumerate() {
            let info = self.registry.operator(record.id);
            for (child, &expected) in self.find_child_extents(index).iter().zip(info.argument_types()) {
                if child.return_type != expected {
                    return Err(TreeError::TypeMismatch {
                        index: child.start,
                        expected,
                        found: child.return_type,
                    });
                }
            }
        }
        Ok(())
    }

    /// Render as an s-expression using operator names and literal values.
    #[must_use]
    pub fn to_sexpr(&self) -> String {
        let mut out = String::new();
        if !self.operations.is_empty() {
            let mut offsets = Vec::with_capacity(self.operations.len());
            let mut offset = 0;
            for record in &self.operations {
                offsets.push(offset);
                if record.is_value {
                    offset += record.type_size();
                }
            }
            self.write_sexpr(0, &offsets, &mut out);
        }
        out
    }

    fn write_sexpr(&self, index: usize, offsets: &[usize], out: &mut String) -> usize {
        let record = self.operations[index];
        if record.is_value {
            let ty = self.return_type(record.id);
            match self.values.access_pointer_forward(offsets[index], record.type_size()) {
                // SAFETY: the pointer addresses this record's literal of type `ty`.
                Ok(ptr) => out.push_str(&unsafe { self.registry.format_value(ty, ptr) }),
                Err(_) => out.push('?'),
            }
            return index + 1;
        }
        let name = self.registry.display_name(record.id);
        let argc = self.argc(index);
        if argc == 0 {
            out.push_str(&name);
            return index + 1;
        }
        out.push('(');
        out.push_str(&name);
        let mut next = index + 1;
        for _ in 0..argc {
            out.push(' ');
            next = self.write_sexpr(next, offsets, out);
        }
        out.push(')');
        next
    }
}

impl Clone for Tree {
    fn clone(&self) -> Self {
        let tree = Self {
            operations: self.operations.clone(),
            values: self.values.duplicate(),
            registry: Arc::clone(&self.registry),
        };
        tree.retain_range(0..tree.operations.len());
        tree
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.release_range(0..self.operations.len());
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("size", &self.size())
            .field("value_bytes", &self.values.size_bytes())
            .field("expr", &self.to_sexpr())
            .finish()
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sexpr())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::operator::{Operator, OperatorBuilder, OperatorSet};
    use rand::SeedableRng;

    pub(crate) fn arithmetic() -> OperatorSet<f32> {
        OperatorBuilder::<f32>::new()
            .with(Operator::new(|a: f32, b: f32| a + b).named("add"))
            .with(Operator::new(|a: f32, b: f32| a * b).named("mul"))
            .with(Operator::new(|a: f32| -a).named("neg"))
            .with(Operator::with_context(|x: &f32| *x).named("x"))
            .with(Operator::ephemeral(|_| 0.5f32).named("lit"))
            .build()
            .unwrap()
    }

    pub(crate) fn build(set: &OperatorSet<f32>, names: &[&str]) -> Tree {
        let mut rng = SmallRng::seed_from_u64(0);
        let mut tree = Tree::new(Arc::clone(set.registry()));
        for name in names {
            tree.push_operator(set.find(name).unwrap(), &mut rng);
        }
        tree
    }

    #[test]
    fn test_endpoints_and_children() {
        let set = arithmetic();
        // (add (mul x lit) (neg lit))
        let tree = build(&set, &["add", "mul", "x", "lit", "neg", "lit"]);
        assert_eq!(tree.endpoint(0), 6);
        assert_eq!(tree.endpoint(1), 4);
        assert_eq!(tree.endpoint(4), 6);
        assert_eq!(tree.endpoint(5), 6);
        let children = tree.find_child_extents(0);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].range(), 1..4);
        assert_eq!(children[1].range(), 4..6);
        tree.check().unwrap();
    }

    #[test]
    fn test_depths_and_parents() {
        let set = arithmetic();
        let tree = build(&set, &["add", "mul", "x", "lit", "neg", "lit"]);
        assert_eq!(tree.node_depths(), vec![0, 1, 2, 2, 1, 2]);
        assert_eq!(tree.parents(), vec![None, Some(0), Some(1), Some(1), Some(0), Some(4)]);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_value_bytes_follow_literals() {
        let set = arithmetic();
        let tree = build(&set, &["add", "lit", "neg", "lit"]);
        assert_eq!(tree.values().size_bytes(), 16);
        assert_eq!(tree.bytes_before(3), 8);
    }

    #[test]
    fn test_sexpr() {
        let set = arithmetic();
        let mut tree = Tree::new(Arc::clone(set.registry()));
        let mut rng = SmallRng::seed_from_u64(1);
        tree.push_operator(set.find("add").unwrap(), &mut rng);
        tree.push_operator(set.find("x").unwrap(), &mut rng);
        tree.push_literal(set.find("lit").unwrap(), 2.5f32).unwrap();
        assert_eq!(tree.to_sexpr(), "(add x 2.5)");
    }

    #[test]
    fn test_push_literal_rejects_wrong_type() {
        let set = arithmetic();
        let mut tree = Tree::new(Arc::clone(set.registry()));
        assert!(tree.push_literal(set.find("lit").unwrap(), 1.0f64).is_err());
        assert!(tree.push_literal(set.find("x").unwrap(), 1.0f32).is_err());
    }

    #[test]
    fn test_check_detects_broken_arity() {
        let set = arithmetic();
        let tree = build(&set, &["add", "x"]);
        assert!(matches!(tree.check(), Err(TreeError::UnbalancedArity { .. })));
        let tree = build(&set, &["x", "x"]);
        assert!(matches!(tree.check(), Err(TreeError::UnbalancedArity { .. })));
    }
}
