//! Structural edits.
//!
//! Every edit moves records and their literal bytes together. Bytes copied
//! into a tree take a reference on each drop-capable literal; bytes erased
//! from a tree give one up. Swaps move references without touching counts.

use super::{OpRecord, Subtree, Tree};
use crate::operator::{OperatorId, invariant_violation};
use crate::stack::ValueStack;
use rand::rngs::SmallRng;
use std::ops::Range;
use std::sync::Arc;

impl Tree {
    /// The whole tree as a [`Subtree`].
    ///
    /// # Panics
    ///
    /// Panics on an empty tree.
    #[must_use]
    pub fn whole(&self) -> Subtree {
        self.subtree_from_point(0)
    }

    /// Literal bytes of the records in `range`.
    fn range_bytes(&self, range: Range<usize>) -> Vec<u8> {
        let mut bytes = vec![0u8; self.value_bytes_in(range.clone())];
        self.values
            .copy_range(self.bytes_before(range.start), &mut bytes)
            .unwrap_or_else(|e| invariant_violation(e));
        bytes
    }

    fn splice(&mut self, range: Range<usize>, records: &[OpRecord], bytes: &[u8]) {
        let at = self.bytes_before(range.start);
        let remove = self.value_bytes_in(range.clone());
        self.values
            .splice_bytes(at, remove, bytes)
            .unwrap_or_else(|e| invariant_violation(e));
        self.operations.splice(range, records.iter().copied());
    }

    /// Append the subtree at `point` to `out`.
    pub fn copy_subtree(&self, point: Subtree, out: &mut Tree) {
        debug_assert!(Arc::ptr_eq(&self.registry, &out.registry));
        let bytes = self.range_bytes(point.range());
        self.retain_range(point.range());
        out.operations.extend_from_slice(&self.operations[point.range()]);
        out.values.copy_from(&bytes);
    }

    /// The subtree at `point` as a standalone tree.
    #[must_use]
    pub fn extract_subtree(&self, point: Subtree) -> Tree {
        let mut out = Tree::new(Arc::clone(&self.registry));
        self.copy_subtree(point, &mut out);
        out
    }

    /// Remove the subtree at `point`.
    ///
    /// The tree is structurally incomplete until something is inserted in
    /// its place, unless `point` is the whole tree.
    pub fn delete_subtree(&mut self, point: Subtree) {
        self.release_range(point.range());
        self.splice(point.range(), &[], &[]);
    }

    /// Insert all of `other` before record `index`.
    pub fn insert_subtree(&mut self, index: usize, other: &Tree) {
        debug_assert!(Arc::ptr_eq(&self.registry, &other.registry));
        other.retain_range(0..other.size());
        let bytes = other.value_bytes();
        self.splice(index..index, &other.operations, &bytes);
    }

    /// Replace the subtree at `point` with all of `other`.
    pub fn replace_subtree(&mut self, point: Subtree, other: &Tree) {
        self.replace_subtree_with(point, other, 0..other.size());
    }

    /// Replace the subtree at `point` with records `source` of `other`.
    pub fn replace_subtree_with(&mut self, point: Subtree, other: &Tree, source: Range<usize>) {
        debug_assert!(Arc::ptr_eq(&self.registry, &other.registry));
        let bytes = other.range_bytes(source.clone());
        other.retain_range(source.clone());
        self.release_range(point.range());
        self.splice(point.range(), &other.operations[source], &bytes);
    }

    /// Exchange the subtree at `a` with the subtree at `b` of `other`.
    pub fn swap_subtrees(&mut self, a: Subtree, other: &mut Tree, b: Subtree) {
        debug_assert!(Arc::ptr_eq(&self.registry, &other.registry));
        let a_bytes = self.range_bytes(a.range());
        let b_bytes = other.range_bytes(b.range());
        let a_records = self.operations[a.range()].to_vec();
        let b_records = other.operations[b.range()].to_vec();
        self.splice(a.range(), &b_records, &b_bytes);
        other.splice(b.range(), &a_records, &a_bytes);
    }

    /// Replace the single record at `index` with operator `new_id`.
    ///
    /// A new ephemeral literal is created if `new_id` is ephemeral. The
    /// caller keeps the structure valid: the new operator must return the
    /// same type and, unless the children are rebuilt afterwards, take the
    /// same arguments.
    pub fn modify_operator(&mut self, index: usize, new_id: OperatorId, rng: &mut SmallRng) {
        let record = self.record_for(new_id);
        let mut literal = ValueStack::new();
        if record.is_value {
            self.registry.produce(new_id, rng, &mut literal);
        }
        self.release_range(index..index + 1);
        self.splice(index..index + 1, &[record], &literal.to_bytes());
    }
}
