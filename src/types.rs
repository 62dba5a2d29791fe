//! Value types and the type registry.
//!
//! Every type an operator consumes or produces gets a dense [`TypeId`] and a
//! fixed stack footprint. Plain data is stored inline; a type with a
//! destructor is stored as an [`Arc`] pointer so that literal bytes can be
//! replicated between trees while the value itself is dropped exactly once.

use serde::{Deserialize, Serialize};
use std::any::{self, type_name};
use std::collections::HashMap;
use std::fmt;
use std::mem::{align_of, needs_drop, size_of};
use std::ptr;
use std::sync::Arc;

/// Alignment (and size granularity) of every value on a stack.
pub const ALIGNMENT: usize = 8;

/// Round `bytes` up to the stack alignment.
#[must_use]
pub const fn aligned_size(bytes: usize) -> usize {
    bytes.div_ceil(ALIGNMENT) * ALIGNMENT
}

/// Bound for anything that can flow between operators.
///
/// `Clone` is needed because an argument stored behind a shared refcount
/// cell is cloned out when other trees still reference it.
pub trait Value: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + fmt::Debug + Send + Sync + 'static {}

/// Dense identifier of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    /// Wrap a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Index into per-type tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Number of bytes `T` occupies on a stack.
#[must_use]
pub fn stored_size<T: Value>() -> usize {
    if needs_drop::<T>() {
        aligned_size(size_of::<*const T>())
    } else {
        aligned_size(size_of::<T>())
    }
}

/// Write `value` in its stored representation.
///
/// # Safety
///
/// `dst` must be valid for `stored_size::<T>()` bytes and 8-byte aligned.
pub(crate) unsafe fn write_value<T: Value>(dst: *mut u8, value: T) {
    if needs_drop::<T>() {
        let cell = Arc::into_raw(Arc::new(value));
        unsafe { ptr::write(dst.cast::<*const T>(), cell) };
    } else {
        unsafe { ptr::write(dst.cast::<T>(), value) };
    }
}

/// Move a value out of its stored representation.
///
/// The bytes at `src` must not be read again afterwards.
///
/// # Safety
///
/// `src` must hold a `T` written by [`write_value`] (or a byte copy of one
/// whose reference has been retained).
pub(crate) unsafe fn read_value<T: Value>(src: *const u8) -> T {
    if needs_drop::<T>() {
        let cell = unsafe { Arc::from_raw(ptr::read(src.cast::<*const T>())) };
        Arc::unwrap_or_clone(cell)
    } else {
        unsafe { ptr::read(src.cast::<T>()) }
    }
}

/// Borrow a value in place.
///
/// # Safety
///
/// Same as [`read_value`]; the bytes must outlive `'a`.
pub(crate) unsafe fn value_ref<'a, T: Value>(src: *const u8) -> &'a T {
    if needs_drop::<T>() {
        unsafe { &*ptr::read(src.cast::<*const T>()) }
    } else {
        unsafe { &*src.cast::<T>() }
    }
}

unsafe fn retain_value<T: Value>(src: *const u8) {
    if needs_drop::<T>() {
        unsafe { Arc::increment_strong_count(ptr::read(src.cast::<*const T>())) };
    }
}

unsafe fn release_value<T: Value>(src: *const u8) {
    if needs_drop::<T>() {
        unsafe { Arc::decrement_strong_count(ptr::read(src.cast::<*const T>())) };
    }
}

unsafe fn format_value<T: Value>(src: *const u8) -> String {
    format!("{:?}", unsafe { value_ref::<T>(src) })
}

/// Type-erased functions that act on stored values.
#[derive(Clone, Copy)]
pub(crate) struct ValueVTable {
    /// Add one reference to the refcount cell (no-op for plain data).
    pub(crate) retain: unsafe fn(*const u8),
    /// Drop one reference, destroying the value on the last one.
    pub(crate) release: unsafe fn(*const u8),
    /// Debug-format the value.
    pub(crate) format: unsafe fn(*const u8) -> String,
}

impl fmt::Debug for ValueVTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueVTable").finish_non_exhaustive()
    }
}

/// Everything needed to register a Rust type, captured before the registry exists.
#[derive(Debug, Clone)]
pub(crate) struct TypeDescriptor {
    pub(crate) rust_id: any::TypeId,
    pub(crate) name: &'static str,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) has_drop: bool,
    pub(crate) vtable: ValueVTable,
}

impl TypeDescriptor {
    pub(crate) fn of<T: Value>() -> Self {
        Self {
            rust_id: any::TypeId::of::<T>(),
            name: type_name::<T>(),
            size: stored_size::<T>(),
            align: if needs_drop::<T>() {
                align_of::<*const T>()
            } else {
                align_of::<T>()
            },
            has_drop: needs_drop::<T>(),
            vtable: ValueVTable {
                retain: retain_value::<T>,
                release: release_value::<T>,
                format: format_value::<T>,
            },
        }
    }
}

/// A registered value type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    id: TypeId,
    size: usize,
    name: String,
    has_ephemeral_drop: bool,
    rust_id: any::TypeId,
    vtable: ValueVTable,
}

impl TypeInfo {
    /// Dense id.
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Bytes the value occupies on a stack (multiple of [`ALIGNMENT`]).
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Rust type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether values live behind a refcount cell.
    #[must_use]
    pub fn has_ephemeral_drop(&self) -> bool {
        self.has_ephemeral_drop
    }

    /// Whether this entry describes the Rust type `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_id == any::TypeId::of::<T>()
    }

    pub(crate) fn vtable(&self) -> &ValueVTable {
        &self.vtable
    }
}

/// Assigns stable ids to value types in registration order.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Vec<TypeInfo>,
    by_rust: HashMap<any::TypeId, TypeId>,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, returning its existing id if already present.
    pub fn register<T: Value>(&mut self) -> TypeId {
        self.register_descriptor(&TypeDescriptor::of::<T>())
    }

    // Ids are dense, so u32 never truncates for any registry that fits in memory.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn register_descriptor(&mut self, desc: &TypeDescriptor) -> TypeId {
        if let Some(&id) = self.by_rust.get(&desc.rust_id) {
            return id;
        }
        let id = TypeId::new(self.types.len() as u32);
        self.types.push(TypeInfo {
            id,
            size: desc.size,
            name: desc.name.to_string(),
            has_ephemeral_drop: desc.has_drop,
            rust_id: desc.rust_id,
            vtable: desc.vtable,
        });
        self.by_rust.insert(desc.rust_id, id);
        id
    }

    /// Look up a type by id.
    #[must_use]
    pub fn get(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(id.index())
    }

    /// Look up a type by id, panicking on an id from another registry.
    #[must_use]
    pub fn info(&self, id: TypeId) -> &TypeInfo {
        &self.types[id.index()]
    }

    /// Id assigned to the Rust type `T`, if registered.
    #[must_use]
    pub fn id_of<T: 'static>(&self) -> Option<TypeId> {
        self.id_of_rust(any::TypeId::of::<T>())
    }

    pub(crate) fn id_of_rust(&self, rust_id: any::TypeId) -> Option<TypeId> {
        self.by_rust.get(&rust_id).copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate types in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeInfo> {
        self.types.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 8);
        assert_eq!(aligned_size(8), 8);
        assert_eq!(aligned_size(9), 16);
    }

    #[test]
    fn test_stored_size_uses_pointer_for_drop_types() {
        assert_eq!(stored_size::<f32>(), 8);
        assert_eq!(stored_size::<[u8; 12]>(), 16);
        assert_eq!(stored_size::<String>(), 8);
        assert_eq!(stored_size::<Vec<u64>>(), 8);
    }

    #[test]
    fn test_registry_ids_are_dense_and_stable() {
        let mut types = TypeRegistry::new();
        let f = types.register::<f32>();
        let b = types.register::<bool>();
        assert_eq!(types.register::<f32>(), f);
        assert_eq!(f.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(types.len(), 2);
        assert!(types.info(b).is::<bool>());
        assert_eq!(types.id_of::<bool>(), Some(b));
        assert_eq!(types.id_of::<u8>(), None);
    }

    #[test]
    fn test_drop_flag() {
        let mut types = TypeRegistry::new();
        let s = types.register::<String>();
        let f = types.register::<f64>();
        assert!(types.info(s).has_ephemeral_drop());
        assert!(!types.info(f).has_ephemeral_drop());
    }
}
