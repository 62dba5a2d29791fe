//! Segmented byte stack used for evaluation and for a tree's literal values.
//!
//! Memory is a list of pages, each an 8-byte aligned buffer with a write
//! cursor. Every push advances by a multiple of [`ALIGNMENT`], so a value
//! never straddles two pages and every value is naturally aligned. Byte
//! ranges that cover several values (whole subtrees) may span pages; the
//! range operations gather them transparently.
//!
//! The stack is untyped. Typed reads are `unsafe` because only the caller
//! knows what was written where; the operator thunks and the evaluator
//! uphold that contract.

use crate::error::StackError;
use crate::operator::invariant_violation;
use crate::types::{ALIGNMENT, Value, read_value, stored_size, value_ref, write_value};
use std::fmt;
use std::ptr::{self, NonNull};

/// Default page size in bytes.
pub const PAGE_SIZE: usize = 4096;

#[derive(Clone)]
struct Page {
    words: Box<[u64]>,
    used: usize,
}

impl Page {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            words: vec![0u64; bytes / ALIGNMENT].into_boxed_slice(),
            used: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.words.len() * ALIGNMENT
    }

    fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    fn base(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    fn base_mut(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }
}

/// Pointer-aligned segmented arena.
///
/// Not `Clone`: copying the bytes of a drop value copies its `Arc` pointer
/// without a reference. Owners that track their values use
/// [`ValueStack::duplicate`] and retain what they copied.
#[derive(Default)]
pub struct ValueStack {
    pages: Vec<Page>,
    spare: Option<Page>,
    total: usize,
}

impl fmt::Debug for ValueStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueStack")
            .field("size_bytes", &self.total)
            .field("pages", &self.pages.len())
            .finish()
    }
}

fn dangling() -> *mut u8 {
    NonNull::<u64>::dangling().as_ptr().cast()
}

impl ValueStack {
    /// Create an empty stack. No page is allocated until the first push.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stack that can take `bytes` without allocating.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        let mut stack = Self::new();
        stack.reserve(bytes);
        stack
    }

    /// Total bytes on the stack.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.total
    }

    /// Bytes held by the newest page.
    #[must_use]
    pub fn bytes_in_head(&self) -> usize {
        self.pages.last().map_or(0, |p| p.used)
    }

    /// Whether the stack holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Discard every byte without running destructors, keeping one page for reuse.
    pub fn reset(&mut self) {
        while let Some(page) = self.pages.pop() {
            self.recycle(page);
        }
        self.total = 0;
    }

    /// Make sure the next `bytes` can be pushed contiguously without allocating.
    pub fn reserve(&mut self, bytes: usize) {
        let bytes = crate::types::aligned_size(bytes);
        if bytes == 0 || self.pages.last().is_some_and(|p| p.remaining() >= bytes) {
            return;
        }
        if self.spare.as_ref().is_some_and(|p| p.capacity() >= bytes) {
            return;
        }
        self.spare = Some(Page::with_capacity(Self::page_bytes(bytes)));
    }

    fn page_bytes(needed: usize) -> usize {
        needed.div_ceil(PAGE_SIZE).max(1) * PAGE_SIZE
    }

    fn recycle(&mut self, mut page: Page) {
        page.used = 0;
        match &self.spare {
            Some(spare) if spare.capacity() >= page.capacity() => {}
            _ => self.spare = Some(page),
        }
    }

    fn take_page(&mut self, needed: usize) -> Page {
        match self.spare.take() {
            Some(page) if page.capacity() >= needed => page,
            _ => Page::with_capacity(Self::page_bytes(needed)),
        }
    }

    /// Claim `n` contiguous bytes at the top and return their address.
    fn alloc_top(&mut self, n: usize) -> *mut u8 {
        if n == 0 {
            return dangling();
        }
        debug_assert_eq!(n % ALIGNMENT, 0, "stack pushes must be aligned");
        if !self.pages.last().is_some_and(|p| p.remaining() >= n) {
            let page = self.take_page(n);
            self.pages.push(page);
        }
        let head = self.pages.len() - 1;
        let page = &mut self.pages[head];
        // SAFETY: the page has at least `n` bytes free past `used`.
        let dst = unsafe { page.base_mut().add(page.used) };
        page.used += n;
        self.total += n;
        dst
    }

    /// Drop `n` bytes from the head page; the caller checked they exist.
    fn shrink_head(&mut self, n: usize) {
        let head = self.pages.len() - 1;
        self.pages[head].used -= n;
        self.total -= n;
        if self.pages[head].used == 0 {
            if let Some(page) = self.pages.pop() {
                self.recycle(page);
            }
        }
    }

    /// Push a value, aligned to 8 bytes.
    pub fn push<T: Value>(&mut self, value: T) {
        let dst = self.alloc_top(stored_size::<T>());
        // SAFETY: `alloc_top` returned an aligned region of the stored size.
        unsafe { write_value(dst, value) };
    }

    /// Pop the top value.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Underflow`] if the head page holds fewer bytes
    /// than the value's stored size.
    ///
    /// # Safety
    ///
    /// The top of the stack must hold a `T` in its stored representation.
    pub unsafe fn pop<T: Value>(&mut self) -> Result<T, StackError> {
        let n = stored_size::<T>();
        let available = self.bytes_in_head();
        if available < n {
            return Err(StackError::Underflow {
                requested: n,
                available,
            });
        }
        if n == 0 {
            // SAFETY: zero-sized reads need only an aligned non-null pointer.
            return Ok(unsafe { read_value::<T>(dangling()) });
        }
        let page = &self.pages[self.pages.len() - 1];
        // SAFETY: the head page holds at least `n` bytes.
        let src = unsafe { page.base().add(page.used - n) };
        // SAFETY: forwarded from the caller.
        let value = unsafe { read_value::<T>(src) };
        self.shrink_head(n);
        Ok(value)
    }

    /// Borrow a value whose end lies `offset` bytes below the top.
    ///
    /// `offset == 0` addresses the topmost value.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::OutOfRange`] if the walk runs past the bottom.
    ///
    /// # Safety
    ///
    /// The addressed bytes must hold a `T` in its stored representation.
    pub unsafe fn from<T: Value>(&self, offset: usize) -> Result<&T, StackError> {
        let src = self.access_pointer(offset, stored_size::<T>())?;
        // SAFETY: forwarded from the caller; the borrow is tied to `self`.
        Ok(unsafe { value_ref::<T>(src) })
    }

    /// Move a value out of the stack without popping it.
    ///
    /// # Safety
    ///
    /// As for [`ValueStack::from`]; the bytes are logically uninitialized
    /// afterwards and must be discarded with [`ValueStack::pop_bytes`].
    pub(crate) unsafe fn take<T: Value>(&self, offset: usize) -> Result<T, StackError> {
        let src = self.access_pointer(offset, stored_size::<T>())?;
        // SAFETY: forwarded from the caller.
        Ok(unsafe { read_value::<T>(src) })
    }

    fn locate(&self, start: usize, size: usize) -> Result<*const u8, StackError> {
        let out_of_range = StackError::OutOfRange {
            offset: start,
            size,
            total: self.total,
        };
        if start + size > self.total {
            return Err(out_of_range);
        }
        if size == 0 {
            return Ok(dangling());
        }
        let mut end = self.total;
        for page in self.pages.iter().rev() {
            let begin = end - page.used;
            if start >= begin {
                if start + size > end {
                    return Err(out_of_range);
                }
                // SAFETY: `start - begin + size <= page.used`.
                return Ok(unsafe { page.base().add(start - begin) });
            }
            end = begin;
        }
        Err(out_of_range)
    }

    /// Address of the `type_size`-byte value whose end is `offset` bytes below the top.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::OutOfRange`] if the value is not on the stack.
    pub fn access_pointer(&self, offset: usize, type_size: usize) -> Result<*const u8, StackError> {
        if offset + type_size > self.total {
            return Err(StackError::OutOfRange {
                offset,
                size: type_size,
                total: self.total,
            });
        }
        self.locate(self.total - offset - type_size, type_size)
    }

    /// Address of the `type_size`-byte value starting `offset` bytes above the bottom.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::OutOfRange`] if the value is not on the stack.
    pub fn access_pointer_forward(&self, offset: usize, type_size: usize) -> Result<*const u8, StackError> {
        self.locate(offset, type_size)
    }

    /// Borrow the raw bytes of one value, addressed as in [`ValueStack::access_pointer`].
    ///
    /// # Errors
    ///
    /// Returns [`StackError::OutOfRange`] if the bytes are not on the stack.
    pub fn bytes_at(&self, offset: usize, type_size: usize) -> Result<&[u8], StackError> {
        let src = self.access_pointer(offset, type_size)?;
        // SAFETY: `locate` checked the range lies inside one page.
        Ok(unsafe { std::slice::from_raw_parts(src, type_size) })
    }

    /// Pop `n` bytes without running destructors.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Underflow`] if fewer than `n` bytes are on the stack.
    pub fn pop_bytes(&mut self, n: usize) -> Result<(), StackError> {
        if n > self.total {
            return Err(StackError::Underflow {
                requested: n,
                available: self.total,
            });
        }
        let mut remaining = n;
        while remaining > 0 {
            let take = remaining.min(self.bytes_in_head());
            self.shrink_head(take);
            remaining -= take;
        }
        Ok(())
    }

    /// Push raw bytes (a whole number of stored values) as one contiguous run.
    pub fn copy_from(&mut self, bytes: &[u8]) {
        let dst = self.alloc_top(bytes.len());
        // SAFETY: `dst` has room for `bytes.len()` bytes and cannot alias `bytes`.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }

    /// Copy the top `dst.len()` bytes into `dst` without popping them.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Underflow`] if the stack is smaller than `dst`.
    pub fn copy_to(&self, dst: &mut [u8]) -> Result<(), StackError> {
        if dst.len() > self.total {
            return Err(StackError::Underflow {
                requested: dst.len(),
                available: self.total,
            });
        }
        self.copy_range(self.total - dst.len(), dst)
    }

    /// Copy `dst.len()` bytes starting `start` bytes above the bottom.
    pub(crate) fn copy_range(&self, start: usize, dst: &mut [u8]) -> Result<(), StackError> {
        let len = dst.len();
        if start + len > self.total {
            return Err(StackError::OutOfRange {
                offset: start,
                size: len,
                total: self.total,
            });
        }
        let mut written = 0;
        let mut begin = 0;
        for page in &self.pages {
            if written == len {
                break;
            }
            let end = begin + page.used;
            let cursor = start + written;
            if cursor < end {
                let from = cursor - begin;
                let take = (end - cursor).min(len - written);
                // SAFETY: `from + take <= page.used`.
                let src = unsafe { std::slice::from_raw_parts(page.base().add(from), take) };
                dst[written..written + take].copy_from_slice(src);
                written += take;
            }
            begin = end;
        }
        Ok(())
    }

    /// Move the top `n` bytes onto `other`, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Underflow`] if fewer than `n` bytes are on the stack.
    pub fn transfer_bytes(&mut self, other: &mut ValueStack, n: usize) -> Result<(), StackError> {
        let mut buffer = vec![0u8; n];
        self.copy_to(&mut buffer)?;
        self.pop_bytes(n)?;
        other.copy_from(&buffer);
        Ok(())
    }

    /// Replace `remove` bytes at `at` (counted from the bottom) with `insert`.
    ///
    /// Bytes above the edited range are buffered and pushed back unchanged.
    pub(crate) fn splice_bytes(&mut self, at: usize, remove: usize, insert: &[u8]) -> Result<(), StackError> {
        let end = at + remove;
        if end > self.total {
            return Err(StackError::OutOfRange {
                offset: at,
                size: remove,
                total: self.total,
            });
        }
        let mut tail = vec![0u8; self.total - end];
        self.copy_range(end, &mut tail)?;
        self.pop_bytes(tail.len() + remove)?;
        if !insert.is_empty() {
            self.copy_from(insert);
        }
        if !tail.is_empty() {
            self.copy_from(&tail);
        }
        Ok(())
    }

    /// Copy every byte, bottom to top.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.total];
        self.copy_range(0, &mut out)
            .unwrap_or_else(|e| invariant_violation(e));
        out
    }

    /// Byte-for-byte copy. Drop values are not retained; the caller owns
    /// that.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            pages: self.pages.clone(),
            spare: None,
            total: self.total,
        }
    }
}
