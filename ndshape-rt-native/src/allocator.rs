//! Allocator classes used by the buffer engine.
//!
//! Two classes are kept apart: an aligned class for data blocks, ref targets and
//! bytes payloads, and a plain class used only for string payloads.

use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;

/// Source of raw memory for a buffer.
///
/// # Safety
///
/// Implementations must return blocks valid for reads and writes of `size`
/// bytes (at least one byte for `size == 0`), and `alloc_aligned` blocks must be
/// zero-filled and aligned to `align`.
pub unsafe trait Allocator {
    fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from `alloc_aligned` on this allocator with the same `size` and `align`.
    unsafe fn free_aligned(&self, ptr: NonNull<u8>, size: usize, align: usize);

    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from `alloc` on this allocator with the same `size`.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        (**self).alloc_aligned(size, align)
    }

    unsafe fn free_aligned(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe { (**self).free_aligned(ptr, size, align) }
    }

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).alloc(size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        unsafe { (**self).free(ptr, size) }
    }
}

fn layout(size: usize, align: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), align.max(1)).ok()
}

/// The global Rust allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemAllocator;

unsafe impl Allocator for SystemAllocator {
    fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let layout = layout(size, align)?;
        // SAFETY: `layout` has a non-zero size.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    unsafe fn free_aligned(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if let Some(layout) = layout(size, align) {
            // SAFETY: the caller passes the layout the block was allocated with.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = layout(size, 1)?;
        // SAFETY: `layout` has a non-zero size.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = layout(size, 1) {
            // SAFETY: as above.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationTelemetry {
    pub aligned_alloc_calls: usize,
    pub aligned_free_calls: usize,
    pub alloc_calls: usize,
    pub free_calls: usize,
    pub alloc_bytes: usize,
    pub freed_bytes: usize,
    /// Frees of pointers that were not live (double or foreign frees). Never forwarded.
    pub invalid_frees: usize,
    pub failed_allocs: usize,
}

impl AllocationTelemetry {
    pub fn outstanding_blocks(&self) -> usize {
        (self.aligned_alloc_calls + self.alloc_calls)
            .saturating_sub(self.aligned_free_calls + self.free_calls)
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.alloc_bytes.saturating_sub(self.freed_bytes)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Class {
    Aligned,
    Plain,
}

/// Wraps another allocator, recording every call and optionally failing on demand.
///
/// Frees of blocks it does not know about are counted and dropped instead of
/// being forwarded, so double frees show up in the telemetry.
#[derive(Debug, Default)]
pub struct CountingAllocator<A: Allocator = SystemAllocator> {
    inner: A,
    stats: Cell<AllocationTelemetry>,
    live: RefCell<HashMap<usize, (Class, usize, usize)>>,
    fail_after: Cell<Option<usize>>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A: Allocator> CountingAllocator<A> {
    pub fn with_inner(inner: A) -> Self {
        CountingAllocator {
            inner,
            stats: Cell::new(AllocationTelemetry::default()),
            live: RefCell::new(HashMap::new()),
            fail_after: Cell::new(None),
        }
    }

    /// Let `n` more allocations succeed, then fail every one after them.
    pub fn fail_after(&self, n: usize) {
        self.fail_after.set(Some(n));
    }

    pub fn stop_failing(&self) {
        self.fail_after.set(None);
    }

    pub fn telemetry(&self) -> AllocationTelemetry {
        self.stats.get()
    }

    pub fn live_blocks(&self) -> usize {
        self.live.borrow().len()
    }

    fn update(&self, f: impl FnOnce(&mut AllocationTelemetry)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }

    fn admit(&self) -> bool {
        match self.fail_after.get() {
            Some(0) => {
                self.update(|s| s.failed_allocs += 1);
                false
            }
            Some(n) => {
                self.fail_after.set(Some(n - 1));
                true
            }
            None => true,
        }
    }

    fn record_alloc(&self, ptr: NonNull<u8>, class: Class, size: usize, align: usize) {
        self.live
            .borrow_mut()
            .insert(ptr.as_ptr() as usize, (class, size, align));
        self.update(|s| {
            match class {
                Class::Aligned => s.aligned_alloc_calls += 1,
                Class::Plain => s.alloc_calls += 1,
            }
            s.alloc_bytes += size;
        });
    }

    fn record_free(&self, ptr: NonNull<u8>, class: Class, size: usize, align: usize) -> bool {
        let known = self.live.borrow_mut().remove(&(ptr.as_ptr() as usize));
        if known != Some((class, size, align)) {
            if let Some(entry) = known {
                self.live.borrow_mut().insert(ptr.as_ptr() as usize, entry);
            }
            self.update(|s| s.invalid_frees += 1);
            return false;
        }
        self.update(|s| {
            match class {
                Class::Aligned => s.aligned_free_calls += 1,
                Class::Plain => s.free_calls += 1,
            }
            s.freed_bytes += size;
        });
        true
    }
}

unsafe impl<A: Allocator> Allocator for CountingAllocator<A> {
    fn alloc_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !self.admit() {
            return None;
        }
        let ptr = self.inner.alloc_aligned(size, align)?;
        self.record_alloc(ptr, Class::Aligned, size, align);
        Some(ptr)
    }

    unsafe fn free_aligned(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if self.record_free(ptr, Class::Aligned, size, align) {
            unsafe { self.inner.free_aligned(ptr, size, align) }
        }
    }

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if !self.admit() {
            return None;
        }
        let ptr = self.inner.alloc(size)?;
        self.record_alloc(ptr, Class::Plain, size, 1);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if self.record_free(ptr, Class::Plain, size, 1) {
            unsafe { self.inner.free(ptr, size) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_blocks_are_zeroed_and_aligned() {
        let a = SystemAllocator;
        let p = a.alloc_aligned(64, 32).expect("allocation");
        assert_eq!(p.as_ptr() as usize % 32, 0);
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 64) };
        assert!(bytes.iter().all(|b| *b == 0));
        unsafe { a.free_aligned(p, 64, 32) };
    }

    #[test]
    fn test_counting_allocator_tracks_and_rejects_double_free() {
        let a = CountingAllocator::new();
        let p = a.alloc_aligned(16, 8).unwrap();
        let q = a.alloc(5).unwrap();
        assert_eq!(a.live_blocks(), 2);
        unsafe {
            a.free(q, 5);
            a.free_aligned(p, 16, 8);
            a.free_aligned(p, 16, 8);
        }
        let t = a.telemetry();
        assert_eq!(t.outstanding_blocks(), 0);
        assert_eq!(t.outstanding_bytes(), 0);
        assert_eq!(t.invalid_frees, 1);
    }

    #[test]
    fn test_failure_injection() {
        let a = CountingAllocator::new();
        a.fail_after(1);
        let p = a.alloc_aligned(8, 8).unwrap();
        assert!(a.alloc_aligned(8, 8).is_none());
        assert!(a.alloc(1).is_none());
        a.stop_failing();
        unsafe { a.free_aligned(p, 8, 8) };
        assert_eq!(a.telemetry().failed_allocs, 2);
        assert_eq!(a.live_blocks(), 0);
    }
}
