//! The minimal allocator contract the core consumes. Real fancy-pointer /
//! stateful allocators are out of proportion to this crate's scope; the
//! trait exists so the table's storage management goes through one seam
//! instead of calling `std::alloc` directly, bundling `alloc_zeroed`/
//! `dealloc` calls around a single `Layout`.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// A byte-level allocator. `construct`/`destroy` are left to the caller
/// (the table calls `ptr::write`/`ptr::drop_in_place` directly); this
/// trait only owns the raw memory.
///
/// # Safety
/// Implementors must behave like `std::alloc::GlobalAlloc`: `allocate`
/// returns either a null-free pointer to a live allocation of at least
/// `layout.size()` bytes aligned to `layout.align()`, or `None` on
/// failure; `deallocate` must be called with the same layout used to
/// allocate.
pub unsafe trait Allocator: Clone {
    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>>;
    /// # Safety
    /// `ptr` must have been returned by `allocate_zeroed` on an
    /// equal allocator instance with the same `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-wide global allocator, the only implementation this crate
/// ships. Zero-sized, always equal to any other `Global`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    #[inline]
    fn allocate_zeroed(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return NonNull::new(layout.align() as *mut u8);
        }
        // SAFETY: layout is non-zero-sized, checked above.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // SAFETY: forwarded precondition from the trait's safety doc.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}
