//! Flat vs. Node slot storage: a `Flat` table stores each
//! element inline in the slot array, a `Node` table stores each element
//! behind an individually-heap-allocated, address-stable box and keeps
//! only a pointer inline. Both present the same logical API to `Table`
//! so the rest of the core is layout-agnostic.
//!
//! `Node`'s per-element allocation always goes through the global heap
//! (`Box`) rather than the table's configured `Allocator`: giving every
//! element its own custom-allocator-backed box would need allocator-aware
//! `Box` support, which isn't available on stable. Noted as a scope
//! boundary rather than silently ignored.

use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// # Safety
/// Implementors must ensure `value_ptr`/`value_mut_ptr` only dereference
/// a slot that was previously `write`-initialized and not yet `take`n or
/// `drop_value`d, and that `Slot` itself needs no destructor run by the
/// table beyond what `drop_value`/`take` already perform.
pub unsafe trait Layout<T> {
    type Slot;

    fn empty_slot() -> Self::Slot;
    /// # Safety
    /// `slot` must be initialized.
    unsafe fn value_ptr(slot: &Self::Slot) -> *const T;
    /// # Safety
    /// `slot` must be initialized.
    unsafe fn value_mut_ptr(slot: &mut Self::Slot) -> *mut T;
    /// # Safety
    /// `slot` must not already be initialized.
    unsafe fn write(slot: &mut Self::Slot, value: T);
    /// # Safety
    /// `slot` must be initialized; leaves `slot` uninitialized.
    unsafe fn drop_value(slot: &mut Self::Slot);
    /// # Safety
    /// `slot` must be initialized; leaves `slot` uninitialized.
    unsafe fn take(slot: &mut Self::Slot) -> T;
}

/// Value stored inline in the slot array.
pub struct Flat;

unsafe impl<T> Layout<T> for Flat {
    type Slot = MaybeUninit<T>;

    #[inline]
    fn empty_slot() -> Self::Slot {
        MaybeUninit::uninit()
    }

    #[inline]
    unsafe fn value_ptr(slot: &Self::Slot) -> *const T {
        slot.as_ptr()
    }

    #[inline]
    unsafe fn value_mut_ptr(slot: &mut Self::Slot) -> *mut T {
        slot.as_mut_ptr()
    }

    #[inline]
    unsafe fn write(slot: &mut Self::Slot, value: T) {
        slot.write(value);
    }

    #[inline]
    unsafe fn drop_value(slot: &mut Self::Slot) {
        // SAFETY: forwarded from caller.
        unsafe { std::ptr::drop_in_place(slot.as_mut_ptr()) };
    }

    #[inline]
    unsafe fn take(slot: &mut Self::Slot) -> T {
        // SAFETY: forwarded from caller.
        unsafe { slot.as_ptr().read() }
    }
}

/// Value heap-allocated individually; the slot array only holds a
/// pointer, so an element's address never moves across a rehash. Needed
/// by `NodeHandle`, which extracts an element by pointer without moving
/// the value it points to.
pub struct Node;

unsafe impl<T> Layout<T> for Node {
    type Slot = Option<NonNull<T>>;

    #[inline]
    fn empty_slot() -> Self::Slot {
        None
    }

    #[inline]
    unsafe fn value_ptr(slot: &Self::Slot) -> *const T {
        slot.expect("read from an empty node slot").as_ptr()
    }

    #[inline]
    unsafe fn value_mut_ptr(slot: &mut Self::Slot) -> *mut T {
        slot.expect("write through an empty node slot").as_ptr()
    }

    #[inline]
    unsafe fn write(slot: &mut Self::Slot, value: T) {
        let boxed = Box::new(value);
        *slot = Some(NonNull::new(Box::into_raw(boxed)).expect("Box::into_raw is never null"));
    }

    #[inline]
    unsafe fn drop_value(slot: &mut Self::Slot) {
        if let Some(ptr) = slot.take() {
            // SAFETY: ptr was produced by Box::into_raw in `write` and is
            // being dropped at most once.
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }

    #[inline]
    unsafe fn take(slot: &mut Self::Slot) -> T {
        let ptr = slot.take().expect("take from an empty node slot");
        // SAFETY: ptr was produced by Box::into_raw in `write`.
        *unsafe { Box::from_raw(ptr.as_ptr()) }
    }
}
