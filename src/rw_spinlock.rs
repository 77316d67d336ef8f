//! Per-group reader/writer spinlock: a single 32-bit atomic state word
//! (bit 31 exclusive, bit 30 writer-pending, bits 29..0 reader count),
//! spinning briefly before parking via `parking_lot_core` through
//! `crate::park`.
//!
//! One named constant (`WRITER_PENDING`) is used everywhere the pending
//! bit is tested or set, rather than separately-computed masks that can
//! silently drift apart. `try_lock_shared` never falls through to the
//! exclusive `try_lock` path on contention; it only ever hands out a
//! shared acquisition or fails.

use crate::park;
use crate::sync::{AtomicU32, Ordering};

const EXCLUSIVE: u32 = 0x8000_0000;
const WRITER_PENDING: u32 = 0x4000_0000;
const READERS_MASK: u32 = 0x3FFF_FFFF;

/// Spins this many times before parking, matching boost::unordered's
/// `rw_spinlock` for a lock expected to be held only for the duration of
/// a handful of memory accesses.
const SPIN_COUNT: u32 = 24576;

/// A reader/writer spinlock sized to live inline next to a group's
/// control block, with no heap allocation and no poisoning: a panic while
/// holding the lock leaves it locked, same as the C++ original.
pub struct RwSpinlock {
    state: AtomicU32,
}

impl RwSpinlock {
    #[inline]
    pub const fn new() -> Self {
        Self { state: AtomicU32::new(0) }
    }

    #[inline]
    pub fn try_lock_shared(&self) -> bool {
        let st = self.state.load(Ordering::Relaxed);
        if st >= READERS_MASK {
            return false;
        }
        self.state.compare_exchange_weak(st, st + 1, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    pub fn lock_shared(&self) {
        loop {
            for _ in 0..SPIN_COUNT {
                let st = self.state.load(Ordering::Relaxed);
                if st < READERS_MASK
                    && self
                        .state
                        .compare_exchange_weak(st, st + 1, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                {
                    return;
                }
                core::hint::spin_loop();
            }
            park::wait(&self.state, || self.state.load(Ordering::Relaxed) >= READERS_MASK);
        }
    }

    #[inline]
    pub fn unlock_shared(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(prev & READERS_MASK != 0, "unlock_shared on an unlocked RwSpinlock");
        park::wake_all(&self.state);
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let st = self.state.load(Ordering::Relaxed);
        if st & (EXCLUSIVE | READERS_MASK) != 0 {
            return false;
        }
        self.state.compare_exchange(st, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    pub fn lock(&self) {
        loop {
            for _ in 0..SPIN_COUNT {
                let st = self.state.load(Ordering::Relaxed);
                if st & EXCLUSIVE != 0 {
                    // held exclusively by someone else; keep spinning
                } else if st & READERS_MASK == 0 {
                    if self
                        .state
                        .compare_exchange_weak(st, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        return;
                    }
                } else if st & WRITER_PENDING == 0 {
                    let _ = self.state.compare_exchange_weak(
                        st,
                        st | WRITER_PENDING,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
                core::hint::spin_loop();
            }
            if self.try_acquire_exclusive_or_mark_pending() {
                return;
            }
            park::wait(&self.state, || {
                let st = self.state.load(Ordering::Relaxed);
                st & EXCLUSIVE != 0 || st & READERS_MASK != 0
            });
        }
    }

    /// One more pass before parking: either grab the lock outright, or
    /// make sure the writer-pending bit is set (so unlocking readers know
    /// to wake us) and confirm the lock is still unavailable.
    fn try_acquire_exclusive_or_mark_pending(&self) -> bool {
        loop {
            let st = self.state.load(Ordering::Relaxed);
            if st & EXCLUSIVE != 0 {
                return false;
            }
            if st & READERS_MASK == 0 {
                if self
                    .state
                    .compare_exchange_weak(st, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
                continue;
            }
            if st & WRITER_PENDING != 0 {
                return false;
            }
            if self
                .state
                .compare_exchange_weak(st, st | WRITER_PENDING, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return false;
            }
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.state.store(0, Ordering::Release);
        park::wake_all(&self.state);
    }
}

impl Default for RwSpinlock {
    fn default() -> Self {
        Self::new()
    }
}
