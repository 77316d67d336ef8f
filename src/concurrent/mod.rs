//! The concurrent, closure-based table: a table-wide `rehash_lock` shared
//! by every normal operation and held exclusively only during rehash,
//! plus one `RwSpinlock` per group guarding that group's control block
//! and slots. There are no iterators; every access to a stored element
//! happens inside a visitor closure invoked while the owning group's
//! lock is held.
//!
//! An array of independently-lockable buckets behind one structural
//! lock: "stop-the-world exclusive rehash, fine-grained per-group locks
//! for everything else" per the locking discipline below. Each element
//! lives at a flat `(group_index, slot_in_group)` pair over the same
//! group/probe machinery the single-threaded `Table` uses,
//! rather than a separate per-bucket allocation.
//!
//! Only one group lock is ever held at a time: marking a full group's
//! overflow bit for a fingerprint happens immediately, under that
//! group's own lock, as part of walking past it on the way to the next
//! candidate group — not retroactively once an insertion point is
//! found. So the "acquire two group locks in ascending order" rule
//! never applies to any operation on this surface (it only matters for
//! a two-key `insert_and_visit`-style helper, which isn't part of it).
//!
//! The concurrent surface takes `&P::Key` directly rather than the
//! single-threaded `Table`'s `Borrow<Q>`-generic lookup, trading a
//! little lookup flexibility for a much simpler set of closure
//! signatures here.

use std::cell::UnsafeCell;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::alloc::{Allocator, Global};
use crate::group::{fingerprint, GROUP_SIZE};
use crate::layout::Layout as SlotLayout;
use crate::probe::ProbeSeq;
use crate::reentrancy::EntryGuard;
use crate::rw_spinlock::RwSpinlock;
use crate::size_policy::SizePolicy;
use crate::table::{ElementPolicy, Table};

struct SharedLockGuard<'a>(&'a RwSpinlock);

impl<'a> SharedLockGuard<'a> {
    fn acquire(lock: &'a RwSpinlock) -> Self {
        lock.lock_shared();
        Self(lock)
    }
}

impl Drop for SharedLockGuard<'_> {
    fn drop(&mut self) {
        self.0.unlock_shared();
    }
}

struct ExclusiveLockGuard<'a>(&'a RwSpinlock);

impl<'a> ExclusiveLockGuard<'a> {
    fn acquire(lock: &'a RwSpinlock) -> Self {
        lock.lock();
        Self(lock)
    }
}

impl Drop for ExclusiveLockGuard<'_> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

pub struct ConcurrentTable<P, S, L, H, A = Global>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    rehash_lock: RwSpinlock,
    table: UnsafeCell<Table<P, S, L, H, A>>,
    group_locks: UnsafeCell<Box<[RwSpinlock]>>,
    len: AtomicUsize,
}

// SAFETY: every access to `table`/`group_locks` through the `UnsafeCell`s
// is serialized by `rehash_lock`/the per-group `RwSpinlock`s; the type
// only needs the ordinary Send/Sync bounds over the data it protects,
// same reasoning as `std::sync::RwLock`.
unsafe impl<P, S, L, H, A> Send for ConcurrentTable<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Value: Send,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher + Send,
    A: Allocator + Send,
{
}

unsafe impl<P, S, L, H, A> Sync for ConcurrentTable<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Value: Send,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher + Send,
    A: Allocator + Send,
{
}

impl<P, S, L, H> ConcurrentTable<P, S, L, H, Global>
where
    P: ElementPolicy,
    P::Key: Eq + Hash,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher + Clone,
{
    pub fn new(hasher: H) -> Self {
        Self::new_in(hasher, Global)
    }
}

impl<P, S, L, H, A> ConcurrentTable<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Key: Eq + Hash,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher + Clone,
    A: Allocator + Clone,
{
    pub fn new_in(hasher: H, alloc: A) -> Self {
        Self {
            rehash_lock: RwSpinlock::new(),
            table: UnsafeCell::new(Table::new_in(hasher, alloc)),
            group_locks: UnsafeCell::new(Box::new([])),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn identity(&self) -> usize {
        self as *const Self as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        let _rl = SharedLockGuard::acquire(&self.rehash_lock);
        // SAFETY: `rehash_lock` held shared; the arrays are stable here.
        unsafe { &*self.table.get() }.bucket_count()
    }

    #[inline]
    fn table_ref(&self) -> &Table<P, S, L, H, A> {
        // SAFETY: caller holds `rehash_lock` (shared or exclusive) for
        // the duration the returned reference is used.
        unsafe { &*self.table.get() }
    }

    #[inline]
    fn group_lock(&self, group: usize) -> &RwSpinlock {
        // SAFETY: caller holds `rehash_lock` (shared or exclusive); the
        // `group_locks` array is only ever replaced during an exclusive
        // rehash, which can't run concurrently with that.
        &(unsafe { &*self.group_locks.get() })[group]
    }

    fn resize_group_locks(&self, num_groups: usize) {
        let locks = (0..num_groups).map(|_| RwSpinlock::new()).collect::<Vec<_>>().into_boxed_slice();
        // SAFETY: `rehash_lock` held exclusively by every caller.
        unsafe { *self.group_locks.get() = locks };
    }

    /// Grows the table if it has no groups yet or `capacity_needed` would
    /// exceed its load factor. Acquires `rehash_lock` itself (shared to
    /// check cheaply, exclusive only if growth turns out to be needed).
    fn grow_to_cover(&self, capacity_needed: usize) {
        let needs_growth = {
            let _rl = SharedLockGuard::acquire(&self.rehash_lock);
            let table = self.table_ref();
            table.num_groups() == 0
                || (capacity_needed as f64) > (table.bucket_count() as f64 * table.max_load_factor())
        };
        if !needs_growth {
            return;
        }
        let _xl = ExclusiveLockGuard::acquire(&self.rehash_lock);
        // SAFETY: `rehash_lock` held exclusively: no other thread can be
        // touching the table's fields or any group.
        let table = unsafe { &mut *self.table.get() };
        table.set_len(self.len());
        table.reserve(capacity_needed.saturating_sub(self.len()));
        self.resize_group_locks(table.num_groups());
    }

    pub fn reserve(&self, additional: usize) {
        let _entry = EntryGuard::enter(self.identity());
        self.grow_to_cover(self.len() + additional);
    }

    pub fn rehash(&self, capacity_hint: usize) {
        let _entry = EntryGuard::enter(self.identity());
        let _xl = ExclusiveLockGuard::acquire(&self.rehash_lock);
        // SAFETY: exclusive `rehash_lock` held.
        let table = unsafe { &mut *self.table.get() };
        table.set_len(self.len());
        table.rehash(capacity_hint);
        self.resize_group_locks(table.num_groups());
    }

    /// Looks up `key` one group lock at a time (shared), invoking `f` on
    /// the stored value without releasing that group's lock. Returns 1
    /// iff found.
    fn visit_impl(&self, key: &P::Key, f: impl FnOnce(&P::Value)) -> usize {
        let _entry = EntryGuard::enter(self.identity());
        let _rl = SharedLockGuard::acquire(&self.rehash_lock);
        let table = self.table_ref();
        if table.num_groups() == 0 {
            return 0;
        }
        let hash = table.hash(key);
        let fp = fingerprint(hash);
        let start = S::position(hash, table.size_index());
        for g in ProbeSeq::new(start, table.num_groups()) {
            let lock = self.group_lock(g);
            let _group_guard = SharedLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held shared.
            let ctrl = unsafe { &*table.group_ptr(g) };
            let mut hit = None;
            for slot_in_group in ctrl.match_fp(fp) {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*table.slot_ptr(idx) };
                let value = unsafe { &*L::value_ptr(slot) };
                if P::key(value) == key {
                    hit = Some(value);
                    break;
                }
            }
            if let Some(value) = hit {
                f(value);
                return 1;
            }
            let stop = ctrl.match_empty().next().is_some() && ctrl.is_not_overflowed(fp);
            if stop {
                return 0;
            }
        }
        0
    }

    pub fn visit(&self, key: &P::Key, f: impl FnOnce(&P::Value)) -> usize {
        self.visit_impl(key, f)
    }

    pub fn cvisit(&self, key: &P::Key, f: impl FnOnce(&P::Value)) -> usize {
        self.visit_impl(key, f)
    }

    pub fn contains(&self, key: &P::Key) -> bool {
        self.visit(key, |_| {}) == 1
    }

    /// Calls `f` on every live element, one group at a time, each locked
    /// shared for the duration of that group's scan. Not a consistent
    /// snapshot across groups: concurrent insertions/erasures
    /// in groups not yet visited are observed or not, arbitrarily.
    pub fn visit_all(&self, mut f: impl FnMut(&P::Value)) -> usize {
        let _entry = EntryGuard::enter(self.identity());
        let _rl = SharedLockGuard::acquire(&self.rehash_lock);
        let table = self.table_ref();
        let mut count = 0;
        for g in 0..table.num_groups() {
            let lock = self.group_lock(g);
            let _group_guard = SharedLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held shared.
            let mut bits = unsafe { &*table.group_ptr(g) }.occupied_mask();
            while bits != 0 {
                let slot_in_group = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*table.slot_ptr(idx) };
                let value = unsafe { &*L::value_ptr(slot) };
                f(value);
                count += 1;
            }
        }
        count
    }

    /// Inserts `value`; true iff its key was newly present. On a
    /// key-equal match the table is left untouched, matching the
    /// single-threaded `insert`'s semantics.
    pub fn insert(&self, value: P::Value) -> bool {
        let _entry = EntryGuard::enter(self.identity());
        let mut value = value;
        loop {
            let outcome = {
                let _rl = SharedLockGuard::acquire(&self.rehash_lock);
                let table = self.table_ref();
                if table.num_groups() == 0 {
                    Err(value)
                } else {
                    let hash = table.hash(P::key(&value));
                    self.probe_insert(table, hash, value)
                }
            };
            match outcome {
                Ok(inserted) => return inserted,
                Err(back) => {
                    value = back;
                    self.grow_to_cover(self.len() + 1);
                }
            }
        }
    }

    /// Walks the probe sequence for `value`'s key, one group lock at a
    /// time. `Ok` means the operation completed (found existing, or
    /// inserted); `Err` hands `value` back because the sequence was
    /// exhausted and the caller must grow and retry.
    fn probe_insert(&self, table: &Table<P, S, L, H, A>, hash: u64, value: P::Value) -> Result<bool, P::Value> {
        let fp = fingerprint(hash);
        let start = S::position(hash, table.size_index());
        for g in ProbeSeq::new(start, table.num_groups()) {
            let lock = self.group_lock(g);
            let _group_guard = ExclusiveLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held exclusively.
            let ctrl = unsafe { &mut *table.group_ptr(g) };
            let mut existing = false;
            for slot_in_group in ctrl.match_fp(fp) {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*table.slot_ptr(idx) };
                let stored = unsafe { &*L::value_ptr(slot) };
                if P::key(stored) == P::key(&value) {
                    existing = true;
                    break;
                }
            }
            if existing {
                return Ok(false);
            }
            if let Some(slot_in_group) = ctrl.match_empty_or_deleted().next() {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &mut *table.slot_ptr(idx) };
                // SAFETY: `slot_in_group` came from `match_empty_or_deleted`
                // on this group, held exclusively; nothing else can
                // observe or touch it concurrently.
                unsafe { L::write(slot, value) };
                ctrl.set(slot_in_group, fp);
                self.len.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
            ctrl.mark_overflow(fp);
        }
        Err(value)
    }

    /// If `key` is present, calls `f(&mut existing)` and returns false.
    /// Otherwise constructs a value via `make()` in place and returns
    /// true.
    pub fn try_emplace_or_visit(
        &self,
        key: &P::Key,
        mut f: impl FnMut(&mut P::Value),
        make: impl FnOnce() -> P::Value,
    ) -> bool {
        let _entry = EntryGuard::enter(self.identity());
        let mut make = make;
        loop {
            let outcome = {
                let _rl = SharedLockGuard::acquire(&self.rehash_lock);
                let table = self.table_ref();
                if table.num_groups() == 0 {
                    Err(make)
                } else {
                    let hash = table.hash(key);
                    self.probe_emplace_or_visit(table, hash, key, &mut f, make)
                }
            };
            match outcome {
                Ok(inserted) => return inserted,
                Err(back) => {
                    make = back;
                    self.grow_to_cover(self.len() + 1);
                }
            }
        }
    }

    fn probe_emplace_or_visit<M>(
        &self,
        table: &Table<P, S, L, H, A>,
        hash: u64,
        key: &P::Key,
        f: &mut impl FnMut(&mut P::Value),
        make: M,
    ) -> Result<bool, M>
    where
        M: FnOnce() -> P::Value,
    {
        let fp = fingerprint(hash);
        let start = S::position(hash, table.size_index());
        for g in ProbeSeq::new(start, table.num_groups()) {
            let lock = self.group_lock(g);
            let _group_guard = ExclusiveLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held exclusively.
            let ctrl = unsafe { &mut *table.group_ptr(g) };
            let mut existing_idx = None;
            for slot_in_group in ctrl.match_fp(fp) {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*table.slot_ptr(idx) };
                let stored = unsafe { &*L::value_ptr(slot) };
                if P::key(stored) == key {
                    existing_idx = Some(idx);
                    break;
                }
            }
            if let Some(idx) = existing_idx {
                let slot = unsafe { &mut *table.slot_ptr(idx) };
                let stored = unsafe { &mut *L::value_mut_ptr(slot) };
                f(stored);
                return Ok(false);
            }
            if let Some(slot_in_group) = ctrl.match_empty_or_deleted().next() {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &mut *table.slot_ptr(idx) };
                let value = make();
                // SAFETY: see `probe_insert`.
                unsafe { L::write(slot, value) };
                ctrl.set(slot_in_group, fp);
                self.len.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
            ctrl.mark_overflow(fp);
        }
        Err(make)
    }

    /// As `insert`, but on finding an existing key-equal element invokes
    /// `f(&mut existing)` instead of leaving it untouched.
    pub fn insert_or_visit(&self, value: P::Value, mut f: impl FnMut(&mut P::Value)) -> bool {
        let _entry = EntryGuard::enter(self.identity());
        let mut value = value;
        loop {
            let outcome = {
                let _rl = SharedLockGuard::acquire(&self.rehash_lock);
                let table = self.table_ref();
                if table.num_groups() == 0 {
                    Err(value)
                } else {
                    let hash = table.hash(P::key(&value));
                    self.probe_insert_or_visit(table, hash, value, &mut f)
                }
            };
            match outcome {
                Ok(inserted) => return inserted,
                Err(back) => {
                    value = back;
                    self.grow_to_cover(self.len() + 1);
                }
            }
        }
    }

    fn probe_insert_or_visit(
        &self,
        table: &Table<P, S, L, H, A>,
        hash: u64,
        value: P::Value,
        f: &mut impl FnMut(&mut P::Value),
    ) -> Result<bool, P::Value> {
        let fp = fingerprint(hash);
        let start = S::position(hash, table.size_index());
        for g in ProbeSeq::new(start, table.num_groups()) {
            let lock = self.group_lock(g);
            let _group_guard = ExclusiveLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held exclusively.
            let ctrl = unsafe { &mut *table.group_ptr(g) };
            let mut existing_idx = None;
            for slot_in_group in ctrl.match_fp(fp) {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*table.slot_ptr(idx) };
                let stored = unsafe { &*L::value_ptr(slot) };
                if P::key(stored) == P::key(&value) {
                    existing_idx = Some(idx);
                    break;
                }
            }
            if let Some(idx) = existing_idx {
                let slot = unsafe { &mut *table.slot_ptr(idx) };
                let stored = unsafe { &mut *L::value_mut_ptr(slot) };
                f(stored);
                return Ok(false);
            }
            if let Some(slot_in_group) = ctrl.match_empty_or_deleted().next() {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &mut *table.slot_ptr(idx) };
                // SAFETY: see `probe_insert`.
                unsafe { L::write(slot, value) };
                ctrl.set(slot_in_group, fp);
                self.len.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
            ctrl.mark_overflow(fp);
        }
        Err(value)
    }

    /// Erases the slot at `(g, slot_in_group)` in a just-locked,
    /// key-matched group: drops the value, applies the adaptive
    /// tombstone policy, and decrements the live count. The group's
    /// lock must already be held exclusively by the caller.
    fn erase_matched(&self, table: &Table<P, S, L, H, A>, g: usize, slot_in_group: usize) {
        let idx = g * GROUP_SIZE + slot_in_group;
        let slot = unsafe { &mut *table.slot_ptr(idx) };
        // SAFETY: `idx` was just matched as occupied under this group's
        // exclusive lock.
        unsafe { L::drop_value(slot) };
        let ctrl = unsafe { &mut *table.group_ptr(g) };
        let new_state =
            if ctrl.match_empty().next().is_some() { crate::group::EMPTY } else { crate::group::DELETED };
        ctrl.set(slot_in_group, new_state);
        self.len.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn erase(&self, key: &P::Key) -> usize {
        self.erase_if(key, |_| true)
    }

    /// Erases `key`'s element only if `f(&mut value)` returns true.
    /// Exclusive lock on the target group throughout.
    pub fn erase_if(&self, key: &P::Key, mut f: impl FnMut(&mut P::Value) -> bool) -> usize {
        let _entry = EntryGuard::enter(self.identity());
        let _rl = SharedLockGuard::acquire(&self.rehash_lock);
        let table = self.table_ref();
        if table.num_groups() == 0 {
            return 0;
        }
        let hash = table.hash(key);
        let fp = fingerprint(hash);
        let start = S::position(hash, table.size_index());
        for g in ProbeSeq::new(start, table.num_groups()) {
            let lock = self.group_lock(g);
            let _group_guard = ExclusiveLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held exclusively.
            let ctrl = unsafe { &mut *table.group_ptr(g) };
            let mut existing = None;
            for slot_in_group in ctrl.match_fp(fp) {
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*table.slot_ptr(idx) };
                let stored = unsafe { &*L::value_ptr(slot) };
                if P::key(stored) == key {
                    existing = Some(slot_in_group);
                    break;
                }
            }
            if let Some(slot_in_group) = existing {
                let idx = g * GROUP_SIZE + slot_in_group;
                let should_erase = {
                    let slot = unsafe { &mut *table.slot_ptr(idx) };
                    let stored = unsafe { &mut *L::value_mut_ptr(slot) };
                    f(stored)
                };
                let removed = if should_erase {
                    self.erase_matched(table, g, slot_in_group);
                    1
                } else {
                    0
                };
                return removed;
            }
            let stop = ctrl.match_empty().next().is_some() && ctrl.is_not_overflowed(fp);
            if stop {
                return 0;
            }
        }
        0
    }

    /// Iterates every group, each locked exclusively in turn, erasing
    /// every element for which `f` returns true. Not atomic across
    /// groups: a rehash or another thread's mutation can interleave
    /// between groups.
    pub fn erase_all_if(&self, mut f: impl FnMut(&mut P::Value) -> bool) -> usize {
        let _entry = EntryGuard::enter(self.identity());
        let _rl = SharedLockGuard::acquire(&self.rehash_lock);
        let table = self.table_ref();
        let mut removed = 0;
        for g in 0..table.num_groups() {
            let lock = self.group_lock(g);
            let _group_guard = ExclusiveLockGuard::acquire(lock);
            // SAFETY: group `g`'s lock held exclusively.
            let mut bits = unsafe { &*table.group_ptr(g) }.occupied_mask();
            while bits != 0 {
                let slot_in_group = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let idx = g * GROUP_SIZE + slot_in_group;
                let should_erase = {
                    let slot = unsafe { &mut *table.slot_ptr(idx) };
                    let stored = unsafe { &mut *L::value_mut_ptr(slot) };
                    f(stored)
                };
                if should_erase {
                    self.erase_matched(table, g, slot_in_group);
                    removed += 1;
                }
            }
        }
        removed
    }
}
