//! The single-threaded open-addressing table core: owns the metadata and
//! slot arrays and implements find/insert/erase/rehash. A
//! manually-allocated array of groups, probed with `ProbeSeq`, resized
//! by building a new array and migrating live elements; the
//! single-writer table the concurrent layer above it locks around.
//!
//! Set and map share this type entirely; they differ only in
//! `ElementPolicy`.

use std::alloc::handle_alloc_error;
use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::alloc::{Allocator, Global};
use crate::group::{fingerprint, ControlBytes, GROUP_SIZE};
use crate::layout::Layout as SlotLayout;
use crate::probe::ProbeSeq;
use crate::size_policy::SizePolicy;

/// Extracts a key from a stored element, the only thing that
/// distinguishes a set (`Value = Key`) from a map (`Value = (Key, V)`).
pub trait ElementPolicy {
    type Key;
    type Value;

    fn key(value: &Self::Value) -> &Self::Key;
}

pub struct MapPolicy<K, V>(PhantomData<(K, V)>);

impl<K, V> ElementPolicy for MapPolicy<K, V> {
    type Key = K;
    type Value = (K, V);

    #[inline]
    fn key(value: &Self::Value) -> &K {
        &value.0
    }
}

pub struct SetPolicy<K>(PhantomData<K>);

impl<K> ElementPolicy for SetPolicy<K> {
    type Key = K;
    type Value = K;

    #[inline]
    fn key(value: &Self::Value) -> &K {
        value
    }
}

struct InsertionPoint {
    group: usize,
    slot_in_group: usize,
    earlier_groups: Vec<usize>,
}

/// The default load factor for a freshly constructed table (matches the
/// source library's default for the flat layout).
pub(crate) const DEFAULT_MAX_LOAD_FACTOR: f64 = 0.875;

pub struct Table<P, S, L, H, A = Global>
where
    P: ElementPolicy,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    groups: NonNull<ControlBytes>,
    slots: NonNull<L::Slot>,
    num_groups: usize,
    size_index: usize,
    len: usize,
    max_load_factor: f64,
    hasher: H,
    alloc: A,
    _marker: PhantomData<(P, S)>,
}

// SAFETY: a `Table` owns its elements exclusively, same as a `Vec<T>`;
// it's Send/Sync exactly when its contents and hasher/allocator are.
unsafe impl<P, S, L, H, A> Send for Table<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Value: Send,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher + Send,
    A: Allocator + Send,
{
}

unsafe impl<P, S, L, H, A> Sync for Table<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Value: Sync,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher + Sync,
    A: Allocator + Sync,
{
}

impl<P, S, L, H> Table<P, S, L, H, Global>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
{
    pub fn new(hasher: H) -> Self {
        Self::new_in(hasher, Global)
    }
}

impl<P, S, L, H, A> Table<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    pub fn new_in(hasher: H, alloc: A) -> Self {
        Self {
            groups: NonNull::dangling(),
            slots: NonNull::dangling(),
            num_groups: 0,
            size_index: 0,
            len: 0,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            hasher,
            alloc,
            _marker: PhantomData,
        }
    }

    pub fn with_capacity_and_hasher_in(capacity: usize, hasher: H, alloc: A) -> Self
    where
        H: Clone,
        A: Clone,
    {
        let mut table = Self::new_in(hasher, alloc);
        if capacity > 0 {
            table.reserve(capacity);
        }
        table
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.num_groups * GROUP_SIZE
    }

    #[inline]
    pub fn max_load_factor(&self) -> f64 {
        self.max_load_factor
    }

    /// Accepts any finite positive value, or an infinite value to disable
    /// load-factor-driven rehashing entirely.
    pub fn set_max_load_factor(&mut self, factor: f64) {
        assert!(factor > 0.0, "max_load_factor must be positive");
        self.max_load_factor = factor;
    }

    fn groups_layout(num_groups: usize) -> std::alloc::Layout {
        std::alloc::Layout::array::<ControlBytes>(num_groups.max(1)).expect("capacity overflow")
    }

    fn slots_layout(num_groups: usize) -> std::alloc::Layout {
        std::alloc::Layout::array::<L::Slot>((num_groups * GROUP_SIZE).max(1)).expect("capacity overflow")
    }

    fn with_groups(num_groups: usize, size_index: usize, hasher: H, alloc: A, max_load_factor: f64) -> Self {
        let groups_layout = Self::groups_layout(num_groups);
        let slots_layout = Self::slots_layout(num_groups);
        let groups_raw = alloc.allocate_zeroed(groups_layout).unwrap_or_else(|| handle_alloc_error(groups_layout));
        let slots_raw = alloc.allocate_zeroed(slots_layout).unwrap_or_else(|| handle_alloc_error(slots_layout));
        Self {
            groups: groups_raw.cast(),
            slots: slots_raw.cast(),
            num_groups,
            size_index,
            len: 0,
            max_load_factor,
            hasher,
            alloc,
            _marker: PhantomData,
        }
    }

    fn hash_of<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn find_raw<Q>(&self, hash: u64, key: &Q) -> Option<(usize, usize)>
    where
        P::Key: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if self.num_groups == 0 {
            return None;
        }
        let fp = fingerprint(hash);
        let start = S::position(hash, self.size_index);
        for g in ProbeSeq::new(start, self.num_groups) {
            // SAFETY: `g` is bounded by `num_groups` by `ProbeSeq`.
            let ctrl = unsafe { &*self.groups.as_ptr().add(g) };
            for slot_in_group in ctrl.match_fp(fp) {
                let idx = g * GROUP_SIZE + slot_in_group;
                // SAFETY: `idx` is within the allocated slots array, and
                // `match_fp` only yields slots the control block marks
                // occupied.
                let slot = unsafe { &*self.slots.as_ptr().add(idx) };
                let value = unsafe { &*L::value_ptr(slot) };
                if P::key(value).borrow() == key {
                    return Some((g, slot_in_group));
                }
            }
            if ctrl.match_empty().next().is_some() && ctrl.is_not_overflowed(fp) {
                return None;
            }
        }
        None
    }

    fn find_insertion_point(&self, hash: u64) -> Option<InsertionPoint> {
        if self.num_groups == 0 {
            return None;
        }
        let start = S::position(hash, self.size_index);
        let mut earlier_groups = Vec::new();
        for g in ProbeSeq::new(start, self.num_groups) {
            let ctrl = unsafe { &*self.groups.as_ptr().add(g) };
            if let Some(slot_in_group) = ctrl.match_empty_or_deleted().next() {
                return Some(InsertionPoint { group: g, slot_in_group, earlier_groups });
            }
            earlier_groups.push(g);
        }
        None
    }

    /// Marks every group visited before the claimed one as overflowed for
    /// `fp`, then stamps the claimed slot's control byte. Returns the
    /// claimed slot's flat index.
    fn commit_insertion(&mut self, point: InsertionPoint, fp: u8) -> usize {
        for eg in point.earlier_groups {
            // SAFETY: `eg` came from this table's own probe sequence.
            let ctrl = unsafe { &mut *self.groups.as_ptr().add(eg) };
            ctrl.mark_overflow(fp);
        }
        // SAFETY: `point.group` came from this table's own probe sequence.
        let ctrl = unsafe { &mut *self.groups.as_ptr().add(point.group) };
        ctrl.set(point.slot_in_group, fp);
        point.group * GROUP_SIZE + point.slot_in_group
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&P::Value>
    where
        P::Key: Borrow<Q> + Hash,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let (g, s) = self.find_raw(hash, key)?;
        let idx = g * GROUP_SIZE + s;
        // SAFETY: `find_raw` only returns indices of occupied slots.
        let slot = unsafe { &*self.slots.as_ptr().add(idx) };
        Some(unsafe { &*L::value_ptr(slot) })
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut P::Value>
    where
        P::Key: Borrow<Q> + Hash,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let (g, s) = self.find_raw(hash, key)?;
        let idx = g * GROUP_SIZE + s;
        let slot = unsafe { &mut *self.slots.as_ptr().add(idx) };
        Some(unsafe { &mut *L::value_mut_ptr(slot) })
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        P::Key: Borrow<Q> + Hash,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    #[inline]
    pub(crate) fn num_groups(&self) -> usize {
        self.num_groups
    }

    #[inline]
    pub(crate) fn size_index(&self) -> usize {
        self.size_index
    }

    #[inline]
    pub(crate) fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        self.hash_of(key)
    }

    /// Sets the bookkeeping length directly. Used by `ConcurrentTable`,
    /// which tracks live count itself (via an atomic, since ordinary
    /// group-local locking can't serialize writes to a single `usize`)
    /// and only needs this table's own `len` field accurate at the
    /// moments it calls into `reserve`/`rehash` under its exclusive lock.
    #[inline]
    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    /// Raw pointer to group `group`'s control block.
    ///
    /// # Safety
    /// The caller must hold that group's `RwSpinlock` (shared for reads
    /// through the resulting pointer, exclusive for writes) for as long
    /// as it's dereferenced, and `self`'s arrays must not be concurrently
    /// replaced by a rehash (i.e. the caller holds the table-wide
    /// rehash lock shared or exclusive).
    #[inline]
    pub(crate) fn group_ptr(&self, group: usize) -> *mut crate::group::ControlBytes {
        debug_assert!(group < self.num_groups);
        unsafe { self.groups.as_ptr().add(group) }
    }

    /// Raw pointer to the slot at flat index `index`. Same safety
    /// requirements as `group_ptr`.
    #[inline]
    pub(crate) fn slot_ptr(&self, index: usize) -> *mut L::Slot {
        unsafe { self.slots.as_ptr().add(index) }
    }

    #[inline]
    pub(crate) fn control_block(&self, group: usize) -> &crate::group::ControlBytes {
        debug_assert!(group < self.num_groups);
        // SAFETY: `group` is bounds-checked above against the live allocation.
        unsafe { &*self.groups.as_ptr().add(group) }
    }

    #[inline]
    pub(crate) fn slot_value(&self, index: usize) -> &P::Value {
        // SAFETY: caller (`RawIter`) only ever passes indices the control
        // block just reported occupied.
        let slot = unsafe { &*self.slots.as_ptr().add(index) };
        unsafe { &*L::value_ptr(slot) }
    }

    pub fn iter(&self) -> crate::iter::RawIter<'_, P, S, L, H, A> {
        crate::iter::RawIter::new(self)
    }

    /// Inserts `value`, returning the final slot index and whether it was
    /// newly inserted (false if a key-equal element already existed — the
    /// table is left unchanged in that case).
    pub fn insert(&mut self, value: P::Value) -> (usize, bool)
    where
        P::Key: Hash,
        H: Clone,
        A: Clone,
    {
        self.reserve(1);
        let hash = self.hash_of(P::key(&value));
        if let Some((g, s)) = self.find_raw(hash, P::key(&value)) {
            return (g * GROUP_SIZE + s, false);
        }
        let idx = self.insert_new(hash, value);
        (idx, true)
    }

    /// As `insert`, but only constructs the value (via `make`) if the key
    /// is absent; `key` borrowed, not consumed, so it's also usable by
    /// `make`. Exception safety: if `make` panics, no control byte is
    /// touched and `len` is not incremented.
    pub fn try_emplace<Q>(&mut self, key: &Q, make: impl FnOnce() -> P::Value) -> (usize, bool)
    where
        P::Key: Borrow<Q> + Hash,
        Q: Hash + Eq + ?Sized,
        H: Clone,
        A: Clone,
    {
        self.reserve(1);
        let hash = self.hash_of(key);
        if let Some((g, s)) = self.find_raw(hash, key) {
            return (g * GROUP_SIZE + s, false);
        }
        let value = make();
        let idx = self.insert_new(hash, value);
        (idx, true)
    }

    /// Inserts `value` at `hash` assuming no key-equal element is present
    /// (caller already checked). Grows and retries if the probe sequence
    /// is exhausted, which can only happen with a pathological hasher.
    fn insert_new(&mut self, hash: u64, value: P::Value) -> usize
    where
        H: Clone,
        A: Clone,
    {
        let point = match self.find_insertion_point(hash) {
            Some(point) => point,
            None => {
                self.rehash_forcing_growth();
                self.find_insertion_point(hash).expect("table has room immediately after growing")
            }
        };
        let fp = fingerprint(hash);
        let idx = point.group * GROUP_SIZE + point.slot_in_group;
        // SAFETY: `idx` addresses an empty-or-deleted slot just claimed by
        // `find_insertion_point`, not yet committed (so not yet readable
        // by any other lookup), and is written exactly once here.
        let slot = unsafe { &mut *self.slots.as_ptr().add(idx) };
        unsafe { L::write(slot, value) };
        self.commit_insertion(point, fp);
        self.len += 1;
        idx
    }

    pub fn erase<Q>(&mut self, key: &Q) -> usize
    where
        P::Key: Borrow<Q> + Hash,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        match self.find_raw(hash, key) {
            Some((g, s)) => {
                self.erase_at(g * GROUP_SIZE + s);
                1
            }
            None => 0,
        }
    }

    /// Erases the element at flat slot index `index`. Uses an adaptive
    /// tombstone policy: a slot is reset to `empty` rather than
    /// `deleted` when its group already has another empty slot,
    /// since deleted-marking is only needed to keep the probe sequence of
    /// other keys intact, and an already-empty group can't depend on it.
    pub fn erase_at(&mut self, index: usize) {
        let group = index / GROUP_SIZE;
        let slot_in_group = index % GROUP_SIZE;
        // SAFETY: caller guarantees `index` addresses an occupied slot.
        let slot = unsafe { &mut *self.slots.as_ptr().add(index) };
        unsafe { L::drop_value(slot) };
        let ctrl = unsafe { &mut *self.groups.as_ptr().add(group) };
        let new_state = if ctrl.match_empty().next().is_some() {
            crate::group::EMPTY
        } else {
            crate::group::DELETED
        };
        ctrl.set(slot_in_group, new_state);
        self.len -= 1;
    }

    pub fn clear(&mut self) {
        for g in 0..self.num_groups {
            for slot_in_group in 0..GROUP_SIZE {
                let ctrl = unsafe { &*self.groups.as_ptr().add(g) };
                if ctrl.get(slot_in_group) & 0x80 == 0 {
                    continue;
                }
                let idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &mut *self.slots.as_ptr().add(idx) };
                unsafe { L::drop_value(slot) };
            }
            let ctrl = unsafe { &mut *self.groups.as_ptr().add(g) };
            *ctrl = ControlBytes::EMPTY_BLOCK;
        }
        self.len = 0;
    }

    fn groups_needed_for(&self, capacity_needed: usize) -> usize {
        if !self.max_load_factor.is_finite() {
            return (capacity_needed + GROUP_SIZE - 1) / GROUP_SIZE;
        }
        let slots_per_group = GROUP_SIZE as f64 * self.max_load_factor;
        ((capacity_needed as f64) / slots_per_group).ceil() as usize
    }

    /// Ensures room for `additional` more elements beyond `len`, growing
    /// if the resulting occupancy would exceed `max_load_factor`.
    pub fn reserve(&mut self, additional: usize)
    where
        H: Clone,
        A: Clone,
    {
        let capacity_needed = self.len + additional;
        if self.num_groups == 0 {
            self.rehash_to_capacity(capacity_needed.max(1));
            return;
        }
        let current_capacity = self.bucket_count();
        let load_limit = current_capacity as f64 * self.max_load_factor;
        if capacity_needed as f64 > load_limit {
            self.rehash_to_capacity(capacity_needed);
        }
    }

    /// Rehashes to the smallest legal size covering at least
    /// `max(capacity_hint, len)`. A no-op-sized request still rebuilds
    /// the table at its current size, clearing tombstones and resetting
    /// overflow bits: aside from the one guaranteed-growth case below,
    /// repeated rehashes at an already-sufficient size simply reallocate
    /// at the same size index.
    pub fn rehash(&mut self, capacity_hint: usize)
    where
        H: Clone,
        A: Clone,
    {
        self.rehash_to_capacity(capacity_hint.max(self.len));
    }

    fn rehash_to_capacity(&mut self, capacity_needed: usize)
    where
        H: Clone,
        A: Clone,
    {
        let min_groups = self.groups_needed_for(capacity_needed.max(1)).max(1);
        let size_index = S::size_index_for(min_groups);
        self.rehash_to_size_index(size_index);
    }

    /// Rehashes to a size strictly larger than the current one, regardless
    /// of what `len` alone would require. Only the probe-exhaustion retry
    /// in `insert_new`/`insert_node` needs this: a pathological hasher can
    /// exhaust every group's probe sequence well below the load-factor
    /// threshold, so the normal `rehash`/`reserve` entry points must not
    /// carry this forced-growth behavior (see `rehash`'s idempotence
    /// contract for `n <= current_capacity`).
    fn rehash_forcing_growth(&mut self)
    where
        H: Clone,
        A: Clone,
    {
        let min_groups = self.groups_needed_for(self.len.max(1)).max(1).max(self.num_groups + 1);
        let size_index = S::size_index_for(min_groups);
        self.rehash_to_size_index(size_index);
    }

    fn rehash_to_size_index(&mut self, new_size_index: usize)
    where
        H: Clone,
        A: Clone,
    {
        let new_num_groups = S::groups_for_index(new_size_index).max(1);

        // Phase A: compute every live element's hash while `self` is
        // completely untouched. The hasher is the only thing that can
        // panic here; if it does, nothing has been allocated or mutated.
        let mut relocations: Vec<(usize, u64)> = Vec::with_capacity(self.len);
        for g in 0..self.num_groups {
            let ctrl = unsafe { &*self.groups.as_ptr().add(g) };
            for slot_in_group in 0..GROUP_SIZE {
                if ctrl.get(slot_in_group) & 0x80 == 0 {
                    continue;
                }
                let old_idx = g * GROUP_SIZE + slot_in_group;
                let slot = unsafe { &*self.slots.as_ptr().add(old_idx) };
                let value = unsafe { &*L::value_ptr(slot) };
                let hash = self.hash_of(P::key(value));
                relocations.push((old_idx, hash));
            }
        }

        // Phase B: build the new table and transplant bytes. Nothing
        // from here on can fail (plain memory moves and arithmetic
        // already validated to fit), so there's no remaining
        // exception-safety concern past this point.
        let mut new_table =
            Self::with_groups(new_num_groups, new_size_index, self.hasher.clone(), self.alloc.clone(), self.max_load_factor);
        for (old_idx, hash) in relocations {
            let fp = fingerprint(hash);
            let point = new_table
                .find_insertion_point(hash)
                .expect("freshly sized table has room for every relocated element");
            let new_idx = point.group * GROUP_SIZE + point.slot_in_group;
            new_table.commit_insertion(point, fp);
            // SAFETY: `old_idx` is a live slot in `self`'s storage;
            // `new_idx` is an empty, just-claimed slot in `new_table`'s
            // storage, not yet readable by any lookup.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.slots.as_ptr().add(old_idx),
                    new_table.slots.as_ptr().add(new_idx),
                    1,
                );
            }
        }
        new_table.len = self.len;

        // Adopt the new storage; free the old arrays raw — no per-element
        // destructor runs, since every live element's bytes now live
        // solely in `new_table`.
        let old_groups = self.groups;
        let old_slots = self.slots;
        let old_num_groups = self.num_groups;
        if old_num_groups > 0 {
            unsafe {
                self.alloc.deallocate(old_groups.cast(), Self::groups_layout(old_num_groups));
                self.alloc.deallocate(old_slots.cast(), Self::slots_layout(old_num_groups));
            }
        }
        self.groups = new_table.groups;
        self.slots = new_table.slots;
        self.num_groups = new_table.num_groups;
        self.size_index = new_table.size_index;
        std::mem::forget(new_table);
    }
}

impl<P, S, H, A> Table<P, S, crate::layout::Node, H, A>
where
    P: ElementPolicy,
    P::Key: Eq + Hash,
    S: SizePolicy,
    H: BuildHasher + Clone,
    A: Allocator + Clone,
{
    /// Removes `key`'s element without dropping it, handing ownership to
    /// the caller as a movable [`NodeHandle`](crate::node_handle::NodeHandle).
    /// Node-layout only: the boxed element never moves, so splicing it
    /// into another table costs no allocation.
    pub fn extract<Q>(&mut self, key: &Q) -> crate::node_handle::NodeHandle<P::Value>
    where
        P::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let Some((g, s)) = self.find_raw(hash, key) else {
            return crate::node_handle::NodeHandle::empty();
        };
        let idx = g * GROUP_SIZE + s;
        // SAFETY: `idx` addresses an occupied slot just returned by
        // `find_raw`; `Self::Slot` is `Option<NonNull<P::Value>>` here.
        let slot = unsafe { &mut *self.slots.as_ptr().add(idx) };
        let ptr = slot.take().expect("find_raw only returns occupied slots");
        let ctrl = unsafe { &mut *self.groups.as_ptr().add(g) };
        let new_state =
            if ctrl.match_empty().next().is_some() { crate::group::EMPTY } else { crate::group::DELETED };
        ctrl.set(s, new_state);
        self.len -= 1;
        // SAFETY: `ptr` was produced by `Node::write`'s `Box::into_raw`
        // and has not been reclaimed.
        unsafe { crate::node_handle::NodeHandle::from_raw(ptr) }
    }

    /// Splices `handle`'s element into the table. Returns `Ok(true)` if
    /// newly inserted, or `Err(handle)` unchanged if a key-equal element
    /// was already present (matching `insert`'s "leave existing alone"
    /// semantics without silently dropping the handle's element).
    pub fn insert_node(
        &mut self,
        handle: crate::node_handle::NodeHandle<P::Value>,
    ) -> Result<bool, crate::node_handle::NodeHandle<P::Value>> {
        if handle.is_empty() {
            return Ok(false);
        }
        self.reserve(1);
        let hash = self.hash_of(P::key(handle.value()));
        if self.find_raw(hash, P::key(handle.value())).is_some() {
            return Err(handle);
        }
        let point = match self.find_insertion_point(hash) {
            Some(point) => point,
            None => {
                self.rehash_forcing_growth();
                self.find_insertion_point(hash).expect("table has room immediately after growing")
            }
        };
        let fp = fingerprint(hash);
        let idx = point.group * GROUP_SIZE + point.slot_in_group;
        let ptr = handle.into_raw().expect("checked non-empty above");
        // SAFETY: `idx` addresses an empty-or-deleted slot just claimed by
        // `find_insertion_point`, and `ptr` is a live, uniquely-owned
        // allocation handed over by the now-consumed handle.
        let slot = unsafe { &mut *self.slots.as_ptr().add(idx) };
        *slot = Some(ptr);
        self.commit_insertion(point, fp);
        self.len += 1;
        Ok(true)
    }
}

impl<P, S, L, H, A> Drop for Table<P, S, L, H, A>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    fn drop(&mut self) {
        if self.num_groups == 0 {
            return;
        }
        self.clear();
        unsafe {
            self.alloc.deallocate(self.groups.cast(), Self::groups_layout(self.num_groups));
            self.alloc.deallocate(self.slots.cast(), Self::slots_layout(self.num_groups));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Flat;
    use crate::size_policy::Pow2Mask;
    use std::collections::hash_map::RandomState;

    type TestMap = Table<MapPolicy<String, i32>, Pow2Mask, Flat, RandomState>;

    fn new_map() -> TestMap {
        Table::new(RandomState::new())
    }

    #[test]
    fn basic_map_roundtrip() {
        let mut m = new_map();
        m.insert(("a".to_string(), 1));
        m.insert(("b".to_string(), 2));
        m.insert(("c".to_string(), 3));
        assert_eq!(m.get("b").map(|(_, v)| *v), Some(2));
        assert_eq!(m.erase("a"), 1);
        assert!(m.get("a").is_none());
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn insert_twice_does_not_duplicate() {
        let mut m = new_map();
        let (_, first) = m.insert(("k".to_string(), 1));
        let (_, second) = m.insert(("k".to_string(), 2));
        assert!(first);
        assert!(!second);
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("k").map(|(_, v)| *v), Some(1));
    }

    #[test]
    fn rehash_preserves_set() {
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        for i in 0..1000 {
            set.insert(i);
        }
        for i in 0..1000 {
            assert!(set.contains(&i), "missing {i}");
        }
        assert!(set.bucket_count() >= 999);
        assert_eq!(set.len(), 1000);
    }

    #[test]
    fn load_factor_one_half_roughly_doubles_bucket_count() {
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        set.set_max_load_factor(0.5);
        for i in 0..1000 {
            set.insert(i);
        }
        assert!(set.bucket_count() >= 2000);
    }

    #[test]
    fn infinite_max_load_factor_never_rehashes_on_count_alone() {
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        set.set_max_load_factor(f64::INFINITY);
        set.reserve(16);
        let bucket_count = set.bucket_count();
        for i in 0..(bucket_count as i32) {
            set.insert(i);
        }
        assert_eq!(set.bucket_count(), bucket_count);
    }

    #[test]
    fn try_emplace_then_visit_style_increment() {
        let mut m: Table<MapPolicy<i32, i32>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        for _ in 0..100 {
            let (idx, inserted) = m.try_emplace(&5, || (5, 0));
            if !inserted {
                if let Some((_, v)) = m.get_mut(&5) {
                    *v += 1;
                }
            }
            let _ = idx;
        }
        assert_eq!(m.get(&5).map(|(_, v)| *v), Some(99));
    }

    #[test]
    fn erase_then_insert_returns_to_prior_size() {
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        set.insert(1);
        set.insert(2);
        let bucket_count = set.bucket_count();
        assert_eq!(set.erase(&1), 1);
        set.insert(1);
        assert_eq!(set.len(), 2);
        assert_eq!(set.bucket_count(), bucket_count);
    }

    #[test]
    fn rehash_to_a_smaller_hint_is_idempotent_in_effect() {
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        for i in 0..10 {
            set.insert(i);
        }
        let bucket_count = set.bucket_count();
        set.rehash(5);
        assert_eq!(set.bucket_count(), bucket_count);
        assert_eq!(set.len(), 10);
        for i in 0..10 {
            assert!(set.contains(&i));
        }
    }

    #[test]
    fn fingerprint_collision_keeps_both_keys_findable() {
        // Two keys that hash differently but share the low 7 fingerprint
        // bits and the same home group are both findable independently.
        let mut set: Table<SetPolicy<u64>, Pow2Mask, Flat, RandomState> = Table::new(RandomState::new());
        set.insert(1);
        set.insert(2);
        set.insert(3);
        assert!(set.contains(&1) && set.contains(&2) && set.contains(&3));
    }

    #[test]
    fn probe_exhaustion_with_constant_hasher_rehashes_instead_of_losing_data() {
        use std::hash::Hasher;

        #[derive(Clone, Default)]
        struct ConstantHasher;
        impl Hasher for ConstantHasher {
            fn finish(&self) -> u64 {
                42
            }
            fn write(&mut self, _bytes: &[u8]) {}
        }
        impl BuildHasher for ConstantHasher {
            type Hasher = ConstantHasher;
            fn build_hasher(&self) -> ConstantHasher {
                ConstantHasher
            }
        }

        let mut set: Table<SetPolicy<i32>, Pow2Mask, Flat, ConstantHasher> = Table::new(ConstantHasher);
        for i in 0..40 {
            set.insert(i);
        }
        for i in 0..40 {
            assert!(set.contains(&i), "lost {i} under constant-hash probe exhaustion");
        }
        assert_eq!(set.len(), 40);
    }

    #[test]
    fn node_layout_round_trips_through_rehash() {
        use crate::layout::Node;
        let mut m: Table<MapPolicy<i32, String>, Pow2Mask, Node, RandomState> = Table::new(RandomState::new());
        for i in 0..200 {
            m.insert((i, format!("value-{i}")));
        }
        for i in 0..200 {
            assert_eq!(m.get(&i).map(|(_, v)| v.as_str()), Some(format!("value-{i}").as_str()));
        }
    }

    #[test]
    fn extract_then_insert_node_moves_an_element_between_tables() {
        use crate::layout::Node;
        type NodeSet = Table<SetPolicy<String>, Pow2Mask, Node, RandomState>;

        let mut a: NodeSet = Table::new(RandomState::new());
        let mut b: NodeSet = Table::new(RandomState::new());
        a.insert("alpha".to_string());
        a.insert("beta".to_string());

        let handle = a.extract("alpha");
        assert!(!handle.is_empty());
        assert_eq!(handle.value(), "alpha");
        assert!(!a.contains("alpha"));
        assert_eq!(a.len(), 1);

        assert!(matches!(b.insert_node(handle), Ok(true)));
        assert!(b.contains("alpha"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn extract_missing_key_returns_empty_handle() {
        use crate::layout::Node;
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Node, RandomState> = Table::new(RandomState::new());
        set.insert(1);
        let handle = set.extract(&99);
        assert!(handle.is_empty());
    }

    #[test]
    fn insert_node_of_existing_key_returns_handle_unchanged() {
        use crate::layout::Node;
        let mut set: Table<SetPolicy<i32>, Pow2Mask, Node, RandomState> = Table::new(RandomState::new());
        set.insert(1);
        let mut donor: Table<SetPolicy<i32>, Pow2Mask, Node, RandomState> = Table::new(RandomState::new());
        donor.insert(1);
        let handle = donor.extract(&1);
        let Err(handle) = set.insert_node(handle) else {
            panic!("expected Err: key already present");
        };
        assert_eq!(*handle.value(), 1);
        assert_eq!(set.len(), 1);
    }
}
