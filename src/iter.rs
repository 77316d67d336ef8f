//! Read-only iteration over a single-threaded `Table`: a
//! `(group_index, slot_bitmask)` cursor plus a back-reference to the
//! table, rather than a raw pointer walked linearly over the slot array,
//! so advancing the cursor costs one mask check per group instead of
//! one check per slot, and tombstone/empty slots never need individual
//! inspection. A bitmask walk driven by each group's `occupied_mask`.

use std::hash::BuildHasher;
use std::marker::PhantomData;

use crate::alloc::Allocator;
use crate::group::GROUP_SIZE;
use crate::layout::Layout as SlotLayout;
use crate::size_policy::SizePolicy;
use crate::table::{ElementPolicy, Table};

pub struct RawIter<'a, P, S, L, H, A>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    table: &'a Table<P, S, L, H, A>,
    group_index: usize,
    mask: u16,
    _marker: PhantomData<&'a P::Value>,
}

impl<'a, P, S, L, H, A> RawIter<'a, P, S, L, H, A>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    pub(crate) fn new(table: &'a Table<P, S, L, H, A>) -> Self {
        let mask = if table.num_groups() > 0 { table.control_block(0).occupied_mask() } else { 0 };
        Self { table, group_index: 0, mask, _marker: PhantomData }
    }
}

impl<'a, P, S, L, H, A> Iterator for RawIter<'a, P, S, L, H, A>
where
    P: ElementPolicy,
    P::Key: Eq,
    S: SizePolicy,
    L: SlotLayout<P::Value>,
    H: BuildHasher,
    A: Allocator,
{
    type Item = &'a P::Value;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.mask != 0 {
                let slot_in_group = self.mask.trailing_zeros() as usize;
                self.mask &= self.mask - 1;
                let idx = self.group_index * GROUP_SIZE + slot_in_group;
                return Some(self.table.slot_value(idx));
            }
            self.group_index += 1;
            if self.group_index >= self.table.num_groups() {
                return None;
            }
            self.mask = self.table.control_block(self.group_index).occupied_mask();
        }
    }
}
