//! `foa`: the core of a family of open-addressing hash tables ("fast open
//! addressing"), SIMD group lookup plus a closure-based, lock-per-group
//! concurrent variant layered on top of a single-threaded substrate.
//!
//! This crate is deliberately the CORE only: a [`table::Table`] (single
//! writer, `&mut self`) and a [`concurrent::ConcurrentTable`] (shared
//! access, per-group `RwSpinlock`s, no iterators — every access to a
//! stored element happens inside a visitor closure). User-facing map/set
//! wrappers, hashers, and allocators beyond [`alloc::Global`] are left to
//! callers building on top of this core.
//!
//! Stable only: no nightly features. Earlier drafts of this crate reached
//! for `#![feature(dropck_eyepatch)]` (precise node-drop-check variance)
//! and `#![feature(portable_simd)]` (a single portable SIMD group-match
//! path); both are dropped in favor of, respectively, ordinary `Drop`
//! impls plus the table's own exception-safety discipline, and a
//! `cfg`-selected SSE2/NEON/generic backend under `group/`.

pub mod alloc;
pub mod concurrent;
pub mod error;
pub mod iter;
pub mod layout;
pub mod node_handle;
pub mod rw_spinlock;
pub mod size_policy;
pub mod table;

mod group;
mod park;
mod probe;
mod reentrancy;
mod sync;

pub use crate::alloc::{Allocator, Global};
pub use crate::concurrent::ConcurrentTable;
pub use crate::error::{Error, TableId};
pub use crate::iter::RawIter;
pub use crate::layout::{Flat, Layout, Node};
pub use crate::node_handle::NodeHandle;
pub use crate::rw_spinlock::RwSpinlock;
pub use crate::size_policy::{Pow2Mask, PrimeFmod, SizePolicy};
pub use crate::table::{ElementPolicy, MapPolicy, SetPolicy, Table};
