#[cfg(loom)]
pub(crate) use loom::sync::{
    atomic::{fence, AtomicIsize, AtomicPtr, AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};

#[cfg(not(loom))]
pub(crate) use std::sync::{
    atomic::{fence, AtomicIsize, AtomicPtr, AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};
