//! Spin-then-park backoff primitive shared by `RwSpinlock`. Parks the
//! calling thread on the lock's own address, one address per lock, with
//! a plain revalidation closure run right before actually parking.
//!
//! `loom` has no `parking_lot_core` support, so under `cfg(loom)` parking
//! is emulated with a mutex-guarded waiter list and `loom::thread::park`.

#[cfg(not(loom))]
use parking_lot_core::{self, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

#[cfg(loom)]
use crate::sync::Mutex;

#[inline]
fn addr_of<T>(r: &T) -> usize {
    r as *const T as usize
}

/// Parks the current thread on `addr` as long as `still_blocked` returns
/// true at the moment parking_lot_core is ready to commit the park.
#[cold]
#[cfg(not(loom))]
pub(crate) fn wait<T>(on: &T, still_blocked: impl Fn() -> bool) {
    let addr = addr_of(on);
    let validate = || still_blocked();
    let before_sleep = || {};
    let timed_out = |_, _| {};
    // SAFETY: `addr` is derived from a reference we hold for the call's
    // duration; none of the closures panic or call back into `park`.
    unsafe {
        parking_lot_core::park(addr, validate, before_sleep, timed_out, DEFAULT_PARK_TOKEN, None);
    }
}

#[cold]
#[cfg(not(loom))]
pub(crate) fn wake_all<T>(on: &T) {
    let addr = addr_of(on);
    // SAFETY: `addr` is an address we control.
    unsafe {
        parking_lot_core::unpark_all(addr, DEFAULT_UNPARK_TOKEN);
    }
}

#[cfg(loom)]
loom::lazy_static! {
    static ref WAITING_THREADS: Mutex<Vec<(usize, loom::thread::Thread)>> = Mutex::new(vec![]);
}

#[cold]
#[cfg(loom)]
pub(crate) fn wait<T>(on: &T, still_blocked: impl Fn() -> bool) {
    let addr = addr_of(on);
    {
        let mut waiting = WAITING_THREADS.lock().unwrap();
        if !still_blocked() {
            return;
        }
        waiting.push((addr, loom::thread::current()));
    }
    loom::thread::park();
}

#[cold]
#[cfg(loom)]
pub(crate) fn wake_all<T>(on: &T) {
    let addr = addr_of(on);
    let mut waiting = WAITING_THREADS.lock().unwrap();
    waiting.retain(|(a, thread)| {
        if *a == addr {
            thread.unpark();
            false
        } else {
            true
        }
    });
}
