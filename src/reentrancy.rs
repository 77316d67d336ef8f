//! Reentrancy detection for visitor callbacks: a thread-local intrusive
//! stack of table identities. Every public operation that will
//! invoke a caller-supplied closure pushes its table's identity before
//! calling in, and any operation on that same table checks the stack
//! first — a caller whose visitor closure tries to call back into the
//! table it's visiting deadlocks instead of corrupting state, so this
//! turns that into an immediate, diagnosable abort.
//!
//! Disabled entirely by the `no-reentrancy-check` feature, for embedders
//! who have already fuzzed their callbacks and want the thread-local
//! bookkeeping gone in release builds.

use std::cell::RefCell;

use crate::error::{Error, TableId};

thread_local! {
    static ENTERED_TABLES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard pushing `table` onto this thread's entry stack for the
/// duration of a public operation that runs a visitor callback.
pub(crate) struct EntryGuard {
    #[cfg(not(feature = "no-reentrancy-check"))]
    table: usize,
}

impl EntryGuard {
    /// Panics if `table` is already on this thread's entry stack.
    #[cfg_attr(feature = "no-reentrancy-check", allow(unused_variables))]
    pub(crate) fn enter(table: usize) -> Self {
        #[cfg(not(feature = "no-reentrancy-check"))]
        {
            ENTERED_TABLES.with(|stack| {
                let mut stack = stack.borrow_mut();
                if stack.contains(&table) {
                    panic!("{}", Error::Reentrancy(TableId(table)));
                }
                stack.push(table);
            });
            Self { table }
        }
        #[cfg(feature = "no-reentrancy-check")]
        {
            Self {}
        }
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        #[cfg(not(feature = "no-reentrancy-check"))]
        {
            ENTERED_TABLES.with(|stack| {
                let mut stack = stack.borrow_mut();
                let popped = stack.pop();
                debug_assert_eq!(popped, Some(self.table), "entry stack popped out of order");
            });
        }
    }
}
