//! The core never returns a recoverable error from lookups, insertions or
//! erasures (those report through `Option`/`bool`/`usize`, per the data
//! model). The only genuine failure channels are allocation failure, which
//! is surfaced through the allocator itself (`handle_alloc_error`, an
//! abort), and reentrancy, which is a programming error rather than a
//! recoverable condition.

use std::fmt;

/// A table identity, used only to report which table was re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableId(pub(crate) usize);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Programming errors detected by the core's debug-time assertions.
///
/// These are never returned from the public API; they are the payload of
/// the panic/abort raised by the reentrancy guard and by debug-only
/// invariant checks. The type exists so embedders can match on `cause()`
/// from a custom panic hook.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("reentrant access to table {0}: a visitor callback tried to re-enter the table that invoked it")]
    Reentrancy(TableId),
    #[error("requested capacity overflows the table's size policy")]
    CapacityOverflow,
}
