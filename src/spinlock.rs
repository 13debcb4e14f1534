//! Locking primitive shared by the registry and the packet pool.
//!
//! Re-exports [`spinning_top::Spinlock`] under a crate-local name so the
//! lock-ordering discipline (a per-connection lock is acquired first; the
//! pool lock is the leaf, taken last and never held across another lock,
//! never the reverse) can be documented at a single call site instead of
//! scattered across `use` statements.

pub use spinning_top::{Spinlock, SpinlockGuard};
