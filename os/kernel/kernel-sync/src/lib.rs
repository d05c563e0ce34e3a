//! # Synchronization primitives for the memory manager
//!
//! Two busy-waiting locks sharing one guard type:
//!
//! - [`SpinLock`]: test-and-test-and-set, cheapest when uncontended. Used for
//!   short lookups such as the RPC service table.
//! - [`TicketLock`]: FIFO fair. Used where many clients queue for the same
//!   state (allocator and ownership registry) and starvation would show up as
//!   unbounded allocation latency.
//!
//! Both are plain [`Lock`]s over a raw lock implementing [`RawLock`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod lock;
mod raw;

pub use lock::{Lock, LockGuard};
pub use raw::{RawSpin, RawTicket};

pub type SpinLock<T> = Lock<T, RawSpin>;
pub type TicketLock<T> = Lock<T, RawTicket>;

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

impl<T> TicketLock<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

/// A raw mutual exclusion primitive without associated data.
///
/// # Safety
/// Implementations must guarantee that after `lock` (or a successful
/// `try_lock`) returns, no other caller can acquire the lock until `unlock`
/// is called.
pub unsafe trait RawLock {
    fn lock(&self);
    fn try_lock(&self) -> bool;

    /// Whether the lock is currently held by anyone. Racy; diagnostics only.
    fn is_locked(&self) -> bool;

    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn unlock(&self);
}
