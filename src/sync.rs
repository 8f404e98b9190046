//! Primitives shared between the dispatch loop and interrupt context
//!
//! The dispatch loop and interrupt handlers touch the same process tags,
//! descriptors and callback slots. Everything here is either an atomic or
//! sits behind a `critical_section::Mutex`, so the same code is sound on a
//! single-core Cortex-M3 and on a host running tests on several threads.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;

/// Completion notification registered by application code
pub trait Notify: Sync {
    fn notify(&self);
}

impl<F> Notify for F
where
    F: Fn() + Sync,
{
    fn notify(&self) {
        self()
    }
}

/// Tick flag raised by the tick interrupt and consumed by the dispatch loop
pub struct TickFlag {
    raised: AtomicBool,
}

impl TickFlag {
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Raise the flag; called from the tick interrupt
    #[inline]
    pub fn signal(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Clear the flag and report whether it was raised
    #[inline]
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

impl Default for TickFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Single registration slot for a callback object
///
/// Registering replaces any previous occupant. The slot hands out a copy of
/// the reference so the callback runs outside the critical section.
pub struct Slot<'a, T: ?Sized + Sync> {
    inner: Mutex<Cell<Option<&'a T>>>,
}

impl<'a, T: ?Sized + Sync> Slot<'a, T> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(None)),
        }
    }

    pub fn set(&self, value: Option<&'a T>) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value));
    }

    pub fn get(&self) -> Option<&'a T> {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }
}

impl<'a, T: ?Sized + Sync> Default for Slot<'a, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot holding the application "operation finished" notification
pub type NotifySlot<'a> = Slot<'a, dyn Notify + 'a>;

impl<'a> NotifySlot<'a> {
    /// Fire the registered notification, if any
    pub fn fire(&self) {
        if let Some(target) = self.get() {
            target.notify();
        }
    }
}
