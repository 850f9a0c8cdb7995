#![forbid(unsafe_code)]

//! Subscription guards and batched-delivery entries.
//!
//! Listener callbacks are stored as weak references in the node's
//! listener table; the strong half lives in the [`Subscription`] guard
//! returned to the caller. Dropping the guard unsubscribes: the weak
//! entry fails to upgrade on the next notification and is pruned lazily.
//! This is the same ownership shape for external subscribers and for
//! the internal parent hooks that cascade versions upward.

use std::any::Any;
use std::cell::Cell;
use std::fmt;

/// RAII guard for a subscriber callback.
///
/// Dropping the guard unsubscribes; a delivery already scheduled for the
/// current flush is skipped via the staleness check. [`cancel`]
/// (consuming the guard) is the explicit spelling of the same thing, and
/// is idempotent by construction — the guard is gone afterwards.
///
/// [`cancel`]: Subscription::cancel
pub struct Subscription {
    /// Type-erased strong references keeping the listener alive. The
    /// concrete payload differs between immediate subscriptions (the
    /// callback `Rc`) and batched ones (callback plus queue entry).
    _guard: Box<dyn Any>,
}

impl Subscription {
    pub(crate) fn new(guard: Box<dyn Any>) -> Self {
        Self { _guard: guard }
    }

    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn cancel(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// One batched subscriber: the user callback plus the coalescing state.
///
/// `note_bump` records the newest version and reports whether the entry
/// needs enqueueing (it is enqueued at most once per flush round);
/// `deliver` resets the scheduling flag and fires with the latest
/// pending version, if any.
pub(crate) struct BatchedEntry {
    callback: Box<dyn Fn(u64)>,
    pending: Cell<Option<u64>>,
    scheduled: Cell<bool>,
}

impl BatchedEntry {
    pub(crate) fn new(callback: Box<dyn Fn(u64)>) -> Self {
        Self {
            callback,
            pending: Cell::new(None),
            scheduled: Cell::new(false),
        }
    }

    /// Record a bump. Returns true when the caller must enqueue this
    /// entry (first bump since the last delivery).
    pub(crate) fn note_bump(&self, version: u64) -> bool {
        self.pending.set(Some(version));
        !self.scheduled.replace(true)
    }

    /// Fire the callback with the latest pending version. Returns false
    /// when there was nothing to deliver.
    pub(crate) fn deliver(&self) -> bool {
        self.scheduled.set(false);
        match self.pending.take() {
            Some(version) => {
                (self.callback)(version);
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
