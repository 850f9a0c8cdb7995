#![forbid(unsafe_code)]

//! Deferred values: slots that settle later.
//!
//! A [`Deferred`] is a settle-once cell with three states:
//! `Pending | Ready(value) | Failed(reason)`. Writing a pending deferred
//! into a node installs an asynchronous slot: snapshots surface a retry
//! signal for that field until settlement, and settlement itself issues
//! the version bump that re-triggers interested consumers — there is no
//! polling anywhere.
//!
//! Suspension is cooperative and consumer-driven: a reader that hits
//! [`ReadOutcome::Pending`](crate::snapshot::ReadOutcome::Pending) holds
//! the handle, lets its ordinary subscription wake it after settlement,
//! and re-reads.
//!
//! # Invariants
//!
//! 1. A deferred settles at most once; later settle calls are ignored
//!    (debug builds assert).
//! 2. Settlement notifies each registered waiter exactly once, outside
//!    any internal borrow (waiters may mutate nodes).
//! 3. Cloning shares the same cell.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::SettleError;
use crate::value::Value;

/// Waiter callbacks are held strongly by the slot that registered them
/// and weakly here, so an overwritten slot silently detaches its waiter.
pub(crate) type WaiterRc = Rc<dyn Fn()>;
type WaiterWeak = Weak<dyn Fn()>;

/// Outcome state of a [`Deferred`].
#[derive(Clone, Debug)]
pub enum SettleState {
    /// Not yet settled.
    Pending,
    /// Settled with a value.
    Ready(Value),
    /// Settled with a rejection.
    Failed(SettleError),
}

struct DeferredInner {
    state: SettleState,
    waiters: Vec<WaiterWeak>,
}

/// A settle-once asynchronous value.
///
/// Cloning a `Deferred` creates a new handle to the **same** cell; the
/// handle is the identity used by the strict no-op-write check.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<RefCell<DeferredInner>>,
}

impl Deferred {
    /// Create an unsettled deferred.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                state: SettleState::Pending,
                waiters: Vec::new(),
            })),
        }
    }

    /// Create a deferred that is already resolved.
    #[must_use]
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                state: SettleState::Ready(value.into()),
                waiters: Vec::new(),
            })),
        }
    }

    /// Create a deferred that is already rejected.
    #[must_use]
    pub fn rejected(reason: impl Into<SettleError>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DeferredInner {
                state: SettleState::Failed(reason.into()),
                waiters: Vec::new(),
            })),
        }
    }

    /// Resolve with a value. Ignored if already settled.
    pub fn resolve(&self, value: impl Into<Value>) {
        self.settle(SettleState::Ready(value.into()));
    }

    /// Reject with a reason. Ignored if already settled.
    pub fn reject(&self, reason: impl Into<SettleError>) {
        self.settle(SettleState::Failed(reason.into()));
    }

    /// Current state (cloned).
    #[must_use]
    pub fn state(&self) -> SettleState {
        self.inner.borrow().state.clone()
    }

    /// Whether this deferred has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.borrow().state, SettleState::Pending)
    }

    /// Whether two handles are the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a settlement waiter. The returned strong reference must
    /// be kept alive by the registering slot; the cell only holds a weak
    /// reference, so a dropped slot detaches its waiter automatically.
    pub(crate) fn add_waiter(&self, waiter: WaiterRc) -> WaiterRc {
        self.inner.borrow_mut().waiters.push(Rc::downgrade(&waiter));
        waiter
    }

    fn settle(&self, outcome: SettleState) {
        let waiters: Vec<WaiterRc> = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, SettleState::Pending) {
                return;
            }
            inner.state = outcome;
            inner
                .waiters
                .drain(..)
                .filter_map(|w| w.upgrade())
                .collect()
        };
        // Waiters rewrite node slots and bump versions; run them outside
        // the borrow so they may touch this deferred again.
        for waiter in waiters {
            waiter();
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let state = match inner.state {
            SettleState::Pending => "pending",
            SettleState::Ready(_) => "ready",
            SettleState::Failed(_) => "failed",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn settles_once() {
        let d = Deferred::pending();
        assert!(!d.is_settled());
        d.resolve(42i64);
        assert!(d.is_settled());
        assert!(matches!(d.state(), SettleState::Ready(Value::Int(42))));
    }

    #[test]
    fn waiter_runs_on_settle() {
        let d = Deferred::pending();
        let hits = Rc::new(Cell::new(0u32));
        let hits_clone = Rc::clone(&hits);
        let guard = d.add_waiter(Rc::new(move || hits_clone.set(hits_clone.get() + 1)));
        d.resolve(1i64);
        assert_eq!(hits.get(), 1);
        drop(guard);
    }

    #[test]
    fn dropped_waiter_is_not_called() {
        let d = Deferred::pending();
        let hits = Rc::new(Cell::new(0u32));
        let hits_clone = Rc::clone(&hits);
        let guard = d.add_waiter(Rc::new(move || hits_clone.set(hits_clone.get() + 1)));
        drop(guard);
        d.reject("gone");
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn rejected_carries_reason() {
        let d = Deferred::rejected("boom");
        let SettleState::Failed(err) = d.state() else {
            panic!("expected failure");
        };
        assert_eq!(err.reason(), "boom");
    }

    #[test]
    fn clone_shares_cell() {
        let a = Deferred::pending();
        let b = a.clone();
        a.resolve(7i64);
        assert!(b.is_settled());
        assert!(a.ptr_eq(&b));
    }
}
