#![forbid(unsafe_code)]

//! Store: the wrapper factory owning the version clock and the batched
//! delivery queue.
//!
//! Every node created under one store shares the store's
//! [`VersionClock`] (so version comparisons between related nodes are
//! meaningful) and its flush queue (the single coalescing point for
//! batched subscribers). There is deliberately no process-global store:
//! tests and embedders construct as many independent stores as they
//! need, and a clock can be shared across stores explicitly with
//! [`Store::with_clock`].
//!
//! # Batched delivery
//!
//! A batched subscriber is enqueued at most once per flush cycle, no
//! matter how many bumps occur, and receives only the latest version at
//! flush time. [`Store::flush`] drains in rounds until the queue is
//! quiescent, so callbacks that mutate state get their follow-up
//! deliveries within the same flush call — each round remains a
//! discrete coalescing turn.
//!
//! # Invariants
//!
//! 1. At most one delivery per (node, callback) pair per flush round.
//! 2. A delivery carries the newest version pending at delivery time.
//! 3. A subscriber cancelled after scheduling but before flush is
//!    skipped (stale entries never fire).
//! 4. Within one round, deliveries run in scheduling order.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::clock::VersionClock;
use crate::config::StoreConfig;
use crate::error::WrapError;
use crate::node::{Node, NodeId};
use crate::subscribe::BatchedEntry;
use crate::value::Value;

/// Store internals shared by every node created under it.
pub(crate) struct Shared {
    clock: VersionClock,
    next_node_id: Cell<u64>,
    queue: RefCell<VecDeque<Weak<BatchedEntry>>>,
}

impl Shared {
    pub(crate) fn clock(&self) -> &VersionClock {
        &self.clock
    }

    pub(crate) fn next_node_id(&self) -> NodeId {
        let raw = self.next_node_id.get();
        self.next_node_id.set(raw + 1);
        NodeId::new(raw)
    }

    pub(crate) fn enqueue(&self, entry: Weak<BatchedEntry>) {
        self.queue.borrow_mut().push_back(entry);
    }
}

/// Factory and scheduler for a reactive state tree.
///
/// Cloning a `Store` creates a new handle to the **same** store.
#[derive(Clone)]
pub struct Store {
    shared: Rc<Shared>,
}

impl Store {
    /// Create a store with a fresh clock and default config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(StoreConfig::default(), VersionClock::new())
    }

    /// Create a store with the given config and a fresh clock.
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_parts(config, VersionClock::new())
    }

    /// Create a store sharing an existing clock (for embedders running
    /// several stores whose versions must be mutually comparable).
    #[must_use]
    pub fn with_clock(clock: VersionClock) -> Self {
        Self::with_parts(StoreConfig::default(), clock)
    }

    fn with_parts(config: StoreConfig, clock: VersionClock) -> Self {
        Self {
            shared: Rc::new(Shared {
                clock,
                next_node_id: Cell::new(0),
                queue: RefCell::new(VecDeque::with_capacity(config.flush_queue_capacity)),
            }),
        }
    }

    /// Wrap a container as a reactive node.
    ///
    /// Idempotent: a `Value::Node` input is returned as-is. Fails with
    /// [`WrapError::UnsupportedType`] for anything that is not a plain
    /// record or sequence, leaving nothing behind.
    pub fn wrap(&self, value: impl Into<Value>) -> Result<Node, WrapError> {
        Node::wrap_in(&self.shared, value.into())
    }

    /// The store's version clock.
    #[must_use]
    pub fn clock(&self) -> &VersionClock {
        &self.shared.clock
    }

    /// Whether any batched deliveries are waiting for a flush.
    #[must_use]
    pub fn has_pending_deliveries(&self) -> bool {
        !self.shared.queue.borrow().is_empty()
    }

    /// Drain the batched delivery queue.
    ///
    /// Runs in rounds until quiescent: deliveries scheduled by callbacks
    /// during one round run in the next. Each entry delivers at most
    /// once per round, with the latest pending version; entries whose
    /// subscription was dropped are skipped.
    pub fn flush(&self) {
        loop {
            let batch: Vec<Weak<BatchedEntry>> = {
                let mut queue = self.shared.queue.borrow_mut();
                if queue.is_empty() {
                    break;
                }
                queue.drain(..).collect()
            };
            let mut delivered = 0usize;
            let mut skipped = 0usize;
            for weak in batch {
                match weak.upgrade() {
                    Some(entry) => {
                        if entry.deliver() {
                            delivered += 1;
                        } else {
                            skipped += 1;
                        }
                    }
                    None => skipped += 1,
                }
            }
            debug!(delivered, skipped, "flush round");
        }
    }

}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("version", &self.shared.clock.current())
            .field("pending_deliveries", &self.shared.queue.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
