#![forbid(unsafe_code)]

//! Selective subscriber: precise subscriptions from affected records.
//!
//! [`Watcher`] turns the affected record of one evaluation into the
//! minimal subscription set for the next: whole-node subscriptions for
//! enumerated containers, keyed subscriptions (bump → re-read key →
//! identity compare → notify only on real change) for key-level usage.
//! The keyed second-level filter exists because a node's version bump is
//! coarse — *some* key changed — while the consumer cares about one.
//!
//! Across evaluation cycles [`Watcher::commit`] reconciles: both
//! set-differences are computed before any subscribe or unsubscribe is
//! issued, kept subscriptions are never touched, and additions are
//! established before stale ones are torn down — there is no window in
//! which a still-needed subscription is absent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use glasshouse_core::{Key, Node, NodeId, Subscription, Value};

use crate::affected::Affected;

/// What one active subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WatchKey {
    /// Any mutation of the node.
    Whole,
    /// One key, with a value-identity filter.
    Key(Key),
}

/// Subscribe to one key of a node.
///
/// Reads the current value immediately; on each batched delivery the key
/// is re-read and the callback runs only if the value actually changed
/// (strict identity, see [`Value::identical`]). Key appearance and
/// disappearance both count as changes.
pub fn watch_key(node: &Node, key: impl Into<Key>, callback: impl Fn() + 'static) -> Subscription {
    let key = key.into();
    let origin = node.downgrade();
    let last = RefCell::new(node.get(key.clone()));
    node.subscribe(move |_version| {
        let Some(node) = origin.upgrade() else {
            return;
        };
        let current = node.get(key.clone());
        let same = identical_opt(&last.borrow(), &current);
        if !same {
            *last.borrow_mut() = current;
            callback();
        }
    })
}

fn identical_opt(a: &Option<Value>, b: &Option<Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Value::identical(x, y),
        _ => false,
    }
}

/// Reconciles affected records into precise subscriptions, cycle over
/// cycle, firing one callback when any covered usage changed.
pub struct Watcher {
    callback: Rc<dyn Fn()>,
    active: HashMap<(NodeId, WatchKey), Subscription>,
}

impl Watcher {
    /// Create a watcher around the consumer's re-evaluation callback.
    #[must_use]
    pub fn new(callback: impl Fn() + 'static) -> Self {
        Self {
            callback: Rc::new(callback),
            active: HashMap::new(),
        }
    }

    /// Reconcile the active subscriptions against a fresh affected
    /// record: keep what both cycles need, establish what is new, then
    /// tear down what is stale.
    pub fn commit(&mut self, affected: &Affected) {
        let mut desired: HashMap<(NodeId, WatchKey), Node> = HashMap::new();
        for (id, entry) in affected.entries() {
            let Some(node) = entry.origin() else {
                continue;
            };
            let usage = entry.usage();
            if usage.enumerated() {
                // Whole-node coverage subsumes every key-level usage.
                desired.insert((id, WatchKey::Whole), node);
            } else {
                for key in usage.reads().chain(usage.probes()) {
                    desired.insert((id, WatchKey::Key(key.clone())), node.clone());
                }
            }
        }

        // Both differences are computed before any subscription call is
        // issued, so a still-needed subscription never drops out
        // mid-reconciliation.
        let stale: Vec<(NodeId, WatchKey)> = self
            .active
            .keys()
            .filter(|key| !desired.contains_key(key))
            .cloned()
            .collect();
        let fresh: Vec<((NodeId, WatchKey), Node)> = desired
            .into_iter()
            .filter(|(key, _)| !self.active.contains_key(key))
            .collect();
        debug!(
            kept = self.active.len() - stale.len(),
            added = fresh.len(),
            removed = stale.len(),
            "watcher reconcile"
        );

        for (key, node) in fresh {
            let subscription = match &key.1 {
                WatchKey::Whole => {
                    let callback = Rc::clone(&self.callback);
                    node.subscribe(move |_| callback())
                }
                WatchKey::Key(k) => {
                    let callback = Rc::clone(&self.callback);
                    watch_key(&node, k.clone(), move || callback())
                }
            };
            self.active.insert(key, subscription);
        }
        for key in stale {
            self.active.remove(&key);
        }
    }

    /// Tear down every subscription (consumer unmount).
    pub fn clear(&mut self) {
        self.active.clear();
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("active", &self.active.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
