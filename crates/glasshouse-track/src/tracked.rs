#![forbid(unsafe_code)]

//! Usage-tracking snapshot views.
//!
//! A [`TrackedSnap`] wraps a [`Snap`] for one consumer evaluation:
//! every key read, existence probe, and enumeration is recorded into the
//! session's [`Affected`] record, keyed by the identity of the *source
//! node* (not the snapshot), before handing back a further tracked view
//! for nested containers. Leaves come back as plain values — there is
//! nothing finer to subscribe to beneath them.
//!
//! Without this layer the only correct subscription strategy is
//! "subscribe to the whole graph"; with it, a consumer that read only
//! `state.user.name` ends up subscribed to exactly that key.
//!
//! Tracked views are memoized per (snapshot container, session):
//! re-reading the same nested snapshot within one evaluation returns the
//! same view and records nothing new.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use glasshouse_core::{Deferred, Key, NodeId, SettleError, Snap, WeakNode};

use crate::affected::Affected;

struct SessionInner {
    affected: RefCell<Affected>,
    memo: RefCell<HashMap<usize, TrackedSnap>>,
}

/// One consumer evaluation cycle: the affected record under
/// construction plus the tracked-view memo.
pub struct TrackSession {
    inner: Rc<SessionInner>,
}

impl TrackSession {
    /// Start a fresh evaluation cycle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SessionInner {
                affected: RefCell::new(Affected::new()),
                memo: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Wrap a snapshot in a tracked view bound to this session.
    #[must_use]
    pub fn track(&self, snap: &Snap) -> TrackedSnap {
        track_in(&self.inner, snap)
    }

    /// Finish the cycle: take the affected record, leaving the session
    /// empty for the next evaluation.
    #[must_use]
    pub fn take_affected(&self) -> Affected {
        self.inner.memo.borrow_mut().clear();
        std::mem::take(&mut *self.inner.affected.borrow_mut())
    }
}

impl Default for TrackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSession")
            .field("touched", &self.inner.affected.borrow().len())
            .finish()
    }
}

/// Result of a tracked read, with deferred slots made explicit.
#[derive(Clone, Debug)]
pub enum TrackedRead {
    /// The field's settled value, still tracked.
    Ready(TrackedSnap),
    /// The field holds an unsettled deferred; retry after settlement.
    Pending(Deferred),
    /// The field's deferred was rejected.
    Failed(SettleError),
    /// No such key.
    Absent,
}

/// A usage-recording view over a snapshot.
#[derive(Clone)]
pub struct TrackedSnap {
    snap: Snap,
    session: Rc<SessionInner>,
}

impl TrackedSnap {
    /// Read one entry, recording the key read on the source node.
    /// Nested containers come back tracked.
    #[must_use]
    pub fn get(&self, key: impl Into<Key>) -> Option<TrackedSnap> {
        let key = key.into();
        self.record_read(key.clone());
        self.snap.get(key).map(|child| track_in(&self.session, child))
    }

    /// Read one entry with deferred slots surfaced explicitly. Records
    /// the key read either way — a consumer that suspended on a pending
    /// field must be re-evaluated when that field settles.
    #[must_use]
    pub fn read(&self, key: impl Into<Key>) -> TrackedRead {
        let key = key.into();
        self.record_read(key.clone());
        match self.snap.get(key) {
            None => TrackedRead::Absent,
            Some(Snap::Pending(deferred)) => TrackedRead::Pending(deferred.clone()),
            Some(Snap::Failed(error)) => TrackedRead::Failed(error.clone()),
            Some(child) => TrackedRead::Ready(track_in(&self.session, child)),
        }
    }

    /// Existence probe, recorded as such: the consumer re-evaluates when
    /// the key appears or disappears, not when its value changes.
    #[must_use]
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.record_probe(key.clone());
        self.snap.get(key).is_some()
    }

    /// All keys. Recorded as whole-container enumeration.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.record_enumerate();
        match &self.snap {
            Snap::Record(rec) => rec.keys().map(|k| Key::Field(Rc::clone(k))).collect(),
            Snap::Sequence(seq) => (0..seq.len()).map(Key::Index).collect(),
            _ => Vec::new(),
        }
    }

    /// Number of entries. Length depends on the whole key set, so this
    /// records enumeration.
    #[must_use]
    pub fn len(&self) -> usize {
        self.record_enumerate();
        match &self.snap {
            Snap::Record(rec) => rec.len(),
            Snap::Sequence(seq) => seq.len(),
            _ => 0,
        }
    }

    /// Whether the container is empty. Records enumeration.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, tracked. Records enumeration on this container;
    /// reads into the returned children record on *their* sources.
    #[must_use]
    pub fn entries(&self) -> Vec<(Key, TrackedSnap)> {
        self.record_enumerate();
        match &self.snap {
            Snap::Record(rec) => rec
                .iter()
                .map(|(k, v)| (Key::Field(Rc::clone(k)), track_in(&self.session, v)))
                .collect(),
            Snap::Sequence(seq) => seq
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), track_in(&self.session, v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The underlying snapshot. Escape hatch: reads through it are
    /// **not** recorded.
    #[must_use]
    pub fn snap(&self) -> &Snap {
        &self.snap
    }

    /// The integer value, if this view is an int scalar.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        self.snap.as_int()
    }

    /// The string value, if this view is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.snap.as_str()
    }

    /// The boolean value, if this view is a bool scalar.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        self.snap.as_bool()
    }

    /// The float value, if this view is a float scalar.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        self.snap.as_float()
    }

    fn source(&self) -> Option<(NodeId, WeakNode)> {
        match &self.snap {
            Snap::Record(rec) => Some((rec.source(), rec.origin_weak())),
            Snap::Sequence(seq) => Some((seq.source(), seq.origin_weak())),
            _ => None,
        }
    }

    fn record_read(&self, key: Key) {
        if let Some((id, origin)) = self.source() {
            self.session
                .affected
                .borrow_mut()
                .usage_mut(id, origin)
                .record_read(key);
        }
    }

    fn record_probe(&self, key: Key) {
        if let Some((id, origin)) = self.source() {
            self.session
                .affected
                .borrow_mut()
                .usage_mut(id, origin)
                .record_probe(key);
        }
    }

    fn record_enumerate(&self) {
        if let Some((id, origin)) = self.source() {
            self.session
                .affected
                .borrow_mut()
                .usage_mut(id, origin)
                .record_enumerate();
        }
    }
}

impl fmt::Debug for TrackedSnap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackedSnap").field(&self.snap).finish()
    }
}

/// Wrap a snapshot for a session, memoizing container views so repeated
/// reads of the same nested snapshot return the same view.
fn track_in(session: &Rc<SessionInner>, snap: &Snap) -> TrackedSnap {
    let memo_key = match snap {
        Snap::Record(rec) => Some(Rc::as_ptr(rec) as usize),
        Snap::Sequence(seq) => Some(Rc::as_ptr(seq) as usize),
        _ => None,
    };
    if let Some(key) = memo_key {
        if let Some(hit) = session.memo.borrow().get(&key) {
            return hit.clone();
        }
        let view = TrackedSnap {
            snap: snap.clone(),
            session: Rc::clone(session),
        };
        session.memo.borrow_mut().insert(key, view.clone());
        view
    } else {
        TrackedSnap {
            snap: snap.clone(),
            session: Rc::clone(session),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use glasshouse_core::{Store, Value};

    fn sample() -> (Store, glasshouse_core::Node) {
        let store = Store::new();
        let node = store
            .wrap(Value::record([
                ("user", Value::record([("name", Value::from("ada")), ("age", Value::Int(36))])),
                ("count", Value::Int(0)),
            ]))
            .unwrap();
        (store, node)
    }

    #[test]
    fn reads_record_on_the_source_node() {
        let (_store, node) = sample();
        let session = TrackSession::new();
        let view = session.track(&node.snapshot());

        let user = view.get("user").unwrap();
        assert_eq!(user.get("name").unwrap().as_str(), Some("ada"));

        let affected = session.take_affected();
        let root_usage = affected.usage(node.id()).unwrap();
        assert!(root_usage.reads().any(|k| *k == Key::from("user")));
        assert!(root_usage.reads().all(|k| *k != Key::from("count")));

        let Some(Value::Node(user_node)) = node.get("user") else {
            panic!("user should be wrapped");
        };
        let user_usage = affected.usage(user_node.id()).unwrap();
        assert!(user_usage.reads().any(|k| *k == Key::from("name")));
        assert!(user_usage.reads().all(|k| *k != Key::from("age")));
    }

    #[test]
    fn probes_and_enumeration_are_distinguished() {
        let (_store, node) = sample();
        let session = TrackSession::new();
        let view = session.track(&node.snapshot());

        assert!(view.contains("count"));
        let _ = view.get("user").unwrap().keys();

        let affected = session.take_affected();
        let root_usage = affected.usage(node.id()).unwrap();
        assert!(root_usage.probes().any(|k| *k == Key::from("count")));
        assert!(!root_usage.enumerated());

        let Some(Value::Node(user_node)) = node.get("user") else {
            panic!("user should be wrapped");
        };
        assert!(affected.usage(user_node.id()).unwrap().enumerated());
    }

    #[test]
    fn repeated_reads_memoize_the_view() {
        let (_store, node) = sample();
        let session = TrackSession::new();
        let view = session.track(&node.snapshot());
        let a = view.get("user").unwrap();
        let b = view.get("user").unwrap();
        assert!(Snap::ptr_eq(a.snap(), b.snap()));
        assert!(Rc::ptr_eq(&a.session, &b.session));
    }

    #[test]
    fn take_affected_resets_the_cycle() {
        let (_store, node) = sample();
        let session = TrackSession::new();
        let view = session.track(&node.snapshot());
        let _ = view.get("count");
        let first = session.take_affected();
        assert!(!first.is_empty());
        let second = session.take_affected();
        assert!(second.is_empty());
    }

    #[test]
    fn leaves_are_untracked() {
        let (_store, node) = sample();
        let session = TrackSession::new();
        let view = session.track(&node.snapshot());
        let count = view.get("count").unwrap();
        // Scalar views have no source; probing them records nothing new.
        let before = session.take_affected();
        assert!(before.usage(node.id()).is_some());
        assert_eq!(count.as_int(), Some(0));
        assert!(session.take_affected().is_empty());
    }

    #[test]
    fn pending_read_is_recorded() {
        let store = Store::new();
        let node = store.wrap(Value::record([("data", 0i64)])).unwrap();
        node.set("data", glasshouse_core::Deferred::pending());
        let session = TrackSession::new();
        let view = session.track(&node.snapshot());
        assert!(matches!(view.read("data"), TrackedRead::Pending(_)));
        let affected = session.take_affected();
        assert!(affected
            .usage(node.id())
            .unwrap()
            .reads()
            .any(|k| *k == Key::from("data")));
    }
}
