#![forbid(unsafe_code)]

//! Immutable point-in-time snapshots.
//!
//! [`Snap`] mirrors a node's shape with every nested node replaced by
//! its own snapshot. Snapshots are immutable by construction — there is
//! no mutation API and containers are shared `Rc`s — so the deep-freeze
//! a dynamic-language implementation would need is subsumed by the type
//! system.
//!
//! # Caching and structural sharing
//!
//! Each node memoizes its latest snapshot keyed by version. Two
//! `snapshot()` calls with no intervening mutation return the same
//! `Rc` (see [`Snap::ptr_eq`]); downstream consumers rely on this to
//! detect "nothing changed" with a pointer comparison. When a parent
//! rebuilds, children whose versions did not advance contribute their
//! cached snapshots by reference, so untouched subtrees are shared
//! across successive parent snapshots.
//!
//! # Cycles
//!
//! Self-referential graphs snapshot without infinite recursion: the
//! builder registers a placeholder in an identity-keyed in-progress
//! cache before recursing, and a back-edge resolves to that placeholder.
//! The resulting snapshot is itself cyclic; deep equality and `Debug`
//! on such a snapshot do not terminate, same as deep traversal of the
//! cyclic source data in any representation.
//!
//! # Deferred slots
//!
//! An unsettled deferred surfaces as [`Snap::Pending`] — reading that
//! field yields [`ReadOutcome::Pending`], the cooperative retry signal.
//! A rejected deferred surfaces as [`Snap::Failed`]; only readers of
//! that field observe the rejection reason.

use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::deferred::Deferred;
use crate::error::SettleError;
use crate::node::{Node, NodeId, NodeKind, SlotView, WeakNode};
use crate::value::{Key, Opaque, Value};

/// Cached snapshot of a node, valid while the node's version matches.
pub(crate) struct SnapCache {
    pub(crate) version: u64,
    pub(crate) snap: Snap,
}

/// An immutable deep view of a value at one version.
#[derive(Clone)]
pub enum Snap {
    /// Absent / null.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Float scalar.
    Float(f64),
    /// String scalar.
    Str(Rc<str>),
    /// Opaque leaf, shared with the live graph.
    Opaque(Opaque),
    /// Record view.
    Record(Rc<SnapRecord>),
    /// Sequence view.
    Sequence(Rc<SnapSequence>),
    /// Unsettled deferred slot: retry after settlement.
    Pending(Deferred),
    /// Rejected deferred slot: the reason re-surfaces on access.
    Failed(SettleError),
}

/// Result of reading one key from a snapshot, with deferred slots made
/// explicit (`Ready | Pending | Failed` rather than thrown signals).
#[derive(Clone, Debug)]
pub enum ReadOutcome {
    /// The field's settled value.
    Ready(Snap),
    /// The field holds an unsettled deferred; retry after it settles
    /// (settlement bumps the source node, waking subscribers).
    Pending(Deferred),
    /// The field's deferred was rejected.
    Failed(SettleError),
    /// No such key.
    Absent,
}

impl ReadOutcome {
    /// The settled value, if ready.
    #[must_use]
    pub fn ready(self) -> Option<Snap> {
        match self {
            Self::Ready(snap) => Some(snap),
            _ => None,
        }
    }
}

impl Snap {
    /// Structural access to one entry. Pending/failed slots come back as
    /// their marker variants; [`read`](Self::read) unpacks them.
    #[must_use]
    pub fn get(&self, key: impl Into<Key>) -> Option<&Snap> {
        match (self, key.into()) {
            (Self::Record(rec), Key::Field(name)) => rec.get(&name),
            (Self::Sequence(seq), Key::Index(index)) => seq.get(index),
            _ => None,
        }
    }

    /// Read one entry, surfacing deferred slots explicitly.
    #[must_use]
    pub fn read(&self, key: impl Into<Key>) -> ReadOutcome {
        match self.get(key) {
            None => ReadOutcome::Absent,
            Some(Self::Pending(deferred)) => ReadOutcome::Pending(deferred.clone()),
            Some(Self::Failed(error)) => ReadOutcome::Failed(error.clone()),
            Some(snap) => ReadOutcome::Ready(snap.clone()),
        }
    }

    /// Pointer-level identity: container snapshots compare by `Rc`
    /// identity, scalars by value. This is the "did it change at all"
    /// predicate downstream consumers use between versions.
    #[must_use]
    pub fn ptr_eq(a: &Snap, b: &Snap) -> bool {
        match (a, b) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(x), Self::Bool(y)) => x == y,
            (Self::Int(x), Self::Int(y)) => x == y,
            (Self::Float(x), Self::Float(y)) => x.to_bits() == y.to_bits(),
            (Self::Str(x), Self::Str(y)) => Rc::ptr_eq(x, y) || x == y,
            (Self::Opaque(x), Self::Opaque(y)) => x.ptr_eq(y),
            (Self::Record(x), Self::Record(y)) => Rc::ptr_eq(x, y),
            (Self::Sequence(x), Self::Sequence(y)) => Rc::ptr_eq(x, y),
            (Self::Pending(x), Self::Pending(y)) => x.ptr_eq(y),
            (Self::Failed(x), Self::Failed(y)) => x == y,
            _ => false,
        }
    }

    /// The record view, if this is a record snapshot.
    #[must_use]
    pub fn as_record(&self) -> Option<&Rc<SnapRecord>> {
        match self {
            Self::Record(rec) => Some(rec),
            _ => None,
        }
    }

    /// The sequence view, if this is a sequence snapshot.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&Rc<SnapSequence>> {
        match self {
            Self::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    /// The boolean value, if this is a bool scalar.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer value, if this is an int scalar.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float value, if this is a float scalar.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// The string value, if this is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is an unsettled deferred slot.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Whether this is a rejected deferred slot.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl PartialEq for Snap {
    /// Deep value equality (floats by IEEE `==`, so `NaN != NaN`).
    /// Container sources are ignored: two snapshots of different nodes
    /// with equal contents are equal.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(x), Self::Bool(y)) => x == y,
            (Self::Int(x), Self::Int(y)) => x == y,
            (Self::Float(x), Self::Float(y)) => x == y,
            (Self::Str(x), Self::Str(y)) => x == y,
            (Self::Opaque(x), Self::Opaque(y)) => x.ptr_eq(y),
            (Self::Record(x), Self::Record(y)) => x.entries() == y.entries(),
            (Self::Sequence(x), Self::Sequence(y)) => x.items() == y.items(),
            (Self::Pending(x), Self::Pending(y)) => x.ptr_eq(y),
            (Self::Failed(x), Self::Failed(y)) => x == y,
            _ => false,
        }
    }
}

impl fmt::Debug for Snap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "{b:?}"),
            Self::Int(i) => write!(f, "{i:?}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Opaque(o) => o.fmt(f),
            Self::Record(rec) => rec.fmt(f),
            Self::Sequence(seq) => seq.fmt(f),
            Self::Pending(_) => f.write_str("<pending>"),
            Self::Failed(e) => write!(f, "<failed: {}>", e.reason()),
        }
    }
}

/// Immutable record view. Remembers which node it was built from so
/// usage-tracking layers can key affected records by source identity.
pub struct SnapRecord {
    source: NodeId,
    origin: WeakNode,
    entries: OnceCell<BTreeMap<Rc<str>, Snap>>,
}

impl SnapRecord {
    /// Identity of the source node.
    #[must_use]
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// The live source node, if still alive. The reference is weak, so
    /// snapshots never extend the source's lifetime.
    #[must_use]
    pub fn origin(&self) -> Option<Node> {
        self.origin.upgrade()
    }

    /// Non-owning handle to the source node.
    #[must_use]
    pub fn origin_weak(&self) -> WeakNode {
        self.origin.clone()
    }

    /// Entry for a field name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Snap> {
        self.entries.get().and_then(|map| map.get(name))
    }

    /// Whether the field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.get().is_some_and(|map| map.contains_key(name))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.get().map_or(0, BTreeMap::len)
    }

    /// Whether the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names in enumeration order.
    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.get().into_iter().flat_map(BTreeMap::keys)
    }

    /// Fields in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Snap)> {
        self.entries.get().into_iter().flat_map(BTreeMap::iter)
    }

    fn entries(&self) -> Option<&BTreeMap<Rc<str>, Snap>> {
        self.entries.get()
    }
}

impl fmt::Debug for SnapRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries.get() {
            Some(map) => f.debug_map().entries(map.iter()).finish(),
            None => f.write_str("{<building>}"),
        }
    }
}

/// Immutable sequence view.
pub struct SnapSequence {
    source: NodeId,
    origin: WeakNode,
    items: OnceCell<Vec<Snap>>,
}

impl SnapSequence {
    /// Identity of the source node.
    #[must_use]
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// The live source node, if still alive.
    #[must_use]
    pub fn origin(&self) -> Option<Node> {
        self.origin.upgrade()
    }

    /// Non-owning handle to the source node.
    #[must_use]
    pub fn origin_weak(&self) -> WeakNode {
        self.origin.clone()
    }

    /// Item at an index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Snap> {
        self.items.get().and_then(|items| items.get(index))
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.get().map_or(0, Vec::len)
    }

    /// Whether the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items in order.
    pub fn iter(&self) -> impl Iterator<Item = &Snap> {
        self.items.get().into_iter().flatten()
    }

    fn items(&self) -> Option<&Vec<Snap>> {
        self.items.get()
    }
}

impl fmt::Debug for SnapSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.items.get() {
            Some(items) => f.debug_list().entries(items.iter()).finish(),
            None => f.write_str("[<building>]"),
        }
    }
}

/// Build (or fetch) the snapshot of a node at its current version.
pub(crate) fn snapshot_of(node: &Node) -> Snap {
    let mut building: HashMap<NodeId, Snap> = HashMap::new();
    build(node, &mut building)
}

fn build(node: &Node, building: &mut HashMap<NodeId, Snap>) -> Snap {
    let id = node.id();
    // A back-edge of a cyclic graph resolves to the in-progress
    // placeholder rather than recursing forever.
    if let Some(in_progress) = building.get(&id) {
        return in_progress.clone();
    }
    if let Some(cached) = node.cache_get() {
        return cached;
    }

    let parts = node.snapshot_parts();
    trace!(node = id.raw(), version = parts.version, "snapshot rebuild");
    let snap = match parts.kind {
        NodeKind::Record => {
            let rec = Rc::new(SnapRecord {
                source: id,
                origin: node.downgrade(),
                entries: OnceCell::new(),
            });
            let snap = Snap::Record(Rc::clone(&rec));
            building.insert(id, snap.clone());
            let mut map = BTreeMap::new();
            for (key, view) in parts.slots {
                if let Key::Field(name) = key {
                    map.insert(name, view_snap(view, building));
                }
            }
            let _ = rec.entries.set(map);
            snap
        }
        NodeKind::Sequence => {
            let seq = Rc::new(SnapSequence {
                source: id,
                origin: node.downgrade(),
                items: OnceCell::new(),
            });
            let snap = Snap::Sequence(Rc::clone(&seq));
            building.insert(id, snap.clone());
            let mut items = Vec::with_capacity(parts.slots.len());
            for (_key, view) in parts.slots {
                items.push(view_snap(view, building));
            }
            let _ = seq.items.set(items);
            snap
        }
    };
    node.cache_put(SnapCache {
        version: parts.version,
        snap: snap.clone(),
    });
    snap
}

fn view_snap(view: SlotView, building: &mut HashMap<NodeId, Snap>) -> Snap {
    match view {
        SlotView::Leaf(value) => leaf_snap(value),
        SlotView::Child(child) => build(&child, building),
        SlotView::Async(deferred) => match deferred.state() {
            crate::deferred::SettleState::Pending => Snap::Pending(deferred),
            crate::deferred::SettleState::Failed(error) => Snap::Failed(error),
            crate::deferred::SettleState::Ready(_) => {
                debug_assert!(false, "settled deferred slot was not rewritten");
                Snap::Pending(deferred)
            }
        },
    }
}

fn leaf_snap(value: Value) -> Snap {
    match value {
        Value::Null => Snap::Null,
        Value::Bool(b) => Snap::Bool(b),
        Value::Int(i) => Snap::Int(i),
        Value::Float(x) => Snap::Float(x),
        Value::Str(s) => Snap::Str(s),
        Value::Opaque(o) => Snap::Opaque(o),
        other => {
            debug_assert!(false, "leaf slot held a {} value", other.kind());
            Snap::Null
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn snapshot_mirrors_source() {
        let store = Store::new();
        let node = store
            .wrap(Value::record([
                ("name", Value::from("ada")),
                ("age", Value::Int(36)),
                ("tags", Value::sequence(["a", "b"])),
            ]))
            .unwrap();
        let snap = node.snapshot();
        assert_eq!(snap.get("name").and_then(Snap::as_str), Some("ada"));
        assert_eq!(snap.get("age").and_then(Snap::as_int), Some(36));
        let tags = snap.get("tags").and_then(Snap::as_sequence).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get(1).and_then(Snap::as_str), Some("b"));
    }

    #[test]
    fn referential_stability_without_mutation() {
        let store = Store::new();
        let node = store.wrap(Value::record([("count", 0i64)])).unwrap();
        let a = node.snapshot();
        let b = node.snapshot();
        assert!(Snap::ptr_eq(&a, &b));
    }

    #[test]
    fn mutation_yields_a_new_snapshot() {
        let store = Store::new();
        let node = store.wrap(Value::record([("count", 0i64)])).unwrap();
        let before = node.snapshot();
        node.set("count", 1i64);
        let after = node.snapshot();
        assert!(!Snap::ptr_eq(&before, &after));
        assert_eq!(before.get("count").and_then(Snap::as_int), Some(0));
        assert_eq!(after.get("count").and_then(Snap::as_int), Some(1));
    }

    #[test]
    fn untouched_children_share_structure() {
        let store = Store::new();
        let node = store
            .wrap(Value::record([
                ("touched", Value::record([("x", 0i64)])),
                ("untouched", Value::record([("y", 0i64)])),
            ]))
            .unwrap();
        let before = node.snapshot();
        let Some(Value::Node(touched)) = node.get("touched") else {
            panic!("child should be wrapped");
        };
        touched.set("x", 1i64);
        let after = node.snapshot();

        assert!(!Snap::ptr_eq(
            before.get("touched").unwrap(),
            after.get("touched").unwrap()
        ));
        assert!(Snap::ptr_eq(
            before.get("untouched").unwrap(),
            after.get("untouched").unwrap()
        ));
    }

    #[test]
    fn removed_key_disappears_from_snapshots() {
        let store = Store::new();
        let node = store.wrap(Value::record([("a", 1i64), ("b", 2i64)])).unwrap();
        node.remove("a");
        let snap = node.snapshot();
        assert!(snap.get("a").is_none());
        assert_eq!(snap.get("b").and_then(Snap::as_int), Some(2));
    }

    #[test]
    fn cyclic_graph_snapshots_without_recursing_forever() {
        let store = Store::new();
        let node = store.wrap(Value::record([("x", 0i64)])).unwrap();
        node.set("me", node.clone());
        let snap = node.snapshot();
        // The back-edge resolves to the same snapshot container.
        let me = snap.get("me").unwrap();
        assert!(Snap::ptr_eq(&snap, me));
    }

    #[test]
    fn pending_deferred_surfaces_retry_signal() {
        let store = Store::new();
        let node = store.wrap(Value::record([("data", 0i64)])).unwrap();
        let deferred = Deferred::pending();
        node.set("data", deferred.clone());
        let snap = node.snapshot();
        assert!(matches!(snap.read("data"), ReadOutcome::Pending(d) if d.ptr_eq(&deferred)));
    }

    #[test]
    fn rejected_deferred_surfaces_reason_on_that_field_only() {
        let store = Store::new();
        let node = store.wrap(Value::record([("ok", 1i64), ("bad", 0i64)])).unwrap();
        node.set("bad", Deferred::rejected("boom"));
        let snap = node.snapshot();
        assert!(matches!(
            snap.read("bad"),
            ReadOutcome::Failed(e) if e.reason() == "boom"
        ));
        assert_eq!(snap.read("ok").ready().and_then(|s| s.as_int()), Some(1));
    }

    #[test]
    fn deep_equality_ignores_source_identity() {
        let store = Store::new();
        let a = store.wrap(Value::record([("x", 1i64)])).unwrap();
        let b = store.wrap(Value::record([("x", 1i64)])).unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
        b.set("x", 2i64);
        assert_ne!(a.snapshot(), b.snapshot());
    }
}
