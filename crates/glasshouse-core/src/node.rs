#![forbid(unsafe_code)]

//! Reactive node: the interception-backed handle standing in for a plain
//! container.
//!
//! A [`Node`] wraps a record or ordered sequence in shared,
//! reference-counted storage (`Rc<RefCell<..>>`). All mutation flows
//! through the node's own write path ([`set`](Node::set),
//! [`remove`](Node::remove), the sequence operations); the backing store
//! is private, so out-of-band mutation is unrepresentable. Reads pass
//! through to live data; nested containers are wrapped recursively and
//! idempotently; every externally observable mutation draws one fresh
//! version from the store clock and notifies listeners.
//!
//! # Version propagation
//!
//! Each child slot registers a *parent hook* in the child's listener
//! table: a weak, non-owning callback that forwards the child's new
//! version upward. A parent adopts a forwarded version only if it is
//! newer than its own, which both deduplicates diamond-shaped graphs and
//! terminates cyclic ones. Ownership flows parent to child only — the
//! strong half of the hook lives in the parent's slot, so dropping the
//! parent (or overwriting the slot) detaches the hook without any
//! explicit deregistration walk.
//!
//! # Invariants
//!
//! 1. Wrapping is idempotent: writing an already-wrapped node keeps its
//!    identity, and `Store::wrap` of a `Value::Node` returns that node.
//! 2. A no-op write (strict identity, see [`Value::identical`]) bumps
//!    nothing and notifies nobody.
//! 3. Every effective mutation advances the node's version to a fresh
//!    clock value, exactly once.
//! 4. Notification is reentrancy-safe: callbacks are collected under the
//!    borrow and invoked outside it, so a listener may mutate the same
//!    node; it triggers a new discrete bump, not a recursive re-entry of
//!    the current one.
//! 5. Removing an absent key is a no-op (no bump).
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Wrong-shape key | `Field` key on a sequence, `Index` on a record | debug builds assert; release builds no-op |
//! | Foreign node attached | Child node from a store with another clock | debug builds assert; release builds accept (version monotonicity is then the caller's problem) |
//! | Listener leak | `Subscription` guards stored forever | Dead weak entries pruned lazily on notify |

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::deferred::{Deferred, SettleState};
use crate::error::WrapError;
use crate::snapshot::{Snap, SnapCache};
use crate::store::Shared;
use crate::subscribe::{BatchedEntry, Subscription};
use crate::value::{Key, Value};

/// Stable identity of a node, unique within its store.
///
/// This is what usage-tracking layers key their affected records by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Container shape of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// String-keyed record.
    Record,
    /// Ordered sequence.
    Sequence,
}

/// Listener callbacks are stored weakly; the strong half lives in the
/// registering guard (subscription or parent slot).
pub(crate) type ListenerRc = Rc<dyn Fn(u64)>;
type ListenerWeak = Weak<dyn Fn(u64)>;

/// A child slot: the wrapped child plus the strong half of the parent
/// hook registered in the child's listener table.
struct ChildEdge {
    node: Node,
    _hook: ListenerRc,
}

/// An asynchronous slot. The waiter rewrites this node when the deferred
/// settles; it is `None` when the deferred had already failed at write
/// time (nothing left to wait for).
struct AsyncSlot {
    deferred: Deferred,
    _waiter: Option<Rc<dyn Fn()>>,
}

enum Slot {
    /// Scalar or opaque leaf.
    Leaf(Value),
    /// Nested wrapped container.
    Child(ChildEdge),
    /// Deferred value, pending or failed.
    Async(AsyncSlot),
}

impl Slot {
    /// The strict-identity no-op-write predicate, slot side.
    fn identical(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Leaf(leaf), v) => Value::identical(leaf, v),
            (Self::Child(edge), Value::Node(node)) => edge.node.ptr_eq(node),
            (Self::Async(slot), Value::Deferred(d)) => slot.deferred.ptr_eq(d),
            _ => false,
        }
    }

    /// The live value of this slot, as reads return it.
    fn live_value(&self) -> Value {
        match self {
            Self::Leaf(leaf) => leaf.clone(),
            Self::Child(edge) => Value::Node(edge.node.clone()),
            Self::Async(slot) => Value::Deferred(slot.deferred.clone()),
        }
    }

    fn view(&self) -> SlotView {
        match self {
            Self::Leaf(leaf) => SlotView::Leaf(leaf.clone()),
            Self::Child(edge) => SlotView::Child(edge.node.clone()),
            Self::Async(slot) => SlotView::Async(slot.deferred.clone()),
        }
    }

}

/// A borrowed-free view of one slot, handed to the snapshot builder so
/// no `RefCell` borrow is held while recursing into children.
pub(crate) enum SlotView {
    Leaf(Value),
    Child(Node),
    Async(Deferred),
}

/// Everything the snapshot builder needs from one node, captured under a
/// single short borrow.
pub(crate) struct SnapshotParts {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) version: u64,
    pub(crate) slots: Vec<(Key, SlotView)>,
}

enum Backing {
    Record(BTreeMap<Rc<str>, Slot>),
    Sequence(Vec<Slot>),
}

impl Backing {
    fn kind(&self) -> NodeKind {
        match self {
            Self::Record(_) => NodeKind::Record,
            Self::Sequence(_) => NodeKind::Sequence,
        }
    }

    fn key_fits(&self, key: &Key) -> bool {
        matches!(
            (self, key),
            (Self::Record(_), Key::Field(_)) | (Self::Sequence(_), Key::Index(_))
        )
    }

    fn len(&self) -> usize {
        match self {
            Self::Record(map) => map.len(),
            Self::Sequence(items) => items.len(),
        }
    }

    fn slot(&self, key: &Key) -> Option<&Slot> {
        match (self, key) {
            (Self::Record(map), Key::Field(name)) => map.get(name),
            (Self::Sequence(items), Key::Index(i)) => items.get(*i),
            _ => None,
        }
    }

    /// Install a slot, returning the replaced one. Sequence writes past
    /// the end pad the gap with null leaves, so an index write is total.
    fn put(&mut self, key: Key, slot: Slot) -> Option<Slot> {
        match (self, key) {
            (Self::Record(map), Key::Field(name)) => map.insert(name, slot),
            (Self::Sequence(items), Key::Index(i)) => {
                if i < items.len() {
                    Some(std::mem::replace(&mut items[i], slot))
                } else {
                    while items.len() < i {
                        items.push(Slot::Leaf(Value::Null));
                    }
                    items.push(slot);
                    None
                }
            }
            _ => None,
        }
    }

    fn take(&mut self, key: &Key) -> Option<Slot> {
        match (self, key) {
            (Self::Record(map), Key::Field(name)) => map.remove(name),
            (Self::Sequence(items), Key::Index(i)) => {
                if *i < items.len() {
                    Some(items.remove(*i))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn keys(&self) -> Vec<Key> {
        match self {
            Self::Record(map) => map.keys().map(|k| Key::Field(Rc::clone(k))).collect(),
            Self::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    fn views(&self) -> Vec<(Key, SlotView)> {
        match self {
            Self::Record(map) => map
                .iter()
                .map(|(k, s)| (Key::Field(Rc::clone(k)), s.view()))
                .collect(),
            Self::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, s)| (Key::Index(i), s.view()))
                .collect(),
        }
    }
}

struct NodeInner {
    id: NodeId,
    shared: Rc<Shared>,
    version: u64,
    data: Backing,
    listeners: Vec<ListenerWeak>,
    snap_cache: Option<SnapCache>,
}

/// A reactive wrapper around a record or sequence.
///
/// Cloning a `Node` creates a new handle to the **same** instance — both
/// handles see the same data, version, and listeners. Identity (for the
/// idempotent-wrap and no-op-write guarantees) is handle identity, see
/// [`Node::ptr_eq`].
pub struct Node {
    inner: Rc<RefCell<NodeInner>>,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Node {
    // ── Construction ─────────────────────────────────────────────────

    fn empty(shared: &Rc<Shared>, kind: NodeKind) -> Self {
        let data = match kind {
            NodeKind::Record => Backing::Record(BTreeMap::new()),
            NodeKind::Sequence => Backing::Sequence(Vec::new()),
        };
        Self {
            inner: Rc::new(RefCell::new(NodeInner {
                id: shared.next_node_id(),
                shared: Rc::clone(shared),
                version: shared.clock().current(),
                data,
                listeners: Vec::new(),
                snap_cache: None,
            })),
        }
    }

    fn from_record(shared: &Rc<Shared>, map: BTreeMap<Rc<str>, Value>) -> Self {
        let node = Self::empty(shared, NodeKind::Record);
        for (name, value) in map {
            let slot = node.build_slot(value);
            node.inner.borrow_mut().data.put(Key::Field(name), slot);
        }
        node
    }

    fn from_sequence(shared: &Rc<Shared>, items: Vec<Value>) -> Self {
        let node = Self::empty(shared, NodeKind::Sequence);
        for (i, value) in items.into_iter().enumerate() {
            let slot = node.build_slot(value);
            node.inner.borrow_mut().data.put(Key::Index(i), slot);
        }
        node
    }

    /// Wrap a value under the given store internals. Idempotent for
    /// already-wrapped nodes; fails for non-containers.
    pub(crate) fn wrap_in(shared: &Rc<Shared>, value: Value) -> Result<Self, WrapError> {
        match value {
            Value::Node(node) => Ok(node),
            Value::Record(map) => Ok(Self::from_record(shared, map)),
            Value::Sequence(items) => Ok(Self::from_sequence(shared, items)),
            other => Err(WrapError::UnsupportedType { kind: other.kind() }),
        }
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Stable identity of this node within its store.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.borrow().id
    }

    /// Container shape.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.inner.borrow().data.kind()
    }

    /// Current version. Advances on every effective mutation of this
    /// node or any wrapped descendant.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of entries (registered listeners, including dead ones not
    /// yet pruned). Useful for devtools bridges and tests.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    /// Number of keys/items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().data.len()
    }

    /// Whether the node has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All current keys, in enumeration order.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.inner.borrow().data.keys()
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.inner.borrow().data.slot(&key).is_some()
    }

    /// Whether two handles are the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Downgrade to a non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Live read of a key: scalars by value, children as node handles,
    /// unsettled or failed deferreds as their [`Deferred`] handle.
    #[must_use]
    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        self.inner.borrow().data.slot(&key).map(Slot::live_value)
    }

    /// Immutable point-in-time view of this node. Cached per version:
    /// two calls with no intervening mutation return the same value
    /// (`Rc`-identical), and an unchanged child keeps its snapshot
    /// across parent rebuilds (structural sharing).
    #[must_use]
    pub fn snapshot(&self) -> Snap {
        crate::snapshot::snapshot_of(self)
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Write `key = value`.
    ///
    /// No-op when `value` is strictly identical to the current slot
    /// (see [`Value::identical`]). Otherwise the previous child's parent
    /// hook is detached, incoming containers are wrapped (idempotently
    /// for nodes), deferreds install an asynchronous slot, and the
    /// version is bumped exactly once.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        {
            let inner = self.inner.borrow();
            let fits = inner.data.key_fits(&key);
            debug_assert!(fits, "key {key} does not fit a {:?} node", inner.data.kind());
            if !fits {
                return;
            }
            if let Some(slot) = inner.data.slot(&key) {
                if slot.identical(&value) {
                    trace!(node = inner.id.raw(), key = %key, "no-op write");
                    return;
                }
            }
        }
        // Built outside the borrow: wrapping may attach a hook to this
        // very node (self-referential graphs).
        let slot = self.build_slot(value);
        let old = self.inner.borrow_mut().data.put(key.clone(), slot);
        drop(old);
        trace!(node = self.id().raw(), key = %key, "write");
        self.bump();
    }

    /// Remove a key. Returns whether it existed; removing an absent key
    /// is a no-op (no bump). Sequence removal shifts later items left.
    pub fn remove(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        {
            let inner = self.inner.borrow();
            let fits = inner.data.key_fits(&key);
            debug_assert!(fits, "key {key} does not fit a {:?} node", inner.data.kind());
            if !fits {
                return false;
            }
        }
        let old = self.inner.borrow_mut().data.take(&key);
        match old {
            Some(slot) => {
                drop(slot);
                trace!(node = self.id().raw(), key = %key, "remove");
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Append to a sequence node.
    pub fn push(&self, value: impl Into<Value>) {
        let index = {
            let inner = self.inner.borrow();
            let fits = matches!(inner.data, Backing::Sequence(_));
            debug_assert!(fits, "push on a record node");
            if !fits {
                return;
            }
            inner.data.len()
        };
        let slot = self.build_slot(value.into());
        self.inner.borrow_mut().data.put(Key::Index(index), slot);
        trace!(node = self.id().raw(), index, "push");
        self.bump();
    }

    /// Insert into a sequence node, shifting later items right. An index
    /// past the end behaves like an index write (null padding).
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        {
            let inner = self.inner.borrow();
            let fits = matches!(inner.data, Backing::Sequence(_));
            debug_assert!(fits, "insert on a record node");
            if !fits {
                return;
            }
        }
        let slot = self.build_slot(value.into());
        {
            let mut inner = self.inner.borrow_mut();
            if let Backing::Sequence(items) = &mut inner.data {
                if index <= items.len() {
                    items.insert(index, slot);
                } else {
                    while items.len() < index {
                        items.push(Slot::Leaf(Value::Null));
                    }
                    items.push(slot);
                }
            }
        }
        trace!(node = self.id().raw(), index, "insert");
        self.bump();
    }

    /// Remove and return the last item of a sequence node.
    pub fn pop(&self) -> Option<Value> {
        let old = {
            let mut inner = self.inner.borrow_mut();
            let fits = matches!(inner.data, Backing::Sequence(_));
            debug_assert!(fits, "pop on a record node");
            if !fits {
                return None;
            }
            match &mut inner.data {
                Backing::Sequence(items) => items.pop(),
                Backing::Record(_) => None,
            }
        };
        old.map(|slot| {
            let value = slot.live_value();
            drop(slot);
            self.bump();
            value
        })
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe with batched delivery: however many bumps occur before
    /// the store's next [`flush`](crate::store::Store::flush), the
    /// callback runs once, with the latest version.
    ///
    /// Returns an RAII guard; dropping it unsubscribes (a delivery
    /// already queued for the current flush is skipped).
    pub fn subscribe(&self, callback: impl Fn(u64) + 'static) -> Subscription {
        let shared = self.shared_rc();
        let entry = Rc::new(BatchedEntry::new(Box::new(callback)));
        let hook_entry = Rc::clone(&entry);
        let hook: ListenerRc = Rc::new(move |version| {
            if hook_entry.note_bump(version) {
                shared.enqueue(Rc::downgrade(&hook_entry));
            }
        });
        self.push_listener(Rc::downgrade(&hook));
        Subscription::new(Box::new((hook, entry)))
    }

    /// Subscribe with synchronous delivery: the callback runs inside
    /// every bump, N mutations producing N invocations.
    pub fn subscribe_immediate(&self, callback: impl Fn(u64) + 'static) -> Subscription {
        let hook: ListenerRc = Rc::new(callback);
        self.push_listener(Rc::downgrade(&hook));
        Subscription::new(Box::new(hook))
    }

    // ── Internals ────────────────────────────────────────────────────

    pub(crate) fn shared_rc(&self) -> Rc<Shared> {
        Rc::clone(&self.inner.borrow().shared)
    }

    pub(crate) fn push_listener(&self, listener: ListenerWeak) {
        self.inner.borrow_mut().listeners.push(listener);
    }

    pub(crate) fn cache_get(&self) -> Option<Snap> {
        let inner = self.inner.borrow();
        inner
            .snap_cache
            .as_ref()
            .filter(|cache| cache.version == inner.version)
            .map(|cache| cache.snap.clone())
    }

    pub(crate) fn cache_put(&self, cache: SnapCache) {
        self.inner.borrow_mut().snap_cache = Some(cache);
    }

    pub(crate) fn snapshot_parts(&self) -> SnapshotParts {
        let inner = self.inner.borrow();
        SnapshotParts {
            id: inner.id,
            kind: inner.data.kind(),
            version: inner.version,
            slots: inner.data.views(),
        }
    }

    /// Build the slot for an incoming value, wrapping containers and
    /// registering the hooks that keep versions cascading.
    fn build_slot(&self, value: Value) -> Slot {
        match value {
            leaf @ (Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Opaque(_)) => Slot::Leaf(leaf),
            Value::Record(map) => {
                let child = Self::from_record(&self.shared_rc(), map);
                self.adopt_child(child)
            }
            Value::Sequence(items) => {
                let child = Self::from_sequence(&self.shared_rc(), items);
                self.adopt_child(child)
            }
            Value::Node(child) => {
                debug_assert!(
                    child.shared_rc().clock().ptr_eq(self.shared_rc().clock()),
                    "attached node belongs to a store with a different clock"
                );
                self.adopt_child(child)
            }
            Value::Deferred(deferred) => self.adopt_deferred(deferred),
        }
    }

    fn adopt_child(&self, child: Self) -> Slot {
        let parent = Rc::downgrade(&self.inner);
        let hook: ListenerRc = Rc::new(move |version| {
            if let Some(inner) = parent.upgrade() {
                Self::adopt_version(&inner, version);
            }
        });
        child.push_listener(Rc::downgrade(&hook));
        Slot::Child(ChildEdge { node: child, _hook: hook })
    }

    fn adopt_deferred(&self, deferred: Deferred) -> Slot {
        match deferred.state() {
            // Already settled with a value: the outcome is written
            // directly, as if it had been the operand.
            SettleState::Ready(value) => self.build_slot(value),
            SettleState::Failed(_) => Slot::Async(AsyncSlot {
                deferred,
                _waiter: None,
            }),
            SettleState::Pending => {
                let target = Rc::downgrade(&self.inner);
                let handle = deferred.clone();
                let waiter = deferred.add_waiter(Rc::new(move || {
                    if let Some(inner) = target.upgrade() {
                        Self::settle_slots(&inner, &handle);
                    }
                }));
                Slot::Async(AsyncSlot {
                    deferred,
                    _waiter: Some(waiter),
                })
            }
        }
    }

    /// Rewrite every slot of this node holding `deferred` with its
    /// settled outcome, then bump once. Slots are located by scanning so
    /// sequence shifts between write and settlement cannot strand them.
    fn settle_slots(inner_rc: &Rc<RefCell<NodeInner>>, deferred: &Deferred) {
        let node = Self {
            inner: Rc::clone(inner_rc),
        };
        let keys: Vec<Key> = {
            let inner = inner_rc.borrow();
            inner
                .data
                .views()
                .into_iter()
                .filter_map(|(key, view)| match view {
                    SlotView::Async(d) if d.ptr_eq(deferred) => Some(key),
                    _ => None,
                })
                .collect()
        };
        if keys.is_empty() {
            return;
        }
        match deferred.state() {
            SettleState::Pending => {}
            SettleState::Ready(value) => {
                for key in keys {
                    let slot = node.build_slot(value.clone());
                    let old = node.inner.borrow_mut().data.put(key, slot);
                    drop(old);
                }
                trace!(node = node.id().raw(), "deferred resolved");
                node.bump();
            }
            SettleState::Failed(_) => {
                // The slot keeps the deferred; snapshots now observe the
                // failure through it. The settlement is still a change.
                trace!(node = node.id().raw(), "deferred rejected");
                node.bump();
            }
        }
    }

    /// Issue a fresh version and notify listeners. Callbacks run outside
    /// the borrow, so each bump is a discrete event even when a listener
    /// mutates this node again.
    fn bump(&self) {
        let (version, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            let version = inner.shared.clock().advance();
            inner.version = version;
            inner.listeners.retain(|w| w.strong_count() > 0);
            let callbacks: Vec<ListenerRc> =
                inner.listeners.iter().filter_map(Weak::upgrade).collect();
            (version, callbacks)
        };
        trace!(
            node = self.id().raw(),
            version,
            listeners = callbacks.len(),
            "version bump"
        );
        for callback in &callbacks {
            callback(version);
        }
    }

    /// Receive a version forwarded from a child. Adopting only newer
    /// versions deduplicates diamonds and terminates cycles.
    fn adopt_version(inner_rc: &Rc<RefCell<NodeInner>>, version: u64) {
        let callbacks = {
            let mut inner = inner_rc.borrow_mut();
            if version <= inner.version {
                return;
            }
            inner.version = version;
            inner.listeners.retain(|w| w.strong_count() > 0);
            inner
                .listeners
                .iter()
                .filter_map(Weak::upgrade)
                .collect::<Vec<ListenerRc>>()
        };
        for callback in &callbacks {
            callback(version);
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Node")
            .field("id", &inner.id.raw())
            .field("kind", &inner.data.kind())
            .field("version", &inner.version)
            .field("len", &inner.data.len())
            .field("listener_count", &inner.listeners.len())
            .finish()
    }
}

/// Non-owning handle to a [`Node`].
#[derive(Clone)]
pub struct WeakNode {
    inner: Weak<RefCell<NodeInner>>,
}

impl WeakNode {
    /// Upgrade back to a strong handle, if the node is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Node> {
        self.inner.upgrade().map(|inner| Node { inner })
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakNode").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
