#![forbid(unsafe_code)]

//! Affected records: what one consumer actually read.
//!
//! An [`Affected`] is built fresh per consumer evaluation cycle by the
//! tracked views in [`tracked`](crate::tracked). It maps each touched
//! source node (by [`NodeId`]) to a [`Usage`]: which keys were read,
//! which were probed for existence, and whether the container was
//! enumerated as a whole.
//!
//! # Invariants
//!
//! 1. The recorded usage is a superset of everything the consumer read
//!    during the evaluation — under-recording would make the derived
//!    subscriptions miss relevant mutations; over-recording only costs
//!    efficiency.
//! 2. A record is per-cycle: it is taken at the end of the evaluation
//!    and replaced by a fresh one next cycle.

use std::collections::{BTreeSet, HashMap};

use glasshouse_core::{Key, Node, NodeId, WeakNode};

/// Usage of one source node during one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    reads: BTreeSet<Key>,
    probes: BTreeSet<Key>,
    enumerated: bool,
}

impl Usage {
    /// Keys whose values were read.
    pub fn reads(&self) -> impl Iterator<Item = &Key> {
        self.reads.iter()
    }

    /// Keys probed for existence only.
    pub fn probes(&self) -> impl Iterator<Item = &Key> {
        self.probes.iter()
    }

    /// Whether the container was enumerated (keys listed, items
    /// iterated, or length observed).
    #[must_use]
    pub fn enumerated(&self) -> bool {
        self.enumerated
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.probes.is_empty() && !self.enumerated
    }

    pub(crate) fn record_read(&mut self, key: Key) {
        self.reads.insert(key);
    }

    pub(crate) fn record_probe(&mut self, key: Key) {
        self.probes.insert(key);
    }

    pub(crate) fn record_enumerate(&mut self) {
        self.enumerated = true;
    }
}

/// Usage of one source node, plus a non-owning handle to it for the
/// selective subscriber.
#[derive(Debug, Clone)]
pub struct AffectedEntry {
    origin: WeakNode,
    usage: Usage,
}

impl AffectedEntry {
    /// The live source node, if still alive.
    #[must_use]
    pub fn origin(&self) -> Option<Node> {
        self.origin.upgrade()
    }

    /// The recorded usage.
    #[must_use]
    pub fn usage(&self) -> &Usage {
        &self.usage
    }
}

/// Everything one consumer read during one evaluation, keyed by the
/// identity of the source node (not the snapshot).
#[derive(Debug, Clone, Default)]
pub struct Affected {
    entries: HashMap<NodeId, AffectedEntry>,
}

impl Affected {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Usage for one source node.
    #[must_use]
    pub fn usage(&self, id: NodeId) -> Option<&Usage> {
        self.entries.get(&id).map(AffectedEntry::usage)
    }

    /// All touched source nodes.
    pub fn entries(&self) -> impl Iterator<Item = (NodeId, &AffectedEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Number of touched source nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn usage_mut(&mut self, id: NodeId, origin: WeakNode) -> &mut Usage {
        &mut self
            .entries
            .entry(id)
            .or_insert_with(|| AffectedEntry {
                origin,
                usage: Usage::default(),
            })
            .usage
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
