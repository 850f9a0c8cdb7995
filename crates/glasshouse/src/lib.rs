#![forbid(unsafe_code)]

//! Glasshouse public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users:
//! the reactive engine (`glasshouse-core`) and the usage-tracking
//! layer (`glasshouse-track`) under one roof.

pub use glasshouse_core::{
    Deferred, Key, Node, NodeId, NodeKind, Opaque, ReadOutcome, SettleError, SettleState, Snap,
    SnapRecord, SnapSequence, Store, StoreConfig, Subscription, Value, ValueKind, VersionClock,
    WeakNode, WrapError,
};
pub use glasshouse_track::{
    Affected, AffectedEntry, TrackSession, TrackedRead, TrackedSnap, Usage, Watcher, is_changed,
    watch_key,
};

pub mod prelude {
    //! Convenience re-exports of the two layers as modules.
    pub use glasshouse_core as core;
    pub use glasshouse_track as track;
}
