#![forbid(unsafe_code)]

//! Reactive node engine for Glasshouse.
//!
//! Wrap a plain container in a [`Node`] and every mutation through it
//! becomes observable: the node's version advances from a shared
//! monotonic clock, listeners are notified (synchronously or coalesced
//! through the store's flush queue), and [`Node::snapshot`] hands out an
//! immutable point-in-time view with per-version caching and structural
//! sharing. Nested containers are wrapped recursively and idempotently;
//! versions cascade from leaves to roots through non-owning parent
//! hooks.
//!
//! ```ignore
//! use glasshouse_core::{Store, Value};
//!
//! let store = Store::new();
//! let state = store.wrap(Value::record([("count", 0i64)]))?;
//!
//! let _sub = state.subscribe(|version| {
//!     println!("state changed, now at version {version}");
//! });
//!
//! state.set("count", 1i64);
//! state.set("count", 2i64);
//! store.flush(); // one delivery, carrying the latest version
//!
//! let snap = state.snapshot();
//! assert_eq!(snap.get("count").and_then(|s| s.as_int()), Some(2));
//! # Ok::<(), glasshouse_core::WrapError>(())
//! ```
//!
//! The usage-tracking layer that turns snapshots into minimal
//! per-consumer subscriptions lives in the `glasshouse-track` crate;
//! this crate is the engine it drives.

pub mod clock;
pub mod config;
pub mod deferred;
pub mod error;
pub mod node;
pub mod snapshot;
pub mod store;
pub mod subscribe;
pub mod value;

#[cfg(feature = "serde")]
mod serde_support;

pub use clock::VersionClock;
pub use config::StoreConfig;
pub use deferred::{Deferred, SettleState};
pub use error::{SettleError, WrapError};
pub use node::{Node, NodeId, NodeKind, WeakNode};
pub use snapshot::{ReadOutcome, Snap, SnapRecord, SnapSequence};
pub use store::Store;
pub use subscribe::Subscription;
pub use value::{Key, Opaque, Value, ValueKind};
