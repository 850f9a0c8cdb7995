#![forbid(unsafe_code)]

//! Usage-tracking layer for Glasshouse.
//!
//! The engine in `glasshouse-core` notifies per node — any key change
//! bumps the node. This crate computes, per consumer, the minimal
//! subscription set that is still correct: a [`TrackSession`] records
//! exactly which keys one evaluation read through its [`TrackedSnap`]
//! views, [`is_changed`] compares successive snapshots restricted to
//! that recorded usage, and [`Watcher`] reconciles the usage into
//! precise keyed and whole-node subscriptions cycle over cycle.
//!
//! ```ignore
//! use glasshouse_core::{Store, Value};
//! use glasshouse_track::{TrackSession, Watcher};
//!
//! let store = Store::new();
//! let state = store.wrap(Value::record([("a", 0i64), ("b", 0i64)]))?;
//!
//! let mut watcher = Watcher::new(|| println!("re-render"));
//! let session = TrackSession::new();
//!
//! // One evaluation cycle: read through tracked views...
//! let view = session.track(&state.snapshot());
//! let _a = view.get("a");
//! // ...then commit what was read.
//! watcher.commit(&session.take_affected());
//!
//! state.set("b", 1i64);
//! store.flush(); // no re-render: b was never read
//! state.set("a", 1i64);
//! store.flush(); // re-render
//! # Ok::<(), glasshouse_core::WrapError>(())
//! ```

pub mod affected;
pub mod changed;
pub mod tracked;
pub mod watch;

pub use affected::{Affected, AffectedEntry, Usage};
pub use changed::is_changed;
pub use tracked::{TrackSession, TrackedRead, TrackedSnap};
pub use watch::{Watcher, watch_key};
