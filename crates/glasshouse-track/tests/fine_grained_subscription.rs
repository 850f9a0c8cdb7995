//! End-to-end fine-grained subscription flows, driven the way a
//! render-cycle binding drives them: snapshot, read through tracked
//! views, commit the affected record, mutate, flush, re-evaluate.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use glasshouse_core::{Snap, Store, Value};
use glasshouse_track::{TrackSession, Watcher, is_changed};

#[test]
fn consumer_reading_a_ignores_b_but_sees_a() {
    let store = Store::new();
    let state = store.wrap(Value::record([("a", 0i64), ("b", 0i64)])).unwrap();

    let renders = Rc::new(Cell::new(0u32));
    let renders_clone = Rc::clone(&renders);
    let mut watcher = Watcher::new(move || renders_clone.set(renders_clone.get() + 1));

    let session = TrackSession::new();
    let view = session.track(&state.snapshot());
    let _ = view.get("a");
    watcher.commit(&session.take_affected());

    state.set("b", 1i64);
    store.flush();
    assert_eq!(renders.get(), 0);

    state.set("a", 1i64);
    store.flush();
    assert_eq!(renders.get(), 1);
}

#[test]
fn nested_read_is_precise_across_levels() {
    let store = Store::new();
    let state = store
        .wrap(Value::record([
            ("user", Value::record([("name", Value::from("ada")), ("age", Value::Int(36))])),
            ("count", Value::Int(0)),
        ]))
        .unwrap();

    let renders = Rc::new(Cell::new(0u32));
    let renders_clone = Rc::clone(&renders);
    let mut watcher = Watcher::new(move || renders_clone.set(renders_clone.get() + 1));

    let session = TrackSession::new();
    let view = session.track(&state.snapshot());
    let _name = view.get("user").unwrap().get("name");
    watcher.commit(&session.take_affected());

    let Some(Value::Node(user)) = state.get("user") else {
        panic!("user should be wrapped");
    };

    state.set("count", 5i64);
    user.set("age", 37i64);
    store.flush();
    assert_eq!(renders.get(), 0);

    user.set("name", "grace");
    store.flush();
    assert_eq!(renders.get(), 1);
}

/// The full render-cycle loop: each delivery triggers a re-evaluation
/// that re-tracks and re-commits, and the subscription set follows what
/// each cycle actually read.
#[test]
fn render_loop_follows_shifting_reads() {
    let store = Store::new();
    let state = store
        .wrap(Value::record([
            ("mode", Value::from("left")),
            ("left", Value::Int(0)),
            ("right", Value::Int(0)),
        ]))
        .unwrap();

    let renders = Rc::new(Cell::new(0u32));

    // One evaluation: read `mode`, then whichever branch it selects.
    let evaluate = {
        let state = state.clone();
        move |session: &TrackSession| {
            let view = session.track(&state.snapshot());
            let mode = view.get("mode").unwrap().as_str().unwrap().to_string();
            let _branch = view.get(mode.as_str());
            session.take_affected()
        }
    };

    let session = TrackSession::new();
    let mut watcher = Watcher::new({
        let renders = Rc::clone(&renders);
        move || renders.set(renders.get() + 1)
    });
    watcher.commit(&evaluate(&session));
    assert_eq!(watcher.active_count(), 2); // mode + left

    // The unread branch is invisible.
    state.set("right", 1i64);
    store.flush();
    assert_eq!(renders.get(), 0);

    // The read branch notifies; the consumer re-evaluates and now
    // depends on the other branch.
    state.set("mode", "right");
    store.flush();
    assert_eq!(renders.get(), 1);
    watcher.commit(&evaluate(&session));

    state.set("left", 2i64);
    store.flush();
    assert_eq!(renders.get(), 1); // left no longer read

    state.set("right", 3i64);
    store.flush();
    assert_eq!(renders.get(), 2);
}

#[test]
fn is_changed_filters_snapshot_pairs_like_the_watcher() {
    let store = Store::new();
    let state = store
        .wrap(Value::record([
            ("user", Value::record([("name", Value::from("ada"))])),
            ("noise", Value::Int(0)),
        ]))
        .unwrap();

    let session = TrackSession::new();
    let before = state.snapshot();
    let _ = session.track(&before).get("user").unwrap().get("name");
    let affected = session.take_affected();

    state.set("noise", 1i64);
    let after_noise = state.snapshot();
    assert!(!is_changed(&before, &after_noise, &affected));

    let Some(Value::Node(user)) = state.get("user") else {
        panic!("user should be wrapped");
    };
    user.set("name", "grace");
    let after_name = state.snapshot();
    assert!(is_changed(&before, &after_name, &affected));
}

/// Reconciliation must not open a window in which a kept subscription
/// misses a mutation: a commit with the same usage keeps the existing
/// subscription object alive throughout.
#[test]
fn no_glitch_window_across_commits() {
    let store = Store::new();
    let state = store.wrap(Value::record([("a", 0i64)])).unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let log_clone = Rc::clone(&log);
    let mut watcher = Watcher::new(move || log_clone.borrow_mut().push("render"));

    let session = TrackSession::new();
    let evaluate = {
        let state = state.clone();
        move |session: &TrackSession| {
            let view = session.track(&state.snapshot());
            let _ = view.get("a");
            session.take_affected()
        }
    };

    watcher.commit(&evaluate(&session));
    // Mutate between two identical commits, before the flush: the kept
    // subscription must already be observing.
    state.set("a", 1i64);
    watcher.commit(&evaluate(&session));
    store.flush();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn enumeration_subscribes_whole_and_sees_new_keys() {
    let store = Store::new();
    let state = store.wrap(Value::record([("x", 0i64)])).unwrap();

    let renders = Rc::new(Cell::new(0u32));
    let renders_clone = Rc::clone(&renders);
    let mut watcher = Watcher::new(move || renders_clone.set(renders_clone.get() + 1));

    let session = TrackSession::new();
    let view = session.track(&state.snapshot());
    let listed: Vec<_> = view.keys();
    assert_eq!(listed.len(), 1);
    watcher.commit(&session.take_affected());

    state.set("y", 1i64);
    store.flush();
    assert_eq!(renders.get(), 1);
}

#[test]
fn snapshot_identity_is_the_cheap_no_change_check() {
    let store = Store::new();
    let state = store.wrap(Value::record([("a", 0i64)])).unwrap();
    let s1 = state.snapshot();
    state.set("a", 0i64); // no-op write
    let s2 = state.snapshot();
    assert!(Snap::ptr_eq(&s1, &s2));

    let session = TrackSession::new();
    let _ = session.track(&s1).get("a");
    // Identical snapshots short-circuit before any usage is consulted.
    assert!(!is_changed(&s1, &s2, &session.take_affected()));
}
