//! Property-based invariant tests for the reactive engine.
//!
//! These verify invariants that must hold for any sequence of writes
//! and removals against a flat record node:
//!
//! 1. Version monotonicity: every effective mutation strictly increases
//!    the version; no mutation ever decreases it.
//! 2. No-op writes: writing a strictly identical value changes nothing
//!    (version, snapshot identity, subscriber deliveries).
//! 3. Snapshot correctness: after any op sequence, the snapshot
//!    deep-equals a plain model map driven by the same ops.
//! 4. Snapshot referential stability: with no mutation in between, two
//!    snapshots are the same reference.
//! 5. Wrap idempotence: wrapping a wrapped node returns the same node.
//! 6. Immediate subscriber delivery count equals the number of
//!    effective mutations.
//! 7. Batched delivery: any non-empty op burst produces exactly one
//!    delivery per flush, carrying the final version.
//! 8. Removal returns whether the key existed, and absent-removal never
//!    bumps.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use glasshouse_core::{Snap, Store, Value};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

const KEYS: [&str; 5] = ["a", "b", "c", "d", "e"];

#[derive(Debug, Clone)]
enum Op {
    Set(&'static str, i64),
    Remove(&'static str),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..KEYS.len(), 0i64..4).prop_map(|(k, v)| Op::Set(KEYS[k], v)),
        (0usize..KEYS.len()).prop_map(|k| Op::Remove(KEYS[k])),
    ]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 0..=max_len)
}

/// Apply an op to the plain model, reporting whether it was effective.
fn apply_model(model: &mut BTreeMap<&'static str, i64>, op: &Op) -> bool {
    match op {
        Op::Set(key, value) => model.insert(*key, *value) != Some(*value),
        Op::Remove(key) => model.remove(key).is_some(),
    }
}

fn apply_node(node: &glasshouse_core::Node, op: &Op) {
    match op {
        Op::Set(key, value) => node.set(*key, *value),
        Op::Remove(key) => {
            node.remove(*key);
        }
    }
}

// ── Invariants ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn version_monotonic_and_model_equivalent(ops in ops_strategy(40)) {
        let store = Store::new();
        let node = store.wrap(Value::record::<&str, Value, _>([])).unwrap();
        let mut model: BTreeMap<&'static str, i64> = BTreeMap::new();
        let mut effective_count = 0usize;

        let deliveries = Rc::new(Cell::new(0usize));
        let deliveries_clone = Rc::clone(&deliveries);
        let _sub = node.subscribe_immediate(move |_| {
            deliveries_clone.set(deliveries_clone.get() + 1);
        });

        for op in &ops {
            let before = node.version();
            let effective = apply_model(&mut model, op);
            apply_node(&node, op);
            let after = node.version();
            if effective {
                effective_count += 1;
                prop_assert!(after > before, "effective op must bump: {op:?}");
            } else {
                prop_assert_eq!(after, before, "ineffective op must not bump: {:?}", op);
            }
        }

        // Invariant 6: one immediate delivery per effective mutation.
        prop_assert_eq!(deliveries.get(), effective_count);

        // Invariant 3: snapshot deep-equals the model.
        let snap = node.snapshot();
        let record = snap.as_record().expect("root is a record");
        prop_assert_eq!(record.len(), model.len());
        for (key, expected) in &model {
            prop_assert_eq!(
                record.get(key).and_then(Snap::as_int),
                Some(*expected),
                "key {} diverged",
                key
            );
        }

        // Invariant 4: stability without mutation.
        prop_assert!(Snap::ptr_eq(&node.snapshot(), &node.snapshot()));

        // Invariant 5: wrap idempotence.
        let rewrapped = store.wrap(Value::Node(node.clone())).unwrap();
        prop_assert!(rewrapped.ptr_eq(&node));
    }

    #[test]
    fn noop_write_changes_nothing(key in 0usize..KEYS.len(), value in 0i64..4) {
        let store = Store::new();
        let node = store.wrap(Value::record([(KEYS[key], value)])).unwrap();
        let before_version = node.version();
        let before_snap = node.snapshot();

        node.set(KEYS[key], value);

        prop_assert_eq!(node.version(), before_version);
        prop_assert!(Snap::ptr_eq(&before_snap, &node.snapshot()));
    }

    #[test]
    fn batched_burst_delivers_once_with_final_version(ops in ops_strategy(20)) {
        let store = Store::new();
        let node = store.wrap(Value::record::<&str, Value, _>([])).unwrap();

        let deliveries = Rc::new(Cell::new(0usize));
        let last_seen = Rc::new(Cell::new(0u64));
        let deliveries_clone = Rc::clone(&deliveries);
        let last_clone = Rc::clone(&last_seen);
        let _sub = node.subscribe(move |version| {
            deliveries_clone.set(deliveries_clone.get() + 1);
            last_clone.set(version);
        });

        let mut model = BTreeMap::new();
        let mut any_effective = false;
        for op in &ops {
            any_effective |= apply_model(&mut model, op);
            apply_node(&node, op);
        }
        store.flush();

        if any_effective {
            prop_assert_eq!(deliveries.get(), 1);
            prop_assert_eq!(last_seen.get(), node.version());
        } else {
            prop_assert_eq!(deliveries.get(), 0);
        }
    }

    #[test]
    fn absent_removal_never_bumps(present in proptest::collection::btree_set(0usize..KEYS.len(), 0..=3)) {
        let store = Store::new();
        let node = store.wrap(Value::record::<&str, Value, _>([])).unwrap();
        for index in &present {
            node.set(KEYS[*index], 1i64);
        }
        for index in 0..KEYS.len() {
            let before = node.version();
            let existed = node.remove(KEYS[index]);
            prop_assert_eq!(existed, present.contains(&index));
            if existed {
                prop_assert!(node.version() > before);
            } else {
                prop_assert_eq!(node.version(), before);
            }
        }
    }
}
