#![forbid(unsafe_code)]

//! Affected-restricted change detection between successive snapshots.
//!
//! [`is_changed`] answers "given what this consumer actually read last
//! cycle, does the new snapshot differ in any way the consumer could
//! observe?". Containers the consumer never touched are skipped
//! entirely; enumerated containers compare key sets and recurse into
//! every entry; key-level usage recurses into exactly the keys that were
//! read, and existence probes compare presence only.
//!
//! A touched container with no usage record (the consumer held it but
//! read nothing through the tracked view) falls back to "changed" on
//! identity mismatch — over-notifying is safe, missing a change is not.

use std::collections::HashSet;

use glasshouse_core::{Key, Snap, SnapRecord, SnapSequence};

use crate::affected::{Affected, Usage};

/// Whether `next` differs from `prev` anywhere in the affected set.
#[must_use]
pub fn is_changed(prev: &Snap, next: &Snap, affected: &Affected) -> bool {
    let mut seen = HashSet::new();
    changed(prev, next, affected, &mut seen)
}

fn changed(
    prev: &Snap,
    next: &Snap,
    affected: &Affected,
    seen: &mut HashSet<(usize, usize)>,
) -> bool {
    if Snap::ptr_eq(prev, next) {
        return false;
    }
    match (prev, next) {
        (Snap::Record(p), Snap::Record(n)) => {
            // Cyclic snapshots: a pair under comparison counts as
            // unchanged until proven otherwise by some other path.
            if !seen.insert((std::rc::Rc::as_ptr(p) as usize, std::rc::Rc::as_ptr(n) as usize)) {
                return false;
            }
            let Some(usage) = affected.usage(p.source()) else {
                return true;
            };
            record_changed(p, n, usage, affected, seen)
        }
        (Snap::Sequence(p), Snap::Sequence(n)) => {
            if !seen.insert((std::rc::Rc::as_ptr(p) as usize, std::rc::Rc::as_ptr(n) as usize)) {
                return false;
            }
            let Some(usage) = affected.usage(p.source()) else {
                return true;
            };
            sequence_changed(p, n, usage, affected, seen)
        }
        // Shape change, scalar change, or deferred-slot change; ptr_eq
        // above already handled the identical cases.
        _ => true,
    }
}

fn record_changed(
    prev: &SnapRecord,
    next: &SnapRecord,
    usage: &Usage,
    affected: &Affected,
    seen: &mut HashSet<(usize, usize)>,
) -> bool {
    if usage.enumerated() {
        if prev.len() != next.len() || prev.keys().ne(next.keys()) {
            return true;
        }
        return prev
            .iter()
            .any(|(key, value)| match next.get(key) {
                Some(other) => changed(value, other, affected, seen),
                None => true,
            });
    }
    for key in usage.probes() {
        if let Key::Field(name) = key {
            if prev.contains(name) != next.contains(name) {
                return true;
            }
        }
    }
    for key in usage.reads() {
        let Key::Field(name) = key else { continue };
        match (prev.get(name), next.get(name)) {
            (Some(a), Some(b)) => {
                if changed(a, b, affected, seen) {
                    return true;
                }
            }
            (None, None) => {}
            _ => return true,
        }
    }
    false
}

fn sequence_changed(
    prev: &SnapSequence,
    next: &SnapSequence,
    usage: &Usage,
    affected: &Affected,
    seen: &mut HashSet<(usize, usize)>,
) -> bool {
    if usage.enumerated() {
        if prev.len() != next.len() {
            return true;
        }
        return prev
            .iter()
            .zip(next.iter())
            .any(|(a, b)| changed(a, b, affected, seen));
    }
    for key in usage.probes() {
        if let Key::Index(i) = key {
            if prev.get(*i).is_some() != next.get(*i).is_some() {
                return true;
            }
        }
    }
    for key in usage.reads() {
        let Key::Index(i) = key else { continue };
        match (prev.get(*i), next.get(*i)) {
            (Some(a), Some(b)) => {
                if changed(a, b, affected, seen) {
                    return true;
                }
            }
            (None, None) => {}
            _ => return true,
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
