#![forbid(unsafe_code)]

//! Serde hooks for external devtools bridges (feature `serde`).
//!
//! Serialization is lossy by design: it exists so a bridge can ship a
//! readable rendition of the state tree out of process, not to round-trip
//! it. Opaque leaves serialize as the marker string `"<opaque>"`,
//! unsettled deferreds as `"<pending>"`, rejected ones as
//! `"<failed: reason>"`. A `Value::Node` serializes through its current
//! snapshot. Cyclic graphs are not supported here (serialization is a
//! deep traversal).

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::deferred::SettleState;
use crate::snapshot::Snap;
use crate::value::Value;

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Opaque(_) => serializer.serialize_str("<opaque>"),
            Self::Record(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key.as_ref(), value)?;
                }
                out.end()
            }
            Self::Sequence(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            Self::Node(node) => node.snapshot().serialize(serializer),
            Self::Deferred(deferred) => match deferred.state() {
                SettleState::Pending => serializer.serialize_str("<pending>"),
                SettleState::Ready(value) => value.serialize(serializer),
                SettleState::Failed(error) => {
                    serializer.serialize_str(&format!("<failed: {}>", error.reason()))
                }
            },
        }
    }
}

impl Serialize for Snap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Opaque(_) => serializer.serialize_str("<opaque>"),
            Self::Record(rec) => {
                let mut out = serializer.serialize_map(Some(rec.len()))?;
                for (key, value) in rec.iter() {
                    out.serialize_entry(key.as_ref(), value)?;
                }
                out.end()
            }
            Self::Sequence(seq) => {
                let mut out = serializer.serialize_seq(Some(seq.len()))?;
                for item in seq.iter() {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            Self::Pending(_) => serializer.serialize_str("<pending>"),
            Self::Failed(error) => {
                serializer.serialize_str(&format!("<failed: {}>", error.reason()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::deferred::Deferred;
    use crate::store::Store;
    use crate::value::Value;

    #[test]
    fn snapshot_serializes_as_plain_data() {
        let store = Store::new();
        let node = store
            .wrap(Value::record([
                ("name", Value::from("ada")),
                ("tags", Value::sequence([1i64, 2i64])),
            ]))
            .unwrap();
        let json = serde_json::to_string(&node.snapshot()).unwrap();
        assert_eq!(json, r#"{"name":"ada","tags":[1,2]}"#);
    }

    #[test]
    fn deferred_slots_serialize_as_markers() {
        let store = Store::new();
        let node = store.wrap(Value::record([("data", 0i64)])).unwrap();
        node.set("data", Deferred::pending());
        let json = serde_json::to_string(&node.snapshot()).unwrap();
        assert_eq!(json, r#"{"data":"<pending>"}"#);
    }
}
