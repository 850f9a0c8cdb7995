#![forbid(unsafe_code)]

//! Dynamic value model for the reactive graph.
//!
//! [`Value`] is the currency of the engine: it is what you hand to
//! [`Store::wrap`](crate::store::Store::wrap), what live reads return,
//! and what writes accept. Plain containers ([`Value::Record`],
//! [`Value::Sequence`]) become reactive nodes when written into the
//! graph; scalars and [`Opaque`] leaves pass through untouched; an
//! already-wrapped [`Value::Node`] keeps its identity (wrapping is
//! idempotent); a [`Value::Deferred`] installs an asynchronous slot.
//!
//! # Identity
//!
//! The no-op-write check uses *strict identity*, not deep equality:
//! scalars compare by value (floats by bit pattern), strings by content,
//! nodes / opaques / deferreds by handle identity, and plain containers
//! are never identical to anything (a freshly built container is a new
//! object even if it deep-equals the old one). See [`Value::identical`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::node::Node;

/// Discriminant of a [`Value`], used in diagnostics and [`WrapError`].
///
/// [`WrapError`]: crate::error::WrapError
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Absent / null.
    Null,
    /// Boolean scalar.
    Bool,
    /// Signed integer scalar.
    Int,
    /// Floating-point scalar.
    Float,
    /// String scalar.
    Str,
    /// Opaque leaf (not wrapped, not inspected).
    Opaque,
    /// Plain record container (wrappable).
    Record,
    /// Plain ordered-sequence container (wrappable).
    Sequence,
    /// An already-wrapped reactive node.
    Node,
    /// A deferred (asynchronously settling) value.
    Deferred,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Opaque => "opaque",
            Self::Record => "record",
            Self::Sequence => "sequence",
            Self::Node => "node",
            Self::Deferred => "deferred",
        };
        f.write_str(name)
    }
}

/// A key into a reactive node: a field name for records, an index for
/// sequences.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Record field name.
    Field(Rc<str>),
    /// Sequence position.
    Index(usize),
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "Field({name:?})"),
            Self::Index(i) => write!(f, "Index({i})"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Field(Rc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Field(Rc::from(name.as_str()))
    }
}

impl From<Rc<str>> for Key {
    fn from(name: Rc<str>) -> Self {
        Self::Field(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// An opaque leaf: a value the engine stores and hands back without
/// wrapping or inspecting it (instants, binary buffers, user handles).
///
/// Compares by handle identity. Cloning shares the referent.
#[derive(Clone)]
pub struct Opaque {
    value: Rc<dyn Any>,
}

impl Opaque {
    /// Wrap an arbitrary value as an opaque leaf.
    #[must_use]
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            value: Rc::new(value),
        }
    }

    /// Downcast to a concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Whether two leaves are the same referent.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque").finish_non_exhaustive()
    }
}

/// A dynamic value in the reactive graph.
#[derive(Clone, Debug)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// String scalar (cheap to clone).
    Str(Rc<str>),
    /// Opaque leaf; passes through unwrapped.
    Opaque(Opaque),
    /// Plain record container. Wrapped on write into the graph.
    Record(BTreeMap<Rc<str>, Value>),
    /// Plain ordered sequence. Wrapped on write into the graph.
    Sequence(Vec<Value>),
    /// An already-wrapped node; keeps its identity.
    Node(Node),
    /// A deferred value; settles later.
    Deferred(Deferred),
}

impl Value {
    /// The discriminant of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::Opaque(_) => ValueKind::Opaque,
            Self::Record(_) => ValueKind::Record,
            Self::Sequence(_) => ValueKind::Sequence,
            Self::Node(_) => ValueKind::Node,
            Self::Deferred(_) => ValueKind::Deferred,
        }
    }

    /// Build a record from key/value pairs.
    #[must_use]
    pub fn record<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Record(
            entries
                .into_iter()
                .map(|(k, v)| (Rc::from(k.into().as_str()), v.into()))
                .collect(),
        )
    }

    /// Build a sequence from values.
    #[must_use]
    pub fn sequence<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }

    /// The node handle, if this value is a wrapped node.
    #[must_use]
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Strict identity comparison, the no-op-write predicate.
    ///
    /// Scalars compare by value (floats by bit pattern so `NaN` is
    /// identical to itself), strings by content, nodes / opaques /
    /// deferreds by handle identity. Plain containers are never
    /// identical: a fresh container is a new object regardless of its
    /// contents.
    #[must_use]
    pub fn identical(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(x), Self::Bool(y)) => x == y,
            (Self::Int(x), Self::Int(y)) => x == y,
            (Self::Float(x), Self::Float(y)) => x.to_bits() == y.to_bits(),
            (Self::Str(x), Self::Str(y)) => x == y,
            (Self::Opaque(x), Self::Opaque(y)) => x.ptr_eq(y),
            (Self::Node(x), Self::Node(y)) => x.ptr_eq(y),
            (Self::Deferred(x), Self::Deferred(y)) => x.ptr_eq(y),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v.as_str()))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Self::Str(v)
    }
}

impl From<Opaque> for Value {
    fn from(v: Opaque) -> Self {
        Self::Opaque(v)
    }
}

impl From<Node> for Value {
    fn from(v: Node) -> Self {
        Self::Node(v)
    }
}

impl From<Deferred> for Value {
    fn from(v: Deferred) -> Self {
        Self::Deferred(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Sequence(v)
    }
}

impl From<BTreeMap<Rc<str>, Value>> for Value {
    fn from(v: BTreeMap<Rc<str>, Value>) -> Self {
        Self::Record(v)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
