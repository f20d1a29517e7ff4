#![forbid(unsafe_code)]

//! Dynamic property values and binding paths.
//!
//! [`Value`] is the runtime's property payload. It deliberately covers two
//! kinds of indirection a binding path can traverse:
//!
//! - [`Value::Node`] points at another graph node, which the binding
//!   resolver can keep observing segment by segment.
//! - [`Value::Record`] is a plain, non-observable data holder; the
//!   resolver reads through it with direct field access and relies on
//!   coarse-grained change events for refresh.
//!
//! [`Path`] is the dotted property path of a binding (`"user.name"`),
//! validated to be non-empty at construction so the resolver never has to
//! re-check.
//!
//! # Invariants
//!
//! 1. A `Path` has at least one segment and no empty segments.
//! 2. `Value` equality is structural; it is the basis for the binding
//!    layer's duplicate-delivery suppression. (Floats use `f64` equality,
//!    so `NaN` never compares equal to itself.)

use core::fmt;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::GraphError;
use crate::id::NodeId;

/// A dynamically typed property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent / unbound. The delivery value of an unresolved binding
    /// without a default.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Reference to another node in the same graph.
    Node(NodeId),
    /// Immutable plain data holder; fields are read by direct access.
    Record(Rc<BTreeMap<String, Value>>),
}

impl Value {
    /// Build a [`Value::Record`] from `(name, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(Rc::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Whether this is [`Value::Null`].
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The node this value references, if any.
    #[inline]
    #[must_use]
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Read a field of a [`Value::Record`]. `None` for other variants or
    /// missing fields.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(map) => map.get(name),
            _ => None,
        }
    }

    /// Follow `segments` through nested records by direct field access.
    ///
    /// Returns `None` as soon as a segment is missing or the current
    /// value is not a record. An empty segment list yields `self`.
    #[must_use]
    pub fn descend(&self, segments: &[String]) -> Option<&Value> {
        let mut cur = self;
        for seg in segments {
            cur = cur.field(seg)?;
        }
        Some(cur)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::Node(v)
    }
}

/// A validated, non-empty dotted property path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Build a path from individual segments.
    ///
    /// Fails with [`GraphError::EmptyPath`] when the list is empty or any
    /// segment is the empty string.
    pub fn new<S, I>(segments: I) -> Result<Self, GraphError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(GraphError::EmptyPath);
        }
        Ok(Self { segments })
    }

    /// The first segment; the one the ancestor search resolves.
    #[inline]
    #[must_use]
    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    /// All segments in order.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (always >= 1).
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Index of the last segment.
    #[inline]
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.segments.len() - 1
    }
}

impl FromStr for Path {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::new(s.split('.'))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}
