#![forbid(unsafe_code)]

//! Error taxonomy and the process-wide error hook.
//!
//! Two delivery channels exist, and which one an error takes is part of
//! the API contract:
//!
//! - **Returned to the caller** (synchronous misuse): [`GraphError::AlreadyUnlinked`],
//!   [`GraphError::CycleDetected`], [`GraphError::StaleNode`],
//!   [`GraphError::EmptyPath`], [`GraphError::DuplicateIntercept`].
//! - **Routed to the error hook** (asynchronous relative to the call that
//!   planted the problem): [`GraphError::NotObservable`] raised during
//!   binding resolution, and every `Err` returned by a trap callback,
//!   binding update callback, or unlink hook. A misbehaving callback must
//!   never interrupt delivery to its siblings or unwind the tree's own
//!   invariants, so these are reported, not thrown.
//!
//! An unresolved binding is *not* an error at all: it delivers its default
//! (or [`Value::Null`](crate::Value::Null)) so consumers can render
//! gracefully before their data context exists.

use core::fmt;

use crate::id::NodeId;

/// Errors produced by graph operations and routed callback failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The node was already unlinked; it accepts no further mutation.
    AlreadyUnlinked { node: NodeId },
    /// Attaching would make a node its own ancestor.
    CycleDetected { node: NodeId },
    /// The property exists (or is filtered) but cannot be trapped.
    NotObservable { node: NodeId, property: String },
    /// The handle refers to a slot that has been released or recycled.
    StaleNode { node: NodeId },
    /// A binding path must contain at least one non-empty segment.
    EmptyPath,
    /// At most one interceptor per event name per node.
    DuplicateIntercept { node: NodeId, name: String },
    /// A callback reported a failure; carried verbatim to the hook.
    Callback(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyUnlinked { node } => write!(f, "node {node} is already unlinked"),
            Self::CycleDetected { node } => {
                write!(f, "attaching {node} would create a cycle")
            }
            Self::NotObservable { node, property } => {
                write!(f, "property '{property}' on {node} is not observable")
            }
            Self::StaleNode { node } => write!(f, "stale handle {node}"),
            Self::EmptyPath => write!(f, "binding path must not be empty"),
            Self::DuplicateIntercept { node, name } => {
                write!(f, "event '{name}' on {node} already has an interceptor")
            }
            Self::Callback(msg) => write!(f, "callback failed: {msg}"),
        }
    }
}

impl std::error::Error for GraphError {}
