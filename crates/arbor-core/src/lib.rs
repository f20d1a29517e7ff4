#![forbid(unsafe_code)]

//! Arbor: an observable-object runtime.
//!
//! # Role
//! `arbor-core` owns a [`Graph`] of nodes arranged in a single-parent
//! attachment tree. Nodes carry declared (observable) and plain
//! properties; observation is built from per-property *traps*, and a
//! *binding* layer on top resolves dotted paths against the nearest
//! ancestor that declares them, re-resolving as the tree changes.
//!
//! # Primary responsibilities
//! - **Graph / NodeId**: generational node arena; stale handles never
//!   resolve, unlinked nodes reject mutation.
//! - **Tree**: attach, detach, and cascading unlink with cycle
//!   detection and origin notifications.
//! - **Traps**: ordered per-key observation lists with snapshot
//!   dispatch and exactly-once teardown.
//! - **Bindings**: upward ancestor search plus per-segment chain
//!   watching, duplicate-suppressed delivery, defaults and labels.
//! - **Events**: named events with per-name interception (pass,
//!   suppress, replace) and coarse change events.
//!
//! # Execution model
//! Single-threaded and synchronous. Callbacks run in the calling stack
//! frame and may re-enter the graph; snapshot dispatch and the
//! mark-dead-before-cascade unlink order keep re-entrancy well-defined.
//! Callback failures are routed to a per-graph error hook instead of
//! unwinding through unrelated subscribers.

pub mod binding;
pub mod error;
pub mod event;
pub mod graph;
pub mod id;
mod logging;
pub mod trap;
pub mod tree;
pub mod value;

pub use binding::{Binding, BindingHandle};
pub use error::GraphError;
pub use event::{Captured, Event, EventFlags};
pub use graph::{Graph, NodeState};
pub use id::NodeId;
pub use trap::{Signal, TrapHandle, TrapKey};
pub use tree::Listener;
pub use value::{Path, Value};
