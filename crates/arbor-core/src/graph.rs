#![forbid(unsafe_code)]

//! The node arena and per-node side tables.
//!
//! [`Graph`] owns every node: a generational slot array where each slot
//! carries the node's tree state, ordered children, property store, trap
//! lists, interceptors, and the binding instances targeting it. Side
//! tables live *inside* the slot so that unlinking a node drops them in
//! one step — there is no sweep phase and no table can outlive its node.
//!
//! Properties come in two kinds:
//!
//! - **Declared** (via [`define`](Graph::define)): writable through
//!   [`set`](Graph::set), which notifies property traps. Only declared
//!   properties can be trapped or serve as a binding root.
//! - **Plain** (via [`set_plain`](Graph::set_plain)): stored and readable
//!   but never intercepted. A binding that lands on one reports
//!   [`GraphError::NotObservable`] — the property exists, so the miss is
//!   deliberate, not a search failure.
//!
//! # Invariants
//!
//! 1. `Unlinked` is terminal; every mutating operation checks it first,
//!    so re-entrant mutation during teardown fails predictably.
//! 2. Stale handles (released/recycled slots) never resolve.
//! 3. Setting a declared property to an equal value is a no-op: no
//!    notification, matching the duplicate-suppression contract of the
//!    binding layer above.

use core::fmt;

use ahash::{AHashMap, AHashSet};

use crate::binding::BindingInstance;
use crate::error::GraphError;
use crate::event::InterceptFn;
use crate::id::NodeId;
use crate::logging::warn;
use crate::trap::{Signal, Trap, TrapKey, UnlinkFn};
use crate::value::Value;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        /// Container-like node: never a valid binding root.
        const CONTAINER = 1 << 0;
        /// Node restricts which binding labels may resolve on it.
        const FILTERED = 1 << 1;
    }
}

/// Tree state of a node. `Unlinked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Live, no parent.
    Detached,
    /// Live, attached under the given parent.
    Attached(NodeId),
    /// Torn down. Accepts no further mutation.
    Unlinked,
}

pub(crate) struct NodeData {
    pub(crate) state: NodeState,
    pub(crate) children: Vec<NodeId>,
    pub(crate) props: AHashMap<String, Value>,
    pub(crate) declared: AHashSet<String>,
    pub(crate) flags: NodeFlags,
    /// Binding labels accepted as roots; meaningful only with `FILTERED`.
    pub(crate) labels: AHashSet<String>,
    pub(crate) traps: AHashMap<TrapKey, Vec<Trap>>,
    pub(crate) interceptors: AHashMap<String, InterceptFn>,
    /// Binding instances targeting this node.
    pub(crate) bindings: Vec<u64>,
    pub(crate) before_unlink: Option<UnlinkFn>,
}

impl NodeData {
    fn new() -> Self {
        Self {
            state: NodeState::Detached,
            children: Vec::new(),
            props: AHashMap::new(),
            declared: AHashSet::new(),
            flags: NodeFlags::empty(),
            labels: AHashSet::new(),
            traps: AHashMap::new(),
            interceptors: AHashMap::new(),
            bindings: Vec::new(),
            before_unlink: None,
        }
    }

    #[inline]
    pub(crate) fn is_unlinked(&self) -> bool {
        matches!(self.state, NodeState::Unlinked)
    }

    #[inline]
    pub(crate) fn parent(&self) -> Option<NodeId> {
        match self.state {
            NodeState::Attached(p) => Some(p),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

/// The observable-object runtime: node arena, attachment tree, trap
/// tables, binding instances, and event dispatch.
///
/// Single-threaded and synchronous: every operation runs to completion in
/// the calling stack frame. Callbacks may re-enter the graph; the trap
/// snapshot and mark-unlinked-before-cascade rules keep that well-defined.
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub(crate) instances: AHashMap<u64, BindingInstance>,
    pub(crate) next_trap_id: u64,
    pub(crate) next_binding_id: u64,
    error_hook: Option<Box<dyn FnMut(GraphError)>>,
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            instances: AHashMap::new(),
            next_trap_id: 1,
            next_binding_id: 1,
            error_hook: None,
        }
    }

    /// Create a new detached node.
    pub fn create(&mut self) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.data.is_none(), "free list held an occupied slot");
            slot.data = Some(NodeData::new());
            NodeId::new(index, slot.generation)
        } else {
            let index = u32::try_from(self.slots.len()).expect("node arena exhausted");
            self.slots.push(Slot {
                generation: 0,
                data: Some(NodeData::new()),
            });
            NodeId::new(index, 0)
        }
    }

    /// Whether `node` resolves to a slot (live or unlinked tombstone).
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.data(node).is_ok()
    }

    /// Whether `node` has been unlinked. Stale handles report `false`.
    #[must_use]
    pub fn is_unlinked(&self, node: NodeId) -> bool {
        self.data(node).map(NodeData::is_unlinked).unwrap_or(false)
    }

    /// Whether `node` resolves and is not unlinked.
    #[must_use]
    pub(crate) fn is_live(&self, node: NodeId) -> bool {
        self.data(node).map(|d| !d.is_unlinked()).unwrap_or(false)
    }

    /// Tree state of `node`, or `None` for stale handles.
    #[must_use]
    pub fn state(&self, node: NodeId) -> Option<NodeState> {
        self.data(node).ok().map(|d| d.state)
    }

    /// Current parent ("origin") of `node`.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.data(node).ok().and_then(NodeData::parent)
    }

    /// Ordered children of `node`.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.data(node)
            .map(|d| d.children.clone())
            .unwrap_or_default()
    }

    /// Declare `prop` as an observable property with an initial value.
    ///
    /// Declaring an already-declared property behaves like [`set`](Self::set).
    pub fn define(
        &mut self,
        node: NodeId,
        prop: impl Into<String>,
        initial: Value,
    ) -> Result<(), GraphError> {
        let prop = prop.into();
        {
            let data = self.live_data_mut(node)?;
            if !data.declared.insert(prop.clone()) {
                // Already declared: fall through to the notifying path.
            } else {
                data.props.insert(prop, initial);
                return Ok(());
            }
        }
        self.set(node, &prop, initial)
    }

    /// Whether `prop` is declared observable on `node`.
    #[must_use]
    pub fn is_declared(&self, node: NodeId, prop: &str) -> bool {
        self.data(node)
            .map(|d| d.declared.contains(prop))
            .unwrap_or(false)
    }

    /// Set a declared property, notifying its traps when the value
    /// actually changes. Equal-value writes are a no-op.
    ///
    /// Fails with [`GraphError::NotObservable`] for undeclared properties
    /// (use [`set_plain`](Self::set_plain) for those).
    pub fn set(&mut self, node: NodeId, prop: &str, value: Value) -> Result<(), GraphError> {
        let changed = {
            let data = self.live_data_mut(node)?;
            if !data.declared.contains(prop) {
                return Err(GraphError::NotObservable {
                    node,
                    property: prop.to_string(),
                });
            }
            if data.props.get(prop) == Some(&value) {
                false
            } else {
                data.props.insert(prop.to_string(), value.clone());
                true
            }
        };
        if changed {
            let key = TrapKey::Property(prop.to_string());
            let signal = Signal::PropertyChanged {
                property: prop.to_string(),
                value,
            };
            self.notify(node, &key, &signal);
        }
        Ok(())
    }

    /// Store a plain, non-observable property. No traps fire, ever.
    pub fn set_plain(
        &mut self,
        node: NodeId,
        prop: impl Into<String>,
        value: Value,
    ) -> Result<(), GraphError> {
        let prop = prop.into();
        let data = self.live_data_mut(node)?;
        if data.declared.contains(&prop) {
            return Err(GraphError::NotObservable { node, property: prop });
        }
        data.props.insert(prop, value);
        Ok(())
    }

    /// Read a property (declared or plain).
    #[must_use]
    pub fn get(&self, node: NodeId, prop: &str) -> Option<Value> {
        self.data(node).ok().and_then(|d| d.props.get(prop).cloned())
    }

    /// Mark `node` as container-like: the binding resolver skips it as a
    /// root without inspecting its properties.
    pub fn mark_container(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.live_data_mut(node)?.flags.insert(NodeFlags::CONTAINER);
        Ok(())
    }

    /// Whether `node` is container-marked.
    #[must_use]
    pub fn is_container(&self, node: NodeId) -> bool {
        self.data(node)
            .map(|d| d.flags.contains(NodeFlags::CONTAINER))
            .unwrap_or(false)
    }

    /// Restrict which binding labels may resolve on `node`.
    ///
    /// A labelled binding landing on a filtered node whose label is not
    /// in `labels` stops with a routed [`GraphError::NotObservable`].
    pub fn set_binding_filter<S, I>(&mut self, node: NodeId, labels: I) -> Result<(), GraphError>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let data = self.live_data_mut(node)?;
        data.labels = labels.into_iter().map(Into::into).collect();
        data.flags.insert(NodeFlags::FILTERED);
        Ok(())
    }

    /// Register a hook invoked at the very start of [`unlink`](Self::unlink),
    /// before the node is marked dead. Replaces any previous hook.
    pub fn set_before_unlink(
        &mut self,
        node: NodeId,
        hook: impl FnMut(&mut Graph) -> Result<(), GraphError> + 'static,
    ) -> Result<(), GraphError> {
        self.live_data_mut(node)?.before_unlink =
            Some(std::rc::Rc::new(std::cell::RefCell::new(hook)));
        Ok(())
    }

    /// Install the process-wide error hook. Routed errors (observability
    /// violations, callback failures) land here instead of unwinding.
    pub fn set_error_hook(&mut self, hook: impl FnMut(GraphError) + 'static) {
        self.error_hook = Some(Box::new(hook));
    }

    /// Remove the error hook; routed errors fall back to logging.
    pub fn clear_error_hook(&mut self) {
        self.error_hook = None;
    }

    /// Unlink `node` and retire its slot, bumping the generation so every
    /// outstanding handle to it becomes stale.
    pub fn release(&mut self, node: NodeId) -> Result<(), GraphError> {
        self.unlink(node)?;
        let slot = &mut self.slots[node.index() as usize];
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(node.index());
        Ok(())
    }

    /// Number of resolvable nodes (live and unlinked tombstones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.data.is_some()).count()
    }

    /// Whether the graph holds no resolvable nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- internal plumbing -------------------------------------------------

    pub(crate) fn report_error(&mut self, error: GraphError) {
        if let Some(hook) = &mut self.error_hook {
            hook(error);
        } else {
            warn!(error = %error, "unhandled graph error");
        }
    }

    pub(crate) fn data(&self, node: NodeId) -> Result<&NodeData, GraphError> {
        self.slots
            .get(node.index() as usize)
            .filter(|s| s.generation == node.generation())
            .and_then(|s| s.data.as_ref())
            .ok_or(GraphError::StaleNode { node })
    }

    pub(crate) fn data_mut(&mut self, node: NodeId) -> Result<&mut NodeData, GraphError> {
        self.slots
            .get_mut(node.index() as usize)
            .filter(|s| s.generation == node.generation())
            .and_then(|s| s.data.as_mut())
            .ok_or(GraphError::StaleNode { node })
    }

    pub(crate) fn live_data(&self, node: NodeId) -> Result<&NodeData, GraphError> {
        let data = self.data(node)?;
        if data.is_unlinked() {
            return Err(GraphError::AlreadyUnlinked { node });
        }
        Ok(data)
    }

    pub(crate) fn live_data_mut(&mut self, node: NodeId) -> Result<&mut NodeData, GraphError> {
        if self.data(node)?.is_unlinked() {
            return Err(GraphError::AlreadyUnlinked { node });
        }
        self.data_mut(node)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.len())
            .field("bindings", &self.instances.len())
            .finish()
    }
}
