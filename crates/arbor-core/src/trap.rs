#![forbid(unsafe_code)]

//! Per-node trap registry: the low-level observation primitive.
//!
//! A trap is a callback fired when a specific property on a specific node
//! changes, when any event is emitted on it, or when its origin (parent)
//! changes. The three subscription kinds share one registry, one notify
//! path, and one teardown path, keyed by [`TrapKey`].
//!
//! Per-property lists (rather than whole-object listeners) keep memory
//! proportional to active observations, not to object size: the binding
//! resolver traps exactly one property per node per path segment.
//!
//! # Invariants
//!
//! 1. Traps fire in registration order.
//! 2. Notification iterates a snapshot taken before the first callback,
//!    so a trap that removes a sibling mid-dispatch cannot corrupt the
//!    iteration; the removed sibling still receives that dispatch.
//! 3. A callback `Err` is routed to the error hook and never prevents
//!    delivery to the remaining traps.
//! 4. When a node is unlinked, every trap's `on_unlink` runs exactly
//!    once and the whole list is dropped in one step. Traps owned by a
//!    node unlinked mid-dispatch are skipped for the rest of it.
//! 5. [`remove_trap`](crate::Graph::remove_trap) on an unlinked or stale
//!    node is a no-op: torn-down state is never mutated.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::GraphError;
use crate::event::Event;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::value::Value;

/// What a trap subscribes to.
///
/// The reserved any-event and origin subscriptions ride the same registry
/// as property traps instead of using reserved property names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrapKey {
    /// A declared observable property changed.
    Property(String),
    /// Any event emitted on the node.
    AnyEvent,
    /// The node's parent reference changed (attach/detach).
    Origin,
}

/// Payload delivered to a trap callback.
#[derive(Clone, Debug)]
pub enum Signal {
    /// A declared property took a new value.
    PropertyChanged { property: String, value: Value },
    /// An event was emitted on the node.
    Event(Event),
    /// The node's origin changed; `None` means detached.
    OriginChanged { origin: Option<NodeId> },
}

pub(crate) type TrapFn =
    Rc<RefCell<dyn FnMut(&mut Graph, &Signal) -> Result<(), GraphError>>>;
pub(crate) type UnlinkFn = Rc<RefCell<dyn FnMut(&mut Graph) -> Result<(), GraphError>>>;

pub(crate) struct Trap {
    pub(crate) id: u64,
    /// The node this observation serves; usually the registration node,
    /// but binding chain traps are owned by the binding's target.
    pub(crate) owner: NodeId,
    pub(crate) on_fire: TrapFn,
    pub(crate) on_unlink: Option<UnlinkFn>,
}

/// Handle identifying a registered trap, for removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapHandle {
    pub(crate) node: NodeId,
    pub(crate) key: TrapKey,
    pub(crate) id: u64,
}

impl TrapHandle {
    /// The node the trap is registered on.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The subscription key.
    #[must_use]
    pub fn key(&self) -> &TrapKey {
        &self.key
    }
}

impl Graph {
    /// Register a trap on `node` for `key`.
    ///
    /// `on_unlink` runs exactly once when `node` is unlinked. With
    /// `invoke_immediately`, property traps fire once synchronously with
    /// the current value; a callback error from that first call is routed
    /// to the error hook (best-effort), not returned.
    ///
    /// Fails with [`GraphError::NotObservable`] when a property key names
    /// an undeclared property, and with [`GraphError::AlreadyUnlinked`] /
    /// [`GraphError::StaleNode`] for dead nodes.
    pub fn register_trap(
        &mut self,
        node: NodeId,
        key: TrapKey,
        on_fire: impl FnMut(&mut Graph, &Signal) -> Result<(), GraphError> + 'static,
        on_unlink: Option<Box<dyn FnMut(&mut Graph) -> Result<(), GraphError>>>,
        invoke_immediately: bool,
    ) -> Result<TrapHandle, GraphError> {
        self.register_trap_owned(
            node,
            key,
            node,
            Rc::new(RefCell::new(on_fire)),
            on_unlink.map(|f| Rc::new(RefCell::new(f)) as UnlinkFn),
            invoke_immediately,
        )
    }

    /// Remove a trap. No-op when the node is already unlinked or stale.
    pub fn remove_trap(&mut self, handle: &TrapHandle) {
        let Ok(data) = self.data_mut(handle.node) else {
            return;
        };
        if data.is_unlinked() {
            return;
        }
        if let Some(list) = data.traps.get_mut(&handle.key) {
            list.retain(|t| t.id != handle.id);
            if list.is_empty() {
                data.traps.remove(&handle.key);
            }
        }
    }

    pub(crate) fn register_trap_owned(
        &mut self,
        node: NodeId,
        key: TrapKey,
        owner: NodeId,
        on_fire: TrapFn,
        on_unlink: Option<UnlinkFn>,
        invoke_immediately: bool,
    ) -> Result<TrapHandle, GraphError> {
        let id = self.next_trap_id;
        {
            let data = self.live_data(node)?;
            if let TrapKey::Property(prop) = &key {
                if !data.declared.contains(prop) {
                    return Err(GraphError::NotObservable {
                        node,
                        property: prop.clone(),
                    });
                }
            }
        }
        self.next_trap_id += 1;
        let immediate = if invoke_immediately {
            match &key {
                TrapKey::Property(prop) => Some((
                    prop.clone(),
                    self.get(node, prop).unwrap_or(Value::Null),
                    Rc::clone(&on_fire),
                )),
                _ => None,
            }
        } else {
            None
        };
        let data = self.live_data_mut(node)?;
        data.traps.entry(key.clone()).or_default().push(Trap {
            id,
            owner,
            on_fire,
            on_unlink,
        });
        if let Some((property, value, cb)) = immediate {
            let signal = Signal::PropertyChanged { property, value };
            if let Ok(mut f) = cb.try_borrow_mut() {
                if let Err(e) = (*f)(self, &signal) {
                    self.report_error(e);
                }
            }
        }
        Ok(TrapHandle { node, key, id })
    }

    /// Fire every trap registered for `(node, key)`, in registration
    /// order, against a snapshot of the list.
    pub(crate) fn notify(&mut self, node: NodeId, key: &TrapKey, signal: &Signal) {
        let snapshot: Vec<(NodeId, TrapFn)> = match self.data(node) {
            Ok(data) => match data.traps.get(key) {
                Some(list) => list
                    .iter()
                    .map(|t| (t.owner, Rc::clone(&t.on_fire)))
                    .collect(),
                None => return,
            },
            Err(_) => return,
        };
        for (owner, on_fire) in snapshot {
            // Owner torn down by an earlier callback in this dispatch:
            // its on_unlink already ran, so stay silent.
            if !self.is_live(owner) {
                continue;
            }
            // A callback re-entering its own trap is skipped for the
            // inner delivery rather than aborting the dispatch.
            let Ok(mut f) = on_fire.try_borrow_mut() else {
                continue;
            };
            if let Err(e) = (*f)(self, signal) {
                self.report_error(e);
            }
        }
    }
}
