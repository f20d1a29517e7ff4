#![forbid(unsafe_code)]

//! Attach, detach, and unlink: the single-parent attachment tree.
//!
//! Every node is `Detached`, `Attached(parent)`, or terminally
//! `Unlinked`. Attach enforces the two structural invariants — at most
//! one parent, and no node is its own ancestor — and re-walks pending
//! binding instances so the resolver tracks the new tree shape. Unlink
//! cascades to every attached descendant.
//!
//! # Invariants
//!
//! 1. Cycle detection runs before any mutation: a failed attach leaves
//!    the tree exactly as it was.
//! 2. Re-attaching a child to its current parent is an idempotent no-op;
//!    attaching to a different parent detaches from the old one first
//!    (last attach wins).
//! 3. Unlink marks the node dead *before* cascading, so re-entrant
//!    mutation attempted from teardown callbacks fails predictably with
//!    `AlreadyUnlinked`.
//! 4. Unlink is idempotent: the second call is a no-op, and no unlink
//!    hook or trap teardown runs twice.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::GraphError;
use crate::event::Event;
use crate::graph::{Graph, NodeState};
use crate::id::NodeId;
use crate::logging::trace;
use crate::trap::{Signal, TrapKey, UnlinkFn};

type EventFn = Rc<RefCell<dyn FnMut(&mut Graph, &Event) -> Result<(), GraphError>>>;

/// Event forwarding registered alongside an attach.
///
/// `on_event` receives every propagating event emitted on the child while
/// it stays under the attaching parent. The moment the child's origin no
/// longer equals that parent — it was moved or detached — forwarding
/// stops automatically and `on_detach` (if any) runs once.
pub struct Listener {
    on_event: EventFn,
    on_detach: Option<UnlinkFn>,
}

impl Listener {
    /// Forward events to `on_event`.
    pub fn new(
        on_event: impl FnMut(&mut Graph, &Event) -> Result<(), GraphError> + 'static,
    ) -> Self {
        Self {
            on_event: Rc::new(RefCell::new(on_event)),
            on_detach: None,
        }
    }

    /// Builder: run `on_detach` once when forwarding stops.
    #[must_use]
    pub fn with_on_detach(
        mut self,
        on_detach: impl FnMut(&mut Graph) -> Result<(), GraphError> + 'static,
    ) -> Self {
        self.on_detach = Some(Rc::new(RefCell::new(on_detach)));
        self
    }
}

impl Graph {
    /// Attach `child` under `parent`.
    ///
    /// Fails with [`GraphError::AlreadyUnlinked`] when either side is
    /// unlinked and [`GraphError::CycleDetected`] when `parent` is
    /// `child` or one of its descendants. Re-attaching to the current
    /// parent is a no-op; attaching elsewhere moves the child.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        self.attach_impl(parent, child, None)
    }

    /// [`attach`](Self::attach), additionally registering `listener` for
    /// event forwarding scoped to this parent-child edge.
    pub fn attach_with_listener(
        &mut self,
        parent: NodeId,
        child: NodeId,
        listener: Listener,
    ) -> Result<(), GraphError> {
        self.attach_impl(parent, child, Some(listener))
    }

    fn attach_impl(
        &mut self,
        parent: NodeId,
        child: NodeId,
        listener: Option<Listener>,
    ) -> Result<(), GraphError> {
        self.live_data(child)?;
        self.live_data(parent)?;

        // Cycle check before any mutation: walk parent's origin chain.
        if parent == child {
            return Err(GraphError::CycleDetected { node: child });
        }
        let mut cursor = Some(parent);
        while let Some(n) = cursor {
            if n == child {
                return Err(GraphError::CycleDetected { node: child });
            }
            cursor = self.parent(n);
        }

        let current = self.parent(child);
        if current == Some(parent) {
            return Ok(());
        }
        if let Some(old) = current {
            self.detach(old, child)?;
        }

        self.live_data_mut(child)?.state = NodeState::Attached(parent);
        self.live_data_mut(parent)?.children.push(child);
        trace!(%parent, %child, "attach");

        self.notify(
            child,
            &TrapKey::Origin,
            &Signal::OriginChanged {
                origin: Some(parent),
            },
        );

        if let Some(listener) = listener {
            self.register_listener(parent, child, listener)?;
        }

        self.resolve_pending_bindings(child);
        Ok(())
    }

    /// Remove the `parent -> child` edge. No-op unless that edge exists.
    ///
    /// Binding instances in the detached subtree that were satisfied by
    /// an ancestor above the break point release their traps and deliver
    /// unbound.
    pub fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<(), GraphError> {
        if self.parent(child) != Some(parent) {
            return Ok(());
        }
        self.live_data_mut(parent)?
            .children
            .retain(|c| *c != child);
        self.live_data_mut(child)?.state = NodeState::Detached;
        trace!(%parent, %child, "detach");

        self.notify(
            child,
            &TrapKey::Origin,
            &Signal::OriginChanged { origin: None },
        );

        self.sever_bindings(child);
        Ok(())
    }

    /// Tear a node down, cascading to every attached descendant.
    ///
    /// Idempotent. Teardown order: the before-unlink hook runs while the
    /// node is still live; the node is marked `Unlinked`; the parent edge
    /// is removed; every trap's `on_unlink` runs exactly once; binding
    /// instances targeting the node are dropped; children are unlinked
    /// recursively; remaining side tables are discarded.
    pub fn unlink(&mut self, node: NodeId) -> Result<(), GraphError> {
        let data = self.data(node)?;
        if data.is_unlinked() {
            return Ok(());
        }
        trace!(%node, "unlink");

        if let Some(hook) = self.data_mut(node)?.before_unlink.take() {
            if let Ok(mut f) = hook.try_borrow_mut() {
                if let Err(e) = (*f)(self) {
                    self.report_error(e);
                }
            }
        }

        // Mark dead before any cascading so re-entrant mutation attempts
        // observe the terminal state.
        let parent = {
            let data = self.data_mut(node)?;
            let parent = data.parent();
            data.state = NodeState::Unlinked;
            parent
        };
        if let Some(p) = parent {
            if let Ok(pdata) = self.data_mut(p) {
                pdata.children.retain(|c| *c != node);
            }
        }

        // Fire each trap's on_unlink once, then drop the lists wholesale.
        let traps = std::mem::take(&mut self.data_mut(node)?.traps);
        for (_key, list) in traps {
            for trap in list {
                if let Some(on_unlink) = trap.on_unlink {
                    if let Ok(mut f) = on_unlink.try_borrow_mut() {
                        if let Err(e) = (*f)(self) {
                            self.report_error(e);
                        }
                    }
                }
            }
        }

        self.drop_bindings_of(node);

        let children = std::mem::take(&mut self.data_mut(node)?.children);
        for child in children {
            // A teardown callback may already have unlinked (or even
            // released) this child; cascading skips it then.
            if self.is_live(child) {
                self.unlink(child)?;
            }
        }

        let data = self.data_mut(node)?;
        data.props.clear();
        data.props.shrink_to_fit();
        data.declared.clear();
        data.interceptors.clear();
        data.labels.clear();
        data.bindings.clear();
        data.before_unlink = None;
        Ok(())
    }

    /// Nodes of the subtree rooted at `root` (inclusive), pre-order.
    pub(crate) fn collect_subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            if !self.is_live(n) {
                continue;
            }
            out.push(n);
            if let Ok(data) = self.data(n) {
                stack.extend(data.children.iter().rev().copied());
            }
        }
        out
    }

    /// Parent-chain hops from `descendant` up to `ancestor`; `Some(0)`
    /// when they are the same node, `None` when `ancestor` is not on the
    /// chain.
    pub(crate) fn hops_between(&self, descendant: NodeId, ancestor: NodeId) -> Option<u32> {
        let mut hops = 0;
        let mut cursor = Some(descendant);
        while let Some(n) = cursor {
            if n == ancestor {
                return Some(hops);
            }
            hops += 1;
            cursor = self.parent(n);
        }
        None
    }

    fn register_listener(
        &mut self,
        parent: NodeId,
        child: NodeId,
        listener: Listener,
    ) -> Result<(), GraphError> {
        let forward = listener.on_event;
        let event_handle = self.register_trap(
            child,
            TrapKey::AnyEvent,
            move |g, sig| {
                if let Signal::Event(e) = sig {
                    if e.propagates() {
                        if let Ok(mut f) = forward.try_borrow_mut() {
                            return (*f)(g, e);
                        }
                    }
                }
                Ok(())
            },
            None,
            false,
        )?;

        // The origin trap needs its own handle to remove itself; the
        // handle only exists after registration, hence the cell.
        let self_cell: Rc<RefCell<Option<crate::trap::TrapHandle>>> =
            Rc::new(RefCell::new(None));
        let cell = Rc::clone(&self_cell);
        let on_detach = listener.on_detach;
        let origin_handle = self.register_trap(
            child,
            TrapKey::Origin,
            move |g, sig| {
                if let Signal::OriginChanged { origin } = sig {
                    if *origin != Some(parent) {
                        g.remove_trap(&event_handle);
                        if let Some(own) = cell.borrow_mut().take() {
                            g.remove_trap(&own);
                        }
                        if let Some(cb) = &on_detach {
                            if let Ok(mut f) = cb.try_borrow_mut() {
                                if let Err(e) = (*f)(g) {
                                    g.report_error(e);
                                }
                            }
                        }
                    }
                }
                Ok(())
            },
            None,
            false,
        )?;
        *self_cell.borrow_mut() = Some(origin_handle);
        Ok(())
    }
}
