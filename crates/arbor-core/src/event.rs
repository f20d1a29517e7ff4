#![forbid(unsafe_code)]

//! Named events, emission, and per-name interception.
//!
//! [`emit`](crate::Graph::emit) builds an [`Event`] and walks the node's
//! any-event trap list. Before delivery the event passes through the
//! node's interceptor for that name, if one is registered: the handler can
//! let it through, suppress it, or replace it with a different event.
//!
//! Change events (the [`EventFlags::CHANGE`] flag) are the coarse-grained
//! refresh signal: the binding resolver listens for them on plain data
//! holders that cannot be observed property by property.
//!
//! # Invariants
//!
//! 1. At most one interceptor per event name per node.
//! 2. A replacement event with the *same* name is delivered without
//!    re-interception (no interceptor loops); a different name re-enters
//!    the full emit path, including that name's interceptor.
//! 3. Emitting on an unlinked node is a quiet no-op: its trap lists are
//!    already gone and there is nobody left to notify.
//! 4. Events flagged [`EventFlags::NO_PROPAGATE`] are delivered to the
//!    node's own traps but excluded from attach-listener forwarding.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::trap::{Signal, TrapKey};
use crate::value::Value;

bitflags::bitflags! {
    /// Delivery modifiers carried by an [`Event`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u8 {
        /// Distinguished change event; forces binding re-evaluation
        /// through non-observable intermediate values.
        const CHANGE = 1 << 0;
        /// Excluded from attach-listener forwarding.
        const NO_PROPAGATE = 1 << 1;
    }
}

/// An immutable named event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Event name; interception is keyed by it.
    pub name: String,
    /// The node the event was emitted on.
    pub source: NodeId,
    /// Arbitrary payload. Change events carry the changed node here.
    pub data: Value,
    /// Optional node the event is acting on behalf of.
    pub delegate: Option<NodeId>,
    /// Original event when this one was produced by an interceptor.
    pub inner: Option<Box<Event>>,
    pub flags: EventFlags,
}

impl Event {
    /// Create a plain event with no flags.
    #[must_use]
    pub fn new(name: impl Into<String>, source: NodeId, data: Value) -> Self {
        Self {
            name: name.into(),
            source,
            data,
            delegate: None,
            inner: None,
            flags: EventFlags::empty(),
        }
    }

    /// Builder: set flags.
    #[must_use]
    pub fn with_flags(mut self, flags: EventFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builder: set the delegate node.
    #[must_use]
    pub fn with_delegate(mut self, delegate: NodeId) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Builder: wrap the event this one replaces.
    #[must_use]
    pub fn with_inner(mut self, inner: Event) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Whether this is a distinguished change event.
    #[inline]
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.flags.contains(EventFlags::CHANGE)
    }

    /// Whether attach-listener forwarding may carry this event.
    #[inline]
    #[must_use]
    pub fn propagates(&self) -> bool {
        !self.flags.contains(EventFlags::NO_PROPAGATE)
    }
}

/// Interceptor verdict.
#[derive(Debug)]
pub enum Captured {
    /// Deliver the original event unchanged.
    Pass,
    /// Drop the event entirely.
    Suppress,
    /// Deliver this event instead.
    Replace(Event),
}

pub(crate) type InterceptFn =
    Rc<RefCell<dyn FnMut(&mut Graph, &Event) -> Result<Captured, GraphError>>>;

impl Graph {
    /// Register `handler` as the single interceptor for `name` on `node`.
    ///
    /// Fails with [`GraphError::DuplicateIntercept`] when one is already
    /// registered; remove it first with [`remove_intercept`](Self::remove_intercept).
    pub fn intercept(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        handler: impl FnMut(&mut Graph, &Event) -> Result<Captured, GraphError> + 'static,
    ) -> Result<(), GraphError> {
        let name = name.into();
        let data = self.live_data_mut(node)?;
        if data.interceptors.contains_key(&name) {
            return Err(GraphError::DuplicateIntercept { node, name });
        }
        data.interceptors
            .insert(name, Rc::new(RefCell::new(handler)));
        Ok(())
    }

    /// Remove the interceptor for `name`, if any. No-op on unlinked nodes.
    pub fn remove_intercept(&mut self, node: NodeId, name: &str) {
        if let Ok(data) = self.data_mut(node) {
            data.interceptors.remove(name);
        }
    }

    /// Emit a plain named event on `node`.
    pub fn emit(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        data: Value,
    ) -> Result<(), GraphError> {
        self.emit_event(node, Event::new(name, node, data))
    }

    /// Emit the distinguished change event on `node`, naming `changed` as
    /// the object whose contents were mutated.
    ///
    /// Bindings reading through `changed` via a change trap re-read and
    /// re-deliver even when the computed value is unchanged.
    pub fn emit_change(&mut self, node: NodeId, changed: NodeId) -> Result<(), GraphError> {
        let event = Event::new("change", node, Value::Node(changed))
            .with_flags(EventFlags::CHANGE);
        self.emit_event(node, event)
    }

    /// Emit a fully constructed event on `node`.
    ///
    /// Stale handles error; unlinked nodes are a quiet no-op.
    pub fn emit_event(&mut self, node: NodeId, event: Event) -> Result<(), GraphError> {
        let data = self.data(node)?;
        if data.is_unlinked() {
            return Ok(());
        }
        let handler = data.interceptors.get(&event.name).map(Rc::clone);
        let deliver = match handler {
            None => event,
            Some(h) => {
                let verdict = match h.try_borrow_mut() {
                    Ok(mut f) => (*f)(self, &event),
                    // Interceptor re-entered from its own dispatch: let
                    // the event through untouched.
                    Err(_) => Ok(Captured::Pass),
                };
                match verdict {
                    Ok(Captured::Pass) => event,
                    Ok(Captured::Suppress) => return Ok(()),
                    Ok(Captured::Replace(replacement)) => {
                        let same_name = replacement.name == event.name;
                        let replacement = replacement.with_inner(event);
                        if same_name {
                            // Same name: deliver without re-interception.
                            replacement
                        } else {
                            return self.emit_event(node, replacement);
                        }
                    }
                    Err(e) => {
                        self.report_error(e);
                        event
                    }
                }
            }
        };
        self.notify(node, &TrapKey::AnyEvent, &Signal::Event(deliver));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    fn collect_events(g: &mut Graph, node: NodeId) -> Rc<StdRefCell<Vec<Event>>> {
        let seen: Rc<StdRefCell<Vec<Event>>> = Rc::new(StdRefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        g.register_trap(
            node,
            TrapKey::AnyEvent,
            move |_, sig| {
                if let Signal::Event(e) = sig {
                    sink.borrow_mut().push(e.clone());
                }
                Ok(())
            },
            None,
            false,
        )
        .unwrap();
        seen
    }

    #[test]
    fn emit_reaches_any_event_traps() {
        let mut g = Graph::new();
        let n = g.create();
        let seen = collect_events(&mut g, n);

        g.emit(n, "select", Value::Int(7)).unwrap();

        let events = seen.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "select");
        assert_eq!(events[0].data, Value::Int(7));
        assert_eq!(events[0].source, n);
    }

    #[test]
    fn emit_on_unlinked_node_is_a_quiet_noop() {
        let mut g = Graph::new();
        let n = g.create();
        let seen = collect_events(&mut g, n);
        g.unlink(n).unwrap();

        g.emit(n, "select", Value::Null).unwrap();
        assert!(seen.borrow().is_empty(), "no traps survive unlink");
    }

    #[test]
    fn interceptor_can_suppress() {
        let mut g = Graph::new();
        let n = g.create();
        let seen = collect_events(&mut g, n);

        g.intercept(n, "select", |_, _| Ok(Captured::Suppress)).unwrap();
        g.emit(n, "select", Value::Null).unwrap();
        assert!(seen.borrow().is_empty());

        g.emit(n, "other", Value::Null).unwrap();
        assert_eq!(seen.borrow().len(), 1, "other names are unaffected");
    }

    #[test]
    fn interceptor_can_replace_with_different_name() {
        let mut g = Graph::new();
        let n = g.create();
        let seen = collect_events(&mut g, n);

        g.intercept(n, "select", |_, e| {
            Ok(Captured::Replace(Event::new(
                "picked",
                e.source,
                e.data.clone(),
            )))
        })
        .unwrap();
        g.emit(n, "select", Value::Int(1)).unwrap();

        let events = seen.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "picked");
        assert_eq!(
            events[0].inner.as_deref().map(|e| e.name.as_str()),
            Some("select"),
            "replacement should wrap the original event"
        );
    }

    #[test]
    fn same_name_replacement_does_not_reintercept() {
        let mut g = Graph::new();
        let n = g.create();
        let seen = collect_events(&mut g, n);
        let calls = Rc::new(StdRefCell::new(0u32));
        let count = Rc::clone(&calls);

        g.intercept(n, "select", move |_, e| {
            *count.borrow_mut() += 1;
            Ok(Captured::Replace(
                Event::new("select", e.source, Value::Int(99)),
            ))
        })
        .unwrap();
        g.emit(n, "select", Value::Int(1)).unwrap();

        assert_eq!(*calls.borrow(), 1, "interceptor must run exactly once");
        let events = seen.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, Value::Int(99));
    }

    #[test]
    fn second_interceptor_for_same_name_is_rejected() {
        let mut g = Graph::new();
        let n = g.create();
        g.intercept(n, "select", |_, _| Ok(Captured::Pass)).unwrap();
        let err = g
            .intercept(n, "select", |_, _| Ok(Captured::Pass))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateIntercept { .. }));
    }

    #[test]
    fn change_event_carries_flag_and_node() {
        let mut g = Graph::new();
        let n = g.create();
        let seen = collect_events(&mut g, n);

        g.emit_change(n, n).unwrap();
        let events = seen.borrow();
        assert!(events[0].is_change());
        assert_eq!(events[0].data, Value::Node(n));
    }
}
