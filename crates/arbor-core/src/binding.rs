#![forbid(unsafe_code)]

//! Data bindings: upward ancestor search plus per-segment chain watching.
//!
//! A [`Binding`] is a reusable description — a dotted path, an optional
//! default, an optional label. [`observe`](crate::Graph::observe) applies
//! it to a target node, producing a live instance that:
//!
//! 1. walks the target's ancestor chain upward (target itself is hop 0)
//!    for the first node declaring the path's first segment, skipping
//!    container-marked nodes entirely;
//! 2. installs one property trap per path segment from that ancestor
//!    downward through the values ("chain watching");
//! 3. delivers the resolved value to the update callback, at most once
//!    per distinct value.
//!
//! The chain retracts and re-extends as intermediate values change, and
//! the whole search re-runs when the tree is rearranged underneath it.
//!
//! # Invariants
//!
//! 1. A trap firing at segment *i* first retracts every trap beyond *i*;
//!    the downstream chain is rebuilt from the new value.
//! 2. Losing the segment-0 trap (resolved root unlinked) restarts the
//!    search from the target — a different ancestor may now win.
//! 3. Deliveries are suppressed when value and bound-state both match
//!    the previous delivery; change-event re-reads and bound/unbound
//!    transitions always fire.
//! 4. Unbound delivers the binding's default, else [`Value::Null`].
//! 5. An instance never outlives its target: unlinking the target drops
//!    the instance and every trap it planted on other nodes.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::logging::debug;
use crate::trap::{Signal, TrapHandle, TrapKey};
use crate::value::{Path, Value};

/// Not yet searched.
const NOT_SEARCHED: i32 = -1;
/// Searched and definitively unresolvable until the tree changes.
const UNRESOLVABLE: i32 = -2;

/// Reusable binding description. Stateless until observed on a target.
#[derive(Clone, Debug)]
pub struct Binding {
    path: Path,
    default: Option<Value>,
    label: Option<String>,
}

impl Binding {
    /// Binding for `path` with no default and no label.
    #[must_use]
    pub fn new(path: Path) -> Self {
        Self {
            path,
            default: None,
            label: None,
        }
    }

    /// Parse a dotted path, e.g. `"user.name"`.
    pub fn parse(path: &str) -> Result<Self, GraphError> {
        Ok(Self::new(path.parse()?))
    }

    /// Builder: value delivered while the binding is unresolved.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Builder: label checked against ancestors' binding filters.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The binding's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Handle to a live binding instance, for [`unobserve`](Graph::unobserve).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingHandle {
    pub(crate) id: u64,
    pub(crate) target: NodeId,
}

impl BindingHandle {
    /// The node the binding was observed on.
    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }
}

type UpdateFn = Rc<RefCell<dyn FnMut(&mut Graph, &Value) -> Result<(), GraphError>>>;

pub(crate) struct BindingInstance {
    target: NodeId,
    path: Rc<Path>,
    default: Option<Value>,
    label: Option<String>,
    update: UpdateFn,
    /// Ancestor hops to the resolved root; `NOT_SEARCHED` / `UNRESOLVABLE`
    /// while unresolved.
    level: i32,
    /// One handle per installed chain position, in path order.
    traps: Vec<TrapHandle>,
    /// Last delivered `(value, bound)` pair, for duplicate suppression.
    last: Option<(Value, bool)>,
}

impl Graph {
    /// Observe `binding` on `node`, delivering resolved values to
    /// `update`. Resolution happens immediately: the callback fires
    /// synchronously with the current value (or the unbound default).
    pub fn observe(
        &mut self,
        node: NodeId,
        binding: &Binding,
        update: impl FnMut(&mut Graph, &Value) -> Result<(), GraphError> + 'static,
    ) -> Result<BindingHandle, GraphError> {
        self.live_data(node)?;
        let id = self.next_binding_id;
        self.next_binding_id += 1;
        self.instances.insert(
            id,
            BindingInstance {
                target: node,
                path: Rc::new(binding.path.clone()),
                default: binding.default.clone(),
                label: binding.label.clone(),
                update: Rc::new(RefCell::new(update)),
                level: NOT_SEARCHED,
                traps: Vec::new(),
                last: None,
            },
        );
        self.live_data_mut(node)?.bindings.push(id);
        self.search(id, Some(node), 0);
        Ok(BindingHandle { id, target: node })
    }

    /// Convenience: observe a dotted path with no default or label.
    pub fn observe_path(
        &mut self,
        node: NodeId,
        path: &str,
        update: impl FnMut(&mut Graph, &Value) -> Result<(), GraphError> + 'static,
    ) -> Result<BindingHandle, GraphError> {
        let binding = Binding::parse(path)?;
        self.observe(node, &binding, update)
    }

    /// Tear down a binding instance. No final delivery; idempotent.
    pub fn unobserve(&mut self, handle: &BindingHandle) {
        let Some(inst) = self.instances.remove(&handle.id) else {
            return;
        };
        for trap in &inst.traps {
            self.remove_trap(trap);
        }
        if let Ok(data) = self.data_mut(inst.target) {
            data.bindings.retain(|b| *b != handle.id);
        }
    }

    // ---- tree manager integration ------------------------------------------

    /// After `root` (or an ancestor path above it) was attached: retry
    /// every unresolved instance in the subtree from nesting level 0.
    pub(crate) fn resolve_pending_bindings(&mut self, root: NodeId) {
        for node in self.collect_subtree(root) {
            let ids = match self.data(node) {
                Ok(data) => data.bindings.clone(),
                Err(_) => continue,
            };
            for id in ids {
                let retry = match self.instances.get_mut(&id) {
                    Some(inst) if inst.level < 0 => {
                        inst.level = NOT_SEARCHED;
                        true
                    }
                    _ => false,
                };
                if retry {
                    self.search(id, Some(node), 0);
                }
            }
        }
    }

    /// After `child` was detached: instances in its subtree satisfied by
    /// an ancestor above the break release their traps and go unbound.
    pub(crate) fn sever_bindings(&mut self, child: NodeId) {
        for node in self.collect_subtree(child) {
            let ids = match self.data(node) {
                Ok(data) => data.bindings.clone(),
                Err(_) => continue,
            };
            for id in ids {
                let severed = match (self.instances.get(&id), self.hops_between(node, child)) {
                    (Some(inst), Some(hops)) => inst.level >= 0 && inst.level > hops as i32,
                    _ => false,
                };
                if severed {
                    self.teardown_chain(id);
                    if let Some(inst) = self.instances.get_mut(&id) {
                        inst.level = NOT_SEARCHED;
                    }
                    self.deliver(id, None, false);
                }
            }
        }
    }

    /// Drop every instance targeting `node` (its unlink is in progress);
    /// chain traps planted on other, still-live nodes are removed.
    pub(crate) fn drop_bindings_of(&mut self, node: NodeId) {
        let ids = match self.data_mut(node) {
            Ok(data) => std::mem::take(&mut data.bindings),
            Err(_) => return,
        };
        for id in ids {
            if let Some(inst) = self.instances.remove(&id) {
                for trap in &inst.traps {
                    self.remove_trap(trap);
                }
            }
        }
    }

    // ---- upward search -----------------------------------------------------

    fn search(&mut self, id: u64, start: Option<NodeId>, level: i32) {
        let (first, label) = match self.instances.get(&id) {
            Some(inst) => (inst.path.first().to_string(), inst.label.clone()),
            None => return,
        };
        let mut cursor = start;
        let mut lvl = level;
        loop {
            let Some(node) = cursor else {
                self.mark_unresolvable(id);
                return;
            };
            if !self.is_live(node) {
                self.mark_unresolvable(id);
                return;
            }
            // Containers are never binding roots, even when they happen
            // to carry the property; skip without inspecting.
            if self.is_container(node) {
                cursor = self.parent(node);
                lvl += 1;
                continue;
            }
            // A filtered node is only a valid root for bindings carrying
            // one of its accepted labels; unlabelled bindings pass.
            let rejected = label
                .as_deref()
                .is_some_and(|l| self.filter_rejects(node, l));
            if !rejected && self.is_declared(node, &first) {
                if let Some(inst) = self.instances.get_mut(&id) {
                    inst.level = lvl;
                }
                debug!(binding = id, root = %node, level = lvl, "binding resolved");
                self.start_chain(id, node);
                return;
            }
            // A rejected label, or a property that exists but is plain,
            // is deliberate non-observability: report and give up rather
            // than silently resolving higher up.
            if rejected || self.get(node, &first).is_some() {
                self.report_error(GraphError::NotObservable {
                    node,
                    property: first,
                });
                self.mark_unresolvable(id);
                return;
            }
            cursor = self.parent(node);
            lvl += 1;
        }
    }

    fn filter_rejects(&self, node: NodeId, label: &str) -> bool {
        self.data(node)
            .map(|d| {
                d.flags.contains(crate::graph::NodeFlags::FILTERED)
                    && !d.labels.contains(label)
            })
            .unwrap_or(false)
    }

    fn mark_unresolvable(&mut self, id: u64) {
        let already = match self.instances.get_mut(&id) {
            Some(inst) => {
                let already = inst.level == UNRESOLVABLE;
                inst.level = UNRESOLVABLE;
                already
            }
            None => return,
        };
        if !already {
            self.deliver(id, None, false);
        }
    }

    // ---- chain watching ----------------------------------------------------

    fn start_chain(&mut self, id: u64, root: NodeId) {
        let path = match self.instances.get(&id) {
            Some(inst) => Rc::clone(&inst.path),
            None => return,
        };
        self.install_segment(id, 0, root);
        let value = self.get(root, path.first()).unwrap_or(Value::Null);
        self.advance(id, 0, value);
    }

    /// Install the property trap for segment `seg` on `host`.
    fn install_segment(&mut self, id: u64, seg: usize, host: NodeId) {
        let (path, target) = match self.instances.get(&id) {
            Some(inst) => (Rc::clone(&inst.path), inst.target),
            None => return,
        };
        let prop = path.segments()[seg].clone();
        let on_fire = Rc::new(RefCell::new(
            move |g: &mut Graph, sig: &Signal| -> Result<(), GraphError> {
                if let Signal::PropertyChanged { value, .. } = sig {
                    g.chain_fire(id, seg, value.clone());
                }
                Ok(())
            },
        ));
        let on_unlink = Rc::new(RefCell::new(
            move |g: &mut Graph| -> Result<(), GraphError> {
                g.chain_unlinked(id, seg);
                Ok(())
            },
        ));
        match self.register_trap_owned(
            host,
            TrapKey::Property(prop),
            target,
            on_fire,
            Some(on_unlink),
            false,
        ) {
            Ok(handle) => {
                if let Some(inst) = self.instances.get_mut(&id) {
                    debug_assert_eq!(inst.traps.len(), seg, "chain positions out of step");
                    inst.traps.push(handle);
                }
            }
            Err(e) => self.report_error(e),
        }
    }

    /// Install the coarse change-event trap standing in for position
    /// `pos` when the value at `host` cannot be observed per-property.
    fn install_change_trap(&mut self, id: u64, pos: usize, host: NodeId) {
        let target = match self.instances.get(&id) {
            Some(inst) => inst.target,
            None => return,
        };
        let boundary = pos - 1;
        let on_fire = Rc::new(RefCell::new(
            move |g: &mut Graph, sig: &Signal| -> Result<(), GraphError> {
                if let Signal::Event(e) = sig {
                    if e.is_change() {
                        g.chain_reread(id, boundary, host);
                    }
                }
                Ok(())
            },
        ));
        let on_unlink = Rc::new(RefCell::new(
            move |g: &mut Graph| -> Result<(), GraphError> {
                g.chain_unlinked(id, pos);
                Ok(())
            },
        ));
        match self.register_trap_owned(
            host,
            TrapKey::AnyEvent,
            target,
            on_fire,
            Some(on_unlink),
            false,
        ) {
            Ok(handle) => {
                if let Some(inst) = self.instances.get_mut(&id) {
                    debug_assert_eq!(inst.traps.len(), pos, "chain positions out of step");
                    inst.traps.push(handle);
                }
            }
            Err(e) => self.report_error(e),
        }
    }

    /// A chain trap at segment `seg` observed a new value: retract the
    /// stale downstream traps, then rebuild from the new value.
    fn chain_fire(&mut self, id: u64, seg: usize, value: Value) {
        self.retract_after(id, seg + 1);
        self.advance(id, seg, value);
    }

    /// Process `value`, the current value of segment `seg`, extending the
    /// chain or delivering.
    fn advance(&mut self, id: u64, seg: usize, value: Value) {
        let path = match self.instances.get(&id) {
            Some(inst) => Rc::clone(&inst.path),
            None => return,
        };
        if seg == path.last_index() {
            self.deliver(id, Some(value), false);
            return;
        }
        let next = seg + 1;
        match value {
            Value::Null => self.deliver(id, None, false),
            Value::Node(m) => {
                if !self.is_live(m) {
                    self.deliver(id, None, false);
                } else if self.is_declared(m, &path.segments()[next]) {
                    self.install_segment(id, next, m);
                    let v = self.get(m, &path.segments()[next]).unwrap_or(Value::Null);
                    self.advance(id, next, v);
                } else {
                    // Plain data holder: watch coarse change events and
                    // read the rest of the path by direct access.
                    self.install_change_trap(id, next, m);
                    let computed = self.read_through(m, &path.segments()[next..]);
                    self.deliver(id, computed, false);
                }
            }
            plain => {
                let computed = plain.descend(&path.segments()[next..]).cloned();
                self.deliver(id, computed, false);
            }
        }
    }

    /// Forced re-read through a non-observable holder after a change
    /// event: always re-delivers, even when the value is unchanged.
    fn chain_reread(&mut self, id: u64, boundary: usize, host: NodeId) {
        let path = match self.instances.get(&id) {
            Some(inst) => Rc::clone(&inst.path),
            None => return,
        };
        if !self.is_live(host) {
            self.deliver(id, None, true);
            return;
        }
        let computed = self.read_through(host, &path.segments()[boundary + 1..]);
        self.deliver(id, computed, true);
    }

    /// A node hosting the chain position `pos` was unlinked.
    fn chain_unlinked(&mut self, id: u64, pos: usize) {
        self.retract_after(id, pos);
        if pos == 0 {
            // The resolved root is gone: the whole search restarts and
            // may land on a different ancestor.
            let target = match self.instances.get_mut(&id) {
                Some(inst) => {
                    inst.level = NOT_SEARCHED;
                    inst.target
                }
                None => return,
            };
            if self.is_live(target) {
                self.search(id, Some(target), 0);
            }
        } else {
            // Upstream traps stay armed; they re-extend the chain when
            // the intermediate property is reassigned.
            self.deliver(id, None, false);
        }
    }

    /// Remove chain traps at positions `>= from`.
    fn retract_after(&mut self, id: u64, from: usize) {
        let stale: Vec<TrapHandle> = match self.instances.get_mut(&id) {
            Some(inst) => {
                if inst.traps.len() <= from {
                    return;
                }
                inst.traps.split_off(from)
            }
            None => return,
        };
        for trap in &stale {
            self.remove_trap(trap);
        }
    }

    fn teardown_chain(&mut self, id: u64) {
        self.retract_after(id, 0);
    }

    /// Read `segments` from `host` by direct access: the first segment as
    /// a stored property (declared or plain), the rest through records.
    fn read_through(&self, host: NodeId, segments: &[String]) -> Option<Value> {
        let value = self.get(host, &segments[0])?;
        if segments.len() == 1 {
            return Some(value);
        }
        value.descend(&segments[1..]).cloned()
    }

    // ---- delivery ----------------------------------------------------------

    /// Deliver to the update callback. `None` means unbound (default or
    /// null). Duplicate suppression unless `forced`.
    fn deliver(&mut self, id: u64, value: Option<Value>, forced: bool) {
        let (callback, actual) = {
            let Some(inst) = self.instances.get_mut(&id) else {
                return;
            };
            let bound = value.is_some();
            let actual = match value {
                Some(v) => v,
                None => inst.default.clone().unwrap_or(Value::Null),
            };
            if !forced {
                if let Some((last, last_bound)) = &inst.last {
                    if *last_bound == bound && *last == actual {
                        return;
                    }
                }
            }
            inst.last = Some((actual.clone(), bound));
            (Rc::clone(&inst.update), actual)
        };
        if let Ok(mut f) = callback.try_borrow_mut() {
            if let Err(e) = (*f)(self, &actual) {
                self.report_error(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    fn watch(
        g: &mut Graph,
        node: NodeId,
        binding: &Binding,
    ) -> (Rc<StdRefCell<Vec<Value>>>, BindingHandle) {
        let seen: Rc<StdRefCell<Vec<Value>>> = Rc::new(StdRefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handle = g
            .observe(node, binding, move |_, v| {
                sink.borrow_mut().push(v.clone());
                Ok(())
            })
            .unwrap();
        (seen, handle)
    }

    fn errors(g: &mut Graph) -> Rc<StdRefCell<Vec<GraphError>>> {
        let errs: Rc<StdRefCell<Vec<GraphError>>> = Rc::new(StdRefCell::new(Vec::new()));
        let sink = Rc::clone(&errs);
        g.set_error_hook(move |e| sink.borrow_mut().push(e));
        errs
    }

    #[test]
    fn resolves_ancestor_property_immediately() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(app, "theme", Value::from("dark")).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("theme").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::from("dark")]);

        g.set(app, "theme", Value::from("light")).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::from("dark"), Value::from("light")],
            "exactly one delivery per change"
        );
    }

    #[test]
    fn own_property_wins_at_hop_zero() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(app, "theme", Value::from("dark")).unwrap();
        g.define(view, "theme", Value::from("mine")).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("theme").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::from("mine")]);
    }

    #[test]
    fn equal_value_is_delivered_once() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(app, "n", Value::Int(1)).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("n").unwrap());
        g.set(app, "n", Value::Int(1)).unwrap();
        assert_eq!(seen.borrow().len(), 1, "no redundant delivery");
    }

    #[test]
    fn unresolved_delivers_default_then_resolves_on_attach() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(app, "theme", Value::from("dark")).unwrap();

        let binding = Binding::parse("theme")
            .unwrap()
            .with_default(Value::from("fallback"));
        let (seen, _h) = watch(&mut g, view, &binding);
        assert_eq!(*seen.borrow(), vec![Value::from("fallback")]);

        g.attach(app, view).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::from("fallback"), Value::from("dark")],
            "attach re-resolves without re-registering"
        );
    }

    #[test]
    fn detach_delivers_unbound_and_reattach_recovers() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(app, "theme", Value::from("dark")).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("theme").unwrap());
        g.detach(app, view).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::from("dark"), Value::Null],
            "detach must deliver unbound"
        );

        g.attach(app, view).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::from("dark"), Value::Null, Value::from("dark")]
        );
    }

    #[test]
    fn move_between_parents_reresolves() {
        let mut g = Graph::new();
        let a = g.create();
        let b = g.create();
        let child = g.create();
        g.define(a, "x", Value::Int(1)).unwrap();
        g.define(b, "x", Value::Int(2)).unwrap();
        g.attach(a, child).unwrap();

        let (seen, _h) = watch(&mut g, child, &Binding::parse("x").unwrap());
        g.attach(b, child).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::Int(1), Value::Null, Value::Int(2)],
            "move = unbound from A, then B's value"
        );
    }

    #[test]
    fn multi_segment_switches_intermediate_nodes() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        let x = g.create();
        let y = g.create();
        g.define(x, "q", Value::Int(10)).unwrap();
        g.define(y, "q", Value::Int(20)).unwrap();
        g.define(app, "p", Value::Node(x)).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("p.q").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::Int(10)]);

        // Reassigning p must stop observing q on x and start on y.
        g.set(app, "p", Value::Node(y)).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(10), Value::Int(20)]);

        g.set(x, "q", Value::Int(11)).unwrap();
        assert_eq!(
            seen.borrow().len(),
            2,
            "stale intermediate must no longer be observed"
        );

        g.set(y, "q", Value::Int(21)).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::Int(10), Value::Int(20), Value::Int(21)]
        );
    }

    #[test]
    fn null_intermediate_goes_unbound() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        let x = g.create();
        g.define(x, "q", Value::Int(10)).unwrap();
        g.define(app, "p", Value::Node(x)).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("p.q").unwrap());
        g.set(app, "p", Value::Null).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(10), Value::Null]);
    }

    #[test]
    fn container_is_skipped_as_binding_root() {
        let mut g = Graph::new();
        let app = g.create();
        let list = g.create();
        let item = g.create();
        g.define(app, "count", Value::Int(7)).unwrap();
        g.define(list, "count", Value::Int(3)).unwrap();
        g.mark_container(list).unwrap();
        g.attach(app, list).unwrap();
        g.attach(list, item).unwrap();

        let (seen, _h) = watch(&mut g, item, &Binding::parse("count").unwrap());
        assert_eq!(
            *seen.borrow(),
            vec![Value::Int(7)],
            "container's own count must be skipped"
        );
    }

    #[test]
    fn plain_property_reports_not_observable() {
        let mut g = Graph::new();
        let app = g.create();
        let list = g.create();
        let item = g.create();
        // `app` carries count only as a plain value.
        g.set_plain(app, "count", Value::Int(7)).unwrap();
        g.define(list, "count", Value::Int(3)).unwrap();
        g.mark_container(list).unwrap();
        g.attach(app, list).unwrap();
        g.attach(list, item).unwrap();

        let errs = errors(&mut g);
        let (seen, _h) = watch(&mut g, item, &Binding::parse("count").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::Null], "unbound, not a panic");
        assert_eq!(
            *errs.borrow(),
            vec![GraphError::NotObservable {
                node: app,
                property: "count".into()
            }]
        );
    }

    #[test]
    fn label_filter_rejects_foreign_bindings() {
        let mut g = Graph::new();
        let form = g.create();
        let field = g.create();
        g.define(form, "hint", Value::from("top")).unwrap();
        g.set_binding_filter(form, ["form"]).unwrap();
        g.attach(form, field).unwrap();

        let errs = errors(&mut g);

        // Unlabelled and matching-label bindings resolve.
        let (seen, _h) = watch(&mut g, field, &Binding::parse("hint").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::from("top")]);
        let labelled = Binding::parse("hint").unwrap().with_label("form");
        let (seen2, _h2) = watch(&mut g, field, &labelled);
        assert_eq!(*seen2.borrow(), vec![Value::from("top")]);
        assert!(errs.borrow().is_empty());

        // A foreign label is rejected even though the property exists.
        let foreign = Binding::parse("hint").unwrap().with_label("dialog");
        let (seen3, _h3) = watch(&mut g, field, &foreign);
        assert_eq!(*seen3.borrow(), vec![Value::Null]);
        assert_eq!(errs.borrow().len(), 1);
    }

    #[test]
    fn reads_through_records_by_field_access() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(
            app,
            "user",
            Value::record([("name", Value::from("ada"))]),
        )
        .unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("user.name").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::from("ada")]);

        g.set(
            app,
            "user",
            Value::record([("name", Value::from("grace"))]),
        )
        .unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::from("ada"), Value::from("grace")]
        );
    }

    #[test]
    fn change_event_rereads_plain_holder() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        let store = g.create();
        // `store` keeps q as a plain property: not trappable, but the
        // holder emits coarse change events.
        g.set_plain(store, "q", Value::Int(1)).unwrap();
        g.define(app, "p", Value::Node(store)).unwrap();
        g.attach(app, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("p.q").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::Int(1)]);

        g.set_plain(store, "q", Value::Int(2)).unwrap();
        assert_eq!(seen.borrow().len(), 1, "plain write alone is silent");

        g.emit_change(store, store).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(1), Value::Int(2)]);

        // Forced re-delivery even when the value did not change.
        g.emit_change(store, store).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![Value::Int(1), Value::Int(2), Value::Int(2)]
        );
    }

    #[test]
    fn unlinking_resolved_root_restarts_search() {
        let mut g = Graph::new();
        let outer = g.create();
        let inner = g.create();
        let view = g.create();
        g.define(outer, "x", Value::Int(1)).unwrap();
        g.define(inner, "x", Value::Int(2)).unwrap();
        g.attach(outer, inner).unwrap();
        g.attach(inner, view).unwrap();

        let (seen, _h) = watch(&mut g, view, &Binding::parse("x").unwrap());
        assert_eq!(*seen.borrow(), vec![Value::Int(2)], "inner wins first");

        // Losing inner restarts the search while view is still live; the
        // restart finds no live ancestor (view's parent is mid-unlink) and
        // delivers unbound. The cascade then drops the instance entirely.
        g.unlink(inner).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(2), Value::Null]);
        let _ = g.set(outer, "x", Value::Int(3));
        assert_eq!(
            *seen.borrow(),
            vec![Value::Int(2), Value::Null],
            "instance must not survive its target"
        );
    }

    #[test]
    fn unobserve_stops_deliveries() {
        let mut g = Graph::new();
        let app = g.create();
        let view = g.create();
        g.define(app, "x", Value::Int(1)).unwrap();
        g.attach(app, view).unwrap();

        let (seen, handle) = watch(&mut g, view, &Binding::parse("x").unwrap());
        g.unobserve(&handle);
        g.unobserve(&handle);
        g.set(app, "x", Value::Int(2)).unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Int(1)]);
    }

    #[test]
    fn observe_on_unlinked_target_fails() {
        let mut g = Graph::new();
        let n = g.create();
        g.unlink(n).unwrap();
        let err = g
            .observe_path(n, "x", |_, _| Ok(()))
            .unwrap_err();
        assert_eq!(err, GraphError::AlreadyUnlinked { node: n });
    }
}
