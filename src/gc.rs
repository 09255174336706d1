//! Cycle collection for script values
//!
//! Values are reference counted, which cannot reclaim a closure stored in
//! the scope it captured or a list that contains itself. The collector
//! finds such islands by trial deletion: it traces the value graph from the
//! globals and every tracked candidate, counting how many references each
//! node receives from inside the graph. A node with more strong references
//! than that is held from outside (by the host, a pending hand-off or a
//! running interpreter) and becomes a root. Nodes not marked from a root
//! are garbage; clearing their contents breaks the cycles and lets the
//! reference counts fall to zero.
//!
//! The runtime itself is a node: subclass instances hold it, so an engine
//! whose globals store such instances is reclaimed the same way.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::engine::Runtime;
use crate::environment::Scope;
use crate::host::HostRef;
use crate::value::{BoundMethod, ScriptClass, ScriptFunction, ScriptObject, Value};

type ListCell = Arc<RwLock<Vec<Value>>>;

/// Tracked candidates are pruned once this many accumulate
const INITIAL_PRUNE_AT: usize = 1024;

/// A reference-counted allocation the collector can trace
enum Node {
    Runtime(Arc<Runtime>),
    Scope(Scope),
    List(ListCell),
    Object(Arc<ScriptObject>),
    Function(Arc<ScriptFunction>),
    Class(Arc<ScriptClass>),
    Bound(Arc<BoundMethod>),
    Proxy(HostRef),
}

fn addr<T: ?Sized>(ptr: &Arc<T>) -> usize {
    Arc::as_ptr(ptr) as *const () as usize
}

impl Node {
    fn of(value: &Value) -> Option<Node> {
        match value {
            Value::List(items) => Some(Node::List(items.clone())),
            Value::Object(object) => Some(Node::Object(object.clone())),
            Value::Function(function) => Some(Node::Function(function.clone())),
            Value::Class(class) => Some(Node::Class(class.clone())),
            Value::BoundMethod(bound) => Some(Node::Bound(bound.clone())),
            Value::Host(host) if host.proxy().is_some() => Some(Node::Proxy(host.clone())),
            _ => None,
        }
    }

    fn key(&self) -> usize {
        match self {
            Node::Runtime(runtime) => addr(runtime),
            Node::Scope(scope) => scope.addr(),
            Node::List(items) => addr(items),
            Node::Object(object) => addr(object),
            Node::Function(function) => addr(function),
            Node::Class(class) => addr(class),
            Node::Bound(bound) => addr(bound),
            Node::Proxy(host) => host.addr(),
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Node::Runtime(runtime) => Arc::strong_count(runtime),
            Node::Scope(scope) => scope.strong_count(),
            Node::List(items) => Arc::strong_count(items),
            Node::Object(object) => Arc::strong_count(object),
            Node::Function(function) => Arc::strong_count(function),
            Node::Class(class) => Arc::strong_count(class),
            Node::Bound(bound) => Arc::strong_count(bound),
            Node::Proxy(host) => host.strong_count(),
        }
    }

    /// Every strong reference this node holds to another node
    fn children(&self) -> Vec<Node> {
        let mut out = Vec::new();
        match self {
            Node::Runtime(runtime) => {
                out.push(Node::Scope(runtime.globals().clone()));
                out.extend(runtime.enclosing().as_ref().and_then(Node::of));
            }
            Node::Scope(scope) => {
                out.extend(scope.parent().cloned().map(Node::Scope));
                scope.for_each_value(|value| out.extend(Node::of(value)));
            }
            Node::List(items) => out.extend(items.read().iter().filter_map(Node::of)),
            Node::Object(object) => {
                out.extend(object.class.clone().map(Node::Class));
                object.for_each_value(|value| out.extend(Node::of(value)));
            }
            Node::Function(function) => out.push(Node::Scope(function.closure.clone())),
            Node::Class(class) => {
                out.extend(class.methods.values().cloned().map(Node::Function));
                out.extend(class.superclass.clone().map(Node::Class));
            }
            Node::Bound(bound) => {
                out.extend(Node::of(&bound.receiver));
                out.push(Node::Function(bound.method.clone()));
            }
            Node::Proxy(host) => {
                if let Some(proxy) = host.proxy() {
                    out.push(Node::Object(proxy.script_object().clone()));
                    out.push(Node::Runtime(proxy.runtime().clone()));
                }
            }
        }
        out
    }

    /// Drop the references this node holds, moving them into `trash`
    fn clear(&self, trash: &mut Vec<Value>) {
        match self {
            Node::Scope(scope) => trash.extend(scope.take_values()),
            Node::List(items) => trash.append(&mut items.write()),
            Node::Object(object) => trash.extend(object.take_fields()),
            Node::Runtime(_) | Node::Function(_) | Node::Class(_) | Node::Bound(_) | Node::Proxy(_) => {}
        }
    }
}

/// Weak handle to a value that may take part in a cycle
enum Candidate {
    List(Weak<RwLock<Vec<Value>>>),
    Object(Weak<ScriptObject>),
    Function(Weak<ScriptFunction>),
}

impl Candidate {
    fn of(value: &Value) -> Option<Candidate> {
        match value {
            Value::List(items) => Some(Candidate::List(Arc::downgrade(items))),
            Value::Object(object) => Some(Candidate::Object(Arc::downgrade(object))),
            Value::Function(function) => Some(Candidate::Function(Arc::downgrade(function))),
            _ => None,
        }
    }

    fn upgrade(&self) -> Option<Node> {
        match self {
            Candidate::List(items) => items.upgrade().map(Node::List),
            Candidate::Object(object) => object.upgrade().map(Node::Object),
            Candidate::Function(function) => function.upgrade().map(Node::Function),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Candidate::List(items) => items.strong_count() > 0,
            Candidate::Object(object) => object.strong_count() > 0,
            Candidate::Function(function) => function.strong_count() > 0,
        }
    }
}

struct Candidates {
    entries: Vec<Candidate>,
    prune_at: usize,
}

/// One traced node
struct Traced {
    node: Node,
    /// References received from other traced nodes
    internal: usize,
    edges: Vec<usize>,
}

/// Reclaims reference cycles among script values
pub(crate) struct Collector {
    candidates: Mutex<Candidates>,
    /// Interpreters currently alive; collection waits until there are none
    active: Mutex<usize>,
}

impl Collector {
    pub(crate) fn new() -> Self {
        Self {
            candidates: Mutex::new(Candidates {
                entries: Vec::new(),
                prune_at: INITIAL_PRUNE_AT,
            }),
            active: Mutex::new(0),
        }
    }

    /// Remember a function, list or object that may end up in a cycle
    pub(crate) fn track(&self, value: &Value) {
        let Some(candidate) = Candidate::of(value) else {
            return;
        };
        let mut candidates = self.candidates.lock();
        if candidates.entries.len() >= candidates.prune_at {
            candidates.entries.retain(Candidate::is_live);
            candidates.prune_at = (candidates.entries.len() * 2).max(INITIAL_PRUNE_AT);
        }
        candidates.entries.push(candidate);
    }

    /// Track `container` when `stored` could link back to it
    pub(crate) fn track_store(&self, container: &Value, stored: &Value) {
        if Node::of(stored).is_some() {
            self.track(container);
        }
    }

    pub(crate) fn enter(&self) {
        *self.active.lock() += 1;
    }

    pub(crate) fn leave(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
    }

    /// Clear unreachable cycles, returning how many unreachable nodes were
    /// found. With `releasing` the caller's own reference to the runtime is
    /// discounted, so everything it alone kept alive is cleared too. Does
    /// nothing while an interpreter is running.
    pub(crate) fn collect(&self, runtime: &Arc<Runtime>, releasing: bool) -> usize {
        self.collect_from(Node::Runtime(runtime.clone()), releasing)
    }

    fn collect_from(&self, start: Node, releasing: bool) -> usize {
        let mut trash = Vec::new();
        let cleared = {
            let active = self.active.lock();
            if *active > 0 {
                return 0;
            }
            let released = releasing.then(|| start.key());
            let mut starts = vec![start];
            starts.extend(self.live_candidates());
            let graph = trace(starts);
            let garbage = sweep_targets(&graph, released);
            for key in &garbage {
                if let Some(traced) = graph.get(key) {
                    traced.node.clear(&mut trash);
                }
            }
            garbage.len()
        };
        // Destructors may start interpreters, so values drop after the gate
        // is released
        drop(trash);
        if cleared > 0 {
            debug!(cleared, "collected reference cycles");
        }
        cleared
    }

    fn live_candidates(&self) -> Vec<Node> {
        let mut candidates = self.candidates.lock();
        candidates.entries.retain(Candidate::is_live);
        candidates.prune_at = (candidates.entries.len() * 2).max(INITIAL_PRUNE_AT);
        candidates.entries.iter().filter_map(Candidate::upgrade).collect()
    }
}

/// Walk the graph reachable from `starts`, recording edges and internal
/// reference counts
fn trace(starts: Vec<Node>) -> HashMap<usize, Traced> {
    let mut graph: HashMap<usize, Traced> = HashMap::new();
    let mut grey_stack = Vec::new();
    for node in starts {
        let key = node.key();
        if let MapEntry::Vacant(slot) = graph.entry(key) {
            slot.insert(Traced {
                node,
                internal: 0,
                edges: Vec::new(),
            });
            grey_stack.push(key);
        }
    }

    while let Some(key) = grey_stack.pop() {
        let children = match graph.get(&key) {
            Some(traced) => traced.node.children(),
            None => continue,
        };
        let mut edges = Vec::with_capacity(children.len());
        for child in children {
            let child_key = child.key();
            let traced = graph.entry(child_key).or_insert_with(|| {
                grey_stack.push(child_key);
                Traced {
                    node: child,
                    internal: 0,
                    edges: Vec::new(),
                }
            });
            traced.internal += 1;
            edges.push(child_key);
        }
        if let Some(traced) = graph.get_mut(&key) {
            traced.edges = edges;
        }
    }
    graph
}

/// Keys of nodes no root can reach
fn sweep_targets(graph: &HashMap<usize, Traced>, released: Option<usize>) -> Vec<usize> {
    let mut grey_stack: Vec<usize> = graph
        .iter()
        .filter(|(key, traced)| {
            // The graph's own handle, plus the releasing owner's
            let held = if released == Some(**key) { 2 } else { 1 };
            traced.node.strong_count() > traced.internal + held
        })
        .map(|(key, _)| *key)
        .collect();

    let mut marked = HashSet::new();
    while let Some(key) = grey_stack.pop() {
        if !marked.insert(key) {
            continue;
        }
        if let Some(traced) = graph.get(&key) {
            grey_stack.extend(traced.edges.iter().copied().filter(|edge| !marked.contains(edge)));
        }
    }

    graph.keys().copied().filter(|key| !marked.contains(key)).collect()
}
