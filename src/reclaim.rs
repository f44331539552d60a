//! Reclamation of frames that only reference cycles keep alive.
//!
//! Frames, lists, objects and closures are reference counted. A `function` defined inside
//! a `let` block or a call is stored in the very frame it captures, so when the block ends
//! the frame and the closure still hold each other and neither count drops to zero.
//!
//! The interpreter registers a weak handle to every frame it creates, and
//! [`FrameRegistry::collect`] finds the frames that only such cycles keep alive by trial
//! deletion:
//!
//! 1. Walk the frames, lists, objects, closures and bound calls reachable from the
//!    registered frames, counting the references each of them receives from inside the
//!    walk.
//! 2. A node whose strong count exceeds those internal references is held from outside:
//!    by the interpreter, by the host or by a value on the native stack. Everything
//!    reachable from such a node is live.
//! 3. The rest is garbage. Clearing the bindings of garbage frames and the entries of
//!    garbage objects breaks every cycle, and reference counting frees what is left.
//!
//! References the walk cannot see, such as values captured by host closures or literal
//! values inside tokens, only make nodes look externally held. They can keep a frame
//! alive longer, never free one that is still in use.

use crate::environment::{Environment, WeakEnvironment};
use crate::value::{BoundCall, Callable, Closure, List, ObjectRef, Value, release};
use std::collections::HashMap;
use std::rc::Rc;

/// Frames created before the first collection
const MIN_BUDGET: usize = 1024;

/// A shared allocation of the value graph
enum Node {
    Frame(Environment),
    List(List),
    Object(ObjectRef),
    Closure(Rc<Closure>),
    Bound(Rc<BoundCall>),
}

impl Node {
    fn key(&self) -> *const () {
        match self {
            Node::Frame(env) => env.as_ptr(),
            Node::List(list) => list.as_ptr(),
            Node::Object(object) => Rc::as_ptr(object).cast(),
            Node::Closure(closure) => Rc::as_ptr(closure).cast(),
            Node::Bound(bound) => Rc::as_ptr(bound).cast(),
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Node::Frame(env) => env.strong_count(),
            Node::List(list) => list.strong_count(),
            Node::Object(object) => Rc::strong_count(object),
            Node::Closure(closure) => Rc::strong_count(closure),
            Node::Bound(bound) => Rc::strong_count(bound),
        }
    }

    /// Report the references this node holds; `false` if its contents are borrowed
    fn trace(&self, tracer: &mut Tracer) -> bool {
        match self {
            Node::Frame(env) => return env.trace(tracer),
            Node::List(list) => list.iter().for_each(|item| tracer.value(item)),
            Node::Object(object) => {
                let Ok(fields) = object.try_borrow() else {
                    return false;
                };
                fields.values().for_each(|value| tracer.value(value));
            }
            Node::Closure(closure) => tracer.frame(&closure.env),
            Node::Bound(bound) => {
                tracer.callable(&bound.target);
                bound.args.iter().for_each(|arg| tracer.value(arg));
            }
        }
        true
    }
}

/// Outgoing references of one node, one entry per strong handle
#[derive(Default)]
pub(crate) struct Tracer(Vec<Node>);

impl Tracer {
    pub(crate) fn frame(&mut self, env: &Environment) {
        self.0.push(Node::Frame(env.clone()));
    }

    pub(crate) fn value(&mut self, value: &Value) {
        match value {
            Value::List(list) => self.0.push(Node::List(list.clone())),
            Value::Object(object) => self.0.push(Node::Object(object.clone())),
            Value::Callable(callable) => self.callable(callable),
            _ => {}
        }
    }

    pub(crate) fn callable(&mut self, callable: &Callable) {
        match callable {
            Callable::Lambda(closure) | Callable::Macro(closure) => {
                self.0.push(Node::Closure(closure.clone()));
            }
            Callable::Bound(bound) => self.0.push(Node::Bound(bound.clone())),
            Callable::Builtin(_) | Callable::SpecialForm(_) => {}
        }
    }
}

/// Every node reachable from the registered frames, each held exactly once
#[derive(Default)]
struct Graph {
    slots: HashMap<*const (), usize>,
    nodes: Vec<Node>,
    edges: Vec<Vec<usize>>,
    /// References received from other nodes of the graph
    internal: Vec<usize>,
    /// Nodes whose contents could not be read
    opaque: Vec<bool>,
}

impl Graph {
    fn build(frames: impl IntoIterator<Item = Environment>) -> Self {
        let mut graph = Graph::default();
        for frame in frames {
            graph.insert(Node::Frame(frame));
        }

        let mut next = 0;
        while next < graph.nodes.len() {
            let mut tracer = Tracer::default();
            graph.opaque[next] = !graph.nodes[next].trace(&mut tracer);
            for child in tracer.0 {
                let slot = graph.insert(child);
                graph.internal[slot] += 1;
                graph.edges[next].push(slot);
            }
            next += 1;
        }
        graph
    }

    fn insert(&mut self, node: Node) -> usize {
        let key = node.key();
        if let Some(&slot) = self.slots.get(&key) {
            return slot;
        }
        let slot = self.nodes.len();
        self.slots.insert(key, slot);
        self.nodes.push(node);
        self.edges.push(Vec::new());
        self.internal.push(0);
        self.opaque.push(false);
        slot
    }

    /// Nodes reachable from one that is referenced from outside the graph
    fn live(&self) -> Vec<bool> {
        // The graph's own handle accounts for one strong reference
        let mut pending: Vec<usize> = (0..self.nodes.len())
            .filter(|&slot| {
                self.opaque[slot] || self.nodes[slot].strong_count() > self.internal[slot] + 1
            })
            .collect();

        let mut live = vec![false; self.nodes.len()];
        while let Some(slot) = pending.pop() {
            if live[slot] {
                continue;
            }
            live[slot] = true;
            pending.extend(self.edges[slot].iter().filter(|&&child| !live[child]));
        }
        live
    }
}

/// Weak handles to the frames an interpreter created
pub(crate) struct FrameRegistry {
    frames: Vec<WeakEnvironment>,
    /// Frames created since the last collection
    created: usize,
    /// `created` count that makes the next collection due
    budget: usize,
}

impl Default for FrameRegistry {
    fn default() -> Self {
        FrameRegistry {
            frames: Vec::new(),
            created: 0,
            budget: MIN_BUDGET,
        }
    }
}

impl FrameRegistry {
    pub(crate) fn track(&mut self, env: &Environment) {
        self.frames.push(env.downgrade());
        self.created += 1;
    }

    pub(crate) fn is_due(&self) -> bool {
        self.created >= self.budget
    }

    pub(crate) fn has_new_frames(&self) -> bool {
        self.created > 0
    }

    /// Clear the frames that only reference cycles keep alive; returns how many
    pub(crate) fn collect(&mut self) -> usize {
        self.frames.retain(|frame| !frame.is_dropped());
        let graph = Graph::build(self.frames.iter().filter_map(WeakEnvironment::upgrade));
        let live = graph.live();

        let mut released = Vec::new();
        let mut reclaimed = 0;
        for (node, _) in graph.nodes.iter().zip(&live).filter(|(_, live)| !**live) {
            match node {
                Node::Frame(env) => {
                    released.extend(env.take_bindings());
                    reclaimed += 1;
                }
                Node::Object(object) => {
                    if let Ok(mut fields) = object.try_borrow_mut() {
                        released.extend(fields.take_values());
                    }
                }
                Node::List(_) | Node::Closure(_) | Node::Bound(_) => {}
            }
        }
        let survivors = live.iter().filter(|live| **live).count();
        drop(graph);
        release(released);

        self.frames.retain(|frame| !frame.is_dropped());
        self.created = 0;
        self.budget = survivors.max(MIN_BUDGET);
        tracing::debug!(reclaimed, tracked = self.frames.len(), "reclaimed frames");
        reclaimed
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::value::val;

    fn closure_in(env: &Environment, name: &str) -> Value {
        let closure = Closure {
            name: Some(name.to_owned()),
            params: Vec::new(),
            body: Rc::from(Vec::new()),
            env: env.clone(),
        };
        let value = Value::Callable(Callable::Lambda(Rc::new(closure)));
        env.define_variable(name, value.clone()).unwrap();
        value
    }

    #[test]
    fn test_self_capturing_frames_are_cleared() {
        let root = Environment::new();
        let mut registry = FrameRegistry::default();

        let frame = Environment::with_parent(&root);
        registry.track(&frame);
        frame.define_variable("payload", val([1, 2, 3])).unwrap();
        closure_in(&frame, "f");
        let weak = frame.downgrade();
        drop(frame);

        assert!(!weak.is_dropped(), "the cycle keeps the frame alive");
        assert_eq!(registry.collect(), 1);
        assert!(weak.is_dropped());
        assert!(!registry.has_new_frames());
    }

    #[test]
    fn test_externally_held_frames_survive() {
        let root = Environment::new();
        let mut registry = FrameRegistry::default();

        // Held directly
        let held = Environment::with_parent(&root);
        registry.track(&held);
        closure_in(&held, "f");

        // Held through a closure the host kept
        let captured = Environment::with_parent(&root);
        registry.track(&captured);
        let kept = closure_in(&captured, "g");

        // Held as the parent of a live frame
        let parent = Environment::with_parent(&root);
        registry.track(&parent);
        closure_in(&parent, "h");
        let child = Environment::with_parent(&parent);
        registry.track(&child);
        let weak_parent = parent.downgrade();
        drop(parent);

        // Held only through an object that is itself referenced from outside
        let object = ObjectRef::default();
        let boxed = Environment::with_parent(&root);
        registry.track(&boxed);
        let inner = closure_in(&boxed, "k");
        object.borrow_mut().insert("k".into(), inner);
        let weak_boxed = boxed.downgrade();
        drop(boxed);

        assert_eq!(registry.collect(), 0);
        assert!(held.defines("f"));
        assert!(captured.defines("g"));
        assert!(weak_parent.upgrade().is_some_and(|parent| parent.defines("h")));
        assert!(weak_boxed.upgrade().is_some_and(|boxed| boxed.defines("k")));

        // Releasing the outside handles turns them into garbage
        drop((held, captured, kept, child, object));
        assert_eq!(registry.collect(), 4);
        assert!(weak_parent.is_dropped());
        assert!(weak_boxed.is_dropped());
    }

    #[test]
    fn test_cycles_through_objects_are_cleared() {
        let root = Environment::new();
        let mut registry = FrameRegistry::default();

        // frame -> object -> closure -> frame
        let frame = Environment::with_parent(&root);
        registry.track(&frame);
        let object = ObjectRef::default();
        frame
            .define_variable("o", Value::Object(object.clone()))
            .unwrap();
        let closure = Closure {
            name: None,
            params: Vec::new(),
            body: Rc::from(Vec::new()),
            env: frame.clone(),
        };
        object.borrow_mut().insert(
            "f".into(),
            Value::Callable(Callable::Lambda(Rc::new(closure))),
        );
        let weak_object = Rc::downgrade(&object);
        let weak = frame.downgrade();
        drop((frame, object));

        assert_eq!(registry.collect(), 1);
        assert!(weak.is_dropped());
        assert_eq!(weak_object.strong_count(), 0);
    }

    #[test]
    fn test_budget_grows_with_survivors() {
        let root = Environment::new();
        let mut registry = FrameRegistry::default();
        let frames: Vec<Environment> = (0..MIN_BUDGET)
            .map(|_| {
                let frame = Environment::with_parent(&root);
                registry.track(&frame);
                frame
            })
            .collect();

        assert!(registry.is_due());
        assert_eq!(registry.collect(), 0);
        assert!(!registry.is_due());
        // Every frame and the root survive
        assert_eq!(registry.budget, MIN_BUDGET + 1);
        drop(frames);
    }
}
