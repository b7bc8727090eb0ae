#![forbid(unsafe_code)]

use crate::{
    macros::debug_warn,
    node::{
        AnyObserver, AnyOperator, NodeId, NodeState, ReactiveKind, ReactiveNode, ReactiveNodeType,
    },
    scheduler::Scheduler,
};
use core::hash::BuildHasherDefault;
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use slotmap::{SecondaryMap, SlotMap};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt::Debug,
    future::Future,
    pin::Pin,
    rc::Rc,
};
use thiserror::Error;

/// A boxed, pinned, non-`Send` future, as handed to the embedder by the
/// async bridge.
pub type PinnedFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// Tick stamp assigned to one externally-initiated propagation.
///
/// The counter advances once per external entry (sink push, future
/// resolution, producer callback, timer fire, subscription activation) and
/// is carried unchanged through the resulting fan-out.
pub type Tick = u64;

pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

thread_local! {
    pub(crate) static RUNTIMES: RefCell<SlotMap<RuntimeId, Runtime>> = Default::default();
    pub(crate) static CURRENT_RUNTIME: Cell<Option<RuntimeId>> = const { Cell::new(None) };
}

/// Errors surfaced at the embedding boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReactiveError {
    #[error("tried to access a reactive in a runtime that has been disposed")]
    RuntimeDisposed,
    #[error("tried to access a reactive node that has been disposed")]
    Disposed,
    #[error("tried to sample a placeholder that has not been replaced")]
    PlaceholderNotReplaced,
    #[error("tried to replace a placeholder that has already been replaced")]
    AlreadyReplaced,
    #[error("tried to push into a reactive that derives its value")]
    IllegalPush,
    #[error("tried to read a push reactive before any value was pushed")]
    NotYetPushed,
    #[error("error casting reactive value to type {0}")]
    Type(&'static str),
}

// The data structure that owns all the nodes of one reactive graph:
// streams, behaviors, futures, placeholders and boundary observers.
#[derive(Default)]
pub(crate) struct Runtime {
    pub id: Cell<RuntimeId>,
    pub nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    /// Downstream edges in insertion order. The value records the tick at
    /// which the listener was linked: a listener never observes the tick
    /// it was added in.
    pub node_subscribers: RefCell<SecondaryMap<NodeId, RefCell<FxIndexMap<NodeId, Tick>>>>,
    /// Ordered upstream edges. Fixed per combinator, except for `moment`
    /// and the switching combinators.
    pub node_sources: RefCell<SecondaryMap<NodeId, RefCell<Vec<NodeId>>>>,
    pub tick: Cell<Tick>,
    /// Depth of in-flight externally-initiated propagations.
    pub propagating: Cell<u32>,
    pub scheduler: RefCell<Option<Rc<dyn Scheduler>>>,
}

pub(crate) enum Dispatch {
    Operator(Rc<dyn AnyOperator>),
    Observer(Rc<dyn AnyObserver>),
    Placeholder,
    Producer,
    Source,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_node(&self, node: ReactiveNode) -> NodeId {
        let id = self.nodes.borrow_mut().insert(node);
        self.node_subscribers
            .borrow_mut()
            .insert(id, Default::default());
        self.node_sources.borrow_mut().insert(id, Default::default());
        id
    }

    pub(crate) fn dispose_node(&self, node: NodeId) {
        self.node_sources.borrow_mut().remove(node);
        self.node_subscribers.borrow_mut().remove(node);
        self.nodes.borrow_mut().remove(node);
    }

    pub(crate) fn current_tick(&self) -> Tick {
        self.tick.get()
    }

    pub(crate) fn next_tick(&self) -> Tick {
        let t = self.tick.get() + 1;
        self.tick.set(t);
        t
    }

    pub(crate) fn is_propagating(&self) -> bool {
        self.propagating.get() > 0
    }

    /// Runs one externally-initiated propagation under a fresh tick.
    pub(crate) fn with_tick<T>(&self, f: impl FnOnce(&Runtime, Tick) -> T) -> T {
        let t = self.next_tick();
        self.propagating.set(self.propagating.get() + 1);
        let v = f(self, t);
        self.propagating.set(self.propagating.get() - 1);
        v
    }

    pub(crate) fn state_of(&self, node: NodeId) -> NodeState {
        self.nodes
            .borrow()
            .get(node)
            .map(|n| n.state)
            .unwrap_or(NodeState::Inactive)
    }

    pub(crate) fn set_state(&self, node: NodeId, state: NodeState) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.state = state;
        }
    }

    pub(crate) fn kind_of(&self, node: NodeId) -> Option<ReactiveKind> {
        self.nodes.borrow().get(node).map(|n| n.kind)
    }

    pub(crate) fn value_of(&self, node: NodeId) -> Option<Rc<dyn Any>> {
        self.nodes.borrow().get(node).and_then(|n| n.value.clone())
    }

    pub(crate) fn set_value(&self, node: NodeId, value: Rc<dyn Any>) {
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.value = Some(value);
        }
    }

    pub(crate) fn sources_of(&self, node: NodeId) -> Vec<NodeId> {
        self.node_sources
            .borrow()
            .get(node)
            .map(|s| s.borrow().clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_sources(&self, node: NodeId, sources: Vec<NodeId>) {
        if let Some(s) = self.node_sources.borrow().get(node) {
            *s.borrow_mut() = sources;
        }
    }

    pub(crate) fn has_listeners(&self, node: NodeId) -> bool {
        self.node_subscribers
            .borrow()
            .get(node)
            .map(|s| !s.borrow().is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn dispatch_of(&self, node: NodeId) -> Option<Dispatch> {
        let nodes = self.nodes.borrow();
        nodes.get(node).map(|n| match &n.node_type {
            ReactiveNodeType::Operator { op } => Dispatch::Operator(Rc::clone(op)),
            ReactiveNodeType::Observer { observer } => Dispatch::Observer(Rc::clone(observer)),
            ReactiveNodeType::Placeholder { .. } => Dispatch::Placeholder,
            ReactiveNodeType::Producer { .. } => Dispatch::Producer,
            _ => Dispatch::Source,
        })
    }

    fn parent_states(&self, node: NodeId) -> Vec<NodeState> {
        self.sources_of(node)
            .iter()
            .map(|s| self.state_of(*s))
            .collect()
    }

    // ------------------------------------------------------------------
    // listener management
    // ------------------------------------------------------------------

    /// Links `listener` under `node` without surfacing the node's current
    /// value. Activates `node` on the 0→1 edge.
    pub(crate) fn add_listener_quiet(
        &self,
        node: NodeId,
        listener: NodeId,
        t: Tick,
    ) -> NodeState {
        let newly_active = {
            let subscribers = self.node_subscribers.borrow();
            let Some(subs) = subscribers.get(node) else {
                return NodeState::Inactive;
            };
            let mut subs = subs.borrow_mut();
            let was_empty = subs.is_empty();
            subs.insert(listener, t);
            was_empty
        };
        if newly_active && self.needs_activation(node) {
            self.activate(node, t);
        }
        self.state_of(node)
    }

    /// Links `listener` under `node`. A push behavior hands its current
    /// value to the fresh listener, and a resolved future replays its
    /// value; this is the one delivery exempt from the added-this-tick
    /// rule.
    pub(crate) fn add_listener(&self, node: NodeId, listener: NodeId, t: Tick) -> NodeState {
        let state = self.add_listener_quiet(node, listener, t);
        match state {
            NodeState::Done => {
                if let Some(v) = self.value_of(node) {
                    self.dispatch_push(listener, node, t, &v);
                }
            }
            NodeState::Push => {
                if self.kind_of(node) == Some(ReactiveKind::Behavior) {
                    if let Some(v) = self.value_of(node) {
                        self.dispatch_push(listener, node, t, &v);
                    }
                }
            }
            _ => {}
        }
        state
    }

    pub(crate) fn remove_listener(&self, node: NodeId, listener: NodeId) {
        let now_empty = {
            let subscribers = self.node_subscribers.borrow();
            let Some(subs) = subscribers.get(node) else {
                return;
            };
            let mut subs = subs.borrow_mut();
            subs.shift_remove(&listener);
            subs.is_empty()
        };
        if now_empty {
            self.deactivate(node);
        }
    }

    fn needs_activation(&self, node: NodeId) -> bool {
        let nodes = self.nodes.borrow();
        match nodes.get(node) {
            None => false,
            Some(n) => !n.always_active && n.state == NodeState::Inactive,
        }
    }

    /// Subscribes `node` to its parents and adopts the joined state.
    fn activate(&self, node: NodeId, t: Tick) {
        let sources = self.sources_of(node);
        let mut parent_states = Vec::with_capacity(sources.len());
        for source in &sources {
            parent_states.push(self.add_listener_quiet(*source, node, t));
        }
        let state = match self.dispatch_of(node) {
            Some(Dispatch::Operator(op)) => op.state(&parent_states),
            Some(Dispatch::Placeholder) => {
                parent_states.first().copied().unwrap_or(NodeState::Push)
            }
            Some(Dispatch::Producer) => NodeState::Push,
            _ => self.state_of(node),
        };
        self.set_state(node, state);
        self.run_producer_activate(node);
        if let Some(Dispatch::Operator(op)) = self.dispatch_of(node) {
            op.activated(self, node, t);
        }
        // push parents with a current value surface it to the new child
        for source in sources {
            let deliver = match self.state_of(source) {
                NodeState::Done => true,
                NodeState::Push => self.kind_of(source) == Some(ReactiveKind::Behavior),
                _ => false,
            };
            if deliver {
                if let Some(v) = self.value_of(source) {
                    self.dispatch_push(node, source, t, &v);
                }
            }
        }
    }

    /// Unsubscribes from parents and returns the node to `Inactive`.
    fn deactivate(&self, node: NodeId) {
        {
            let nodes = self.nodes.borrow();
            match nodes.get(node) {
                None => return,
                Some(n) => {
                    if n.always_active
                        || n.state == NodeState::Inactive
                        || n.state == NodeState::Done
                    {
                        return;
                    }
                }
            }
        }
        let deactivator = {
            let nodes = self.nodes.borrow();
            match nodes.get(node).map(|n| &n.node_type) {
                Some(ReactiveNodeType::Producer { deactivate, .. }) => deactivate.borrow_mut().take(),
                _ => None,
            }
        };
        if let Some(deactivator) = deactivator {
            deactivator();
        }
        for source in self.sources_of(node) {
            self.remove_listener(source, node);
        }
        if let Some(Dispatch::Operator(op)) = self.dispatch_of(node) {
            op.deactivated(self, node);
        }
        self.set_state(node, NodeState::Inactive);
    }

    fn run_producer_activate(&self, node: NodeId) {
        let activate = {
            let nodes = self.nodes.borrow();
            match nodes.get(node).map(|n| &n.node_type) {
                Some(ReactiveNodeType::Producer { activate, .. }) => Some(Rc::clone(activate)),
                _ => None,
            }
        };
        if let Some(activate) = activate {
            let deactivator = activate(self.id.get(), node);
            let nodes = self.nodes.borrow();
            if let Some(ReactiveNodeType::Producer { deactivate, .. }) =
                nodes.get(node).map(|n| &n.node_type)
            {
                *deactivate.borrow_mut() = Some(deactivator);
            }
        }
    }

    // ------------------------------------------------------------------
    // propagation
    // ------------------------------------------------------------------

    /// Depth-first fan-out of `value` to the node's listeners in insertion
    /// order. Listeners linked at tick `t` are skipped.
    pub(crate) fn push_value(&self, node: NodeId, t: Tick, value: &Rc<dyn Any>) {
        let listeners: Vec<NodeId> = {
            let subscribers = self.node_subscribers.borrow();
            match subscribers.get(node) {
                None => Vec::new(),
                Some(subs) => subs
                    .borrow()
                    .iter()
                    .filter(|(_, added)| **added < t)
                    .map(|(id, _)| *id)
                    .collect(),
            }
        };
        for listener in listeners {
            self.dispatch_push(listener, node, t, value);
        }
    }

    pub(crate) fn dispatch_push(
        &self,
        target: NodeId,
        source: NodeId,
        t: Tick,
        value: &Rc<dyn Any>,
    ) {
        match self.dispatch_of(target) {
            Some(Dispatch::Operator(op)) => op.push(self, target, source, t, value),
            Some(Dispatch::Observer(observer)) => observer.push(t, value),
            // a replaced placeholder is a transparent proxy
            Some(Dispatch::Placeholder) => self.publish(target, t, Rc::clone(value)),
            _ => {}
        }
    }

    /// Records (for behaviors) and fans out a freshly produced value. For
    /// futures this is resolution.
    pub(crate) fn publish(&self, node: NodeId, t: Tick, value: Rc<dyn Any>) {
        match self.kind_of(node) {
            None => {}
            Some(ReactiveKind::Future) => self.resolve(node, t, value),
            Some(ReactiveKind::Behavior) => {
                self.set_value(node, Rc::clone(&value));
                self.push_value(node, t, &value);
            }
            Some(ReactiveKind::Stream) => self.push_value(node, t, &value),
        }
    }

    /// Resolves a future: terminal. A second resolution is silently
    /// ignored; parents are unsubscribed and listeners become replay-only.
    pub(crate) fn resolve(&self, node: NodeId, t: Tick, value: Rc<dyn Any>) {
        if self.state_of(node) == NodeState::Done {
            return;
        }
        self.set_value(node, Rc::clone(&value));
        self.set_state(node, NodeState::Done);
        self.push_value(node, t, &value);
        for source in self.sources_of(node) {
            self.remove_listener(source, node);
        }
        self.set_sources(node, Vec::new());
        if let Some(subs) = self.node_subscribers.borrow().get(node) {
            subs.borrow_mut().clear();
        }
    }

    /// External write entry: sinks and producer callbacks come through
    /// here, each invocation opening a fresh tick.
    pub(crate) fn push_external(
        &self,
        node: NodeId,
        value: Rc<dyn Any>,
    ) -> Result<(), ReactiveError> {
        {
            let nodes = self.nodes.borrow();
            let Some(n) = nodes.get(node) else {
                return Err(ReactiveError::Disposed);
            };
            match &n.node_type {
                ReactiveNodeType::Sink => {}
                // a producer callback may outlive the activation that
                // handed it out; pushes while inactive are dropped
                ReactiveNodeType::Producer { .. } => {
                    if n.state == NodeState::Inactive {
                        debug_warn!("dropping a producer push that arrived while inactive");
                        return Ok(());
                    }
                }
                _ => return Err(ReactiveError::IllegalPush),
            }
        }
        self.with_tick(|rt, t| rt.publish(node, t, value));
        Ok(())
    }

    // ------------------------------------------------------------------
    // sampling
    // ------------------------------------------------------------------

    pub(crate) fn sample(&self, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        enum Sampler {
            Value,
            Pull(Rc<dyn Fn() -> Rc<dyn Any>>),
            Op(Rc<dyn AnyOperator>),
            Proxy(Option<NodeId>),
        }
        let sampler = {
            let nodes = self.nodes.borrow();
            let Some(n) = nodes.get(node) else {
                return Err(ReactiveError::Disposed);
            };
            match &n.node_type {
                ReactiveNodeType::Pulled { pull } => Sampler::Pull(Rc::clone(pull)),
                ReactiveNodeType::Operator { op } => Sampler::Op(Rc::clone(op)),
                ReactiveNodeType::Placeholder { source } => Sampler::Proxy(source.get()),
                ReactiveNodeType::Observer { .. } => return Err(ReactiveError::Disposed),
                _ => Sampler::Value,
            }
        };
        match sampler {
            Sampler::Value => self.value_of(node).ok_or(ReactiveError::NotYetPushed),
            Sampler::Pull(pull) => Ok(pull()),
            Sampler::Op(op) => op.sample(self, node, t),
            Sampler::Proxy(Some(source)) => self.sample(source, t),
            Sampler::Proxy(None) => Err(ReactiveError::PlaceholderNotReplaced),
        }
    }

    // ------------------------------------------------------------------
    // state renegotiation
    // ------------------------------------------------------------------

    /// Adopts `new_state` and cascades the change to listeners. Idempotent
    /// when the computed state equals the current one.
    pub(crate) fn change_state_down(&self, node: NodeId, new_state: NodeState) {
        let old = self.state_of(node);
        if old == new_state {
            return;
        }
        self.set_state(node, new_state);
        let listeners: Vec<NodeId> = {
            let subscribers = self.node_subscribers.borrow();
            match subscribers.get(node) {
                None => Vec::new(),
                Some(subs) => subs.borrow().keys().copied().collect(),
            }
        };
        for listener in listeners {
            match self.dispatch_of(listener) {
                Some(Dispatch::Observer(observer)) => observer.state_changed(old, new_state),
                Some(Dispatch::Operator(op)) => {
                    let next = op.state(&self.parent_states(listener));
                    self.change_state_down(listener, next);
                }
                Some(Dispatch::Placeholder) => self.change_state_down(listener, new_state),
                _ => {}
            }
        }
    }

    /// Shared switching engine: detach from `old`, attach to `new`,
    /// renegotiate the node's state. Returns the new inner's state.
    pub(crate) fn swap_inner(
        &self,
        node: NodeId,
        old: Option<NodeId>,
        new: NodeId,
        t: Tick,
    ) -> NodeState {
        if old == Some(new) {
            return self.state_of(new);
        }
        {
            let sources = self.node_sources.borrow();
            if let Some(s) = sources.get(node) {
                let mut s = s.borrow_mut();
                if let Some(old) = old {
                    s.retain(|id| *id != old);
                }
                if !s.contains(&new) {
                    s.push(new);
                }
            }
        }
        if let Some(old) = old {
            self.remove_listener(old, node);
        }
        self.add_listener_quiet(new, node, t);
        if let Some(Dispatch::Operator(op)) = self.dispatch_of(node) {
            let joined = op.state(&self.parent_states(node));
            self.change_state_down(node, joined);
        }
        self.state_of(node)
    }

    pub(crate) fn try_scheduler(&self) -> Option<Rc<dyn Scheduler>> {
        self.scheduler.borrow().clone()
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.scheduler.borrow().clone().expect(
            "timed stream combinators need a platform scheduler; install one \
             with `set_scheduler` before pushing through delay/throttle/debounce",
        )
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tick", &self.tick)
            .field("propagating", &self.propagating)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Runtime {}

slotmap::new_key_type! {
    /// Unique ID assigned to a runtime.
    pub struct RuntimeId;
}

/// Gets the selected runtime from the thread-local set of runtimes.
#[inline(always)]
pub(crate) fn with_runtime<T>(
    id: RuntimeId,
    f: impl FnOnce(&Runtime) -> T,
) -> Result<T, ReactiveError> {
    RUNTIMES.with(|runtimes| {
        let runtimes = runtimes.borrow();
        match runtimes.get(id) {
            None => Err(ReactiveError::RuntimeDisposed),
            Some(runtime) => Ok(f(runtime)),
        }
    })
}

/// The runtime the free constructors build their nodes in: the most
/// recently created one that has not been disposed.
pub(crate) fn current_runtime() -> RuntimeId {
    CURRENT_RUNTIME
        .with(|current| current.get())
        .expect("no reactive runtime has been created on this thread")
}

/// Creates a new reactive [`RuntimeId`] and makes it current for the free
/// constructors (`create_stream`, `create_behavior`, …).
#[must_use = "Runtime will leak memory if Runtime::dispose() is never called."]
pub fn create_runtime() -> RuntimeId {
    let id = RUNTIMES.with(|runtimes| {
        runtimes.borrow_mut().insert_with_key(|id| {
            let runtime = Runtime::new();
            runtime.id.set(id);
            runtime
        })
    });
    CURRENT_RUNTIME.with(|current| current.set(Some(id)));
    id
}

impl RuntimeId {
    pub(crate) fn create_reactive_node(
        self,
        kind: ReactiveKind,
        state: NodeState,
        value: Option<Rc<dyn Any>>,
        always_active: bool,
        node_type: ReactiveNodeType,
        sources: Vec<NodeId>,
    ) -> NodeId {
        with_runtime(self, |rt| {
            let id = rt.create_node(ReactiveNode {
                kind,
                state,
                value,
                always_active,
                node_type,
            });
            rt.set_sources(id, sources);
            id
        })
        .expect("tried to create a reactive node in a runtime that has been disposed")
    }

    /// Removes the runtime and every node it owns. Producer deactivators
    /// that are still armed run during teardown.
    pub fn dispose(self) {
        let runtime = RUNTIMES.with(move |runtimes| runtimes.borrow_mut().remove(self));
        let Some(runtime) = runtime else {
            debug_warn!("tried to dispose a runtime that was already disposed");
            return;
        };
        CURRENT_RUNTIME.with(|current| {
            if current.get() == Some(self) {
                current.set(None);
            }
        });
        let deactivators: Vec<Box<dyn FnOnce()>> = {
            let nodes = runtime.nodes.borrow();
            nodes
                .iter()
                .filter_map(|(_, node)| match &node.node_type {
                    ReactiveNodeType::Producer { deactivate, .. } => deactivate.borrow_mut().take(),
                    _ => None,
                })
                .collect()
        };
        for deactivator in deactivators {
            deactivator();
        }
        drop(runtime);
    }
}

/// Installs the platform scheduler used by the timed stream combinators
/// (`delay`, `throttle`, `debounce`) of the current runtime.
pub fn set_scheduler(scheduler: Rc<dyn Scheduler>) {
    let runtime = current_runtime();
    _ = with_runtime(runtime, |rt| {
        *rt.scheduler.borrow_mut() = Some(scheduler);
    });
}
