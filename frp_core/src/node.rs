use crate::runtime::{ReactiveError, Runtime, RuntimeId, Tick};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    rc::Rc,
};

slotmap::new_key_type! {
    /// Unique ID assigned to a node of the reactive graph.
    pub struct NodeId;
}

/// The kind of reactive a node (or handle) represents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReactiveKind {
    /// A discrete event stream.
    Stream,
    /// A time-varying value.
    Behavior,
    /// An at-most-once occurrence.
    Future,
}

/// Propagation state of a node.
///
/// The `Ord` derive gives the join used when a node combines several
/// parents: the joined state is the maximum of the parent states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum NodeState {
    /// No listeners; not subscribed to parents.
    Inactive,
    /// Parents notify this node; values flow downward synchronously.
    Push,
    /// Values are produced on demand through `sample`.
    Pull,
    /// Pull, and can never transition to push.
    OnlyPull,
    /// Terminal. Futures enter `Done` on resolution.
    Done,
}

impl NodeState {
    pub fn join(states: &[NodeState]) -> NodeState {
        states.iter().copied().max().unwrap_or(NodeState::OnlyPull)
    }

    pub fn is_pulling(self) -> bool {
        matches!(self, NodeState::Pull | NodeState::OnlyPull)
    }
}

pub(crate) struct ReactiveNode {
    pub kind: ReactiveKind,
    pub state: NodeState,
    /// The behavior's most recent value, or a future's resolution.
    pub value: Option<Rc<dyn Any>>,
    /// Roots (sinks, sample-minted accumulators) never deactivate.
    pub always_active: bool,
    pub node_type: ReactiveNodeType,
}

pub(crate) enum ReactiveNodeType {
    /// Externally written root: stream sink, behavior sink, future sink.
    Sink,
    /// A value fixed at construction (`Behavior::of`, `Future::of`).
    Constant,
    /// Sampled through a user function (`Behavior::from_function`).
    Pulled { pull: Rc<dyn Fn() -> Rc<dyn Any>> },
    /// Wraps an external push source. The activation closure runs on the
    /// 0→1 listener edge and returns the deactivator for the 1→0 edge.
    Producer {
        activate: Rc<dyn Fn(RuntimeId, NodeId) -> Box<dyn FnOnce()>>,
        deactivate: RefCell<Option<Box<dyn FnOnce()>>>,
    },
    /// A combinator node carrying its own push/pull dispatch.
    Operator { op: Rc<dyn AnyOperator> },
    /// Boundary observer (subscribe/observe facade).
    Observer { observer: Rc<dyn AnyObserver> },
    /// Deferred reactive; `source` is bound by `replace_with`.
    Placeholder { source: Cell<Option<NodeId>> },
}

/// Type-erased dispatch for combinator nodes.
///
/// Implementations hold the typed transform and downcast the erased
/// values flowing through the graph.
pub(crate) trait AnyOperator {
    /// The node's state given its parents' states, while it has listeners.
    fn state(&self, parent_states: &[NodeState]) -> NodeState;

    /// A parent pushed `value` at tick `t`.
    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>);

    /// Sample the node's current value. Behaviors only.
    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        let _ = t;
        rt.value_of(node).ok_or(ReactiveError::NotYetPushed)
    }

    /// Runs right after the node has subscribed to its parents.
    fn activated(&self, rt: &Runtime, node: NodeId, t: Tick) {
        let _ = (rt, node, t);
    }

    /// Runs after the node has unsubscribed from its parents.
    fn deactivated(&self, rt: &Runtime, node: NodeId) {
        let _ = (rt, node);
    }
}

/// Boundary observers receive pushes and push/pull mode changes.
pub(crate) trait AnyObserver {
    fn push(&self, t: Tick, value: &Rc<dyn Any>);
    fn state_changed(&self, old: NodeState, new: NodeState);
}

/// Structural view over any reactive handle.
///
/// This is the dynamic counterpart of the typed [`Stream`](crate::Stream),
/// [`Behavior`](crate::Behavior) and [`Future`](crate::Future) handles; it
/// exists so heterogeneous collections of reactives can be inspected.
pub trait Reactive {
    /// The graph node this handle points at.
    fn node_id(&self) -> NodeId;
    /// The runtime owning the node.
    fn runtime_id(&self) -> RuntimeId;
    /// Which reactive kind the handle represents.
    fn kind(&self) -> ReactiveKind;
}

/// Whether the reactive is a discrete event stream.
pub fn is_stream(reactive: &dyn Reactive) -> bool {
    reactive.kind() == ReactiveKind::Stream
}

/// Whether the reactive is a time-varying value.
pub fn is_behavior(reactive: &dyn Reactive) -> bool {
    reactive.kind() == ReactiveKind::Behavior
}

/// Whether the reactive is an at-most-once occurrence.
pub fn is_future(reactive: &dyn Reactive) -> bool {
    reactive.kind() == ReactiveKind::Future
}
