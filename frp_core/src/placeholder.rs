#![forbid(unsafe_code)]
use crate::{
    behavior::Behavior,
    node::{NodeId, NodeState, Reactive, ReactiveKind, ReactiveNodeType},
    runtime::{current_runtime, with_runtime, ReactiveError, Runtime, RuntimeId},
    stream::Stream,
};
use std::{cell::Cell, fmt::Debug};

/// A deferred stream: usable in combinators immediately, bound to its
/// concrete source later with [`replace_with`](StreamPlaceholder::replace_with).
///
/// Placeholders are how cyclic networks are built: the cycle is broken at
/// construction and closed at replacement.
///
/// ```
/// # use frp_core::*;
/// # use std::{cell::RefCell, rc::Rc};
/// let runtime = create_runtime();
/// let (events, sink) = create_stream::<u32>();
///
/// // a counter that depends on its own history
/// let count = create_stream_placeholder::<u32>();
/// let total = count.stream().stepper(0);
/// let next = events.snapshot_with(|_, acc| acc + 1, &total);
/// count.replace_with(&next);
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let _sub = next.subscribe({
///     let seen = Rc::clone(&seen);
///     move |n| seen.borrow_mut().push(n)
/// });
/// sink.push(7);
/// sink.push(7);
/// sink.push(7);
/// assert_eq!(*seen.borrow(), vec![1, 2, 3]);
/// runtime.dispose();
/// ```
pub struct StreamPlaceholder<T>
where
    T: 'static,
{
    inner: Stream<T>,
}

/// A deferred behavior. Sampling it before replacement is a
/// [`ReactiveError::PlaceholderNotReplaced`] error.
pub struct BehaviorPlaceholder<T>
where
    T: 'static,
{
    inner: Behavior<T>,
}

/// Creates a stream placeholder.
#[track_caller]
pub fn create_stream_placeholder<T>() -> StreamPlaceholder<T> {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Stream,
        NodeState::Inactive,
        None,
        false,
        ReactiveNodeType::Placeholder {
            source: Cell::new(None),
        },
        Vec::new(),
    );
    StreamPlaceholder {
        inner: Stream::from_parts(runtime, id),
    }
}

/// Creates a behavior placeholder.
#[track_caller]
pub fn create_behavior_placeholder<T>() -> BehaviorPlaceholder<T> {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Behavior,
        NodeState::Inactive,
        None,
        false,
        ReactiveNodeType::Placeholder {
            source: Cell::new(None),
        },
        Vec::new(),
    );
    BehaviorPlaceholder {
        inner: Behavior::from_parts(runtime, id),
    }
}

impl<T> StreamPlaceholder<T> {
    /// The placeholder viewed as a stream; every combinator accepts it.
    pub fn stream(&self) -> Stream<T> {
        self.inner
    }

    /// Binds the placeholder to its concrete source. Replacing twice is a
    /// programming error.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "StreamPlaceholder::replace_with()",
            skip_all,
            fields(id = ?self.inner.id)
        )
    )]
    #[track_caller]
    pub fn replace_with(&self, source: &Stream<T>) {
        self.try_replace_with(source)
            .unwrap_or_else(|e| panic!("failed to replace placeholder: {e}"))
    }

    /// Binds the placeholder to its concrete source.
    pub fn try_replace_with(&self, source: &Stream<T>) -> Result<(), ReactiveError> {
        with_runtime(self.inner.runtime, |rt| {
            replace(rt, self.inner.id, source.id)
        })
        .and_then(|r| r)
    }
}

impl<T> BehaviorPlaceholder<T> {
    /// The placeholder viewed as a behavior; every combinator accepts it.
    pub fn behavior(&self) -> Behavior<T> {
        self.inner
    }

    /// Binds the placeholder to its concrete source. If the source is a
    /// push behavior, its current value immediately flows to everything
    /// observing the placeholder. Replacing twice is a programming error.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "BehaviorPlaceholder::replace_with()",
            skip_all,
            fields(id = ?self.inner.id)
        )
    )]
    #[track_caller]
    pub fn replace_with(&self, source: &Behavior<T>) {
        self.try_replace_with(source)
            .unwrap_or_else(|e| panic!("failed to replace placeholder: {e}"))
    }

    /// Binds the placeholder to its concrete source.
    pub fn try_replace_with(&self, source: &Behavior<T>) -> Result<(), ReactiveError> {
        with_runtime(self.inner.runtime, |rt| {
            replace(rt, self.inner.id, source.id)
        })
        .and_then(|r| r)
    }
}

fn replace(rt: &Runtime, placeholder: NodeId, source: NodeId) -> Result<(), ReactiveError> {
    {
        let nodes = rt.nodes.borrow();
        let Some(node) = nodes.get(placeholder) else {
            return Err(ReactiveError::Disposed);
        };
        match &node.node_type {
            ReactiveNodeType::Placeholder { source: slot } => {
                if slot.get().is_some() {
                    return Err(ReactiveError::AlreadyReplaced);
                }
                slot.set(Some(source));
            }
            _ => return Err(ReactiveError::Disposed),
        }
    }
    rt.set_sources(placeholder, vec![source]);
    if rt.has_listeners(placeholder) {
        rt.with_tick(|rt, t| {
            let source_state = rt.add_listener_quiet(source, placeholder, t);
            rt.change_state_down(placeholder, source_state);
            // a push source surfaces its current value through the proxy
            if source_state == NodeState::Push
                && rt.kind_of(placeholder) == Some(ReactiveKind::Behavior)
            {
                if let Some(value) = rt.value_of(source) {
                    rt.publish(placeholder, t, value);
                }
            }
        });
    }
    Ok(())
}

impl<T> Clone for StreamPlaceholder<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StreamPlaceholder<T> {}

impl<T> Debug for StreamPlaceholder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPlaceholder")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl<T> Clone for BehaviorPlaceholder<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BehaviorPlaceholder<T> {}

impl<T> Debug for BehaviorPlaceholder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorPlaceholder")
            .field("id", &self.inner.id)
            .finish()
    }
}

impl<T> Reactive for StreamPlaceholder<T> {
    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn runtime_id(&self) -> RuntimeId {
        self.inner.runtime
    }

    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Stream
    }
}

impl<T> Reactive for BehaviorPlaceholder<T> {
    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn runtime_id(&self) -> RuntimeId {
        self.inner.runtime
    }

    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Behavior
    }
}
