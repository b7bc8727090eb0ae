#![forbid(unsafe_code)]
use crate::{
    behavior::Behavior,
    diagnostics::diagnostics,
    future::Future,
    node::{AnyObserver, NodeId, NodeState, ReactiveKind, ReactiveNode, ReactiveNodeType},
    runtime::{with_runtime, Runtime, RuntimeId, Tick},
    stream::Stream,
};
use std::{any::Any, cell::Cell, rc::Rc};

/// Handle for an external observer; [`deactivate`](Subscription::deactivate)
/// removes it, releasing upstream subscriptions that are no longer
/// observed.
#[derive(Debug)]
pub struct Subscription {
    runtime: RuntimeId,
    target: NodeId,
    observer: NodeId,
}

impl Subscription {
    /// Removes the observer from the graph. O(1); any subgraph that loses
    /// its last observer unsubscribes from its parents.
    pub fn deactivate(self) {
        _ = with_runtime(self.runtime, |rt| {
            rt.remove_listener(self.target, self.observer);
            rt.dispose_node(self.observer);
        });
    }
}

struct FnObserver {
    on_push: Box<dyn Fn(&Rc<dyn Any>)>,
    begin_pulling: Box<dyn Fn()>,
    end_pulling: Box<dyn Fn()>,
    pulling: Cell<bool>,
}

impl AnyObserver for FnObserver {
    fn push(&self, _t: Tick, value: &Rc<dyn Any>) {
        (self.on_push)(value)
    }

    fn state_changed(&self, _old: NodeState, new: NodeState) {
        let pulling = new.is_pulling();
        if pulling && !self.pulling.get() {
            self.pulling.set(true);
            (self.begin_pulling)();
        } else if !pulling && self.pulling.get() {
            self.pulling.set(false);
            (self.end_pulling)();
        }
    }
}

fn attach_observer(
    rt: &Runtime,
    runtime: RuntimeId,
    target: NodeId,
    kind: ReactiveKind,
    observer: Rc<FnObserver>,
    initial_sample: bool,
) -> Subscription {
    let id = rt.create_node(ReactiveNode {
        kind,
        state: NodeState::Push,
        value: None,
        always_active: false,
        node_type: ReactiveNodeType::Observer {
            observer: Rc::clone(&observer) as Rc<dyn AnyObserver>,
        },
    });
    // subscription is an external entry: the initial delivery from a push
    // behavior (or resolved future) lands on a fresh tick
    let state = rt.with_tick(|rt, t| {
        let state = rt.add_listener(target, id, t);
        if state.is_pulling() && initial_sample {
            if let Ok(value) = rt.sample(target, t) {
                observer.push(t, &value);
            }
        }
        state
    });
    // arm the pulling hooks to the state found at subscribe time
    observer.state_changed(NodeState::Push, state);
    Subscription {
        runtime,
        target,
        observer: id,
    }
}

impl<T> Stream<T>
where
    T: Clone + 'static,
{
    /// Calls `callback` with every occurrence, starting with the next
    /// tick. Returns the subscription handle.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "Stream::subscribe()",
            skip_all,
            fields(
                id = ?self.id,
                defined_at = %self.defined_at
            )
        )
    )]
    #[track_caller]
    pub fn subscribe(&self, callback: impl Fn(T) + 'static) -> Subscription {
        let diagnostics = diagnostics!(self);
        let observer = Rc::new(FnObserver {
            on_push: Box::new(move |value| {
                let value = value
                    .downcast_ref::<T>()
                    .expect("observed value of unexpected type");
                callback(value.clone())
            }),
            begin_pulling: Box::new(|| {}),
            end_pulling: Box::new(|| {}),
            pulling: Cell::new(false),
        });
        with_runtime(self.runtime, |rt| {
            attach_observer(rt, self.runtime, self.id, ReactiveKind::Stream, observer, false)
        })
        .unwrap_or_else(|e| panic!("failed to subscribe: {e}{}", diagnostics.context()))
    }
}

impl<T> Behavior<T>
where
    T: Clone + 'static,
{
    /// Calls `callback` with the behavior's current value and with every
    /// subsequent push.
    ///
    /// A behavior in pull state delivers one initial sample and then goes
    /// quiet; use [`observe`](Behavior::observe) to be told when pulling
    /// is required, or [`at`](Behavior::at) to poll.
    #[track_caller]
    pub fn subscribe(&self, callback: impl Fn(T) + 'static) -> Subscription {
        self.observe(callback, || {}, || {})
    }

    /// Full boundary observer: `on_push` receives pushed values,
    /// `begin_pulling` fires when the behavior transitions into pull
    /// state (the observer must sample from then on), `end_pulling` when
    /// it returns to push.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "Behavior::observe()",
            skip_all,
            fields(
                id = ?self.id,
                defined_at = %self.defined_at
            )
        )
    )]
    #[track_caller]
    pub fn observe(
        &self,
        on_push: impl Fn(T) + 'static,
        begin_pulling: impl Fn() + 'static,
        end_pulling: impl Fn() + 'static,
    ) -> Subscription {
        let diagnostics = diagnostics!(self);
        let observer = Rc::new(FnObserver {
            on_push: Box::new(move |value| {
                let value = value
                    .downcast_ref::<T>()
                    .expect("observed value of unexpected type");
                on_push(value.clone())
            }),
            begin_pulling: Box::new(begin_pulling),
            end_pulling: Box::new(end_pulling),
            pulling: Cell::new(false),
        });
        with_runtime(self.runtime, |rt| {
            attach_observer(rt, self.runtime, self.id, ReactiveKind::Behavior, observer, true)
        })
        .unwrap_or_else(|e| panic!("failed to subscribe: {e}{}", diagnostics.context()))
    }
}

impl<T> Future<T>
where
    T: Clone + 'static,
{
    /// Calls `callback` with the resolution value. A future that is
    /// already resolved fires the callback during this call.
    #[track_caller]
    pub fn subscribe(&self, callback: impl Fn(T) + 'static) -> Subscription {
        let diagnostics = diagnostics!(self);
        let observer = Rc::new(FnObserver {
            on_push: Box::new(move |value| {
                let value = value
                    .downcast_ref::<T>()
                    .expect("observed value of unexpected type");
                callback(value.clone())
            }),
            begin_pulling: Box::new(|| {}),
            end_pulling: Box::new(|| {}),
            pulling: Cell::new(false),
        });
        with_runtime(self.runtime, |rt| {
            attach_observer(rt, self.runtime, self.id, ReactiveKind::Future, observer, false)
        })
        .unwrap_or_else(|e| panic!("failed to subscribe: {e}{}", diagnostics.context()))
    }
}
