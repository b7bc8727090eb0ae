#![forbid(unsafe_code)]
use crate::{
    diagnostics::diagnostics,
    macros::debug_warn,
    node::{AnyOperator, NodeId, NodeState, Reactive, ReactiveKind, ReactiveNodeType},
    runtime::{
        current_runtime, with_runtime, PinnedFuture, ReactiveError, Runtime, RuntimeId, Tick,
    },
    behavior::Behavior,
    stream::{CombineStream, MapStream, MapToStream, Stream},
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt::Debug,
    marker::PhantomData,
    rc::Rc,
};

/// An at-most-once occurrence: a reactive that resolves with a single
/// value and is terminal afterwards.
///
/// Once resolved the future is `Done`: parents are unsubscribed and any
/// listener added later is fired immediately with the stored value.
pub struct Future<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

/// The write half of a sink future.
pub struct FutureResolver<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

/// Creates a sink future, resolved from the outside exactly once.
/// Resolving again is silently ignored.
#[cfg_attr(
    debug_assertions,
    instrument(
        level = "trace",
        skip_all,
        fields(ty = %std::any::type_name::<T>())
    )
)]
#[track_caller]
pub fn create_future<T>() -> (Future<T>, FutureResolver<T>) {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Future,
        NodeState::Push,
        None,
        true,
        ReactiveNodeType::Sink,
        Vec::new(),
    );
    (
        Future {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
        FutureResolver {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
    )
}

/// Bridges a host task into the graph: the returned reactive future
/// resolves when the task completes. The driver future does the actual
/// work; the embedder must spawn it on its single-threaded executor.
/// Completion re-enters the runtime as a fresh tick.
#[track_caller]
pub fn future_from_async<T, Fut>(task: Fut) -> (Future<T>, PinnedFuture<()>)
where
    T: 'static,
    Fut: std::future::Future<Output = T> + 'static,
{
    let (future, resolver) = create_future::<T>();
    let driver = Box::pin(async move {
        let value = task.await;
        if resolver.try_resolve(value).is_err() {
            debug_warn!("async bridge completed after its runtime was disposed");
        }
    });
    (future, driver)
}

/// Like [`future_from_async`], for fallible tasks. A task that fails
/// leaves the future permanently unresolved; the error is swallowed, so
/// embedders that care about it should route it before bridging.
#[track_caller]
pub fn try_future_from_async<T, E, Fut>(task: Fut) -> (Future<T>, PinnedFuture<()>)
where
    T: 'static,
    E: 'static,
    Fut: std::future::Future<Output = Result<T, E>> + 'static,
{
    let (future, resolver) = create_future::<T>();
    let driver = Box::pin(async move {
        if let Ok(value) = task.await {
            if resolver.try_resolve(value).is_err() {
                debug_warn!("async bridge completed after its runtime was disposed");
            }
        }
    });
    (future, driver)
}

impl<T> FutureResolver<T> {
    /// Resolves the future, panicking if the runtime has been disposed.
    /// Resolving an already-resolved future changes nothing.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "FutureResolver::resolve()",
            skip_all,
            fields(
                id = ?self.id,
                defined_at = %self.defined_at
            )
        )
    )]
    #[track_caller]
    pub fn resolve(&self, value: T) {
        let diagnostics = diagnostics!(self);
        self.try_resolve(value)
            .unwrap_or_else(|e| panic!("failed to resolve future: {e}{}", diagnostics.context()))
    }

    /// Resolves the future.
    pub fn try_resolve(&self, value: T) -> Result<(), ReactiveError> {
        with_runtime(self.runtime, |rt| {
            rt.push_external(self.id, Rc::new(value))
        })
        .and_then(|r| r)
    }
}

impl<T> Future<T> {
    #[track_caller]
    pub(crate) fn from_parts(runtime: RuntimeId, id: NodeId) -> Self {
        Future {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        }
    }

    #[track_caller]
    pub(crate) fn operator(
        runtime: RuntimeId,
        op: Rc<dyn AnyOperator>,
        sources: Vec<NodeId>,
    ) -> Self {
        let id = runtime.create_reactive_node(
            ReactiveKind::Future,
            NodeState::Inactive,
            None,
            false,
            ReactiveNodeType::Operator { op },
            sources,
        );
        Self::from_parts(runtime, id)
    }

    /// A future already resolved with `value`.
    #[track_caller]
    pub fn of(value: T) -> Future<T> {
        let runtime = current_runtime();
        let id = runtime.create_reactive_node(
            ReactiveKind::Future,
            NodeState::Done,
            Some(Rc::new(value)),
            true,
            ReactiveNodeType::Constant,
            Vec::new(),
        );
        Self::from_parts(runtime, id)
    }

    /// A future that never resolves.
    #[track_caller]
    pub fn never() -> Future<T> {
        let runtime = current_runtime();
        let id = runtime.create_reactive_node(
            ReactiveKind::Future,
            NodeState::Done,
            None,
            true,
            ReactiveNodeType::Constant,
            Vec::new(),
        );
        Self::from_parts(runtime, id)
    }

    /// Transforms the resolution value with `f`.
    #[track_caller]
    pub fn map<B, F>(&self, f: F) -> Future<B>
    where
        B: 'static,
        F: Fn(&T) -> B + 'static,
    {
        Future::operator(
            self.runtime,
            Rc::new(MapStream {
                f,
                ty: PhantomData::<(T, B)>,
            }),
            vec![self.id],
        )
    }

    /// Resolves with `value` when this future resolves.
    #[track_caller]
    pub fn map_to<B>(&self, value: B) -> Future<B>
    where
        B: 'static,
    {
        let value: Rc<dyn Any> = Rc::new(value);
        Future::operator(self.runtime, Rc::new(MapToStream { value }), vec![self.id])
    }

    /// Resolves with whichever of the two resolves first; both parents
    /// are unsubscribed at that point.
    #[track_caller]
    pub fn combine(&self, other: &Future<T>) -> Future<T> {
        Future::operator(
            self.runtime,
            Rc::new(CombineStream),
            vec![self.id, other.id],
        )
    }

    /// Two-stage sequencing: when this future resolves, `f` picks the
    /// follow-up future, and the result resolves when that one does.
    #[track_caller]
    pub fn flat_map<B, F>(&self, f: F) -> Future<B>
    where
        B: 'static,
        F: Fn(&T) -> Future<B> + 'static,
    {
        Future::operator(
            self.runtime,
            Rc::new(FlatMapFuture {
                outer: self.id,
                inner: Cell::new(None),
                f,
                ty: PhantomData::<(T, B)>,
            }),
            vec![self.id],
        )
    }

    /// Resolves with `f` over both values once both futures have
    /// resolved.
    #[track_caller]
    pub fn lift2<B, C, F>(f: F, a: &Future<T>, b: &Future<B>) -> Future<C>
    where
        B: 'static,
        C: 'static,
        F: Fn(&T, &B) -> C + 'static,
    {
        let combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>> = Rc::new(move |values| {
            let a = values[0]
                .downcast_ref::<T>()
                .expect("future value of unexpected type");
            let b = values[1]
                .downcast_ref::<B>()
                .expect("future value of unexpected type");
            Rc::new(f(a, b))
        });
        Future::operator(
            a.runtime,
            Rc::new(LiftFuture {
                combine,
                values: RefCell::new(vec![None, None]),
            }),
            vec![a.id, b.id],
        )
    }

    /// Resolves with `f` over all three values once all three futures
    /// have resolved.
    #[track_caller]
    pub fn lift3<B, C, D, F>(f: F, a: &Future<T>, b: &Future<B>, c: &Future<C>) -> Future<D>
    where
        B: 'static,
        C: 'static,
        D: 'static,
        F: Fn(&T, &B, &C) -> D + 'static,
    {
        let combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>> = Rc::new(move |values| {
            let a = values[0]
                .downcast_ref::<T>()
                .expect("future value of unexpected type");
            let b = values[1]
                .downcast_ref::<B>()
                .expect("future value of unexpected type");
            let c = values[2]
                .downcast_ref::<C>()
                .expect("future value of unexpected type");
            Rc::new(f(a, b, c))
        });
        Future::operator(
            a.runtime,
            Rc::new(LiftFuture {
                combine,
                values: RefCell::new(vec![None, None, None]),
            }),
            vec![a.id, b.id, c.id],
        )
    }
}

impl<T> Stream<T> {
    /// A behavior of futures: each sample yields a future that resolves
    /// on the first occurrence strictly after the sample point.
    #[track_caller]
    pub fn next_occurrence(&self) -> Behavior<Future<T>> {
        Behavior::operator(
            self.runtime,
            Rc::new(NextOccurrenceBehavior {
                runtime: self.runtime,
                stream: self.id,
                ty: PhantomData::<T>,
            }),
            Vec::new(),
        )
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Future<T> {}

impl<T> Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").field("id", &self.id).finish()
    }
}

impl<T> PartialEq for Future<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T> Eq for Future<T> {}

impl<T> Reactive for Future<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn runtime_id(&self) -> RuntimeId {
        self.runtime
    }

    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Future
    }
}

impl<T> Clone for FutureResolver<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FutureResolver<T> {}

// ----------------------------------------------------------------------
// operators
// ----------------------------------------------------------------------

struct LiftFuture {
    combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>>,
    values: RefCell<Vec<Option<Rc<dyn Any>>>>,
}

impl AnyOperator for LiftFuture {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        let resolved = {
            let sources = rt.sources_of(node);
            let Some(index) = sources.iter().position(|s| *s == source) else {
                return;
            };
            let mut values = self.values.borrow_mut();
            values[index] = Some(Rc::clone(value));
            if values.iter().all(|v| v.is_some()) {
                let values: Vec<Rc<dyn Any>> =
                    values.iter().map(|v| v.clone().unwrap()).collect();
                Some((self.combine)(&values))
            } else {
                None
            }
        };
        if let Some(value) = resolved {
            rt.resolve(node, t, value);
        }
    }
}

struct FlatMapFuture<A, B, F>
where
    F: Fn(&A) -> Future<B>,
    B: 'static,
{
    outer: NodeId,
    inner: Cell<Option<NodeId>>,
    f: F,
    ty: PhantomData<(A, B)>,
}

impl<A, B, F> AnyOperator for FlatMapFuture<A, B, F>
where
    A: 'static,
    B: 'static,
    F: Fn(&A) -> Future<B> + 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if source == self.outer && self.inner.get().is_none() {
            let outer = value
                .downcast_ref::<A>()
                .expect("future value of unexpected type");
            let inner = (self.f)(outer);
            self.inner.set(Some(inner.id));
            rt.swap_inner(node, Some(self.outer), inner.id, t);
            // the follow-up may already be resolved
            if rt.state_of(inner.id) == NodeState::Done {
                if let Some(value) = rt.value_of(inner.id) {
                    rt.resolve(node, t, value);
                }
            }
        } else if Some(source) == self.inner.get() {
            rt.resolve(node, t, Rc::clone(value));
        }
    }
}

struct NextOccurrenceBehavior<A> {
    runtime: RuntimeId,
    stream: NodeId,
    ty: PhantomData<A>,
}

impl<A> AnyOperator for NextOccurrenceBehavior<A>
where
    A: 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Pull
    }

    fn push(&self, _rt: &Runtime, _node: NodeId, _source: NodeId, _t: Tick, _value: &Rc<dyn Any>) {}

    fn sample(&self, rt: &Runtime, _node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        // mint a future wired to occurrences strictly after this sample
        let future = self.runtime.create_reactive_node(
            ReactiveKind::Future,
            NodeState::Push,
            None,
            true,
            ReactiveNodeType::Operator {
                op: Rc::new(NextOccurrenceFuture { after: t }),
            },
            vec![self.stream],
        );
        rt.add_listener_quiet(self.stream, future, t);
        Ok(Rc::new(Future::<A>::from_parts(self.runtime, future)))
    }
}

struct NextOccurrenceFuture {
    after: Tick,
}

impl AnyOperator for NextOccurrenceFuture {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if t > self.after {
            rt.resolve(node, t, Rc::clone(value));
        }
    }
}
