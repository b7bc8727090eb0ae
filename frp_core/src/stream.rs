#![forbid(unsafe_code)]
use crate::{
    behavior::Behavior,
    diagnostics::diagnostics,
    macros::debug_warn,
    node::{AnyOperator, NodeId, NodeState, Reactive, ReactiveKind, ReactiveNodeType},
    observe::Subscription,
    runtime::{current_runtime, with_runtime, ReactiveError, Runtime, RuntimeId, Tick},
    scheduler::TimerId,
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt::Debug,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    time::Duration,
};

/// A discrete event stream: a reactive that fires zero or more values
/// over time and stores no current value.
///
/// `Stream` is a cheap `Copy` handle into its runtime's graph. A stream
/// subscribes to its parents only while it has at least one listener of
/// its own, so idle combinator chains cost nothing.
pub struct Stream<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

/// The write half of a sink stream: pushes occurrences into the graph.
///
/// Each `push` opens a fresh tick and propagates depth-first through
/// every active listener before returning.
pub struct StreamSink<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

/// Push callback handed to a producer's activation closure.
pub struct ProducerHandle<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
}

/// Creates a sink stream: the read half is the stream itself, the write
/// half pushes occurrences from the outside world.
///
/// ```
/// # use frp_core::*;
/// # use std::{cell::RefCell, rc::Rc};
/// let runtime = create_runtime();
/// let (stream, sink) = create_stream::<i32>();
/// let doubled = stream.map(|n| n * 2);
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let _sub = doubled.subscribe({
///     let seen = Rc::clone(&seen);
///     move |n| seen.borrow_mut().push(n)
/// });
///
/// sink.push(3);
/// sink.push(5);
/// assert_eq!(*seen.borrow(), vec![6, 10]);
/// runtime.dispose();
/// ```
#[cfg_attr(
    debug_assertions,
    instrument(
        level = "trace",
        skip_all,
        fields(ty = %std::any::type_name::<T>())
    )
)]
#[track_caller]
pub fn create_stream<T>() -> (Stream<T>, StreamSink<T>) {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Stream,
        NodeState::Push,
        None,
        true,
        ReactiveNodeType::Sink,
        Vec::new(),
    );
    (
        Stream {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
        StreamSink {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
    )
}

/// Creates a stream fed by an external push source.
///
/// `activate` runs when the stream gains its first listener; it receives
/// the push callback and returns the deactivator that runs when the last
/// listener goes away. The two are never nested.
#[cfg_attr(
    debug_assertions,
    instrument(
        level = "trace",
        skip_all,
        fields(ty = %std::any::type_name::<T>())
    )
)]
#[track_caller]
pub fn create_stream_producer<T>(
    activate: impl Fn(ProducerHandle<T>) -> Box<dyn FnOnce()> + 'static,
) -> Stream<T> {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Stream,
        NodeState::Inactive,
        None,
        false,
        ReactiveNodeType::Producer {
            activate: Rc::new(move |runtime, id| {
                activate(ProducerHandle {
                    runtime,
                    id,
                    ty: PhantomData,
                })
            }),
            deactivate: RefCell::new(None),
        },
        Vec::new(),
    );
    Stream {
        runtime,
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at: std::panic::Location::caller(),
    }
}

impl<T> StreamSink<T> {
    /// Pushes an occurrence into the graph, panicking if the runtime has
    /// been disposed.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "StreamSink::push()",
            skip_all,
            fields(
                id = ?self.id,
                defined_at = %self.defined_at
            )
        )
    )]
    #[track_caller]
    pub fn push(&self, value: T) {
        let diagnostics = diagnostics!(self);
        self.try_push(value)
            .unwrap_or_else(|e| panic!("failed to push into stream: {e}{}", diagnostics.context()))
    }

    /// Pushes an occurrence into the graph.
    pub fn try_push(&self, value: T) -> Result<(), ReactiveError> {
        with_runtime(self.runtime, |rt| {
            rt.push_external(self.id, Rc::new(value))
        })
        .and_then(|r| r)
    }
}

impl<T> ProducerHandle<T> {
    /// Pushes a value from the external source. Pushes that arrive while
    /// the producer is inactive are dropped.
    pub fn push(&self, value: T) {
        let pushed = with_runtime(self.runtime, |rt| {
            rt.push_external(self.id, Rc::new(value))
        });
        if pushed.is_err() {
            debug_warn!("producer push ignored: runtime disposed");
        }
    }
}

impl<T> Stream<T> {
    #[track_caller]
    pub(crate) fn from_parts(runtime: RuntimeId, id: NodeId) -> Self {
        Stream {
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
            ReactiveKind::Stream,
            NodeState::Inactive,
            None,
            false,
            ReactiveNodeType::Operator { op },
            sources,
        );
        Self::from_parts(runtime, id)
    }

    /// A stream that never fires.
    #[track_caller]
    pub fn empty() -> Stream<T> {
        let runtime = current_runtime();
        let id = runtime.create_reactive_node(
            ReactiveKind::Stream,
            NodeState::Push,
            None,
            true,
            ReactiveNodeType::Constant,
            Vec::new(),
        );
        Self::from_parts(runtime, id)
    }

    /// Transforms every occurrence with `f`.
    #[track_caller]
    pub fn map<B, F>(&self, f: F) -> Stream<B>
    where
        B: 'static,
        F: Fn(&T) -> B + 'static,
    {
        Stream::operator(
            self.runtime,
            Rc::new(MapStream {
                f,
                ty: PhantomData::<(T, B)>,
            }),
            vec![self.id],
        )
    }

    /// Replaces every occurrence with `value`.
    #[track_caller]
    pub fn map_to<B>(&self, value: B) -> Stream<B>
    where
        B: 'static,
    {
        let value: Rc<dyn Any> = Rc::new(value);
        Stream::operator(
            self.runtime,
            Rc::new(MapToStream { value }),
            vec![self.id],
        )
    }

    /// Keeps the occurrences satisfying `predicate`.
    #[track_caller]
    pub fn filter<P>(&self, predicate: P) -> Stream<T>
    where
        P: Fn(&T) -> bool + 'static,
    {
        Stream::operator(
            self.runtime,
            Rc::new(FilterStream {
                predicate: Rc::new(predicate),
                expect: true,
                ty: PhantomData::<T>,
            }),
            vec![self.id],
        )
    }

    /// Splits the stream on `predicate`: the first result fires for
    /// matching occurrences, the second for the rest.
    #[track_caller]
    pub fn split<P>(&self, predicate: P) -> (Stream<T>, Stream<T>)
    where
        P: Fn(&T) -> bool + 'static,
    {
        let predicate = Rc::new(predicate);
        let matching = Stream::operator(
            self.runtime,
            Rc::new(FilterStream {
                predicate: Rc::clone(&predicate),
                expect: true,
                ty: PhantomData::<T>,
            }),
            vec![self.id],
        );
        let rest = Stream::operator(
            self.runtime,
            Rc::new(FilterStream {
                predicate,
                expect: false,
                ty: PhantomData::<T>,
            }),
            vec![self.id],
        );
        (matching, rest)
    }

    /// Keeps the occurrences accepted by the predicate the behavior holds
    /// at the moment each occurrence arrives.
    #[track_caller]
    pub fn filter_apply(&self, predicate: &Behavior<Rc<dyn Fn(&T) -> bool>>) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(FilterApplyStream {
                stream: self.id,
                predicate: predicate.id,
                ty: PhantomData::<T>,
            }),
            vec![self.id, predicate.id],
        )
    }

    /// Keeps occurrences while `gate` is true.
    #[track_caller]
    pub fn keep_when(&self, gate: &Behavior<bool>) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(KeepWhenStream {
                stream: self.id,
                gate: gate.id,
            }),
            vec![self.id, gate.id],
        )
    }

    /// Accumulating stream: each occurrence folds into the accumulator and
    /// the new accumulator is emitted. The accumulator belongs to the node
    /// and survives across listeners.
    #[track_caller]
    pub fn scan<S, F>(&self, initial: S, f: F) -> Stream<S>
    where
        S: 'static,
        F: Fn(&T, &S) -> S + 'static,
    {
        Stream::operator(
            self.runtime,
            Rc::new(ScanStream {
                f,
                acc: RefCell::new(Rc::new(initial)),
                ty: PhantomData::<T>,
            }),
            vec![self.id],
        )
    }

    /// Pure-in-time accumulation: sampling the returned behavior mints a
    /// fresh accumulating stream whose fold starts at `initial` at the
    /// sample point. Earlier instances keep accumulating independently.
    #[track_caller]
    pub fn scan_stream<S, F>(&self, initial: S, f: F) -> Behavior<Stream<S>>
    where
        S: Clone + 'static,
        F: Fn(&T, &S) -> S + 'static,
    {
        Behavior::operator(
            self.runtime,
            Rc::new(ScanStreamOuter {
                runtime: self.runtime,
                stream: self.id,
                initial,
                f: Rc::new(f),
                ty: PhantomData::<T>,
            }),
            Vec::new(),
        )
    }

    /// Merges two streams; occurrences of either pass through.
    #[track_caller]
    pub fn merge(&self, other: &Stream<T>) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(CombineStream),
            vec![self.id, other.id],
        )
    }

    /// On every occurrence, emits the behavior's value at that instant
    /// instead.
    #[track_caller]
    pub fn snapshot<B>(&self, behavior: &Behavior<B>) -> Stream<B>
    where
        B: 'static,
    {
        Stream::operator(
            self.runtime,
            Rc::new(SnapshotStream {
                stream: self.id,
                behavior: behavior.id,
                combine: None,
            }),
            vec![self.id, behavior.id],
        )
    }

    /// On every occurrence `a`, emits `f(a, b)` where `b` is the
    /// behavior's value at that instant.
    #[track_caller]
    pub fn snapshot_with<B, C, F>(&self, f: F, behavior: &Behavior<B>) -> Stream<C>
    where
        B: 'static,
        C: 'static,
        F: Fn(&T, &B) -> C + 'static,
    {
        let combine: Rc<dyn Fn(&Rc<dyn Any>, &Rc<dyn Any>) -> Rc<dyn Any>> =
            Rc::new(move |a, b| {
                let a = a
                    .downcast_ref::<T>()
                    .expect("snapshot occurrence of unexpected type");
                let b = b
                    .downcast_ref::<B>()
                    .expect("snapshot behavior value of unexpected type");
                Rc::new(f(a, b))
            });
        Stream::operator(
            self.runtime,
            Rc::new(SnapshotStream {
                stream: self.id,
                behavior: behavior.id,
                combine: Some(combine),
            }),
            vec![self.id, behavior.id],
        )
    }

    /// A behavior that starts at `initial` and steps to each stream
    /// occurrence.
    ///
    /// The stepper is delayed: sampled in the very tick one of its
    /// occurrences arrives, it still answers with the pre-occurrence
    /// value; the new value is visible from the next tick. Feedback
    /// constructions rely on this.
    #[track_caller]
    pub fn stepper(&self, initial: T) -> Behavior<T> {
        Behavior::operator_with_value(
            self.runtime,
            Rc::new(StepperBehavior {
                changed: Cell::new(None),
                previous: RefCell::new(None),
            }),
            vec![self.id],
            Some(Rc::new(initial)),
        )
    }

    /// Emits each occurrence after `delay`, via the platform scheduler.
    #[track_caller]
    pub fn delay(&self, delay: Duration) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(DelayStream {
                runtime: self.runtime,
                delay,
                timers: RefCell::new(Vec::new()),
            }),
            vec![self.id],
        )
    }

    /// Emits an occurrence, then silences the stream for `delay`.
    #[track_caller]
    pub fn throttle(&self, delay: Duration) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(ThrottleStream {
                runtime: self.runtime,
                delay,
                muted: Rc::new(Cell::new(false)),
                timers: RefCell::new(Vec::new()),
            }),
            vec![self.id],
        )
    }

    /// Emits the most recent occurrence once the stream has been quiet
    /// for `delay`; every occurrence restarts the timer.
    #[track_caller]
    pub fn debounce(&self, delay: Duration) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(DebounceStream {
                runtime: self.runtime,
                delay,
                pending: Rc::new(RefCell::new(None)),
                timer: Cell::new(None),
            }),
            vec![self.id],
        )
    }

    /// Adapts the stream into an async [`futures::Stream`].
    ///
    /// The backing subscription is released when the adapter is dropped,
    /// or on the first occurrence after the receiving side has gone away;
    /// either way the upstream chain deactivates.
    pub fn to_stream(&self) -> Pin<Box<dyn futures::Stream<Item = T>>>
    where
        T: Clone,
    {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let subscription: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let sub = self.subscribe({
            let subscription = Rc::clone(&subscription);
            move |value| {
                if tx.unbounded_send(value).is_err() {
                    // receiver dropped: let the upstream chain deactivate
                    if let Some(subscription) = subscription.borrow_mut().take() {
                        subscription.deactivate();
                    }
                }
            }
        });
        *subscription.borrow_mut() = Some(sub);
        Box::pin(SubscribedStream { subscription, rx })
    }
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Stream<T> {}

impl<T> Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish()
    }
}

impl<T> PartialEq for Stream<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T> Eq for Stream<T> {}

impl<T> Reactive for Stream<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn runtime_id(&self) -> RuntimeId {
        self.runtime
    }

    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Stream
    }
}

impl<T> Clone for StreamSink<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StreamSink<T> {}

impl<T> Clone for ProducerHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ProducerHandle<T> {}

/// Combines any number of streams of the same type; occurrences of any
/// of them pass through.
#[track_caller]
pub fn combine<T>(streams: &[Stream<T>]) -> Stream<T> {
    match streams.first() {
        None => Stream::empty(),
        Some(first) => Stream::operator(
            first.runtime,
            Rc::new(CombineStream),
            streams.iter().map(|s| s.id).collect(),
        ),
    }
}

impl<A> Behavior<Stream<A>>
where
    A: 'static,
{
    /// Flattens a behavior of streams: the result always fires with the
    /// stream the behavior currently holds, swapping over whenever the
    /// behavior pushes a new one.
    #[track_caller]
    pub fn switch_stream(&self) -> Stream<A> {
        Stream::operator(
            self.runtime,
            Rc::new(SwitchStream {
                behavior: self.id,
                current: Cell::new(None),
                ty: PhantomData::<A>,
            }),
            vec![self.id],
        )
    }
}

/// Async adapter returned by [`Stream::to_stream`]: forwards the channel
/// and owns the graph subscription so dropping the adapter unsubscribes.
struct SubscribedStream<T> {
    subscription: Rc<RefCell<Option<Subscription>>>,
    rx: futures::channel::mpsc::UnboundedReceiver<T>,
}

impl<T> futures::Stream for SubscribedStream<T> {
    type Item = T;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<T>> {
        futures::Stream::poll_next(Pin::new(&mut self.get_mut().rx), cx)
    }
}

impl<T> Drop for SubscribedStream<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.deactivate();
        }
    }
}

// ----------------------------------------------------------------------
// operators
// ----------------------------------------------------------------------

pub(crate) struct MapStream<A, B, F>
where
    F: Fn(&A) -> B,
{
    pub(crate) f: F,
    pub(crate) ty: PhantomData<(A, B)>,
}

impl<A, B, F> AnyOperator for MapStream<A, B, F>
where
    A: 'static,
    B: 'static,
    F: Fn(&A) -> B + 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        let value = value
            .downcast_ref::<A>()
            .expect("stream occurrence of unexpected type");
        rt.publish(node, t, Rc::new((self.f)(value)));
    }
}

pub(crate) struct MapToStream {
    pub(crate) value: Rc<dyn Any>,
}

impl AnyOperator for MapToStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, _value: &Rc<dyn Any>) {
        rt.publish(node, t, Rc::clone(&self.value));
    }
}

struct FilterStream<A, P>
where
    P: Fn(&A) -> bool,
{
    predicate: Rc<P>,
    expect: bool,
    ty: PhantomData<A>,
}

impl<A, P> AnyOperator for FilterStream<A, P>
where
    A: 'static,
    P: Fn(&A) -> bool + 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        let occurrence = value
            .downcast_ref::<A>()
            .expect("stream occurrence of unexpected type");
        if (self.predicate)(occurrence) == self.expect {
            rt.publish(node, t, Rc::clone(value));
        }
    }
}

struct FilterApplyStream<A> {
    stream: NodeId,
    predicate: NodeId,
    ty: PhantomData<A>,
}

impl<A> AnyOperator for FilterApplyStream<A>
where
    A: 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if source != self.stream {
            return;
        }
        let predicate = rt
            .sample(self.predicate, t)
            .unwrap_or_else(|e| panic!("failed to sample filter predicate behavior: {e}"));
        let predicate = predicate
            .downcast_ref::<Rc<dyn Fn(&A) -> bool>>()
            .expect("predicate behavior of unexpected type");
        let occurrence = value
            .downcast_ref::<A>()
            .expect("stream occurrence of unexpected type");
        if predicate(occurrence) {
            rt.publish(node, t, Rc::clone(value));
        }
    }
}

struct KeepWhenStream {
    stream: NodeId,
    gate: NodeId,
}

impl AnyOperator for KeepWhenStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if source != self.stream {
            return;
        }
        let open = rt
            .sample(self.gate, t)
            .unwrap_or_else(|e| panic!("failed to sample gate behavior: {e}"));
        let open = open
            .downcast_ref::<bool>()
            .expect("gate behavior of unexpected type");
        if *open {
            rt.publish(node, t, Rc::clone(value));
        }
    }
}

pub(crate) struct ScanStream<A, S, F>
where
    F: Fn(&A, &S) -> S,
{
    pub f: F,
    pub acc: RefCell<Rc<S>>,
    pub ty: PhantomData<A>,
}

impl<A, S, F> AnyOperator for ScanStream<A, S, F>
where
    A: 'static,
    S: 'static,
    F: Fn(&A, &S) -> S + 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        let occurrence = value
            .downcast_ref::<A>()
            .expect("stream occurrence of unexpected type");
        let next = {
            let acc = self.acc.borrow();
            Rc::new((self.f)(occurrence, &acc))
        };
        *self.acc.borrow_mut() = Rc::clone(&next);
        rt.publish(node, t, next);
    }
}

pub(crate) struct CombineStream;

impl AnyOperator for CombineStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        rt.publish(node, t, Rc::clone(value));
    }
}

struct SnapshotStream {
    stream: NodeId,
    behavior: NodeId,
    combine: Option<Rc<dyn Fn(&Rc<dyn Any>, &Rc<dyn Any>) -> Rc<dyn Any>>>,
}

impl AnyOperator for SnapshotStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        // the behavior is a parent only to keep it active; its own pushes
        // never fire the snapshot
        if source != self.stream {
            return;
        }
        let sampled = rt
            .sample(self.behavior, t)
            .unwrap_or_else(|e| panic!("failed to sample snapshot behavior: {e}"));
        let out = match &self.combine {
            None => sampled,
            Some(combine) => combine(value, &sampled),
        };
        rt.publish(node, t, out);
    }
}

pub(crate) struct StepperBehavior {
    pub changed: Cell<Option<Tick>>,
    pub previous: RefCell<Option<Rc<dyn Any>>>,
}

impl AnyOperator for StepperBehavior {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        *self.previous.borrow_mut() = rt.value_of(node);
        self.changed.set(Some(t));
        rt.publish(node, t, Rc::clone(value));
    }

    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        // delayed stepper: within the tick an occurrence arrives, the
        // pre-occurrence value is still the observable one
        if rt.is_propagating() && self.changed.get() == Some(t) {
            if let Some(previous) = self.previous.borrow().clone() {
                return Ok(previous);
            }
        }
        rt.value_of(node).ok_or(ReactiveError::NotYetPushed)
    }
}

struct SwitchStream<A> {
    behavior: NodeId,
    current: Cell<Option<NodeId>>,
    ty: PhantomData<A>,
}

impl<A> SwitchStream<A>
where
    A: 'static,
{
    fn swap_to(&self, rt: &Runtime, node: NodeId, inner: NodeId, t: Tick) {
        let old = self.current.get();
        if old == Some(inner) {
            return;
        }
        self.current.set(Some(inner));
        rt.swap_inner(node, old, inner, t);
    }
}

impl<A> AnyOperator for SwitchStream<A>
where
    A: 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn activated(&self, rt: &Runtime, node: NodeId, t: Tick) {
        if let Ok(inner) = rt.sample(self.behavior, t) {
            let inner = inner
                .downcast_ref::<Stream<A>>()
                .expect("stream-valued behavior of unexpected type");
            self.swap_to(rt, node, inner.id, t);
        }
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if source == self.behavior {
            let inner = value
                .downcast_ref::<Stream<A>>()
                .expect("stream-valued behavior of unexpected type");
            self.swap_to(rt, node, inner.id, t);
        } else if Some(source) == self.current.get() {
            rt.publish(node, t, Rc::clone(value));
        }
    }
}

struct DelayStream {
    runtime: RuntimeId,
    delay: Duration,
    timers: RefCell<Vec<TimerId>>,
}

impl AnyOperator for DelayStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, _t: Tick, value: &Rc<dyn Any>) {
        let runtime = self.runtime;
        let value = Rc::clone(value);
        let timer = rt.scheduler().schedule(
            self.delay,
            Box::new(move || {
                _ = with_runtime(runtime, |rt| {
                    rt.with_tick(|rt, t| rt.publish(node, t, value));
                });
            }),
        );
        self.timers.borrow_mut().push(timer);
    }

    fn deactivated(&self, rt: &Runtime, _node: NodeId) {
        if let Some(scheduler) = rt.try_scheduler() {
            for timer in self.timers.borrow_mut().drain(..) {
                scheduler.cancel(timer);
            }
        }
    }
}

struct ThrottleStream {
    runtime: RuntimeId,
    delay: Duration,
    muted: Rc<Cell<bool>>,
    timers: RefCell<Vec<TimerId>>,
}

impl AnyOperator for ThrottleStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if self.muted.get() {
            return;
        }
        rt.publish(node, t, Rc::clone(value));
        self.muted.set(true);
        let muted = Rc::clone(&self.muted);
        let timer = rt.scheduler().schedule(
            self.delay,
            Box::new(move || {
                muted.set(false);
            }),
        );
        self.timers.borrow_mut().push(timer);
    }

    fn deactivated(&self, rt: &Runtime, _node: NodeId) {
        if let Some(scheduler) = rt.try_scheduler() {
            for timer in self.timers.borrow_mut().drain(..) {
                scheduler.cancel(timer);
            }
        }
        self.muted.set(false);
    }
}

struct DebounceStream {
    runtime: RuntimeId,
    delay: Duration,
    pending: Rc<RefCell<Option<Rc<dyn Any>>>>,
    timer: Cell<Option<TimerId>>,
}

impl AnyOperator for DebounceStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, _t: Tick, value: &Rc<dyn Any>) {
        *self.pending.borrow_mut() = Some(Rc::clone(value));
        let scheduler = rt.scheduler();
        if let Some(timer) = self.timer.take() {
            scheduler.cancel(timer);
        }
        let runtime = self.runtime;
        let pending = Rc::clone(&self.pending);
        let timer = scheduler.schedule(
            self.delay,
            Box::new(move || {
                let value = pending.borrow_mut().take();
                if let Some(value) = value {
                    _ = with_runtime(runtime, |rt| {
                        rt.with_tick(|rt, t| rt.publish(node, t, value));
                    });
                }
            }),
        );
        self.timer.set(Some(timer));
    }

    fn deactivated(&self, rt: &Runtime, _node: NodeId) {
        if let Some(timer) = self.timer.take() {
            if let Some(scheduler) = rt.try_scheduler() {
                scheduler.cancel(timer);
            }
        }
        *self.pending.borrow_mut() = None;
    }
}

struct ScanStreamOuter<A, S, F>
where
    F: Fn(&A, &S) -> S,
{
    runtime: RuntimeId,
    stream: NodeId,
    initial: S,
    f: Rc<F>,
    ty: PhantomData<A>,
}

impl<A, S, F> AnyOperator for ScanStreamOuter<A, S, F>
where
    A: 'static,
    S: Clone + 'static,
    F: Fn(&A, &S) -> S + 'static,
{
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Pull
    }

    fn push(&self, _rt: &Runtime, _node: NodeId, _source: NodeId, _t: Tick, _value: &Rc<dyn Any>) {}

    fn sample(&self, rt: &Runtime, _node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        // each sample point gets its own always-active accumulator
        let f = Rc::clone(&self.f);
        let inner = self.runtime.create_reactive_node(
            ReactiveKind::Stream,
            NodeState::Push,
            None,
            true,
            ReactiveNodeType::Operator {
                op: Rc::new(ScanStream {
                    f: move |a: &A, s: &S| f(a, s),
                    acc: RefCell::new(Rc::new(self.initial.clone())),
                    ty: PhantomData::<A>,
                }),
            },
            vec![self.stream],
        );
        rt.add_listener_quiet(self.stream, inner, t);
        Ok(Rc::new(Stream::<S>::from_parts(self.runtime, inner)))
    }
}
