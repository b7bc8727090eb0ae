#![forbid(unsafe_code)]
use crate::{
    diagnostics::diagnostics,
    future::Future,
    node::{AnyOperator, NodeId, NodeState, Reactive, ReactiveKind, ReactiveNodeType},
    runtime::{current_runtime, with_runtime, ReactiveError, Runtime, RuntimeId, Tick},
    stream::{ProducerHandle, Stream},
};
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt::Debug,
    marker::PhantomData,
    rc::Rc,
};

/// A time-varying value: at every moment the behavior has one.
///
/// Push-state behaviors notify listeners with fresh values; pull-state
/// behaviors are sampled with [`at`](Behavior::at). Which mode a behavior
/// is in follows from its parents and can change as the graph reshapes.
pub struct Behavior<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

/// The write half of a sink behavior.
pub struct BehaviorSink<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: NodeId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

/// Creates a sink behavior holding `initial` until something is
/// published into it.
///
/// ```
/// # use frp_core::*;
/// let runtime = create_runtime();
/// let (count, set_count) = create_behavior(0);
/// assert_eq!(count.at(), 0);
/// set_count.publish(7);
/// assert_eq!(count.at(), 7);
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
pub fn create_behavior<T>(initial: T) -> (Behavior<T>, BehaviorSink<T>) {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Behavior,
        NodeState::Push,
        Some(Rc::new(initial)),
        true,
        ReactiveNodeType::Sink,
        Vec::new(),
    );
    (
        Behavior {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
        BehaviorSink {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
    )
}

/// Creates a behavior driven by an external push source.
///
/// `activate` runs on the 0→1 listener edge and returns the deactivator
/// for the 1→0 edge. Sampling the behavior before the source has pushed
/// anything is a [`ReactiveError::NotYetPushed`] error.
#[cfg_attr(
    debug_assertions,
    instrument(
        level = "trace",
        skip_all,
        fields(ty = %std::any::type_name::<T>())
    )
)]
#[track_caller]
pub fn create_behavior_producer<T>(
    activate: impl Fn(ProducerHandle<T>) -> Box<dyn FnOnce()> + 'static,
) -> Behavior<T> {
    let runtime = current_runtime();
    let id = runtime.create_reactive_node(
        ReactiveKind::Behavior,
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
    Behavior {
        runtime,
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at: std::panic::Location::caller(),
    }
}

/// Builds a behavior from a sampling function with dynamic dependency
/// tracking: every behavior read through the [`Moment`] token becomes a
/// dependency, and a push from any of them re-runs `body`. Dependencies
/// dropped by a re-run are unsubscribed, like a spreadsheet recalc.
#[cfg_attr(
    debug_assertions,
    instrument(
        level = "trace",
        skip_all,
        fields(ty = %std::any::type_name::<T>())
    )
)]
#[track_caller]
pub fn create_moment<T>(body: impl Fn(&Moment) -> T + 'static) -> Behavior<T>
where
    T: 'static,
{
    let runtime = current_runtime();
    let body: Rc<dyn Fn(&Moment) -> Rc<dyn Any>> =
        Rc::new(move |moment| Rc::new(body(moment)) as Rc<dyn Any>);
    Behavior::operator(runtime, Rc::new(MomentBehavior { body }), Vec::new())
}

impl<T> BehaviorSink<T> {
    /// Publishes a new value, panicking if the runtime has been disposed.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "BehaviorSink::publish()",
            skip_all,
            fields(
                id = ?self.id,
                defined_at = %self.defined_at
            )
        )
    )]
    #[track_caller]
    pub fn publish(&self, value: T) {
        let diagnostics = diagnostics!(self);
        self.try_publish(value).unwrap_or_else(|e| {
            panic!("failed to publish into behavior: {e}{}", diagnostics.context())
        })
    }

    /// Publishes a new value.
    pub fn try_publish(&self, value: T) -> Result<(), ReactiveError> {
        with_runtime(self.runtime, |rt| {
            rt.push_external(self.id, Rc::new(value))
        })
        .and_then(|r| r)
    }
}

impl<T> Behavior<T> {
    #[track_caller]
    pub(crate) fn from_parts(runtime: RuntimeId, id: NodeId) -> Self {
        Behavior {
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
        Self::operator_with_value(runtime, op, sources, None)
    }

    #[track_caller]
    pub(crate) fn operator_with_value(
        runtime: RuntimeId,
        op: Rc<dyn AnyOperator>,
        sources: Vec<NodeId>,
        value: Option<Rc<dyn Any>>,
    ) -> Self {
        let id = runtime.create_reactive_node(
            ReactiveKind::Behavior,
            NodeState::Inactive,
            value,
            false,
            ReactiveNodeType::Operator { op },
            sources,
        );
        Self::from_parts(runtime, id)
    }

    /// A behavior that is always `value`. Only-pull: it never pushes.
    #[track_caller]
    pub fn of(value: T) -> Behavior<T> {
        let runtime = current_runtime();
        let id = runtime.create_reactive_node(
            ReactiveKind::Behavior,
            NodeState::OnlyPull,
            Some(Rc::new(value)),
            true,
            ReactiveNodeType::Constant,
            Vec::new(),
        );
        Self::from_parts(runtime, id)
    }

    /// A pull behavior computed by `f` at every sample.
    ///
    /// `f` must be free of effects on the graph.
    #[track_caller]
    pub fn from_function(f: impl Fn() -> T + 'static) -> Behavior<T> {
        let runtime = current_runtime();
        let id = runtime.create_reactive_node(
            ReactiveKind::Behavior,
            NodeState::Pull,
            None,
            true,
            ReactiveNodeType::Pulled {
                pull: Rc::new(move || Rc::new(f()) as Rc<dyn Any>),
            },
            Vec::new(),
        );
        Self::from_parts(runtime, id)
    }

    /// The behavior's current value.
    ///
    /// # Panics
    /// Panics if the runtime is disposed, if the behavior is an
    /// unreplaced placeholder, or if a push behavior has not produced a
    /// value yet.
    #[cfg_attr(
        debug_assertions,
        instrument(
            level = "trace",
            name = "Behavior::at()",
            skip_all,
            fields(
                id = ?self.id,
                defined_at = %self.defined_at
            )
        )
    )]
    #[track_caller]
    pub fn at(&self) -> T
    where
        T: Clone,
    {
        let diagnostics = diagnostics!(self);
        self.try_at()
            .unwrap_or_else(|e| panic!("failed to sample behavior: {e}{}", diagnostics.context()))
    }

    /// The behavior's current value.
    pub fn try_at(&self) -> Result<T, ReactiveError>
    where
        T: Clone,
    {
        with_runtime(self.runtime, |rt| {
            let value = rt.sample(self.id, rt.current_tick())?;
            value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(ReactiveError::Type(std::any::type_name::<T>()))
        })
        .and_then(|r| r)
    }

    /// Transforms the behavior's value with `f`.
    ///
    /// Over a push parent the result pushes `f(v)` for every parent
    /// update (including the parent's current value at subscribe time);
    /// over a pull parent it samples through `f`.
    #[track_caller]
    pub fn map<B, F>(&self, f: F) -> Behavior<B>
    where
        B: 'static,
        F: Fn(&T) -> B + 'static,
    {
        Behavior::operator(
            self.runtime,
            Rc::new(MapBehavior {
                parent: self.id,
                f,
                ty: PhantomData::<(T, B)>,
            }),
            vec![self.id],
        )
    }

    /// Monadic bind: `f` picks an inner behavior from the outer value;
    /// the result follows the current inner, detaching from inners that
    /// are no longer selected.
    #[track_caller]
    pub fn chain<B, F>(&self, f: F) -> Behavior<B>
    where
        B: 'static,
        F: Fn(&T) -> Behavior<B> + 'static,
    {
        Behavior::operator(
            self.runtime,
            Rc::new(ChainBehavior {
                outer: self.id,
                inner: Cell::new(None),
                f,
                ty: PhantomData::<(T, B)>,
            }),
            vec![self.id],
        )
    }

    /// Starts as `initial` and swaps to each behavior the stream carries.
    #[track_caller]
    pub fn switcher(initial: &Behavior<T>, switches: &Stream<Behavior<T>>) -> Behavior<T> {
        Behavior::operator(
            initial.runtime,
            Rc::new(SwitchBehavior {
                outer: switches.id,
                inner: Cell::new(initial.id),
                ty: PhantomData::<T>,
            }),
            vec![switches.id, initial.id],
        )
    }

    /// Starts as `initial` and swaps to the future's behavior when it
    /// resolves.
    #[track_caller]
    pub fn switch_to(initial: &Behavior<T>, switch: &Future<Behavior<T>>) -> Behavior<T> {
        Behavior::operator(
            initial.runtime,
            Rc::new(SwitchBehavior {
                outer: switch.id,
                inner: Cell::new(initial.id),
                ty: PhantomData::<T>,
            }),
            vec![switch.id, initial.id],
        )
    }

    /// The discrete updates of a push behavior, as a stream.
    ///
    /// Nothing fires at subscribe time, and a behavior in pull state
    /// produces no occurrences.
    #[track_caller]
    pub fn changes(&self) -> Stream<T> {
        Stream::operator(
            self.runtime,
            Rc::new(ChangesStream),
            vec![self.id],
        )
    }
}

impl Behavior<f64> {
    /// The integral of the behavior over tick time, as a trapezoidal sum
    /// over the observed push and sample points.
    #[track_caller]
    pub fn integrate(&self) -> Behavior<f64> {
        Behavior::operator(
            self.runtime,
            Rc::new(IntegrateBehavior {
                parent: self.id,
                previous: Cell::new(None),
                acc: Cell::new(0.0),
            }),
            vec![self.id],
        )
    }
}

impl<A, B> Behavior<Rc<dyn Fn(&A) -> B>>
where
    A: 'static,
    B: 'static,
{
    /// Applicative apply: the function the behavior holds, applied to the
    /// argument behavior's value, re-evaluated on any parent update.
    #[track_caller]
    pub fn ap(&self, value: &Behavior<A>) -> Behavior<B> {
        let combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>> = Rc::new(move |values| {
            let f = values[0]
                .downcast_ref::<Rc<dyn Fn(&A) -> B>>()
                .expect("function behavior of unexpected type");
            let a = values[1]
                .downcast_ref::<A>()
                .expect("behavior value of unexpected type");
            Rc::new(f(a))
        });
        Behavior::operator(
            self.runtime,
            Rc::new(CombineBehavior { combine }),
            vec![self.id, value.id],
        )
    }
}

/// The behavior's current value; equivalent to [`Behavior::at`].
#[track_caller]
pub fn at<T>(behavior: &Behavior<T>) -> T
where
    T: Clone + 'static,
{
    behavior.at()
}

/// Combines two behaviors point-wise.
#[track_caller]
pub fn lift2<A, B, C, F>(f: F, a: &Behavior<A>, b: &Behavior<B>) -> Behavior<C>
where
    A: 'static,
    B: 'static,
    C: 'static,
    F: Fn(&A, &B) -> C + 'static,
{
    let combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>> = Rc::new(move |values| {
        let a = values[0]
            .downcast_ref::<A>()
            .expect("behavior value of unexpected type");
        let b = values[1]
            .downcast_ref::<B>()
            .expect("behavior value of unexpected type");
        Rc::new(f(a, b))
    });
    Behavior::operator(
        a.runtime,
        Rc::new(CombineBehavior { combine }),
        vec![a.id, b.id],
    )
}

/// Combines three behaviors point-wise.
#[track_caller]
pub fn lift3<A, B, C, D, F>(
    f: F,
    a: &Behavior<A>,
    b: &Behavior<B>,
    c: &Behavior<C>,
) -> Behavior<D>
where
    A: 'static,
    B: 'static,
    C: 'static,
    D: 'static,
    F: Fn(&A, &B, &C) -> D + 'static,
{
    let combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>> = Rc::new(move |values| {
        let a = values[0]
            .downcast_ref::<A>()
            .expect("behavior value of unexpected type");
        let b = values[1]
            .downcast_ref::<B>()
            .expect("behavior value of unexpected type");
        let c = values[2]
            .downcast_ref::<C>()
            .expect("behavior value of unexpected type");
        Rc::new(f(a, b, c))
    });
    Behavior::operator(
        a.runtime,
        Rc::new(CombineBehavior { combine }),
        vec![a.id, b.id, c.id],
    )
}

/// A boolean behavior that flips to `true` on `on` and to `false` on
/// `off`, starting from `initial`.
#[track_caller]
pub fn toggle<A, B>(initial: bool, on: &Stream<A>, off: &Stream<B>) -> Behavior<bool>
where
    A: 'static,
    B: 'static,
{
    on.map_to(true).merge(&off.map_to(false)).stepper(initial)
}

impl<T> Stream<T> {
    /// Pure-in-time fold: sampling the returned behavior mints a fresh
    /// accumulating behavior whose fold starts at `initial` at the sample
    /// point. Earlier instances keep their accumulators independently.
    #[track_caller]
    pub fn scan_behavior<S, F>(&self, initial: S, f: F) -> Behavior<Behavior<S>>
    where
        S: Clone + 'static,
        F: Fn(&T, &S) -> S + 'static,
    {
        Behavior::operator(
            self.runtime,
            Rc::new(ScanBehaviorOuter {
                runtime: self.runtime,
                stream: self.id,
                initial,
                f: Rc::new(f),
                ty: PhantomData::<T>,
            }),
            Vec::new(),
        )
    }
}

impl<T> Clone for Behavior<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Behavior<T> {}

impl<T> Debug for Behavior<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Behavior").field("id", &self.id).finish()
    }
}

impl<T> PartialEq for Behavior<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T> Eq for Behavior<T> {}

impl<T> Reactive for Behavior<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn runtime_id(&self) -> RuntimeId {
        self.runtime
    }

    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Behavior
    }
}

impl<T> Clone for BehaviorSink<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BehaviorSink<T> {}

/// Sample token handed to a [`create_moment`] body. Behaviors read
/// through it become live dependencies of the moment.
pub struct Moment<'a> {
    rt: &'a Runtime,
    t: Tick,
    deps: &'a RefCell<Vec<NodeId>>,
}

impl Moment<'_> {
    /// Reads a behavior and registers it as a dependency of this moment.
    #[track_caller]
    pub fn sample<T>(&self, behavior: &Behavior<T>) -> T
    where
        T: Clone + 'static,
    {
        {
            let mut deps = self.deps.borrow_mut();
            if !deps.contains(&behavior.id) {
                deps.push(behavior.id);
            }
        }
        let value = self
            .rt
            .sample(behavior.id, self.t)
            .unwrap_or_else(|e| panic!("failed to sample behavior inside moment: {e}"));
        value
            .downcast_ref::<T>()
            .cloned()
            .expect("behavior value of unexpected type")
    }
}

// ----------------------------------------------------------------------
// operators
// ----------------------------------------------------------------------

struct MapBehavior<A, B, F>
where
    F: Fn(&A) -> B,
{
    parent: NodeId,
    f: F,
    ty: PhantomData<(A, B)>,
}

impl<A, B, F> AnyOperator for MapBehavior<A, B, F>
where
    A: 'static,
    B: 'static,
    F: Fn(&A) -> B + 'static,
{
    fn state(&self, parent_states: &[NodeState]) -> NodeState {
        parent_states.first().copied().unwrap_or(NodeState::OnlyPull)
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if rt.state_of(node) != NodeState::Push {
            return;
        }
        let value = value
            .downcast_ref::<A>()
            .expect("behavior value of unexpected type");
        rt.publish(node, t, Rc::new((self.f)(value)));
    }

    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        if rt.state_of(node) == NodeState::Push {
            if let Some(value) = rt.value_of(node) {
                return Ok(value);
            }
        }
        let parent = rt.sample(self.parent, t)?;
        let parent = parent
            .downcast_ref::<A>()
            .ok_or(ReactiveError::Type(std::any::type_name::<A>()))?;
        Ok(Rc::new((self.f)(parent)))
    }
}

struct CombineBehavior {
    combine: Rc<dyn Fn(&[Rc<dyn Any>]) -> Rc<dyn Any>>,
}

impl CombineBehavior {
    fn recompute(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        let mut values = Vec::new();
        for source in rt.sources_of(node) {
            values.push(rt.sample(source, t)?);
        }
        Ok((self.combine)(&values))
    }
}

impl AnyOperator for CombineBehavior {
    fn state(&self, parent_states: &[NodeState]) -> NodeState {
        NodeState::join(parent_states)
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, _value: &Rc<dyn Any>) {
        if rt.state_of(node) != NodeState::Push {
            return;
        }
        let value = self
            .recompute(rt, node, t)
            .unwrap_or_else(|e| panic!("failed to combine behaviors: {e}"));
        rt.publish(node, t, value);
    }

    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        if rt.state_of(node) == NodeState::Push {
            if let Some(value) = rt.value_of(node) {
                return Ok(value);
            }
        }
        self.recompute(rt, node, t)
    }
}

struct ChainBehavior<A, B, F>
where
    F: Fn(&A) -> Behavior<B>,
    B: 'static,
{
    outer: NodeId,
    inner: Cell<Option<NodeId>>,
    f: F,
    ty: PhantomData<(A, B)>,
}

impl<A, B, F> AnyOperator for ChainBehavior<A, B, F>
where
    A: 'static,
    B: 'static,
    F: Fn(&A) -> Behavior<B> + 'static,
{
    fn state(&self, parent_states: &[NodeState]) -> NodeState {
        NodeState::join(parent_states)
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if source == self.outer {
            let outer = value
                .downcast_ref::<A>()
                .expect("behavior value of unexpected type");
            let inner = (self.f)(outer);
            let old = self.inner.get();
            if old != Some(inner.id) {
                self.inner.set(Some(inner.id));
                rt.swap_inner(node, old, inner.id, t);
            }
            if rt.state_of(node) == NodeState::Push {
                if let Ok(value) = rt.sample(inner.id, t) {
                    rt.publish(node, t, value);
                }
            }
        } else if Some(source) == self.inner.get() {
            if rt.state_of(node) == NodeState::Push {
                rt.publish(node, t, Rc::clone(value));
            }
        }
    }

    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        if rt.state_of(node) == NodeState::Push {
            if let Some(value) = rt.value_of(node) {
                return Ok(value);
            }
        }
        let outer = rt.sample(self.outer, t)?;
        let outer = outer
            .downcast_ref::<A>()
            .ok_or(ReactiveError::Type(std::any::type_name::<A>()))?;
        let inner = (self.f)(outer);
        rt.sample(inner.id, t)
    }

    fn deactivated(&self, rt: &Runtime, node: NodeId) {
        self.inner.set(None);
        rt.set_sources(node, vec![self.outer]);
    }
}

struct SwitchBehavior<B>
where
    B: 'static,
{
    outer: NodeId,
    inner: Cell<NodeId>,
    ty: PhantomData<B>,
}

impl<B> AnyOperator for SwitchBehavior<B>
where
    B: 'static,
{
    fn state(&self, parent_states: &[NodeState]) -> NodeState {
        // the inner behavior dictates the mode; the outer only reshapes
        match parent_states.get(1) {
            Some(NodeState::Push) => NodeState::Push,
            _ => NodeState::Pull,
        }
    }

    fn push(&self, rt: &Runtime, node: NodeId, source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        if source == self.outer {
            let next = value
                .downcast_ref::<Behavior<B>>()
                .expect("behavior-valued occurrence of unexpected type");
            let old = self.inner.get();
            if old != next.id {
                self.inner.set(next.id);
                rt.swap_inner(node, Some(old), next.id, t);
            }
            // the switch itself surfaces the new inner's current value
            if let Ok(value) = rt.sample(next.id, t) {
                rt.publish(node, t, value);
            }
        } else if source == self.inner.get() {
            rt.publish(node, t, Rc::clone(value));
        }
    }

    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        if rt.state_of(node) == NodeState::Push {
            if let Some(value) = rt.value_of(node) {
                return Ok(value);
            }
        }
        rt.sample(self.inner.get(), t)
    }
}

struct MomentBehavior {
    body: Rc<dyn Fn(&Moment) -> Rc<dyn Any>>,
}

impl MomentBehavior {
    fn evaluate(&self, rt: &Runtime, node: NodeId, t: Tick, track: bool) -> Rc<dyn Any> {
        let deps = RefCell::new(Vec::new());
        let value = (self.body)(&Moment { rt, t, deps: &deps });
        let new_deps = deps.into_inner();
        if track {
            let old_deps = rt.sources_of(node);
            for dep in &new_deps {
                if !old_deps.contains(dep) {
                    rt.add_listener_quiet(*dep, node, t);
                }
            }
            for dep in &old_deps {
                if !new_deps.contains(dep) {
                    rt.remove_listener(*dep, node);
                }
            }
            let states: Vec<NodeState> = new_deps.iter().map(|d| rt.state_of(*d)).collect();
            rt.set_sources(node, new_deps);
            rt.change_state_down(node, NodeState::join(&states));
        }
        value
    }
}

impl AnyOperator for MomentBehavior {
    fn state(&self, parent_states: &[NodeState]) -> NodeState {
        NodeState::join(parent_states)
    }

    fn activated(&self, rt: &Runtime, node: NodeId, t: Tick) {
        let value = self.evaluate(rt, node, t, true);
        rt.set_value(node, value);
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, _value: &Rc<dyn Any>) {
        let value = self.evaluate(rt, node, t, true);
        if rt.state_of(node) == NodeState::Push {
            rt.publish(node, t, value);
        }
    }

    fn sample(&self, rt: &Runtime, node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        Ok(self.evaluate(rt, node, t, rt.has_listeners(node)))
    }

    fn deactivated(&self, rt: &Runtime, node: NodeId) {
        rt.set_sources(node, Vec::new());
    }
}

struct ScanBehaviorOuter<A, S, F>
where
    F: Fn(&A, &S) -> S,
{
    runtime: RuntimeId,
    stream: NodeId,
    initial: S,
    f: Rc<F>,
    ty: PhantomData<A>,
}

impl<A, S, F> AnyOperator for ScanBehaviorOuter<A, S, F>
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
        let inner = self.runtime.create_reactive_node(
            ReactiveKind::Behavior,
            NodeState::Push,
            Some(Rc::new(self.initial.clone())),
            true,
            ReactiveNodeType::Operator {
                op: Rc::new(ScanBehavior {
                    f: Rc::clone(&self.f),
                    ty: PhantomData::<(A, S)>,
                }),
            },
            vec![self.stream],
        );
        rt.add_listener_quiet(self.stream, inner, t);
        Ok(Rc::new(Behavior::<S>::from_parts(self.runtime, inner)))
    }
}

struct ScanBehavior<A, S, F>
where
    F: Fn(&A, &S) -> S,
{
    f: Rc<F>,
    ty: PhantomData<(A, S)>,
}

impl<A, S, F> AnyOperator for ScanBehavior<A, S, F>
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
        let acc = rt
            .value_of(node)
            .expect("scan accumulator missing");
        let acc = acc
            .downcast_ref::<S>()
            .expect("scan accumulator of unexpected type");
        rt.publish(node, t, Rc::new((self.f)(occurrence, acc)));
    }
}

struct ChangesStream;

impl AnyOperator for ChangesStream {
    fn state(&self, _parent_states: &[NodeState]) -> NodeState {
        NodeState::Push
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        rt.publish(node, t, Rc::clone(value));
    }
}

struct IntegrateBehavior {
    parent: NodeId,
    previous: Cell<Option<(Tick, f64)>>,
    acc: Cell<f64>,
}

impl IntegrateBehavior {
    fn accumulate(&self, t: Tick, value: f64) -> f64 {
        if let Some((prev_t, prev_v)) = self.previous.get() {
            if t > prev_t {
                let dt = (t - prev_t) as f64;
                self.acc.set(self.acc.get() + dt * (prev_v + value) / 2.0);
            }
        }
        self.previous.set(Some((t, value)));
        self.acc.get()
    }
}

impl AnyOperator for IntegrateBehavior {
    fn state(&self, parent_states: &[NodeState]) -> NodeState {
        match parent_states.first() {
            Some(NodeState::Push) => NodeState::Push,
            _ => NodeState::Pull,
        }
    }

    fn push(&self, rt: &Runtime, node: NodeId, _source: NodeId, t: Tick, value: &Rc<dyn Any>) {
        let value = value
            .downcast_ref::<f64>()
            .expect("integrated behavior must carry f64 values");
        let acc = self.accumulate(t, *value);
        if rt.state_of(node) == NodeState::Push {
            rt.publish(node, t, Rc::new(acc));
        }
    }

    fn sample(&self, rt: &Runtime, _node: NodeId, t: Tick) -> Result<Rc<dyn Any>, ReactiveError> {
        let value = rt.sample(self.parent, t)?;
        let value = value
            .downcast_ref::<f64>()
            .ok_or(ReactiveError::Type("f64"))?;
        Ok(Rc::new(self.accumulate(t, *value)))
    }
}
