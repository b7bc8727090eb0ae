use frp_core::{create_runtime, create_stream, create_stream_producer, ProducerHandle};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

struct ProducerProbe {
    activations: Rc<Cell<u32>>,
    deactivations: Rc<Cell<u32>>,
    handle: Rc<RefCell<Option<ProducerHandle<i32>>>>,
}

fn probed_producer() -> (frp_core::Stream<i32>, ProducerProbe) {
    let probe = ProducerProbe {
        activations: Rc::new(Cell::new(0)),
        deactivations: Rc::new(Cell::new(0)),
        handle: Rc::new(RefCell::new(None)),
    };
    let activations = Rc::clone(&probe.activations);
    let deactivations = Rc::clone(&probe.deactivations);
    let handle = Rc::clone(&probe.handle);
    let stream = create_stream_producer::<i32>(move |push| {
        activations.set(activations.get() + 1);
        *handle.borrow_mut() = Some(push);
        let deactivations = Rc::clone(&deactivations);
        Box::new(move || deactivations.set(deactivations.get() + 1))
    });
    (stream, probe)
}

#[test]
fn producers_activate_on_the_first_listener_only() {
    let runtime = create_runtime();
    let (stream, probe) = probed_producer();
    assert_eq!(probe.activations.get(), 0);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sub1 = stream.subscribe({
        let seen = Rc::clone(&seen);
        move |n| seen.borrow_mut().push(n)
    });
    assert_eq!(probe.activations.get(), 1);
    let sub2 = stream.subscribe(|_| {});
    assert_eq!(probe.activations.get(), 1);

    probe.handle.borrow().as_ref().unwrap().push(5);
    assert_eq!(*seen.borrow(), vec![5]);

    sub1.deactivate();
    assert_eq!(probe.deactivations.get(), 0);
    sub2.deactivate();
    assert_eq!(probe.deactivations.get(), 1);

    // pushes while inactive are dropped
    probe.handle.borrow().as_ref().unwrap().push(6);
    assert_eq!(*seen.borrow(), vec![5]);
    runtime.dispose();
}

#[test]
fn producers_reactivate_for_a_new_listener() {
    let runtime = create_runtime();
    let (stream, probe) = probed_producer();
    stream.subscribe(|_| {}).deactivate();
    assert_eq!((probe.activations.get(), probe.deactivations.get()), (1, 1));
    let _sub = stream.subscribe(|_| {});
    assert_eq!((probe.activations.get(), probe.deactivations.get()), (2, 1));
    runtime.dispose();
}

#[test]
fn deactivation_releases_a_whole_combinator_chain() {
    let runtime = create_runtime();
    let (stream, probe) = probed_producer();
    let derived = stream.map(|n| n * 2).filter(|n| *n > 0);
    let sub = derived.subscribe(|_| {});
    assert_eq!(probe.activations.get(), 1);
    sub.deactivate();
    // the chain unsubscribed all the way up to the producer
    assert_eq!(probe.deactivations.get(), 1);
    runtime.dispose();
}

#[test]
fn deactivated_subscriptions_stop_receiving() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sub = s.subscribe({
        let seen = Rc::clone(&seen);
        move |n| seen.borrow_mut().push(n)
    });
    sink.push(1);
    sub.deactivate();
    sink.push(2);
    assert_eq!(*seen.borrow(), vec![1]);
    runtime.dispose();
}

#[test]
fn disposing_the_runtime_runs_armed_deactivators() {
    let runtime = create_runtime();
    let (stream, probe) = probed_producer();
    let _sub = stream.subscribe(|_| {});
    assert_eq!(probe.deactivations.get(), 0);
    runtime.dispose();
    assert_eq!(probe.deactivations.get(), 1);
}

#[test]
fn two_observers_each_receive_every_occurrence() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _a = s.subscribe({
        let seen = Rc::clone(&seen);
        move |n| seen.borrow_mut().push(("a", n))
    });
    let _b = s.subscribe({
        let seen = Rc::clone(&seen);
        move |n| seen.borrow_mut().push(("b", n))
    });
    sink.push(1);
    // listeners run in insertion order, depth-first
    assert_eq!(*seen.borrow(), vec![("a", 1), ("b", 1)]);
    runtime.dispose();
}
