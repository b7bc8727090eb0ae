use frp_core::{
    combine, create_behavior, create_runtime, create_stream, create_stream_producer, Stream,
};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

fn spy<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(T) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let seen = Rc::clone(&seen);
        move |v: T| seen.borrow_mut().push(v)
    };
    (seen, sink)
}

#[test]
fn map_transforms_occurrences() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let doubled = s.map(|n| n * 2);
    let (seen, cb) = spy();
    let _sub = doubled.subscribe(cb);
    sink.push(3);
    sink.push(5);
    assert_eq!(*seen.borrow(), vec![6, 10]);
    runtime.dispose();
}

#[test]
fn map_composes() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let staged = s.map(|n| n + 1).map(|n| n * 10);
    let fused = s.map(|n| (n + 1) * 10);
    let (seen_staged, cb1) = spy();
    let (seen_fused, cb2) = spy();
    let _a = staged.subscribe(cb1);
    let _b = fused.subscribe(cb2);
    for n in [0, 4, 9] {
        sink.push(n);
    }
    assert_eq!(*seen_staged.borrow(), *seen_fused.borrow());
    assert_eq!(*seen_staged.borrow(), vec![10, 50, 100]);
    runtime.dispose();
}

#[test]
fn filter_keeps_matching_occurrences() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let evens = s.filter(|n| n % 2 == 0);
    let (seen, cb) = spy();
    let _sub = evens.subscribe(cb);
    for n in 1..=6 {
        sink.push(n);
    }
    assert_eq!(*seen.borrow(), vec![2, 4, 6]);
    runtime.dispose();
}

#[test]
fn split_routes_by_predicate() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let (evens, odds) = s.split(|n| n % 2 == 0);
    let (seen_even, cb1) = spy();
    let (seen_odd, cb2) = spy();
    let _a = evens.subscribe(cb1);
    let _b = odds.subscribe(cb2);
    for n in 1..=5 {
        sink.push(n);
    }
    assert_eq!(*seen_even.borrow(), vec![2, 4]);
    assert_eq!(*seen_odd.borrow(), vec![1, 3, 5]);
    runtime.dispose();
}

#[test]
fn map_to_replaces_values() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let units = s.map_to("tick");
    let (seen, cb) = spy();
    let _sub = units.subscribe(cb);
    sink.push(1);
    sink.push(2);
    assert_eq!(*seen.borrow(), vec!["tick", "tick"]);
    runtime.dispose();
}

#[test]
fn scan_accumulates_across_occurrences() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let sums = s.scan(0, |n, acc| acc + n);
    let (seen, cb) = spy();
    let _sub = sums.subscribe(cb);
    sink.push(1);
    sink.push(2);
    sink.push(3);
    assert_eq!(*seen.borrow(), vec![1, 3, 6]);
    runtime.dispose();
}

#[test]
fn scan_stream_accumulator_is_fresh_per_sample() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let folds = s.scan_stream(0, |n, acc| acc + n);
    let first = folds.at();
    let (seen_first, cb1) = spy();
    let _a = first.subscribe(cb1);
    sink.push(2);
    let second = folds.at();
    let (seen_second, cb2) = spy();
    let _b = second.subscribe(cb2);
    sink.push(3);
    assert_eq!(*seen_first.borrow(), vec![2, 5]);
    assert_eq!(*seen_second.borrow(), vec![3]);
    runtime.dispose();
}

#[test]
fn merge_interleaves_sources() {
    let runtime = create_runtime();
    let (a, sink_a) = create_stream::<i32>();
    let (b, sink_b) = create_stream::<i32>();
    let merged = a.merge(&b);
    let (seen, cb) = spy();
    let _sub = merged.subscribe(cb);
    sink_a.push(1);
    sink_b.push(2);
    sink_a.push(3);
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    runtime.dispose();
}

#[test]
fn combine_passes_any_source_through() {
    let runtime = create_runtime();
    let (a, sink_a) = create_stream::<i32>();
    let (b, sink_b) = create_stream::<i32>();
    let (c, sink_c) = create_stream::<i32>();
    let all = combine(&[a, b, c]);
    let (seen, cb) = spy();
    let _sub = all.subscribe(cb);
    sink_b.push(2);
    sink_a.push(1);
    sink_c.push(3);
    assert_eq!(*seen.borrow(), vec![2, 1, 3]);
    runtime.dispose();
}

#[test]
fn snapshot_reads_the_behavior_at_each_occurrence() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<()>();
    let (b, publish) = create_behavior(1);
    let snapshots = s.snapshot(&b);
    let (seen, cb) = spy();
    let _sub = snapshots.subscribe(cb);
    sink.push(());
    publish.publish(5);
    sink.push(());
    assert_eq!(*seen.borrow(), vec![1, 5]);
    runtime.dispose();
}

#[test]
fn snapshot_of_an_empty_stream_never_fires() {
    let runtime = create_runtime();
    let (b, publish) = create_behavior(1);
    let snapshots = Stream::<()>::empty().snapshot(&b);
    let (seen, cb) = spy();
    let _sub = snapshots.subscribe(cb);
    publish.publish(2);
    publish.publish(3);
    assert!(seen.borrow().is_empty());
    runtime.dispose();
}

#[test]
fn snapshot_with_combines_occurrence_and_value() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let (b, publish) = create_behavior(10);
    let sums = s.snapshot_with(|n, b| n + b, &b);
    let (seen, cb) = spy();
    let _sub = sums.subscribe(cb);
    sink.push(1);
    publish.publish(20);
    sink.push(2);
    assert_eq!(*seen.borrow(), vec![11, 22]);
    runtime.dispose();
}

#[test]
fn keep_when_gates_on_a_bool_behavior() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let (gate, set_gate) = create_behavior(true);
    let gated = s.keep_when(&gate);
    let (seen, cb) = spy();
    let _sub = gated.subscribe(cb);
    sink.push(1);
    set_gate.publish(false);
    sink.push(2);
    set_gate.publish(true);
    sink.push(3);
    assert_eq!(*seen.borrow(), vec![1, 3]);
    runtime.dispose();
}

#[test]
fn filter_apply_samples_the_predicate_behavior() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let (pred, set_pred) = create_behavior::<Rc<dyn Fn(&i32) -> bool>>(Rc::new(|n| *n > 0));
    let kept = s.filter_apply(&pred);
    let (seen, cb) = spy();
    let _sub = kept.subscribe(cb);
    sink.push(-1);
    sink.push(1);
    set_pred.publish(Rc::new(|n| *n < 0));
    sink.push(-2);
    sink.push(2);
    assert_eq!(*seen.borrow(), vec![1, -2]);
    runtime.dispose();
}

#[test]
fn late_subscribers_miss_earlier_occurrences() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let m = s.map(|n| *n);
    let (seen_early, cb1) = spy();
    let _a = m.subscribe(cb1);
    sink.push(1);
    let (seen_late, cb2) = spy();
    let _b = m.subscribe(cb2);
    sink.push(2);
    assert_eq!(*seen_early.borrow(), vec![1, 2]);
    assert_eq!(*seen_late.borrow(), vec![2]);
    runtime.dispose();
}

#[test]
fn listener_added_during_a_tick_only_sees_later_ticks() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let m = s.map(|n| *n);
    let (seen_inner, inner_cb) = spy();
    let inner_cb = Rc::new(inner_cb);
    let attached = Rc::new(RefCell::new(None));
    let _sub = m.subscribe({
        let attached = Rc::clone(&attached);
        move |_| {
            if attached.borrow().is_none() {
                let inner_cb = Rc::clone(&inner_cb);
                *attached.borrow_mut() = Some(m.subscribe(move |v| inner_cb(v)));
            }
        }
    });
    sink.push(1);
    sink.push(2);
    // the subscription created while 1 was in flight sees only 2
    assert_eq!(*seen_inner.borrow(), vec![2]);
    runtime.dispose();
}

#[test]
fn to_stream_feeds_an_async_adapter() {
    use futures::StreamExt;

    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let mut adapted = s.to_stream();
    sink.push(1);
    sink.push(2);
    assert_eq!(futures::executor::block_on(adapted.next()), Some(1));
    assert_eq!(futures::executor::block_on(adapted.next()), Some(2));
    runtime.dispose();
}

#[test]
fn dropping_the_async_adapter_releases_the_subscription() {
    let runtime = create_runtime();
    let deactivated = Rc::new(Cell::new(false));
    let stream = create_stream_producer::<i32>({
        let deactivated = Rc::clone(&deactivated);
        move |_push| {
            let deactivated = Rc::clone(&deactivated);
            Box::new(move || deactivated.set(true))
        }
    });
    let adapted = stream.to_stream();
    assert!(!deactivated.get());
    drop(adapted);
    // the producer lost its last listener and released its resource
    assert!(deactivated.get());
    runtime.dispose();
}
