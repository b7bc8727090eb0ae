use frp_core::{
    at, create_behavior, create_behavior_producer, create_moment, create_runtime, create_stream,
    lift2, lift3, toggle, Behavior, ReactiveError,
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
fn sink_behavior_holds_the_latest_value() {
    let runtime = create_runtime();
    let (b, publish) = create_behavior(0);
    assert_eq!(b.at(), 0);
    publish.publish(7);
    assert_eq!(at(&b), 7);
    runtime.dispose();
}

#[test]
fn constant_behavior_only_pulls() {
    let runtime = create_runtime();
    let b = Behavior::of(5);
    assert_eq!(b.at(), 5);
    let (seen, cb) = spy();
    let _sub = b.subscribe(cb);
    // one initial sample, then silence
    assert_eq!(*seen.borrow(), vec![5]);
    runtime.dispose();
}

#[test]
fn from_function_samples_fresh_every_time() {
    let runtime = create_runtime();
    let counter = Rc::new(Cell::new(0));
    let b = Behavior::from_function({
        let counter = Rc::clone(&counter);
        move || counter.get()
    });
    assert_eq!(b.at(), 0);
    counter.set(3);
    assert_eq!(b.at(), 3);
    runtime.dispose();
}

#[test]
fn map_pushes_transformed_values_to_observers() {
    let runtime = create_runtime();
    let (b, publish) = create_behavior(1);
    let doubled = b.map(|n| n * 2);
    let (seen, cb) = spy();
    let _sub = doubled.subscribe(cb);
    publish.publish(3);
    publish.publish(4);
    // the parent's current value arrives at subscribe time
    assert_eq!(*seen.borrow(), vec![2, 6, 8]);
    assert_eq!(doubled.at(), 8);
    runtime.dispose();
}

#[test]
fn map_samples_through_without_observers() {
    let runtime = create_runtime();
    let (b, publish) = create_behavior(2);
    let tripled = b.map(|n| n * 3);
    assert_eq!(tripled.at(), 6);
    publish.publish(10);
    assert_eq!(tripled.at(), 30);
    runtime.dispose();
}

#[test]
fn lift2_recomputes_on_any_parent_push() {
    let runtime = create_runtime();
    let (a, set_a) = create_behavior(1);
    let (b, set_b) = create_behavior(10);
    let sum = lift2(|a, b| a + b, &a, &b);
    let (seen, cb) = spy();
    let _sub = sum.subscribe(cb);
    set_a.publish(2);
    set_b.publish(20);
    assert_eq!(*seen.borrow(), vec![11, 12, 22]);
    assert_eq!(sum.at(), 22);
    runtime.dispose();
}

#[test]
fn lift3_combines_three_parents() {
    let runtime = create_runtime();
    let (a, _) = create_behavior(1);
    let (b, _) = create_behavior(2);
    let (c, set_c) = create_behavior(3);
    let sum = lift3(|a, b, c| a + b + c, &a, &b, &c);
    assert_eq!(sum.at(), 6);
    set_c.publish(30);
    assert_eq!(sum.at(), 33);
    runtime.dispose();
}

#[test]
fn ap_applies_the_current_function() {
    let runtime = create_runtime();
    let (f, set_f) =
        create_behavior::<Rc<dyn Fn(&i32) -> i32>>(Rc::new(|n| n + 1));
    let (x, set_x) = create_behavior(10);
    let applied = f.ap(&x);
    assert_eq!(applied.at(), 11);
    set_x.publish(20);
    assert_eq!(applied.at(), 21);
    set_f.publish(Rc::new(|n| n * 2));
    assert_eq!(applied.at(), 40);
    runtime.dispose();
}

#[test]
fn stepper_is_delayed_within_its_update_tick() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let b = s.stepper(0);
    let snap = s.snapshot(&b);
    let (seen, cb) = spy();
    let _sub = snap.subscribe(cb);
    sink.push(1);
    sink.push(2);
    // snapshots observe the pre-occurrence values
    assert_eq!(*seen.borrow(), vec![0, 1]);
    // outside the tick the new value is visible
    assert_eq!(b.at(), 2);
    runtime.dispose();
}

#[test]
fn scan_behavior_accumulators_are_pure_in_time() {
    let runtime = create_runtime();
    let (s, sink) = create_stream::<i32>();
    let folds = s.scan_behavior(1, |n, acc| n + acc);
    let first = folds.at();
    let (seen, cb) = spy();
    let _sub = first.subscribe(cb);
    sink.push(2);
    let second = folds.at();
    sink.push(4);
    assert_eq!(first.at(), 7);
    assert_eq!(second.at(), 5);
    assert_eq!(*seen.borrow(), vec![1, 3, 7]);
    runtime.dispose();
}

#[test]
fn moment_tracks_the_behaviors_it_reads() {
    let runtime = create_runtime();
    let (a, set_a) = create_behavior(1);
    let (b, set_b) = create_behavior(10);
    let sum = create_moment(move |m| m.sample(&a) + m.sample(&b));
    let (seen, cb) = spy();
    let _sub = sum.subscribe(cb);
    set_a.publish(2);
    set_b.publish(20);
    assert_eq!(*seen.borrow(), vec![11, 12, 22]);
    runtime.dispose();
}

#[test]
fn moment_drops_dependencies_it_no_longer_reads() {
    let runtime = create_runtime();
    let (flag, set_flag) = create_behavior(true);
    let (x, set_x) = create_behavior(1);
    let (y, set_y) = create_behavior(100);
    let picked = create_moment(move |m| {
        if m.sample(&flag) {
            m.sample(&x)
        } else {
            m.sample(&y)
        }
    });
    let (seen, cb) = spy();
    let _sub = picked.subscribe(cb);
    assert_eq!(*seen.borrow(), vec![1]);
    // y is not a dependency while the flag is set
    set_y.publish(200);
    assert_eq!(*seen.borrow(), vec![1]);
    set_x.publish(2);
    assert_eq!(*seen.borrow(), vec![1, 2]);
    set_flag.publish(false);
    assert_eq!(*seen.borrow(), vec![1, 2, 200]);
    // and x stops mattering once it is no longer read
    set_x.publish(3);
    assert_eq!(*seen.borrow(), vec![1, 2, 200]);
    set_y.publish(300);
    assert_eq!(*seen.borrow(), vec![1, 2, 200, 300]);
    runtime.dispose();
}

#[test]
fn chain_follows_the_selected_inner_behavior() {
    let runtime = create_runtime();
    let (selector, select) = create_behavior("a".to_string());
    let (inner_a, set_a) = create_behavior(1);
    let (inner_b, set_b) = create_behavior(100);
    let chained = selector.chain(move |k| if k.as_str() == "a" { inner_a } else { inner_b });
    let (seen, cb) = spy();
    let _sub = chained.subscribe(cb);
    set_a.publish(2);
    // pushes to the unselected inner produce nothing downstream
    set_b.publish(200);
    select.publish("b".to_string());
    set_b.publish(300);
    set_a.publish(3);
    assert_eq!(*seen.borrow(), vec![1, 2, 200, 300]);
    runtime.dispose();
}

#[test]
fn integrate_accumulates_trapezoids_over_ticks() {
    let runtime = create_runtime();
    let (b, publish) = create_behavior(2.0);
    let area = b.integrate();
    let (seen, cb) = spy::<f64>();
    let _sub = area.subscribe(cb);
    // constant 2.0 integrates to 2.0 per tick
    publish.publish(2.0);
    publish.publish(2.0);
    assert_eq!(*seen.borrow(), vec![0.0, 2.0, 4.0]);
    assert_eq!(area.at(), 4.0);
    runtime.dispose();
}

#[test]
fn changes_emits_behavior_updates_as_a_stream() {
    let runtime = create_runtime();
    let (b, publish) = create_behavior(0);
    let updates = b.changes();
    let (seen, cb) = spy();
    let _sub = updates.subscribe(cb);
    publish.publish(1);
    publish.publish(2);
    // no occurrence for the value held at subscribe time
    assert_eq!(*seen.borrow(), vec![1, 2]);
    runtime.dispose();
}

#[test]
fn toggle_flips_between_the_two_streams() {
    let runtime = create_runtime();
    let (on, push_on) = create_stream::<()>();
    let (off, push_off) = create_stream::<()>();
    let flag = toggle(false, &on, &off);
    let (seen, cb) = spy();
    let _sub = flag.subscribe(cb);
    push_on.push(());
    push_off.push(());
    push_on.push(());
    assert_eq!(*seen.borrow(), vec![false, true, false, true]);
    runtime.dispose();
}

#[test]
fn producer_behavior_requires_a_push_before_sampling() {
    let runtime = create_runtime();
    let handle_slot = Rc::new(RefCell::new(None));
    let b = create_behavior_producer::<i32>({
        let handle_slot = Rc::clone(&handle_slot);
        move |handle| {
            *handle_slot.borrow_mut() = Some(handle);
            Box::new(|| {})
        }
    });
    let (seen, cb) = spy();
    let _sub = b.subscribe(cb);
    assert_eq!(b.try_at(), Err(ReactiveError::NotYetPushed));
    handle_slot.borrow().as_ref().unwrap().push(9);
    assert_eq!(b.at(), 9);
    assert_eq!(*seen.borrow(), vec![9]);
    runtime.dispose();
}
