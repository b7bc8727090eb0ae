use frp_core::{
    create_behavior, create_behavior_placeholder, create_runtime, create_stream,
    create_stream_placeholder, is_behavior, is_stream, ReactiveError,
};
use std::{cell::RefCell, rc::Rc};

fn spy<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(T) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = {
        let seen = Rc::clone(&seen);
        move |v: T| seen.borrow_mut().push(v)
    };
    (seen, sink)
}

#[test]
fn behavior_placeholder_flows_once_replaced() {
    let runtime = create_runtime();
    let placeholder = create_behavior_placeholder::<String>();
    let lengths = placeholder.behavior().map(|s| s.len());
    let (seen, cb) = spy();
    let _sub = lengths.subscribe(cb);
    assert!(seen.borrow().is_empty());

    let (source, _publish) = create_behavior("Hello".to_string());
    placeholder.replace_with(&source);
    assert_eq!(*seen.borrow(), vec![5]);
    runtime.dispose();
}

#[test]
fn sampling_an_unreplaced_behavior_placeholder_is_an_error() {
    let runtime = create_runtime();
    let placeholder = create_behavior_placeholder::<i32>();
    assert_eq!(
        placeholder.behavior().try_at(),
        Err(ReactiveError::PlaceholderNotReplaced)
    );
    runtime.dispose();
}

#[test]
fn replacing_twice_is_an_error() {
    let runtime = create_runtime();
    let placeholder = create_stream_placeholder::<i32>();
    let (first, _) = create_stream::<i32>();
    let (second, _) = create_stream::<i32>();
    assert_eq!(placeholder.try_replace_with(&first), Ok(()));
    assert_eq!(
        placeholder.try_replace_with(&second),
        Err(ReactiveError::AlreadyReplaced)
    );
    runtime.dispose();
}

#[test]
fn combinators_over_a_placeholder_match_the_direct_wiring() {
    let runtime = create_runtime();

    let (source, sink) = create_stream::<i32>();
    let placeholder = create_stream_placeholder::<i32>();
    let through_placeholder = placeholder.stream().map(|n| n * 2);
    let direct = source.map(|n| n * 2);

    let (seen_placeholder, cb1) = spy();
    let (seen_direct, cb2) = spy();
    let _a = through_placeholder.subscribe(cb1);
    let _b = direct.subscribe(cb2);
    placeholder.replace_with(&source);

    sink.push(1);
    sink.push(2);
    sink.push(3);
    assert_eq!(*seen_placeholder.borrow(), *seen_direct.borrow());
    assert_eq!(*seen_placeholder.borrow(), vec![2, 4, 6]);
    runtime.dispose();
}

#[test]
fn a_cycle_closes_through_a_stream_placeholder() {
    let runtime = create_runtime();
    let (events, sink) = create_stream::<()>();

    // the counter stream depends on a stepper of itself
    let counter = create_stream_placeholder::<u32>();
    let total = counter.stream().stepper(0);
    let next = events.snapshot_with(|_, acc| acc + 1, &total);
    counter.replace_with(&next);

    let (seen, cb) = spy();
    let _sub = next.subscribe(cb);
    sink.push(());
    sink.push(());
    sink.push(());
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    assert_eq!(total.at(), 3);
    runtime.dispose();
}

#[test]
fn placeholders_report_their_reactive_kind() {
    let runtime = create_runtime();
    let s = create_stream_placeholder::<i32>();
    let b = create_behavior_placeholder::<i32>();
    assert!(is_stream(&s));
    assert!(is_behavior(&b));
    assert!(!is_behavior(&s));
    runtime.dispose();
}
