#![forbid(unsafe_code)]

//! A push/pull FRP runtime: behaviors, streams, futures and placeholders.
//!
//! ## Push/Pull Reactivity
//!
//! The graph distinguishes three reactive kinds. A [`Behavior`] has a
//! value at every moment; a [`Stream`] fires discrete occurrences; a
//! [`Future`] resolves at most once and is terminal afterwards. Nodes are
//! either *push* (parents notify them synchronously) or *pull* (they are
//! sampled on demand), and renegotiate between the two as the graph
//! reshapes — for example when a switching combinator swaps its inner
//! behavior.
//!
//! Everything is reference-counted by observation: a combinator node
//! subscribes to its parents when it gains its first listener and
//! unsubscribes when it loses its last one, so unobserved subgraphs cost
//! nothing and external resources held by producers are released
//! deterministically.
//!
//! Propagation is single-threaded and depth-first. Every external entry
//! (a sink push, a future resolution, a producer callback, a timer
//! firing) opens a fresh [`Tick`]; the whole fan-out completes before
//! control returns to the initiator, and a listener added during a tick
//! only observes subsequent ticks.
//!
//! ### Example
//! ```
//! use frp_core::*;
//! # use std::{cell::RefCell, rc::Rc};
//!
//! // create a runtime; all constructors build their nodes in it
//! let runtime = create_runtime();
//!
//! let (clicks, click_sink) = create_stream::<()>();
//! let count = clicks.scan(0, |_, n| *n + 1).stepper(0);
//! let label = count.map(|n| format!("clicked {n} times"));
//!
//! let last = Rc::new(RefCell::new(String::new()));
//! let _sub = label.subscribe({
//!     let last = Rc::clone(&last);
//!     move |s| *last.borrow_mut() = s
//! });
//!
//! click_sink.push(());
//! click_sink.push(());
//! assert_eq!(*last.borrow(), "clicked 2 times");
//! assert_eq!(count.at(), 2);
//!
//! runtime.dispose();
//! ```
//!
//! Cyclic networks — a stream defined in terms of a behavior stepped by
//! itself — are built through [`create_stream_placeholder`] /
//! [`create_behavior_placeholder`]: construct against the placeholder,
//! then close the loop with `replace_with`.

#[macro_use]
extern crate tracing;

mod behavior;
mod diagnostics;
mod future;
mod macros;
mod node;
mod observe;
mod placeholder;
mod runtime;
mod scheduler;
mod stream;

pub use behavior::*;
pub use future::*;
pub use node::{is_behavior, is_future, is_stream, NodeId, Reactive, ReactiveKind};
pub use observe::*;
pub use placeholder::*;
pub use runtime::{
    create_runtime, set_scheduler, PinnedFuture, ReactiveError, RuntimeId, Tick,
};
pub use scheduler::{Scheduler, TimerId};
pub use stream::*;
