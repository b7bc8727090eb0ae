use std::time::Duration;

/// Handle for a scheduled timer, so a deactivating node can cancel it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// The platform timer hook behind the timed stream combinators.
///
/// The core has no clock of its own: `delay`, `throttle` and `debounce`
/// hand their thunks to whatever scheduler the embedder installs with
/// [`set_scheduler`](crate::set_scheduler). A fired thunk re-enters the
/// runtime as a fresh tick.
///
/// `cancel` must tolerate ids whose timer has already fired.
pub trait Scheduler {
    /// Runs `thunk` once, `delay` from now. Returns an id for [`cancel`].
    ///
    /// [`cancel`]: Scheduler::cancel
    fn schedule(&self, delay: Duration, thunk: Box<dyn FnOnce()>) -> TimerId;

    /// Drops a scheduled thunk before it fires. No-op for unknown ids.
    fn cancel(&self, timer: TimerId);
}
