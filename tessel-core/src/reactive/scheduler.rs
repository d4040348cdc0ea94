//! Batch Scheduler
//!
//! Writes never run effects directly. They queue the effects they reach and
//! ask for a flush. A flush drains the queue in passes:
//!
//! 1. The current queue becomes the pass; the queue starts empty.
//! 2. Each effect of the pass is pulled up to date, in enqueue order. An
//!    effect only runs if something it read actually changed.
//! 3. Effects dirtied while the pass runs join it if they have not run yet,
//!    or the next pass otherwise.
//! 4. Repeat until a pass leaves the queue empty.
//!
//! The loop is iterative, so a chain of effects writing signals never grows
//! the stack.
//!
//! # Deferral
//!
//! Inside [`batch`] the flush happens when the outermost batch returns.
//! Outside a batch, [`FlushMode::Immediate`](super::FlushMode::Immediate)
//! flushes right after the write and
//! [`FlushMode::Deferred`](super::FlushMode::Deferred) asks the installed
//! [`FlushScheduler`] to flush once the current synchronous work is done, so
//! writes made in the same turn coalesce.

use std::mem;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::config::FlushMode;
use super::error::ReactiveError;
use super::runtime::{self, with_state};

/// Host hook that arranges for [`flush`] to run after the current
/// synchronous work.
pub trait FlushScheduler {
    fn schedule_flush(&self);
}

/// Leaves flushing to the host, which calls [`flush`] itself.
///
/// This is the default. It suits headless hosts and tests that want to
/// observe the state between a write and its propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualScheduler;

impl FlushScheduler for ManualScheduler {
    fn schedule_flush(&self) {}
}

/// Flushes synchronously as soon as a flush is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl FlushScheduler for ImmediateScheduler {
    fn schedule_flush(&self) {
        if std::thread::panicking() {
            // Effects must not run while a panic unwinds
            warn!("flush requested during a panic, leaving effects queued");
            return;
        }
        if let Err(err) = flush() {
            error!(error = %err, "reactive flush failed");
        }
    }
}

/// Defers flushes to a task on a tokio `LocalSet`.
///
/// Requests are sent over a channel to a [`FlushDriver`], which the host
/// spawns with `tokio::task::spawn_local`. Requests made in the same turn
/// collapse into one flush.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    requests: mpsc::UnboundedSender<()>,
}

impl TokioScheduler {
    pub fn new() -> (Self, FlushDriver) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Self { requests }, FlushDriver { receiver })
    }
}

impl FlushScheduler for TokioScheduler {
    fn schedule_flush(&self) {
        if self.requests.send(()).is_err() {
            debug!("flush driver is gone, flush request dropped");
        }
    }
}

/// Receiving half of a [`TokioScheduler`].
#[derive(Debug)]
pub struct FlushDriver {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl FlushDriver {
    /// Flush on every request until the scheduler is dropped.
    ///
    /// Must run on the same thread as the runtime it flushes, which in
    /// practice means `LocalSet::spawn_local`.
    pub async fn run(mut self) {
        while self.receiver.recv().await.is_some() {
            while self.receiver.try_recv().is_ok() {}
            if let Err(err) = flush() {
                error!(error = %err, "reactive flush failed");
            }
        }
    }
}

/// Summary of a completed flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub passes: usize,
    pub effects_run: usize,
}

/// Run every pending effect until the graph settles.
///
/// Calling `flush` while a flush is already running returns immediately; the
/// running flush picks up anything queued in the meantime.
pub fn flush() -> Result<FlushStats, ReactiveError> {
    let (started, max_passes) = with_state(|s| {
        if s.flushing {
            return (false, None);
        }
        s.flushing = true;
        s.flush_requested = false;
        (true, s.config.max_flush_passes)
    });
    if !started {
        return Ok(FlushStats::default());
    }
    let _guard = FlushGuard;

    let mut stats = FlushStats::default();
    loop {
        let pass_len = with_state(|s| {
            s.in_pass = mem::take(&mut s.queue);
            s.in_pass.len()
        });
        if pass_len == 0 {
            break;
        }

        stats.passes += 1;
        if let Some(max) = max_passes {
            if stats.passes > max {
                let pending = with_state(|s| {
                    let pending = s.in_pass.len() + s.queue.len();
                    s.in_pass.clear();
                    s.queue.clear();
                    pending
                });
                error!(passes = max, pending, "flush did not converge, pending effects dropped");
                return Err(ReactiveError::FlushLimitExceeded {
                    passes: max,
                    pending,
                });
            }
        }
        debug!(pass = stats.passes, effects = pass_len, "flush pass");

        while let Some(id) = with_state(|s| s.in_pass.shift_remove_index(0)) {
            match runtime::update_if_necessary(id) {
                Ok(true) => stats.effects_run += 1,
                Ok(false) => {}
                // Effects contain their own errors; this only happens when
                // the node vanished between enqueue and flush.
                Err(err) => debug!(node = %id, error = %err, "skipped queued effect"),
            }
        }
    }

    if stats.passes > 0 {
        debug!(passes = stats.passes, effects_run = stats.effects_run, "flush complete");
    }
    Ok(stats)
}

struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        // An uncaught effect panic aborts the pass; whatever it did not reach
        // runs first on the next flush, which is requested right away.
        let requeued = with_state(|s| {
            s.flushing = false;
            if s.in_pass.is_empty() {
                return false;
            }
            let mut requeued = mem::take(&mut s.in_pass);
            requeued.extend(s.queue.drain(..));
            s.queue = requeued;
            s.flush_requested = false;
            true
        });
        if requeued {
            debug!("flush aborted, remaining effects requeued");
            request_flush();
        }
    }
}

/// Run `f`, deferring propagation of its writes until it returns.
///
/// Nested batches flatten: only the outermost one flushes. If `f` panics,
/// the queued effects stay pending for the next flush.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let (result, outermost) = batched(f);
    if outermost {
        if let Err(err) = flush() {
            error!(error = %err, "reactive flush failed at end of batch");
        }
    }
    result
}

/// Like [`batch`], but hands the queued effects to the installed scheduler
/// instead of flushing them. Pending writes from before `f` keep waiting for
/// the same flush.
pub(crate) fn hold<R>(f: impl FnOnce() -> R) -> R {
    let (result, outermost) = batched(f);
    if outermost {
        request_flush();
    }
    result
}

fn batched<R>(f: impl FnOnce() -> R) -> (R, bool) {
    with_state(|s| s.batch_depth += 1);
    let guard = BatchGuard { armed: true };
    let result = f();
    (result, guard.finish())
}

struct BatchGuard {
    armed: bool,
}

impl BatchGuard {
    /// Leave the batch. Returns whether it was the outermost one.
    fn finish(mut self) -> bool {
        self.armed = false;
        with_state(|s| {
            s.batch_depth = s.batch_depth.saturating_sub(1);
            s.batch_depth == 0
        })
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.armed {
            with_state(|s| s.batch_depth = s.batch_depth.saturating_sub(1));
        }
    }
}

/// Called after a write queued effects.
pub(crate) fn request_flush() {
    enum Action {
        Nothing,
        FlushNow,
        Defer(std::rc::Rc<dyn FlushScheduler>),
    }

    let action = with_state(|s| {
        if s.batch_depth > 0 || s.flushing || s.queue.is_empty() {
            return Action::Nothing;
        }
        match s.config.flush_mode {
            // Effects must not run while a panic unwinds
            FlushMode::Immediate if std::thread::panicking() => Action::Nothing,
            FlushMode::Immediate => Action::FlushNow,
            FlushMode::Deferred if s.flush_requested => Action::Nothing,
            FlushMode::Deferred => {
                s.flush_requested = true;
                Action::Defer(std::rc::Rc::clone(&s.scheduler))
            }
        }
    });

    match action {
        Action::Nothing => {}
        Action::FlushNow => {
            if let Err(err) = flush() {
                error!(error = %err, "reactive flush failed");
            }
        }
        Action::Defer(scheduler) => scheduler.schedule_flush(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, ReactiveConfig, Runtime, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_effect(signal: &Signal<i32>) -> (Effect, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        let effect = Effect::new({
            let (signal, runs) = (signal.clone(), runs.clone());
            move || {
                signal.get();
                runs.set(runs.get() + 1);
            }
        });
        (effect, runs)
    }

    #[test]
    fn batch_coalesces_writes_into_one_run() {
        Runtime::reset();
        let signal = Signal::new(0);
        let (_effect, runs) = counting_effect(&signal);

        batch(|| {
            signal.set(1);
            signal.set(2);
            signal.set(3);
            assert!(Runtime::is_batching());
            assert_eq!(runs.get(), 1);
        });

        assert!(!Runtime::is_batching());
        assert_eq!(runs.get(), 2);
        assert_eq!(Runtime::pending_effects(), 0);
    }

    #[test]
    fn nested_batches_flush_at_the_outermost() {
        Runtime::reset();
        let signal = Signal::new(0);
        let (_effect, runs) = counting_effect(&signal);

        batch(|| {
            signal.set(1);
            batch(|| signal.set(2));
            assert_eq!(runs.get(), 1);
            signal.set(3);
        });

        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn batch_returns_the_closure_result() {
        Runtime::reset();
        assert_eq!(batch(|| 40 + 2), 42);
    }

    #[test]
    fn batch_depth_is_restored_after_panic() {
        Runtime::reset();
        let result = std::panic::catch_unwind(|| batch(|| panic!("inside batch")));
        assert!(result.is_err());
        assert!(!Runtime::is_batching());
    }

    #[test]
    fn immediate_mode_flushes_after_each_write() {
        Runtime::reset();
        Runtime::configure(ReactiveConfig::default().with_flush_mode(FlushMode::Immediate));
        let signal = Signal::new(0);
        let (_effect, runs) = counting_effect(&signal);

        signal.set(1);
        assert_eq!(runs.get(), 2);
        signal.set(2);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn immediate_scheduler_flushes_deferred_requests() {
        Runtime::reset();
        Runtime::set_scheduler(ImmediateScheduler);
        let signal = Signal::new(0);
        let (_effect, runs) = counting_effect(&signal);

        signal.set(5);
        assert_eq!(runs.get(), 2);
        assert_eq!(Runtime::pending_effects(), 0);
    }

    #[test]
    fn manual_flush_reports_passes_and_runs() {
        Runtime::reset();
        let source = Signal::new(0);
        let mirror = Signal::new(0);

        let _copy = Effect::new({
            let (source, mirror) = (source.clone(), mirror.clone());
            move || mirror.set(source.get())
        });
        let (_watch, runs) = counting_effect(&mirror);

        source.set(7);
        assert_eq!(Runtime::pending_effects(), 1);

        let stats = flush().unwrap();
        assert_eq!(stats, FlushStats { passes: 2, effects_run: 2 });
        assert_eq!(runs.get(), 2);
        assert_eq!(mirror.get(), 7);

        // Nothing left to do
        assert_eq!(flush().unwrap(), FlushStats::default());
    }

    #[test]
    fn non_converging_flush_hits_the_pass_limit() {
        Runtime::reset();
        Runtime::configure(ReactiveConfig::default().with_max_flush_passes(5));
        let ping = Signal::new(0);
        let pong = Signal::new(0);

        let _a = Effect::new({
            let (ping, pong) = (ping.clone(), pong.clone());
            move || pong.set(ping.get() + 1)
        });
        let _b = Effect::new({
            let (ping, pong) = (ping.clone(), pong.clone());
            move || ping.set(pong.get() + 1)
        });

        // The first runs already queued `_a`
        ping.set(100);
        let err = flush().unwrap_err();
        assert!(matches!(err, ReactiveError::FlushLimitExceeded { passes: 5, .. }));
        assert_eq!(Runtime::pending_effects(), 0);
        assert!(!Runtime::is_flushing());
    }

    #[test]
    fn disposed_effect_is_skipped_by_pending_flush() {
        Runtime::reset();
        let signal = Signal::new(0);
        let (effect, runs) = counting_effect(&signal);

        signal.set(1);
        assert_eq!(Runtime::pending_effects(), 1);
        effect.dispose();
        assert_eq!(Runtime::pending_effects(), 0);

        assert_eq!(flush().unwrap().effects_run, 0);
        assert_eq!(runs.get(), 1);
    }

    struct CountingScheduler(Rc<Cell<usize>>);

    impl FlushScheduler for CountingScheduler {
        fn schedule_flush(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn aborted_flush_requests_another_for_the_rest() {
        Runtime::reset();
        let requests = Rc::new(Cell::new(0));
        Runtime::set_scheduler(CountingScheduler(requests.clone()));
        Runtime::configure(ReactiveConfig {
            catch_effect_panics: false,
            ..ReactiveConfig::default()
        });

        let signal = Signal::new(0);
        let _exploding = Effect::new({
            let signal = signal.clone();
            move || assert!(signal.get() != 1, "exploding effect")
        });
        let (_survivor, runs) = counting_effect(&signal);

        signal.set(1);
        assert_eq!(requests.get(), 1);

        assert!(std::panic::catch_unwind(flush).is_err());
        assert!(!Runtime::is_flushing());
        assert_eq!(Runtime::pending_effects(), 1);
        assert_eq!(requests.get(), 2);

        assert_eq!(flush().unwrap().effects_run, 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_dirtied_later_in_the_same_pass_runs_once() {
        Runtime::reset();
        let a = Signal::new(0);
        let b = Signal::new(0);
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        // First in the pass: writes `b`, which the second effect reads
        let _writer = Effect::new({
            let (a, b, order) = (a.clone(), b.clone(), order.clone());
            move || {
                let value = a.get();
                order.borrow_mut().push("writer");
                b.set(value);
            }
        });
        let _reader = Effect::new({
            let (a, b, order) = (a.clone(), b.clone(), order.clone());
            move || {
                a.get();
                b.get();
                order.borrow_mut().push("reader");
            }
        });
        order.borrow_mut().clear();

        a.set(1);
        let stats = flush().unwrap();

        assert_eq!(*order.borrow(), vec!["writer", "reader"]);
        assert_eq!(stats.passes, 1);
    }
}
