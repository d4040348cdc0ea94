//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computeds, and effects work together
//! correctly through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tessel_core::reactive::{FlushStats, TokioScheduler};
use tessel_core::{
    batch, create_computed, create_effect, create_scope, create_signal, flush, on_cleanup,
    untrack, Computed, Effect, EffectError, ReactiveConfig, Readable, Runtime, Signal, Writable,
};

fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    Runtime::reset();
}

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

/// Writing two signals inside one batch runs their shared effect once.
#[test]
fn batch_runs_dependent_effect_exactly_once() {
    setup();
    let first = Signal::new(1);
    let second = Signal::new(2);
    let runs = counter();

    let _effect = create_effect({
        let (first, second, runs) = (first.clone(), second.clone(), runs.clone());
        move || {
            first.get();
            second.get();
            runs.set(runs.get() + 1);
        }
    });
    assert_eq!(runs.get(), 1);

    batch(|| {
        first.set(10);
        second.set(20);
    });

    assert_eq!(runs.get(), 2);
}

/// Reading a computed repeatedly without changes derives it once.
#[test]
fn computed_is_lazy_and_memoized() {
    setup();
    let a = Signal::new(1);
    let b = Signal::new(2);
    let derivations = counter();

    let sum = Computed::new({
        let (a, b, derivations) = (a.clone(), b.clone(), derivations.clone());
        move || {
            derivations.set(derivations.get() + 1);
            a.get() + b.get()
        }
    });

    // Nothing happens until the first read
    assert_eq!(derivations.get(), 0);

    for _ in 0..100 {
        assert_eq!(sum.get(), 3);
    }
    assert_eq!(derivations.get(), 1);

    // A change alone does not derive; the next read does
    a.set(5);
    assert_eq!(derivations.get(), 1);
    assert_eq!(sum.get(), 7);
    assert_eq!(derivations.get(), 2);
}

/// A chain of computeds recomputes each link once per change.
#[test]
fn diamond_recomputes_each_node_once() {
    setup();
    let base = Signal::new(2);
    let doubled_runs = counter();
    let quadrupled_runs = counter();

    let doubled = Computed::new({
        let (base, runs) = (base.clone(), doubled_runs.clone());
        move || {
            runs.set(runs.get() + 1);
            base.get() * 2
        }
    });
    let quadrupled = Computed::new({
        let (doubled, runs) = (doubled.clone(), quadrupled_runs.clone());
        move || {
            runs.set(runs.get() + 1);
            doubled.get() * 2
        }
    });

    // Both branches of the diamond feed one effect
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _effect = Effect::new({
        let (doubled, quadrupled, seen) = (doubled.clone(), quadrupled.clone(), seen.clone());
        move || seen.borrow_mut().push((doubled.get(), quadrupled.get()))
    });
    assert_eq!((doubled_runs.get(), quadrupled_runs.get()), (1, 1));

    base.set(3);
    flush().unwrap();

    assert_eq!((doubled_runs.get(), quadrupled_runs.get()), (2, 2));
    assert_eq!(*seen.borrow(), vec![(4, 8), (6, 12)]);
}

/// A disposed effect never runs again, no matter how many writes follow.
#[test]
fn disposal_halts_propagation() {
    setup();
    let signal = Signal::new(0);
    let runs = counter();

    let effect = Effect::new({
        let (signal, runs) = (signal.clone(), runs.clone());
        move || {
            signal.get();
            runs.set(runs.get() + 1);
        }
    });

    signal.set(1);
    flush().unwrap();
    assert_eq!(runs.get(), 2);

    effect.dispose();
    for value in 2..102 {
        signal.set(value);
        flush().unwrap();
    }

    assert_eq!(runs.get(), 2);
    assert_eq!(signal.subscriber_count(), 0);
}

/// Dependents of a computed whose value did not change do not rerun.
#[test]
fn unchanged_computed_short_circuits_dependents() {
    setup();
    let count = Signal::new(0);
    let is_even = create_computed({
        let count = count.clone();
        move || count.get() % 2 == 0
    });
    let runs = counter();

    let _effect = create_effect({
        let (is_even, runs) = (is_even.clone(), runs.clone());
        move || {
            is_even.get();
            runs.set(runs.get() + 1);
        }
    });

    count.set(2);
    flush().unwrap();
    count.set(4);
    flush().unwrap();
    assert_eq!(runs.get(), 1);
    assert_eq!(is_even.recompute_count(), 3);

    count.set(5);
    flush().unwrap();
    assert_eq!(runs.get(), 2);
}

/// A failing effect keeps observing, and its siblings still run.
#[test]
fn effect_errors_are_isolated() {
    const SENTINEL: i32 = -1;

    setup();
    let value = Signal::new(0);
    let observed = Rc::new(RefCell::new(Vec::new()));
    let sibling_runs = counter();

    let failing = Effect::try_new({
        let (value, observed) = (value.clone(), observed.clone());
        move || {
            let current = value.get();
            if current == SENTINEL {
                return Err(format!("sentinel {current} reached"));
            }
            observed.borrow_mut().push(current);
            Ok(())
        }
    });
    let _sibling = Effect::new({
        let (value, runs) = (value.clone(), sibling_runs.clone());
        move || {
            value.get();
            runs.set(runs.get() + 1);
        }
    });

    batch(|| value.set(SENTINEL));
    assert!(matches!(failing.last_error(), Some(EffectError::Failed(_))));
    assert_eq!(sibling_runs.get(), 2);

    batch(|| value.set(42));
    assert!(failing.last_error().is_none());
    assert_eq!(*observed.borrow(), vec![0, 42]);
    assert_eq!(sibling_runs.get(), 3);
}

/// A panicking effect does not abort the flush for its siblings.
#[test]
fn effect_panics_are_isolated() {
    setup();
    let trigger = Signal::new(false);
    let sibling_runs = counter();

    let panicking = Effect::new({
        let trigger = trigger.clone();
        move || assert!(!trigger.get(), "trigger fired")
    });
    let _sibling = Effect::new({
        let (trigger, runs) = (trigger.clone(), sibling_runs.clone());
        move || {
            trigger.get();
            runs.set(runs.get() + 1);
        }
    });

    trigger.set(true);
    let stats = flush().unwrap();

    assert_eq!(stats.effects_run, 2);
    assert_eq!(sibling_runs.get(), 2);
    assert!(matches!(panicking.last_error(), Some(EffectError::Panicked(_))));
}

/// Two effects writing each other's inputs settle when their guards say so.
#[test]
fn guarded_effect_cycle_converges() {
    setup();
    Runtime::configure(ReactiveConfig::default().with_max_flush_passes(100));
    let a = Signal::new(0);
    let b = Signal::new(0);

    // Feeds `b` while `a` is positive
    let _feed = Effect::new({
        let (a, b) = (a.clone(), b.clone());
        move || {
            if a.get() > 0 {
                b.update(|b| b + 1);
            }
        }
    });
    // Keeps `a` going until `b` passes 10, then resets it
    let _guard = Effect::new({
        let (a, b) = (a.clone(), b.clone());
        move || {
            let b = b.get();
            if b > 10 {
                a.set(0);
            } else if b > 0 {
                a.update(|a| a + 1);
            }
        }
    });

    a.set(1);
    let stats = flush().unwrap();

    assert_eq!(a.get(), 0);
    assert_eq!(b.get(), 11);
    assert!(stats.passes > 1);
    assert_eq!(Runtime::pending_effects(), 0);
}

/// Branches not taken by the latest run are unsubscribed.
#[test]
fn stale_dependencies_are_dropped() {
    setup();
    let use_left = Signal::new(true);
    let left = Signal::new("left");
    let right = Signal::new("right");
    let runs = counter();

    let effect = Effect::new({
        let (use_left, left, right, runs) =
            (use_left.clone(), left.clone(), right.clone(), runs.clone());
        move || {
            runs.set(runs.get() + 1);
            if use_left.get() {
                left.get();
            } else {
                right.get();
            }
        }
    });
    assert_eq!(left.subscriber_count(), 1);
    assert_eq!(right.subscriber_count(), 0);

    use_left.set(false);
    flush().unwrap();
    assert_eq!(left.subscriber_count(), 0);
    assert_eq!(right.subscriber_count(), 1);
    assert_eq!(effect.dependency_count(), 2);

    // The abandoned branch no longer triggers runs
    left.set("LEFT");
    flush().unwrap();
    assert_eq!(runs.get(), 2);
}

/// Reads inside `untrack` do not subscribe.
#[test]
fn untracked_reads_do_not_subscribe() {
    setup();
    let tracked = Signal::new(1);
    let peeked = Signal::new(10);
    let sums = Rc::new(RefCell::new(Vec::new()));

    let _effect = Effect::new({
        let (tracked, peeked, sums) = (tracked.clone(), peeked.clone(), sums.clone());
        move || {
            let sum = tracked.get() + untrack(|| peeked.get());
            sums.borrow_mut().push(sum);
        }
    });

    peeked.set(20);
    flush().unwrap();
    assert_eq!(*sums.borrow(), vec![11]);

    tracked.set(2);
    flush().unwrap();
    assert_eq!(*sums.borrow(), vec![11, 22]);
}

/// Cleanups run before each rerun and once more on disposal.
#[test]
fn cleanups_run_between_runs() {
    setup();
    let (read, write) = create_signal(1);
    let log = Rc::new(RefCell::new(Vec::new()));

    let effect = Effect::new({
        let log = log.clone();
        move || {
            let value = read.get();
            log.borrow_mut().push(format!("subscribe {value}"));
            let log = log.clone();
            on_cleanup(move || log.borrow_mut().push(format!("unsubscribe {value}")));
        }
    });

    write.set(2);
    flush().unwrap();
    effect.dispose();

    assert_eq!(
        *log.borrow(),
        vec!["subscribe 1", "unsubscribe 1", "subscribe 2", "unsubscribe 2"]
    );
}

/// Disposing a scope disposes every effect created under it.
#[test]
fn scope_disposes_owned_effects() {
    setup();
    let signal = Signal::new(0);
    let runs = counter();

    let scope = create_scope(|| {
        for _ in 0..3 {
            let (signal, runs) = (signal.clone(), runs.clone());
            create_effect(move || {
                signal.get();
                runs.set(runs.get() + 1);
            });
        }
    });
    assert_eq!(scope.effect_count(), 3);
    assert_eq!(signal.subscriber_count(), 3);

    scope.dispose();
    signal.set(1);
    flush().unwrap();

    assert_eq!(runs.get(), 3);
    assert_eq!(signal.subscriber_count(), 0);
}

/// A computed reading itself reports a cycle instead of recursing.
#[test]
fn self_referencing_computed_reports_cycle() {
    setup();
    let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));

    let computed = Computed::try_new({
        let slot = slot.clone();
        move || match slot.borrow().as_ref() {
            Some(this) => this.try_get().map(|v| v + 1),
            None => Ok(0),
        }
    });
    *slot.borrow_mut() = Some(computed.clone());

    assert!(computed.try_get().is_err());
    slot.borrow_mut().take();
}

/// Capabilities let generic code read and write any reactive value.
#[test]
fn readable_and_writable_capabilities() {
    setup();
    fn double_into(source: &impl Readable<i32>, target: &impl Writable<i32>) {
        target.set(source.get() * 2);
    }

    let (read, write) = create_signal(4);
    let out = Signal::new(0);
    double_into(&read, &out);
    assert_eq!(out.get(), 8);

    let plus_one = Computed::new(move || read.get() + 1);
    write.set(9);
    double_into(&plus_one, &out);
    assert_eq!(out.get(), 20);
}

/// Writes made by an effect's first run wait for the same flush as any other
/// write, alongside writes made before the effect was created.
#[test]
fn first_run_writes_join_the_pending_flush() {
    setup();
    let source = Signal::new(3);
    let mirror = Signal::new(0);
    let mirror_runs = counter();

    let _watch = Effect::new({
        let (mirror, runs) = (mirror.clone(), mirror_runs.clone());
        move || {
            mirror.get();
            runs.set(runs.get() + 1);
        }
    });

    mirror.set(1);
    let _copy = Effect::new({
        let (source, mirror) = (source.clone(), mirror.clone());
        move || mirror.set(source.get())
    });

    assert_eq!(mirror.get(), 3);
    assert_eq!(mirror_runs.get(), 1);
    assert_eq!(flush().unwrap(), FlushStats { passes: 1, effects_run: 1 });
    assert_eq!(mirror_runs.get(), 2);
}

/// A computed that panics while an effect checks it is contained by that
/// effect; the rest of the pass still runs.
#[test]
fn panicking_computed_behind_checked_effect_is_isolated() {
    setup();
    let input = Signal::new(0);
    let fragile = Computed::new({
        let input = input.clone();
        move || {
            let value = input.get();
            assert!(value != 1, "fragile computed rejected {value}");
            value * 10
        }
    });
    let shifted = Computed::new({
        let input = input.clone();
        move || input.get() + 100
    });
    let sibling_runs = counter();

    let reader = Effect::new({
        let fragile = fragile.clone();
        move || {
            fragile.get();
        }
    });
    let _sibling = Effect::new({
        let (shifted, runs) = (shifted.clone(), sibling_runs.clone());
        move || {
            shifted.get();
            runs.set(runs.get() + 1);
        }
    });

    input.set(1);
    let stats = flush().unwrap();

    assert_eq!(stats.effects_run, 2);
    assert_eq!(sibling_runs.get(), 2);
    assert_eq!(Runtime::pending_effects(), 0);
    assert!(matches!(reader.last_error(), Some(EffectError::Panicked(_))));

    // Recovers on the next good value
    input.set(2);
    flush().unwrap();
    assert!(reader.last_error().is_none());
    assert_eq!(fragile.get_untracked(), 20);
}

/// The tokio scheduler flushes once the current synchronous work is done.
#[tokio::test]
async fn tokio_scheduler_defers_flush_to_local_task() {
    setup();
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async {
            let (scheduler, driver) = TokioScheduler::new();
            Runtime::set_scheduler(scheduler);
            let _driver = tokio::task::spawn_local(driver.run());

            let signal = Signal::new(0);
            let runs = counter();
            let _effect = Effect::new({
                let (signal, runs) = (signal.clone(), runs.clone());
                move || {
                    signal.get();
                    runs.set(runs.get() + 1);
                }
            });

            signal.set(1);
            signal.set(2);
            signal.set(3);
            assert_eq!(runs.get(), 1);
            assert_eq!(Runtime::pending_effects(), 1);

            for _ in 0..10 {
                if Runtime::pending_effects() == 0 {
                    break;
                }
                tokio::task::yield_now().await;
            }

            assert_eq!(runs.get(), 2);
            assert_eq!(signal.get_untracked(), 3);
        })
        .await;

    // Dropping the scheduler stops the driver
    Runtime::reset();
}
