//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computeds
//! and effects. It owns the dependency graph, the registry of live
//! computations and the queue of pending effects.
//!
//! # How It Works
//!
//! 1. Every reactive value registers a node with the runtime when created.
//!
//! 2. When a computed or effect finishes a run, the dependencies it read are
//!    committed to the graph as one diff.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct dependents `Dirty` and transitive ones `Check`
//!    b. Enqueues the effects among them
//!    c. Requests a flush (see [`scheduler`](super::scheduler))
//!    d. Computeds are lazy: they recompute when pulled
//!
//! # Threading
//!
//! All state is thread-local. Each thread has an independent runtime, and
//! reactive handles are `!Send`. The runtime borrow is never held while user
//! code runs; anything that may run user code on drop is moved out of the
//! borrow before being dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::{debug, trace};

use super::cleanup;
use super::config::ReactiveConfig;
use super::context::ReactiveContext;
use super::error::{panic_message, ComputationError};
use super::scheduler::{self, FlushScheduler, ManualScheduler};
use crate::graph::{DependencyGraph, DirtyState, NodeId, NodeKind};

/// A computation the runtime can bring up to date by id.
pub(crate) trait Reactive {
    /// Recompute (computed) or run (effect).
    ///
    /// Returns whether the node's observable value changed.
    fn update(&self) -> Result<bool, ComputationError>;

    /// Detach permanently. Called for effects when the runtime is reset.
    fn dispose(&self);
}

pub(crate) struct RuntimeState {
    pub(crate) graph: DependencyGraph,

    /// Computeds are owned by their handles.
    computeds: HashMap<NodeId, Weak<dyn Reactive>>,

    /// Effects are owned by the runtime until disposed.
    effects: HashMap<NodeId, Rc<dyn Reactive>>,

    /// Effects waiting for the next pass.
    pub(crate) queue: IndexSet<NodeId>,

    /// Effects of the pass being flushed that have not run yet.
    pub(crate) in_pass: IndexSet<NodeId>,

    pub(crate) batch_depth: usize,
    pub(crate) flushing: bool,
    pub(crate) flush_requested: bool,
    pub(crate) config: ReactiveConfig,
    pub(crate) scheduler: Rc<dyn FlushScheduler>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            graph: DependencyGraph::new(),
            computeds: HashMap::new(),
            effects: HashMap::new(),
            queue: IndexSet::new(),
            in_pass: IndexSet::new(),
            batch_depth: 0,
            flushing: false,
            flush_requested: false,
            config: ReactiveConfig::default(),
            scheduler: Rc::new(ManualScheduler),
        }
    }

    /// Queue an effect, unless it is still waiting in the current pass.
    pub(crate) fn enqueue(&mut self, id: NodeId) -> bool {
        if self.in_pass.contains(&id) {
            return false;
        }
        self.queue.insert(id)
    }

    fn lookup(&self, id: NodeId) -> Option<Rc<dyn Reactive>> {
        if let Some(effect) = self.effects.get(&id) {
            return Some(Rc::clone(effect));
        }
        self.computeds.get(&id).and_then(Weak::upgrade)
    }
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::new());
}

/// Run `f` with exclusive access to this thread's runtime state.
///
/// `f` must not run user code.
pub(crate) fn with_state<R>(f: impl FnOnce(&mut RuntimeState) -> R) -> R {
    RUNTIME.with(|state| f(&mut state.borrow_mut()))
}

pub(crate) fn register_source(id: NodeId) {
    with_state(|s| s.graph.add_node(id, NodeKind::Source));
}

pub(crate) fn register_computed(id: NodeId, node: Weak<dyn Reactive>) {
    with_state(|s| {
        s.graph.add_node(id, NodeKind::Derived);
        s.computeds.insert(id, node);
    });
}

pub(crate) fn register_effect(id: NodeId, node: Rc<dyn Reactive>) {
    with_state(|s| {
        s.graph.add_node(id, NodeKind::Effect);
        s.effects.insert(id, node);
    });
}

/// Remove a node and every edge touching it.
///
/// Safe to call from `Drop` impls, including during thread teardown.
pub(crate) fn unregister(id: NodeId) {
    let removed = RUNTIME
        .try_with(|state| {
            let Ok(mut s) = state.try_borrow_mut() else {
                return None;
            };
            s.graph.remove_node(id);
            s.queue.shift_remove(&id);
            s.in_pass.shift_remove(&id);
            s.computeds.remove(&id);
            s.effects.remove(&id)
        })
        .ok()
        .flatten();

    // The effect body may own reactive handles whose drop re-enters us
    drop(removed);
}

/// Commit the dependencies collected by a finished run.
pub(crate) fn commit_dependencies(id: NodeId, dependencies: &[NodeId]) {
    let diff = with_state(|s| s.graph.replace_dependencies(id, dependencies));
    if !diff.is_empty() {
        trace!(
            node = %id,
            added = diff.added.len(),
            removed = diff.removed.len(),
            "dependencies changed"
        );
    }
}

pub(crate) fn dirty_state(id: NodeId) -> Option<DirtyState> {
    with_state(|s| s.graph.dirty_state(id))
}

pub(crate) fn mark_clean(id: NodeId) {
    with_state(|s| s.graph.mark_clean(id));
}

pub(crate) fn mark_dirty(id: NodeId) {
    with_state(|s| s.graph.mark_dirty(id));
}

/// A source changed: dirty its dependents and queue the reached effects.
pub(crate) fn notify_changed(source: NodeId) {
    let enqueued = with_state(|s| {
        let affected = s.graph.mark_changed(source);
        let mut enqueued = 0_usize;
        for id in affected {
            if s.graph.kind(id) == Some(NodeKind::Effect) && s.enqueue(id) {
                enqueued += 1;
            }
        }
        enqueued
    });

    trace!(node = %source, enqueued, "source changed");
    scheduler::request_flush();
}

/// A computed produced a new value: its direct dependents must rerun.
///
/// Dependents that are running right now already see the new value.
pub(crate) fn notify_value_changed(id: NodeId) {
    with_state(|s| {
        s.graph.mark_dependents_dirty(id, ReactiveContext::is_running);
    });
}

/// Bring `id` up to date if it is dirty, or if it is `Check` and one of its
/// derived dependencies actually changed.
///
/// Returns whether the node recomputed (computed) or ran (effect).
pub(crate) fn update_if_necessary(id: NodeId) -> Result<bool, ComputationError> {
    let Some(state) = dirty_state(id) else {
        return Err(ComputationError::Disposed { node: id });
    };

    if state == DirtyState::Check {
        let (derived, isolate) = with_state(|s| {
            let isolate =
                s.config.catch_effect_panics && s.graph.kind(id) == Some(NodeKind::Effect);
            (s.graph.derived_dependencies(id), isolate)
        });
        for dep in derived {
            if refresh_dependency(id, dep, isolate).is_err() {
                // Let our own run surface the failure
                mark_dirty(id);
            }
            if dirty_state(id) == Some(DirtyState::Dirty) {
                break;
            }
        }
        if dirty_state(id) == Some(DirtyState::Check) {
            mark_clean(id);
        }
    }

    if dirty_state(id) != Some(DirtyState::Dirty) {
        return Ok(false);
    }

    if ReactiveContext::is_running(id) {
        return Err(ComputationError::Cycle { node: id });
    }

    let Some(node) = with_state(|s| s.lookup(id)) else {
        return Err(ComputationError::Disposed { node: id });
    };
    node.update()?;
    Ok(true)
}

/// Bring a derived dependency of `id` up to date.
///
/// With `isolate`, a panicking derivation is caught here. It counts as a
/// failure, so `id` reruns and meets the panic again inside its own boundary.
fn refresh_dependency(id: NodeId, dep: NodeId, isolate: bool) -> Result<bool, ComputationError> {
    if !isolate {
        return update_if_necessary(dep);
    }
    panic::catch_unwind(AssertUnwindSafe(|| update_if_necessary(dep))).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        trace!(node = %id, dependency = %dep, %message, "dependency panicked while checking effect");
        Err(ComputationError::failed(message))
    })
}

/// Handle to the thread-local reactive runtime.
///
/// All methods are associated functions operating on the current thread's
/// runtime.
pub struct Runtime;

impl Runtime {
    /// Replace the runtime configuration.
    pub fn configure(config: ReactiveConfig) {
        debug!(?config, "reactive runtime configured");
        with_state(|s| s.config = config);
    }

    /// Get a copy of the current configuration.
    pub fn config() -> ReactiveConfig {
        with_state(|s| s.config.clone())
    }

    /// Install the hook used to defer flushes in [`FlushMode::Deferred`].
    ///
    /// [`FlushMode::Deferred`]: super::FlushMode::Deferred
    pub fn set_scheduler(scheduler: impl FlushScheduler + 'static) {
        let previous = with_state(|s| {
            s.flush_requested = false;
            mem::replace(&mut s.scheduler, Rc::new(scheduler))
        });
        drop(previous);
        scheduler::request_flush();
    }

    /// Tear down this thread's runtime.
    ///
    /// Disposes every live effect, detaches every node and restores the
    /// default configuration and scheduler. Handles created before the reset
    /// keep their values but no longer participate in propagation.
    pub fn reset() {
        let effects: Vec<Rc<dyn Reactive>> =
            with_state(|s| s.effects.values().map(Rc::clone).collect());
        for effect in &effects {
            effect.dispose();
        }
        drop(effects);

        let previous = with_state(|s| mem::replace(s, RuntimeState::new()));
        drop(previous);

        ReactiveContext::clear();
        cleanup::clear_scopes();
        debug!("reactive runtime reset");
    }

    /// Number of effects waiting to run.
    pub fn pending_effects() -> usize {
        with_state(|s| s.queue.len() + s.in_pass.len())
    }

    pub fn is_batching() -> bool {
        with_state(|s| s.batch_depth > 0)
    }

    pub fn is_flushing() -> bool {
        with_state(|s| s.flushing)
    }

    /// Number of live nodes in the dependency graph.
    pub fn node_count() -> usize {
        with_state(|s| s.graph.node_count())
    }

    /// Whether reads are currently being tracked.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
