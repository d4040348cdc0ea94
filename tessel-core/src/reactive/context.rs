//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal or computed is
//! read, it is recorded as a dependency of the computation on top of the
//! stack.
//!
//! # Implementation
//!
//! We use a thread-local stack of entries. Running a computed or effect
//! pushes an entry for its node; the entry collects the ids read and any
//! cleanup callbacks registered during the run. When the computation
//! completes the entry is popped and handed back to the caller, who commits
//! the dependencies to the graph in one diff.
//!
//! Reads never touch the graph directly, so a run that panics leaves the
//! previous edges untouched.
//!
//! An untracked entry (see [`untrack`]) masks the observer below it, which is
//! how peeks are implemented.

use std::cell::RefCell;
use std::mem;

use indexmap::IndexSet;

use crate::graph::NodeId;

/// A cleanup callback registered with [`on_cleanup`](super::on_cleanup).
pub type Cleanup = Box<dyn FnOnce()>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The node being computed, or `None` for an untracked region.
    observer: Option<NodeId>,

    /// Node ids read during this computation, in first-read order.
    dependencies: IndexSet<NodeId>,

    cleanups: Vec<Cleanup>,
}

/// What a tracked run read and registered.
#[derive(Default)]
pub struct Tracked {
    pub dependencies: Vec<NodeId>,
    pub cleanups: Vec<Cleanup>,
}

impl std::fmt::Debug for Tracked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("dependencies", &self.dependencies)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    observer: Option<NodeId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given node.
    ///
    /// While this context is active, any signals or computeds that are read
    /// are recorded as dependencies of `node`.
    pub fn enter(node: NodeId) -> Self {
        Self::push(Some(node))
    }

    /// Enter a region where reads record nothing.
    pub fn enter_untracked() -> Self {
        Self::push(None)
    }

    fn push(observer: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                observer,
                dependencies: IndexSet::new(),
                cleanups: Vec::new(),
            });
        });

        Self {
            observer,
            finished: false,
        }
    }

    /// Leave the context, returning what it collected.
    pub fn finish(mut self) -> Tracked {
        self.finished = true;
        let entry = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());
        match entry {
            Some(entry) => {
                debug_assert_eq!(
                    entry.observer, self.observer,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.observer, entry.observer
                );
                Tracked {
                    dependencies: entry.dependencies.into_iter().collect(),
                    cleanups: entry.cleanups,
                }
            }
            None => Tracked::default(),
        }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_observer().is_some()
    }

    /// Get the node whose computation is currently tracking reads, if any.
    pub fn current_observer() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.observer))
    }

    /// Check whether `node` is anywhere on the stack, i.e. still running.
    pub fn is_running(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.observer == Some(node))
        })
    }

    /// Record a dependency on the given node.
    ///
    /// This is called by signals and computeds when they are read.
    pub fn track_dependency(node: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.observer.is_some() && entry.observer != Some(node) {
                    entry.dependencies.insert(node);
                }
            }
        });
    }

    /// Register a cleanup on the current observer.
    ///
    /// Hands the callback back if there is no observer to own it.
    pub fn register_cleanup(cleanup: Cleanup) -> Result<(), Cleanup> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.iter_mut().rev().find(|entry| entry.observer.is_some()) {
                Some(entry) => {
                    entry.cleanups.push(cleanup);
                    Ok(())
                }
                None => Err(cleanup),
            }
        })
    }

    /// Drop every entry. Only used when resetting the runtime.
    pub(crate) fn clear() {
        let entries = CONTEXT_STACK.with(|stack| mem::take(&mut *stack.borrow_mut()));
        drop(entries);
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Unwinding: discard what was collected. Cleanups are dropped outside
        // the stack borrow since they may own reactive handles.
        let popped = CONTEXT_STACK
            .try_with(|stack| stack.try_borrow_mut().ok().and_then(|mut stack| stack.pop()))
            .ok()
            .flatten();
        drop(popped);
    }
}

/// Run `f` with `node` as the active observer.
///
/// Returns `f`'s result together with the dependencies it read and the
/// cleanups it registered.
pub fn track<R>(node: NodeId, f: impl FnOnce() -> R) -> (R, Tracked) {
    let context = ReactiveContext::enter(node);
    let result = f();
    (result, context.finish())
}

/// Run `f` without recording any reads as dependencies.
///
/// Use this to peek at reactive values from inside a computed or effect.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let context = ReactiveContext::enter_untracked();
    let result = f();
    drop(context.finish());
    result
}
