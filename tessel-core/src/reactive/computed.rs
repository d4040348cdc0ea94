//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computeds Work
//!
//! 1. On first access, the computed runs its derivation and caches the
//!    result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the
//!    cached value.
//!
//! 3. When a direct dependency changes, the computed is marked `Dirty`. When
//!    something further upstream changes, it is marked `Check`.
//!
//! 4. On next access, a `Check` computed first brings its own derived
//!    dependencies up to date. Only if one of them actually produced a new
//!    value does it recompute.
//!
//! 5. After recomputing, a value equal to the cached one is not propagated:
//!    dependents stay clean.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 computeds depend on it
//! - Only the computeds actually accessed will recompute
//! - Computeds that are never read stay dirty (no wasted work)
//!
//! # Failures
//!
//! A derivation may fail (see [`Computed::try_new`]) or panic. Either way
//! nothing is cached and the computed stays dirty, so the next read retries.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::trace;

use super::cleanup;
use super::context::{self, Cleanup, ReactiveContext};
use super::error::{BoxError, ComputationError};
use super::runtime::{self, Reactive};
use crate::graph::{DirtyState, NodeId};

type Derive<T> = Box<dyn Fn() -> Result<T, ComputationError>>;

struct ComputedInner<T> {
    id: NodeId,
    derive: Derive<T>,

    /// The cached value (None if never computed).
    value: RefCell<Option<T>>,

    cleanups: RefCell<Vec<Cleanup>>,
    recomputations: Cell<usize>,
}

impl<T: PartialEq> ComputedInner<T> {
    fn recompute(&self) -> Result<bool, ComputationError> {
        let previous = mem::take(&mut *self.cleanups.borrow_mut());
        cleanup::run_cleanups(self.id, previous);

        trace!(node = %self.id, "recomputing");
        let (result, tracked) = context::track(self.id, || (self.derive)());
        runtime::commit_dependencies(self.id, &tracked.dependencies);
        *self.cleanups.borrow_mut() = tracked.cleanups;
        self.recomputations.set(self.recomputations.get() + 1);

        match result {
            Ok(value) => {
                let changed = self.value.borrow().as_ref() != Some(&value);
                if changed {
                    *self.value.borrow_mut() = Some(value);
                }
                runtime::mark_clean(self.id);
                if changed {
                    runtime::notify_value_changed(self.id);
                }
                Ok(changed)
            }
            Err(err) => {
                trace!(node = %self.id, error = %err, "derivation failed");
                runtime::mark_dirty(self.id);
                Err(err)
            }
        }
    }
}

impl<T: PartialEq> Reactive for ComputedInner<T> {
    fn update(&self) -> Result<bool, ComputationError> {
        self.recompute()
    }

    fn dispose(&self) {}
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        runtime::unregister(self.id);
        let cleanups = mem::take(self.cleanups.get_mut());
        cleanup::run_cleanups(self.id, cleanups);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound is what lets a computed stop propagation when its
/// inputs changed but its output did not.
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: PartialEq + 'static> Computed<T> {
    /// Create a new computed with the given derivation.
    ///
    /// The derivation is not run immediately. It runs on first access.
    pub fn new(derive: impl Fn() -> T + 'static) -> Self {
        Self::from_derive(Box::new(move || Ok(derive())))
    }

    /// Create a computed whose derivation can fail.
    ///
    /// Errors are returned from [`try_get`](Self::try_get) and never cached.
    pub fn try_new<E>(derive: impl Fn() -> Result<T, E> + 'static) -> Self
    where
        E: Into<BoxError>,
    {
        Self::from_derive(Box::new(move || derive().map_err(ComputationError::failed)))
    }

    fn from_derive(derive: Derive<T>) -> Self {
        let id = NodeId::new();
        let inner = Rc::new(ComputedInner {
            id,
            derive,
            value: RefCell::new(None),
            cleanups: RefCell::new(Vec::new()),
            recomputations: Cell::new(0),
        });

        let node: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        runtime::register_computed(id, node);

        Self { inner }
    }
}

impl<T: 'static> Computed<T> {
    /// Get the computed's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Borrow the current value, recomputing if necessary.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ComputationError> {
        ReactiveContext::track_dependency(self.inner.id);
        self.try_with_untracked(f)
    }

    /// Borrow the current value without tracking the read.
    pub fn try_with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ComputationError> {
        runtime::update_if_necessary(self.inner.id)?;
        let value = self.inner.value.borrow();
        match value.as_ref() {
            Some(value) => Ok(f(value)),
            None => Err(ComputationError::Disposed { node: self.inner.id }),
        }
    }

    /// Whether the cached value may be stale.
    pub fn is_dirty(&self) -> bool {
        runtime::dirty_state(self.inner.id) != Some(DirtyState::Clean)
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Number of times the derivation has run.
    pub fn recompute_count(&self) -> usize {
        self.inner.recomputations.get()
    }

    /// Get the number of computations that read this one.
    pub fn dependent_count(&self) -> usize {
        runtime::with_state(|s| s.graph.dependent_count(self.inner.id))
    }

    /// Get the number of values this computed read on its last run.
    pub fn dependency_count(&self) -> usize {
        runtime::with_state(|s| s.graph.dependency_count(self.inner.id))
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a computed's value.
    pub fn try_get(&self) -> Result<T, ComputationError> {
        self.try_with(T::clone)
    }

    /// Get the current value without tracking the read.
    pub fn try_get_untracked(&self) -> Result<T, ComputationError> {
        self.try_with_untracked(T::clone)
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the derivation fails. Use [`try_get`](Self::try_get) for
    /// computeds built with [`try_new`](Computed::try_new).
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value without tracking dependencies.
    ///
    /// # Panics
    ///
    /// Panics if the derivation fails.
    pub fn get_untracked(&self) -> T {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("dirty", &self.is_dirty())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

/// Create a computed from a derivation.
pub fn create_computed<T: PartialEq + 'static>(derive: impl Fn() -> T + 'static) -> Computed<T> {
    Computed::new(derive)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
