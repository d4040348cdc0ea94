//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies. Writes made by that run are propagated like any
//!    other write once it returns.
//!
//! 2. When any dependency changes, the effect is queued and runs during the
//!    next flush (see [`scheduler`](super::scheduler)), at most once per pass.
//!
//! 3. Before re-running, the effect runs the cleanups registered by its
//!    previous run and disposes effects created inside it. Dependencies are
//!    collected afresh on every run.
//!
//! # Differences from Computed
//!
//! - Computeds return a value; effects do not.
//! - Computeds are lazy (compute on access); effects are eager (run when deps
//!   change).
//! - Computeds propagate errors to readers; effects contain them.
//!
//! # Error Isolation
//!
//! An effect body that returns an error or panics is logged and recorded in
//! [`Effect::last_error`]. The effect stays subscribed and runs again on the
//! next change. Other effects in the same flush are unaffected.

use std::cell::{Cell, RefCell};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use super::cleanup::{self, Scope};
use super::context::{self, Cleanup};
use super::error::{panic_message, BoxError, ComputationError, EffectError};
use super::runtime::{self, Reactive};
use super::scheduler;
use crate::graph::NodeId;

type Body = Box<dyn FnMut() -> Result<(), EffectError>>;

struct EffectInner {
    id: NodeId,
    body: RefCell<Body>,
    cleanups: RefCell<Vec<Cleanup>>,

    /// Owns the effects created by the latest run.
    owned: Scope,

    disposed: Cell<bool>,
    run_count: Cell<usize>,
    last_error: RefCell<Option<EffectError>>,
}

impl EffectInner {
    fn run(&self) {
        if self.disposed.get() {
            return;
        }
        let Ok(mut body) = self.body.try_borrow_mut() else {
            warn!(node = %self.id, "effect triggered its own re-run, skipping");
            return;
        };
        let body = &mut *body;

        self.release();
        runtime::mark_clean(self.id);
        let catch_panics = runtime::with_state(|s| s.config.catch_effect_panics);

        trace!(node = %self.id, "running effect");
        let (outcome, tracked) = self.owned.run(|| {
            context::track(self.id, || {
                if catch_panics {
                    panic::catch_unwind(AssertUnwindSafe(|| body())).unwrap_or_else(|payload| {
                        Err(EffectError::Panicked(panic_message(payload.as_ref())))
                    })
                } else {
                    body()
                }
            })
        });
        self.run_count.set(self.run_count.get() + 1);

        if self.disposed.get() {
            // Disposed itself mid-run
            cleanup::run_cleanups(self.id, tracked.cleanups);
            self.owned.clear();
            return;
        }

        runtime::commit_dependencies(self.id, &tracked.dependencies);
        *self.cleanups.borrow_mut() = tracked.cleanups;

        match outcome {
            Ok(()) => {
                self.last_error.borrow_mut().take();
            }
            Err(err) => {
                error!(node = %self.id, error = %err, "effect failed");
                *self.last_error.borrow_mut() = Some(err);
            }
        }
    }

    /// Undo the previous run: dispose child effects, then run cleanups.
    fn release(&self) {
        self.owned.clear();
        let cleanups = mem::take(&mut *self.cleanups.borrow_mut());
        cleanup::run_cleanups(self.id, cleanups);
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        runtime::unregister(self.id);
        self.release();
        debug!(node = %self.id, runs = self.run_count.get(), "effect disposed");
    }
}

impl Reactive for EffectInner {
    fn update(&self) -> Result<bool, ComputationError> {
        self.run();
        Ok(true)
    }

    fn dispose(&self) {
        EffectInner::dispose(self);
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The runtime keeps the effect alive until [`dispose`](Self::dispose) is
/// called, or the [`Scope`] that owns it is disposed. Dropping the handle
/// does not stop it.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || println!("Count is: {}", count.get())
/// });
///
/// count.set(5);
/// flush()?; // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    /// Effects queued by writes in that first run are handed to the
    /// scheduler once it returns; creating an effect never flushes writes
    /// made before it.
    pub fn new(mut run: impl FnMut() + 'static) -> Self {
        Self::from_body(Box::new(move || {
            run();
            Ok(())
        }))
    }

    /// Create an effect whose body can fail.
    ///
    /// Errors are logged and kept in [`last_error`](Self::last_error); they
    /// never reach the caller of the write that triggered the run.
    pub fn try_new<E>(mut run: impl FnMut() -> Result<(), E> + 'static) -> Self
    where
        E: Into<BoxError>,
    {
        Self::from_body(Box::new(move || run().map_err(EffectError::failed)))
    }

    fn from_body(body: Body) -> Self {
        let id = NodeId::new();
        let inner = Rc::new(EffectInner {
            id,
            body: RefCell::new(body),
            cleanups: RefCell::new(Vec::new()),
            owned: Scope::detached(),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
            last_error: RefCell::new(None),
        });
        runtime::register_effect(id, inner.clone());

        let effect = Self { inner };
        if let Some(scope) = Scope::current() {
            scope.adopt_effect(effect.clone());
        }

        scheduler::hold(|| effect.inner.run());
        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again, even if it is already
    /// queued. Cleanups registered by its last run are invoked. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of dependencies read by the last run.
    pub fn dependency_count(&self) -> usize {
        runtime::with_state(|s| s.graph.dependency_count(self.inner.id))
    }

    /// The error from the most recent run, if it failed.
    pub fn last_error(&self) -> Option<EffectError> {
        self.inner.last_error.borrow().clone()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect. See [`Effect::new`].
pub fn create_effect(run: impl FnMut() + 'static) -> Effect {
    Effect::new(run)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
