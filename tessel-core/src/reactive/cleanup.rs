//! Cleanup and Ownership
//!
//! Two disposal tools live here:
//!
//! - [`on_cleanup`] registers a callback on the running computed or effect.
//!   It runs before that computation's next run and when it is disposed.
//! - [`Scope`] owns the effects created while it is current and disposes them
//!   all at once. Every effect run is wrapped in a scope of its own, so
//!   effects created inside an effect are disposed before the parent reruns.
//!
//! A panicking cleanup is caught and logged; the remaining cleanups still run.

use std::cell::{Cell, RefCell};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{error, warn};

use super::context::{Cleanup, ReactiveContext};
use super::effect::Effect;
use super::error::{panic_message, DisposalError};
use crate::graph::NodeId;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Register `f` to run before the current computation reruns or is disposed.
///
/// Outside of a computed or effect there is nothing to attach to; the
/// callback is dropped without running.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    if ReactiveContext::register_cleanup(Box::new(f)).is_err() {
        warn!("on_cleanup called outside of a reactive computation, ignoring");
    }
}

/// Run cleanups in registration order. A panicking cleanup is logged and the
/// rest still run.
pub(crate) fn run_cleanups(node: NodeId, cleanups: Vec<Cleanup>) {
    for cleanup in cleanups {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
            let err = DisposalError::CleanupPanicked {
                node,
                message: panic_message(payload.as_ref()),
            };
            error!(node = %node, error = %err, "cleanup failed");
        }
    }
}

#[derive(Default)]
struct ScopeInner {
    effects: RefCell<Vec<Effect>>,
    children: RefCell<Vec<Scope>>,
    disposed: Cell<bool>,
}

/// An owner that disposes everything created under it.
///
/// Cloning a scope yields another handle to the same owner.
#[derive(Clone, Default)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a scope. If another scope is current, the new one becomes its
    /// child and is disposed with it.
    pub fn new() -> Self {
        let scope = Self::default();
        if let Some(parent) = Self::current() {
            parent.adopt_scope(scope.clone());
        }
        scope
    }

    /// Create a scope without attaching it to the current one.
    pub fn detached() -> Self {
        Self::default()
    }

    /// The innermost scope currently running, if any.
    pub fn current() -> Option<Self> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Run `f` with this scope current. Effects created by `f` are owned by
    /// the scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = ScopeGuard;
        f()
    }

    pub(crate) fn adopt_effect(&self, effect: Effect) {
        if self.is_disposed() {
            effect.dispose();
            return;
        }
        let mut effects = self.inner.effects.borrow_mut();
        effects.retain(|owned| !owned.is_disposed());
        effects.push(effect);
    }

    fn adopt_scope(&self, child: Scope) {
        if self.is_disposed() {
            child.dispose();
            return;
        }
        self.inner.children.borrow_mut().push(child);
    }

    /// Number of effects currently owned, not counting child scopes.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Dispose child scopes and owned effects, newest first.
    ///
    /// Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.dispose_owned();
    }

    /// Dispose everything owned so far but keep the scope usable.
    pub(crate) fn clear(&self) {
        self.dispose_owned();
    }

    fn dispose_owned(&self) {
        let children = mem::take(&mut *self.inner.children.borrow_mut());
        for child in children.iter().rev() {
            child.dispose();
        }

        let effects = mem::take(&mut *self.inner.effects.borrow_mut());
        for effect in effects.iter().rev() {
            effect.dispose();
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("effects", &self.effect_count())
            .field("children", &self.inner.children.borrow().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let popped = SCOPE_STACK
            .try_with(|stack| stack.try_borrow_mut().ok().and_then(|mut stack| stack.pop()))
            .ok()
            .flatten();
        drop(popped);
    }
}

/// Run `f` inside a fresh scope and return the scope.
///
/// ```rust,ignore
/// let scope = create_scope(|| {
///     create_effect(move || println!("{}", count.get()));
/// });
/// scope.dispose(); // the effect never runs again
/// ```
pub fn create_scope(f: impl FnOnce()) -> Scope {
    let scope = Scope::new();
    scope.run(f);
    scope
}

pub(crate) fn clear_scopes() {
    let scopes = SCOPE_STACK.with(|stack| mem::take(&mut *stack.borrow_mut()));
    drop(scopes);
}
