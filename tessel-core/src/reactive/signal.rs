//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    read is recorded and the computation subscribes to the signal once its
//!    run completes.
//!
//! 2. When a signal's value changes, its dependents are marked dirty and the
//!    affected effects are queued.
//!
//! 3. Writing a value equal to the current one does nothing.
//!
//! # Ownership
//!
//! A signal is a cheap handle around a reference-counted cell. Clones share
//! the value. When the last handle drops, the signal's node is removed from
//! the dependency graph.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::runtime;
use crate::graph::NodeId;

struct SignalInner<T> {
    id: NodeId,
    value: RefCell<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        runtime::unregister(self.id);
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        let id = NodeId::new();
        runtime::register_source(id);
        Self {
            inner: Rc::new(SignalInner {
                id,
                value: RefCell::new(value),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Borrow the current value, tracking the read.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this same signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track_dependency(self.inner.id);
        f(&self.inner.value.borrow())
    }

    /// Borrow the current value without tracking dependencies.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Mutate the value in place and notify subscribers unconditionally.
    ///
    /// Use this for values without a cheap equality check, such as large
    /// collections.
    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        runtime::notify_changed(self.inner.id);
    }

    /// Get the number of computations subscribed to this signal.
    pub fn subscriber_count(&self) -> usize {
        runtime::with_state(|s| s.graph.dependent_count(self.inner.id))
    }

    /// Split into read and write capabilities.
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (
            ReadSignal {
                signal: self.clone(),
            },
            WriteSignal {
                signal: self.clone(),
            },
        )
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a subscriber.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    ///
    /// Use this when you need to read the value without establishing
    /// a reactive dependency.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Set a new value and notify subscribers.
    ///
    /// Does nothing if `value` equals the current value.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };

        if changed {
            runtime::notify_changed(self.inner.id);
        }
    }

    /// Update the value using a function of the previous one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let new_value = f(&self.inner.value.borrow());
        self.set(new_value);
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Read capability of a signal.
pub struct ReadSignal<T: 'static> {
    signal: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with_untracked(f)
    }
}

impl<T: Clone + 'static> ReadSignal<T> {
    pub fn get(&self) -> T {
        self.signal.get()
    }

    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: Debug + 'static> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReadSignal").field(&self.signal).finish()
    }
}

/// Write capability of a signal.
pub struct WriteSignal<T: 'static> {
    signal: Signal<T>,
}

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    pub fn modify(&self, f: impl FnOnce(&mut T)) {
        self.signal.modify(f);
    }
}

impl<T: PartialEq + 'static> WriteSignal<T> {
    pub fn set(&self, value: T) {
        self.signal.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.signal.update(f);
    }
}

impl<T: 'static> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: Debug + 'static> Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WriteSignal").field(&self.signal).finish()
    }
}

/// Create a signal and return its read and write capabilities.
pub fn create_signal<T: 'static>(initial: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(initial).split()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
