//! Read and write capabilities.
//!
//! Code that only needs to observe a value can take `impl Readable<T>` and
//! accept a signal, its read half or a computed alike. Code that only writes
//! takes `impl Writable<T>`.

use super::computed::Computed;
use super::signal::{ReadSignal, Signal, WriteSignal};

/// A reactive value that can be read.
pub trait Readable<T> {
    /// Get the current value, tracking the read.
    fn get(&self) -> T;

    /// Get the current value without tracking.
    fn get_untracked(&self) -> T;
}

/// A reactive value that can be written.
pub trait Writable<T> {
    /// Replace the value. Equal values do not notify.
    fn set(&self, value: T);

    /// Replace the value with a function of the previous one.
    fn update(&self, f: impl FnOnce(&T) -> T);
}

impl<T: Clone + 'static> Readable<T> for Signal<T> {
    fn get(&self) -> T {
        Signal::get(self)
    }

    fn get_untracked(&self) -> T {
        Signal::get_untracked(self)
    }
}

impl<T: Clone + 'static> Readable<T> for ReadSignal<T> {
    fn get(&self) -> T {
        ReadSignal::get(self)
    }

    fn get_untracked(&self) -> T {
        ReadSignal::get_untracked(self)
    }
}

/// Panics if the derivation fails. Use [`Computed::try_get`] to handle
/// errors.
impl<T: Clone + 'static> Readable<T> for Computed<T> {
    fn get(&self) -> T {
        Computed::get(self)
    }

    fn get_untracked(&self) -> T {
        Computed::get_untracked(self)
    }
}

impl<T: PartialEq + 'static> Writable<T> for Signal<T> {
    fn set(&self, value: T) {
        Signal::set(self, value);
    }

    fn update(&self, f: impl FnOnce(&T) -> T) {
        Signal::update(self, f);
    }
}

impl<T: PartialEq + 'static> Writable<T> for WriteSignal<T> {
    fn set(&self, value: T) {
        WriteSignal::set(self, value);
    }

    fn update(&self, f: impl FnOnce(&T) -> T) {
        WriteSignal::update(self, f);
    }
}
