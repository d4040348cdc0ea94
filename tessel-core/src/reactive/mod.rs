//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computeds and
//! effects, plus the runtime that keeps them consistent.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed or effect), the read is
//! recorded as a dependency. When the signal's value changes, all dependents
//! are invalidated.
//!
//! ## Computeds
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! lazily, on the first read after one of its dependencies changed, and only
//! notifies its own dependents if the new value differs from the old one.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects run during a flush, at most once per batch of
//! writes.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local observer stack to detect
//! dependencies automatically. Dependencies are re-collected on every run, so
//! conditional reads subscribe and unsubscribe as branches change.
//!
//! Propagation is push-then-pull. A write pushes `Dirty`/`Check` marks
//! through the graph and queues effects; the flush then pulls each effect's
//! inputs up to date, recomputing only computeds whose inputs really changed.

mod cleanup;
mod computed;
mod config;
mod context;
mod effect;
mod error;
mod runtime;
mod scheduler;
mod signal;
mod traits;

pub use cleanup::{create_scope, on_cleanup, Scope};
pub use computed::{create_computed, Computed};
pub use config::{FlushMode, ReactiveConfig};
pub use context::{track, untrack, Cleanup, ReactiveContext, Tracked};
pub use effect::{create_effect, Effect};
pub use error::{BoxError, ComputationError, DisposalError, EffectError, ReactiveError};
pub use runtime::Runtime;
pub use scheduler::{
    batch, flush, FlushDriver, FlushScheduler, FlushStats, ImmediateScheduler, ManualScheduler,
    TokioScheduler,
};
pub use signal::{create_signal, ReadSignal, Signal, WriteSignal};
pub use traits::{Readable, Writable};
