//! Tessel Core
//!
//! This crate provides the reactive core of Tessel. It implements:
//!
//! - Reactive primitives (signals, computeds, effects)
//! - Automatic dependency tracking
//! - Glitch-free, batched change propagation
//! - Cleanup callbacks and ownership scopes
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: Reactive primitives, the runtime and the flush scheduler
//! - `graph`: The dependency graph the runtime propagates through
//!
//! # Example
//!
//! ```rust,ignore
//! use tessel_core::{batch, flush, Computed, Effect, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Computed::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect; it runs once right away
//! let effect = Effect::new({
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     move || println!("Count: {}, Doubled: {}", count.get(), doubled.get())
//! });
//!
//! // Writes in a batch propagate once, when the batch ends
//! batch(|| {
//!     count.set(4);
//!     count.set(5);
//! });
//! // Prints: "Count: 5, Doubled: 10"
//!
//! effect.dispose();
//! ```

pub mod graph;
pub mod reactive;

pub use reactive::{
    batch, create_computed, create_effect, create_scope, create_signal, flush, on_cleanup,
    untrack, Computed, ComputationError, DisposalError, Effect, EffectError, FlushMode,
    ReactiveConfig, ReactiveError, ReadSignal, Readable, Runtime, Scope, Signal, Writable,
    WriteSignal,
};
