//! Reactive Errors
//!
//! Only effects contain failures. Computeds and signals let errors surface
//! to whoever reads them, since a silently swallowed derivation error would
//! leave stale derived state behind.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error type accepted from user derivations and effect bodies.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Error produced while deriving a computed value.
///
/// Returned to the reader. The computed stays dirty, so the next read
/// retries the derivation.
#[derive(Debug, Clone, Error)]
pub enum ComputationError {
    /// The derivation function returned an error.
    #[error("derivation failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    /// The computed was read while its own derivation was running.
    #[error("computed {node} read itself during its derivation")]
    Cycle { node: NodeId },

    /// The computed's node is no longer registered with the runtime.
    #[error("computed {node} is detached from the runtime")]
    Disposed { node: NodeId },
}

impl ComputationError {
    /// Wrap a derivation error. A `ComputationError` raised by a nested
    /// read is passed through as is.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        match err.into().downcast::<ComputationError>() {
            Ok(inner) => *inner,
            Err(other) => Self::Failed(Arc::from(other)),
        }
    }
}

/// Error produced by an effect body. Caught at the effect boundary.
#[derive(Debug, Clone, Error)]
pub enum EffectError {
    #[error("effect failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    #[error("effect panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Computation(#[from] ComputationError),
}

impl EffectError {
    /// Wrap an effect body error, unwrapping reactive errors raised by reads.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        let err = match err.into().downcast::<EffectError>() {
            Ok(inner) => return *inner,
            Err(other) => other,
        };
        match err.downcast::<ComputationError>() {
            Ok(inner) => Self::Computation(*inner),
            Err(other) => Self::Failed(Arc::from(other)),
        }
    }
}

/// Error produced by a cleanup callback. Logged per callback.
#[derive(Debug, Clone, Error)]
pub enum DisposalError {
    #[error("cleanup for {node} panicked: {message}")]
    CleanupPanicked { node: NodeId, message: String },
}

/// Errors reported by the runtime itself.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A flush did not settle within the configured number of passes.
    #[error("flush did not converge after {passes} passes ({pending} effects still pending)")]
    FlushLimitExceeded { passes: usize, pending: usize },

    #[error("invalid reactive configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
