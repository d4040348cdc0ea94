//! Runtime Configuration
//!
//! Hosts describe how the runtime should flush in a small serde document:
//!
//! ```json
//! { "flush_mode": "immediate", "max_flush_passes": 1000 }
//! ```
//!
//! Every field is optional and falls back to [`ReactiveConfig::default`].

use serde::{Deserialize, Serialize};

use super::error::ReactiveError;

/// When writes made outside of a batch are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Ask the installed [`FlushScheduler`](super::FlushScheduler) to flush
    /// after the current synchronous work.
    #[default]
    Deferred,

    /// Flush synchronously after every write made outside a batch.
    Immediate,
}

/// Configuration for the thread-local reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    pub flush_mode: FlushMode,

    /// Upper bound on passes in a single flush. `None` lets well-behaved
    /// cycles take as many passes as they need.
    pub max_flush_passes: Option<usize>,

    /// Catch panics raised by effect bodies and report them as
    /// [`EffectError::Panicked`](super::EffectError::Panicked).
    pub catch_effect_panics: bool,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Deferred,
            max_flush_passes: None,
            catch_effect_panics: true,
        }
    }
}

impl ReactiveConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = Some(passes);
        self
    }
}
