//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::FlushMode;

/// Settings for a [`Runtime`](crate::reactive::Runtime).
///
/// Every field has a default, so a partial JSON document is valid:
///
/// ```rust
/// use tether_core::{FlushMode, RuntimeConfig};
///
/// let config = RuntimeConfig::from_json(r#"{ "flush_mode": "coalesce" }"#).unwrap();
/// assert_eq!(config.flush_mode, FlushMode::Coalesce);
/// assert!(!config.auto_flush);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Where work enqueued during a flush pass runs.
    pub flush_mode: FlushMode,

    /// Flush right after a write made outside any batch, flush or tracked
    /// computation. Off by default: the host decides when to flush.
    pub auto_flush: bool,

    /// Upper bound on passes in a single flush.
    pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Deferred,
            auto_flush: false,
            max_flush_rounds: 100,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    pub fn with_max_flush_rounds(mut self, max_flush_rounds: usize) -> Self {
        self.max_flush_rounds = max_flush_rounds;
        self
    }
}
