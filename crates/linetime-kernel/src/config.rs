//! Kernel configuration, read from RON.
//!
//! ```ron
//! (
//!     database: Some("linetime.db"),
//!     version_merging: true,
//!     causal_wait_ms: 5000,
//! )
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::error::KernelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// SQLite file for the clock high-water mark, sessions, tags and
    /// snapshots. `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    /// Initial merging mode for newly loaded documents.
    pub version_merging: bool,
    /// How long a request waits for its `previous_request_id`.
    pub causal_wait_ms: u64,
    /// Completed request ids remembered per session for causal waits.
    pub completed_window: usize,
    /// Per-session event channel capacity.
    pub event_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            database: None,
            version_merging: true,
            causal_wait_ms: 5_000,
            completed_window: 1024,
            event_capacity: 256,
        }
    }
}

impl KernelConfig {
    pub fn from_ron(source: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_ron(&source)
    }

    pub fn causal_wait(&self) -> Duration {
        Duration::from_millis(self.causal_wait_ms)
    }
}
