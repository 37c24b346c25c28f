//! Timestamp allocation.
//!
//! Every mutation in the system (a new version, a head jump, a tag) takes a
//! fresh timestamp from one shared [`Clock`]. Timestamps are strictly
//! increasing and never reused, which gives a total order across every
//! document and session that shares the clock.
//!
//! Persistence is delegated to an optional [`ClockSink`]. The sink is told
//! about every advance and is expected to queue the write; the clock never
//! waits on it. Callers that need durability use the sink owner's flush.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A point in the global mutation order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Below every allocated timestamp.
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Receives the high-water mark each time the clock advances.
pub trait ClockSink: Send + Sync {
    /// Must not block.
    fn advanced(&self, high_water: Timestamp);
}

/// Monotonic timestamp allocator shared by every document.
pub struct Clock {
    last: AtomicU64,
    sink: Option<Arc<dyn ClockSink>>,
}

impl Clock {
    /// A fresh clock; the first timestamp is `t1`.
    pub fn new() -> Self {
        Self::resume(Timestamp::ZERO)
    }

    /// Continue above a persisted high-water mark.
    pub fn resume(high_water: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(high_water.get()),
            sink: None,
        }
    }

    /// Attach a persistence sink.
    pub fn with_sink(mut self, sink: Arc<dyn ClockSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Allocate the next timestamp.
    pub fn next(&self) -> Timestamp {
        let ts = Timestamp(self.last.fetch_add(1, Ordering::SeqCst) + 1);
        if let Some(sink) = &self.sink {
            sink.advanced(ts);
        }
        ts
    }

    /// The most recently issued timestamp (`ZERO` if none).
    pub fn high_water(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::SeqCst))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("high_water", &self.high_water())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
