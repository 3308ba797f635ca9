//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use devsync_protocol::{COMMANDS_PATH, LOGS_PATH};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Remote node streamed for commands and cleaned up by housekeeping.
    pub command_path: String,
    /// Remote node log records are written under.
    pub log_path: String,
    /// Capacity of the log buffer.
    pub log_capacity: LogCapacity,
    /// Minimum time between two housekeeping deletes.
    #[serde(with = "duration_ms")]
    pub housekeeping_interval: Duration,
    /// Longest a teardown waits for an in-flight read before proceeding.
    #[serde(with = "duration_ms")]
    pub drain_timeout: Duration,
    /// Pause between tearing a connection down and re-establishing it.
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,
}

impl EngineConfig {
    /// Creates a configuration with the default remote paths and timings.
    pub fn new() -> Self {
        Self {
            command_path: COMMANDS_PATH.to_string(),
            log_path: LOGS_PATH.to_string(),
            log_capacity: LogCapacity::default(),
            housekeeping_interval: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(200),
        }
    }

    /// Sets the command path.
    pub fn with_command_path(mut self, path: impl Into<String>) -> Self {
        self.command_path = path.into();
        self
    }

    /// Sets the log path.
    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = path.into();
        self
    }

    /// Sets the log buffer capacity.
    pub fn with_log_capacity(mut self, capacity: LogCapacity) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Sets the housekeeping interval.
    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Sets the drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds of the log buffer.
///
/// When an insert pushes the buffer above `max` records, the `trim` oldest
/// records are evicted in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawLogCapacity", into = "RawLogCapacity")]
pub struct LogCapacity {
    max: usize,
    trim: usize,
}

impl LogCapacity {
    /// Roughly 100 KB of typical log lines.
    pub const DEFAULT_MAX: usize = 1500;
    /// Roughly 20 KB of typical log lines.
    pub const DEFAULT_TRIM: usize = 300;

    /// Creates a capacity, rejecting `trim == 0` and `trim >= max`.
    pub fn new(max: usize, trim: usize) -> SyncResult<Self> {
        if trim == 0 || trim >= max {
            return Err(SyncError::InvalidConfig(format!(
                "log trim count must be in 1..{max}, got {trim}"
            )));
        }
        Ok(Self { max, trim })
    }

    /// Maximum number of buffered records.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Number of records evicted when `max` is exceeded.
    pub fn trim(&self) -> usize {
        self.trim
    }
}

impl Default for LogCapacity {
    fn default() -> Self {
        Self {
            max: Self::DEFAULT_MAX,
            trim: Self::DEFAULT_TRIM,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawLogCapacity {
    max: usize,
    trim: usize,
}

impl TryFrom<RawLogCapacity> for LogCapacity {
    type Error = SyncError;

    fn try_from(raw: RawLogCapacity) -> SyncResult<Self> {
        Self::new(raw.max, raw.trim)
    }
}

impl From<LogCapacity> for RawLogCapacity {
    fn from(capacity: LogCapacity) -> Self {
        Self {
            max: capacity.max,
            trim: capacity.trim,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
