//! Runtime tuning knobs. Consumed by this core, owned by the caller's
//! configuration layer.

use std::time::Duration;

/// Configuration for one connection's runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Hard cap on requests not yet in a terminal state.
    pub max_pending: usize,
    /// Correlation table entry cap.
    pub table_capacity: usize,
    /// Correlation table entry lifetime.
    pub table_max_age: Duration,
    /// Interval between liveness probes.
    pub heartbeat_interval: Duration,
    /// Consecutive missed probes tolerated before teardown.
    pub heartbeat_tolerance: u32,
    /// How long the heartbeat monitor waits for each probe reply. Kept
    /// shorter than `receive_timeout`.
    pub heartbeat_reply_timeout: Duration,
    /// Per-round-trip receive timeout for workers and untracked queries.
    pub receive_timeout: Duration,
    /// Upper bound on the worker count, before the hardware-parallelism clamp.
    pub worker_ceiling: usize,
    /// Pause between an orderly destroy and the replacing connect.
    pub settle_delay: Duration,
    /// Fallback poll bound inside blocking waits; wakeups are notify-driven,
    /// this only guards the snapshot/park race.
    pub poll_fallback: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_pending: 1024,
            table_capacity: 4096,
            table_max_age: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_tolerance: 3,
            heartbeat_reply_timeout: Duration::from_secs(2),
            receive_timeout: Duration::from_secs(30),
            worker_ceiling: 8,
            settle_delay: Duration::from_millis(200),
            poll_fallback: Duration::from_millis(50),
        }
    }
}
