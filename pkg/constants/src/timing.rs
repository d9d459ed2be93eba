//! Queue, scheduler and retry timing defaults.

/// Default number of reconciliation workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Pause after an eviction so the released capacity is visible to the next read.
pub const EVICTION_SETTLE_MILLIS: u64 = 200;

/// Sweep period used when an expiry watch cannot be established.
pub const FALLBACK_SWEEP_HOURS: u64 = 72;

/// Retry delay after a failed expiry sweep.
pub const SWEEP_RETRY_SECS: u64 = 30;

/// First requeue delay after a failed reconciliation.
pub const REQUEUE_BASE_DELAY_MILLIS: u64 = 5;

/// Upper bound of the exponential requeue delay.
pub const REQUEUE_MAX_DELAY_SECS: u64 = 1000;

/// Attempts made by `retry_on_conflict` before surfacing the conflict.
pub const CONFLICT_RETRY_ATTEMPTS: u32 = 5;

/// Linear backoff step between conflict retries.
pub const CONFLICT_RETRY_STEP_MILLIS: u64 = 10;
