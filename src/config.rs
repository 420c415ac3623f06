//! Configuration types.

use std::time::Duration;

/// Business-hours window for non-urgent dispatch.
///
/// Hours are in the window's own timezone (UTC unless an active
/// time-based rule supplies an offset). `end_hour` is exclusive.
#[derive(Debug, Clone, Copy)]
pub struct BusinessHours {
    /// First hour of the window (0-23).
    pub start_hour: u32,
    /// First hour past the window (1-24).
    pub end_hour: u32,
    /// Whether Saturday and Sunday are outside the window.
    pub weekdays_only: bool,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 17,
            weekdays_only: true,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the dispatch worker checks for due items.
    pub poll_interval: Duration,
    /// Wait after an unexpected worker-cycle fault before the next cycle.
    pub error_backoff: Duration,
    /// Maximum delivery attempts per item before it is marked failed.
    pub max_retries: u32,
    /// Unit for the exponential retry backoff (`2^retry_count * base`).
    pub backoff_base: Duration,
    /// Default dispatch window when no time-based rule is active.
    pub business_hours: BusinessHours,
    /// Delay applied when the send-volume constraint is tripped.
    pub batch_interval: Duration,
    /// Send-volume ceiling per minute when no volume rule is active
    /// (0 = unlimited).
    pub max_sends_per_minute: u32,
    /// How long `shutdown()` waits for the worker before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(60), // 1 minute
            business_hours: BusinessHours::default(),
            batch_interval: Duration::from_secs(300), // 5 minutes
            max_sends_per_minute: 0,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
