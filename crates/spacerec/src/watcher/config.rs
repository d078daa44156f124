use std::time::Duration;

/// Polling policy for a [`LifecycleWatcher`](super::LifecycleWatcher).
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Poll interval while pending or scheduled.
    pub scheduled_interval: Duration,
    /// Poll interval while live without a manifest.
    pub live_interval: Duration,
    /// Consecutive not-found results before the watcher fails.
    pub not_found_threshold: u32,
    /// Consecutive transient errors tolerated; one more fails the watcher.
    pub max_transient_errors: u32,
    /// Upper bound for the backoff applied after transient errors.
    pub max_backoff: Duration,
    /// Capture an ended resource when a replay manifest is still available.
    pub capture_replays: bool,
    pub event_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            scheduled_interval: Duration::from_secs(30),
            live_interval: Duration::from_secs(5),
            not_found_threshold: 3,
            max_transient_errors: 10,
            max_backoff: Duration::from_secs(300),
            capture_replays: true,
            event_capacity: 256,
        }
    }
}

impl WatcherConfig {
    /// `interval * 2^(n-1)` after `n` consecutive transient errors, capped at `max_backoff`.
    pub fn backoff(&self, interval: Duration, consecutive_errors: u32) -> Duration {
        if consecutive_errors == 0 {
            return interval;
        }
        let multiplier = 1u32
            .checked_shl(consecutive_errors - 1)
            .unwrap_or(u32::MAX);
        interval
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff.max(interval))
    }
}
