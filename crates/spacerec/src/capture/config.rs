use std::time::Duration;

use super::retry::RetryPolicy;

/// How a variant is picked from a master playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VariantPolicy {
    #[default]
    HighestBitrate,
    LowestBitrate,
    /// Variant whose bandwidth is closest to the target, in bits per second.
    ClosestToBitrate(u64),
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Maximum number of chunk fetches in flight.
    pub concurrency: usize,

    /// Per-chunk retry policy.
    pub retry: RetryPolicy,

    pub variant_policy: VariantPolicy,

    /// Keep refreshing a playlist without `#EXT-X-ENDLIST`.
    pub follow_live: bool,

    /// Lower bound for the refresh interval (the playlist asks for target_duration / 2).
    pub min_refresh_interval: Duration,

    /// Consecutive refreshes without new chunks before a live capture is
    /// considered finished.
    pub live_end_grace: u32,

    /// Consecutive refresh failures tolerated before the capture fails.
    pub max_playlist_retries: u32,

    /// Attach credential headers to playlist and chunk requests.
    pub send_credentials: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
            variant_policy: VariantPolicy::default(),
            follow_live: true,
            min_refresh_interval: Duration::from_secs(1),
            live_end_grace: 6,
            max_playlist_retries: 3,
            send_credentials: false,
        }
    }
}

impl CaptureConfig {
    pub(crate) fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    /// Refresh interval for a playlist with the given target duration.
    pub(crate) fn refresh_interval(&self, target_duration: Duration) -> Duration {
        (target_duration / 2).max(self.min_refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_interval_has_a_floor() {
        let config = CaptureConfig::default();
        assert_eq!(
            config.refresh_interval(Duration::from_secs(6)),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.refresh_interval(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn zero_concurrency_still_makes_progress() {
        let config = CaptureConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }
}
