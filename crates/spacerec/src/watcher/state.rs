use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Error;

/// Lifecycle state of a watched resource.
#[derive(Debug, Clone)]
pub enum WatcherState {
    /// Registered, no status seen yet.
    Pending,
    Scheduled,
    /// Live, waiting for a capture manifest.
    Live,
    Capturing { manifest_url: String },
    Completed { output_path: PathBuf },
    Failed { cause: Arc<Error> },
    Cancelled,
}

impl WatcherState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Capturing { .. } => "capturing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { cause } => write!(f, "failed ({cause})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!WatcherState::Pending.is_terminal());
        assert!(
            !WatcherState::Capturing {
                manifest_url: "https://cdn/x.m3u8".into()
            }
            .is_terminal()
        );
        assert!(WatcherState::Cancelled.is_terminal());
        let failed = WatcherState::Failed {
            cause: Arc::new(Error::not_found("abc")),
        };
        assert!(failed.is_terminal());
        assert!(failed.is_failed());
        assert_eq!(failed.to_string(), "failed (resource not found: abc)");
    }
}
