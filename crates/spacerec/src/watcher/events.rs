//! Watcher lifecycle events.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::Error;

/// An event emitted by a watcher, tagged with its resource ID.
#[derive(Debug, Clone)]
pub struct WatcherEvent {
    pub resource_id: Arc<str>,
    pub timestamp: DateTime<Utc>,
    pub kind: WatcherEventKind,
}

#[derive(Debug, Clone)]
pub enum WatcherEventKind {
    Scheduled,
    Live,
    Capturing {
        manifest_url: String,
    },
    Progress {
        bytes_written: u64,
        total_chunks: u64,
        chunks_written: u64,
    },
    Complete {
        output_path: PathBuf,
    },
    Error {
        cause: Arc<Error>,
    },
    Cancelled,
}

impl WatcherEvent {
    pub fn new(resource_id: Arc<str>, kind: WatcherEventKind) -> Self {
        Self {
            resource_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            WatcherEventKind::Complete { .. } | WatcherEventKind::Error { .. } | WatcherEventKind::Cancelled
        )
    }
}

/// Fan-out of [`WatcherEvent`]s to any number of subscribers.
///
/// Publishing never blocks; slow subscribers observe `Lagged`.
#[derive(Debug, Clone)]
pub struct WatcherEventBroadcaster {
    sender: broadcast::Sender<WatcherEvent>,
}

impl WatcherEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of receivers, 0 when nobody listens.
    pub fn publish(&self, event: WatcherEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatcherEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let events = WatcherEventBroadcaster::with_capacity(4);
        assert_eq!(
            events.publish(WatcherEvent::new("a".into(), WatcherEventKind::Live)),
            0
        );

        let mut rx = events.subscribe();
        assert_eq!(
            events.publish(WatcherEvent::new("a".into(), WatcherEventKind::Cancelled)),
            1
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(&*event.resource_id, "a");
        assert!(event.is_terminal());
    }
}
