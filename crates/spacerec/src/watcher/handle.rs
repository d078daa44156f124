use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::events::{WatcherEvent, WatcherEventBroadcaster};
use super::state::WatcherState;

/// Caller-side view of a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    id: Arc<str>,
    token: CancellationToken,
    state: watch::Receiver<WatcherState>,
    events: WatcherEventBroadcaster,
}

impl WatcherHandle {
    pub(crate) fn new(
        id: Arc<str>,
        token: CancellationToken,
        state: watch::Receiver<WatcherState>,
        events: WatcherEventBroadcaster,
    ) -> Self {
        Self {
            id,
            token,
            state,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub fn state(&self) -> WatcherState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<WatcherState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.events.subscribe()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }

    /// Request cancellation; the watcher settles in `Cancelled` unless it is
    /// already terminal.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the watcher reaches a terminal state and return it.
    pub async fn wait(&self) -> WatcherState {
        let mut rx = self.state.clone();
        let terminal = rx
            .wait_for(WatcherState::is_terminal)
            .await
            .map(|state| state.clone());
        match terminal {
            Ok(state) => state,
            // Sender gone without a terminal state; report what was last seen.
            Err(_) => rx.borrow().clone(),
        }
    }
}
