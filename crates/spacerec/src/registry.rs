//! One watcher per resource ID.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::StreamCapture;
use crate::status::StatusSource;
use crate::watcher::{
    LifecycleWatcher, OutputPathResolver, WatcherConfig, WatcherEvent, WatcherEventBroadcaster,
    WatcherEventKind, WatcherHandle, WatcherState,
};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Delay before a terminal watcher is dropped from the registry.
    pub removal_grace: Duration,
    /// Keep failed watchers until they are unregistered.
    pub retain_failed: bool,
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            removal_grace: Duration::from_secs(30),
            retain_failed: true,
            event_capacity: 256,
        }
    }
}

/// Registry of active watchers keyed by resource ID.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct WatcherRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    watchers: DashMap<String, Arc<WatcherHandle>>,
    source: Arc<dyn StatusSource>,
    capture: StreamCapture,
    output_path: OutputPathResolver,
    watcher_config: WatcherConfig,
    config: RegistryConfig,
    /// Terminal events of every watcher.
    events: WatcherEventBroadcaster,
    token: CancellationToken,
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watchers", &self.ids())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl WatcherRegistry {
    pub fn new(
        source: Arc<dyn StatusSource>,
        capture: StreamCapture,
        output_path: OutputPathResolver,
        watcher_config: WatcherConfig,
        config: RegistryConfig,
    ) -> Self {
        let events = WatcherEventBroadcaster::with_capacity(config.event_capacity);
        Self {
            inner: Arc::new(RegistryInner {
                watchers: DashMap::new(),
                source,
                capture,
                output_path,
                watcher_config,
                config,
                events,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Start watching `id`, or return the watcher already doing so.
    ///
    /// A terminal entry still held by the registry is replaced.
    pub fn register(&self, id: &str) -> Arc<WatcherHandle> {
        self.register_with_output(id, None)
    }

    /// Like [`register`](Self::register), writing a new watcher's capture
    /// where `output_path` says instead of the registry default. An existing
    /// watcher keeps its own destination.
    pub fn register_with_output(
        &self,
        id: &str,
        output_path: Option<OutputPathResolver>,
    ) -> Arc<WatcherHandle> {
        let output_path = output_path.unwrap_or_else(|| self.inner.output_path.clone());
        match self.inner.watchers.entry(id.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_terminal() => {
                debug!(resource_id = %id, "Watcher already registered");
                entry.get().clone()
            }
            Entry::Occupied(mut entry) => {
                info!(resource_id = %id, "Replacing terminal watcher");
                let handle = self.start_watcher(id, output_path);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                info!(resource_id = %id, "Registering watcher");
                let handle = self.start_watcher(id, output_path);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn start_watcher(&self, id: &str, output_path: OutputPathResolver) -> Arc<WatcherHandle> {
        let inner = &self.inner;
        let watcher = LifecycleWatcher::new(
            id,
            inner.source.clone(),
            inner.capture.clone(),
            output_path,
            inner.watcher_config.clone(),
            inner.token.child_token(),
        );
        let handle = Arc::new(watcher.spawn());
        spawn_reaper(Arc::downgrade(&self.inner), handle.clone());
        handle
    }

    /// Cancel and remove the watcher for `id`.
    pub fn unregister(&self, id: &str) -> Option<Arc<WatcherHandle>> {
        let (_, handle) = self.inner.watchers.remove(id)?;
        info!(resource_id = %id, "Unregistering watcher");
        handle.cancel();
        Some(handle)
    }

    pub fn get(&self, id: &str) -> Option<Arc<WatcherHandle>> {
        self.inner.watchers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.watchers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner
            .watchers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.watchers.is_empty()
    }

    /// Terminal events (`Complete`, `Error`, `Cancelled`) of every watcher.
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel every watcher and wait for all of them to settle.
    pub async fn shutdown(&self) {
        info!(watchers = self.len(), "Shutting down watcher registry");
        self.inner.token.cancel();
        let handles: Vec<_> = self
            .inner
            .watchers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        join_all(handles.iter().map(|handle| handle.wait())).await;
    }
}

fn terminal_event(state: &WatcherState) -> Option<WatcherEventKind> {
    match state {
        WatcherState::Completed { output_path } => Some(WatcherEventKind::Complete {
            output_path: output_path.clone(),
        }),
        WatcherState::Failed { cause } => Some(WatcherEventKind::Error {
            cause: cause.clone(),
        }),
        WatcherState::Cancelled => Some(WatcherEventKind::Cancelled),
        _ => None,
    }
}

/// Relay the watcher's terminal event and drop it from the registry after the
/// grace period. Only the exact handle is removed, so a replacement
/// registered in the meantime survives.
fn spawn_reaper(registry: Weak<RegistryInner>, handle: Arc<WatcherHandle>) {
    tokio::spawn(async move {
        let state = handle.wait().await;

        let (grace, retain) = {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            if let Some(kind) = terminal_event(&state) {
                inner
                    .events
                    .publish(WatcherEvent::new(handle.id().into(), kind));
            }
            (
                inner.config.removal_grace,
                state.is_failed() && inner.config.retain_failed,
            )
        };

        if retain {
            debug!(resource_id = %handle.id(), "Retaining failed watcher until unregistered");
            return;
        }

        tokio::time::sleep(grace).await;

        if let Some(inner) = registry.upgrade()
            && inner
                .watchers
                .remove_if(handle.id(), |_, current| Arc::ptr_eq(current, &handle))
                .is_some()
        {
            debug!(resource_id = %handle.id(), state = %state, "Removed terminal watcher");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureConfig;
    use crate::credentials::CredentialStore;
    use crate::status::{ResourceStatus, StatusReport};
    use async_trait::async_trait;

    struct Fixed(ResourceStatus);

    #[async_trait]
    impl StatusSource for Fixed {
        async fn fetch_status(&self, _id: &str) -> crate::Result<StatusReport> {
            Ok(self.0.clone().into())
        }
    }

    fn registry(status: ResourceStatus, config: RegistryConfig) -> WatcherRegistry {
        let capture = StreamCapture::new(
            crate::http::HttpConfig::default().build_client().unwrap(),
            Arc::new(CredentialStore::default()),
            CaptureConfig::default(),
        );
        WatcherRegistry::new(
            Arc::new(Fixed(status)),
            capture,
            Arc::new(|id: &str, _: &StatusReport| std::env::temp_dir().join(format!("{id}.aac"))),
            WatcherConfig {
                scheduled_interval: Duration::from_millis(10),
                ..Default::default()
            },
            config,
        )
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = registry(ResourceStatus::Scheduled, RegistryConfig::default());
        let first = registry.register("abc");
        let second = registry.register("abc");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        let other = registry.register("def");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_cancels() {
        let registry = registry(ResourceStatus::Scheduled, RegistryConfig::default());
        let handle = registry.register("abc");
        let removed = registry.unregister("abc").unwrap();
        assert!(Arc::ptr_eq(&handle, &removed));
        assert!(registry.get("abc").is_none());
        assert!(matches!(handle.wait().await, WatcherState::Cancelled));
        assert!(registry.unregister("abc").is_none());
    }

    #[tokio::test]
    async fn failed_watcher_is_retained_and_replaced_on_register() {
        let registry = registry(ResourceStatus::NotFound, RegistryConfig::default());
        let mut events = registry.subscribe();
        let first = registry.register("gone");

        let event = events.recv().await.unwrap();
        assert_eq!(&*event.resource_id, "gone");
        assert!(matches!(event.kind, WatcherEventKind::Error { .. }));

        assert!(first.state().is_failed());
        assert!(Arc::ptr_eq(&registry.get("gone").unwrap(), &first));

        let second = registry.register("gone");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn terminal_watchers_are_removed_after_grace() {
        let registry = registry(
            ResourceStatus::NotFound,
            RegistryConfig {
                removal_grace: Duration::from_millis(20),
                retain_failed: false,
                ..Default::default()
            },
        );
        let mut events = registry.subscribe();
        registry.register("gone");
        events.recv().await.unwrap();

        for _ in 0..50 {
            if registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("terminal watcher was not removed");
    }
}
