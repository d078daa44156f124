//! Per-resource lifecycle state machine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::config::WatcherConfig;
use super::events::{WatcherEvent, WatcherEventBroadcaster, WatcherEventKind};
use super::handle::WatcherHandle;
use super::state::WatcherState;
use crate::Error;
use crate::capture::{CaptureEvent, CaptureEventSink, StreamCapture};
use crate::status::{ResourceStatus, StatusReport, StatusSource};

/// Decides where a resource's capture is written.
pub type OutputPathResolver = Arc<dyn Fn(&str, &StatusReport) -> PathBuf + Send + Sync>;

enum Outcome {
    Completed(PathBuf),
    Failed(Error),
    Cancelled,
}

/// Polls a [`StatusSource`] for one resource and runs the capture once a
/// manifest is available.
pub struct LifecycleWatcher {
    id: Arc<str>,
    source: Arc<dyn StatusSource>,
    capture: StreamCapture,
    output_path: OutputPathResolver,
    config: WatcherConfig,
    state: watch::Sender<WatcherState>,
    events: WatcherEventBroadcaster,
    token: CancellationToken,
}

impl LifecycleWatcher {
    pub fn new(
        id: impl Into<Arc<str>>,
        source: Arc<dyn StatusSource>,
        capture: StreamCapture,
        output_path: OutputPathResolver,
        config: WatcherConfig,
        token: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Pending);
        let events = WatcherEventBroadcaster::with_capacity(config.event_capacity);
        Self {
            id: id.into(),
            source,
            capture,
            output_path,
            config,
            state,
            events,
            token,
        }
    }

    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle::new(
            self.id.clone(),
            self.token.clone(),
            self.state.subscribe(),
            self.events.clone(),
        )
    }

    /// Spawn the watcher on the runtime and return its handle.
    pub fn spawn(self) -> WatcherHandle {
        let handle = self.handle();
        let span = info_span!("watcher", resource_id = %self.id);
        tokio::spawn(self.run().instrument(span));
        handle
    }

    /// Drive the watcher to a terminal state.
    pub async fn run(self) -> WatcherState {
        info!("Watcher started");

        let (state, kind) = match self.drive().await {
            Outcome::Completed(output_path) => (
                WatcherState::Completed {
                    output_path: output_path.clone(),
                },
                WatcherEventKind::Complete { output_path },
            ),
            Outcome::Failed(err) => {
                let cause = Arc::new(err);
                (
                    WatcherState::Failed {
                        cause: cause.clone(),
                    },
                    WatcherEventKind::Error { cause },
                )
            }
            Outcome::Cancelled => (WatcherState::Cancelled, WatcherEventKind::Cancelled),
        };

        info!(state = %state, "Watcher finished");
        // Event first: anyone woken by the terminal state can already receive it.
        self.publish(kind);
        self.state.send_replace(state.clone());
        state
    }

    fn publish(&self, kind: WatcherEventKind) {
        self.events
            .publish(WatcherEvent::new(self.id.clone(), kind));
    }

    /// Move to a non-terminal state, announcing it only on an actual change.
    fn enter(&self, next: WatcherState, kind: WatcherEventKind) {
        let changed = self.state.borrow().name() != next.name();
        if changed {
            debug!(from = self.state.borrow().name(), to = next.name(), "State transition");
            self.state.send_replace(next);
            self.publish(kind);
        }
    }

    async fn drive(&self) -> Outcome {
        let mut not_found: u32 = 0;
        let mut transient: u32 = 0;

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Outcome::Cancelled,
                polled = self.source.fetch_status(&self.id) => polled,
            };

            match polled {
                Ok(report) => {
                    transient = 0;
                    if report.status != ResourceStatus::NotFound {
                        not_found = 0;
                    }

                    match &report.status {
                        ResourceStatus::NotFound => {
                            not_found += 1;
                            debug!(
                                consecutive = not_found,
                                threshold = self.config.not_found_threshold,
                                "Resource not found"
                            );
                            if not_found >= self.config.not_found_threshold {
                                return Outcome::Failed(Error::not_found(&*self.id));
                            }
                        }
                        ResourceStatus::Scheduled => {
                            self.enter(WatcherState::Scheduled, WatcherEventKind::Scheduled);
                        }
                        ResourceStatus::LiveNoManifest => {
                            self.enter(WatcherState::Live, WatcherEventKind::Live);
                        }
                        ResourceStatus::LiveCapturable { manifest_url } => {
                            return self.capture(manifest_url, &report).await;
                        }
                        ResourceStatus::Ended {
                            manifest_url: Some(manifest_url),
                        } if self.config.capture_replays => {
                            info!("Resource ended, capturing replay");
                            return self.capture(manifest_url, &report).await;
                        }
                        ResourceStatus::Ended { .. } => {
                            return Outcome::Failed(Error::Ended {
                                resource: self.id.to_string(),
                            });
                        }
                    }
                }
                Err(err) if err.is_transient() => {
                    transient += 1;
                    if transient > self.config.max_transient_errors {
                        return Outcome::Failed(Error::RetriesExhausted {
                            attempts: transient,
                            source: Arc::new(err),
                        });
                    }
                    warn!(
                        consecutive = transient,
                        max = self.config.max_transient_errors,
                        error = %err,
                        "Status check failed"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "Status check failed permanently");
                    return Outcome::Failed(err);
                }
            }

            let interval = if matches!(*self.state.borrow(), WatcherState::Live) {
                self.config.live_interval
            } else {
                self.config.scheduled_interval
            };
            let delay = self.config.backoff(interval, transient);

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Outcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn capture(&self, manifest_url: &str, report: &StatusReport) -> Outcome {
        self.enter(
            WatcherState::Capturing {
                manifest_url: manifest_url.to_string(),
            },
            WatcherEventKind::Capturing {
                manifest_url: manifest_url.to_string(),
            },
        );

        let output_path = (self.output_path)(&self.id, report);
        info!(%manifest_url, output = %output_path.display(), "Starting capture");

        let id = self.id.clone();
        let events = self.events.clone();
        let sink: CaptureEventSink = Arc::new(move |event: CaptureEvent| {
            if let CaptureEvent::Progress {
                bytes_written,
                total_chunks,
                chunks_written,
            } = event
            {
                events.publish(WatcherEvent::new(
                    id.clone(),
                    WatcherEventKind::Progress {
                        bytes_written,
                        total_chunks,
                        chunks_written,
                    },
                ));
            }
        });

        let capture = self.capture.clone().with_event_sink(sink);
        match capture
            .run(manifest_url, &output_path, &self.token.child_token())
            .await
        {
            Ok(outcome) => Outcome::Completed(outcome.output_path),
            Err(err) if err.is_cancelled() => Outcome::Cancelled,
            Err(err) => Outcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;

    use super::*;
    use crate::credentials::CredentialStore;
    use crate::capture::CaptureConfig;
    use crate::{ErrorKind, Result};

    /// Replays a fixed script, then repeats the last entry.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<ResourceStatus>>>,
        last: Mutex<Option<Result<ResourceStatus>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<ResourceStatus>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self, _id: &str) -> Result<StatusReport> {
            *self.calls.lock() += 1;
            let next = self.script.lock().pop_front();
            let result = match next {
                Some(result) => {
                    *self.last.lock() = Some(result.clone());
                    result
                }
                None => self
                    .last
                    .lock()
                    .clone()
                    .unwrap_or(Ok(ResourceStatus::Scheduled)),
            };
            result.map(StatusReport::from)
        }
    }

    fn fast_config() -> WatcherConfig {
        WatcherConfig {
            scheduled_interval: Duration::from_millis(10),
            live_interval: Duration::from_millis(5),
            max_backoff: Duration::from_millis(40),
            ..Default::default()
        }
    }

    fn watcher(source: Arc<ScriptedSource>, config: WatcherConfig) -> LifecycleWatcher {
        let capture = StreamCapture::new(
            crate::http::HttpConfig::default().build_client().unwrap(),
            Arc::new(CredentialStore::default()),
            CaptureConfig::default(),
        );
        let output: OutputPathResolver =
            Arc::new(|id: &str, _: &StatusReport| std::env::temp_dir().join(format!("{id}.aac")));
        LifecycleWatcher::new(
            "space1",
            source,
            capture,
            output,
            config,
            CancellationToken::new(),
        )
    }

    fn unavailable() -> Error {
        Error::http_status(StatusCode::SERVICE_UNAVAILABLE, "http://status", "status")
    }

    #[tokio::test]
    async fn three_not_found_polls_fail_the_watcher() {
        let source = ScriptedSource::new(vec![Ok(ResourceStatus::NotFound)]);
        let state = watcher(source.clone(), fast_config()).run().await;

        let WatcherState::Failed { cause } = state else {
            panic!("expected failure, got {state}");
        };
        assert_eq!(cause.kind(), ErrorKind::NotFound);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn not_found_counter_resets_on_other_results() {
        let source = ScriptedSource::new(vec![
            Ok(ResourceStatus::NotFound),
            Ok(ResourceStatus::NotFound),
            Ok(ResourceStatus::Scheduled),
            Ok(ResourceStatus::NotFound),
            Ok(ResourceStatus::NotFound),
            Ok(ResourceStatus::NotFound),
        ]);
        let state = watcher(source.clone(), fast_config()).run().await;
        assert!(state.is_failed());
        assert_eq!(source.calls(), 6);
    }

    #[tokio::test]
    async fn transient_errors_are_bounded() {
        let source = ScriptedSource::new(vec![Err(unavailable())]);
        let config = WatcherConfig {
            max_transient_errors: 2,
            ..fast_config()
        };
        let state = watcher(source.clone(), config).run().await;

        let WatcherState::Failed { cause } = state else {
            panic!("expected failure, got {state}");
        };
        assert!(matches!(*cause, Error::RetriesExhausted { attempts: 3, .. }));
        assert!(matches!(
            cause.root_cause(),
            Error::HttpStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            }
        ));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn authentication_error_fails_immediately() {
        let source = ScriptedSource::new(vec![
            Ok(ResourceStatus::Scheduled),
            Err(Error::Authentication {
                status: StatusCode::UNAUTHORIZED,
                url: "http://status".to_string(),
            }),
        ]);
        let state = watcher(source.clone(), fast_config()).run().await;
        let WatcherState::Failed { cause } = state else {
            panic!("expected failure, got {state}");
        };
        assert_eq!(cause.kind(), ErrorKind::Authentication);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn ended_without_replay_fails() {
        let source = ScriptedSource::new(vec![Ok(ResourceStatus::Ended { manifest_url: None })]);
        let state = watcher(source, fast_config()).run().await;
        let WatcherState::Failed { cause } = state else {
            panic!("expected failure, got {state}");
        };
        assert_eq!(cause.kind(), ErrorKind::Ended);
    }

    #[tokio::test]
    async fn transitions_are_announced_once() {
        let source = ScriptedSource::new(vec![
            Ok(ResourceStatus::Scheduled),
            Ok(ResourceStatus::Scheduled),
            Ok(ResourceStatus::LiveNoManifest),
            Ok(ResourceStatus::LiveNoManifest),
            Ok(ResourceStatus::NotFound),
        ]);
        let watcher = watcher(source, fast_config());
        let handle = watcher.handle();
        let mut events = handle.subscribe();
        watcher.spawn();

        let state = handle.wait().await;
        assert!(state.is_failed());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(&*event.resource_id, "space1");
            kinds.push(event.kind);
        }
        assert!(matches!(
            kinds.as_slice(),
            [
                WatcherEventKind::Scheduled,
                WatcherEventKind::Live,
                WatcherEventKind::Error { .. }
            ]
        ));
    }

    #[tokio::test]
    async fn cancellation_while_polling() {
        let source = ScriptedSource::new(vec![Ok(ResourceStatus::Scheduled)]);
        let config = WatcherConfig {
            scheduled_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let handle = watcher(source, config).spawn();

        let mut state = handle.watch_state();
        state
            .wait_for(|s| matches!(s, WatcherState::Scheduled))
            .await
            .unwrap();

        handle.cancel();
        let terminal = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
        assert!(matches!(terminal, WatcherState::Cancelled));
    }
}
