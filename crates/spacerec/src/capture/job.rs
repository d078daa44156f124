//! The capture job: playlist in, one file out.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::config::CaptureConfig;
use super::events::{CaptureEvent, CaptureEventSink};
use super::fetcher::ChunkFetcher;
use super::manifest::{ChunkReference, MediaManifest, ParsedManifest, parse_manifest, select_variant};
use super::retry::{RetryAction, retry_with_backoff};
use super::sequencer::ChunkSequencer;
use crate::credentials::CredentialStore;
use crate::{Error, Result};

/// Suffix of the temporary file written while a capture is in progress.
pub const PART_SUFFIX: &str = "part";

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub chunks_written: u64,
    /// Sum of the advertised chunk durations.
    pub media_duration: Duration,
}

/// Options for [`capture_from_manifest`].
#[derive(Clone, Default)]
pub struct CaptureOptions {
    pub config: CaptureConfig,
    pub on_event: Option<CaptureEventSink>,
    /// Cancels the capture; a fresh token is used when absent.
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("config", &self.config)
            .field("on_event", &self.on_event.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Capture `manifest_url` into `output_path` with a one-off [`StreamCapture`].
///
/// `client` should come from [`HttpConfig::build_client`](crate::HttpConfig::build_client);
/// a plain `reqwest::Client::new()` panics unless a rustls crypto provider was
/// installed first (see [`install_rustls_provider`](crate::http::install_rustls_provider)).
pub async fn capture_from_manifest(
    client: reqwest::Client,
    credentials: Arc<CredentialStore>,
    manifest_url: &str,
    output_path: impl AsRef<Path>,
    options: CaptureOptions,
) -> Result<CaptureOutcome> {
    let mut capture = StreamCapture::new(client, credentials, options.config);
    if let Some(sink) = options.on_event {
        capture = capture.with_event_sink(sink);
    }
    let token = options.cancel.unwrap_or_default();
    capture
        .run(manifest_url, output_path.as_ref(), &token)
        .await
}

/// `<output>.part`
pub fn part_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Downloads the chunks of an HLS playlist and appends them, in order, to a
/// single output file.
#[derive(Clone)]
pub struct StreamCapture {
    fetcher: ChunkFetcher,
    config: CaptureConfig,
    on_event: Option<CaptureEventSink>,
}

struct Written {
    bytes: u64,
    chunks: u64,
    media_duration: Duration,
}

impl StreamCapture {
    /// Same client requirement as [`capture_from_manifest`]: build it with
    /// [`HttpConfig::build_client`](crate::HttpConfig::build_client) or install
    /// a rustls provider before calling `reqwest::Client::new()`.
    pub fn new(
        client: reqwest::Client,
        credentials: Arc<CredentialStore>,
        config: CaptureConfig,
    ) -> Self {
        let credentials = config.send_credentials.then_some(credentials);
        Self {
            fetcher: ChunkFetcher::new(client, credentials),
            config,
            on_event: None,
        }
    }

    pub fn with_event_sink(mut self, sink: CaptureEventSink) -> Self {
        self.on_event = Some(sink);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn emit(&self, event: CaptureEvent) {
        if let Some(sink) = &self.on_event {
            sink(event);
        }
    }

    /// Run the capture to completion.
    ///
    /// On success the output file holds every chunk in ascending order. On
    /// failure or cancellation nothing is left at `output_path` or its
    /// `.part` sibling.
    #[instrument(skip(self, token), fields(output = %output_path.display()))]
    pub async fn run(
        &self,
        manifest_url: &str,
        output_path: &Path,
        token: &CancellationToken,
    ) -> Result<CaptureOutcome> {
        let part = part_path(output_path);
        let result = self.run_inner(manifest_url, output_path, &part, token).await;

        match result {
            Ok(outcome) => {
                info!(
                    bytes = outcome.bytes_written,
                    chunks = outcome.chunks_written,
                    "Capture complete"
                );
                self.emit(CaptureEvent::Complete {
                    output_path: outcome.output_path.clone(),
                    bytes_written: outcome.bytes_written,
                    chunks_written: outcome.chunks_written,
                });
                Ok(outcome)
            }
            Err(err) => {
                remove_partial(&part).await;
                if err.is_cancelled() {
                    info!("Capture cancelled");
                    self.emit(CaptureEvent::Cancelled);
                } else {
                    warn!(error = %err, "Capture failed");
                    self.emit(CaptureEvent::Error {
                        cause: Arc::new(err.clone()),
                    });
                }
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        manifest_url: &str,
        output_path: &Path,
        part: &Path,
        token: &CancellationToken,
    ) -> Result<CaptureOutcome> {
        let url = Url::parse(manifest_url).map_err(|e| Error::invalid_url(manifest_url, e))?;
        let manifest = self.resolve_media_manifest(&url, token).await?;

        let live = !manifest.ended && self.config.follow_live;
        if manifest.chunks.is_empty() && !live {
            return Err(Error::manifest(format!(
                "playlist at {} lists no chunks",
                manifest.url
            )));
        }

        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.emit(CaptureEvent::Started {
            manifest_url: manifest.url.to_string(),
            output_path: output_path.to_path_buf(),
            live,
        });

        let written = self.write_chunks(manifest, live, part, token).await?;

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if written.chunks == 0 {
            return Err(Error::manifest(format!(
                "live playlist at {url} ended without any chunks"
            )));
        }
        tokio::fs::rename(part, output_path).await?;

        Ok(CaptureOutcome {
            output_path: output_path.to_path_buf(),
            bytes_written: written.bytes,
            chunks_written: written.chunks,
            media_duration: written.media_duration,
        })
    }

    /// Fetch `url`, following a master playlist to the selected variant.
    async fn resolve_media_manifest(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<MediaManifest> {
        match self.fetch_manifest(url, token).await? {
            ParsedManifest::Media(media) => Ok(media),
            ParsedManifest::Master(variants) => {
                let variant = select_variant(&variants, self.config.variant_policy)
                    .ok_or_else(|| Error::manifest("master playlist has no variants"))?;
                debug!(
                    variant = %variant.url,
                    bandwidth = variant.bandwidth,
                    "Selected variant"
                );
                match self.fetch_manifest(&variant.url, token).await? {
                    ParsedManifest::Media(media) => Ok(media),
                    ParsedManifest::Master(_) => Err(Error::manifest(format!(
                        "variant {} is itself a master playlist",
                        variant.url
                    ))),
                }
            }
        }
    }

    async fn fetch_manifest(&self, url: &Url, token: &CancellationToken) -> Result<ParsedManifest> {
        let fetcher = &self.fetcher;
        let bytes = retry_with_backoff(&self.config.retry, token, move |_| async move {
            RetryAction::from_result(fetcher.fetch_playlist(url).await)
        })
        .await
        .map_err(|failure| failure.error)?;
        parse_manifest(url, &bytes)
    }

    async fn fetch_chunk(
        &self,
        position: u64,
        chunk: ChunkReference,
        token: &CancellationToken,
    ) -> Result<(u64, Bytes)> {
        let fetcher = &self.fetcher;
        let chunk_ref = &chunk;
        retry_with_backoff(&self.config.retry, token, move |_| async move {
            RetryAction::from_result(fetcher.fetch_chunk(chunk_ref).await)
        })
        .await
        .map(|bytes| (position, bytes))
        .map_err(|failure| {
            if failure.error.is_cancelled() {
                Error::Cancelled
            } else {
                Error::ChunkFetch {
                    index: chunk.index,
                    attempts: failure.attempts,
                    source: Arc::new(failure.error),
                }
            }
        })
    }

    async fn write_chunks(
        &self,
        manifest: MediaManifest,
        mut live: bool,
        part: &Path,
        token: &CancellationToken,
    ) -> Result<Written> {
        let file = File::create(part).await?;
        let mut sequencer = ChunkSequencer::new(BufWriter::new(file));

        let concurrency = self.config.effective_concurrency();
        let playlist_url = manifest.url.clone();

        let mut queue: VecDeque<(u64, ChunkReference)> = VecDeque::new();
        let mut known: u64 = 0;
        let mut last_index: Option<u64> = None;
        let mut media_duration = Duration::ZERO;

        let mut enqueue = |chunks: Vec<ChunkReference>,
                           queue: &mut VecDeque<(u64, ChunkReference)>,
                           known: &mut u64| {
            for chunk in chunks {
                if last_index.is_some_and(|last| chunk.index <= last) {
                    continue;
                }
                last_index = Some(chunk.index);
                media_duration += chunk.duration;
                queue.push_back((*known, chunk));
                *known += 1;
            }
        };

        enqueue(manifest.chunks, &mut queue, &mut known);

        let mut refresh_at = Instant::now() + self.config.refresh_interval(manifest.target_duration);
        let mut idle_refreshes: u32 = 0;
        let mut refresh_failures: u32 = 0;

        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < concurrency
                && let Some((position, chunk)) = queue.pop_front()
            {
                in_flight.push(self.fetch_chunk(position, chunk, token));
            }

            if in_flight.is_empty() && queue.is_empty() && !live {
                break;
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    return Err(Error::Cancelled);
                }

                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    let (position, bytes) = result?;
                    if sequencer.push(position, bytes).await? > 0 {
                        self.emit(CaptureEvent::Progress {
                            bytes_written: sequencer.bytes_written(),
                            total_chunks: known,
                            chunks_written: sequencer.chunks_written(),
                        });
                    }
                }

                _ = tokio::time::sleep_until(refresh_at), if live => {
                    match self.fetch_manifest(&playlist_url, token).await {
                        Ok(ParsedManifest::Media(refreshed)) => {
                            refresh_failures = 0;
                            let before = known;
                            enqueue(refreshed.chunks, &mut queue, &mut known);

                            if known == before {
                                idle_refreshes += 1;
                            } else {
                                debug!(new_chunks = known - before, total = known, "Playlist refreshed");
                                idle_refreshes = 0;
                            }

                            if refreshed.ended {
                                debug!("Playlist ended");
                                live = false;
                            } else if idle_refreshes >= self.config.live_end_grace {
                                info!(idle_refreshes, "No new chunks, treating the stream as ended");
                                live = false;
                            }
                            refresh_at = Instant::now()
                                + self.config.refresh_interval(refreshed.target_duration);
                        }
                        Ok(ParsedManifest::Master(_)) => {
                            return Err(Error::manifest(format!(
                                "playlist at {playlist_url} turned into a master playlist"
                            )));
                        }
                        Err(err) if err.is_cancelled() => return Err(err),
                        Err(err) => {
                            refresh_failures += 1;
                            if refresh_failures > self.config.max_playlist_retries {
                                return Err(err);
                            }
                            let delay = self.config.retry.delay_for_attempt(refresh_failures - 1);
                            warn!(
                                attempt = refresh_failures,
                                max = self.config.max_playlist_retries,
                                error = %err,
                                "Playlist refresh failed"
                            );
                            refresh_at = Instant::now() + delay;
                        }
                    }
                }
            }
        }

        if sequencer.buffered() > 0 {
            return Err(Error::manifest(format!(
                "{} chunk(s) left without their predecessors",
                sequencer.buffered()
            )));
        }

        let bytes = sequencer.bytes_written();
        let chunks = sequencer.chunks_written();
        let mut writer = sequencer.into_inner();
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_all().await?;
        drop(file);

        Ok(Written {
            bytes,
            chunks,
            media_duration,
        })
    }
}

async fn remove_partial(part: &Path) {
    match tokio::fs::remove_file(part).await {
        Ok(()) => debug!(path = %part.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %part.display(), error = %e, "Failed to remove partial output"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/media/space/room.m4a")),
            PathBuf::from("/media/space/room.m4a.part")
        );
    }
}
