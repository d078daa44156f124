//! HTTP status lookup.
//!
//! A lookup is two requests: the status endpoint yields the lifecycle state and
//! a media key, the stream-status endpoint turns the media key into a playlist
//! location.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};

use super::types::{
    RemotePhase, ResourceStatus, StatusEnvelope, StatusReport, StreamStatus,
};
use crate::credentials::CredentialStore;
use crate::{Error, Result};

/// Placeholder in [`StatusClientConfig::status_url`] replaced by the resource ID.
pub const ID_PLACEHOLDER: &str = "{id}";
/// Placeholder in [`StatusClientConfig::stream_status_url`] replaced by the media key.
pub const MEDIA_KEY_PLACEHOLDER: &str = "{media_key}";

/// Source of lifecycle status for a resource ID.
///
/// The watcher only depends on this trait, so it can be driven by any source.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn fetch_status(&self, id: &str) -> Result<StatusReport>;
}

#[derive(Debug, Clone)]
pub struct StatusClientConfig {
    /// Status endpoint template containing `{id}`.
    pub status_url: String,
    /// Stream-status endpoint template containing `{media_key}`.
    pub stream_status_url: String,
    /// Extra headers sent with both requests.
    pub headers: HeaderMap,
}

impl Default for StatusClientConfig {
    fn default() -> Self {
        Self {
            status_url: "https://x.com/i/api/graphql/AudioSpaceById?variables=%7B%22id%22%3A%22{id}%22%7D".to_string(),
            stream_status_url: "https://x.com/i/api/1.1/live_video_stream/status/{media_key}"
                .to_string(),
            headers: HeaderMap::new(),
        }
    }
}

/// [`StatusSource`] backed by the remote HTTP API.
#[derive(Debug, Clone)]
pub struct HttpStatusClient {
    client: reqwest::Client,
    credentials: Arc<CredentialStore>,
    config: StatusClientConfig,
}

enum Fetched<T> {
    Body(T),
    NotFound,
}

impl HttpStatusClient {
    pub fn new(
        client: reqwest::Client,
        credentials: Arc<CredentialStore>,
        config: StatusClientConfig,
    ) -> Self {
        Self {
            client,
            credentials,
            config,
        }
    }

    pub fn config(&self) -> &StatusClientConfig {
        &self.config
    }

    fn status_url(&self, id: &str) -> String {
        substitute(&self.config.status_url, ID_PLACEHOLDER, id)
    }

    fn stream_status_url(&self, media_key: &str) -> String {
        substitute(&self.config.stream_status_url, MEDIA_KEY_PLACEHOLDER, media_key)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        operation: &'static str,
    ) -> Result<Fetched<T>> {
        // Snapshot taken right before sending so rotation applies to the next request.
        let response = self
            .client
            .get(url)
            .headers(self.config.headers.clone())
            .headers(self.credentials.current_headers())
            .send()
            .await?;

        let status = response.status();
        trace!(%url, %status, operation, "Status response");

        match status {
            StatusCode::NOT_FOUND => return Ok(Fetched::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::Authentication {
                    status,
                    url: url.to_string(),
                });
            }
            s if !s.is_success() => return Err(Error::http_status(s, url, operation)),
            _ => {}
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map(Fetched::Body)
            .map_err(|e| Error::malformed(url, e.to_string()))
    }

    async fn lookup_location(&self, media_key: &str) -> Result<Option<String>> {
        let url = self.stream_status_url(media_key);
        match self.get_json::<StreamStatus>(&url, "stream status").await? {
            Fetched::NotFound => Ok(None),
            Fetched::Body(body) => Ok(body
                .source
                .and_then(|s| s.location)
                .filter(|l| !l.is_empty())),
        }
    }
}

#[async_trait]
impl StatusSource for HttpStatusClient {
    #[instrument(skip(self, id), fields(resource_id = %id))]
    async fn fetch_status(&self, id: &str) -> Result<StatusReport> {
        let url = self.status_url(id);

        let envelope = match self.get_json::<StatusEnvelope>(&url, "status").await? {
            Fetched::NotFound => return Ok(ResourceStatus::NotFound.into()),
            Fetched::Body(envelope) => envelope,
        };

        let Some(metadata) = envelope
            .data
            .and_then(|d| d.audio_space)
            .and_then(|s| s.metadata)
        else {
            debug!("Status response carries no metadata");
            return Ok(ResourceStatus::NotFound.into());
        };

        let raw_state = metadata.state.as_deref().unwrap_or_default();
        let phase = RemotePhase::parse(raw_state)
            .ok_or_else(|| Error::malformed(&url, format!("unknown state `{raw_state}`")))?;

        let location = match (phase, metadata.media_key.as_deref()) {
            (RemotePhase::Scheduled, _) | (_, None) => None,
            (_, Some(media_key)) => self.lookup_location(media_key).await?,
        };

        let status = match (phase, location) {
            (RemotePhase::Scheduled, _) => ResourceStatus::Scheduled,
            (RemotePhase::Running, Some(manifest_url)) => {
                ResourceStatus::LiveCapturable { manifest_url }
            }
            (RemotePhase::Running, None) => ResourceStatus::LiveNoManifest,
            (RemotePhase::Ended, manifest_url) => ResourceStatus::Ended { manifest_url },
        };

        debug!(?status, "Fetched resource status");

        Ok(StatusReport {
            status,
            title: metadata.title.filter(|t| !t.is_empty()),
            scheduled_start: metadata
                .scheduled_start
                .and_then(chrono::DateTime::from_timestamp_millis),
        })
    }
}

fn substitute(template: &str, placeholder: &str, value: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    template.replace(placeholder, &encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted_and_encoded() {
        assert_eq!(
            substitute("https://api/status/{id}?x=1", ID_PLACEHOLDER, "1OyKAjPPAPbGb"),
            "https://api/status/1OyKAjPPAPbGb?x=1"
        );
        assert_eq!(
            substitute("https://api/{media_key}", MEDIA_KEY_PLACEHOLDER, "28_1/a b"),
            "https://api/28_1%2Fa+b"
        );
    }
}
