use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::RANGE;
use tracing::trace;
use url::Url;

use super::manifest::ChunkReference;
use crate::credentials::CredentialStore;
use crate::{Error, Result};

/// Single-attempt HTTP fetches for playlists and chunks.
#[derive(Debug, Clone)]
pub struct ChunkFetcher {
    client: reqwest::Client,
    /// Present when credential headers should be attached.
    credentials: Option<Arc<CredentialStore>>,
}

impl ChunkFetcher {
    pub fn new(client: reqwest::Client, credentials: Option<Arc<CredentialStore>>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    fn get(&self, url: &Url) -> reqwest::RequestBuilder {
        let request = self.client.get(url.clone());
        match &self.credentials {
            Some(store) => request.headers(store.current_headers()),
            None => request,
        }
    }

    async fn body(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
        operation: &'static str,
    ) -> Result<Bytes> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::http_status(status, url.as_str(), operation));
        }
        let bytes = response.bytes().await?;
        trace!(%url, bytes = bytes.len(), operation, "Fetched");
        Ok(bytes)
    }

    pub async fn fetch_playlist(&self, url: &Url) -> Result<Bytes> {
        self.body(self.get(url), url, "playlist fetch").await
    }

    pub async fn fetch_chunk(&self, chunk: &ChunkReference) -> Result<Bytes> {
        let mut request = self.get(&chunk.url);
        if let Some(range) = &chunk.byte_range {
            request = request.header(RANGE, range.header_value());
        }
        self.body(request, &chunk.url, "chunk fetch").await
    }
}
