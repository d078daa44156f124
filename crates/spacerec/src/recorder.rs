//! High-level entry point tying credentials, status lookup, watchers and
//! capture together.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::capture::{
    CaptureConfig, CaptureEventSink, CaptureOptions, CaptureOutcome, StreamCapture,
    capture_from_manifest,
};
use crate::credentials::{AuthStatus, CredentialOptions, CredentialStore};
use crate::http::HttpConfig;
use crate::naming::{self, DEFAULT_EXTENSION};
use crate::registry::{RegistryConfig, WatcherRegistry};
use crate::status::{HttpStatusClient, StatusClientConfig, StatusReport, StatusSource};
use crate::watcher::{OutputPathResolver, WatcherConfig, WatcherHandle};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Root directory for captured files.
    pub media_root: PathBuf,
    /// File extension of captured audio, without the dot.
    pub extension: String,
    pub credentials: CredentialOptions,
    pub http: HttpConfig,
    pub status: StatusClientConfig,
    pub watcher: WatcherConfig,
    pub capture: CaptureConfig,
    pub registry: RegistryConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            extension: DEFAULT_EXTENSION.to_string(),
            credentials: CredentialOptions {
                env_fallback: true,
                ..Default::default()
            },
            http: HttpConfig::default(),
            status: StatusClientConfig::default(),
            watcher: WatcherConfig::default(),
            capture: CaptureConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Per-download destination overrides.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// File name without extension.
    pub filename: Option<String>,
    /// Directory under the media root.
    pub sub_dir: Option<String>,
}

impl DownloadOptions {
    fn is_default(&self) -> bool {
        self.filename.is_none() && self.sub_dir.is_none()
    }
}

pub struct SpaceRecorder {
    config: RecorderConfig,
    client: reqwest::Client,
    credentials: Arc<CredentialStore>,
    registry: WatcherRegistry,
}

impl std::fmt::Debug for SpaceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceRecorder")
            .field("media_root", &self.config.media_root)
            .field("credentials", &self.credentials)
            .field("registry", &self.registry)
            .finish()
    }
}

impl SpaceRecorder {
    /// Build the recorder against the remote status API.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: RecorderConfig) -> Result<Self> {
        let client = config.http.build_client()?;
        let credentials = CredentialStore::init(config.credentials.clone());
        let source = Arc::new(HttpStatusClient::new(
            client.clone(),
            credentials.clone(),
            config.status.clone(),
        ));
        Ok(Self::assemble(config, client, credentials, source))
    }

    /// Build the recorder around a custom [`StatusSource`].
    pub fn with_status_source(
        config: RecorderConfig,
        source: Arc<dyn StatusSource>,
    ) -> Result<Self> {
        let client = config.http.build_client()?;
        let credentials = CredentialStore::init(config.credentials.clone());
        Ok(Self::assemble(config, client, credentials, source))
    }

    fn assemble(
        config: RecorderConfig,
        client: reqwest::Client,
        credentials: Arc<CredentialStore>,
        source: Arc<dyn StatusSource>,
    ) -> Self {
        let capture = StreamCapture::new(
            client.clone(),
            credentials.clone(),
            config.capture.clone(),
        );
        let output_path = Self::resolver(&config, DownloadOptions::default());
        let registry = WatcherRegistry::new(
            source,
            capture,
            output_path,
            config.watcher.clone(),
            config.registry.clone(),
        );

        info!(media_root = %config.media_root.display(), "Recorder initialized");

        Self {
            config,
            client,
            credentials,
            registry,
        }
    }

    fn resolver(config: &RecorderConfig, options: DownloadOptions) -> OutputPathResolver {
        let media_root = config.media_root.clone();
        let extension = config.extension.clone();
        Arc::new(move |id: &str, report: &StatusReport| {
            let filename = options
                .filename
                .clone()
                .unwrap_or_else(|| naming::watcher_filename(id, report));
            naming::output_path(&media_root, options.sub_dir.as_deref(), &filename, &extension)
        })
    }

    /// Replace both credentials at once.
    pub fn set_credentials(&self, primary: Option<String>, secondary: Option<String>) {
        self.credentials.set(primary, secondary);
        info!("Credentials updated");
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.credentials.status()
    }

    /// Watch the resource referenced by a space URL.
    pub fn download_by_url(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<Arc<WatcherHandle>> {
        let id = naming::parse_space_id(url)
            .ok_or_else(|| Error::invalid_url(url, "no space ID in URL"))?;
        self.download_by_space_id(&id, options)
    }

    /// Watch a resource by ID. Returns the existing watcher if one is active.
    pub fn download_by_space_id(
        &self,
        id: &str,
        options: DownloadOptions,
    ) -> Result<Arc<WatcherHandle>> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::config("empty resource ID"));
        }
        let output_path =
            (!options.is_default()).then(|| Self::resolver(&self.config, options));
        Ok(self.registry.register_with_output(id, output_path))
    }

    /// Capture a playlist directly, bypassing lifecycle watching.
    pub async fn download_by_playlist_url(
        &self,
        playlist_url: &str,
        options: DownloadOptions,
        on_event: Option<CaptureEventSink>,
        cancel: CancellationToken,
    ) -> Result<CaptureOutcome> {
        let filename = options
            .filename
            .unwrap_or_else(naming::timestamped_filename);
        let output_path = naming::output_path(
            &self.config.media_root,
            options.sub_dir.as_deref(),
            &filename,
            &self.config.extension,
        );

        capture_from_manifest(
            self.client.clone(),
            self.credentials.clone(),
            playlist_url,
            &output_path,
            CaptureOptions {
                config: self.config.capture.clone(),
                on_event,
                cancel: Some(cancel),
            },
        )
        .await
    }

    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Cancel all watchers and stop the credential file watch.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
        self.credentials.shutdown();
    }
}
